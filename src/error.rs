use thiserror::Error;

/// Errors produced while turning a capture into the canonical artifact.
///
/// The variants are deliberately distinct so callers can decide how to react:
/// an `EngineUnavailable` from one backend may be worth retrying on the other,
/// while an `Input` error needs a new capture.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The capture itself is unusable (empty buffer, missing container tag).
    /// Not retryable without new input.
    #[error("invalid capture input: {0}")]
    Input(String),

    /// The input bytes could not be decoded (unrecognized or corrupt container).
    #[error("failed to decode capture: {0}")]
    Decode(String),

    /// The backend failed to initialize (e.g. the transcoding executable is
    /// missing). Fatal for that backend; the other backend may still work.
    #[error("transcode backend unavailable: {0}")]
    EngineUnavailable(String),

    /// The filter chain ran but failed partway through.
    #[error("transcode execution failed: {0}")]
    Execution(String),
}

/// Errors produced while handing a canonical artifact to the receiver.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The receiver did not answer within the configured timeout.
    #[error("transfer to receiver timed out")]
    Timeout,

    /// The receiver could not be reached at all.
    #[error("receiver unreachable: {0}")]
    Unreachable(String),

    /// The receiver answered with a non-2xx status.
    #[error("receiver rejected transfer (status {status})")]
    Rejected { status: u16 },
}

/// Errors surfaced by the capture-to-transfer controller.
///
/// Poll failures never appear here; the status coordinator absorbs them and
/// downgrades its state instead.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// A capture is already being converted or transferred. There is no
    /// queue; the caller must wait and re-initiate.
    #[error("a capture is already in flight")]
    Busy,

    /// A resend was requested but no artifact is parked.
    #[error("no converted artifact is waiting to be sent")]
    NothingToResend,

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}
