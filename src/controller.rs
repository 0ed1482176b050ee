//! Capture-to-transfer orchestration.
//!
//! One user-initiated capture flows through here: convert via the transcode
//! engine, gate on the receiver's latest known state, transfer via the relay.
//! The status coordinator runs independently; the controller only reads its
//! snapshot at the moment of the gating decision.
//!
//! Single-flight policy (explicit, there is no queue):
//! - a capture arriving while another is converting or transferring is
//!   rejected with [`ControllerError::Busy`];
//! - a freshly converted artifact replaces any previously parked one.
//!
//! A transfer is only issued when the receiver reports `idle`. Any other
//! state (including `unreachable`) withholds the transfer and parks the
//! artifact; the operator re-triggers via [`Controller::resend`] once the
//! receiver frees up. Nothing is queued or retried automatically.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::artifact::CanonicalArtifact;
use crate::blob::CaptureBlob;
use crate::engine::TranscodeEngine;
use crate::error::ControllerError;
use crate::relay::ArtifactRelay;
use crate::status::{ReceiverStatus, ReceiverStatusSource};

/// What happened to a capture (or a resend) that did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The artifact reached the receiver.
    Transferred,
    /// Conversion succeeded but the receiver was not idle; the artifact is
    /// parked until the operator re-triggers.
    Held { receiver: ReceiverStatus },
}

pub struct Controller<S: ReceiverStatusSource> {
    engine: TranscodeEngine,
    status: S,
    relay: Box<dyn ArtifactRelay>,
    in_flight: AtomicBool,
    parked: Mutex<Option<CanonicalArtifact>>,
}

impl<S: ReceiverStatusSource> Controller<S> {
    pub fn new(engine: TranscodeEngine, status: S, relay: Box<dyn ArtifactRelay>) -> Self {
        Self {
            engine,
            status,
            relay,
            in_flight: AtomicBool::new(false),
            parked: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &TranscodeEngine {
        &self.engine
    }

    /// Whether a converted artifact is waiting for an operator re-trigger.
    pub fn has_parked_artifact(&self) -> bool {
        self.parked.lock().map(|p| p.is_some()).unwrap_or(false)
    }

    /// Run the full flow for one finalized capture.
    ///
    /// Blocks for the duration of conversion and (when gated open) transfer.
    pub fn run_capture(&self, blob: CaptureBlob) -> Result<CaptureOutcome, ControllerError> {
        let _guard = self.enter()?;

        let artifact = self.engine.convert(&blob)?;
        self.dispatch(artifact)
    }

    /// Operator re-trigger: try to send the parked artifact again.
    pub fn resend(&self) -> Result<CaptureOutcome, ControllerError> {
        let _guard = self.enter()?;

        let artifact = self
            .parked
            .lock()
            .map_err(|_| ControllerError::Busy)?
            .take()
            .ok_or(ControllerError::NothingToResend)?;
        self.dispatch(artifact)
    }

    fn enter(&self) -> Result<FlightGuard<'_>, ControllerError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ControllerError::Busy);
        }
        Ok(FlightGuard { flag: &self.in_flight })
    }

    /// Gate on the receiver's latest known state, then transfer or park.
    fn dispatch(&self, artifact: CanonicalArtifact) -> Result<CaptureOutcome, ControllerError> {
        let snapshot = self.status.latest();
        if snapshot.status != ReceiverStatus::Idle {
            info!(
                receiver = snapshot.status.as_str(),
                "receiver not idle; artifact held for manual re-trigger"
            );
            self.park(artifact);
            return Ok(CaptureOutcome::Held {
                receiver: snapshot.status,
            });
        }

        match self.relay.send(&artifact) {
            Ok(()) => {
                // A delivered artifact supersedes anything previously parked.
                if let Ok(mut parked) = self.parked.lock() {
                    *parked = None;
                }
                Ok(CaptureOutcome::Transferred)
            }
            Err(err) => {
                // Keep the artifact so the operator can re-trigger without
                // re-recording.
                warn!(error = %err, "transfer failed; artifact held for manual re-trigger");
                self.park(artifact);
                Err(err.into())
            }
        }
    }

    fn park(&self, artifact: CanonicalArtifact) {
        if let Ok(mut parked) = self.parked.lock() {
            *parked = Some(artifact);
        }
    }
}

struct FlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use crate::engine::{BackendKind, TranscodeBackend};
    use crate::error::{ConvertError, TransferError};
    use crate::job::ConversionJob;
    use crate::status::StatusSnapshot;

    struct FixedBackend;

    impl TranscodeBackend for FixedBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Sandbox
        }

        fn convert(
            &self,
            _job: &ConversionJob,
            _blob: &CaptureBlob,
        ) -> Result<CanonicalArtifact, ConvertError> {
            Ok(CanonicalArtifact::from_samples(&[0.1; 160]))
        }
    }

    #[derive(Clone)]
    struct FixedStatus(Arc<Mutex<ReceiverStatus>>);

    impl FixedStatus {
        fn new(status: ReceiverStatus) -> Self {
            Self(Arc::new(Mutex::new(status)))
        }

        fn set(&self, status: ReceiverStatus) {
            *self.0.lock().unwrap() = status;
        }
    }

    impl ReceiverStatusSource for FixedStatus {
        fn latest(&self) -> StatusSnapshot {
            StatusSnapshot {
                status: *self.0.lock().unwrap(),
                last_success: None,
            }
        }
    }

    struct CountingRelay {
        sends: Arc<AtomicUsize>,
        fail_with: Mutex<Option<TransferError>>,
    }

    impl CountingRelay {
        fn new(sends: Arc<AtomicUsize>) -> Self {
            Self {
                sends,
                fail_with: Mutex::new(None),
            }
        }
    }

    impl ArtifactRelay for CountingRelay {
        fn send(&self, _artifact: &CanonicalArtifact) -> Result<(), TransferError> {
            if let Some(err) = self.fail_with.lock().unwrap().take() {
                return Err(err);
            }
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn controller(
        status: FixedStatus,
        relay: CountingRelay,
    ) -> Controller<FixedStatus> {
        Controller::new(
            TranscodeEngine::new(Box::new(FixedBackend)),
            status,
            Box::new(relay),
        )
    }

    fn blob() -> CaptureBlob {
        CaptureBlob::new(vec![1, 2, 3], "wav")
    }

    #[test]
    fn idle_receiver_gets_the_transfer() -> anyhow::Result<()> {
        let sends = Arc::new(AtomicUsize::new(0));
        let ctl = controller(
            FixedStatus::new(ReceiverStatus::Idle),
            CountingRelay::new(Arc::clone(&sends)),
        );

        let outcome = ctl.run_capture(blob())?;
        assert_eq!(outcome, CaptureOutcome::Transferred);
        assert_eq!(sends.load(Ordering::SeqCst), 1);
        assert!(!ctl.has_parked_artifact());
        Ok(())
    }

    #[test]
    fn busy_receiver_withholds_the_transfer() -> anyhow::Result<()> {
        for busy in [ReceiverStatus::Converting, ReceiverStatus::Transmitting] {
            let sends = Arc::new(AtomicUsize::new(0));
            let ctl = controller(
                FixedStatus::new(busy),
                CountingRelay::new(Arc::clone(&sends)),
            );

            let outcome = ctl.run_capture(blob())?;
            assert_eq!(outcome, CaptureOutcome::Held { receiver: busy });
            assert_eq!(sends.load(Ordering::SeqCst), 0, "transfer must not fire");
            assert!(ctl.has_parked_artifact());
        }
        Ok(())
    }

    #[test]
    fn unreachable_receiver_also_withholds() -> anyhow::Result<()> {
        let sends = Arc::new(AtomicUsize::new(0));
        let ctl = controller(
            FixedStatus::new(ReceiverStatus::Unreachable),
            CountingRelay::new(Arc::clone(&sends)),
        );

        let outcome = ctl.run_capture(blob())?;
        assert!(matches!(outcome, CaptureOutcome::Held { .. }));
        assert_eq!(sends.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn resend_succeeds_once_receiver_goes_idle() -> anyhow::Result<()> {
        let sends = Arc::new(AtomicUsize::new(0));
        let status = FixedStatus::new(ReceiverStatus::Transmitting);
        let ctl = controller(status.clone(), CountingRelay::new(Arc::clone(&sends)));

        assert!(matches!(
            ctl.run_capture(blob())?,
            CaptureOutcome::Held { .. }
        ));

        status.set(ReceiverStatus::Idle);
        assert_eq!(ctl.resend()?, CaptureOutcome::Transferred);
        assert_eq!(sends.load(Ordering::SeqCst), 1);

        // The parked artifact was consumed; nothing left to resend.
        let err = ctl.resend().unwrap_err();
        assert!(matches!(err, ControllerError::NothingToResend));
        Ok(())
    }

    #[test]
    fn failed_transfer_parks_the_artifact_for_retry() -> anyhow::Result<()> {
        let sends = Arc::new(AtomicUsize::new(0));
        let relay = CountingRelay::new(Arc::clone(&sends));
        *relay.fail_with.lock().unwrap() = Some(TransferError::Timeout);

        let ctl = controller(FixedStatus::new(ReceiverStatus::Idle), relay);

        let err = ctl.run_capture(blob()).unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Transfer(TransferError::Timeout)
        ));
        assert!(ctl.has_parked_artifact());

        // Operator re-triggers after the receiver recovers.
        assert_eq!(ctl.resend()?, CaptureOutcome::Transferred);
        assert_eq!(sends.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn conversion_failure_stops_the_flow() {
        struct FailingBackend;

        impl TranscodeBackend for FailingBackend {
            fn kind(&self) -> BackendKind {
                BackendKind::Sandbox
            }

            fn convert(
                &self,
                _job: &ConversionJob,
                _blob: &CaptureBlob,
            ) -> Result<CanonicalArtifact, ConvertError> {
                Err(ConvertError::Execution("chain blew up".to_owned()))
            }
        }

        let sends = Arc::new(AtomicUsize::new(0));
        let ctl = Controller::new(
            TranscodeEngine::new(Box::new(FailingBackend)),
            FixedStatus::new(ReceiverStatus::Idle),
            Box::new(CountingRelay::new(Arc::clone(&sends))),
        );

        let err = ctl.run_capture(blob()).unwrap_err();
        assert!(matches!(err, ControllerError::Convert(_)));
        assert_eq!(sends.load(Ordering::SeqCst), 0, "no transfer on failure");
        assert!(!ctl.has_parked_artifact());
    }
}
