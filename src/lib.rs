//! `wavebridge` — capture transcoding and status-gated handoff.
//!
//! This crate provides:
//! - A fixed transcoding chain (decode → loudness-normalize → downmix →
//!   resample → s16le) that reduces any capture to one canonical PCM shape
//! - Two interchangeable execution backends for that chain (subprocess and
//!   in-process sandboxed)
//! - Scoped temporary-artifact storage with guaranteed cleanup
//! - A background status coordinator tracking the remote receiver's readiness
//! - A controller that gates artifact handoff on that readiness
//!
//! The library is designed to be used by both CLI tools and long-running
//! services, with an emphasis on deterministic output and no surprises under
//! failure.

// Core data model.
pub mod artifact;
pub mod blob;
pub mod job;

// Transcode engine and its two backends.
pub mod backends;
pub mod engine;

// Filter-chain stages used by the sandboxed backend.
pub mod loudness;
pub mod media;
pub mod pipeline;

// Temporary-artifact lifecycle.
pub mod store;

// Receiver coordination and handoff.
pub mod controller;
pub mod relay;
pub mod status;

// Error taxonomy shared across the crate.
pub mod error;

// Logging configuration and control.
#[cfg(feature = "logging")]
pub mod logging;

pub use artifact::CanonicalArtifact;
pub use blob::CaptureBlob;
pub use controller::{CaptureOutcome, Controller};
pub use engine::{BackendKind, TranscodeBackend, TranscodeEngine};
pub use error::{ControllerError, ConvertError, TransferError};
pub use status::{ReceiverStatus, StatusCoordinator};
