//! Handing the canonical artifact to the receiver.
//!
//! The receiver's ingest endpoint accepts a multipart POST with a single
//! `audio` field. [`ArtifactRelay`] is the seam the controller talks to;
//! [`HttpRelay`] is the real transport. Every send honors a caller-supplied
//! timeout and reports it as [`TransferError::Timeout`] instead of hanging.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::multipart;
use tracing::info;

use crate::artifact::CanonicalArtifact;
use crate::error::TransferError;

/// Field name the receiver expects in the multipart body.
const AUDIO_FIELD: &str = "audio";

/// Filename attached to the uploaded artifact part.
const ARTIFACT_FILENAME: &str = "output.raw";

/// Transport seam for delivering an artifact to the receiver.
pub trait ArtifactRelay: Send + Sync {
    fn send(&self, artifact: &CanonicalArtifact) -> Result<(), TransferError>;
}

/// Multipart HTTP delivery to the receiver's ingest endpoint.
pub struct HttpRelay {
    client: reqwest::blocking::Client,
    ingest_url: String,
}

impl HttpRelay {
    pub fn new(ingest_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build transfer client")?;
        Ok(Self {
            client,
            ingest_url: ingest_url.into(),
        })
    }
}

impl ArtifactRelay for HttpRelay {
    fn send(&self, artifact: &CanonicalArtifact) -> Result<(), TransferError> {
        let part = multipart::Part::bytes(artifact.bytes().to_vec())
            .file_name(ARTIFACT_FILENAME)
            .mime_str("application/octet-stream")
            .map_err(|e| TransferError::Unreachable(format!("invalid multipart body: {e}")))?;
        let form = multipart::Form::new().part(AUDIO_FIELD, part);

        let response = self
            .client
            .post(&self.ingest_url)
            .multipart(form)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    TransferError::Timeout
                } else {
                    TransferError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Rejected {
                status: status.as_u16(),
            });
        }

        info!(
            bytes = artifact.len(),
            url = %self.ingest_url,
            "artifact transferred to receiver"
        );
        Ok(())
    }
}
