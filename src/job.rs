//! Conversion job lifecycle.
//!
//! A [`ConversionJob`] tracks one transcode request from creation to a
//! terminal state. Transitions are driven only by the engine; everything else
//! just reads the id for logging and temp-storage namespacing.

use uuid::Uuid;

use crate::engine::BackendKind;

/// Status of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// One transcode request: a unique id, the backend that will run it, and the
/// current status.
#[derive(Debug)]
pub struct ConversionJob {
    id: Uuid,
    backend: BackendKind,
    status: JobStatus,
}

impl ConversionJob {
    pub fn new(backend: BackendKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            backend,
            status: JobStatus::Pending,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub(crate) fn start(&mut self) {
        debug_assert_eq!(self.status, JobStatus::Pending);
        self.status = JobStatus::Running;
    }

    pub(crate) fn succeed(&mut self) {
        debug_assert_eq!(self.status, JobStatus::Running);
        self.status = JobStatus::Succeeded;
    }

    pub(crate) fn fail(&mut self) {
        self.status = JobStatus::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_get_unique_ids() {
        let a = ConversionJob::new(BackendKind::Sandbox);
        let b = ConversionJob::new(BackendKind::Sandbox);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn lifecycle_reaches_terminal_states() {
        let mut job = ConversionJob::new(BackendKind::Process);
        assert_eq!(job.status(), JobStatus::Pending);
        job.start();
        assert_eq!(job.status(), JobStatus::Running);
        job.succeed();
        assert!(job.status().is_terminal());

        let mut job = ConversionJob::new(BackendKind::Process);
        job.start();
        job.fail();
        assert!(job.status().is_terminal());
    }
}
