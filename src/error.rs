//! Error taxonomy for run orchestration.

use thiserror::Error;

/// Coarse classification used to decide recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Subscription failed. Recover by disconnect, rehydrate, reconnect.
    Transport,
    /// A REST call failed. The user may retry.
    Request,
    /// The run itself failed. Only a new run recovers.
    Application,
    /// A malformed event. Logged and ignored.
    Data,
    /// The caller violated a usage contract.
    Usage,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("event stream failed: {0}")]
    Transport(String),

    #[error("{0}")]
    Request(String),

    /// API answered with a non-success status.
    #[error("API error ({status}) from '{endpoint}': {message}")]
    Api {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("run failed: {0}")]
    Application(String),

    #[error("malformed event: {0}")]
    Data(String),

    #[error("a subscription for run '{run_id}' is already active; disconnect first")]
    AlreadySubscribed { run_id: String },

    #[error("approval '{0}' is already being resolved")]
    AlreadyResolving(String),

    #[error("no run is loaded")]
    NoActiveRun,

    #[error("edited arguments are required when approving with edits")]
    MissingEditedArguments,
}

impl RunError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Request(_) | Self::Api { .. } => ErrorKind::Request,
            Self::Application(_) => ErrorKind::Application,
            Self::Data(_) => ErrorKind::Data,
            Self::AlreadySubscribed { .. }
            | Self::AlreadyResolving(_)
            | Self::NoActiveRun
            | Self::MissingEditedArguments => ErrorKind::Usage,
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Request)
    }

    /// Whether this error belongs in the run-scoped error slot.
    pub fn is_run_scoped(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transport | ErrorKind::Request | ErrorKind::Application
        )
    }
}

pub type Result<T> = std::result::Result<T, RunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_drive_retry_and_slot_policy() {
        let transport = RunError::Transport("reset by peer".to_string());
        assert!(transport.is_retriable());
        assert!(transport.is_run_scoped());

        let api = RunError::Api {
            endpoint: "http://localhost/runs".to_string(),
            status: 502,
            message: "bad gateway".to_string(),
        };
        assert_eq!(api.kind(), ErrorKind::Request);
        assert!(api.is_retriable());

        let failed = RunError::Application("tool crashed".to_string());
        assert!(!failed.is_retriable());
        assert!(failed.is_run_scoped());

        let data = RunError::Data("missing id".to_string());
        assert!(!data.is_run_scoped());

        assert_eq!(RunError::NoActiveRun.kind(), ErrorKind::Usage);
    }
}
