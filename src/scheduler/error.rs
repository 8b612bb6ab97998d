use thiserror::Error;

use crate::config::ConfigurationError;
use crate::export::PublishError;
use crate::normalize::InvalidSnapshot;
use crate::source::FetchError;

/// Errors returned by [`super::Scheduler::run`].
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("scheduler has been stopped and cannot be restarted")]
    Stopped,
}

/// A failed collect or flush iteration. Reported, never propagated.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Snapshot(#[from] InvalidSnapshot),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl CycleError {
    /// Error class name used in log lines and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "FetchError",
            Self::Snapshot(_) => "InvalidSnapshot",
            Self::Publish(_) => "PublishError",
        }
    }

    /// Whether this is a missing control socket.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Fetch(e) if e.is_not_found())
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(CycleError::from(FetchError::EmptyBody).kind(), "FetchError");
        assert_eq!(CycleError::from(InvalidSnapshot::Null).kind(), "InvalidSnapshot");
        assert_eq!(
            CycleError::from(PublishError::Status { status: 500 }).kind(),
            "PublishError"
        );
    }

    #[test]
    fn test_message_is_transparent() {
        let err = CycleError::from(InvalidSnapshot::Null);
        assert_eq!(err.to_string(), "stats cannot be null");
    }

    #[test]
    fn test_only_missing_socket_is_not_found() {
        let not_found = CycleError::from(FetchError::NotFound {
            path: PathBuf::from("/tmp/puma.sock"),
            source: io::Error::from(io::ErrorKind::NotFound),
        });
        assert!(not_found.is_not_found());

        let refused = CycleError::from(FetchError::Io(io::Error::from(
            io::ErrorKind::ConnectionRefused,
        )));
        assert!(!refused.is_not_found());
        assert!(!CycleError::from(InvalidSnapshot::Null).is_not_found());
    }

    #[test]
    fn test_configuration_error_passes_through() {
        let err = SchedulerError::from(ConfigurationError::MissingControlUrl);
        assert!(err.to_string().contains("control.url"));
    }
}
