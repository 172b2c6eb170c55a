// Consistent exit codes for the fieldsync CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/argument error
//   11 = permission denied
//   13 = network error

use std::fmt;
use std::process;

use fieldsync_client::config::ConfigError;
use fieldsync_client::{ErrorCategory, SessionError, StoreError};
use fieldsync_common::path::PathError;

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    Auth = 11,
    Network = 13,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(ConnectFailed(category)) = cause.downcast_ref::<ConnectFailed>() {
                return Self::from_category(*category);
            }
            if cause.is::<PathError>() || cause.is::<ConfigError>() {
                return Self::Usage;
            }
            if let Some(StoreError::ReadOnly) = cause.downcast_ref::<StoreError>() {
                return Self::Auth;
            }
            if let Some(SessionError::Store(StoreError::ReadOnly)) =
                cause.downcast_ref::<SessionError>()
            {
                return Self::Auth;
            }
            if cause.is::<tokio::time::error::Elapsed>() {
                return Self::Network;
            }
        }
        Self::Error
    }

    pub fn from_category(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::PermissionDenied => Self::Auth,
            ErrorCategory::HandshakeFailed
            | ErrorCategory::ServerRestarting
            | ErrorCategory::ConnectionLost => Self::Network,
            ErrorCategory::Generic => Self::Error,
        }
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}

/// The session closed before the document snapshot arrived.
#[derive(Debug)]
pub struct ConnectFailed(pub ErrorCategory);

impl fmt::Display for ConnectFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.message())
    }
}

impl std::error::Error for ConnectFailed {}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn exit_code_values() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::Error.code(), 1);
        assert_eq!(ExitCode::Usage.code(), 2);
        assert_eq!(ExitCode::Auth.code(), 11);
        assert_eq!(ExitCode::Network.code(), 13);
    }

    #[test]
    fn connect_failure_in_chain() {
        let err: anyhow::Error = Err::<(), _>(ConnectFailed(ErrorCategory::PermissionDenied))
            .context("cannot open `api/reports/1`")
            .unwrap_err();
        assert_eq!(ExitCode::from_error(&err), ExitCode::Auth);

        let lost = anyhow::Error::new(ConnectFailed(ErrorCategory::ConnectionLost));
        assert_eq!(ExitCode::from_error(&lost), ExitCode::Network);
    }

    #[test]
    fn bad_path_is_usage_error() {
        let parse = fieldsync_common::path::FieldPath::parse("a..b").unwrap_err();
        assert_eq!(ExitCode::from_error(&anyhow::Error::new(parse)), ExitCode::Usage);
    }

    #[test]
    fn read_only_store_is_auth_error() {
        let err = anyhow::Error::new(SessionError::Store(StoreError::ReadOnly));
        assert_eq!(ExitCode::from_error(&err), ExitCode::Auth);
    }

    #[test]
    fn from_error_generic_is_error() {
        let err = anyhow::anyhow!("something went wrong");
        assert_eq!(ExitCode::from_error(&err), ExitCode::Error);
    }
}
