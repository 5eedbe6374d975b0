use std::{fmt, io};

use aws_sdk_ec2::error::SdkError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Backing errors for all provisioning operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing, unreadable or malformed local input
    /// (spec file, state file, boot script).
    #[error("invalid configuration: {message}")]
    Config { message: String },
    #[error("failed API: {message}")]
    API { message: String, is_retryable: bool },
    #[error("failed for other reasons: {message}")]
    Other { message: String },
}

impl Error {
    /// Returns the error message in "String".
    #[inline]
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Error::Config { message } | Error::API { message, .. } | Error::Other { message } => {
                message.clone()
            }
        }
    }

    /// Returns if the error is retryable.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::API { is_retryable, .. } => *is_retryable,
            Error::Config { .. } | Error::Other { .. } => false,
        }
    }

    /// Returns true if the error was caused by local input.
    #[inline]
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config { .. })
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Other {
            message: e.to_string(),
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        let kind = match e {
            Error::Config { .. } => io::ErrorKind::InvalidInput,
            Error::API { .. } | Error::Other { .. } => io::ErrorKind::Other,
        };
        io::Error::new(kind, e.to_string())
    }
}

pub fn config(message: impl Into<String>) -> Error {
    Error::Config {
        message: message.into(),
    }
}

/// Wraps an SDK failure of the named operation.
pub fn api<E, R>(op: &str, e: SdkError<E, R>) -> Error
where
    E: fmt::Debug,
    R: fmt::Debug,
{
    let is_retryable = is_error_retryable(&e);
    Error::API {
        message: format!("failed {} {:?}", op, e),
        is_retryable,
    }
}

#[inline]
pub fn is_error_retryable<E, R>(e: &SdkError<E, R>) -> bool {
    match e {
        SdkError::TimeoutError(_) | SdkError::ResponseError { .. } => true,
        SdkError::DispatchFailure(e) => e.is_timeout() || e.is_io(),
        _ => false,
    }
}

#[test]
fn test_error_kinds() {
    let e = config("state file 'x' is missing required key 'sg_id'");
    assert!(e.is_config());
    assert!(!e.is_retryable());
    assert!(e.message().contains("sg_id"));

    let io_err: io::Error = e.into();
    assert_eq!(io_err.kind(), io::ErrorKind::InvalidInput);

    let e = Error::API {
        message: String::from("failed create_vpc"),
        is_retryable: true,
    };
    assert!(!e.is_config());
    assert!(e.is_retryable());
    assert_eq!(e.to_string(), "failed API: failed create_vpc");
}
