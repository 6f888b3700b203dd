use kwcache_shared::{ErrorClass, ErrorEnvelope, ErrorKind};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Ok = 0,
    Internal = 1,
    InvalidInput = 2,
    Io = 3,
    Unavailable = 4,
}

impl ExitCode {
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Exit code for a failure reported by the library crates.
    #[must_use]
    pub fn for_envelope(error: &ErrorEnvelope) -> Self {
        match (error.kind, error.class) {
            (ErrorKind::Expected, _) => Self::InvalidInput,
            (ErrorKind::Invariant, _) => Self::Internal,
            (ErrorKind::Unexpected, ErrorClass::Retriable) => Self::Unavailable,
            (ErrorKind::Unexpected, ErrorClass::NonRetriable) => {
                if error.code.namespace() == "store" || error.code.code() == "io" {
                    Self::Io
                } else {
                    Self::Internal
                }
            },
        }
    }
}

#[derive(Debug)]
pub enum CliError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
}

impl CliError {
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self {
            Self::Io(_) => ExitCode::Io,
            Self::Serialization(_) => ExitCode::Internal,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(error) => write!(formatter, "io error: {error}"),
            Self::Serialization(error) => write!(formatter, "serialization error: {error}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<std::io::Error> for CliError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kwcache_shared::ErrorCode;

    #[test]
    fn envelopes_map_to_exit_codes() {
        let expected = ErrorEnvelope::expected(ErrorCode::invalid_input(), "bad");
        assert_eq!(ExitCode::for_envelope(&expected), ExitCode::InvalidInput);

        let invariant = ErrorEnvelope::invariant(ErrorCode::new("store", "closed"), "closed");
        assert_eq!(ExitCode::for_envelope(&invariant), ExitCode::Internal);

        let storage = ErrorEnvelope::unexpected(
            ErrorCode::new("store", "storage"),
            "disk full",
            ErrorClass::NonRetriable,
        );
        assert_eq!(ExitCode::for_envelope(&storage), ExitCode::Io);

        let busy = ErrorEnvelope::unexpected(
            ErrorCode::dependency_unavailable(),
            "overloaded",
            ErrorClass::Retriable,
        );
        assert_eq!(ExitCode::for_envelope(&busy), ExitCode::Unavailable);
    }
}
