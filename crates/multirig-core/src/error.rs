//! Error types for MultiRig.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. The variants follow the failure taxonomy
//! of the rig control plane: transport I/O, wire protocol, rig-reported
//! `RPRT` codes, band policy, deadlines, and queue pressure.

/// The error type for all MultiRig operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A transport-level failure: socket read/write error, connect refused,
    /// EOF, or a dead `rigctl` subprocess. Recovered by reconnecting.
    #[error("I/O error: {0}")]
    Io(String),

    /// A wire-protocol failure: malformed or missing `RPRT`, an unparseable
    /// value line. The connection is kept open.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The rig answered with a negative `RPRT` code.
    #[error("{code} {}", rprt_message(*code))]
    Rig {
        /// The Hamlib error code (always negative).
        code: i32,
        /// Long name of the command that produced the error.
        command: String,
    },

    /// Client-side band policy rejection. No traffic reaches the rig.
    #[error("Frequency out of configured band ranges")]
    Band,

    /// Deadline exceeded for an in-flight command.
    #[error("timeout waiting for response")]
    Timeout,

    /// The command queue is full; the operation was not enqueued.
    #[error("command queue full")]
    Busy,

    /// No connection to the rig is currently established.
    #[error("not connected")]
    NotConnected,

    /// The connection has been shut down and accepts no further commands.
    #[error("connection closed")]
    Closed,

    /// The rig is administratively disabled and not accepting commands.
    #[error("rig disabled")]
    Disabled,

    /// A configuration value failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether this error indicates a broken or suspect transport. Three of
    /// these in a row on the poll path mark a rig disconnected.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::NotConnected | Error::Closed | Error::Timeout
        )
    }

    /// Map this error to the `RPRT` code the rigctl listener reports for it.
    pub fn rprt_code(&self) -> i32 {
        match self {
            Error::Rig { code, .. } => *code,
            Error::Timeout => -5,
            Error::Io(_) | Error::NotConnected | Error::Closed => -6,
            Error::Protocol(_) => -8,
            Error::Band | Error::Disabled => -9,
            Error::InvalidConfig(_) => -1,
            Error::Busy => -13,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// The Hamlib message for an `RPRT` return code.
///
/// Codes are matched numerically, never by message text; this table only
/// renders them for snapshots and logs.
pub fn rprt_message(code: i32) -> &'static str {
    match code {
        0 => "Command completed successfully",
        -1 => "Invalid parameter",
        -2 => "Invalid configuration",
        -3 => "Memory shortage",
        -4 => "Feature not implemented",
        -5 => "Communication timed out",
        -6 => "IO error",
        -7 => "Internal Hamlib error",
        -8 => "Protocol error",
        -9 => "Command rejected by the rig",
        -10 => "Command performed, but arg truncated",
        -11 => "Feature not available",
        -12 => "Target VFO unaccessible",
        -13 => "Communication bus error",
        -14 => "Communication bus collision",
        -15 => "Invalid rig handle",
        -16 => "Invalid VFO",
        -17 => "Argument out of domain",
        -18 => "Function deprecated",
        -19 => "Security error",
        -20 => "Rig is not powered on",
        _ => "Unknown error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rig_error_display_includes_code_and_message() {
        let e = Error::Rig {
            code: -11,
            command: "get_level".into(),
        };
        assert_eq!(e.to_string(), "-11 Feature not available");
    }

    #[test]
    fn band_error_message_is_stable() {
        assert_eq!(
            Error::Band.to_string(),
            "Frequency out of configured band ranges"
        );
    }

    #[test]
    fn io_classification() {
        assert!(Error::Io("broken pipe".into()).is_io());
        assert!(Error::Timeout.is_io());
        assert!(Error::NotConnected.is_io());
        assert!(!Error::Band.is_io());
        assert!(
            !Error::Rig {
                code: -9,
                command: String::new()
            }
            .is_io()
        );
    }

    #[test]
    fn rprt_code_mapping() {
        assert_eq!(
            Error::Rig {
                code: -11,
                command: String::new()
            }
            .rprt_code(),
            -11
        );
        assert_eq!(Error::Timeout.rprt_code(), -5);
        assert_eq!(Error::Io("x".into()).rprt_code(), -6);
        assert_eq!(Error::Protocol("x".into()).rprt_code(), -8);
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn unknown_rprt_code() {
        assert_eq!(rprt_message(-99), "Unknown error");
    }
}
