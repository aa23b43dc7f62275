//! Error types for wmplib.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, protocol-layer, and
//! validation errors are all captured here.

/// The error type for all wmplib operations.
///
/// Variants cover the failure modes encountered when talking to a WMP
/// gateway: socket failures, malformed protocol lines, timeouts, commands
/// outside the advertised limits, and discovery misses.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (TCP socket, relay proxy, UDP discovery).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (malformed WMP line, unexpected handshake).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for the gateway.
    ///
    /// On the receive path this is the normal "no data yet" outcome of a
    /// bounded poll, not a failure.
    #[error("timeout waiting for gateway")]
    Timeout,

    /// The requested operation is not supported by this unit.
    ///
    /// Returned when a capability has no sensible value to step from, or
    /// when the gateway has advertised that a function does not exist.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// A command argument fell outside the unit's advertised limits.
    ///
    /// Raised before any network I/O takes place.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No connection to the gateway has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the gateway was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// Discovery or address resolution found no matching gateway.
    #[error("gateway not found: {0}")]
    NotFound(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_transport() {
        let e = Error::Transport("proxy refused CONN".into());
        assert_eq!(e.to_string(), "transport error: proxy refused CONN");
    }

    #[test]
    fn error_display_protocol() {
        let e = Error::Protocol("line has no type segment".into());
        assert_eq!(e.to_string(), "protocol error: line has no type segment");
    }

    #[test]
    fn error_display_invalid_parameter() {
        let e = Error::InvalidParameter("setpoint 50.0 outside 16.0..32.0".into());
        assert_eq!(
            e.to_string(),
            "invalid parameter: setpoint 50.0 outside 16.0..32.0"
        );
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
}
