//! Crate-wide error type for mcrouted.

use thiserror::Error;

/// Errors that can occur while configuring or running the multicast routing daemon.
#[derive(Error, Debug)]
pub enum Error {
    /// The calling process lacks CAP_NET_ADMIN (or is not root).
    #[error("permission denied: {0}")]
    Permission(String),

    /// A wire-format buffer or `/proc` line was shorter or otherwise inconsistent
    /// with the format it was expected to hold.
    #[error("malformed input: {0}")]
    Malformed(String),

    /// An interface, VIF, or MFC entry was referenced but does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A VIF or MFC entry already exists where a new one was being added.
    #[error("duplicate entry: {0}")]
    Duplicate(String),

    /// MRT_INIT was attempted on a socket that already holds the routing table.
    #[error("multicast routing already enabled")]
    AlreadyEnabled,

    /// MRT_DONE was attempted on a socket that does not hold the routing table.
    #[error("multicast routing already disabled")]
    AlreadyDisabled,

    /// A `/proc/net/ip_mr_*` table is unavailable because no daemon holds MRT_INIT.
    #[error("kernel multicast routing table not available: {0}")]
    NotAvailable(String),

    /// A configuration or runtime value violates an invariant of the routing model
    /// (e.g. a ttls vector whose length does not match the current VIF count).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A setsockopt/ioctl call failed for a reason not covered by the other kinds.
    #[error("kernel error: {0}")]
    KernelError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("system call failed: {0}")]
    Errno(#[from] nix::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_display() {
        let err = Error::Permission("need CAP_NET_ADMIN".to_string());
        assert_eq!(err.to_string(), "permission denied: need CAP_NET_ADMIN");
    }

    #[test]
    fn test_malformed_display() {
        let err = Error::Malformed("ip header too short".to_string());
        assert_eq!(err.to_string(), "malformed input: ip header too short");
    }

    #[test]
    fn test_already_enabled_display() {
        assert_eq!(
            Error::AlreadyEnabled.to_string(),
            "multicast routing already enabled"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
