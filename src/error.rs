//! # Gateway Error Taxonomy
//!
//! All fallible gateway operations return [`Result`] with a [`GatewayError`].
//! The taxonomy is intentionally coarse: transport adapters collapse their
//! platform errors into `IoFault`, worker management failures surface as
//! `ThreadError`, and hook construction reports `NoMemory`/`NoResource` so
//! the caller never registers a partially-constructed adapter.
//!
//! Programming errors (registry overflow, out-of-range identifiers, double
//! registration) are not part of the taxonomy: they halt the process with a
//! panic carrying file, line and condition.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Error taxonomy for pipeline and adapter operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A caller-supplied parameter is out of the accepted domain.
    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),

    /// An operation was attempted in a state that does not permit it.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// An identifier is outside its registry's slot range.
    #[error("invalid index: {0}")]
    InvalidIndex(usize),

    /// A transport-level I/O operation failed.
    ///
    /// Sources report this internally and present "no more bytes"; for sinks
    /// the dispatch loop logs it as a missed destination and continues.
    #[error("transport I/O fault: {0}")]
    IoFault(#[from] std::io::Error),

    /// Adapter state could not be allocated.
    #[error("out of memory constructing {0}")]
    NoMemory(&'static str),

    /// A required slot or system resource is unavailable.
    #[error("no resource available: {0}")]
    NoResource(&'static str),

    /// A worker thread could not be spawned or joined.
    #[error("worker thread error: {0}")]
    ThreadError(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    /// I/O errors convert into the IoFault variant via `?`.
    #[test]
    fn io_error_converts_to_io_fault() {
        fn inner() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer gone"))?;
            Ok(())
        }
        match inner() {
            Err(GatewayError::IoFault(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe);
            }
            other => panic!("expected IoFault, got {:?}", other),
        }
    }

    #[test]
    fn display_messages_name_the_fault() {
        assert_eq!(
            GatewayError::InvalidIndex(7).to_string(),
            "invalid index: 7"
        );
        assert!(GatewayError::ThreadError("udp worker")
            .to_string()
            .contains("udp worker"));
    }
}
