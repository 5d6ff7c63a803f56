//! Failure-injection seam.
//!
//! The injector is constructor-injected rather than a process-wide debug
//! switch, so the engine stays deterministic and the retry machinery can be
//! exercised without touching the environment.

/// Hook consulted before every stream read.
pub trait FaultInjector: Send + Sync {
    /// Called with the absolute byte offset the next read would start at.
    /// Returning an error aborts the attempt as a stream failure.
    fn before_read(&self, offset: u64) -> std::io::Result<()>;
}

/// Production injector: never fails.
pub struct NoFaults;

impl FaultInjector for NoFaults {
    fn before_read(&self, _offset: u64) -> std::io::Result<()> {
        Ok(())
    }
}
