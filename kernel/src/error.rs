//! Privileged-side errors.
//!
//! Every request handler returns one of these; `errno()` gives the value an
//! ioctl-style boundary would report.

/// Privileged-side error.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Stale sentinel, bad index or malformed request.
    #[error("Invalid argument or stale sentinel")]
    InvalidArgument,
    /// Allocation already live for this channel.
    #[error("Channel allocation already live")]
    Busy,
    /// Pool or caller address space exhausted.
    #[error("Coherent memory exhausted")]
    NoMemory,
    /// No engine registered at the requested index.
    #[error("No such DMA engine")]
    NoDevice,
    /// Connection has not been bound to an engine channel.
    #[error("Connection not bound to a channel")]
    NotBound,
}

impl KernelError {
    /// Positive errno value for this error.
    pub fn errno(&self) -> i32 {
        match self {
            Self::InvalidArgument => 22, // EINVAL
            Self::Busy => 16,            // EBUSY
            Self::NoMemory => 12,        // ENOMEM
            Self::NoDevice => 19,        // ENODEV
            Self::NotBound => 6,         // ENXIO
        }
    }
}

/// Result type for privileged-side requests.
pub type KernelResult<T> = Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_errno() {
        assert_eq!(KernelError::NoMemory.to_string(), "Coherent memory exhausted");
        assert_eq!(KernelError::Busy.errno(), 16);
        let err: Box<dyn std::error::Error> = Box::new(KernelError::NotBound);
        assert_eq!(err.to_string(), "Connection not bound to a channel");
    }
}
