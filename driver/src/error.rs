//! Driver errors and their ABI result codes.

use sgdma_kernel::KernelError;

/// Scatter/gather DMA error.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaError {
    #[error("Scatter Gather is disabled in HW.")]
    Capability,
    #[error("Timed out waiting on the engine.")]
    Timeout,
    #[error("DMA memory allocation or mapping failed.")]
    Allocation,
    #[error("Channel is busy.")]
    Busy,
    #[error("All buffers are claimed by software.")]
    Claimed,
    #[error("No completed transfer to acquire.")]
    Incomplete,
    #[error("Protocol error: {0}")]
    Protocol(&'static str),
    #[error("Engine error (DMASR 0x{0:08x})")]
    Hardware(u32),
}

/// Numeric result codes reported across the adapter boundary.
///
/// Non-negative values returned by acquire are ring handles.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok = 0,
    NoScatterGather = -1,
    Timeout = -2,
    Hardware = -3,
    AllocationError = -5,
    Claimed = -6,
    Incomplete = -7,
    Busy = -16,
    ProtocolError = -22,
}

impl DmaError {
    /// Result code for this error.
    pub fn code(&self) -> ResultCode {
        match self {
            Self::Capability => ResultCode::NoScatterGather,
            Self::Timeout => ResultCode::Timeout,
            Self::Allocation => ResultCode::AllocationError,
            Self::Busy => ResultCode::Busy,
            Self::Claimed => ResultCode::Claimed,
            Self::Incomplete => ResultCode::Incomplete,
            Self::Protocol(_) => ResultCode::ProtocolError,
            Self::Hardware(_) => ResultCode::Hardware,
        }
    }
}

impl From<KernelError> for DmaError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::Busy => Self::Busy,
            KernelError::NoMemory => Self::Allocation,
            KernelError::InvalidArgument => Self::Protocol("request rejected"),
            KernelError::NoDevice => Self::Protocol("no such engine"),
            KernelError::NotBound => Self::Protocol("channel not bound"),
        }
    }
}

/// Collapse a result into its code, handles passing through.
pub fn to_code(result: Result<usize>) -> i32 {
    match result {
        Ok(handle) => handle as i32,
        Err(e) => e.code() as i32,
    }
}

/// Result type for driver operations.
pub type Result<T> = core::result::Result<T, DmaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(DmaError::Capability.code() as i32, -1);
        assert_eq!(DmaError::Timeout.code() as i32, -2);
        assert_eq!(DmaError::Allocation.code() as i32, -5);
        assert_eq!(DmaError::Claimed.code() as i32, -6);
        assert_eq!(DmaError::Incomplete.code() as i32, -7);
        assert_eq!(DmaError::Busy.code() as i32, -16);
        assert_eq!(DmaError::Protocol("x").code() as i32, -22);
        assert_eq!(ResultCode::Ok as i32, 0);
    }

    #[test]
    fn test_to_code_passes_handles() {
        assert_eq!(to_code(Ok(3)), 3);
        assert_eq!(to_code(Err(DmaError::Claimed)), -6);
    }

    #[test]
    fn test_kernel_error_mapping() {
        assert_eq!(DmaError::from(KernelError::Busy), DmaError::Busy);
        assert_eq!(DmaError::from(KernelError::NoMemory), DmaError::Allocation);
        assert_eq!(
            DmaError::from(KernelError::InvalidArgument).code(),
            ResultCode::ProtocolError
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(
            DmaError::Hardware(0x10).to_string(),
            "Engine error (DMASR 0x00000010)"
        );
    }
}
