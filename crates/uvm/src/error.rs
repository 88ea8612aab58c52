use core::fmt;

/// Errors surfaced by address-space operations and fault resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// The call was malformed, such as an unknown fault kind or a region that collides
    /// with the user stack.
    InvalidArgument,
    /// The address is null or not contained in any region.
    BadAddress,
    /// A write was attempted against a read-only mapping.
    ProtectionViolation,
    /// A physical frame or metadata allocation failed.
    OutOfMemory,
    /// The source address space of a copy has nothing loaded into it.
    NotLoaded,
}

impl VmError {
    /// Returns the kernel errno value this error is reported to user space as.
    pub const fn errno(self) -> i32 {
        const ENOMEM: i32 = 3;
        const EFAULT: i32 = 6;
        const EINVAL: i32 = 8;

        match self {
            VmError::InvalidArgument => EINVAL,
            VmError::BadAddress | VmError::ProtectionViolation | VmError::NotLoaded => EFAULT,
            VmError::OutOfMemory => ENOMEM,
        }
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            VmError::InvalidArgument => "invalid argument",
            VmError::BadAddress => "bad address",
            VmError::ProtectionViolation => "write to read-only page",
            VmError::OutOfMemory => "out of memory",
            VmError::NotLoaded => "address space not loaded",
        };
        f.write_str(message)
    }
}

impl core::error::Error for VmError {}

impl From<alloc::collections::TryReserveError> for VmError {
    fn from(_: alloc::collections::TryReserveError) -> Self {
        VmError::OutOfMemory
    }
}
