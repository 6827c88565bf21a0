// The flat error taxonomy shared by every public entry point.
//
// Mirrors the `DisplayError` enum in `original_source/displayengine/include/core/sde_types.h`:
// callers across the boundary see one stable set of variants regardless of
// which subsystem raised them.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SdeError>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdeError {
    #[error("undefined")]
    Undefined,
    #[error("operation not supported")]
    NotSupported,
    #[error("version mismatch")]
    Version,
    #[error("data alignment error")]
    DataAlignment,
    #[error("instruction set error")]
    InstructionSet,
    #[error("invalid parameters")]
    Parameters,
    #[error("invalid file descriptor")]
    FileDescriptor,
    #[error("out of memory")]
    Memory,
    #[error("insufficient hardware resources")]
    Resources,
    #[error("hardware rejected the request")]
    Hardware,
    #[error("operation timed out")]
    TimeOut,
    #[error("device is shutting down")]
    ShutDown,
    #[error("operation not permitted in current state")]
    Permission,
}
