use thiserror::Error;

/// Kernel error taxonomy.
///
/// Errors are returned up the call stack unmodified. A propagator that
/// receives an error from a child's solve skips that child and continues
/// with its siblings.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("internal error: {0}")]
    Internal(&'static str),
    #[error("file error: {0}")]
    File(String),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("out of memory")]
    Memory,
    #[error("bad parameter: {0}")]
    BadParameter(&'static str),
    #[error("bad state: {0}")]
    BadState(&'static str),
    #[error("call from a thread that does not own the object")]
    InterthreadCall,
    #[error("object was destroyed")]
    InvalidObject,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("object is not initialized")]
    NotInitialized,
    #[error("not implemented")]
    NotImplemented,
    #[error("invalid type: expected {0}")]
    InvalidType(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Solver answer to an object offered during initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The solver does not handle this object; poll the next one.
    Ignore,
    /// The solver binds itself to the object; no further solvers are
    /// polled.
    Claimed,
}
