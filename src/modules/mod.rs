//! Idempotent convergence modules: a read-only check plus a mutating apply

pub mod arguments;
pub mod core;
pub mod error;
pub mod interface;
pub mod registry;
pub mod system;

// Re-export commonly used types
pub use arguments::{ArgReference, ArgumentResolver};
pub use error::*;
pub use interface::*;
pub use registry::ModuleRegistry;
