pub mod error;
pub mod graph;
pub mod loader;
pub mod processor;
pub mod validator;
pub mod variables;

pub use error::*;
pub use graph::*;
pub use loader::*;
pub use processor::*;
pub use validator::*;
pub use variables::*;
