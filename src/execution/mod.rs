pub mod error;
pub mod parser;
pub mod plan;

pub use error::*;
pub use parser::*;
pub use plan::*;
