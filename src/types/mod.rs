pub mod facts;
pub mod inventory;

pub use facts::*;
pub use inventory::*;
