pub mod conditions;
pub mod error;
pub mod executor;
pub mod facts;
pub mod progress;
pub mod state;

pub use conditions::*;
pub use error::*;
pub use executor::*;
pub use facts::*;
pub use progress::*;
pub use state::*;
