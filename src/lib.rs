//! Rustle Converge - idempotent host bootstrap and configuration convergence
//!
//! Loads an inventory of hosts and an ordered task graph, then drives every
//! host to the declared state over SSH. Each task checks the current state
//! before acting, so repeated runs against a converged fleet change nothing.

pub mod cli;
pub mod config;
pub mod execution;
pub mod inventory;
pub mod modules;
pub mod runtime;
pub mod secrets;
pub mod transport;
pub mod types;

pub use config::RunConfig;
pub use execution::{TaskGraph, TaskGraphParser};
pub use inventory::{InventoryProcessor, ResolvedInventory};
pub use modules::ModuleRegistry;
pub use runtime::{ConvergenceExecutor, RunSummary};
pub use types::*;
