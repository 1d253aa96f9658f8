//! Core convergence modules

pub mod authorized_key;
pub mod bootstrap;
pub mod command;
pub mod file;
pub mod package;
pub mod user;

pub use authorized_key::AuthorizedKeyModule;
pub use bootstrap::BootstrapModule;
pub use command::CommandModule;
pub use file::FileModule;
pub use package::PackageModule;
pub use user::UserModule;
