pub mod package_managers;
