pub mod batch;
pub mod bundle;
pub mod checks;
pub mod config;
pub mod coordination;
pub mod engine;
pub mod error;
pub mod executor;
pub mod fetch;
pub mod helper;
pub mod io;
pub mod loader;
pub mod locator;
pub mod manifest;
pub mod paths;
pub mod registry;
pub mod rule;
pub mod schema;
pub mod service;

#[cfg(test)]
mod test_support;

pub use error::{Result, VlibError};
pub use service::ValidationService;
