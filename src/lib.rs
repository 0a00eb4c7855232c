pub mod action;
mod config;
mod constants;
pub mod containers;
pub mod discovery;
mod errors;
pub mod hook;
pub mod metrics;
pub mod service;
pub mod store;
pub mod utils;

pub use config::*;
pub use errors::*;
pub use service::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
