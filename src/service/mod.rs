//! Reconciliation service: hook registries per container, kept in step with
//! container lifecycle, store and service changes.

mod builder;
mod dispatcher;
mod registries;
pub use builder::*;
pub use dispatcher::*;
pub use registries::*;
