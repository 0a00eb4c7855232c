//! Config hook declarations extracted from container environments.

mod declaration;
mod parser;
mod registry;
pub use declaration::*;
pub use parser::*;
pub use registry::*;
