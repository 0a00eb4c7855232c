pub mod async_task;
pub mod delivery;
pub mod net;

pub use delivery::*;
