mod resource_pool;
mod state_cache;
mod state_keys;
mod state_tracker;

pub use resource_pool::*;
pub use state_cache::*;
pub use state_keys::*;
pub use state_tracker::*;
