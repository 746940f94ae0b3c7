mod binder;
mod streaming_buffer;

pub use binder::*;
pub use streaming_buffer::*;
