mod align;
mod backend;
mod buffer;
mod config;
mod pools;

pub use align::*;
pub use backend::*;
pub use buffer::*;
pub use config::*;
pub use pools::*;

use smallvec::SmallVec;
pub type RVec<T> = SmallVec<[T; 4]>;

//https://github.com/sonos/tract/blob/main/data/src/macros.rs#L2
#[macro_export]
macro_rules! rvec {
    (@one $x:expr) => (1usize);
    ($elem:expr; $n:expr) => ({
        $crate::RVec::from_elem($elem, $n)
    });
    ($($x:expr),*$(,)*) => ({
        let count = 0usize $(+ rvec![@one $x])*;
        #[allow(unused_mut)]
        let mut vec = $crate::RVec::new();
        if count <= vec.inline_size() {
            $(vec.push($x);)*
            vec
        } else {
            $crate::RVec::from_vec(vec![$($x,)*])
        }
    });
}

pub mod prelude {
    pub use crate::{
        rvec, BufferBackend, BufferUsage, PoolConfig, ResourcePool, StateCache, StateTracker,
        StreamingBuffer,
    };
}
