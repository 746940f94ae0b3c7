use bytemuck::Pod;

/// Remembers the state last bound to the current encoder, so redundant binds can be skipped.
///
/// Recreate or [`StateTracker::invalidate`] it for every new command encoder: bindings do
/// not survive across encoders.
#[derive(Debug, Clone)]
pub struct StateTracker<K: Pod> {
    current: K,
    dirty: bool,
}

impl<K: Pod> Default for StateTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Pod> StateTracker<K> {
    pub fn new() -> Self {
        Self {
            current: K::zeroed(),
            dirty: true,
        }
    }

    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    pub fn update(&mut self, key: K) {
        if bytemuck::bytes_of(&key) != bytemuck::bytes_of(&self.current) {
            self.current = key;
            self.dirty = true;
        }
    }

    /// One-shot: returns whether a bind is needed and clears the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    pub fn current(&self) -> &K {
        &self.current
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}
