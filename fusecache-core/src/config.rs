use crate::{bail, lookup::DEFAULT_CAPACITY, Result};

/// Knobs of a [`crate::FusionCache`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of live signatures in the interning table.
    pub capacity: usize,
    /// Record an executor log on every launch.
    pub profiling: bool,
    /// Ask the backend to accept cached parameters again on every shortcut hit.
    pub revalidate_shortcuts: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            profiling: false,
            revalidate_shortcuts: true,
        }
    }
}

impl CacheConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_profiling(mut self, profiling: bool) -> Self {
        self.profiling = profiling;
        self
    }

    pub fn with_revalidate_shortcuts(mut self, revalidate: bool) -> Self {
        self.revalidate_shortcuts = revalidate;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            bail!("signature table capacity must be at least 1");
        }
        Ok(())
    }
}
