use leptos::prelude::*;
use std::collections::HashMap;

/// Cache key of the participant directory listing.
pub const PARTICIPANTS_KEY: &str = "participants";

/// Invalidation counters, one per logical resource name. A key that was never invalidated is
/// at generation 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generations {
    counters: HashMap<String, u64>,
}

impl Generations {
    pub fn get(&self, key: &str) -> u64 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    /// Bumps the key's generation and returns the new value.
    pub fn bump(&mut self, key: &str) -> u64 {
        let counter = self.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }
}

/// Handle to the query cache. Created once at the root and handed to the views that need it.
///
/// Resources read [`QueryCache::watch`] in their source, so [`QueryCache::invalidate`] on the
/// same key makes them refetch.
#[derive(Debug, Clone, Copy)]
pub struct QueryCache {
    generations: RwSignal<Generations>,
}

impl QueryCache {
    pub fn new() -> Self {
        QueryCache {
            generations: RwSignal::new(Generations::default()),
        }
    }

    /// A reactive view of the key's generation. Only changes to this key notify it.
    pub fn watch(&self, key: &'static str) -> Memo<u64> {
        let generations = self.generations;
        Memo::new(move |_| generations.with(|g| g.get(key)))
    }

    pub fn invalidate(&self, key: &str) {
        self.generations.update(|g| {
            g.bump(key);
        });
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}
