//! The indexed task graph.
//!
//! A [`Graph`] maps identifiers to [`Task`]s and keeps two side indexes in
//! step with every mutation:
//!
//! * the *unsorted* index recovers the exact key a task was stored under from
//!   any spelling of its dimensions, and
//! * the *full* index maps a name and tag to the key with the most
//!   dimensions stored under them, so a bare name can be expanded.
//!
//! [`Graph::infer`] builds on both and is the one resolution path the
//! [`Computer`](crate::Computer) uses for lookups.

use std::collections::HashMap;

use crate::key::{Key, KeyLike};
use crate::task::Task;

/// Reserved entry holding the configuration tree.
pub const CONFIG: &str = "config";

#[derive(Clone, Default)]
pub struct Graph {
    tasks: HashMap<KeyLike, Task>,
    unsorted: HashMap<KeyLike, KeyLike>,
    full: HashMap<Key, Key>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &KeyLike> {
        self.tasks.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KeyLike, &Task)> {
        self.tasks.iter()
    }

    pub fn get(&self, key: &KeyLike) -> Option<&Task> {
        self.tasks.get(key)
    }

    /// The stored key together with its task.
    pub fn lookup(&self, key: &KeyLike) -> Option<(&KeyLike, &Task)> {
        self.tasks.get_key_value(key)
    }

    /// Stores `task` at `key`, replacing and returning any task stored under
    /// the same key, whatever the order of its dimensions.
    pub fn insert(&mut self, key: KeyLike, task: Task) -> Option<Task> {
        let old = self.remove(&key);
        self.index(&key);
        self.tasks.insert(key, task);
        old
    }

    /// Removes the task at `key`. Removing an absent key is a no-op.
    pub fn remove(&mut self, key: &KeyLike) -> Option<Task> {
        let (stored, task) = self.tasks.remove_entry(key)?;
        self.deindex(&stored);
        Some(task)
    }

    /// Inserts every pair in order.
    pub fn update<I>(&mut self, items: I)
    where
        I: IntoIterator<Item = (KeyLike, Task)>,
    {
        let items: Vec<_> = items.into_iter().collect();
        for (key, task) in items {
            self.insert(key, task);
        }
    }

    /// Whether `key` is stored, with its dimensions in any order.
    pub fn contains(&self, key: &KeyLike) -> bool {
        self.tasks.contains_key(key) || self.unsorted.contains_key(&key.sorted())
    }

    /// The key `key` was stored under, with its stored dimension order.
    pub fn unsorted_key(&self, key: &KeyLike) -> Option<&KeyLike> {
        self.unsorted.get(&key.sorted())
    }

    /// The stored key with the most dimensions that shares the name and tag
    /// of `key`.
    pub fn full_key(&self, key: &KeyLike) -> Option<&Key> {
        self.full.get(&key.nodim())
    }

    /// Resolves `key` to a stored key.
    ///
    /// Keys without dimensions expand to their full form. If `dims` is not
    /// empty, every other dimension is dropped from the result. A bare name
    /// that matches no structured key is returned as given.
    pub fn infer<S: AsRef<str>>(&self, key: &KeyLike, dims: &[S]) -> KeyLike {
        let mut result = Some(self.unsorted_key(key).unwrap_or(key).clone());

        if key.dims().is_empty() {
            result = result
                .as_ref()
                .and_then(|candidate| self.full_key(candidate))
                .cloned()
                .map(KeyLike::Key);
        }

        let Some(KeyLike::Key(found)) = result else {
            return result.unwrap_or_else(|| key.clone());
        };

        if dims.is_empty() {
            return KeyLike::Key(found);
        }

        let extra: Vec<&String> = found
            .dims()
            .iter()
            .filter(|dim| !dims.iter().any(|keep| keep.as_ref() == dim.as_str()))
            .collect();

        KeyLike::from(found.drop(&extra))
    }

    fn index(&mut self, key: &KeyLike) {
        self.unsorted.insert(key.sorted(), key.clone());

        if let KeyLike::Key(key) = key {
            let nodim = key.drop_all();
            let current = self.full.get(&nodim).map_or(0, |full| full.dims().len());
            if key.dims().len() >= current {
                self.full.insert(nodim, key.clone());
            }
        }
    }

    fn deindex(&mut self, key: &KeyLike) {
        self.unsorted.remove(&key.sorted());

        let KeyLike::Key(key) = key else {
            return;
        };

        let nodim = key.drop_all();
        if self.full.get(&nodim) != Some(key) {
            return;
        }

        let next = self
            .tasks
            .keys()
            .filter_map(KeyLike::as_key)
            .filter(|other| other.drop_all() == nodim)
            .min_by(|a, b| b.dims().len().cmp(&a.dims().len()).then_with(|| a.cmp(b)))
            .cloned();

        match next {
            Some(next) => self.full.insert(nodim, next),
            None => self.full.remove(&nodim),
        };
    }
}
