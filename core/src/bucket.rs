use std::collections::HashMap;

/// An ordered name-keyed collection where inserting an existing name
/// shadows the previous value instead of replacing it.
///
/// The most recently inserted value of a name is its primary. Popping the
/// primary makes the shadowed value visible again.
#[derive(Debug, Clone)]
pub struct Bucket<V> {
    index: HashMap<String, usize>,
    entries: Vec<Entry<V>>,
}

#[derive(Debug, Clone)]
struct Entry<V> {
    name: String,
    values: Vec<V>,
}

impl<V> Default for Bucket<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Bucket<V> {
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }

    /// Adds `value` under `name`. Returns true if an older value is now
    /// shadowed.
    pub fn insert(&mut self, name: impl Into<String>, value: V) -> bool {
        let name = name.into();
        match self.index.get(&name).copied() {
            Some(i) => {
                self.entries[i].values.push(value);
                true
            }
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push(Entry {
                    name,
                    values: vec![value],
                });
                false
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&V> {
        self.index
            .get(name)
            .copied()
            .and_then(|i| self.entries[i].values.last())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut V> {
        self.index
            .get(name)
            .copied()
            .and_then(move |i| self.entries[i].values.last_mut())
    }

    /// Every value stored under `name`, oldest first.
    pub fn get_all(&self, name: &str) -> &[V] {
        self.index
            .get(name)
            .map(|&i| self.entries[i].values.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Removes the primary value of `name`.
    pub fn pop(&mut self, name: &str) -> Option<V> {
        let i = self.index.get(name).copied()?;
        let value = self.entries[i].values.pop();
        if self.entries[i].values.is_empty() {
            self.remove_entry(i);
        }
        value
    }

    /// Removes every value stored under `name`.
    pub fn remove(&mut self, name: &str) -> Vec<V> {
        match self.index.get(name).copied() {
            Some(i) => self.remove_entry(i),
            None => Vec::new(),
        }
    }

    fn remove_entry(&mut self, i: usize) -> Vec<V> {
        let entry = self.entries.remove(i);
        self.index.remove(&entry.name);
        for idx in self.index.values_mut() {
            if *idx > i {
                *idx -= 1;
            }
        }
        entry.values
    }

    /// Empties the bucket, returning all values in order.
    pub fn drain(&mut self) -> Vec<V> {
        self.index.clear();
        self.entries.drain(..).flat_map(|e| e.values).collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Primary values in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().filter_map(|e| e.values.last())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.entries.iter_mut().filter_map(|e| e.values.last_mut())
    }

    /// Every value, shadowed ones included.
    pub fn iter_all(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().flat_map(|e| e.values.iter())
    }

    pub fn first(&self) -> Option<&V> {
        self.iter().next()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
