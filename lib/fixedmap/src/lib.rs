// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed map
//!
//! A sorted map of at most `N` entries, with keys of type `K` and values of
//! type `V`, stored inline. Entries are kept ordered by key so that lookups
//! are a binary search. The map never grows: inserting into a full map fails
//! and hands the value back to the caller, and inserting an existing key
//! fails rather than overwriting it.

#![cfg_attr(not(test), no_std)]

use heapless::Vec;

/// Why an insertion was refused. The rejected value is returned alongside.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InsertError {
    /// An entry with an equal key is already present.
    Occupied,
    /// All `N` slots are in use.
    Full,
}

///
/// A fixed-size map of size `N`, mapping keys of type `K` to values of
/// type `V`.
///
#[derive(Debug)]
pub struct FixedMap<K, V, const N: usize> {
    contents: Vec<(K, V), N>,
}

impl<K, V, const N: usize> Default for FixedMap<K, V, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, const N: usize> FixedMap<K, V, N> {
    /// Creates an empty map; usable in `static` initializers.
    pub const fn new() -> Self {
        Self {
            contents: Vec::new(),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.contents.len() == N
    }

    /// Iterates over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.contents.iter().map(|(k, v)| (k, v))
    }

    /// Keeps only the entries for which `keep` returns true, preserving
    /// order.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) {
        let mut i = 0;
        while i < self.contents.len() {
            let (k, v) = &self.contents[i];
            if keep(k, v) {
                i += 1;
            } else {
                self.contents[i..].rotate_left(1);
                self.contents.pop();
            }
        }
    }
}

impl<K: Ord, V, const N: usize> FixedMap<K, V, N> {
    fn search(&self, key: &K) -> Result<usize, usize> {
        self.contents.binary_search_by(|(k, _)| k.cmp(key))
    }

    ///
    /// Gets the value that corresponds to `key`, returning `None` if no
    /// such key is in the map.
    ///
    pub fn get(&self, key: &K) -> Option<&V> {
        let i = self.search(key).ok()?;
        Some(&self.contents[i].1)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.search(key).is_ok()
    }

    ///
    /// Inserts `value` under `key`, keeping entries sorted. Fails if the key
    /// is already present or the map is full; in both cases the map is
    /// unchanged and `value` is handed back.
    ///
    pub fn insert(&mut self, key: K, value: V) -> Result<(), (InsertError, V)> {
        let at = match self.search(&key) {
            Ok(_) => return Err((InsertError::Occupied, value)),
            Err(at) => at,
        };
        if let Err((_, value)) = self.contents.push((key, value)) {
            return Err((InsertError::Full, value));
        }
        self.contents[at..].rotate_right(1);
        Ok(())
    }

    ///
    /// Removes the specified key from the map, returning its value.
    ///
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let at = self.search(key).ok()?;
        self.contents[at..].rotate_left(1);
        self.contents.pop().map(|(_, v)| v)
    }
}
