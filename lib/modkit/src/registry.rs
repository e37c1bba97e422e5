// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Process-wide directory of modules.
//!
//! A [`Registry`] maps each [`ModuleId`] to a weak reference to the module
//! that registered under it. It never keeps a module alive: once the last
//! `Arc` to a module goes away, `find` stops returning it, and the slot it
//! occupied is reclaimed the next time something registers.
//!
//! Capacity is fixed by `N`. `Registry::new` is `const`, so the usual way to
//! get a single registry for a whole application is a `static`:
//!
//! ```
//! # use modkit::Registry;
//! # #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
//! # enum Kind { Led }
//! static REGISTRY: Registry<Kind> = Registry::new();
//! assert_eq!(REGISTRY.count(), 0);
//! ```

use std::sync::{Arc, Weak};

use fixedmap::{FixedMap, InsertError};
use parking_lot::Mutex;
use ringbuf::{ringbuf, ringbuf_entry};

use crate::id::{Category, ModuleId};
use crate::module::Module;

/// Number of entries in a registry unless the application says otherwise.
pub const MAX_MODULES: usize = 8;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegistryError {
    /// A live module is already registered under this id.
    Duplicate,
    /// Every slot is taken by a live module.
    Full,
    NotFound,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Registered { instance: u8, count: usize },
    Unregistered { instance: u8 },
    Duplicate { instance: u8 },
    Full,
    Reclaimed(usize),
}

ringbuf!(Trace, 16, Trace::None);

type Entries<C, const N: usize> = FixedMap<ModuleId<C>, Weak<dyn Module<C>>, N>;

pub struct Registry<C, const N: usize = MAX_MODULES> {
    entries: Mutex<Entries<C, N>>,
}

impl<C: Category, const N: usize> Default for Registry<C, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Category, const N: usize> Registry<C, N> {
    pub const fn new() -> Self {
        Self {
            entries: parking_lot::const_mutex(FixedMap::new()),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Makes `module` findable under its id for as long as the returned
    /// guard lives (or until it is dropped, whichever comes first).
    pub fn register<M>(
        &self,
        module: &Arc<M>,
    ) -> Result<Registration<'_, C, N>, RegistryError>
    where
        M: Module<C> + 'static,
    {
        let id = module.id();
        let weak: Weak<M> = Arc::downgrade(module);
        let weak: Weak<dyn Module<C>> = weak;

        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, w| w.strong_count() > 0);
        if entries.len() != before {
            ringbuf_entry!(Trace::Reclaimed(before - entries.len()));
        }

        match entries.insert(id, weak.clone()) {
            Ok(()) => {
                ringbuf_entry!(Trace::Registered {
                    instance: id.instance,
                    count: entries.len(),
                });
                Ok(Registration {
                    registry: self,
                    id,
                    module: Some(weak),
                })
            }
            Err((InsertError::Occupied, _)) => {
                ringbuf_entry!(Trace::Duplicate {
                    instance: id.instance
                });
                Err(RegistryError::Duplicate)
            }
            Err((InsertError::Full, _)) => {
                ringbuf_entry!(Trace::Full);
                Err(RegistryError::Full)
            }
        }
    }

    /// Removes whatever is registered under `id`, live or not.
    pub fn unregister(&self, id: ModuleId<C>) -> Result<(), RegistryError> {
        let removed = self.entries.lock().remove(&id);
        match removed {
            Some(_) => {
                ringbuf_entry!(Trace::Unregistered {
                    instance: id.instance
                });
                Ok(())
            }
            None => Err(RegistryError::NotFound),
        }
    }

    pub fn find(&self, id: ModuleId<C>) -> Option<Arc<dyn Module<C>>> {
        let weak = self.entries.lock().get(&id)?.clone();
        weak.upgrade()
    }

    /// Number of registered modules that are still alive.
    pub fn count(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|(_, w)| w.strong_count() > 0)
            .count()
    }

    /// Ids of the registered modules that are still alive, in id order.
    pub fn ids(&self) -> heapless::Vec<ModuleId<C>, N> {
        let entries = self.entries.lock();
        let mut ids = heapless::Vec::new();
        for (id, w) in entries.iter() {
            if w.strong_count() > 0 {
                // At most N entries exist, so this can't overflow.
                let _ = ids.push(*id);
            }
        }
        ids
    }

    /// Drops the entry for `id` only if it still refers to `module`.
    fn release(&self, id: ModuleId<C>, module: &Weak<dyn Module<C>>) {
        let mut entries = self.entries.lock();
        let ours = entries
            .get(&id)
            .is_some_and(|current| Weak::ptr_eq(current, module));
        if ours {
            entries.remove(&id);
            ringbuf_entry!(Trace::Unregistered {
                instance: id.instance
            });
        }
    }
}

/// Keeps a module registered. Dropping it unregisters the module, unless
/// the entry has since been replaced by someone else's.
#[must_use = "dropping a Registration unregisters the module"]
pub struct Registration<'r, C: Category, const N: usize> {
    registry: &'r Registry<C, N>,
    id: ModuleId<C>,
    module: Option<Weak<dyn Module<C>>>,
}

impl<C: Category, const N: usize> Registration<'_, C, N> {
    pub fn id(&self) -> ModuleId<C> {
        self.id
    }

    /// Leaves the module registered after this guard is gone. The entry
    /// still goes stale when the module itself is dropped.
    pub fn detach(mut self) {
        self.module = None;
    }
}

impl<C: Category, const N: usize> Drop for Registration<'_, C, N> {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            self.registry.release(self.id, &module);
        }
    }
}
