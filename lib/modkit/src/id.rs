// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};

/// What an application uses to tell kinds of module apart: usually a small
/// fieldless enum with `#[derive(Copy, Clone, Debug, PartialEq, Eq,
/// PartialOrd, Ord)]`.
pub trait Category: Copy + Ord + fmt::Debug + Send + Sync + 'static {}

impl<T: Copy + Ord + fmt::Debug + Send + Sync + 'static> Category for T {}

/// Unique identifier for a module (category + instance).
///
/// `name` is a human-readable label. It is carried along for diagnostics
/// only: equality, ordering and hashing look at `(category, instance)`
/// alone, so two modules that differ only in name collide in a registry.
#[derive(Copy, Clone, Debug)]
pub struct ModuleId<C> {
    pub category: C,
    pub instance: u8,
    pub name: &'static str,
}

impl<C> ModuleId<C> {
    pub const fn new(category: C, instance: u8, name: &'static str) -> Self {
        Self {
            category,
            instance,
            name,
        }
    }
}

impl<C: fmt::Debug> ModuleId<C> {
    /// Name given to the execution context of a task module with this id.
    pub fn task_name(&self) -> String {
        format!("module_{:?}_{}_task", self.category, self.instance)
    }
}

impl<C: PartialEq> PartialEq for ModuleId<C> {
    fn eq(&self, other: &Self) -> bool {
        self.category == other.category && self.instance == other.instance
    }
}

impl<C: Eq> Eq for ModuleId<C> {}

impl<C: Ord> PartialOrd for ModuleId<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C: Ord> Ord for ModuleId<C> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.category
            .cmp(&other.category)
            .then(self.instance.cmp(&other.instance))
    }
}

impl<C: Hash> Hash for ModuleId<C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.category.hash(state);
        self.instance.hash(state);
    }
}

impl<C: fmt::Debug> fmt::Display for ModuleId<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}/{})", self.name, self.category, self.instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    enum Kind {
        Sensor,
        Logger,
    }

    #[test]
    fn name_is_not_part_of_identity() {
        let a = ModuleId::new(Kind::Sensor, 0, "imu");
        let b = ModuleId::new(Kind::Sensor, 0, "accelerometer");
        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Equal);
    }

    #[test]
    fn orders_by_category_then_instance() {
        let mut ids = [
            ModuleId::new(Kind::Logger, 0, "log0"),
            ModuleId::new(Kind::Sensor, 2, "s2"),
            ModuleId::new(Kind::Sensor, 1, "s1"),
        ];
        ids.sort();
        let names: Vec<_> = ids.iter().map(|id| id.name).collect();
        assert_eq!(names, ["s1", "s2", "log0"]);
    }

    #[test]
    fn task_name_mentions_category_and_instance() {
        let id = ModuleId::new(Kind::Logger, 3, "log");
        assert_eq!(id.task_name(), "module_Logger_3_task");
        assert_eq!(id.to_string(), "log (Logger/3)");
    }
}
