use crate::{ParentMap, Parents};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Something that can answer parent queries for a batch of keys.
///
/// Keys absent from the returned map are ghosts as far as the caller is
/// concerned.
pub trait ParentsProvider<K: PartialEq + Eq + Clone + Hash> {
    fn get_parent_map(&self, keys: &HashSet<K>) -> ParentMap<K>;
}

/// A provider backed by a plain map, mostly useful for tests and for
/// in-memory graphs the planner builds.
pub struct DictParentsProvider<K: Hash + Eq + Clone>(ParentMap<K>);

impl<K: Hash + Eq + Clone> DictParentsProvider<K> {
    pub fn new(parent_map: ParentMap<K>) -> Self {
        DictParentsProvider(parent_map)
    }
}

impl<K: Hash + Eq + Clone> From<ParentMap<K>> for DictParentsProvider<K> {
    fn from(parent_map: ParentMap<K>) -> Self {
        DictParentsProvider(parent_map)
    }
}

impl<K: Hash + Eq + Clone> From<HashMap<K, Vec<K>>> for DictParentsProvider<K> {
    fn from(parent_map: HashMap<K, Vec<K>>) -> Self {
        DictParentsProvider(ParentMap::from(parent_map))
    }
}

impl<K: Hash + Eq + Clone> ParentsProvider<K> for DictParentsProvider<K> {
    fn get_parent_map(&self, keys: &HashSet<K>) -> ParentMap<K> {
        let mut result = ParentMap::new();
        for key in keys {
            if let Some(parents) = self.0.get(key) {
                result.insert(key.clone(), parents.clone());
            }
        }
        result
    }
}

/// Ask several providers in turn, first answer wins.
pub struct StackedParentsProvider<K> {
    parent_providers: Vec<Box<dyn ParentsProvider<K>>>,
}

impl<K> StackedParentsProvider<K> {
    pub fn new(parent_providers: Vec<Box<dyn ParentsProvider<K>>>) -> Self {
        StackedParentsProvider { parent_providers }
    }
}

impl<K: Hash + Eq + Clone> ParentsProvider<K> for StackedParentsProvider<K> {
    fn get_parent_map(&self, keys: &HashSet<K>) -> ParentMap<K> {
        let mut found = ParentMap::new();
        let mut remaining = keys.clone();

        for parent_provider in self.parent_providers.iter() {
            if remaining.is_empty() {
                break;
            }
            let new_found = parent_provider.get_parent_map(&remaining);
            found.extend(new_found);
            remaining.retain(|k| !found.contains_key(k));
        }

        found
    }
}

impl<K: Hash + Eq + Clone, P: ParentsProvider<K> + ?Sized> ParentsProvider<K> for &P {
    fn get_parent_map(&self, keys: &HashSet<K>) -> ParentMap<K> {
        (**self).get_parent_map(keys)
    }
}
