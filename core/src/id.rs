use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of an instruction result, type, function, block or
/// debug-info node. Ids are dense and never reused within one program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub u32);

impl Id {
    /// Id 0 is never a valid result.
    pub const NONE: Id = Id(0);

    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl From<u32> for Id {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// Dense Id-keyed arena. Slots are only ever added or overwritten while the
/// map is being populated; lookups never allocate.
#[derive(Debug, Clone, PartialEq)]
pub struct IdMap<V> {
    slots: Vec<Option<V>>,
    len: usize,
}

impl<V> Default for IdMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> IdMap<V> {
    pub const fn new() -> Self {
        Self { slots: Vec::new(), len: 0 }
    }

    pub fn with_bound(bound: u32) -> Self {
        let mut slots = Vec::with_capacity(bound as usize);
        slots.resize_with(bound as usize, || None);
        Self { slots, len: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, id: Id) -> Option<&V> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    #[inline]
    pub fn get_mut(&mut self, id: Id) -> Option<&mut V> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    #[inline]
    pub fn contains(&self, id: Id) -> bool {
        self.get(id).is_some()
    }

    /// Insert or overwrite, returning the previous value.
    pub fn insert(&mut self, id: Id, value: V) -> Option<V> {
        let idx = id.index();
        if idx >= self.slots.len() {
            self.slots.resize_with(idx + 1, || None);
        }
        let prev = self.slots[idx].replace(value);
        if prev.is_none() {
            self.len += 1;
        }
        prev
    }

    pub fn remove(&mut self, id: Id) -> Option<V> {
        let prev = self.slots.get_mut(id.index()).and_then(Option::take);
        if prev.is_some() {
            self.len -= 1;
        }
        prev
    }

    pub fn get_or_insert_with(&mut self, id: Id, f: impl FnOnce() -> V) -> &mut V {
        if !self.contains(id) {
            self.insert(id, f());
        }
        let idx = id.index();
        match self.slots[idx].as_mut() {
            Some(v) => v,
            None => unreachable!("slot populated above"),
        }
    }

    /// Iterate populated slots in ascending Id order.
    pub fn iter(&self) -> impl Iterator<Item = (Id, &V)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (Id(i as u32), v)))
    }

    pub fn ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.iter().map(|(id, _)| id)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.slots.iter().filter_map(Option::as_ref)
    }
}

impl<V> FromIterator<(Id, V)> for IdMap<V> {
    fn from_iter<T: IntoIterator<Item = (Id, V)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (id, v) in iter {
            map.insert(id, v);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_map_insert_overwrite_remove() {
        let mut map = IdMap::new();
        assert!(map.insert(Id(5), "a").is_none());
        assert_eq!(map.insert(Id(5), "b"), Some("a"));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(Id(5)), Some(&"b"));
        assert!(map.get(Id(4)).is_none());
        assert!(map.get(Id(500)).is_none());
        assert_eq!(map.remove(Id(5)), Some("b"));
        assert!(map.is_empty());
    }

    #[test]
    fn test_id_map_iterates_in_id_order() {
        let map: IdMap<u32> = [(Id(9), 9), (Id(2), 2), (Id(4), 4)].into_iter().collect();
        let ids: Vec<Id> = map.ids().collect();
        assert_eq!(ids, vec![Id(2), Id(4), Id(9)]);
    }

    #[test]
    fn test_id_display() {
        assert_eq!(Id(17).to_string(), "%17");
    }
}
