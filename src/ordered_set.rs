//! Insertion-ordered set with O(1) membership.
//!
//! Relationship membership (`members`, `canonicalMembers`) and the
//! per-record reverse index of record arrays are all built on this.

use std::collections::HashSet;
use std::hash::Hash;

/// An insertion-ordered collection of unique values.
#[derive(Clone, Debug)]
pub struct OrderedSet<T> {
    list: Vec<T>,
    presence: HashSet<T>,
}

impl<T: Clone + Eq + Hash> OrderedSet<T> {
    pub fn new() -> Self {
        Self {
            list: Vec::new(),
            presence: HashSet::new(),
        }
    }

    /// Append `value` unless already present. Returns true if inserted.
    pub fn add(&mut self, value: T) -> bool {
        if !self.presence.insert(value.clone()) {
            return false;
        }
        self.list.push(value);
        true
    }

    /// Insert `value` at `idx` (clamped to the length) unless already present.
    pub fn add_with_index(&mut self, value: T, idx: Option<usize>) -> bool {
        match idx {
            None => self.add(value),
            Some(idx) => {
                if !self.presence.insert(value.clone()) {
                    return false;
                }
                let idx = idx.min(self.list.len());
                self.list.insert(idx, value);
                true
            }
        }
    }

    /// Remove `value`. Returns true if it was present.
    pub fn delete(&mut self, value: &T) -> bool {
        if !self.presence.remove(value) {
            return false;
        }
        if let Some(pos) = self.list.iter().position(|v| v == value) {
            self.list.remove(pos);
        }
        true
    }

    pub fn has(&self, value: &T) -> bool {
        self.presence.contains(value)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn clear(&mut self) {
        self.list.clear();
        self.presence.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.list.iter()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.list.clone()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.list
    }

    pub fn index_of(&self, value: &T) -> Option<usize> {
        if !self.has(value) {
            return None;
        }
        self.list.iter().position(|v| v == value)
    }
}

impl<T: Clone + Eq + Hash> Default for OrderedSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Eq + Hash> FromIterator<T> for OrderedSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = OrderedSet::new();
        for value in iter {
            set.add(value);
        }
        set
    }
}

impl<'a, T: Clone + Eq + Hash> IntoIterator for &'a OrderedSet<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.list.iter()
    }
}

impl<T: Clone + Eq + Hash> PartialEq for OrderedSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.list == other.list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_preserves_order_and_uniqueness() {
        let mut set = OrderedSet::new();
        assert!(set.add("a"));
        assert!(set.add("b"));
        assert!(!set.add("a"));
        assert_eq!(set.to_vec(), vec!["a", "b"]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_add_with_index() {
        let mut set: OrderedSet<u32> = [1, 2, 3].into_iter().collect();
        assert!(set.add_with_index(9, Some(1)));
        assert_eq!(set.to_vec(), vec![1, 9, 2, 3]);
        assert!(set.add_with_index(10, Some(100)));
        assert_eq!(set.to_vec(), vec![1, 9, 2, 3, 10]);
        assert!(!set.add_with_index(2, Some(0)));
    }

    #[test]
    fn test_delete() {
        let mut set: OrderedSet<u32> = [1, 2, 3].into_iter().collect();
        assert!(set.delete(&2));
        assert!(!set.delete(&2));
        assert!(!set.has(&2));
        assert_eq!(set.to_vec(), vec![1, 3]);
        assert_eq!(set.index_of(&3), Some(1));
        assert_eq!(set.index_of(&2), None);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut a: OrderedSet<u32> = [1, 2].into_iter().collect();
        let b = a.clone();
        a.add(3);
        assert_eq!(b.to_vec(), vec![1, 2]);
        assert_ne!(a, b);
    }
}
