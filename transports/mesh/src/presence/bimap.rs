//! One-to-one map indexed from both sides

use std::collections::HashMap;
use std::hash::Hash;

/// Bidirectional one-to-one map
///
/// Every left value is paired with exactly one right value and vice versa.
/// Inserting a pair evicts any existing pair that shares either side.
#[derive(Debug, Clone)]
pub struct BiMap<L, R> {
    forward: HashMap<L, R>,
    backward: HashMap<R, L>,
}

impl<L, R> Default for BiMap<L, R> {
    fn default() -> Self {
        Self {
            forward: HashMap::new(),
            backward: HashMap::new(),
        }
    }
}

impl<L, R> BiMap<L, R>
where
    L: Eq + Hash + Clone,
    R: Eq + Hash + Clone,
{
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair `left` with `right`
    ///
    /// Returns the pairs that were evicted to keep the mapping one-to-one.
    pub fn insert(&mut self, left: L, right: R) -> Vec<(L, R)> {
        let mut evicted = Vec::new();

        if let Some(old_right) = self.forward.remove(&left) {
            self.backward.remove(&old_right);
            if old_right != right {
                evicted.push((left.clone(), old_right));
            }
        }
        if let Some(old_left) = self.backward.remove(&right) {
            self.forward.remove(&old_left);
            evicted.push((old_left, right.clone()));
        }

        self.forward.insert(left.clone(), right.clone());
        self.backward.insert(right, left);
        evicted
    }

    /// Right value paired with `left`
    pub fn get_by_left(&self, left: &L) -> Option<&R> {
        self.forward.get(left)
    }

    /// Left value paired with `right`
    pub fn get_by_right(&self, right: &R) -> Option<&L> {
        self.backward.get(right)
    }

    /// Remove the pair containing `left`
    pub fn remove_by_left(&mut self, left: &L) -> Option<R> {
        let right = self.forward.remove(left)?;
        self.backward.remove(&right);
        Some(right)
    }

    /// Remove the pair containing `right`
    pub fn remove_by_right(&mut self, right: &R) -> Option<L> {
        let left = self.backward.remove(right)?;
        self.forward.remove(&left);
        Some(left)
    }

    /// Number of pairs
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Whether the map holds no pairs
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Iterate over every pair
    pub fn iter(&self) -> impl Iterator<Item = (&L, &R)> {
        self.forward.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_both_ways() {
        let mut map = BiMap::new();
        map.insert("peer-1", "alice");

        assert_eq!(map.get_by_left(&"peer-1"), Some(&"alice"));
        assert_eq!(map.get_by_right(&"alice"), Some(&"peer-1"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_insert_evicts_conflicting_pairs() {
        let mut map = BiMap::new();
        map.insert("peer-1", "alice");
        map.insert("peer-2", "bob");

        // peer-1 takes bob's name: both old pairs go away
        let mut evicted = map.insert("peer-1", "bob");
        evicted.sort();
        assert_eq!(evicted, vec![("peer-1", "alice"), ("peer-2", "bob")]);

        assert_eq!(map.len(), 1);
        assert_eq!(map.get_by_right(&"alice"), None);
        assert_eq!(map.get_by_left(&"peer-2"), None);
        assert_eq!(map.get_by_right(&"bob"), Some(&"peer-1"));
    }

    #[test]
    fn test_reinsert_same_pair_evicts_nothing() {
        let mut map = BiMap::new();
        map.insert(1, 'a');
        assert!(map.insert(1, 'a').is_empty());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_remove_keeps_sides_in_sync() {
        let mut map = BiMap::new();
        map.insert(1, 'a');
        map.insert(2, 'b');

        assert_eq!(map.remove_by_left(&1), Some('a'));
        assert_eq!(map.get_by_right(&'a'), None);

        assert_eq!(map.remove_by_right(&'b'), Some(2));
        assert_eq!(map.get_by_left(&2), None);
        assert!(map.is_empty());
    }
}
