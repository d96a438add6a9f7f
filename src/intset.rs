use bit_set::BitSet;
use itertools::Itertools;

use crate::Show;

/// A mutable set of non-negative integers. It is the only set representation used for
/// state sets, place sets, atom sets and the like throughout the crate, which means
/// two operands of a binary operation always have the same representation.
///
/// Equality, hashing and ordering only depend on the members, never on the capacity
/// of the underlying bit vector.
#[derive(Clone, Default)]
pub struct IntSet(BitSet);

impl IntSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self(BitSet::new())
    }

    /// Creates an empty set that can hold values below `n` without reallocating.
    pub fn with_capacity(n: usize) -> Self {
        Self(BitSet::with_capacity(n))
    }

    /// Adds `i`, returns `true` if it was not present before.
    pub fn set(&mut self, i: usize) -> bool {
        self.0.insert(i)
    }

    /// Alias for [`IntSet::set`].
    pub fn insert(&mut self, i: usize) -> bool {
        self.set(i)
    }

    /// Removes `i`, returns `true` if it was present.
    pub fn clear(&mut self, i: usize) -> bool {
        self.0.remove(i)
    }

    /// Removes every member.
    pub fn clear_all(&mut self) {
        self.0.clear()
    }

    /// Membership test.
    pub fn get(&self, i: usize) -> bool {
        self.0.contains(i)
    }

    /// Alias for [`IntSet::get`].
    pub fn contains(&self, i: usize) -> bool {
        self.get(i)
    }

    /// In-place intersection.
    pub fn and(&mut self, other: &IntSet) -> &mut Self {
        self.0.intersect_with(&other.0);
        self
    }

    /// In-place union.
    pub fn or(&mut self, other: &IntSet) -> &mut Self {
        self.0.union_with(&other.0);
        self
    }

    /// In-place difference, removes every member of `other`.
    pub fn and_not(&mut self, other: &IntSet) -> &mut Self {
        self.0.difference_with(&other.0);
        self
    }

    /// Number of members.
    pub fn cardinality(&self) -> usize {
        self.0.len()
    }

    /// Alias for [`IntSet::cardinality`].
    pub fn len(&self) -> usize {
        self.cardinality()
    }

    /// `true` iff there are no members.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `true` iff every member of `self` is a member of `other`.
    pub fn subset_of(&self, other: &IntSet) -> bool {
        self.0.is_subset(&other.0)
    }

    /// `true` iff `self` and `other` share at least one member.
    pub fn intersects(&self, other: &IntSet) -> bool {
        !self.0.is_disjoint(&other.0)
    }

    /// Content equality, independent of the capacity of either set.
    pub fn content_eq(&self, other: &IntSet) -> bool {
        self.iter().eq(other.iter())
    }

    /// Iterates over the members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter()
    }

    /// Smallest member, if any.
    pub fn first(&self) -> Option<usize> {
        self.iter().next()
    }
}

impl PartialEq for IntSet {
    fn eq(&self, other: &Self) -> bool {
        self.content_eq(other)
    }
}

impl Eq for IntSet {}

impl std::hash::Hash for IntSet {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for i in self.iter() {
            i.hash(state);
        }
        self.cardinality().hash(state);
    }
}

impl PartialOrd for IntSet {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IntSet {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.iter().cmp(other.iter())
    }
}

impl FromIterator<usize> for IntSet {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<usize> for IntSet {
    fn extend<T: IntoIterator<Item = usize>>(&mut self, iter: T) {
        for i in iter {
            self.set(i);
        }
    }
}

impl std::fmt::Debug for IntSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.show())
    }
}

impl Show for IntSet {
    fn show(&self) -> String {
        format!("{{{}}}", self.iter().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::IntSet;

    fn sets() -> Vec<IntSet> {
        vec![
            IntSet::new(),
            IntSet::from_iter([0]),
            IntSet::from_iter([1, 3, 5, 64, 65]),
            IntSet::from_iter([0, 1, 2, 3]),
            IntSet::from_iter([200]),
            IntSet::from_iter(0..130),
        ]
    }

    #[test]
    fn algebra_laws() {
        for a in sets() {
            for b in sets() {
                let mut union = a.clone();
                union.or(&b);
                assert!(a.subset_of(&union));
                assert!(b.subset_of(&union));

                let mut meet = a.clone();
                meet.and(&b);
                assert!(meet.subset_of(&a));
                assert!(meet.subset_of(&b));

                let mut diff = a.clone();
                diff.and_not(&b);
                assert!(diff.subset_of(&a));
                assert!(!diff.intersects(&b));

                let mut empty = a.clone();
                empty.and_not(&a);
                assert!(empty.is_empty());
            }
        }
    }

    #[test]
    fn content_equality_ignores_capacity() {
        let mut large = IntSet::with_capacity(1024);
        large.set(7);
        large.set(900);
        large.clear(900);
        let small = IntSet::from_iter([7]);
        assert!(large.content_eq(&small));
        assert_eq!(large, small);

        let mut hasher_a = std::collections::hash_map::DefaultHasher::new();
        let mut hasher_b = std::collections::hash_map::DefaultHasher::new();
        std::hash::Hash::hash(&large, &mut hasher_a);
        std::hash::Hash::hash(&small, &mut hasher_b);
        assert_eq!(
            std::hash::Hasher::finish(&hasher_a),
            std::hash::Hasher::finish(&hasher_b)
        );
    }

    #[test]
    fn membership_and_cardinality() {
        let mut s = IntSet::new();
        assert!(s.set(3));
        assert!(!s.set(3));
        assert!(s.get(3));
        assert!(!s.get(4));
        s.set(70);
        assert_eq!(s.cardinality(), 2);
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![3, 70]);
        assert!(s.clear(3));
        assert_eq!(s.first(), Some(70));
    }
}
