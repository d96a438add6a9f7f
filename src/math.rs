use std::{collections::BTreeSet, hash::Hash};

/// Type alias for sets, we use this to hide which type of `HashSet` we are actually using.
pub type Set<S> = fxhash::FxHashSet<S>;
/// Type alias for maps, we use this to hide which type of `HashMap` we are actually using.
pub type Map<K, V> = fxhash::FxHashMap<K, V>;

/// Represents a bijective mapping between `L` and `R`, that is a mapping which associates
/// each `L` with precisely one `R` and vice versa.
pub type Bijection<L, R> = bimap::BiHashMap<L, R>;

/// A partition groups elements of type `I` into disjoint classes. Classes are kept
/// sorted by their minimal element, which makes the class index of an element
/// deterministic.
#[derive(Debug, Clone)]
pub struct Partition<I: Hash + Eq>(Vec<BTreeSet<I>>);

impl<I: Hash + Eq> std::ops::Deref for Partition<I> {
    type Target = Vec<BTreeSet<I>>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'a, I: Hash + Eq> IntoIterator for &'a Partition<I> {
    type Item = &'a BTreeSet<I>;
    type IntoIter = std::slice::Iter<'a, BTreeSet<I>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<I: Hash + Eq> PartialEq for Partition<I> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|o| other.contains(o))
    }
}
impl<I: Hash + Eq> Eq for Partition<I> {}

impl<I: Hash + Eq + Ord> Partition<I> {
    /// Returns the size of the partition, i.e. the number of classes.
    pub fn size(&self) -> usize {
        self.0.len()
    }

    /// Builds a new partition from an iterator that yields iterators
    /// which yield elements of type `I`. Empty classes are dropped.
    pub fn new<X: IntoIterator<Item = I>, Y: IntoIterator<Item = X>>(iter: Y) -> Self {
        let mut classes: Vec<BTreeSet<I>> = iter
            .into_iter()
            .map(|it| it.into_iter().collect::<BTreeSet<_>>())
            .filter(|class| !class.is_empty())
            .collect();
        classes.sort_by(|x, y| x.first().cmp(&y.first()));
        Self(classes)
    }

    /// Tries to find the index of the class containing `element`.
    pub fn class_of(&self, element: &I) -> Option<usize> {
        self.0.iter().position(|class| class.contains(element))
    }

    /// `true` iff `left` and `right` lie in the same class.
    pub fn same_class(&self, left: &I, right: &I) -> bool {
        self.class_of(left)
            .is_some_and(|c| self.0[c].contains(right))
    }
}

impl Partition<usize> {
    /// The partition of `0..size` into singletons.
    pub fn discrete(size: usize) -> Self {
        Self((0..size).map(|i| BTreeSet::from([i])).collect())
    }

    /// The partition of `0..size` induced by the equivalence closure of `pairs`.
    pub fn from_pairs(size: usize, pairs: impl IntoIterator<Item = (usize, usize)>) -> Self {
        let mut parent: Vec<usize> = (0..size).collect();
        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }
        for (a, b) in pairs {
            let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
            if ra != rb {
                parent[ra.max(rb)] = ra.min(rb);
            }
        }
        let mut classes: Map<usize, BTreeSet<usize>> = Map::default();
        for x in 0..size {
            let root = find(&mut parent, x);
            classes.entry(root).or_default().insert(x);
        }
        Self::new(classes.into_values())
    }

    /// Maps every element of `0..size` to the index of its class. Elements that are not
    /// covered by the partition are mapped to `None`.
    pub fn class_map(&self, size: usize) -> Vec<Option<usize>> {
        let mut out = vec![None; size];
        for (i, class) in self.0.iter().enumerate() {
            for &x in class {
                if x < size {
                    out[x] = Some(i);
                }
            }
        }
        out
    }
}

impl<I: Hash + Eq + Ord> From<Vec<BTreeSet<I>>> for Partition<I> {
    fn from(value: Vec<BTreeSet<I>>) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::Partition;

    #[test]
    fn partition_from_pairs() {
        let p = Partition::from_pairs(6, [(0, 3), (3, 5), (1, 2)]);
        assert_eq!(p, Partition::new([vec![0, 3, 5], vec![1, 2], vec![4]]));
        assert!(p.same_class(&0, &5));
        assert!(!p.same_class(&0, &4));
        assert_eq!(p.class_map(6), vec![Some(0), Some(1), Some(1), Some(0), Some(2), Some(0)]);
    }
}
