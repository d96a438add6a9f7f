use crate::{math::Bijection, Element};

/// Assigns dense ids `0, 1, 2, ...` to opaque objects in the order in which they are
/// first registered. Ids are never reused and never change, the table only grows.
///
/// The same type backs the letter table of a [`crate::NestedAlphabet`] and the state
/// table of every [`crate::Nwa`], so lookups always go through one bijection instead
/// of ad-hoc maps spread over helper objects.
#[derive(Clone)]
pub struct Indexer<T: Element> {
    table: Bijection<usize, T>,
}

impl<T: Element> Default for Indexer<T> {
    fn default() -> Self {
        Self {
            table: Bijection::new(),
        }
    }
}

impl<T: Element> Indexer<T> {
    /// Creates an empty indexer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `object`. Returns its id together with a flag that is `true` iff the
    /// object was not known before. Registering a known object is a no-op.
    pub fn register(&mut self, object: T) -> (usize, bool) {
        if let Some(&id) = self.table.get_by_right(&object) {
            return (id, false);
        }
        let id = self.table.len();
        self.table.insert(id, object);
        (id, true)
    }

    /// Returns the id of `object` if it was registered.
    pub fn id_of(&self, object: &T) -> Option<usize> {
        self.table.get_by_right(object).copied()
    }

    /// Returns the object with the given `id`.
    pub fn get(&self, id: usize) -> Option<&T> {
        self.table.get_by_left(&id)
    }

    /// Number of registered objects.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// `true` iff nothing was registered.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Iterates over `(id, object)` in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> + '_ {
        (0..self.len()).filter_map(|id| self.get(id).map(|t| (id, t)))
    }
}

impl<T: Element> std::fmt::Debug for Indexer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Indexer;

    #[test]
    fn registration_is_idempotent() {
        let mut idx = Indexer::new();
        assert_eq!(idx.register("a"), (0, true));
        assert_eq!(idx.register("b"), (1, true));
        assert_eq!(idx.register("a"), (0, false));
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.get(1), Some(&"b"));
        assert_eq!(idx.id_of(&"c"), None);
        assert_eq!(idx.iter().map(|(i, s)| (i, *s)).collect::<Vec<_>>(), vec![(0, "a"), (1, "b")]);
    }
}
