use itertools::Itertools;

use crate::{indexer::Indexer, AutomataError, Element, LetterId, Result};

/// The three kinds of letters a nested word is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LetterKind {
    /// A plain letter that does not touch the call stack.
    Internal,
    /// Pushes the current state on the call stack.
    Call,
    /// Pops the hierarchical predecessor from the call stack.
    Return,
}

impl LetterKind {
    /// Lower-case name, used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            LetterKind::Internal => "internal",
            LetterKind::Call => "call",
            LetterKind::Return => "return",
        }
    }
}

/// An alphabet that is partitioned into internal, call and return letters at
/// construction time. Every letter gets a dense [`LetterId`] exactly once; internal
/// letters come first, then calls, then returns.
#[derive(Clone)]
pub struct NestedAlphabet<L: Element> {
    letters: Indexer<L>,
    kinds: Vec<LetterKind>,
}

impl<L: Element> NestedAlphabet<L> {
    /// Builds an alphabet from the three sub-alphabets. Fails if a letter is declared
    /// in two of them. Repeating a letter within one sub-alphabet is harmless.
    pub fn new(
        internal: impl IntoIterator<Item = L>,
        call: impl IntoIterator<Item = L>,
        ret: impl IntoIterator<Item = L>,
    ) -> Result<Self> {
        let mut letters = Indexer::new();
        let mut kinds = vec![];
        for (kind, iter) in [
            (LetterKind::Internal, internal.into_iter().collect_vec()),
            (LetterKind::Call, call.into_iter().collect_vec()),
            (LetterKind::Return, ret.into_iter().collect_vec()),
        ] {
            for letter in iter {
                let (id, fresh) = letters.register(letter.clone());
                if fresh {
                    kinds.push(kind);
                } else if kinds[id] != kind {
                    return Err(AutomataError::DuplicateLetter(format!("{letter:?}")));
                }
            }
        }
        Ok(Self { letters, kinds })
    }

    /// An alphabet without call and return letters, i.e. one for ordinary finite
    /// or Büchi automata.
    pub fn internal_only(internal: impl IntoIterator<Item = L>) -> Self {
        let mut letters = Indexer::new();
        for letter in internal {
            letters.register(letter);
        }
        let kinds = vec![LetterKind::Internal; letters.len()];
        Self { letters, kinds }
    }

    /// Number of letters over all three sub-alphabets.
    pub fn size(&self) -> usize {
        self.kinds.len()
    }

    /// `true` iff there are neither call nor return letters.
    pub fn is_flat(&self) -> bool {
        self.kinds.iter().all(|k| *k == LetterKind::Internal)
    }

    /// The id of `letter`, if it belongs to the alphabet.
    pub fn id_of(&self, letter: &L) -> Option<LetterId> {
        self.letters.id_of(letter)
    }

    /// The letter with the given id.
    pub fn letter(&self, id: LetterId) -> Option<&L> {
        self.letters.get(id)
    }

    /// The kind of the letter with the given id.
    pub fn kind(&self, id: LetterId) -> Option<LetterKind> {
        self.kinds.get(id).copied()
    }

    /// Looks up `letter` and ensures it has the `expected` kind.
    pub fn expect_kind(&self, letter: &L, expected: LetterKind) -> Result<LetterId> {
        let id = self
            .id_of(letter)
            .ok_or_else(|| AutomataError::UnknownLetter(format!("{letter:?}")))?;
        let actual = self.kinds[id];
        if actual != expected {
            return Err(AutomataError::WrongLetterKind {
                letter: format!("{letter:?}"),
                expected: expected.name(),
                actual: actual.name(),
            });
        }
        Ok(id)
    }

    /// Ids of all letters of the given kind in ascending order.
    pub fn ids_of_kind(&self, kind: LetterKind) -> impl Iterator<Item = LetterId> + '_ {
        self.kinds
            .iter()
            .enumerate()
            .filter(move |(_, k)| **k == kind)
            .map(|(i, _)| i)
    }

    /// Ids of the internal letters.
    pub fn internal_ids(&self) -> impl Iterator<Item = LetterId> + '_ {
        self.ids_of_kind(LetterKind::Internal)
    }

    /// Ids of the call letters.
    pub fn call_ids(&self) -> impl Iterator<Item = LetterId> + '_ {
        self.ids_of_kind(LetterKind::Call)
    }

    /// Ids of the return letters.
    pub fn return_ids(&self) -> impl Iterator<Item = LetterId> + '_ {
        self.ids_of_kind(LetterKind::Return)
    }

    /// All `(id, letter, kind)` triples in id order.
    pub fn iter(&self) -> impl Iterator<Item = (LetterId, &L, LetterKind)> + '_ {
        self.letters
            .iter()
            .map(|(id, letter)| (id, letter, self.kinds[id]))
    }

    /// `true` iff both alphabets contain the same letters with the same kinds.
    pub fn same_letters(&self, other: &NestedAlphabet<L>) -> bool {
        self.size() == other.size()
            && self
                .iter()
                .all(|(_, l, k)| other.id_of(l).and_then(|o| other.kind(o)) == Some(k))
    }
}

impl<L: Element> std::fmt::Debug for NestedAlphabet<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let part = |kind| {
            self.iter()
                .filter(|(_, _, k)| *k == kind)
                .map(|(_, l, _)| format!("{l:?}"))
                .join(", ")
        };
        write!(
            f,
            "internal {{{}}} call {{{}}} return {{{}}}",
            part(LetterKind::Internal),
            part(LetterKind::Call),
            part(LetterKind::Return)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_are_partitioned() {
        let alphabet = NestedAlphabet::new(['a', 'b'], ['c'], ['r']).unwrap();
        assert_eq!(alphabet.size(), 4);
        assert_eq!(alphabet.internal_ids().collect_vec(), vec![0, 1]);
        assert_eq!(alphabet.call_ids().collect_vec(), vec![2]);
        assert_eq!(alphabet.return_ids().collect_vec(), vec![3]);
        assert_eq!(alphabet.expect_kind(&'c', LetterKind::Call), Ok(2));
        assert!(matches!(
            alphabet.expect_kind(&'c', LetterKind::Internal),
            Err(AutomataError::WrongLetterKind { .. })
        ));
        assert!(matches!(
            alphabet.expect_kind(&'z', LetterKind::Internal),
            Err(AutomataError::UnknownLetter(_))
        ));
        assert!(!alphabet.is_flat());
    }

    #[test]
    fn duplicate_letter_is_rejected() {
        assert_eq!(
            NestedAlphabet::new(['a'], ['a'], []).unwrap_err(),
            AutomataError::DuplicateLetter("'a'".to_string())
        );
    }
}
