use std::collections::{BTreeSet, VecDeque};

use itertools::Itertools;

use crate::{
    alphabet::LetterKind, math::Set, AutomataError, CancelToken, Element, NestedAlphabet,
    NestedWordAutomaton, Nwa, Result, StateId,
};

/// A finite run of a nested-word automaton: `states[i + 1]` is reached from `states[i]`
/// by reading `letters[i]`. Returns are matched with the closest pending call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NestedRun<S, L> {
    /// The visited states, one more than there are letters.
    pub states: Vec<S>,
    /// The letters read.
    pub letters: Vec<L>,
}

impl<S, L> NestedRun<S, L> {
    /// The run of length zero that stays in `state`.
    pub fn empty(state: S) -> Self {
        Self {
            states: vec![state],
            letters: vec![],
        }
    }

    /// Number of letters.
    pub fn len(&self) -> usize {
        self.letters.len()
    }

    /// `true` iff no letter is read.
    pub fn is_empty(&self) -> bool {
        self.letters.is_empty()
    }

    /// The state the run starts in, `None` for a run without states.
    pub fn first(&self) -> Option<&S> {
        self.states.first()
    }

    /// The state the run ends in, `None` for a run without states.
    pub fn last(&self) -> Option<&S> {
        self.states.last()
    }
}

impl<S: Clone + PartialEq, L: Clone> NestedRun<S, L> {
    /// Appends `other`, which has to start where `self` ends.
    pub fn concat(&self, other: &NestedRun<S, L>) -> Option<NestedRun<S, L>> {
        match (self.last(), other.first()) {
            (Some(end), Some(start)) if end == start => {}
            _ => return None,
        }
        let mut out = self.clone();
        out.states.extend(other.states.iter().skip(1).cloned());
        out.letters.extend(other.letters.iter().cloned());
        Some(out)
    }
}

/// An ultimately periodic run witnessing a non-empty Büchi language: `stem` leads to the
/// first state of `cycle`, and `cycle` returns to that state while visiting a final
/// state. Calls inside the cycle may stay pending, returns inside it always match a call
/// of the same cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NestedLasso<S, L> {
    /// Finite prefix.
    pub stem: NestedRun<S, L>,
    /// Repeated part.
    pub cycle: NestedRun<S, L>,
}

/// Checks whether `automaton` accepts the finite nested word `word`. The word may contain
/// pending calls; a return without a pending call has no run.
pub fn accepts<A: NestedWordAutomaton>(automaton: &A, word: &[A::Letter]) -> Result<bool> {
    let alphabet = automaton.alphabet();
    let mut configs: Set<(A::State, Vec<A::State>)> = automaton
        .initial_states()
        .into_iter()
        .map(|q| (q, vec![]))
        .collect();

    for letter in word {
        let kind = alphabet
            .id_of(letter)
            .and_then(|id| alphabet.kind(id))
            .ok_or_else(|| AutomataError::UnknownLetter(format!("{letter:?}")))?;
        let mut next = Set::default();
        for (q, stack) in configs {
            match kind {
                LetterKind::Internal => {
                    for p in automaton.internal_successors(&q, letter) {
                        next.insert((p, stack.clone()));
                    }
                }
                LetterKind::Call => {
                    for p in automaton.call_successors(&q, letter) {
                        let mut pushed = stack.clone();
                        pushed.push(q.clone());
                        next.insert((p, pushed));
                    }
                }
                LetterKind::Return => {
                    if let Some((hier, rest)) = stack.split_last() {
                        for p in automaton.return_successors(&q, hier, letter) {
                            next.insert((p, rest.to_vec()));
                        }
                    }
                }
            }
        }
        if next.is_empty() {
            return Ok(false);
        }
        configs = next;
    }
    Ok(configs.iter().any(|(q, _)| automaton.is_final(q)))
}

/// Enumerates every word of length at most `max_len` over `alphabet` in which each return
/// closes a pending call, ordered by length and then by letter ids.
pub fn bounded_words<L: Element>(alphabet: &NestedAlphabet<L>, max_len: usize) -> Vec<Vec<L>> {
    let mut out = vec![vec![]];
    let mut layer: Vec<(Vec<L>, usize)> = vec![(vec![], 0)];
    for _ in 0..max_len {
        let mut next = vec![];
        for (word, pending) in &layer {
            for (_, letter, kind) in alphabet.iter() {
                let pending = match kind {
                    LetterKind::Internal => *pending,
                    LetterKind::Call => pending + 1,
                    LetterKind::Return if *pending > 0 => pending - 1,
                    LetterKind::Return => continue,
                };
                let mut w = word.clone();
                w.push(letter.clone());
                next.push((w, pending));
            }
        }
        out.extend(next.iter().map(|(w, _)| w.clone()));
        layer = next;
    }
    out
}

/// Searches for a word of length at most `max_len` on which `left` and `right` disagree.
/// Both automata have to read the same letters.
pub fn bounded_counterexample<A, B>(
    left: &A,
    right: &B,
    max_len: usize,
    cancel: &CancelToken,
) -> Result<Option<Vec<A::Letter>>>
where
    A: NestedWordAutomaton,
    B: NestedWordAutomaton<Letter = A::Letter>,
{
    for word in bounded_words(left.alphabet(), max_len) {
        cancel.check("bounded equivalence check")?;
        if accepts(left, &word)? != accepts(right, &word)? {
            tracing::debug!("automata disagree on {:?}", word);
            return Ok(Some(word));
        }
    }
    Ok(None)
}

impl<S: Element, L: Element> Nwa<S, L> {
    /// Checks whether the finite nested word `word` is accepted.
    pub fn accepts(&self, word: &[L]) -> Result<bool> {
        accepts(self, word)
    }

    /// Checks whether `run` is a run of `self` that starts in an initial state.
    pub fn is_initial_run(&self, run: &NestedRun<S, L>) -> bool {
        run.first()
            .and_then(|s| self.id_of(s))
            .is_some_and(|q| self.is_initial_id(q))
            && self.is_run(run)
    }

    /// Checks whether every step of `run` is a transition of `self`, where returns have to
    /// match a call made earlier in the same run.
    pub fn is_run(&self, run: &NestedRun<S, L>) -> bool {
        if run.states.len() != run.letters.len() + 1 {
            return false;
        }
        let Some(ids) = run.states.iter().map(|s| self.id_of(s)).collect::<Option<Vec<_>>>() else {
            return false;
        };
        let mut stack: Vec<StateId> = vec![];
        for (i, letter) in run.letters.iter().enumerate() {
            let Some(a) = self.alphabet().id_of(letter) else {
                return false;
            };
            let (p, q) = (ids[i], ids[i + 1]);
            let ok = match self.alphabet().kind(a) {
                Some(LetterKind::Internal) => self.internal_targets(p, a).is_some_and(|t| t.get(q)),
                Some(LetterKind::Call) => {
                    stack.push(p);
                    self.call_targets(p, a).is_some_and(|t| t.get(q))
                }
                Some(LetterKind::Return) => match stack.pop() {
                    Some(h) => self.return_targets(p, h, a).is_some_and(|t| t.get(q)),
                    None => false,
                },
                None => false,
            };
            if !ok {
                return false;
            }
        }
        true
    }

    /// Checks that `lasso` is an accepting lasso of `self`: the stem starts in an initial
    /// state, the cycle closes, visits a final state and stem followed by cycle is a run.
    pub fn is_accepting_lasso(&self, lasso: &NestedLasso<S, L>) -> bool {
        !lasso.cycle.is_empty()
            && lasso.cycle.first() == lasso.cycle.last()
            && lasso.cycle.states.iter().any(|s| self.is_final(s))
            && lasso
                .stem
                .concat(&lasso.cycle)
                .is_some_and(|run| self.is_initial_run(&run))
    }

    /// Büchi acceptance of the ultimately periodic word `stem cycle^ω`. Only words over
    /// internal letters are supported.
    pub fn accepts_lasso(&self, stem: &[L], cycle: &[L]) -> Result<bool> {
        if cycle.is_empty() {
            return Err(AutomataError::Unsupported {
                operation: "accepts_lasso",
                reason: "the periodic part must not be empty".into(),
            });
        }
        let word = stem
            .iter()
            .chain(cycle)
            .map(|l| self.alphabet().expect_kind(l, LetterKind::Internal))
            .collect::<Result<Vec<_>>>()?;
        let split = stem.len();
        let next = |pos: usize| if pos + 1 == word.len() { split } else { pos + 1 };
        let successors = |(q, pos): (StateId, usize)| {
            self.internal_targets(q, word[pos])
                .map(|t| t.iter().map(|p| (p, next(pos))).collect_vec())
                .unwrap_or_default()
        };

        let mut reachable = BTreeSet::new();
        let mut queue: VecDeque<_> = self.initial_ids().iter().map(|q| (q, 0)).collect();
        while let Some(node) = queue.pop_front() {
            if reachable.insert(node) {
                queue.extend(successors(node));
            }
        }

        for &(q, pos) in reachable.iter().filter(|(q, pos)| *pos >= split && self.is_final_id(*q)) {
            let mut seen = BTreeSet::new();
            let mut queue: VecDeque<_> = successors((q, pos)).into();
            while let Some(node) = queue.pop_front() {
                if node == (q, pos) {
                    return Ok(true);
                }
                if seen.insert(node) {
                    queue.extend(successors(node));
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{lasso_nwa, two_call_sites};

    #[test]
    fn nested_acceptance_respects_call_site() {
        let nwa = two_call_sites();
        assert!(nwa.accepts(&['b', 'c', 'x', 'r']).unwrap());
        assert!(!nwa.accepts(&['a', 'c', 'x', 'r']).unwrap());
        // pending return
        assert!(!nwa.accepts(&['r']).unwrap());
        assert!(nwa.accepts(&['q']).is_err());
    }

    #[test]
    fn bounded_words_skip_unmatched_returns() {
        let alphabet = NestedAlphabet::new(['a'], ['c'], ['r']).unwrap();
        let words = bounded_words(&alphabet, 2);
        assert!(words.contains(&vec!['c', 'r']));
        assert!(!words.iter().any(|w| w.first() == Some(&'r')));
        // "", a, c, aa, ac, ca, cc, cr
        assert_eq!(words.len(), 8);
    }

    #[test]
    fn lasso_acceptance() {
        let nwa = lasso_nwa();
        assert!(nwa.accepts_lasso(&['a'], &['b', 'a']).unwrap());
        assert!(!nwa.accepts_lasso(&[], &['a']).unwrap());
        assert!(!nwa.accepts_lasso(&['a', 'b'], &['b']).unwrap());
    }

    #[test]
    fn run_validation() {
        let nwa = two_call_sites();
        let run = NestedRun {
            states: ["s", "q", "e", "x", "q'"].map(String::from).to_vec(),
            letters: vec!['b', 'c', 'x', 'r'],
        };
        assert!(nwa.is_initial_run(&run));
        let wrong = NestedRun {
            states: ["s", "q", "e", "x", "p'"].map(String::from).to_vec(),
            letters: vec!['b', 'c', 'x', 'r'],
        };
        assert!(!nwa.is_run(&wrong));
    }

    #[test]
    fn runs_without_states_are_rejected() {
        let nwa = two_call_sites();
        let run: NestedRun<String, char> = NestedRun {
            states: vec![],
            letters: vec![],
        };
        assert_eq!(run.first(), None);
        assert!(!nwa.is_initial_run(&run));
        assert!(run.concat(&NestedRun::empty("s".to_string())).is_none());
        let lasso = NestedLasso {
            stem: NestedRun::empty("s".to_string()),
            cycle: run,
        };
        assert!(!nwa.is_accepting_lasso(&lasso));
    }
}
