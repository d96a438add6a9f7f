use std::collections::BTreeMap;

use itertools::Itertools;
use tracing::debug;

use super::{lasso_counterexample, BuchiIntersect};
use crate::{
    alphabet::LetterKind,
    factory::StateFactory,
    nwa::reachable::explore,
    operation::{log_exit, log_start},
    AutomataError, CancelToken, Element, IntSet, NestedAlphabet, NestedWordAutomaton, Nwa,
    Operation, Result, StateId,
};

/// Options of [`BuchiComplementFkv`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComplementOptions {
    max_rank: Option<usize>,
}

impl ComplementOptions {
    /// Bounds the ranks used by the construction. Without a bound the sound default
    /// `2 * (|Q| - |F|)` is used; a smaller bound yields a smaller automaton that may
    /// miss words of the complement.
    pub fn with_max_rank(mut self, max_rank: usize) -> Self {
        self.max_rank = Some(max_rank);
        self
    }

    /// The configured rank bound.
    pub fn max_rank(&self) -> Option<usize> {
        self.max_rank
    }
}

/// A state of the rank-based complement: a rank for every state the input can be in
/// after the prefix read so far, and the set of even-ranked states that still owe a
/// visit to an odd rank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LevelRanking {
    ranks: BTreeMap<StateId, usize>,
    owing: IntSet,
}

impl LevelRanking {
    /// The rank of `q`, if it is tracked.
    pub fn rank(&self, q: StateId) -> Option<usize> {
        self.ranks.get(&q).copied()
    }

    /// `true` iff no state owes a visit to an odd rank.
    pub fn is_accepting(&self) -> bool {
        self.owing.is_empty()
    }

    fn entries<'n, S: Element, L: Element>(&self, input: &'n Nwa<S, L>) -> Vec<(&'n S, usize, bool)> {
        self.ranks
            .iter()
            .filter_map(|(q, r)| input.state(*q).map(|s| (s, *r, self.owing.contains(*q))))
            .collect()
    }
}

/// The complement of a dense automaton as an on-demand automaton over [`LevelRanking`]s.
struct ComplementNwa<'n, S: Element, L: Element> {
    input: &'n Nwa<S, L>,
    max_rank: usize,
}

impl<'n, S: Element, L: Element> ComplementNwa<'n, S, L> {
    /// Every ranking of the domain of `bounds` that respects the bounds and gives final
    /// states even ranks.
    fn rankings(&self, bounds: &BTreeMap<StateId, usize>) -> Vec<BTreeMap<StateId, usize>> {
        let mut out = vec![BTreeMap::new()];
        for (&q, &bound) in bounds {
            let allowed = (0..=bound.min(self.max_rank))
                .filter(|r| !self.input.is_final_id(q) || r % 2 == 0)
                .collect_vec();
            out = out
                .into_iter()
                .flat_map(|ranking| {
                    allowed.iter().map(move |&r| {
                        let mut next = ranking.clone();
                        next.insert(q, r);
                        next
                    })
                })
                .collect();
        }
        out
    }

    fn even(ranks: &BTreeMap<StateId, usize>) -> IntSet {
        ranks
            .iter()
            .filter(|(_, r)| *r % 2 == 0)
            .map(|(q, _)| *q)
            .collect()
    }
}

impl<'n, S: Element, L: Element> NestedWordAutomaton for ComplementNwa<'n, S, L> {
    type State = LevelRanking;
    type Letter = L;

    fn alphabet(&self) -> &NestedAlphabet<L> {
        self.input.alphabet()
    }

    fn initial_states(&self) -> Vec<LevelRanking> {
        let bounds: BTreeMap<StateId, usize> = self
            .input
            .initial_ids()
            .iter()
            .map(|q| (q, self.max_rank))
            .collect();
        self.rankings(&bounds)
            .into_iter()
            .map(|ranks| LevelRanking {
                ranks,
                owing: IntSet::new(),
            })
            .collect()
    }

    fn is_final(&self, state: &LevelRanking) -> bool {
        state.is_accepting()
    }

    fn internal_successors(&self, state: &LevelRanking, letter: &L) -> Vec<LevelRanking> {
        let Ok(a) = self.input.alphabet().expect_kind(letter, LetterKind::Internal) else {
            return vec![];
        };
        let mut bounds: BTreeMap<StateId, usize> = BTreeMap::new();
        let mut post_owing = IntSet::new();
        for (&q, &rank) in &state.ranks {
            for t in self.input.internal_targets(q, a).into_iter().flat_map(|t| t.iter()) {
                let bound = bounds.entry(t).or_insert(rank);
                *bound = (*bound).min(rank);
                if state.owing.contains(q) {
                    post_owing.insert(t);
                }
            }
        }
        self.rankings(&bounds)
            .into_iter()
            .map(|ranks| {
                let mut owing = Self::even(&ranks);
                if !state.owing.is_empty() {
                    owing.and(&post_owing);
                }
                LevelRanking { ranks, owing }
            })
            .collect()
    }

    fn call_successors(&self, _state: &LevelRanking, _letter: &L) -> Vec<LevelRanking> {
        vec![]
    }

    fn return_successors(&self, _: &LevelRanking, _: &LevelRanking, _: &L) -> Vec<LevelRanking> {
        vec![]
    }
}

/// Complements a Büchi automaton over internal letters with the rank-based construction of
/// Friedgut, Kupferman and Vardi. The complement is explored on demand from its initial
/// rankings, so only reachable level rankings are built.
pub struct BuchiComplementFkv<S: Element, L: Element> {
    input: Nwa<S, L>,
    cancel: CancelToken,
    result: Nwa<S, L>,
}

impl<S: Element, L: Element> BuchiComplementFkv<S, L> {
    const NAME: &'static str = "buchiComplementFKV";

    /// Complements `input`. Fails with [`AutomataError::Unsupported`] if the alphabet
    /// contains call or return letters.
    pub fn new<A, F>(input: &A, factory: &F, options: ComplementOptions, cancel: &CancelToken) -> Result<Self>
    where
        A: NestedWordAutomaton<State = S, Letter = L>,
        F: StateFactory<S>,
    {
        log_start::<Self>(Self::NAME);
        if !input.alphabet().is_flat() {
            return Err(AutomataError::Unsupported {
                operation: Self::NAME,
                reason: "rank-based complementation needs an alphabet of internal letters".into(),
            });
        }
        let input = explore(input, cancel, Self::NAME)?;
        let max_rank = options
            .max_rank()
            .unwrap_or(2 * (input.size() - input.final_ids().len()));
        debug!("complementing {} states with maximal rank {}", input.size(), max_rank);

        let complement = ComplementNwa {
            input: &input,
            max_rank,
        };
        let result = explore(&complement, cancel, Self::NAME)?
            .map_states(|_, ranking| factory.complement(&ranking.entries(&input)))?;
        let op = Self {
            input,
            cancel: cancel.clone(),
            result,
        };
        log_exit(&op);
        Ok(op)
    }
}

impl<S: Element, L: Element> Operation for BuchiComplementFkv<S, L> {
    type State = S;
    type Output = Nwa<S, L>;

    fn operation_name(&self) -> &'static str {
        Self::NAME
    }

    fn exit_message(&self) -> String {
        format!(
            "Finished {}, complement has {} states",
            Self::NAME,
            self.result.size()
        )
    }

    fn result(&self) -> &Nwa<S, L> {
        &self.result
    }

    fn into_result(self) -> Nwa<S, L> {
        self.result
    }

    /// The product with the input has to be empty, and on short lassos exactly one of
    /// input and complement accepts.
    fn check_result<F: StateFactory<Self::State>>(&self, _factory: &F) -> Result<bool> {
        if !BuchiIntersect::is_empty(&self.input, &self.result, &self.cancel)? {
            return Err(AutomataError::Verification {
                operation: Self::NAME,
                reason: "input and complement share a word".into(),
            });
        }
        let counterexample = lasso_counterexample(self.input.alphabet(), &self.cancel, |stem, cycle| {
            Ok(self.input.accepts_lasso(stem, cycle)? != self.result.accepts_lasso(stem, cycle)?)
        })?;
        match counterexample {
            None => Ok(true),
            Some((stem, cycle)) => Err(AutomataError::Verification {
                operation: Self::NAME,
                reason: format!("{stem:?}({cycle:?})^ω is accepted by neither or both"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        factory::StringFactory,
        tests::{lasso_nwa, two_call_sites},
    };

    #[test_log::test]
    fn complement_of_lasso() {
        let op = BuchiComplementFkv::new(
            &lasso_nwa(),
            &StringFactory,
            ComplementOptions::default(),
            &CancelToken::new(),
        )
        .unwrap();
        let complement = op.result();
        assert!(!complement.accepts_lasso(&['a'], &['b', 'a']).unwrap());
        assert!(complement.accepts_lasso(&[], &['a']).unwrap());
        assert!(complement.accepts_lasso(&['b'], &['b']).unwrap());
        assert!(complement.accepts_lasso(&['a', 'b', 'a'], &['a']).unwrap());
        assert_eq!(op.check_result(&StringFactory), Ok(true));
    }

    #[test]
    fn nested_alphabets_are_unsupported() {
        let res = BuchiComplementFkv::new(
            &two_call_sites(),
            &StringFactory,
            ComplementOptions::default(),
            &CancelToken::new(),
        );
        assert!(matches!(res.err(), Some(AutomataError::Unsupported { .. })));
    }

    #[test]
    fn rank_bound_is_configurable() {
        let options = ComplementOptions::default().with_max_rank(2);
        assert_eq!(options.max_rank(), Some(2));
        let op = BuchiComplementFkv::new(&lasso_nwa(), &StringFactory, options, &CancelToken::new())
            .unwrap();
        let full = BuchiComplementFkv::new(
            &lasso_nwa(),
            &StringFactory,
            ComplementOptions::default(),
            &CancelToken::new(),
        )
        .unwrap();
        assert!(op.result().size() <= full.result().size());
        assert!(!op.result().accepts_lasso(&['a'], &['b', 'a']).unwrap());
    }
}
