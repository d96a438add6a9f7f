use itertools::Itertools;

use super::lasso_counterexample;
use crate::{
    emptiness::BuchiIsEmpty,
    factory::StateFactory,
    nwa::{
        reachable::explore,
        word::{accepts, bounded_words},
    },
    operation::{log_exit, log_start},
    AutomataError, CancelToken, Element, NestedAlphabet, NestedWordAutomaton, Nwa, Operation,
    Result,
};

/// Length of the words compared by the finite product check.
const CHECK_DEPTH: usize = 5;

fn product_alphabet<L: Element>(
    operation: &'static str,
    left: &NestedAlphabet<L>,
    right: &NestedAlphabet<L>,
) -> Result<()> {
    if left.same_letters(right) {
        Ok(())
    } else {
        Err(AutomataError::Unsupported {
            operation,
            reason: "both automata have to read the same partitioned alphabet".into(),
        })
    }
}

/// The synchronous product of two automata over the same alphabet, computed on demand.
/// A state is final iff both components are. Return transitions synchronize the
/// hierarchical predecessors component-wise.
pub struct ProductNwa<'a, A, B> {
    left: &'a A,
    right: &'a B,
}

impl<'a, A, B> ProductNwa<'a, A, B>
where
    A: NestedWordAutomaton,
    B: NestedWordAutomaton<Letter = A::Letter>,
{
    /// Combines `left` and `right`. Fails if their alphabets differ.
    pub fn new(left: &'a A, right: &'a B) -> Result<Self> {
        product_alphabet("intersect", left.alphabet(), right.alphabet())?;
        Ok(Self { left, right })
    }
}

impl<'a, A, B> NestedWordAutomaton for ProductNwa<'a, A, B>
where
    A: NestedWordAutomaton,
    B: NestedWordAutomaton<Letter = A::Letter>,
{
    type State = (A::State, B::State);
    type Letter = A::Letter;

    fn alphabet(&self) -> &NestedAlphabet<A::Letter> {
        self.left.alphabet()
    }

    fn initial_states(&self) -> Vec<Self::State> {
        self.left
            .initial_states()
            .into_iter()
            .cartesian_product(self.right.initial_states())
            .collect()
    }

    fn is_final(&self, (p, q): &Self::State) -> bool {
        self.left.is_final(p) && self.right.is_final(q)
    }

    fn internal_successors(&self, (p, q): &Self::State, letter: &A::Letter) -> Vec<Self::State> {
        self.left
            .internal_successors(p, letter)
            .into_iter()
            .cartesian_product(self.right.internal_successors(q, letter))
            .collect()
    }

    fn call_successors(&self, (p, q): &Self::State, letter: &A::Letter) -> Vec<Self::State> {
        self.left
            .call_successors(p, letter)
            .into_iter()
            .cartesian_product(self.right.call_successors(q, letter))
            .collect()
    }

    fn return_successors(
        &self,
        (p, q): &Self::State,
        (hp, hq): &Self::State,
        letter: &A::Letter,
    ) -> Vec<Self::State> {
        self.left
            .return_successors(p, hp, letter)
            .into_iter()
            .cartesian_product(self.right.return_successors(q, hq, letter))
            .collect()
    }
}

/// The Büchi product of two automata over the same alphabet. A state carries a track
/// flag: on track 1 the product waits for a final state of the left automaton, on
/// track 2 for one of the right automaton. The track switches when the awaited state is
/// left, and the final states are those on track 1 whose left component is final.
pub struct BuchiProductNwa<'a, A, B> {
    left: &'a A,
    right: &'a B,
}

impl<'a, A, B> BuchiProductNwa<'a, A, B>
where
    A: NestedWordAutomaton,
    B: NestedWordAutomaton<Letter = A::Letter>,
{
    /// Combines `left` and `right`. Fails if their alphabets differ.
    pub fn new(left: &'a A, right: &'a B) -> Result<Self> {
        product_alphabet("buchiIntersect", left.alphabet(), right.alphabet())?;
        Ok(Self { left, right })
    }

    fn next_track(&self, p: &A::State, q: &B::State, track: u8) -> u8 {
        match track {
            1 if self.left.is_final(p) => 2,
            2 if self.right.is_final(q) => 1,
            t => t,
        }
    }

    fn attach(
        &self,
        pairs: impl Iterator<Item = (A::State, B::State)>,
        track: u8,
    ) -> Vec<(A::State, B::State, u8)> {
        pairs.map(|(p, q)| (p, q, track)).collect()
    }
}

impl<'a, A, B> NestedWordAutomaton for BuchiProductNwa<'a, A, B>
where
    A: NestedWordAutomaton,
    B: NestedWordAutomaton<Letter = A::Letter>,
{
    type State = (A::State, B::State, u8);
    type Letter = A::Letter;

    fn alphabet(&self) -> &NestedAlphabet<A::Letter> {
        self.left.alphabet()
    }

    fn initial_states(&self) -> Vec<Self::State> {
        self.attach(
            self.left
                .initial_states()
                .into_iter()
                .cartesian_product(self.right.initial_states()),
            1,
        )
    }

    fn is_final(&self, (p, _, track): &Self::State) -> bool {
        *track == 1 && self.left.is_final(p)
    }

    fn internal_successors(&self, (p, q, t): &Self::State, letter: &A::Letter) -> Vec<Self::State> {
        self.attach(
            self.left
                .internal_successors(p, letter)
                .into_iter()
                .cartesian_product(self.right.internal_successors(q, letter)),
            self.next_track(p, q, *t),
        )
    }

    fn call_successors(&self, (p, q, t): &Self::State, letter: &A::Letter) -> Vec<Self::State> {
        self.attach(
            self.left
                .call_successors(p, letter)
                .into_iter()
                .cartesian_product(self.right.call_successors(q, letter)),
            self.next_track(p, q, *t),
        )
    }

    fn return_successors(
        &self,
        (p, q, t): &Self::State,
        (hp, hq, _): &Self::State,
        letter: &A::Letter,
    ) -> Vec<Self::State> {
        self.attach(
            self.left
                .return_successors(p, hp, letter)
                .into_iter()
                .cartesian_product(self.right.return_successors(q, hq, letter)),
            self.next_track(p, q, *t),
        )
    }
}

/// Intersection of the finite-word languages of two automata. The reachable part of the
/// on-demand [`ProductNwa`] is materialized and its states are named by
/// [`StateFactory::intersection`].
pub struct Intersect<'a, A: NestedWordAutomaton, B> {
    left: &'a A,
    right: &'a B,
    cancel: CancelToken,
    result: Nwa<A::State, A::Letter>,
}

impl<'a, A, B> Intersect<'a, A, B>
where
    A: NestedWordAutomaton,
    B: NestedWordAutomaton<State = A::State, Letter = A::Letter>,
{
    const NAME: &'static str = "intersect";

    /// Computes the product of `left` and `right`.
    pub fn new<F: StateFactory<A::State>>(
        left: &'a A,
        right: &'a B,
        factory: &F,
        cancel: &CancelToken,
    ) -> Result<Self> {
        log_start::<Self>(Self::NAME);
        let product = ProductNwa::new(left, right)?;
        let result = explore(&product, cancel, Self::NAME)?
            .map_states(|_, (p, q)| factory.intersection(p, q))?;
        let op = Self {
            left,
            right,
            cancel: cancel.clone(),
            result,
        };
        log_exit(&op);
        Ok(op)
    }
}

impl<'a, A, B> Operation for Intersect<'a, A, B>
where
    A: NestedWordAutomaton,
    B: NestedWordAutomaton<State = A::State, Letter = A::Letter>,
{
    type State = A::State;
    type Output = Nwa<A::State, A::Letter>;

    fn operation_name(&self) -> &'static str {
        Self::NAME
    }

    fn exit_message(&self) -> String {
        format!("Finished {}, product has {} states", Self::NAME, self.result.size())
    }

    fn result(&self) -> &Self::Output {
        &self.result
    }

    fn into_result(self) -> Self::Output {
        self.result
    }

    fn check_result<F: StateFactory<Self::State>>(&self, _factory: &F) -> Result<bool> {
        for word in bounded_words(self.result.alphabet(), CHECK_DEPTH) {
            self.cancel.check(Self::NAME)?;
            let expected = accepts(self.left, &word)? && accepts(self.right, &word)?;
            if self.result.accepts(&word)? != expected {
                return Err(AutomataError::Verification {
                    operation: Self::NAME,
                    reason: format!("product disagrees with its inputs on {word:?}"),
                });
            }
        }
        Ok(true)
    }
}

/// Intersection of the Büchi languages of two automata via [`BuchiProductNwa`].
pub struct BuchiIntersect<'a, A: NestedWordAutomaton, B> {
    left: &'a A,
    right: &'a B,
    cancel: CancelToken,
    result: Nwa<A::State, A::Letter>,
}

impl<'a, A, B> BuchiIntersect<'a, A, B>
where
    A: NestedWordAutomaton,
    B: NestedWordAutomaton<State = A::State, Letter = A::Letter>,
{
    const NAME: &'static str = "buchiIntersect";

    /// Computes the Büchi product of `left` and `right`.
    pub fn new<F: StateFactory<A::State>>(
        left: &'a A,
        right: &'a B,
        factory: &F,
        cancel: &CancelToken,
    ) -> Result<Self> {
        log_start::<Self>(Self::NAME);
        let product = BuchiProductNwa::new(left, right)?;
        let result = explore(&product, cancel, Self::NAME)?
            .map_states(|_, (p, q, track)| factory.buchi_intersection(p, q, *track))?;
        let op = Self {
            left,
            right,
            cancel: cancel.clone(),
            result,
        };
        log_exit(&op);
        Ok(op)
    }

    /// Decides emptiness of the Büchi product without materializing it.
    pub fn is_empty(left: &A, right: &B, cancel: &CancelToken) -> Result<bool> {
        let product = BuchiProductNwa::new(left, right)?;
        BuchiIsEmpty::new(&product, cancel).map(Operation::into_result)
    }
}

impl<'a, A, B> Operation for BuchiIntersect<'a, A, B>
where
    A: NestedWordAutomaton,
    B: NestedWordAutomaton<State = A::State, Letter = A::Letter>,
{
    type State = A::State;
    type Output = Nwa<A::State, A::Letter>;

    fn operation_name(&self) -> &'static str {
        Self::NAME
    }

    fn exit_message(&self) -> String {
        format!("Finished {}, product has {} states", Self::NAME, self.result.size())
    }

    fn result(&self) -> &Self::Output {
        &self.result
    }

    fn into_result(self) -> Self::Output {
        self.result
    }

    /// Compares ultimately periodic words over internal letters, which is only complete
    /// for flat alphabets.
    fn check_result<F: StateFactory<Self::State>>(&self, _factory: &F) -> Result<bool> {
        if !self.result.alphabet().is_flat() {
            return Ok(false);
        }
        let left = explore(self.left, &self.cancel, Self::NAME)?;
        let right = explore(self.right, &self.cancel, Self::NAME)?;
        let counterexample = lasso_counterexample(self.result.alphabet(), &self.cancel, |stem, cycle| {
            let expected = left.accepts_lasso(stem, cycle)? && right.accepts_lasso(stem, cycle)?;
            Ok(self.result.accepts_lasso(stem, cycle)? == expected)
        })?;
        match counterexample {
            None => Ok(true),
            Some((stem, cycle)) => Err(AutomataError::Verification {
                operation: Self::NAME,
                reason: format!("product disagrees with its inputs on {stem:?}({cycle:?})^ω"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{factory::StringFactory, nwa::NwaBuilder, tests::lasso_nwa};

    fn ends_with_b() -> Nwa<String, char> {
        NwaBuilder::internal(['a', 'b'])
            .with_initial(["u"])
            .with_final(["v"])
            .with_internal([("u", 'a', "u"), ("u", 'b', "v"), ("v", 'a', "u"), ("v", 'b', "v")])
            .build()
            .unwrap()
    }

    #[test_log::test]
    fn finite_intersection() {
        let (left, right) = (lasso_nwa(), ends_with_b());
        let op = Intersect::new(&left, &right, &StringFactory, &CancelToken::new()).unwrap();
        let product = op.result();
        assert!(product.accepts(&['a', 'b']).unwrap());
        assert!(!product.accepts(&['a', 'b', 'a']).unwrap());
        assert!(product.id_of(&"(q2, v)".to_string()).is_some());
        assert_eq!(op.check_result(&StringFactory), Ok(true));
    }

    #[test]
    fn buchi_intersection_tracks_both_components() {
        // infinitely many b's
        let (left, inf_b) = (lasso_nwa(), ends_with_b());
        let op = BuchiIntersect::new(&left, &inf_b, &StringFactory, &CancelToken::new()).unwrap();
        assert!(op.result().accepts_lasso(&['a'], &['b', 'a']).unwrap());
        assert!(!op.result().accepts_lasso(&['a', 'a'], &['a']).unwrap());
        assert_eq!(op.check_result(&StringFactory), Ok(true));
        assert!(!BuchiIntersect::is_empty(&left, &inf_b, &CancelToken::new()).unwrap());
    }

    #[test]
    fn mismatching_alphabets_are_rejected() {
        let other: Nwa<String, char> = NwaBuilder::internal(['a']).with_initial(["z"]).build().unwrap();
        let left = lasso_nwa();
        let res = Intersect::new(&left, &other, &StringFactory, &CancelToken::new());
        assert!(matches!(res.err(), Some(AutomataError::Unsupported { .. })));
    }
}
