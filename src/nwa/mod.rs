use crate::{Element, NestedAlphabet};

mod dense;
pub use dense::Nwa;

mod builder;
pub use builder::NwaBuilder;

/// Nested words, runs and lassos together with acceptance checks.
pub mod word;

/// On-demand exploration of the reachable double deckers of an automaton.
pub mod reachable;

/// Capability interface of a nested-word automaton. Implementations may compute
/// successors lazily; the library only ever queries and never mutates them.
///
/// Successor queries for letters of the wrong kind simply return no successors.
pub trait NestedWordAutomaton {
    /// The type of states.
    type State: Element;
    /// The type of letters.
    type Letter: Element;

    /// The alphabet, partitioned into internal, call and return letters.
    fn alphabet(&self) -> &NestedAlphabet<Self::Letter>;

    /// The initial states.
    fn initial_states(&self) -> Vec<Self::State>;

    /// Whether `state` is final (accepting for Büchi semantics).
    fn is_final(&self, state: &Self::State) -> bool;

    /// Successors of `state` under the internal letter `letter`.
    fn internal_successors(&self, state: &Self::State, letter: &Self::Letter) -> Vec<Self::State>;

    /// Successors of `state` under the call letter `letter`.
    fn call_successors(&self, state: &Self::State, letter: &Self::Letter) -> Vec<Self::State>;

    /// Successors of `state` under the return letter `letter` when `hier` is the
    /// hierarchical predecessor, i.e. the state from which the matching call was taken.
    fn return_successors(
        &self,
        state: &Self::State,
        hier: &Self::State,
        letter: &Self::Letter,
    ) -> Vec<Self::State>;
}

impl<A: NestedWordAutomaton> NestedWordAutomaton for &A {
    type State = A::State;
    type Letter = A::Letter;

    fn alphabet(&self) -> &NestedAlphabet<Self::Letter> {
        A::alphabet(self)
    }
    fn initial_states(&self) -> Vec<Self::State> {
        A::initial_states(self)
    }
    fn is_final(&self, state: &Self::State) -> bool {
        A::is_final(self, state)
    }
    fn internal_successors(&self, state: &Self::State, letter: &Self::Letter) -> Vec<Self::State> {
        A::internal_successors(self, state, letter)
    }
    fn call_successors(&self, state: &Self::State, letter: &Self::Letter) -> Vec<Self::State> {
        A::call_successors(self, state, letter)
    }
    fn return_successors(
        &self,
        state: &Self::State,
        hier: &Self::State,
        letter: &Self::Letter,
    ) -> Vec<Self::State> {
        A::return_successors(self, state, hier, letter)
    }
}

