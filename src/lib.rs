//! Library for nested-word automata over finite and infinite words.
//!
//! A nested-word automaton (NWA) reads words whose letters come in three kinds: internal
//! letters behave like the letters of an ordinary automaton, call letters push the current
//! state onto a call stack and return letters pop it again. A return transition therefore
//! carries, besides its source and target, the *hierarchical predecessor*, i.e. the state
//! from which the matching call was taken. Finite acceptance asks for a run ending in a
//! final state, Büchi acceptance for a run that visits final states infinitely often.
//!
//! The central abstraction is the [`NestedWordAutomaton`] trait. It only asks for initial
//! states, finality and successor queries, so automata can be given *on demand*, for
//! example as a product or a complement that is never built completely. Everything that
//! needs a complete picture runs through [`nwa::reachable::NestedSearch`], which assigns
//! dense ids to states when they are first discovered and materializes the reachable part
//! into a [`Nwa`], the array based representation used by the algorithms.
//!
//! On top of that the crate offers
//! - emptiness checks for finite ([`emptiness::IsEmpty`]) and Büchi acceptance
//!   ([`emptiness::BuchiIsEmpty`]) that return witnesses,
//! - products ([`buchi::Intersect`], [`buchi::BuchiIntersect`]) and rank-based
//!   complementation ([`buchi::BuchiComplementFkv`]),
//! - state reduction by a bisimulation computed with an incremental clause solver
//!   ([`minimization::MinimizeNwaMaxSat`]) and by direct simulation
//!   ([`buchi::ReduceDirectSimulation`]),
//! - Petri nets and their finite complete prefixes ([`petri::PetriNetUnfolder`]).
//!
//! All of these implement [`Operation`], poll a [`CancelToken`] in every unbounded loop and
//! report progress through `tracing`.
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// The prelude is supposed to make using this package easier. Including everything, i.e.
/// `use nested_automata::prelude::*;` should be enough to use the package.
pub mod prelude {
    #[cfg(feature = "minimize")]
    pub use super::{
        compare::{CompareReductions, Reduction, ReductionReport},
        minimization::{MinimizeNwaMaxSat, MinimizeOptions},
    };
    pub use super::{
        alphabet::{LetterKind, NestedAlphabet},
        buchi::{
            BuchiComplementFkv, BuchiIntersect, BuchiProductNwa, ComplementOptions, Intersect,
            LevelRanking, ProductNwa, ReduceDirectSimulation,
        },
        emptiness::{BuchiIsEmpty, IsEmpty, SearchStrategy},
        factory::{StateFactory, StringFactory},
        intset::IntSet,
        math::{Map, Partition, Set},
        nwa::{
            reachable::{
                DownState, NestedSearch, ReachProp, ReachableNwa, RemoveDeadEnds, RemoveUnreachable,
            },
            word::{NestedLasso, NestedRun},
            Nwa, NwaBuilder,
        },
        operation::Operation,
        petri::{
            BranchingProcess, Condition, CutoffCriterion, Event, FinitePrefixToNet, NetTransition,
            PetriNet, PetriNetBuilder, PetriNetUnfolder, UnfoldingOptions,
        },
        AutomataError, CancelToken, Element, LetterId, NestedWordAutomaton, Result, Show,
        StateId,
    };
}

/// This module contains some definitions of mathematical objects which are used throughout the crate and
/// do not really fit to the top level.
pub mod math;

/// The integer set used for all sets of ids.
pub mod intset;
pub use intset::IntSet;

/// Dense id assignment for opaque objects.
pub mod indexer;

/// Module that contains definitions for dealing with alphabets.
pub mod alphabet;
pub use alphabet::{LetterKind, NestedAlphabet};

mod error;
pub use error::{AutomataError, Result};

mod cancel;
pub use cancel::CancelToken;

/// Factories producing the states of result automata.
pub mod factory;
pub use factory::StateFactory;

/// The common interface of all operations.
pub mod operation;
pub use operation::Operation;

/// Nested-word automata, their dense representation, words, runs and reachability.
pub mod nwa;
pub use nwa::{NestedWordAutomaton, Nwa, NwaBuilder};

/// Emptiness checks for finite and Büchi acceptance.
pub mod emptiness;

/// Products, complementation and simulation based reduction of Büchi automata.
pub mod buchi;

/// Contains the clause solver based minimization. This is feature gated behind the `minimize` feature.
#[cfg(feature = "minimize")]
pub mod minimization;

/// A harness that runs several reduction strategies on one automaton and compares them.
#[cfg(feature = "minimize")]
pub mod compare;

/// Petri nets and finite complete prefixes of their unfoldings.
pub mod petri;

/// Implements the generation of random nested-word automata.
#[cfg(feature = "random")]
pub mod random;

use std::{fmt::Debug, hash::Hash};

use itertools::Itertools;

/// Dense id of a state within one automaton.
pub type StateId = usize;
/// Dense id of a letter within one alphabet.
pub type LetterId = usize;
/// Dense id of a place within one Petri net.
pub type PlaceId = usize;
/// Dense id of a transition within one Petri net.
pub type TransitionId = usize;
/// Dense id of a condition within one branching process.
pub type ConditionId = usize;
/// Dense id of an event within one branching process.
pub type EventId = usize;

/// Anything that can be used as a state or letter: it has to be cloneable, hashable and
/// printable for diagnostics.
pub trait Element: Clone + Eq + Hash + Debug {}

impl<T: Clone + Eq + Hash + Debug> Element for T {}

/// Helper trait which can be used to display states, transitions and such.
pub trait Show {
    /// Returns a human readable representation of `self`, for a state index that should be
    /// for example q0, q1, q2, ... and for a transition (q0, a, q1) it should be (q0, a, q1).
    /// Just use something that makes sense. This is mainly used for debugging purposes.
    fn show(&self) -> String;
}

impl Show for usize {
    fn show(&self) -> String {
        self.to_string()
    }
}

impl Show for String {
    fn show(&self) -> String {
        self.clone()
    }
}

impl Show for char {
    fn show(&self) -> String {
        self.to_string()
    }
}

impl Show for bool {
    fn show(&self) -> String {
        match self {
            true => "+",
            false => "-",
        }
        .to_string()
    }
}

impl<S: Show> Show for [S] {
    fn show(&self) -> String {
        format!("[{}]", self.iter().map(|x| x.show()).join(", "))
    }
}

impl<S: Show> Show for Vec<S> {
    fn show(&self) -> String {
        self.as_slice().show()
    }
}

impl<S: Show, T: Show> Show for (S, T) {
    fn show(&self) -> String {
        format!("({}, {})", self.0.show(), self.1.show())
    }
}

impl<S: Show> Show for &S {
    fn show(&self) -> String {
        S::show(*self)
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    /// Three states, `q2` is accepting and lies on the cycle `q1 -b-> q2 -a-> q1`.
    pub fn lasso_nwa() -> Nwa<String, char> {
        NwaBuilder::internal(['a', 'b'])
            .with_initial(["q0"])
            .with_states(["q1"])
            .with_final(["q2"])
            .with_internal([("q0", 'a', "q1"), ("q1", 'b', "q2"), ("q2", 'a', "q1")])
            .build()
            .unwrap()
    }

    /// Two call sites `p` and `q` calling into the same procedure `e -x-> x`, the return
    /// leads back to `p'` or `q'` depending on the call site; only `q'` is final.
    pub fn two_call_sites() -> Nwa<String, char> {
        NwaBuilder::nested(['a', 'b', 'x'], ['c'], ['r'])
            .unwrap()
            .with_initial(["s"])
            .with_states(["p", "q", "e", "x", "p'"])
            .with_final(["q'"])
            .with_internal([("s", 'a', "p"), ("s", 'b', "q"), ("e", 'x', "x")])
            .with_call([("p", 'c', "e"), ("q", 'c', "e")])
            .with_return([("x", "p", 'r', "p'"), ("x", "q", 'r', "q'")])
            .build()
            .unwrap()
    }
}
