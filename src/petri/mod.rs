//! Petri nets with 1-safe semantics and finite complete prefixes of their unfoldings.
//!
//! A prefix is a [`BranchingProcess`]: conditions are occurrences of tokens, events are
//! occurrences of transitions. [`PetriNetUnfolder`] grows it from the initial marking
//! until every reachable marking is represented by a configuration without cutoff
//! events, and [`FinitePrefixToNet`] folds it back into a net.

mod net;
pub use net::{NetTransition, PetriNet, PetriNetBuilder};

mod unfolding;
pub use unfolding::{
    BranchingProcess, Condition, CutoffCriterion, Event, PetriNetUnfolder, UnfoldingOptions,
};

mod to_net;
pub use to_net::FinitePrefixToNet;

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A producer handing items to a consumer through a buffer of capacity one. The
    /// consumer finishing an item (`d`) restores its initial place, `c1` is accepting.
    pub fn producer_consumer() -> PetriNet<String, char> {
        PetriNetBuilder::default()
            .with_initial(["p0", "e", "c0"])
            .with_places(["p1", "b"])
            .with_accepting(["c1"])
            .with_transition('p', ["p0"], ["p1"])
            .with_transition('s', ["p1", "e"], ["p0", "b"])
            .with_transition('c', ["b", "c0"], ["e", "c1"])
            .with_transition('d', ["c1"], ["c0"])
            .build()
            .unwrap()
    }
}
