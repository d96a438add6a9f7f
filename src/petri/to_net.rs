use itertools::Itertools;
use tracing::debug;

use super::{BranchingProcess, PetriNet};
use crate::{
    factory::StateFactory,
    math::{Partition, Set},
    nwa::word::bounded_words,
    operation::{log_exit, log_start},
    AutomataError, CancelToken, Element, IntSet, NestedAlphabet, Operation, Result,
};

/// Length of the words compared by `check_result`.
const CHECK_DEPTH: usize = 6;

/// Folds a finite prefix back into a net. Every condition becomes a place, every event a
/// transition. The cut of each cutoff event is glued place by place onto the cut of its
/// companion, so the runs that were cut off continue from the companion.
pub struct FinitePrefixToNet<S: Element, L: Element> {
    input: PetriNet<S, L>,
    cancel: CancelToken,
    result: PetriNet<S, L>,
}

impl<S: Element, L: Element> FinitePrefixToNet<S, L> {
    const NAME: &'static str = "finitePrefix2PetriNet";

    /// Folds `prefix`, the places of the result are created by
    /// [`StateFactory::finite_prefix_to_net`] from the representative condition of each
    /// glued class.
    pub fn new<F: StateFactory<S>>(prefix: &BranchingProcess<S, L>, factory: &F, cancel: &CancelToken) -> Result<Self> {
        log_start::<Self>(Self::NAME);
        let conditions = prefix.conditions();
        let mut glued = vec![];
        for e in prefix.cutoff_events() {
            cancel.check(Self::NAME)?;
            let Some(companion) = prefix.events()[e].companion() else {
                continue;
            };
            let companion_cut = prefix.cut(companion);
            for c in prefix.cut(e) {
                let place = conditions[c].place();
                if let Some(d) = companion_cut.iter().find(|d| conditions[**d].place() == place) {
                    glued.push((c, *d));
                }
            }
        }
        let classes = Partition::from_pairs(conditions.len(), glued);
        let class_of = classes.class_map(conditions.len());

        let net = prefix.net();
        let mut result = PetriNet::new();
        let mut place_of = vec![0; classes.size()];
        let root: IntSet = prefix.events()[BranchingProcess::<S, L>::ROOT]
            .postset()
            .iter()
            .filter_map(|c| class_of[*c])
            .collect();
        for (class, block) in classes.iter().enumerate() {
            let Some(&representative) = block.first() else {
                continue;
            };
            let original = conditions[representative].place();
            let Some(place) = net.place(original) else {
                continue;
            };
            place_of[class] = result.add_place(
                factory.finite_prefix_to_net(place, representative),
                root.contains(class),
                net.accepting_places().contains(original),
            );
        }

        let mut seen = Set::default();
        for event in prefix.events().iter().skip(1) {
            cancel.check(Self::NAME)?;
            let Some(transition) = event.transition().and_then(|t| net.transition(t)) else {
                continue;
            };
            let places = |conditions: &[usize]| -> IntSet {
                conditions
                    .iter()
                    .filter_map(|c| class_of[*c])
                    .map(|class| place_of[class])
                    .collect()
            };
            let (preset, postset) = (places(event.preset()), places(event.postset()));
            if seen.insert((transition.letter().clone(), preset.clone(), postset.clone())) {
                result.add_transition_ids(transition.letter().clone(), preset, postset)?;
            }
        }
        debug!(
            "folded {} conditions into {} places and {} transitions",
            conditions.len(),
            result.place_count(),
            result.transition_count()
        );

        let op = Self {
            input: net.clone(),
            cancel: cancel.clone(),
            result,
        };
        log_exit(&op);
        Ok(op)
    }
}

impl<S: Element, L: Element> Operation for FinitePrefixToNet<S, L> {
    type State = S;
    type Output = PetriNet<S, L>;

    fn operation_name(&self) -> &'static str {
        Self::NAME
    }

    fn exit_message(&self) -> String {
        format!(
            "Finished {}, net has {} places and {} transitions",
            Self::NAME,
            self.result.place_count(),
            self.result.transition_count()
        )
    }

    fn result(&self) -> &PetriNet<S, L> {
        &self.result
    }

    fn into_result(self) -> PetriNet<S, L> {
        self.result
    }

    /// Compares the words accepted by the unfolded and the folded net up to a fixed length.
    fn check_result<F: StateFactory<Self::State>>(&self, _factory: &F) -> Result<bool> {
        let alphabet = NestedAlphabet::internal_only(self.input.letters());
        for word in bounded_words(&alphabet, CHECK_DEPTH) {
            self.cancel.check(Self::NAME)?;
            if self.input.accepts(&word)? != self.result.accepts(&word)? {
                return Err(AutomataError::Verification {
                    operation: Self::NAME,
                    reason: format!("nets disagree on {}", word.iter().map(|l| format!("{l:?}")).join(" ")),
                });
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        factory::StringFactory,
        petri::{tests::producer_consumer, PetriNetUnfolder, UnfoldingOptions},
    };

    #[test_log::test]
    fn folding_keeps_the_language() {
        let net = producer_consumer();
        let cancel = CancelToken::new();
        let prefix = PetriNetUnfolder::new(&net, UnfoldingOptions::default(), &cancel)
            .unwrap()
            .into_result();
        let op = FinitePrefixToNet::new(&prefix, &StringFactory, &cancel).unwrap();
        let folded = op.result();
        // the cutoff glues three conditions onto the initial ones
        assert!(folded.place_count() < prefix.conditions().len());
        assert_eq!(folded.initial_marking().len(), 3);
        assert!(folded.place_id(&"c0:p0".to_string()).is_some());
        assert!(folded.accepts(&['p', 's', 'c', 'd', 'p', 's', 'c']).unwrap());
        assert_eq!(op.check_result(&StringFactory), Ok(true));
    }

    #[test]
    fn prefix_without_cutoffs_is_unchanged() {
        let net: PetriNet<String, char> = crate::petri::PetriNetBuilder::default()
            .with_initial(["a"])
            .with_accepting(["c"])
            .with_transition('x', ["a"], ["b"])
            .with_transition('y', ["b"], ["c"])
            .build()
            .unwrap();
        let cancel = CancelToken::new();
        let prefix = PetriNetUnfolder::new(&net, UnfoldingOptions::default(), &cancel)
            .unwrap()
            .into_result();
        assert_eq!(prefix.cutoff_events().count(), 0);
        let op = FinitePrefixToNet::new(&prefix, &StringFactory, &cancel).unwrap();
        assert_eq!(op.result().place_count(), 3);
        assert_eq!(op.result().transition_count(), 2);
        assert_eq!(op.check_result(&StringFactory), Ok(true));
    }
}
