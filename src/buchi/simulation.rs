use tracing::{debug, trace};

use super::lasso_counterexample;
use crate::{
    factory::StateFactory,
    math::Partition,
    nwa::reachable::{check_bounded, explore, CHECK_DEPTH},
    operation::{log_exit, log_start},
    AutomataError, CancelToken, Element, IntSet, NestedWordAutomaton, Nwa, Operation, Result,
};

/// Computes the largest direct simulation of a flat automaton. Entry `q` of the result
/// holds every state that simulates `q`: it is final whenever `q` is, and answers every
/// transition of `q` with a transition under the same letter to a state simulating the
/// target.
pub(crate) fn direct_simulation<S: Element, L: Element>(
    nwa: &Nwa<S, L>,
    cancel: &CancelToken,
    operation: &'static str,
) -> Result<Vec<IntSet>> {
    let mut sim: Vec<IntSet> = nwa
        .state_ids()
        .map(|q| {
            nwa.state_ids()
                .filter(|p| !nwa.is_final_id(q) || nwa.is_final_id(*p))
                .collect()
        })
        .collect();

    let mut changed = true;
    let mut rounds = 0;
    while changed {
        changed = false;
        rounds += 1;
        for q in nwa.state_ids() {
            cancel.check(operation)?;
            for p in sim[q].iter().collect::<Vec<_>>() {
                let answered = nwa.internal_out(q).all(|(a, targets)| {
                    targets.iter().all(|t| {
                        nwa.internal_targets(p, a)
                            .is_some_and(|answers| answers.intersects(&sim[t]))
                    })
                });
                if !answered {
                    trace!("{} does not simulate {}", p, q);
                    sim[q].clear(p);
                    changed = true;
                }
            }
        }
    }
    debug!("direct simulation stable after {} rounds", rounds);
    Ok(sim)
}

/// Merges states that simulate each other directly. The quotient accepts the same finite
/// and the same Büchi language as the input. Only automata over internal letters are
/// supported.
pub struct ReduceDirectSimulation<S: Element, L: Element> {
    input: Nwa<S, L>,
    cancel: CancelToken,
    result: Nwa<S, L>,
}

impl<S: Element, L: Element> ReduceDirectSimulation<S, L> {
    const NAME: &'static str = "reduceDirectSimulation";

    /// Reduces the reachable part of `input`.
    pub fn new<A, F>(input: &A, factory: &F, cancel: &CancelToken) -> Result<Self>
    where
        A: NestedWordAutomaton<State = S, Letter = L>,
        F: StateFactory<S>,
    {
        log_start::<Self>(Self::NAME);
        if !input.alphabet().is_flat() {
            return Err(AutomataError::Unsupported {
                operation: Self::NAME,
                reason: "direct simulation is only computed over internal letters".into(),
            });
        }
        let input = explore(input, cancel, Self::NAME)?;
        let sim = direct_simulation(&input, cancel, Self::NAME)?;
        let mut mutual = vec![];
        for q in input.state_ids() {
            mutual.extend(sim[q].iter().filter(|p| *p > q && sim[*p].contains(q)).map(|p| (q, p)));
        }
        let partition = Partition::from_pairs(input.size(), mutual);
        let result = input.quotient(&partition, |block| factory.merge(block))?;
        let op = Self {
            input,
            cancel: cancel.clone(),
            result,
        };
        log_exit(&op);
        Ok(op)
    }
}

impl<S: Element, L: Element> Operation for ReduceDirectSimulation<S, L> {
    type State = S;
    type Output = Nwa<S, L>;

    fn operation_name(&self) -> &'static str {
        Self::NAME
    }

    fn exit_message(&self) -> String {
        format!(
            "Finished {}, reduced {} to {} states",
            Self::NAME,
            self.input.size(),
            self.result.size()
        )
    }

    fn result(&self) -> &Nwa<S, L> {
        &self.result
    }

    fn into_result(self) -> Nwa<S, L> {
        self.result
    }

    fn check_result<F: StateFactory<Self::State>>(&self, _factory: &F) -> Result<bool> {
        check_bounded(Self::NAME, &self.input, &self.result, CHECK_DEPTH, &self.cancel)?;
        let counterexample = lasso_counterexample(self.input.alphabet(), &self.cancel, |stem, cycle| {
            Ok(self.input.accepts_lasso(stem, cycle)? == self.result.accepts_lasso(stem, cycle)?)
        })?;
        match counterexample {
            None => Ok(true),
            Some((stem, cycle)) => Err(AutomataError::Verification {
                operation: Self::NAME,
                reason: format!("reduction changes the verdict on {stem:?}({cycle:?})^ω"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        factory::StringFactory,
        nwa::NwaBuilder,
        tests::{lasso_nwa, two_call_sites},
    };

    fn diamond() -> Nwa<String, char> {
        NwaBuilder::internal(['a', 'b'])
            .with_initial(["q0"])
            .with_states(["q1", "q2"])
            .with_final(["q3"])
            .with_internal([
                ("q0", 'a', "q1"),
                ("q0", 'a', "q2"),
                ("q1", 'b', "q3"),
                ("q2", 'b', "q3"),
                ("q3", 'a', "q3"),
            ])
            .build()
            .unwrap()
    }

    #[test_log::test]
    fn equivalent_branches_are_merged() {
        let op = ReduceDirectSimulation::new(&diamond(), &StringFactory, &CancelToken::new()).unwrap();
        assert_eq!(op.result().size(), 3);
        assert!(op.result().id_of(&"{q1, q2}".to_string()).is_some());
        assert_eq!(op.check_result(&StringFactory), Ok(true));
    }

    #[test]
    fn simulation_respects_finality() {
        let nwa = lasso_nwa();
        let sim = direct_simulation(&nwa, &CancelToken::new(), "test").unwrap();
        // q2 is final, nothing else is
        assert_eq!(sim[2].iter().collect::<Vec<_>>(), vec![2]);
        let op = ReduceDirectSimulation::new(&nwa, &StringFactory, &CancelToken::new()).unwrap();
        assert_eq!(op.result().size(), 3);
    }

    #[test]
    fn nested_input_is_unsupported() {
        let res = ReduceDirectSimulation::new(&two_call_sites(), &StringFactory, &CancelToken::new());
        assert!(matches!(res.err(), Some(AutomataError::Unsupported { .. })));
    }
}
