use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::{
    buchi::ReduceDirectSimulation,
    factory::StateFactory,
    minimization::{MinimizeNwaMaxSat, MinimizeOptions},
    nwa::{
        reachable::{RemoveDeadEnds, RemoveUnreachable},
        word::bounded_counterexample,
    },
    operation::{log_exit, log_start},
    AutomataError, CancelToken, Element, Nwa, Operation, Result, Show,
};

/// The reduction strategies known to [`CompareReductions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reduction {
    /// [`RemoveUnreachable`]
    RemoveUnreachable,
    /// [`RemoveDeadEnds`]
    RemoveDeadEnds,
    /// [`ReduceDirectSimulation`]
    DirectSimulation,
    /// [`MinimizeNwaMaxSat`]
    MaxSatBisimulation,
}

impl Reduction {
    /// Every strategy, in the order they are reported.
    pub const ALL: [Reduction; 4] = [
        Reduction::RemoveUnreachable,
        Reduction::RemoveDeadEnds,
        Reduction::DirectSimulation,
        Reduction::MaxSatBisimulation,
    ];

    /// A short name used in the report table.
    pub fn name(&self) -> &'static str {
        match self {
            Reduction::RemoveUnreachable => "unreachable",
            Reduction::RemoveDeadEnds => "dead ends",
            Reduction::DirectSimulation => "direct simulation",
            Reduction::MaxSatBisimulation => "maxsat bisimulation",
        }
    }

    fn run<S, L, F>(&self, input: &Nwa<S, L>, factory: &F, cancel: &CancelToken) -> Result<Nwa<S, L>>
    where
        S: Element,
        L: Element,
        F: StateFactory<S>,
    {
        Ok(match self {
            Reduction::RemoveUnreachable => RemoveUnreachable::new(input, cancel)?.into_result(),
            Reduction::RemoveDeadEnds => RemoveDeadEnds::new(input, cancel)?.into_result(),
            Reduction::DirectSimulation => {
                ReduceDirectSimulation::new(input, factory, cancel)?.into_result()
            }
            Reduction::MaxSatBisimulation => {
                MinimizeNwaMaxSat::new(input, factory, MinimizeOptions::default(), cancel)?.into_result()
            }
        })
    }
}

/// The outcome of one strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReductionReport {
    /// The strategy.
    pub reduction: Reduction,
    /// Number of states of the result, `None` if the strategy does not support the input.
    pub states: Option<usize>,
    /// Number of transitions of the result.
    pub transitions: Option<usize>,
    /// Wall clock time spent in the strategy.
    pub elapsed: Duration,
    /// `Some(true)` if input and result agree on all words up to the check depth,
    /// `Some(false)` if a distinguishing word was found.
    pub equivalent: Option<bool>,
}

/// Runs several reduction strategies on the same automaton and reports sizes, running
/// times and whether the results still accept the same short words.
pub struct CompareReductions<S: Element, L: Element> {
    input_states: usize,
    input_transitions: usize,
    reports: Vec<ReductionReport>,
    _marker: std::marker::PhantomData<(S, L)>,
}

impl<S: Element, L: Element> CompareReductions<S, L> {
    const NAME: &'static str = "compareReductions";

    /// Runs every strategy of `reductions` on `input` and compares the results with the
    /// input on all words of length at most `check_depth`. Strategies that do not support
    /// the input are reported without sizes.
    pub fn new<F: StateFactory<S>>(
        input: &Nwa<S, L>,
        factory: &F,
        reductions: &[Reduction],
        check_depth: usize,
        cancel: &CancelToken,
    ) -> Result<Self> {
        log_start::<Self>(Self::NAME);
        let mut reports = vec![];
        for reduction in reductions {
            cancel.check(Self::NAME)?;
            let start = Instant::now();
            let outcome = reduction.run(input, factory, cancel);
            let elapsed = start.elapsed();
            let report = match outcome {
                Ok(result) => {
                    let equivalent = bounded_counterexample(input, &result, check_depth, cancel)?.is_none();
                    if !equivalent {
                        warn!("{} changed the language", reduction.name());
                    }
                    ReductionReport {
                        reduction: *reduction,
                        states: Some(result.size()),
                        transitions: Some(result.transition_count()),
                        elapsed,
                        equivalent: Some(equivalent),
                    }
                }
                Err(AutomataError::Unsupported { reason, .. }) => {
                    debug!("skipping {}: {}", reduction.name(), reason);
                    ReductionReport {
                        reduction: *reduction,
                        states: None,
                        transitions: None,
                        elapsed,
                        equivalent: None,
                    }
                }
                Err(e) => return Err(e),
            };
            reports.push(report);
        }
        let op = Self {
            input_states: input.size(),
            input_transitions: input.transition_count(),
            reports,
            _marker: std::marker::PhantomData,
        };
        log_exit(&op);
        Ok(op)
    }

    /// The report of `reduction`, if it was run.
    pub fn report(&self, reduction: Reduction) -> Option<&ReductionReport> {
        self.reports.iter().find(|r| r.reduction == reduction)
    }

    /// The strategy with the smallest result; ties go to the strategy listed first.
    pub fn best(&self) -> Option<&ReductionReport> {
        self.reports
            .iter()
            .filter(|r| r.equivalent == Some(true))
            .min_by_key(|r| r.states)
    }
}

impl<S: Element, L: Element> Operation for CompareReductions<S, L> {
    type State = S;
    type Output = Vec<ReductionReport>;

    fn operation_name(&self) -> &'static str {
        Self::NAME
    }

    fn exit_message(&self) -> String {
        format!("Finished {}, ran {} strategies", Self::NAME, self.reports.len())
    }

    fn result(&self) -> &Vec<ReductionReport> {
        &self.reports
    }

    fn into_result(self) -> Vec<ReductionReport> {
        self.reports
    }

    fn check_result<F: StateFactory<Self::State>>(&self, _factory: &F) -> Result<bool> {
        match self.reports.iter().find(|r| r.equivalent == Some(false)) {
            Some(report) => Err(AutomataError::Verification {
                operation: Self::NAME,
                reason: format!("{} changed the language", report.reduction.name()),
            }),
            None => Ok(true),
        }
    }
}

impl<S: Element, L: Element> Show for CompareReductions<S, L> {
    fn show(&self) -> String {
        use owo_colors::OwoColorize;
        let mut b = tabled::builder::Builder::default();
        b.push_record(["strategy", "states", "transitions", "time", "equivalent"]);
        b.push_record([
            "input".dimmed().to_string(),
            self.input_states.to_string(),
            self.input_transitions.to_string(),
            String::new(),
            String::new(),
        ]);
        for report in &self.reports {
            let size = |n: Option<usize>| n.map_or_else(|| "-".to_string(), |n| n.to_string());
            let verdict = match report.equivalent {
                Some(true) => "yes".green().to_string(),
                Some(false) => "no".red().to_string(),
                None => "unsupported".dimmed().to_string(),
            };
            b.push_record([
                report.reduction.name().bold().to_string(),
                size(report.states),
                size(report.transitions),
                format!("{:?}", report.elapsed),
                verdict,
            ]);
        }
        b.build().with(tabled::settings::Style::ascii()).to_string()
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

    #[test_log::test]
    fn all_strategies_on_a_flat_automaton() {
        let nwa = NwaBuilder::internal(['a', 'b'])
            .with_initial(["q0"])
            .with_states(["q1", "q2", "dead", "lost"])
            .with_final(["q3"])
            .with_internal([
                ("q0", 'a', "q1"),
                ("q0", 'a', "q2"),
                ("q1", 'b', "q3"),
                ("q2", 'b', "q3"),
                ("q0", 'b', "dead"),
                ("lost", 'a', "q0"),
            ])
            .build()
            .unwrap();
        let op = CompareReductions::new(&nwa, &StringFactory, &Reduction::ALL, 4, &CancelToken::new())
            .unwrap();
        assert_eq!(op.result().len(), 4);
        assert_eq!(op.report(Reduction::RemoveUnreachable).unwrap().states, Some(5));
        assert_eq!(op.report(Reduction::RemoveDeadEnds).unwrap().states, Some(4));
        assert!(op.result().iter().all(|r| r.equivalent == Some(true)));
        assert!(op.best().unwrap().states <= Some(4));
        assert_eq!(op.check_result(&StringFactory), Ok(true));

        let table = op.show();
        assert!(table.contains("dead ends"));
        assert!(table.contains("maxsat bisimulation"));
    }

    #[test]
    fn nested_input_skips_simulation() {
        let nwa = two_call_sites();
        let op = CompareReductions::new(&nwa, &StringFactory, &Reduction::ALL, 5, &CancelToken::new())
            .unwrap();
        let simulation = op.report(Reduction::DirectSimulation).unwrap();
        assert_eq!(simulation.states, None);
        assert_eq!(simulation.equivalent, None);
        assert_eq!(op.report(Reduction::MaxSatBisimulation).unwrap().equivalent, Some(true));
        assert!(op.show().contains("unsupported"));
    }

    #[test]
    fn cancellation_stops_the_comparison() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let res = CompareReductions::new(&lasso_nwa(), &StringFactory, &Reduction::ALL, 3, &cancel);
        assert!(res.err().is_some_and(|e| e.is_cancelled()));
    }
}
