//! State reduction by computing a maximal bisimulation with an incremental clause solver.
//!
//! Every unordered pair of distinct states that may be merged is an [`Atom`]. The clauses
//! generated by [`MergeProblem`] ensure that the atoms set to `true` form an equivalence
//! that is compatible with every internal, call and return transition. Merging the
//! classes of such an equivalence preserves the finite and the Büchi language.

use itertools::Itertools;
use tracing::{debug, warn};

use crate::{
    buchi::lasso_counterexample,
    factory::StateFactory,
    math::{Map, Partition},
    nwa::reachable::{check_bounded, DownState, NestedSearch, ReachableNwa, SearchStrategy},
    operation::{log_exit, log_start},
    AutomataError, CancelToken, Element, NestedWordAutomaton, Nwa, Operation, Result,
    StateId,
};

mod clause;
pub use clause::{Atom, Clause, ClauseCondition, ClauseStatus, Literal};

mod solver;
pub use solver::{Solver, SolverStats};

/// Options of [`MinimizeNwaMaxSat`].
#[derive(Debug, Clone)]
pub struct MinimizeOptions<S> {
    initial_partition: Option<Vec<Vec<S>>>,
    check_depth: usize,
}

impl<S> Default for MinimizeOptions<S> {
    fn default() -> Self {
        Self {
            initial_partition: None,
            check_depth: 6,
        }
    }
}

impl<S> MinimizeOptions<S> {
    /// Only states within the same block may be merged. States that are not mentioned
    /// are never merged.
    pub fn with_initial_partition(mut self, blocks: Vec<Vec<S>>) -> Self {
        self.initial_partition = Some(blocks);
        self
    }

    /// Length of the words compared by `check_result`.
    pub fn with_check_depth(mut self, depth: usize) -> Self {
        self.check_depth = depth;
        self
    }

    /// The configured check depth.
    pub fn check_depth(&self) -> usize {
        self.check_depth
    }
}

/// The value of the "same class" relation for a pair of states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairValue {
    /// The pair is a candidate, its value is the atom.
    Atom(Atom),
    /// A state paired with itself.
    Same,
    /// The states may never be merged.
    Never,
}

/// The atoms and clauses of the merge problem for the reachable part of an automaton.
pub struct MergeProblem<'n, S: Element, L: Element> {
    nwa: &'n Nwa<S, L>,
    /// hierarchical predecessors each state can be paired with in a reachable run
    down: Vec<Vec<StateId>>,
    pairs: Vec<(StateId, StateId)>,
    atoms: Map<(StateId, StateId), Atom>,
    clauses: Vec<Clause>,
}

impl<'n, S: Element, L: Element> MergeProblem<'n, S, L> {
    /// Registers an atom for every pair of distinct states with the same finality that lie
    /// in one block of `blocks`.
    pub fn new(reachable: &'n ReachableNwa<S, L>, blocks: &Partition<StateId>) -> Self {
        let nwa = reachable.nwa();
        let down = nwa
            .state_ids()
            .map(|q| {
                reachable
                    .down_states(q)
                    .filter_map(|(d, _)| match d {
                        DownState::State(h) => Some(h),
                        DownState::Bottom => None,
                    })
                    .collect()
            })
            .collect();
        let mut pairs = vec![];
        let mut atoms = Map::default();
        for (p, q) in nwa.state_ids().tuple_combinations() {
            if nwa.is_final_id(p) == nwa.is_final_id(q) && blocks.same_class(&p, &q) {
                atoms.insert((p, q), pairs.len());
                pairs.push((p, q));
            }
        }
        Self {
            nwa,
            down,
            pairs,
            atoms,
            clauses: vec![],
        }
    }

    /// Number of atoms.
    pub fn atom_count(&self) -> usize {
        self.pairs.len()
    }

    /// The pair of states standing behind `atom`.
    pub fn pair(&self, atom: Atom) -> Option<(StateId, StateId)> {
        self.pairs.get(atom).copied()
    }

    /// The generated clauses.
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    fn value(&self, p: StateId, q: StateId) -> PairValue {
        if p == q {
            return PairValue::Same;
        }
        match self.atoms.get(&(p.min(q), p.max(q))) {
            Some(atom) => PairValue::Atom(*atom),
            None => PairValue::Never,
        }
    }

    /// Adds `¬premise_1 ∨ .. ∨ ¬premise_k ∨ ⋁ candidates`. Candidates that are the same
    /// state satisfy the clause, candidates that may never be merged are dropped.
    fn implication(&mut self, premises: &[Atom], candidates: impl IntoIterator<Item = (StateId, StateId)>) {
        let mut literals = premises.iter().map(|a| Literal::neg(*a)).collect_vec();
        for (p, q) in candidates {
            match self.value(p, q) {
                PairValue::Same => return,
                PairValue::Atom(atom) => literals.push(Literal::pos(atom)),
                PairValue::Never => {}
            }
        }
        if let Some(clause) = Clause::new(literals) {
            self.clauses.push(clause);
        }
    }

    fn transitivity(&mut self, cancel: &CancelToken) -> Result<()> {
        let n = self.nwa.size();
        for (a, b, c) in (0..n).tuple_combinations() {
            cancel.check(MinimizeNwaMaxSat::<S, L>::NAME)?;
            // each of the three states once in the middle
            for (x, middle, y) in [(a, b, c), (b, a, c), (a, c, b)] {
                let (PairValue::Atom(left), PairValue::Atom(right)) =
                    (self.value(x, middle), self.value(middle, y))
                else {
                    continue;
                };
                let mut literals = vec![Literal::neg(left), Literal::neg(right)];
                if let PairValue::Atom(closing) = self.value(x, y) {
                    literals.push(Literal::pos(closing));
                }
                if let Some(clause) = Clause::new(literals) {
                    self.clauses.push(clause);
                }
            }
        }
        Ok(())
    }

    /// For merged `p` and `q`, every internal or call successor of `p` has to be merged
    /// with some successor of `q` under the same letter, and vice versa.
    fn successors(&mut self, cancel: &CancelToken) -> Result<()> {
        for atom in 0..self.pairs.len() {
            cancel.check(MinimizeNwaMaxSat::<S, L>::NAME)?;
            let (p, q) = self.pairs[atom];
            for (from, to) in [(p, q), (q, p)] {
                let internal = self
                    .nwa
                    .internal_out(from)
                    .map(|(a, targets)| (targets.clone(), self.nwa.internal_targets(to, a).cloned()));
                let calls = self
                    .nwa
                    .call_out(from)
                    .map(|(c, targets)| (targets.clone(), self.nwa.call_targets(to, c).cloned()));
                let steps = internal.chain(calls).collect_vec();
                for (targets, answers) in steps {
                    let answers = answers.unwrap_or_default();
                    for t in targets.iter() {
                        self.implication(&[atom], answers.iter().map(|u| (t, u)));
                    }
                }
            }
        }
        Ok(())
    }

    /// For a return `x1 -r/h1-> t`, merged `x1 ~ x2` and `h1 ~ h2` where `h2` can be on
    /// top of the stack while in `x2`, some return `x2 -r/h2-> u` has to lead to a state
    /// `u ~ t`. Linear and hierarchical predecessor may both be merged at once.
    fn returns(&mut self, cancel: &CancelToken) -> Result<()> {
        let transitions = self.nwa.return_transitions().collect_vec();
        for (x1, h1, r, t) in transitions {
            cancel.check(MinimizeNwaMaxSat::<S, L>::NAME)?;
            for x2 in self.nwa.state_ids() {
                let linear = match self.value(x1, x2) {
                    PairValue::Never => continue,
                    PairValue::Same => None,
                    PairValue::Atom(atom) => Some(atom),
                };
                for h2 in self.down[x2].clone() {
                    let hierarchical = match self.value(h1, h2) {
                        PairValue::Never => continue,
                        PairValue::Same => None,
                        PairValue::Atom(atom) => Some(atom),
                    };
                    if linear.is_none() && hierarchical.is_none() {
                        continue;
                    }
                    let premises = linear.into_iter().chain(hierarchical).collect_vec();
                    let answers = self.nwa.return_targets(x2, h2, r).cloned().unwrap_or_default();
                    self.implication(&premises, answers.iter().map(|u| (t, u)));
                }
            }
        }
        Ok(())
    }

    /// Generates every clause.
    pub fn generate(&mut self, cancel: &CancelToken) -> Result<()> {
        self.transitivity(cancel)?;
        self.successors(cancel)?;
        self.returns(cancel)?;
        debug!(
            "merge problem has {} atoms and {} clauses",
            self.pairs.len(),
            self.clauses.len()
        );
        Ok(())
    }
}

/// Reduces an automaton by merging the states of a bisimulation found by a clause solver.
/// The solver always tries to merge first, so the result is a maximal, though not
/// necessarily coarsest, bisimulation quotient.
pub struct MinimizeNwaMaxSat<S: Element, L: Element> {
    input: Nwa<S, L>,
    partition: Partition<StateId>,
    result: Nwa<S, L>,
    check_depth: usize,
    cancel: CancelToken,
    stats: SolverStats,
}

impl<S: Element, L: Element> MinimizeNwaMaxSat<S, L> {
    const NAME: &'static str = "minimizeNwaMaxSat";

    /// Minimizes the reachable part of `input`.
    pub fn new<A, F>(input: &A, factory: &F, options: MinimizeOptions<S>, cancel: &CancelToken) -> Result<Self>
    where
        A: NestedWordAutomaton<State = S, Letter = L>,
        F: StateFactory<S>,
    {
        log_start::<Self>(Self::NAME);
        let reachable = NestedSearch::new(input, SearchStrategy::BreadthFirst, cancel, Self::NAME)
            .into_reachable()?;
        let input = reachable.nwa();
        let blocks = match &options.initial_partition {
            None => Partition::new([input.state_ids()]),
            Some(blocks) => Partition::new(
                blocks
                    .iter()
                    .map(|block| block.iter().filter_map(|s| input.id_of(s)).collect_vec()),
            ),
        };

        let mut problem = MergeProblem::new(&reachable, &blocks);
        problem.generate(cancel)?;
        let mut solver = Solver::new(problem.atom_count());
        for clause in problem.clauses() {
            solver.add_clause(clause.clone())?;
        }
        let merged = match solver.solve(cancel, Self::NAME)? {
            Some(model) => model
                .iter()
                .enumerate()
                .filter(|(_, value)| **value)
                .filter_map(|(atom, _)| problem.pair(atom))
                .collect_vec(),
            None => {
                warn!("no consistent merge found, keeping every state");
                vec![]
            }
        };
        let partition = Partition::from_pairs(input.size(), merged);
        let result = input.quotient(&partition, |block| factory.merge(block))?;

        let op = Self {
            input: input.clone(),
            partition,
            result,
            check_depth: options.check_depth,
            cancel: cancel.clone(),
            stats: solver.stats(),
        };
        log_exit(&op);
        Ok(op)
    }

    /// The explored input, [`MinimizeNwaMaxSat::partition`] refers to its state ids.
    pub fn input(&self) -> &Nwa<S, L> {
        &self.input
    }

    /// The merged classes, over the state ids of the explored input.
    pub fn partition(&self) -> &Partition<StateId> {
        &self.partition
    }

    /// Statistics of the clause search.
    pub fn stats(&self) -> SolverStats {
        self.stats
    }
}

impl<S: Element, L: Element> Operation for MinimizeNwaMaxSat<S, L> {
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
        if self.result.size() > self.input.size() {
            return Err(AutomataError::Verification {
                operation: Self::NAME,
                reason: "result is larger than the input".into(),
            });
        }
        check_bounded(Self::NAME, &self.input, &self.result, self.check_depth, &self.cancel)?;
        if self.input.alphabet().is_flat() {
            let counterexample = lasso_counterexample(self.input.alphabet(), &self.cancel, |stem, cycle| {
                Ok(self.input.accepts_lasso(stem, cycle)? == self.result.accepts_lasso(stem, cycle)?)
            })?;
            if let Some((stem, cycle)) = counterexample {
                return Err(AutomataError::Verification {
                    operation: Self::NAME,
                    reason: format!("quotient changes the verdict on {stem:?}({cycle:?})^ω"),
                });
            }
        }
        Ok(true)
    }
}
