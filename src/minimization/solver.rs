use std::collections::VecDeque;

use tracing::{debug, trace};

use super::clause::{Atom, Clause, ClauseCondition, ClauseStatus, Literal};
use crate::{AutomataError, CancelToken, Result};

/// One entry of the assignment trail.
#[derive(Debug, Clone, Copy)]
struct TrailEntry {
    atom: Atom,
    /// `true` if the value was guessed and the opposite value has not been tried yet.
    decision: bool,
}

/// Counters reported after a search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SolverStats {
    /// Number of guessed assignments.
    pub decisions: usize,
    /// Number of assignments implied by unit clauses.
    pub propagations: usize,
    /// Number of falsified clauses encountered.
    pub conflicts: usize,
}

/// An incremental satisfiability solver over a fixed set of atoms. Every clause keeps a
/// [`ClauseCondition`] that is updated through occurrence lists on each (un)assignment,
/// unit clauses are propagated through a queue and conflicts are resolved by chronological
/// backtracking to the most recent decision.
///
/// Decisions always pick the unassigned atom with the lowest id and try `true` first, so
/// the model found is deterministic and maximal in the sense that no atom assigned `false`
/// could be flipped on its own.
pub struct Solver {
    atoms: usize,
    clauses: Vec<Clause>,
    conditions: Vec<ClauseCondition>,
    /// `atom -> [(clause, polarity of the atom in the clause)]`
    occurrences: Vec<Vec<(usize, bool)>>,
    assignment: Vec<Option<bool>>,
    trail: Vec<TrailEntry>,
    units: VecDeque<usize>,
    conflict: bool,
    stats: SolverStats,
}

impl Solver {
    /// A solver over atoms `0..atoms` without clauses.
    pub fn new(atoms: usize) -> Self {
        Self {
            atoms,
            clauses: vec![],
            conditions: vec![],
            occurrences: vec![vec![]; atoms],
            assignment: vec![None; atoms],
            trail: vec![],
            units: VecDeque::new(),
            conflict: false,
            stats: SolverStats::default(),
        }
    }

    /// Number of atoms.
    pub fn atom_count(&self) -> usize {
        self.atoms
    }

    /// Number of clauses added so far.
    pub fn clause_count(&self) -> usize {
        self.clauses.len()
    }

    /// Search statistics.
    pub fn stats(&self) -> SolverStats {
        self.stats
    }

    /// The current value of `atom`.
    pub fn value(&self, atom: Atom) -> Option<bool> {
        self.assignment.get(atom).copied().flatten()
    }

    /// The cached condition of clause `clause`.
    pub fn condition(&self, clause: usize) -> Option<&ClauseCondition> {
        self.conditions.get(clause)
    }

    /// Adds a clause. The clause is evaluated against the current assignment.
    pub fn add_clause(&mut self, clause: Clause) -> Result<()> {
        if let Some(bad) = clause.literals().iter().find(|l| l.atom >= self.atoms) {
            return Err(AutomataError::UnregisteredAtom(bad.atom));
        }
        let id = self.clauses.len();
        for literal in clause.literals() {
            self.occurrences[literal.atom].push((id, literal.positive));
        }
        let condition = ClauseCondition::recompute(&clause, &self.assignment);
        self.note_status(id, condition.status());
        self.conditions.push(condition);
        self.clauses.push(clause);
        Ok(())
    }

    fn note_status(&mut self, clause: usize, status: ClauseStatus) {
        match status {
            ClauseStatus::Unit => self.units.push_back(clause),
            ClauseStatus::Falsified => self.conflict = true,
            ClauseStatus::Satisfied | ClauseStatus::Undetermined => {}
        }
    }

    /// Assigns `value` to the unassigned `atom` and updates every clause containing it.
    pub(crate) fn assign(&mut self, atom: Atom, value: bool, decision: bool) {
        debug_assert!(self.assignment[atom].is_none());
        self.assignment[atom] = Some(value);
        self.trail.push(TrailEntry { atom, decision });
        for i in 0..self.occurrences[atom].len() {
            let (clause, positive) = self.occurrences[atom][i];
            self.conditions[clause].assign(positive == value);
            let status = self.conditions[clause].status();
            self.note_status(clause, status);
        }
    }

    /// Removes the value of the most recently assigned atom.
    pub(crate) fn unassign_last(&mut self) -> Option<TrailEntryView> {
        let entry = self.trail.pop()?;
        let value = self.assignment[entry.atom].take()?;
        for &(clause, positive) in &self.occurrences[entry.atom] {
            self.conditions[clause].unassign(positive == value);
        }
        Some(TrailEntryView {
            atom: entry.atom,
            value,
            decision: entry.decision,
        })
    }

    /// The unassigned literal of a unit clause.
    fn implied_literal(&self, clause: usize) -> Option<Literal> {
        self.clauses[clause]
            .literals()
            .iter()
            .find(|l| self.assignment[l.atom].is_none())
            .copied()
    }

    /// Propagates unit clauses until a fixpoint or a conflict is reached. Returns `false`
    /// on a conflict.
    fn propagate(&mut self) -> bool {
        while !self.conflict {
            let Some(clause) = self.units.pop_front() else {
                return true;
            };
            if self.conditions[clause].status() != ClauseStatus::Unit {
                continue;
            }
            let Some(literal) = self.implied_literal(clause) else {
                continue;
            };
            trace!("clause {} implies {:?}", clause, literal);
            self.stats.propagations += 1;
            self.assign(literal.atom, literal.positive, false);
        }
        false
    }

    /// Undoes assignments up to the most recent open decision and flips it. Returns
    /// `false` if there is no such decision left.
    fn backtrack(&mut self) -> bool {
        self.stats.conflicts += 1;
        self.units.clear();
        self.conflict = false;
        while let Some(entry) = self.unassign_last() {
            if entry.decision {
                trace!("backtracking, {} becomes {}", entry.atom, !entry.value);
                self.assign(entry.atom, !entry.value, false);
                return true;
            }
        }
        false
    }

    /// Searches a model extending the current assignment. On success every atom is
    /// assigned and the values are returned, `Ok(None)` means the clauses are
    /// unsatisfiable.
    pub fn solve(&mut self, cancel: &CancelToken, operation: &'static str) -> Result<Option<Vec<bool>>> {
        loop {
            cancel.check(operation)?;
            if !self.propagate() {
                if !self.backtrack() {
                    debug!("clauses are unsatisfiable, {:?}", self.stats);
                    return Ok(None);
                }
                continue;
            }
            match self.assignment.iter().position(Option::is_none) {
                Some(atom) => {
                    self.stats.decisions += 1;
                    self.assign(atom, true, true);
                }
                None => {
                    debug!("found model, {:?}", self.stats);
                    return Ok(Some(self.assignment.iter().map(|v| v.unwrap_or(false)).collect()));
                }
            }
        }
    }
}

/// An assignment removed from the trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TrailEntryView {
    pub(crate) atom: Atom,
    pub(crate) value: bool,
    pub(crate) decision: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause(literals: &[(Atom, bool)]) -> Clause {
        Clause::new(literals.iter().map(|&(atom, positive)| Literal { atom, positive })).unwrap()
    }

    fn sample() -> Solver {
        let mut solver = Solver::new(4);
        solver.add_clause(clause(&[(0, false), (1, true)])).unwrap();
        solver.add_clause(clause(&[(1, false), (2, false)])).unwrap();
        solver.add_clause(clause(&[(0, false), (2, true), (3, true)])).unwrap();
        solver.add_clause(clause(&[(3, false), (1, false)])).unwrap();
        solver
    }

    #[test]
    fn cached_conditions_match_recomputation() {
        let mut solver = sample();
        // a fixed interleaving of assignments and retractions
        let steps = [(0, true), (2, false), (1, true), (3, false)];
        for round in 0..3 {
            for &(atom, value) in &steps[..=round] {
                if solver.value(atom).is_none() {
                    solver.assign(atom, value ^ (round == 1), false);
                }
                for (i, clause) in solver.clauses.iter().enumerate() {
                    let fresh = ClauseCondition::recompute(clause, &solver.assignment);
                    assert_eq!(solver.conditions[i], fresh);
                    let satisfied = clause
                        .literals()
                        .iter()
                        .any(|l| solver.assignment[l.atom] == Some(l.positive));
                    assert_eq!(fresh.status() == ClauseStatus::Satisfied, satisfied);
                }
            }
            while solver.unassign_last().is_some() {
                for (i, clause) in solver.clauses.iter().enumerate() {
                    assert_eq!(
                        solver.conditions[i],
                        ClauseCondition::recompute(clause, &solver.assignment)
                    );
                }
            }
        }
    }

    fn assert_conditions_fresh(solver: &Solver) {
        for (i, clause) in solver.clauses.iter().enumerate() {
            let fresh = ClauseCondition::recompute(clause, &solver.assignment);
            assert_eq!(solver.conditions[i], fresh, "clause {i}");
            let unset = clause
                .literals()
                .iter()
                .filter(|l| solver.assignment[l.atom].is_none())
                .count();
            assert_eq!(fresh.unset_atoms(), unset);
            let satisfied = clause
                .literals()
                .iter()
                .any(|l| solver.assignment[l.atom] == Some(l.positive));
            assert_eq!(fresh.status() == ClauseStatus::Satisfied, satisfied);
        }
    }

    #[cfg(feature = "random")]
    #[test]
    fn cached_conditions_survive_random_interleavings() {
        let cancel = CancelToken::new();
        for seed in 0..50 {
            let mut rng = fastrand::Rng::with_seed(seed);
            let atoms = 6;
            let mut solver = Solver::new(atoms);
            for _ in 0..9 {
                let len = rng.usize(1..=3);
                let literals = (0..len).map(|_| Literal {
                    atom: rng.usize(..atoms),
                    positive: rng.bool(),
                });
                if let Some(clause) = Clause::new(literals) {
                    solver.add_clause(clause).unwrap();
                }
            }
            assert_conditions_fresh(&solver);
            for _ in 0..40 {
                match rng.usize(..5) {
                    0 => {
                        let open = (0..atoms).filter(|a| solver.value(*a).is_none()).collect::<Vec<_>>();
                        if !open.is_empty() {
                            let atom = open[rng.usize(..open.len())];
                            solver.assign(atom, rng.bool(), rng.bool());
                        }
                    }
                    1 => {
                        solver.propagate();
                    }
                    2 => {
                        solver.unassign_last();
                    }
                    3 => {
                        solver.backtrack();
                    }
                    _ => {
                        solver.solve(&cancel, "test").unwrap();
                    }
                }
                assert_conditions_fresh(&solver);
            }
        }
    }

    #[test]
    fn merges_as_much_as_possible() {
        let mut solver = sample();
        let model = solver.solve(&CancelToken::new(), "test").unwrap().unwrap();
        // 0 = true forces 1, which excludes 2 and 3, violating the third clause
        assert_eq!(model, vec![false, true, false, false]);
        assert!(solver.stats().conflicts >= 1);
    }

    #[test]
    fn unsatisfiable_and_unregistered() {
        let mut solver = Solver::new(1);
        solver.add_clause(clause(&[(0, true)])).unwrap();
        solver.add_clause(clause(&[(0, false)])).unwrap();
        assert_eq!(solver.solve(&CancelToken::new(), "test"), Ok(None));
        assert_eq!(
            solver.add_clause(clause(&[(5, true)])),
            Err(AutomataError::UnregisteredAtom(5))
        );
    }
}
