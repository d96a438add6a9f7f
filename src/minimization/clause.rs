use itertools::Itertools;

/// A boolean variable of the merge problem, one for every candidate pair of states.
pub type Atom = usize;

/// An atom or its negation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Literal {
    /// The atom.
    pub atom: Atom,
    /// `true` for the atom itself, `false` for its negation.
    pub positive: bool,
}

impl Literal {
    /// The literal `atom`.
    pub fn pos(atom: Atom) -> Self {
        Self {
            atom,
            positive: true,
        }
    }

    /// The literal `¬atom`.
    pub fn neg(atom: Atom) -> Self {
        Self {
            atom,
            positive: false,
        }
    }

    /// Value of the literal when its atom has value `value`.
    pub fn holds_for(&self, value: bool) -> bool {
        self.positive == value
    }
}

/// A disjunction of literals over distinct atoms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Clause {
    literals: Vec<Literal>,
}

impl Clause {
    /// Builds a clause, removing duplicate literals. Returns `None` for a tautology, i.e. if
    /// some atom occurs with both polarities.
    pub fn new(literals: impl IntoIterator<Item = Literal>) -> Option<Self> {
        let literals = literals.into_iter().sorted().dedup().collect_vec();
        if literals.iter().tuple_windows().any(|(l, r)| l.atom == r.atom) {
            return None;
        }
        Some(Self { literals })
    }

    /// The literals, sorted by atom.
    pub fn literals(&self) -> &[Literal] {
        &self.literals
    }

    /// Number of literals.
    pub fn len(&self) -> usize {
        self.literals.len()
    }

    /// `true` iff the clause has no literals and can never be satisfied.
    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }
}

/// Classification of a clause under a partial assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClauseStatus {
    /// Some literal is true.
    Satisfied,
    /// Every literal is false.
    Falsified,
    /// No literal is true and exactly one atom is unassigned, so that literal is implied.
    Unit,
    /// No literal is true and at least two atoms are unassigned.
    Undetermined,
}

/// Cached evaluation of one clause. It is updated whenever an atom of the clause is assigned
/// or unassigned, so the status of a clause is known without looking at its literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClauseCondition {
    status: ClauseStatus,
    unset_atoms: usize,
    true_literals: usize,
}

impl ClauseCondition {
    /// The condition of a clause with `len` literals under the empty assignment.
    pub fn new(len: usize) -> Self {
        Self {
            status: Self::classify(0, len),
            unset_atoms: len,
            true_literals: 0,
        }
    }

    /// Evaluates `clause` from scratch under `assignment`.
    pub fn recompute(clause: &Clause, assignment: &[Option<bool>]) -> Self {
        let mut unset_atoms = 0;
        let mut true_literals = 0;
        for literal in clause.literals() {
            match assignment[literal.atom] {
                None => unset_atoms += 1,
                Some(value) if literal.holds_for(value) => true_literals += 1,
                Some(_) => {}
            }
        }
        Self {
            status: Self::classify(true_literals, unset_atoms),
            unset_atoms,
            true_literals,
        }
    }

    fn classify(true_literals: usize, unset_atoms: usize) -> ClauseStatus {
        match unset_atoms {
            _ if true_literals > 0 => ClauseStatus::Satisfied,
            0 => ClauseStatus::Falsified,
            1 => ClauseStatus::Unit,
            _ => ClauseStatus::Undetermined,
        }
    }

    /// Records that one atom of the clause was assigned, making its literal `now_true`.
    pub fn assign(&mut self, now_true: bool) {
        debug_assert!(self.unset_atoms > 0);
        self.unset_atoms -= 1;
        if now_true {
            self.true_literals += 1;
        }
        self.status = Self::classify(self.true_literals, self.unset_atoms);
    }

    /// Records that one atom of the clause was unassigned, its literal was `was_true`.
    pub fn unassign(&mut self, was_true: bool) {
        self.unset_atoms += 1;
        if was_true {
            debug_assert!(self.true_literals > 0);
            self.true_literals -= 1;
        }
        self.status = Self::classify(self.true_literals, self.unset_atoms);
    }

    /// The current status.
    pub fn status(&self) -> ClauseStatus {
        self.status
    }

    /// Number of atoms of the clause that are unassigned.
    pub fn unset_atoms(&self) -> usize {
        self.unset_atoms
    }

    /// Number of literals that are currently true.
    pub fn true_literals(&self) -> usize {
        self.true_literals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tautologies_and_duplicates() {
        assert!(Clause::new([Literal::pos(0), Literal::neg(0)]).is_none());
        let clause = Clause::new([Literal::pos(2), Literal::neg(1), Literal::pos(2)]).unwrap();
        assert_eq!(clause.literals(), &[Literal::neg(1), Literal::pos(2)]);
    }

    #[test]
    fn status_transitions() {
        let mut condition = ClauseCondition::new(2);
        assert_eq!(condition.status(), ClauseStatus::Undetermined);
        condition.assign(false);
        assert_eq!(condition.status(), ClauseStatus::Unit);
        condition.assign(false);
        assert_eq!(condition.status(), ClauseStatus::Falsified);
        condition.unassign(false);
        condition.assign(true);
        assert_eq!(condition.status(), ClauseStatus::Satisfied);
        assert_eq!((condition.unset_atoms(), condition.true_literals()), (0, 1));
        assert_eq!(ClauseCondition::new(0).status(), ClauseStatus::Falsified);
    }
}
