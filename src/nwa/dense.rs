use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;

use crate::{
    alphabet::LetterKind, indexer::Indexer, intset::IntSet, math::Partition, AutomataError, Element, LetterId,
    NestedAlphabet, NestedWordAutomaton, Result, StateId,
};

/// Outgoing and incoming transitions of a single state.
#[derive(Clone, Debug, Default)]
struct StateTables {
    internal_out: BTreeMap<LetterId, IntSet>,
    internal_in: BTreeMap<LetterId, IntSet>,
    call_out: BTreeMap<LetterId, IntSet>,
    call_in: BTreeMap<LetterId, IntSet>,
    /// `(hier, letter) -> successors` for returns leaving this state.
    return_out: BTreeMap<(StateId, LetterId), IntSet>,
    /// `letter -> {(linear predecessor, hier)}` for returns entering this state.
    return_in: BTreeMap<LetterId, BTreeSet<(StateId, StateId)>>,
    /// `letter -> {(linear predecessor, successor)}` for returns that use this state as
    /// hierarchical predecessor.
    return_hier: BTreeMap<LetterId, BTreeSet<(StateId, StateId)>>,
}

/// A nested-word automaton stored densely. States are registered in an [`Indexer`] and
/// every state owns forward and backward tables for all three transition kinds, so
/// successor and predecessor queries as well as `is_initial_id`/`is_final_id` are cheap.
///
/// A [`Nwa`] is usually obtained by exploring some [`NestedWordAutomaton`] (see
/// [`crate::nwa::reachable::NestedSearch`]) or through an [`crate::NwaBuilder`].
#[derive(Clone)]
pub struct Nwa<S: Element, L: Element> {
    alphabet: NestedAlphabet<L>,
    states: Indexer<S>,
    initial: IntSet,
    finals: IntSet,
    tables: Vec<StateTables>,
}

impl<S: Element, L: Element> Nwa<S, L> {
    /// Creates an automaton over `alphabet` without any states.
    pub fn new(alphabet: NestedAlphabet<L>) -> Self {
        Self {
            alphabet,
            states: Indexer::new(),
            initial: IntSet::new(),
            finals: IntSet::new(),
            tables: vec![],
        }
    }

    /// The alphabet.
    pub fn alphabet(&self) -> &NestedAlphabet<L> {
        &self.alphabet
    }

    /// Number of states.
    pub fn size(&self) -> usize {
        self.tables.len()
    }

    /// Ids of all states.
    pub fn state_ids(&self) -> std::ops::Range<StateId> {
        0..self.size()
    }

    /// The state with id `q`.
    pub fn state(&self, q: StateId) -> Option<&S> {
        self.states.get(q)
    }

    /// The id of `state`, if it belongs to the automaton.
    pub fn id_of(&self, state: &S) -> Option<StateId> {
        self.states.id_of(state)
    }

    fn expect_id(&self, state: &S) -> Result<StateId> {
        self.id_of(state)
            .ok_or_else(|| AutomataError::UnknownState(format!("{state:?}")))
    }

    fn check_id(&self, q: StateId) -> Result<()> {
        if q < self.size() {
            Ok(())
        } else {
            Err(AutomataError::InvalidStateId(q))
        }
    }

    fn check_letter(&self, a: LetterId, expected: LetterKind) -> Result<()> {
        match self.alphabet.kind(a) {
            None => Err(AutomataError::InvalidLetterId(a)),
            Some(kind) if kind != expected => Err(AutomataError::WrongLetterKind {
                letter: format!("{:?}", self.alphabet.letter(a)),
                expected: expected.name(),
                actual: kind.name(),
            }),
            Some(_) => Ok(()),
        }
    }

    /// Adds `state`. If the state is already known, it keeps its id and the given flags are
    /// added to the ones it already has.
    pub fn add_state(&mut self, state: S, initial: bool, is_final: bool) -> StateId {
        let (q, fresh) = self.states.register(state);
        if fresh {
            self.tables.push(StateTables::default());
        }
        if initial {
            self.initial.set(q);
        }
        if is_final {
            self.finals.set(q);
        }
        q
    }

    /// Marks `q` as initial.
    pub fn set_initial(&mut self, q: StateId) -> Result<()> {
        self.check_id(q)?;
        self.initial.set(q);
        Ok(())
    }

    /// `true` iff `q` is initial.
    pub fn is_initial_id(&self, q: StateId) -> bool {
        self.initial.get(q)
    }

    /// `true` iff `q` is final.
    pub fn is_final_id(&self, q: StateId) -> bool {
        self.finals.get(q)
    }

    /// Ids of the initial states.
    pub fn initial_ids(&self) -> &IntSet {
        &self.initial
    }

    /// Ids of the final states.
    pub fn final_ids(&self) -> &IntSet {
        &self.finals
    }

    /// Adds the internal transition `p -a-> q` given by ids.
    pub fn add_internal_ids(&mut self, p: StateId, a: LetterId, q: StateId) -> Result<()> {
        self.check_id(p)?;
        self.check_id(q)?;
        self.check_letter(a, LetterKind::Internal)?;
        self.tables[p].internal_out.entry(a).or_default().set(q);
        self.tables[q].internal_in.entry(a).or_default().set(p);
        Ok(())
    }

    /// Adds the call transition `p -c-> q` given by ids.
    pub fn add_call_ids(&mut self, p: StateId, c: LetterId, q: StateId) -> Result<()> {
        self.check_id(p)?;
        self.check_id(q)?;
        self.check_letter(c, LetterKind::Call)?;
        self.tables[p].call_out.entry(c).or_default().set(q);
        self.tables[q].call_in.entry(c).or_default().set(p);
        Ok(())
    }

    /// Adds the return transition from `p` to `q` under `r` with hierarchical
    /// predecessor `h`, given by ids.
    pub fn add_return_ids(&mut self, p: StateId, h: StateId, r: LetterId, q: StateId) -> Result<()> {
        self.check_id(p)?;
        self.check_id(h)?;
        self.check_id(q)?;
        self.check_letter(r, LetterKind::Return)?;
        self.tables[p].return_out.entry((h, r)).or_default().set(q);
        self.tables[q].return_in.entry(r).or_default().insert((p, h));
        self.tables[h].return_hier.entry(r).or_default().insert((p, q));
        Ok(())
    }

    /// Adds the internal transition `p -a-> q`, all objects must already be known.
    pub fn add_internal(&mut self, p: &S, a: &L, q: &S) -> Result<()> {
        let a = self.alphabet.expect_kind(a, LetterKind::Internal)?;
        let (p, q) = (self.expect_id(p)?, self.expect_id(q)?);
        self.add_internal_ids(p, a, q)
    }

    /// Adds the call transition `p -c-> q`, all objects must already be known.
    pub fn add_call(&mut self, p: &S, c: &L, q: &S) -> Result<()> {
        let c = self.alphabet.expect_kind(c, LetterKind::Call)?;
        let (p, q) = (self.expect_id(p)?, self.expect_id(q)?);
        self.add_call_ids(p, c, q)
    }

    /// Adds the return transition `p -r/h-> q`, all objects must already be known.
    pub fn add_return(&mut self, p: &S, h: &S, r: &L, q: &S) -> Result<()> {
        let r = self.alphabet.expect_kind(r, LetterKind::Return)?;
        let (p, h, q) = (self.expect_id(p)?, self.expect_id(h)?, self.expect_id(q)?);
        self.add_return_ids(p, h, r, q)
    }

    /// Internal successors of `q` under `a`.
    pub fn internal_targets(&self, q: StateId, a: LetterId) -> Option<&IntSet> {
        self.tables.get(q)?.internal_out.get(&a)
    }

    /// Call successors of `q` under `c`.
    pub fn call_targets(&self, q: StateId, c: LetterId) -> Option<&IntSet> {
        self.tables.get(q)?.call_out.get(&c)
    }

    /// Return successors of `q` under `r` with hierarchical predecessor `h`.
    pub fn return_targets(&self, q: StateId, h: StateId, r: LetterId) -> Option<&IntSet> {
        self.tables.get(q)?.return_out.get(&(h, r))
    }

    /// Outgoing internal transitions of `q` grouped by letter.
    pub fn internal_out(&self, q: StateId) -> impl Iterator<Item = (LetterId, &IntSet)> + '_ {
        self.tables[q].internal_out.iter().map(|(a, s)| (*a, s))
    }

    /// Incoming internal transitions of `q` grouped by letter.
    pub fn internal_in(&self, q: StateId) -> impl Iterator<Item = (LetterId, &IntSet)> + '_ {
        self.tables[q].internal_in.iter().map(|(a, s)| (*a, s))
    }

    /// Outgoing call transitions of `q` grouped by letter.
    pub fn call_out(&self, q: StateId) -> impl Iterator<Item = (LetterId, &IntSet)> + '_ {
        self.tables[q].call_out.iter().map(|(a, s)| (*a, s))
    }

    /// Incoming call transitions of `q` grouped by letter.
    pub fn call_in(&self, q: StateId) -> impl Iterator<Item = (LetterId, &IntSet)> + '_ {
        self.tables[q].call_in.iter().map(|(a, s)| (*a, s))
    }

    /// Outgoing return transitions of `q` as `(hier, letter, successors)`.
    pub fn return_out(
        &self,
        q: StateId,
    ) -> impl Iterator<Item = (StateId, LetterId, &IntSet)> + '_ {
        self.tables[q]
            .return_out
            .iter()
            .map(|((h, r), s)| (*h, *r, s))
    }

    /// Incoming return transitions of `q` as `(linear predecessor, hier, letter)`.
    pub fn return_in(&self, q: StateId) -> impl Iterator<Item = (StateId, StateId, LetterId)> + '_ {
        self.tables[q]
            .return_in
            .iter()
            .flat_map(|(r, preds)| preds.iter().map(move |(p, h)| (*p, *h, *r)))
    }

    /// Return transitions using `h` as hierarchical predecessor, as
    /// `(linear predecessor, letter, successor)`.
    pub fn return_as_hier(
        &self,
        h: StateId,
    ) -> impl Iterator<Item = (StateId, LetterId, StateId)> + '_ {
        self.tables[h]
            .return_hier
            .iter()
            .flat_map(|(r, pairs)| pairs.iter().map(move |(p, q)| (*p, *r, *q)))
    }

    /// All internal transitions `(p, a, q)`.
    pub fn internal_transitions(&self) -> impl Iterator<Item = (StateId, LetterId, StateId)> + '_ {
        self.state_ids().flat_map(move |p| {
            self.internal_out(p)
                .flat_map(move |(a, targets)| targets.iter().map(move |q| (p, a, q)))
        })
    }

    /// All call transitions `(p, c, q)`.
    pub fn call_transitions(&self) -> impl Iterator<Item = (StateId, LetterId, StateId)> + '_ {
        self.state_ids().flat_map(move |p| {
            self.call_out(p)
                .flat_map(move |(c, targets)| targets.iter().map(move |q| (p, c, q)))
        })
    }

    /// All return transitions `(p, h, r, q)`.
    pub fn return_transitions(
        &self,
    ) -> impl Iterator<Item = (StateId, StateId, LetterId, StateId)> + '_ {
        self.state_ids().flat_map(move |p| {
            self.return_out(p)
                .flat_map(move |(h, r, targets)| targets.iter().map(move |q| (p, h, r, q)))
        })
    }

    /// Total number of transitions of all three kinds.
    pub fn transition_count(&self) -> usize {
        self.internal_transitions().count()
            + self.call_transitions().count()
            + self.return_transitions().count()
    }

    /// Builds the sub-automaton induced by the states in `keep`. States keep their
    /// relative order, transitions touching a removed state are dropped.
    pub fn induced(&self, keep: &IntSet) -> Nwa<S, L> {
        let mut out = Nwa::new(self.alphabet.clone());
        let mut map = vec![None; self.size()];
        for q in keep.iter() {
            if let Some(state) = self.states.get(q).cloned() {
                map[q] = Some(out.add_state(state, self.is_initial_id(q), self.is_final_id(q)));
            }
        }
        self.copy_transitions(&mut out, &map);
        out
    }

    /// Relabels every state through `f`, which has to be injective. Two states mapped
    /// to the same object give [`AutomataError::DuplicateState`].
    pub fn map_states<T: Element>(&self, mut f: impl FnMut(StateId, &S) -> T) -> Result<Nwa<T, L>> {
        let mut out = Nwa::new(self.alphabet.clone());
        let mut map = Vec::with_capacity(self.size());
        for (q, s) in self.states.iter() {
            let label = f(q, s);
            if out.id_of(&label).is_some() {
                return Err(AutomataError::DuplicateState(format!("{label:?}")));
            }
            map.push(Some(out.add_state(label, self.is_initial_id(q), self.is_final_id(q))));
        }
        self.copy_transitions(&mut out, &map);
        Ok(out)
    }

    /// Merges the states of every block of `partition` into one state labelled by
    /// `merge`, which receives the members of a block sorted by id. A block is initial if
    /// some member is, every block is expected to agree on finality. Blocks are keyed
    /// by their class, so two blocks that `merge` labels alike give
    /// [`AutomataError::DuplicateState`] instead of being fused.
    pub fn quotient(
        &self,
        partition: &Partition<StateId>,
        merge: impl Fn(&[&S]) -> S,
    ) -> Result<Nwa<S, L>> {
        let classes = partition.class_map(self.size());
        let labels = partition
            .iter()
            .map(|block| {
                let members = block.iter().filter_map(|q| self.state(*q)).collect_vec();
                merge(&members)
            })
            .collect_vec();
        let mut out = Nwa::new(self.alphabet.clone());
        let mut block_ids = vec![None; labels.len()];
        let mut map = Vec::with_capacity(self.size());
        for (q, s) in self.states.iter() {
            let (label, class) = match classes[q] {
                Some(class) => (&labels[class], Some(class)),
                None => (s, None),
            };
            let id = match class.and_then(|c| block_ids[c]) {
                Some(id) => id,
                None => {
                    if out.id_of(label).is_some() {
                        return Err(AutomataError::DuplicateState(format!("{label:?}")));
                    }
                    let id = out.add_state(label.clone(), false, false);
                    if let Some(c) = class {
                        block_ids[c] = Some(id);
                    }
                    id
                }
            };
            if self.is_initial_id(q) {
                out.initial.set(id);
            }
            if self.is_final_id(q) {
                out.finals.set(id);
            }
            map.push(Some(id));
        }
        self.copy_transitions(&mut out, &map);
        Ok(out)
    }

    fn copy_transitions<T: Element>(&self, out: &mut Nwa<T, L>, map: &[Option<StateId>]) {
        for (p, a, q) in self.internal_transitions() {
            if let (Some(p), Some(q)) = (map[p], map[q]) {
                out.tables[p].internal_out.entry(a).or_default().set(q);
                out.tables[q].internal_in.entry(a).or_default().set(p);
            }
        }
        for (p, c, q) in self.call_transitions() {
            if let (Some(p), Some(q)) = (map[p], map[q]) {
                out.tables[p].call_out.entry(c).or_default().set(q);
                out.tables[q].call_in.entry(c).or_default().set(p);
            }
        }
        for (p, h, r, q) in self.return_transitions() {
            if let (Some(p), Some(h), Some(q)) = (map[p], map[h], map[q]) {
                out.tables[p].return_out.entry((h, r)).or_default().set(q);
                out.tables[q].return_in.entry(r).or_default().insert((p, h));
                out.tables[h].return_hier.entry(r).or_default().insert((p, q));
            }
        }
    }

    fn labels(&self, ids: Option<&IntSet>) -> Vec<S> {
        ids.map(|set| {
            set.iter()
                .filter_map(|q| self.states.get(q).cloned())
                .collect()
        })
        .unwrap_or_default()
    }
}

impl<S: Element, L: Element> NestedWordAutomaton for Nwa<S, L> {
    type State = S;
    type Letter = L;

    fn alphabet(&self) -> &NestedAlphabet<L> {
        &self.alphabet
    }

    fn initial_states(&self) -> Vec<S> {
        self.initial
            .iter()
            .filter_map(|q| self.states.get(q).cloned())
            .collect()
    }

    fn is_final(&self, state: &S) -> bool {
        self.id_of(state).is_some_and(|q| self.is_final_id(q))
    }

    fn internal_successors(&self, state: &S, letter: &L) -> Vec<S> {
        match (self.id_of(state), self.alphabet.id_of(letter)) {
            (Some(q), Some(a)) => self.labels(self.internal_targets(q, a)),
            _ => vec![],
        }
    }

    fn call_successors(&self, state: &S, letter: &L) -> Vec<S> {
        match (self.id_of(state), self.alphabet.id_of(letter)) {
            (Some(q), Some(c)) => self.labels(self.call_targets(q, c)),
            _ => vec![],
        }
    }

    fn return_successors(&self, state: &S, hier: &S, letter: &L) -> Vec<S> {
        match (self.id_of(state), self.id_of(hier), self.alphabet.id_of(letter)) {
            (Some(q), Some(h), Some(r)) => self.labels(self.return_targets(q, h, r)),
            _ => vec![],
        }
    }
}

impl<S: Element, L: Element> std::fmt::Debug for Nwa<S, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = |q: StateId| self.states.get(q).map_or_else(|| q.to_string(), |s| format!("{s:?}"));
        let letter = |a: LetterId| {
            self.alphabet
                .letter(a)
                .map_or_else(|| a.to_string(), |l| format!("{l:?}"))
        };
        writeln!(f, "NWA over {:?}", self.alphabet)?;
        for q in self.state_ids() {
            writeln!(
                f,
                "  {}{}{}",
                name(q),
                if self.is_initial_id(q) { " initial" } else { "" },
                if self.is_final_id(q) { " final" } else { "" }
            )?;
        }
        for (p, a, q) in self.internal_transitions() {
            writeln!(f, "  {} -{}-> {}", name(p), letter(a), name(q))?;
        }
        for (p, c, q) in self.call_transitions() {
            writeln!(f, "  {} -<{}-> {}", name(p), letter(c), name(q))?;
        }
        for (p, h, r, q) in self.return_transitions() {
            writeln!(f, "  {} -{}>/{}-> {}", name(p), letter(r), name(h), name(q))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use crate::{
        math::Partition,
        tests::{lasso_nwa, two_call_sites},
        AutomataError, IntSet, NestedWordAutomaton,
    };

    #[test]
    fn forward_and_backward_tables_agree() {
        let nwa = two_call_sites();
        for (p, a, q) in nwa.internal_transitions() {
            assert!(nwa.internal_in(q).any(|(b, preds)| b == a && preds.get(p)));
        }
        for (p, c, q) in nwa.call_transitions() {
            assert!(nwa.call_in(q).any(|(b, preds)| b == c && preds.get(p)));
        }
        for (p, h, r, q) in nwa.return_transitions() {
            assert!(nwa.return_in(q).any(|t| t == (p, h, r)));
            assert!(nwa.return_as_hier(h).any(|t| t == (p, r, q)));
        }
        assert_eq!(nwa.transition_count(), 7);
    }

    #[test]
    fn label_queries() {
        let nwa = two_call_sites();
        let (x, p, q) = ("x".to_string(), "p".to_string(), "q".to_string());
        assert_eq!(nwa.return_successors(&x, &p, &'r'), vec!["p'".to_string()]);
        assert_eq!(nwa.return_successors(&x, &q, &'r'), vec!["q'".to_string()]);
        assert!(nwa.is_final(&"q'".to_string()));
        assert_eq!(nwa.initial_states(), vec!["s".to_string()]);
    }

    #[test]
    fn malformed_transitions_are_rejected() {
        let mut nwa = lasso_nwa();
        let (q0, q1) = ("q0".to_string(), "q1".to_string());
        assert!(matches!(
            nwa.add_internal(&q0, &'a', &"nowhere".to_string()),
            Err(AutomataError::UnknownState(_))
        ));
        assert!(matches!(
            nwa.add_internal(&q0, &'z', &q1),
            Err(AutomataError::UnknownLetter(_))
        ));
        assert_eq!(nwa.add_internal_ids(0, 0, 17), Err(AutomataError::InvalidStateId(17)));
    }

    #[test]
    fn induced_subautomaton() {
        let nwa = lasso_nwa();
        let sub = nwa.induced(&IntSet::from_iter([1, 2]));
        assert_eq!(sub.size(), 2);
        assert!(sub.initial_ids().is_empty());
        assert_eq!(sub.internal_transitions().count(), 2);
    }

    #[test]
    fn relabelling_keeps_distinct_states_apart() {
        let nwa = two_call_sites();
        let partition = Partition::from_pairs(nwa.size(), [(1, 2)]);
        let join = |block: &[&String]| block.iter().join("|");
        let quotient = nwa.quotient(&partition, join).unwrap();
        assert_eq!(quotient.size(), 6);
        let pq = quotient.id_of(&"p|q".to_string()).unwrap();
        assert_eq!(quotient.call_transitions().filter(|(p, _, _)| *p == pq).count(), 1);
        assert_eq!(quotient.return_transitions().filter(|(_, h, _, _)| *h == pq).count(), 2);

        assert_eq!(
            nwa.quotient(&partition, |_| "same".to_string()).unwrap_err(),
            AutomataError::DuplicateState("\"same\"".to_string())
        );
        assert_eq!(nwa.map_states(|_, _| 0).unwrap_err(), AutomataError::DuplicateState("0".to_string()));
        assert_eq!(nwa.map_states(|q, _| q).unwrap().size(), nwa.size());
    }
}
