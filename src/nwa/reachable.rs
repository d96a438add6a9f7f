use std::collections::{BTreeMap, BTreeSet, VecDeque};

use itertools::Itertools;
use tracing::{debug, trace};

use crate::{
    factory::StateFactory,
    intset::IntSet,
    math::{Map, Set},
    nwa::word::{bounded_counterexample, NestedRun},
    operation::{log_exit, log_start},
    AutomataError, CancelToken, LetterId, NestedWordAutomaton, Nwa, Operation, Result, StateId,
};

/// The state on top of the call stack below the current state, i.e. the hierarchical
/// predecessor a return would pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DownState {
    /// The call stack is empty.
    Bottom,
    /// The call was taken from this state.
    State(StateId),
}

/// A reachable configuration abstracted to the current state (up) and the top of the
/// call stack (down). Two runs ending in the same state with different pending calls
/// are different double deckers.
pub type DoubleDecker = (StateId, DownState);

/// Reachability information recorded for every double decker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReachProp {
    /// Reachable from an initial state.
    Reachable,
    /// Reachable and some final state can be reached from it.
    CanReachFinal,
}

/// The order in which the worklist of a [`NestedSearch`] is processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SearchStrategy {
    /// Process the most recently discovered double decker first.
    DepthFirst,
    /// Process double deckers in discovery order, which yields shortest witnesses.
    #[default]
    BreadthFirst,
}

/// How a double decker was discovered first, used to rebuild witness runs.
#[derive(Debug, Clone, Copy)]
enum Reason {
    Initial,
    Internal {
        pred: DoubleDecker,
        letter: LetterId,
    },
    Call {
        pred: DoubleDecker,
        letter: LetterId,
    },
    Return {
        lin: DoubleDecker,
        hier: DoubleDecker,
        letter: LetterId,
    },
}

/// Work items of the iterative witness reconstruction.
enum Rebuild {
    /// The steps from an initial state to the double decker.
    Path(DoubleDecker),
    /// The steps since the call that pushed the down state of the double decker.
    Segment(DoubleDecker),
    Emit(LetterId, StateId),
}

/// The exploration context for an on-demand [`NestedWordAutomaton`]. It owns the state
/// indexer (inside the [`Nwa`] it materializes), the set of discovered double deckers and
/// the worklist. Successors of a state are queried from the input only once, when the
/// state is first processed; returns are queried per pair of linear and hierarchical
/// predecessor once that pair turned out to be reachable.
///
/// The search saturates return transitions in both directions: when `(q, h)` is
/// processed, every known down state `d` of `h` yields `(q', d)` for a return
/// `q -r/h-> q'`, and when a new `(h, d)` is processed, every already processed `(q, h)`
/// is revisited.
pub struct NestedSearch<'a, A: NestedWordAutomaton> {
    automaton: &'a A,
    strategy: SearchStrategy,
    cancel: CancelToken,
    operation: &'static str,
    nwa: Nwa<A::State, A::Letter>,
    expanded: IntSet,
    returns_expanded: Set<(StateId, StateId)>,
    reasons: Map<DoubleDecker, Reason>,
    down: Vec<BTreeSet<DownState>>,
    ups: Map<StateId, BTreeSet<StateId>>,
    worklist: VecDeque<DoubleDecker>,
    /// internal steps `(pred, succ)`, both on the same level
    internal_edges: Vec<(DoubleDecker, DoubleDecker)>,
    /// call steps `(caller, entry)`
    call_edges: Vec<(DoubleDecker, DoubleDecker)>,
    /// return steps `(lin, hier, succ)`
    return_edges: Vec<(DoubleDecker, DoubleDecker, DoubleDecker)>,
    seeded: bool,
}

impl<'a, A: NestedWordAutomaton> NestedSearch<'a, A> {
    /// Creates a search over `automaton`. `operation` names the operation on whose behalf
    /// the search runs, it is reported when `cancel` trips.
    pub fn new(
        automaton: &'a A,
        strategy: SearchStrategy,
        cancel: &CancelToken,
        operation: &'static str,
    ) -> Self {
        Self {
            automaton,
            strategy,
            cancel: cancel.clone(),
            operation,
            nwa: Nwa::new(automaton.alphabet().clone()),
            expanded: IntSet::new(),
            returns_expanded: Set::default(),
            reasons: Map::default(),
            down: vec![],
            ups: Map::default(),
            worklist: VecDeque::new(),
            internal_edges: vec![],
            call_edges: vec![],
            return_edges: vec![],
            seeded: false,
        }
    }

    /// The part of the automaton that has been materialized so far.
    pub fn nwa(&self) -> &Nwa<A::State, A::Letter> {
        &self.nwa
    }

    /// Consumes the search, returning the part of the automaton materialized so far.
    pub fn into_nwa(self) -> Nwa<A::State, A::Letter> {
        self.nwa
    }

    /// Number of double deckers discovered so far.
    pub fn double_decker_count(&self) -> usize {
        self.reasons.len()
    }

    /// Down states of `q` discovered so far.
    pub fn down_states(&self, q: StateId) -> impl Iterator<Item = DownState> + '_ {
        self.down.get(q).into_iter().flatten().copied()
    }

    fn register(&mut self, state: A::State, initial: bool) -> StateId {
        let is_final = self.automaton.is_final(&state);
        let q = self.nwa.add_state(state, initial, is_final);
        if self.down.len() <= q {
            self.down.resize_with(q + 1, BTreeSet::new);
        }
        q
    }

    fn label(&self, q: StateId) -> Result<A::State> {
        self.nwa
            .state(q)
            .cloned()
            .ok_or(AutomataError::InvalidStateId(q))
    }

    fn letter(&self, a: LetterId) -> Result<A::Letter> {
        self.nwa
            .alphabet()
            .letter(a)
            .cloned()
            .ok_or(AutomataError::InvalidLetterId(a))
    }

    fn discover(&mut self, dd: DoubleDecker, reason: Reason) {
        match reason {
            Reason::Initial => {}
            Reason::Internal { pred, .. } => self.internal_edges.push((pred, dd)),
            Reason::Call { pred, .. } => self.call_edges.push((pred, dd)),
            Reason::Return { lin, hier, .. } => self.return_edges.push((lin, hier, dd)),
        }
        if self.reasons.contains_key(&dd) {
            return;
        }
        trace!("discovered double decker {:?} via {:?}", dd, reason);
        self.reasons.insert(dd, reason);
        self.down[dd.0].insert(dd.1);
        self.worklist.push_back(dd);
    }

    fn seed(&mut self) {
        if self.seeded {
            return;
        }
        self.seeded = true;
        for state in self.automaton.initial_states() {
            let q = self.register(state, true);
            self.discover((q, DownState::Bottom), Reason::Initial);
        }
    }

    /// Queries internal and call successors of `q` from the input.
    fn expand_state(&mut self, q: StateId) -> Result<()> {
        if !self.expanded.set(q) {
            return Ok(());
        }
        let state = self.label(q)?;
        let internal = self.nwa.alphabet().internal_ids().collect_vec();
        for a in internal {
            let letter = self.letter(a)?;
            for succ in self.automaton.internal_successors(&state, &letter) {
                let p = self.register(succ, false);
                self.nwa.add_internal_ids(q, a, p)?;
            }
        }
        let calls = self.nwa.alphabet().call_ids().collect_vec();
        for c in calls {
            let letter = self.letter(c)?;
            for succ in self.automaton.call_successors(&state, &letter) {
                let p = self.register(succ, false);
                self.nwa.add_call_ids(q, c, p)?;
            }
        }
        Ok(())
    }

    /// Queries return successors of `q` with hierarchical predecessor `h` from the input.
    fn expand_returns(&mut self, q: StateId, h: StateId) -> Result<()> {
        if !self.returns_expanded.insert((q, h)) {
            return Ok(());
        }
        let (state, hier) = (self.label(q)?, self.label(h)?);
        let returns = self.nwa.alphabet().return_ids().collect_vec();
        for r in returns {
            let letter = self.letter(r)?;
            for succ in self.automaton.return_successors(&state, &hier, &letter) {
                let p = self.register(succ, false);
                self.nwa.add_return_ids(q, h, r, p)?;
            }
        }
        Ok(())
    }

    fn returns_with_hier(&self, q: StateId, h: StateId) -> Vec<(LetterId, StateId)> {
        self.nwa
            .return_out(q)
            .filter(|(hier, _, _)| *hier == h)
            .flat_map(|(_, r, targets)| targets.iter().map(move |t| (r, t)))
            .collect()
    }

    fn process(&mut self, dd: DoubleDecker) -> Result<()> {
        let (q, d) = dd;
        self.expand_state(q)?;

        let internal = self
            .nwa
            .internal_out(q)
            .flat_map(|(a, targets)| targets.iter().map(move |t| (a, t)))
            .collect_vec();
        for (letter, t) in internal {
            self.discover((t, d), Reason::Internal { pred: dd, letter });
        }

        let calls = self
            .nwa
            .call_out(q)
            .flat_map(|(c, targets)| targets.iter().map(move |t| (c, t)))
            .collect_vec();
        for (letter, t) in calls {
            self.discover((t, DownState::State(q)), Reason::Call { pred: dd, letter });
        }

        // `q` as linear predecessor of a return
        if let DownState::State(h) = d {
            self.expand_returns(q, h)?;
            self.ups.entry(h).or_default().insert(q);
            let below = self.down[h].iter().copied().collect_vec();
            for (letter, t) in self.returns_with_hier(q, h) {
                for &d2 in &below {
                    self.discover(
                        (t, d2),
                        Reason::Return {
                            lin: dd,
                            hier: (h, d2),
                            letter,
                        },
                    );
                }
            }
        }

        // `q` as hierarchical predecessor of a return
        let ups = self
            .ups
            .get(&q)
            .map(|u| u.iter().copied().collect_vec())
            .unwrap_or_default();
        for u in ups {
            for (letter, t) in self.returns_with_hier(u, q) {
                self.discover(
                    (t, d),
                    Reason::Return {
                        lin: (u, DownState::State(q)),
                        hier: dd,
                        letter,
                    },
                );
            }
        }
        Ok(())
    }

    /// Processes one double decker and returns it, or `None` if the search is exhausted.
    pub fn step(&mut self) -> Result<Option<DoubleDecker>> {
        self.seed();
        self.cancel.check(self.operation)?;
        let next = match self.strategy {
            SearchStrategy::BreadthFirst => self.worklist.pop_front(),
            SearchStrategy::DepthFirst => self.worklist.pop_back(),
        };
        let Some(dd) = next else {
            return Ok(None);
        };
        self.process(dd)?;
        Ok(Some(dd))
    }

    /// Runs the search until a processed double decker satisfies `goal`, which is then
    /// returned. Returns `None` if no reachable double decker satisfies it.
    pub fn run_until(
        &mut self,
        mut goal: impl FnMut(&Nwa<A::State, A::Letter>, DoubleDecker) -> bool,
    ) -> Result<Option<DoubleDecker>> {
        while let Some(dd) = self.step()? {
            if goal(&self.nwa, dd) {
                debug!(
                    "{}: goal {:?} reached after {} double deckers",
                    self.operation,
                    dd,
                    self.reasons.len()
                );
                return Ok(Some(dd));
            }
        }
        Ok(None)
    }

    /// Explores everything that is reachable.
    pub fn run_to_completion(&mut self) -> Result<()> {
        while self.step()?.is_some() {}
        debug!(
            "{}: explored {} states and {} double deckers",
            self.operation,
            self.nwa.size(),
            self.reasons.len()
        );
        Ok(())
    }

    /// Appends the steps leading to `dd` to `out` and returns the initial state the run
    /// starts in.
    fn path(&self, dd: DoubleDecker, out: &mut Vec<(LetterId, StateId)>) -> StateId {
        let mut start = dd.0;
        let mut stack = vec![Rebuild::Path(dd)];
        while let Some(item) = stack.pop() {
            match item {
                Rebuild::Emit(letter, q) => out.push((letter, q)),
                Rebuild::Path(dd) => match self.reasons[&dd] {
                    Reason::Initial => start = dd.0,
                    Reason::Internal { pred, letter } | Reason::Call { pred, letter } => {
                        stack.push(Rebuild::Emit(letter, dd.0));
                        stack.push(Rebuild::Path(pred));
                    }
                    Reason::Return { lin, hier, letter } => {
                        stack.push(Rebuild::Emit(letter, dd.0));
                        stack.push(Rebuild::Segment(lin));
                        stack.push(Rebuild::Path(hier));
                    }
                },
                Rebuild::Segment(dd) => match self.reasons[&dd] {
                    Reason::Initial => {}
                    Reason::Internal { pred, letter } => {
                        stack.push(Rebuild::Emit(letter, dd.0));
                        stack.push(Rebuild::Segment(pred));
                    }
                    Reason::Call { letter, .. } => out.push((letter, dd.0)),
                    Reason::Return { lin, hier, letter } => {
                        stack.push(Rebuild::Emit(letter, dd.0));
                        stack.push(Rebuild::Segment(lin));
                        stack.push(Rebuild::Segment(hier));
                    }
                },
            }
        }
        start
    }

    /// A run from an initial state to the up state of `dd`. `dd` has to be discovered.
    pub fn witness(&self, dd: DoubleDecker) -> Result<NestedRun<A::State, A::Letter>> {
        if !self.reasons.contains_key(&dd) {
            return Err(AutomataError::InvalidStateId(dd.0));
        }
        let mut steps = vec![];
        let start = self.path(dd, &mut steps);
        let mut run = NestedRun::empty(self.label(start)?);
        for (letter, target) in steps {
            run.letters.push(self.letter(letter)?);
            run.states.push(self.label(target)?);
        }
        Ok(run)
    }

    /// Finishes the exploration and computes for every double decker whether a final state
    /// is reachable from it.
    pub fn into_reachable(mut self) -> Result<ReachableNwa<A::State, A::Letter>> {
        self.run_to_completion()?;

        // A return `lin -r/hier-> succ` yields the summary `hier -> succ`: the call
        // from the up state of `hier` reaches the up state of `lin` on one level.
        let mut same_level: Map<DoubleDecker, Vec<DoubleDecker>> = Map::default();
        for (from, to) in &self.internal_edges {
            same_level.entry(*to).or_default().push(*from);
        }
        for (_, hier, succ) in &self.return_edges {
            same_level.entry(*succ).or_default().push(*hier);
        }

        // first the double deckers that reach a final state without popping their down
        // state, entering calls is fine
        let mut into_calls = same_level.clone();
        for (caller, entry) in &self.call_edges {
            into_calls.entry(*entry).or_default().push(*caller);
        }
        let finals = self
            .reasons
            .keys()
            .filter(|(q, _)| self.nwa.is_final_id(*q))
            .copied();
        let in_frame = self.backward_closure(&into_calls, finals)?;

        // then those that reach one after returning, the context below a call is only
        // entered through summaries
        let mut through_returns = same_level;
        for (lin, _, succ) in &self.return_edges {
            through_returns.entry(*succ).or_default().push(*lin);
        }
        let live = self.backward_closure(&through_returns, in_frame.into_iter())?;

        let down = self
            .down
            .iter()
            .enumerate()
            .map(|(q, downs)| {
                downs
                    .iter()
                    .map(|d| {
                        let prop = if live.contains(&(q, *d)) {
                            ReachProp::CanReachFinal
                        } else {
                            ReachProp::Reachable
                        };
                        (*d, prop)
                    })
                    .collect()
            })
            .collect();
        Ok(ReachableNwa {
            nwa: self.nwa,
            down,
        })
    }
}

impl<'a, A: NestedWordAutomaton> NestedSearch<'a, A> {
    fn backward_closure(
        &self,
        backward: &Map<DoubleDecker, Vec<DoubleDecker>>,
        targets: impl Iterator<Item = DoubleDecker>,
    ) -> Result<Set<DoubleDecker>> {
        let mut reached: Set<DoubleDecker> = targets.collect();
        let mut queue: VecDeque<DoubleDecker> = reached.iter().copied().collect();
        while let Some(dd) = queue.pop_front() {
            self.cancel.check(self.operation)?;
            for pred in backward.get(&dd).into_iter().flatten() {
                if reached.insert(*pred) {
                    queue.push_back(*pred);
                }
            }
        }
        Ok(reached)
    }
}

/// Materializes the reachable part of `automaton`.
pub fn explore<A: NestedWordAutomaton>(
    automaton: &A,
    cancel: &CancelToken,
    operation: &'static str,
) -> Result<Nwa<A::State, A::Letter>> {
    let mut search = NestedSearch::new(automaton, SearchStrategy::BreadthFirst, cancel, operation);
    search.run_to_completion()?;
    Ok(search.into_nwa())
}

/// The reachable part of an automaton together with the down states of every state and
/// their [`ReachProp`].
#[derive(Clone)]
pub struct ReachableNwa<S: crate::Element, L: crate::Element> {
    nwa: Nwa<S, L>,
    down: Vec<BTreeMap<DownState, ReachProp>>,
}

impl<S: crate::Element, L: crate::Element> ReachableNwa<S, L> {
    /// Explores everything reachable in `automaton`.
    pub fn new<A>(automaton: &A, cancel: &CancelToken) -> Result<Self>
    where
        A: NestedWordAutomaton<State = S, Letter = L>,
    {
        NestedSearch::new(automaton, SearchStrategy::BreadthFirst, cancel, "reachable states")
            .into_reachable()
    }

    /// The reachable part as a dense automaton.
    pub fn nwa(&self) -> &Nwa<S, L> {
        &self.nwa
    }

    /// Consumes `self`, returning the dense automaton.
    pub fn into_nwa(self) -> Nwa<S, L> {
        self.nwa
    }

    /// The down states of `q` with their reachability information.
    pub fn down_states(&self, q: StateId) -> impl Iterator<Item = (DownState, ReachProp)> + '_ {
        self.down.get(q).into_iter().flatten().map(|(d, p)| (*d, *p))
    }

    /// Number of reachable double deckers.
    pub fn double_decker_count(&self) -> usize {
        self.down.iter().map(|d| d.len()).sum()
    }

    /// States from which a final state can be reached in some reachable context.
    pub fn live_states(&self) -> IntSet {
        self.down
            .iter()
            .enumerate()
            .filter(|(_, downs)| downs.values().any(|p| *p == ReachProp::CanReachFinal))
            .map(|(q, _)| q)
            .collect()
    }

    /// The automaton restricted to [`ReachableNwa::live_states`]. This does not change the
    /// accepted finite words.
    pub fn remove_dead_ends(&self) -> Nwa<S, L> {
        self.nwa.induced(&self.live_states())
    }
}

/// Depth of the bounded language check used by `check_result` of the trimming operations.
pub(crate) const CHECK_DEPTH: usize = 6;

/// Computes the reachable part of an automaton.
pub struct RemoveUnreachable<'a, A: NestedWordAutomaton> {
    input: &'a A,
    result: Nwa<A::State, A::Letter>,
    cancel: CancelToken,
}

impl<'a, A: NestedWordAutomaton> RemoveUnreachable<'a, A> {
    const NAME: &'static str = "removeUnreachable";

    /// Explores `input` and keeps what is reachable.
    pub fn new(input: &'a A, cancel: &CancelToken) -> Result<Self> {
        log_start::<Self>(Self::NAME);
        let op = Self {
            input,
            result: explore(input, cancel, Self::NAME)?,
            cancel: cancel.clone(),
        };
        log_exit(&op);
        Ok(op)
    }
}

impl<'a, A: NestedWordAutomaton> Operation for RemoveUnreachable<'a, A> {
    type State = A::State;
    type Output = Nwa<A::State, A::Letter>;

    fn operation_name(&self) -> &'static str {
        Self::NAME
    }

    fn exit_message(&self) -> String {
        format!("Finished {}, result has {} states", Self::NAME, self.result.size())
    }

    fn result(&self) -> &Self::Output {
        &self.result
    }

    fn into_result(self) -> Self::Output {
        self.result
    }

    fn check_result<F: StateFactory<Self::State>>(&self, _factory: &F) -> Result<bool> {
        check_bounded(Self::NAME, self.input, &self.result, CHECK_DEPTH, &self.cancel)
    }
}

/// Removes every state from which no final state can be reached.
pub struct RemoveDeadEnds<'a, A: NestedWordAutomaton> {
    input: &'a A,
    result: Nwa<A::State, A::Letter>,
    cancel: CancelToken,
}

impl<'a, A: NestedWordAutomaton> RemoveDeadEnds<'a, A> {
    const NAME: &'static str = "removeDeadEnds";

    /// Explores `input` and keeps the reachable states that can reach a final state.
    pub fn new(input: &'a A, cancel: &CancelToken) -> Result<Self> {
        log_start::<Self>(Self::NAME);
        let reachable =
            NestedSearch::new(input, SearchStrategy::BreadthFirst, cancel, Self::NAME).into_reachable()?;
        let op = Self {
            input,
            result: reachable.remove_dead_ends(),
            cancel: cancel.clone(),
        };
        log_exit(&op);
        Ok(op)
    }
}

impl<'a, A: NestedWordAutomaton> Operation for RemoveDeadEnds<'a, A> {
    type State = A::State;
    type Output = Nwa<A::State, A::Letter>;

    fn operation_name(&self) -> &'static str {
        Self::NAME
    }

    fn exit_message(&self) -> String {
        format!("Finished {}, result has {} states", Self::NAME, self.result.size())
    }

    fn result(&self) -> &Self::Output {
        &self.result
    }

    fn into_result(self) -> Self::Output {
        self.result
    }

    fn check_result<F: StateFactory<Self::State>>(&self, _factory: &F) -> Result<bool> {
        check_bounded(Self::NAME, self.input, &self.result, CHECK_DEPTH, &self.cancel)
    }
}

/// Compares the finite languages of `input` and `result` on all words up to length
/// `max_len`.
pub(crate) fn check_bounded<A, B>(
    operation: &'static str,
    input: &A,
    result: &B,
    max_len: usize,
    cancel: &CancelToken,
) -> Result<bool>
where
    A: NestedWordAutomaton,
    B: NestedWordAutomaton<Letter = A::Letter>,
{
    match bounded_counterexample(input, result, max_len, cancel)? {
        None => Ok(true),
        Some(word) => Err(AutomataError::Verification {
            operation,
            reason: format!("input and result disagree on {word:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        factory::StringFactory,
        nwa::NwaBuilder,
        tests::{lasso_nwa, two_call_sites},
        NestedAlphabet,
    };

    #[test_log::test]
    fn double_deckers_distinguish_call_sites() {
        let nwa = two_call_sites();
        let reach = ReachableNwa::new(&nwa, &CancelToken::new()).unwrap();
        let id = |s: &str| reach.nwa().id_of(&s.to_string()).unwrap();
        let downs = reach.down_states(id("x")).map(|(d, _)| d).collect_vec();
        assert_eq!(
            downs,
            vec![DownState::State(id("p")), DownState::State(id("q"))]
        );
        let props: BTreeMap<_, _> = reach.down_states(id("x")).collect();
        // only the run through `q` can reach the final state `q'`
        assert_eq!(props[&DownState::State(id("q"))], ReachProp::CanReachFinal);
        assert_eq!(props[&DownState::State(id("p"))], ReachProp::Reachable);
        assert_eq!(
            reach.down_states(id("q'")).collect_vec(),
            vec![(DownState::Bottom, ReachProp::CanReachFinal)]
        );
    }

    #[test]
    fn returns_are_matched_with_their_call() {
        // `e` returns to `f` only when called from `p`, calling from `q` gets stuck.
        let nwa: Nwa<String, char> = NwaBuilder::nested(['a', 'b'], ['c'], ['r'])
            .unwrap()
            .with_initial(["s"])
            .with_states(["p", "q", "e", "g"])
            .with_final(["f"])
            .with_internal([("s", 'a', "p"), ("s", 'b', "q")])
            .with_call([("p", 'c', "e"), ("q", 'c', "e")])
            .with_return([("e", "p", 'r', "f"), ("e", "e", 'r', "g")])
            .build()
            .unwrap();
        let reach = ReachableNwa::new(&nwa, &CancelToken::new()).unwrap();
        // `g` needs `e` as hierarchical predecessor, which never happens
        assert!(reach.nwa().id_of(&"g".to_string()).is_none());
        let live = reach.live_states();
        let id = |s: &str| reach.nwa().id_of(&s.to_string()).unwrap();
        assert!(live.get(id("p")));
        assert!(!live.get(id("q")));
    }

    #[test]
    fn witness_runs_are_runs() {
        let nwa = two_call_sites();
        for strategy in [SearchStrategy::BreadthFirst, SearchStrategy::DepthFirst] {
            let mut search = NestedSearch::new(&nwa, strategy, &CancelToken::new(), "test");
            let goal = search
                .run_until(|n, (q, _)| n.is_final_id(q))
                .unwrap()
                .unwrap();
            let run = search.witness(goal).unwrap();
            assert!(nwa.is_initial_run(&run));
            assert_eq!(run.last(), Some(&"q'".to_string()));
            assert_eq!(run.letters, vec!['b', 'c', 'x', 'r']);
        }
    }

    #[test]
    fn remove_dead_ends_keeps_language() {
        let nwa = two_call_sites();
        let op = RemoveDeadEnds::new(&nwa, &CancelToken::new()).unwrap();
        let result = op.result();
        assert!(result.id_of(&"p".to_string()).is_none());
        assert!(result.id_of(&"p'".to_string()).is_none());
        assert_eq!(result.size(), 5);
        assert_eq!(op.check_result(&StringFactory), Ok(true));
    }

    #[test_log::test]
    fn dead_ends_are_decided_per_calling_context() {
        // `h` is called from `A` and from `B`; the returns out of `h`'s callee only lead
        // to a final state when `h` itself was called from `A`
        let nwa: Nwa<String, char> = NwaBuilder::nested(['a', 'b'], ['c'], ['r'])
            .unwrap()
            .with_initial(["s"])
            .with_states(["A", "B", "h", "e", "t", "dead"])
            .with_final(["fin"])
            .with_internal([("s", 'a', "A"), ("s", 'b', "B")])
            .with_call([("A", 'c', "h"), ("B", 'c', "h"), ("h", 'c', "e")])
            .with_return([("e", "h", 'r', "t"), ("t", "A", 'r', "fin"), ("t", "B", 'r', "dead")])
            .build()
            .unwrap();
        let reach = ReachableNwa::new(&nwa, &CancelToken::new()).unwrap();
        let id = |s: &str| reach.nwa().id_of(&s.to_string()).unwrap();
        let props: BTreeMap<_, _> = reach.down_states(id("h")).collect();
        assert_eq!(props[&DownState::State(id("A"))], ReachProp::CanReachFinal);
        assert_eq!(props[&DownState::State(id("B"))], ReachProp::Reachable);
        assert_eq!(
            reach.down_states(id("B")).collect_vec(),
            vec![(DownState::Bottom, ReachProp::Reachable)]
        );
        let live = reach.live_states();
        assert!(live.get(id("e")) && live.get(id("t")));
        assert!(!live.get(id("B")) && !live.get(id("dead")));

        let op = RemoveDeadEnds::new(&nwa, &CancelToken::new()).unwrap();
        assert!(op.result().id_of(&"B".to_string()).is_none());
        assert_eq!(op.result().size(), 6);
        assert_eq!(op.check_result(&StringFactory), Ok(true));
    }

    #[test]
    fn long_witnesses_are_rebuilt() {
        // a flat chain of `n` steps, then a call whose callee runs `n` more steps
        // before returning to the final state
        let n = 30_000;
        let mut nwa: Nwa<usize, char> = Nwa::new(NestedAlphabet::new(['a'], ['c'], ['r']).unwrap());
        for q in 0..=2 * n + 2 {
            nwa.add_state(q, q == 0, q == 2 * n + 2);
        }
        for q in (0..n).chain(n + 1..2 * n + 1) {
            nwa.add_internal(&q, &'a', &(q + 1)).unwrap();
        }
        nwa.add_call(&n, &'c', &(n + 1)).unwrap();
        nwa.add_return(&(2 * n + 1), &n, &'r', &(2 * n + 2)).unwrap();

        let mut search = NestedSearch::new(&nwa, SearchStrategy::BreadthFirst, &CancelToken::new(), "test");
        let goal = search.run_until(|dense, (q, _)| dense.is_final_id(q)).unwrap().unwrap();
        let run = search.witness(goal).unwrap();
        assert_eq!(run.len(), 2 * n + 2);
        assert_eq!(run.last(), Some(&(2 * n + 2)));
        assert!(nwa.is_initial_run(&run));
    }

    #[test]
    fn remove_unreachable_drops_isolated_states() {
        let mut nwa = lasso_nwa();
        nwa.add_state("island".to_string(), false, true);
        let op = RemoveUnreachable::new(&nwa, &CancelToken::new()).unwrap();
        assert_eq!(op.result().size(), 3);
        assert_eq!(op.check_result(&StringFactory), Ok(true));
    }

    #[test]
    fn cancellation_is_reported() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let nwa = lasso_nwa();
        let res = RemoveUnreachable::new(&nwa, &cancel);
        assert!(res.err().unwrap().is_cancelled());
    }
}
