use std::{cmp::Reverse, collections::BinaryHeap};

use itertools::Itertools;
use tracing::{debug, trace};

use super::PetriNet;
use crate::{
    factory::StateFactory,
    math::{Map, Set},
    operation::{log_exit, log_start},
    AutomataError, CancelToken, ConditionId, Element, EventId, IntSet, Operation, PlaceId,
    Result, TransitionId,
};

/// Decides when an event is a cutoff event. In both cases an event is a cutoff if an
/// earlier event reaches the same marking with a smaller local configuration; the
/// criteria differ in what smaller means.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CutoffCriterion {
    /// Fewer events.
    McMillan,
    /// Fewer events, or as many events and a smaller sorted sequence of transitions.
    #[default]
    Erv,
}

/// Options of [`PetriNetUnfolder`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnfoldingOptions {
    cutoff: CutoffCriterion,
    stop_at_accepting: bool,
}

impl UnfoldingOptions {
    /// Uses `cutoff` to detect cutoff events.
    pub fn with_cutoff(mut self, cutoff: CutoffCriterion) -> Self {
        self.cutoff = cutoff;
        self
    }

    /// Stops the construction as soon as an event reaching an accepting marking was added.
    /// The prefix is not complete then.
    pub fn with_stop_at_accepting(mut self, stop: bool) -> Self {
        self.stop_at_accepting = stop;
        self
    }

    /// The configured cutoff criterion.
    pub fn cutoff(&self) -> CutoffCriterion {
        self.cutoff
    }
}

/// An occurrence of a token on a place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    place: PlaceId,
    producer: EventId,
}

impl Condition {
    /// The place this condition is a token of.
    pub fn place(&self) -> PlaceId {
        self.place
    }

    /// The event that produced the condition, [`BranchingProcess::ROOT`] for the
    /// conditions of the initial marking.
    pub fn producer(&self) -> EventId {
        self.producer
    }
}

/// An occurrence of a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    transition: Option<TransitionId>,
    preset: Vec<ConditionId>,
    postset: Vec<ConditionId>,
    /// the local configuration, including the event itself and the root
    local: IntSet,
    /// transitions of the local configuration, sorted
    parikh: Vec<TransitionId>,
    marking: IntSet,
    companion: Option<EventId>,
}

impl Event {
    /// The transition, `None` for the root.
    pub fn transition(&self) -> Option<TransitionId> {
        self.transition
    }

    /// The consumed conditions.
    pub fn preset(&self) -> &[ConditionId] {
        &self.preset
    }

    /// The produced conditions.
    pub fn postset(&self) -> &[ConditionId] {
        &self.postset
    }

    /// The marking reached by firing the local configuration.
    pub fn marking(&self) -> &IntSet {
        &self.marking
    }

    /// Number of events in the local configuration, not counting the root.
    pub fn size(&self) -> usize {
        self.parikh.len()
    }

    /// `true` iff the event is a cutoff event.
    pub fn is_cutoff(&self) -> bool {
        self.companion.is_some()
    }

    /// For a cutoff event, the earlier event with the same marking.
    pub fn companion(&self) -> Option<EventId> {
        self.companion
    }

    fn key(&self) -> (usize, &[TransitionId]) {
        (self.parikh.len(), &self.parikh)
    }
}

/// A possible extension of the prefix. The derived order is the order in which
/// extensions are added.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Extension {
    size: usize,
    parikh: Vec<TransitionId>,
    transition: TransitionId,
    preset: Vec<ConditionId>,
    causes: IntSet,
}

/// A finite branching process of a [`PetriNet`]: conditions and events, starting from a
/// root event that produces the initial marking. Ids grow along causality.
#[derive(Clone)]
pub struct BranchingProcess<S: Element, L: Element> {
    net: PetriNet<S, L>,
    conditions: Vec<Condition>,
    events: Vec<Event>,
    /// conditions that are pairwise concurrent
    co: Vec<IntSet>,
    by_place: Vec<Vec<ConditionId>>,
}

impl<S: Element, L: Element> BranchingProcess<S, L> {
    /// Id of the root event.
    pub const ROOT: EventId = 0;

    /// The process consisting of the root event only.
    fn new(net: &PetriNet<S, L>) -> Self {
        let mut process = Self {
            net: net.clone(),
            conditions: vec![],
            events: vec![],
            co: vec![],
            by_place: vec![vec![]; net.place_count()],
        };
        let initial = net.initial_marking().iter().collect_vec();
        let postset = initial
            .iter()
            .map(|p| process.add_condition(*p, Self::ROOT))
            .collect_vec();
        for c in &postset {
            process.co[*c] = postset.iter().filter(|d| *d != c).copied().collect();
        }
        process.events.push(Event {
            transition: None,
            preset: vec![],
            postset,
            local: IntSet::from_iter([Self::ROOT]),
            parikh: vec![],
            marking: net.initial_marking().clone(),
            companion: None,
        });
        process
    }

    fn add_condition(&mut self, place: PlaceId, producer: EventId) -> ConditionId {
        let id = self.conditions.len();
        self.conditions.push(Condition { place, producer });
        self.co.push(IntSet::new());
        self.by_place[place].push(id);
        id
    }

    /// The unfolded net.
    pub fn net(&self) -> &PetriNet<S, L> {
        &self.net
    }

    /// The conditions, indexed by [`ConditionId`].
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// The events, indexed by [`EventId`]; the first one is the root.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// The event with id `e`.
    pub fn event(&self, e: EventId) -> Option<&Event> {
        self.events.get(e)
    }

    /// Ids of all cutoff events.
    pub fn cutoff_events(&self) -> impl Iterator<Item = EventId> + '_ {
        self.events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_cutoff())
            .map(|(id, _)| id)
    }

    /// `true` iff the conditions `c` and `d` can be marked at the same time.
    pub fn is_co(&self, c: ConditionId, d: ConditionId) -> bool {
        self.co.get(c).is_some_and(|co| co.contains(d))
    }

    /// The local configuration of `e`, including `e` and the root.
    pub fn local_configuration(&self, e: EventId) -> Option<&IntSet> {
        self.events.get(e).map(|e| &e.local)
    }

    /// The transitions of the local configuration of `e` in an order in which they can
    /// be fired.
    pub fn configuration_run(&self, e: EventId) -> Vec<TransitionId> {
        self.events
            .get(e)
            .map(|event| {
                event
                    .local
                    .iter()
                    .filter_map(|f| self.events[f].transition)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The conditions that are marked after the local configuration of `e`.
    pub fn cut(&self, e: EventId) -> Vec<ConditionId> {
        let Some(event) = self.events.get(e) else {
            return vec![];
        };
        let consumed: IntSet = event
            .local
            .iter()
            .flat_map(|f| self.events[f].preset.iter().copied())
            .collect();
        event
            .local
            .iter()
            .flat_map(|f| self.events[f].postset.iter().copied())
            .filter(|c| !consumed.contains(*c))
            .sorted()
            .collect()
    }

    /// The first event reaching an accepting marking.
    pub fn accepting_event(&self) -> Option<EventId> {
        self.events.iter().position(|e| self.net.is_accepting(&e.marking))
    }

    /// The labels of a run to an accepting marking, found through
    /// [`BranchingProcess::accepting_event`].
    pub fn accepting_word(&self) -> Option<Vec<L>> {
        let e = self.accepting_event()?;
        self.configuration_run(e)
            .into_iter()
            .map(|t| self.net.transition(t).map(|t| t.letter().clone()))
            .collect()
    }

    /// The markings of all configurations that contain no cutoff event.
    pub fn cutoff_free_markings(&self, cancel: &CancelToken) -> Result<Set<IntSet>> {
        let start: IntSet = self.events[Self::ROOT].postset.iter().copied().collect();
        let mut seen: Set<IntSet> = Set::default();
        let mut markings: Set<IntSet> = Set::default();
        let mut stack = vec![start.clone()];
        seen.insert(start);
        while let Some(cut) = stack.pop() {
            cancel.check(PetriNetUnfolder::<S, L>::NAME)?;
            markings.insert(cut.iter().map(|c| self.conditions[c].place).collect());
            for event in self.events.iter().skip(1).filter(|e| !e.is_cutoff()) {
                if !event.preset.iter().all(|c| cut.contains(*c)) {
                    continue;
                }
                let mut next = cut.clone();
                for c in &event.preset {
                    next.clear(*c);
                }
                next.extend(event.postset.iter().copied());
                if seen.insert(next.clone()) {
                    stack.push(next);
                }
            }
        }
        Ok(markings)
    }

    /// Builds the possible extension firing `transition` on `preset`.
    fn extension(&self, transition: TransitionId, mut preset: Vec<ConditionId>) -> Extension {
        preset.sort_unstable();
        let mut causes = IntSet::new();
        for c in &preset {
            causes.or(&self.events[self.conditions[*c].producer].local);
        }
        let parikh = causes
            .iter()
            .filter_map(|e| self.events[e].transition)
            .chain([transition])
            .sorted()
            .collect_vec();
        Extension {
            size: parikh.len(),
            parikh,
            transition,
            preset,
            causes,
        }
    }

    /// The marking after firing `extension` on top of its causes.
    fn marking_of(&self, extension: &Extension) -> Result<IntSet> {
        let mut consumed: IntSet = extension.preset.iter().copied().collect();
        let mut produced = IntSet::new();
        for f in extension.causes.iter() {
            consumed.extend(self.events[f].preset.iter().copied());
            produced.extend(self.events[f].postset.iter().copied());
        }
        produced.and_not(&consumed);
        let mut marking = IntSet::new();
        let post = self
            .net
            .transition(extension.transition)
            .map(|t| t.postset().clone())
            .unwrap_or_default();
        for p in produced.iter().map(|c| self.conditions[c].place).chain(post.iter()) {
            if !marking.insert(p) {
                return Err(AutomataError::UnsafeNet(self.net.place_name(p)));
            }
        }
        Ok(marking)
    }

    /// Adds the event for `extension` together with its output conditions.
    fn add_event(&mut self, extension: Extension, marking: IntSet, companion: Option<EventId>) -> EventId {
        let id = self.events.len();
        let mut co = IntSet::new();
        if let Some((first, rest)) = extension.preset.split_first() {
            co = self.co[*first].clone();
            for c in rest {
                co.and(&self.co[*c]);
            }
        }
        for c in &extension.preset {
            co.clear(*c);
        }
        let places = self
            .net
            .transition(extension.transition)
            .map(|t| t.postset().iter().collect_vec())
            .unwrap_or_default();
        let postset = places
            .into_iter()
            .map(|p| self.add_condition(p, id))
            .collect_vec();
        for c in &postset {
            let mut mine = co.clone();
            mine.extend(postset.iter().copied().filter(|d| d != c));
            for d in co.iter() {
                self.co[d].insert(*c);
            }
            self.co[*c] = mine;
        }
        let mut local = extension.causes;
        local.insert(id);
        self.events.push(Event {
            transition: Some(extension.transition),
            preset: extension.preset,
            postset,
            local,
            parikh: extension.parikh,
            marking,
            companion,
        });
        id
    }

    /// Every possible extension that consumes a condition of the event `e`.
    fn extensions_of(&self, e: EventId) -> Vec<Extension> {
        let mut out = vec![];
        for &c in &self.events[e].postset {
            let place = self.conditions[c].place;
            for (t, transition) in self.net.transitions() {
                if !transition.preset().contains(place) {
                    continue;
                }
                let others = transition.preset().iter().filter(|p| *p != place).collect_vec();
                let mut chosen = vec![c];
                self.co_sets(&others, &mut chosen, &mut |preset: &[ConditionId]| {
                    out.push(self.extension(t, preset.to_vec()))
                });
            }
        }
        out
    }

    /// Extends `chosen` by one condition per place of `places` such that all chosen
    /// conditions are pairwise concurrent and none was produced by a cutoff event.
    fn co_sets(&self, places: &[PlaceId], chosen: &mut Vec<ConditionId>, found: &mut dyn FnMut(&[ConditionId])) {
        let Some((place, rest)) = places.split_first() else {
            found(chosen);
            return;
        };
        for &d in &self.by_place[*place] {
            if self.events[self.conditions[d].producer].is_cutoff() {
                continue;
            }
            if chosen.iter().all(|c| self.is_co(*c, d)) {
                chosen.push(d);
                self.co_sets(rest, chosen, found);
                chosen.pop();
            }
        }
    }

    /// An earlier event with the same marking and a smaller local configuration.
    fn companion_for(
        &self,
        extension: &Extension,
        marking: &IntSet,
        by_marking: &Map<IntSet, Vec<EventId>>,
        criterion: CutoffCriterion,
    ) -> Option<EventId> {
        let candidates = by_marking.get(marking)?;
        candidates.iter().copied().find(|f| {
            let (size, parikh) = self.events[*f].key();
            match criterion {
                CutoffCriterion::McMillan => size < extension.size,
                CutoffCriterion::Erv => (size, parikh) < (extension.size, extension.parikh.as_slice()),
            }
        })
    }
}

impl<S: Element, L: Element> std::fmt::Debug for BranchingProcess<S, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (id, event) in self.events.iter().enumerate() {
            writeln!(
                f,
                "e{id}: {:?} -> {:?} (t{:?}){}",
                event.preset,
                event.postset,
                event.transition,
                event.companion.map_or_else(String::new, |c| format!(" cutoff, companion e{c}"))
            )?;
        }
        Ok(())
    }
}

/// Constructs a finite complete prefix of the unfolding of a 1-safe net. Possible
/// extensions are added in the order of the size of their local configuration, then
/// their sorted sequence of transitions, then transition id and consumed conditions;
/// the construction is therefore deterministic. Cutoff events are added to the prefix
/// but never extended.
pub struct PetriNetUnfolder<S: Element, L: Element> {
    options: UnfoldingOptions,
    cancel: CancelToken,
    stopped_early: bool,
    result: BranchingProcess<S, L>,
}

impl<S: Element, L: Element> PetriNetUnfolder<S, L> {
    const NAME: &'static str = "finitePrefix";

    /// Unfolds `net`. Fails with [`AutomataError::UnsafeNet`] if a place could carry two
    /// tokens.
    pub fn new(net: &PetriNet<S, L>, options: UnfoldingOptions, cancel: &CancelToken) -> Result<Self> {
        log_start::<Self>(Self::NAME);
        let mut process = BranchingProcess::new(net);
        let mut by_marking: Map<IntSet, Vec<EventId>> = Map::default();
        by_marking
            .entry(net.initial_marking().clone())
            .or_default()
            .push(BranchingProcess::<S, L>::ROOT);

        let mut stopped_early = options.stop_at_accepting && net.is_accepting(net.initial_marking());
        let mut queued: Set<(TransitionId, Vec<ConditionId>)> = Set::default();
        let mut queue = BinaryHeap::new();
        if !stopped_early {
            for extension in process.extensions_of(BranchingProcess::<S, L>::ROOT) {
                if queued.insert((extension.transition, extension.preset.clone())) {
                    queue.push(Reverse(extension));
                }
            }
        }

        while let Some(Reverse(extension)) = queue.pop() {
            cancel.check(Self::NAME)?;
            let marking = process.marking_of(&extension)?;
            let companion = process.companion_for(&extension, &marking, &by_marking, options.cutoff);
            let accepting = net.is_accepting(&marking);
            let e = process.add_event(extension, marking.clone(), companion);
            trace!("added event e{} reaching {:?}, companion {:?}", e, marking, companion);
            by_marking.entry(marking).or_default().push(e);

            if options.stop_at_accepting && accepting {
                debug!("event e{} reaches an accepting marking, stopping", e);
                stopped_early = true;
                break;
            }
            if companion.is_none() {
                for next in process.extensions_of(e) {
                    if queued.insert((next.transition, next.preset.clone())) {
                        queue.push(Reverse(next));
                    }
                }
            }
        }
        debug!(
            "prefix has {} events, {} of them cutoffs, and {} conditions",
            process.events.len(),
            process.cutoff_events().count(),
            process.conditions.len()
        );

        let op = Self {
            options,
            cancel: cancel.clone(),
            stopped_early,
            result: process,
        };
        log_exit(&op);
        Ok(op)
    }

    /// `true` if the construction stopped at an accepting event before the prefix was
    /// complete.
    pub fn stopped_early(&self) -> bool {
        self.stopped_early
    }

    /// The options the prefix was built with.
    pub fn options(&self) -> UnfoldingOptions {
        self.options
    }
}

impl<S: Element, L: Element> Operation for PetriNetUnfolder<S, L> {
    type State = S;
    type Output = BranchingProcess<S, L>;

    fn operation_name(&self) -> &'static str {
        Self::NAME
    }

    fn exit_message(&self) -> String {
        format!(
            "Finished {}, prefix has {} events and {} conditions",
            Self::NAME,
            self.result.events.len(),
            self.result.conditions.len()
        )
    }

    fn result(&self) -> &BranchingProcess<S, L> {
        &self.result
    }

    fn into_result(self) -> BranchingProcess<S, L> {
        self.result
    }

    /// Replays the local configuration of every event in the net, and for a complete
    /// prefix compares the markings of cutoff-free configurations with the reachable
    /// markings of the net.
    fn check_result<F: StateFactory<Self::State>>(&self, _factory: &F) -> Result<bool> {
        let process = &self.result;
        for (e, event) in process.events.iter().enumerate() {
            self.cancel.check(Self::NAME)?;
            let replayed = process.net.fire_sequence(&process.configuration_run(e))?;
            if replayed.as_ref() != Some(&event.marking) {
                return Err(AutomataError::Verification {
                    operation: Self::NAME,
                    reason: format!("local configuration of e{e} does not reach its marking"),
                });
            }
        }
        if self.stopped_early {
            return Ok(true);
        }
        let represented = process.cutoff_free_markings(&self.cancel)?;
        let reachable: Set<IntSet> = process.net.reachable_markings(&self.cancel)?.into_iter().collect();
        if let Some(missing) = reachable.iter().find(|m| !represented.contains(*m)) {
            return Err(AutomataError::Verification {
                operation: Self::NAME,
                reason: format!("reachable marking {missing:?} is not represented in the prefix"),
            });
        }
        if represented.len() != reachable.len() {
            return Err(AutomataError::Verification {
                operation: Self::NAME,
                reason: "prefix represents an unreachable marking".into(),
            });
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        factory::StringFactory,
        petri::{tests::producer_consumer, PetriNetBuilder},
    };

    #[test_log::test]
    fn producer_consumer_prefix_is_finite_and_complete() {
        let net = producer_consumer();
        let op = PetriNetUnfolder::new(&net, UnfoldingOptions::default(), &CancelToken::new()).unwrap();
        let prefix = op.result();
        assert!(prefix.cutoff_events().count() >= 1);
        // the consumer finishing reproduces the initial marking, the root is the companion
        let back = prefix
            .cutoff_events()
            .find(|e| prefix.events()[*e].marking() == net.initial_marking())
            .unwrap();
        assert_eq!(prefix.events()[back].companion(), Some(BranchingProcess::<String, char>::ROOT));
        assert!(!op.stopped_early());
        assert_eq!(op.check_result(&StringFactory), Ok(true));
    }

    #[test]
    fn conditions_of_one_event_are_concurrent() {
        let net = producer_consumer();
        let op = PetriNetUnfolder::new(&net, UnfoldingOptions::default(), &CancelToken::new()).unwrap();
        let prefix = op.result();
        for event in prefix.events() {
            for (c, d) in event.postset().iter().tuple_combinations() {
                assert!(prefix.is_co(*c, *d));
            }
            for (c, d) in event.preset().iter().tuple_combinations() {
                assert!(prefix.is_co(*c, *d));
            }
            // a consumed condition is never concurrent with what its consumer produces
            for (c, d) in event.preset().iter().cartesian_product(event.postset()) {
                assert!(!prefix.is_co(*c, *d));
            }
        }
    }

    #[test]
    fn both_criteria_are_complete() {
        let net = producer_consumer();
        let cancel = CancelToken::new();
        let mcmillan = PetriNetUnfolder::new(
            &net,
            UnfoldingOptions::default().with_cutoff(CutoffCriterion::McMillan),
            &cancel,
        )
        .unwrap();
        let erv = PetriNetUnfolder::new(&net, UnfoldingOptions::default(), &cancel).unwrap();
        assert_eq!(erv.options().cutoff(), CutoffCriterion::Erv);
        assert_eq!(mcmillan.check_result(&StringFactory), Ok(true));
        assert_eq!(erv.check_result(&StringFactory), Ok(true));
        assert!(erv.result().events().len() <= mcmillan.result().events().len());
    }

    #[test]
    fn accepting_runs_are_extracted() {
        let net = producer_consumer();
        let options = UnfoldingOptions::default().with_stop_at_accepting(true);
        let op = PetriNetUnfolder::new(&net, options, &CancelToken::new()).unwrap();
        assert!(op.stopped_early());
        let word = op.result().accepting_word().unwrap();
        assert_eq!(word, vec!['p', 's', 'c']);
        assert!(net.accepts(&word).unwrap());
        assert_eq!(op.check_result(&StringFactory), Ok(true));
    }

    #[test]
    fn unsafe_nets_are_reported() {
        let net: PetriNet<String, char> = PetriNetBuilder::default()
            .with_initial(["a"])
            .with_transition('t', ["a"], ["a", "b"])
            .build()
            .unwrap();
        let res = PetriNetUnfolder::new(&net, UnfoldingOptions::default(), &CancelToken::new());
        assert!(matches!(res.err(), Some(AutomataError::UnsafeNet(_))));
    }

    #[test]
    fn cancellation_is_observed() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let res = PetriNetUnfolder::new(&producer_consumer(), UnfoldingOptions::default(), &cancel);
        assert!(res.err().is_some_and(|e| e.is_cancelled()));
    }
}
