use std::collections::VecDeque;

use itertools::Itertools;
use tracing::{debug, trace};

use crate::{
    indexer::Indexer, math::Set, AutomataError, CancelToken, Element, IntSet, PlaceId, Result,
    TransitionId,
};

/// A transition of a [`PetriNet`], labelled by a letter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetTransition<L> {
    letter: L,
    preset: IntSet,
    postset: IntSet,
}

impl<L> NetTransition<L> {
    /// The label.
    pub fn letter(&self) -> &L {
        &self.letter
    }

    /// Places consumed by firing the transition, never empty.
    pub fn preset(&self) -> &IntSet {
        &self.preset
    }

    /// Places marked by firing the transition.
    pub fn postset(&self) -> &IntSet {
        &self.postset
    }
}

/// A labelled Petri net with 1-safe semantics: a marking is a set of places. A marking
/// is accepting if it contains an accepting place.
#[derive(Clone)]
pub struct PetriNet<S: Element, L: Element> {
    places: Indexer<S>,
    transitions: Vec<NetTransition<L>>,
    initial: IntSet,
    accepting: IntSet,
}

impl<S: Element, L: Element> Default for PetriNet<S, L> {
    fn default() -> Self {
        Self {
            places: Indexer::new(),
            transitions: vec![],
            initial: IntSet::new(),
            accepting: IntSet::new(),
        }
    }
}

impl<S: Element, L: Element> PetriNet<S, L> {
    /// Creates a net without places and transitions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a place, or returns the id of an existing equal place. The flags are added
    /// to the ones the place already has.
    pub fn add_place(&mut self, place: S, initial: bool, accepting: bool) -> PlaceId {
        let (id, _) = self.places.register(place);
        if initial {
            self.initial.insert(id);
        }
        if accepting {
            self.accepting.insert(id);
        }
        id
    }

    /// Adds a transition between known places.
    pub fn add_transition_ids(&mut self, letter: L, preset: IntSet, postset: IntSet) -> Result<TransitionId> {
        if preset.is_empty() {
            return Err(AutomataError::EmptyPreset(format!("{letter:?}")));
        }
        if let Some(bad) = preset.iter().chain(postset.iter()).find(|p| *p >= self.places.len()) {
            return Err(AutomataError::UnknownPlace(format!("#{bad}")));
        }
        self.transitions.push(NetTransition {
            letter,
            preset,
            postset,
        });
        Ok(self.transitions.len() - 1)
    }

    /// Adds a transition, the places have to be added before.
    pub fn add_transition(&mut self, letter: L, preset: &[S], postset: &[S]) -> Result<TransitionId> {
        let ids = |places: &[S]| -> Result<IntSet> {
            places
                .iter()
                .map(|p| {
                    self.places
                        .id_of(p)
                        .ok_or_else(|| AutomataError::UnknownPlace(format!("{p:?}")))
                })
                .collect()
        };
        let (preset, postset) = (ids(preset)?, ids(postset)?);
        self.add_transition_ids(letter, preset, postset)
    }

    /// Number of places.
    pub fn place_count(&self) -> usize {
        self.places.len()
    }

    /// Number of transitions.
    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }

    /// The place with id `p`.
    pub fn place(&self, p: PlaceId) -> Option<&S> {
        self.places.get(p)
    }

    /// The id of `place`.
    pub fn place_id(&self, place: &S) -> Option<PlaceId> {
        self.places.id_of(place)
    }

    /// The transition with id `t`.
    pub fn transition(&self, t: TransitionId) -> Option<&NetTransition<L>> {
        self.transitions.get(t)
    }

    /// All transitions with their ids.
    pub fn transitions(&self) -> impl Iterator<Item = (TransitionId, &NetTransition<L>)> + '_ {
        self.transitions.iter().enumerate()
    }

    /// The distinct letters labelling transitions, in order of first use.
    pub fn letters(&self) -> Vec<L> {
        self.transitions.iter().map(|t| t.letter.clone()).unique().collect()
    }

    /// The initial marking.
    pub fn initial_marking(&self) -> &IntSet {
        &self.initial
    }

    /// The accepting places.
    pub fn accepting_places(&self) -> &IntSet {
        &self.accepting
    }

    /// `true` iff `marking` contains an accepting place.
    pub fn is_accepting(&self, marking: &IntSet) -> bool {
        marking.intersects(&self.accepting)
    }

    /// `true` iff the pre-set of `t` is marked.
    pub fn is_enabled(&self, marking: &IntSet, t: TransitionId) -> bool {
        self.transitions
            .get(t)
            .is_some_and(|transition| transition.preset.subset_of(marking))
    }

    /// Fires the enabled transition `t`. Fails with [`AutomataError::UnsafeNet`] if a place
    /// of the post-set stays marked after the pre-set was emptied.
    pub fn fire(&self, marking: &IntSet, t: TransitionId) -> Result<IntSet> {
        let transition = self
            .transitions
            .get(t)
            .ok_or(AutomataError::InvalidTransitionId(t))?;
        debug_assert!(transition.preset.subset_of(marking));
        let mut next = marking.clone();
        next.and_not(&transition.preset);
        if let Some(p) = next.iter().find(|p| transition.postset.contains(*p)) {
            return Err(AutomataError::UnsafeNet(self.place_name(p)));
        }
        next.or(&transition.postset);
        Ok(next)
    }

    pub(crate) fn place_name(&self, p: PlaceId) -> String {
        self.places
            .get(p)
            .map_or_else(|| format!("#{p}"), |place| format!("{place:?}"))
    }

    /// Fires `sequence` from the initial marking. Returns `None` if some transition is not
    /// enabled when it is its turn.
    pub fn fire_sequence(&self, sequence: &[TransitionId]) -> Result<Option<IntSet>> {
        let mut marking = self.initial.clone();
        for &t in sequence {
            if !self.is_enabled(&marking, t) {
                return Ok(None);
            }
            marking = self.fire(&marking, t)?;
        }
        Ok(Some(marking))
    }

    /// All markings reachable from the initial marking, in breadth-first order.
    pub fn reachable_markings(&self, cancel: &CancelToken) -> Result<Vec<IntSet>> {
        let mut seen: Set<IntSet> = Set::default();
        let mut order = vec![];
        let mut queue = VecDeque::from([self.initial.clone()]);
        seen.insert(self.initial.clone());
        while let Some(marking) = queue.pop_front() {
            cancel.check("reachable markings")?;
            for t in 0..self.transitions.len() {
                if !self.is_enabled(&marking, t) {
                    continue;
                }
                let next = self.fire(&marking, t)?;
                if seen.insert(next.clone()) {
                    trace!("{:?} -{}-> {:?}", marking, t, next);
                    queue.push_back(next);
                }
            }
            order.push(marking);
        }
        debug!("net has {} reachable markings", order.len());
        Ok(order)
    }

    /// Checks whether some firing sequence labelled by `word` leads from the initial
    /// marking to an accepting marking.
    pub fn accepts(&self, word: &[L]) -> Result<bool> {
        let mut current: Set<IntSet> = Set::from_iter([self.initial.clone()]);
        for letter in word {
            let mut next = Set::default();
            for marking in &current {
                for (t, transition) in self.transitions() {
                    if transition.letter == *letter && self.is_enabled(marking, t) {
                        next.insert(self.fire(marking, t)?);
                    }
                }
            }
            if next.is_empty() {
                return Ok(false);
            }
            current = next;
        }
        Ok(current.iter().any(|m| self.is_accepting(m)))
    }
}

impl<S: Element, L: Element> std::fmt::Debug for PetriNet<S, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "places: {:?}", self.places)?;
        for (t, transition) in self.transitions() {
            writeln!(
                f,
                "t{t}: {:?} -{:?}-> {:?}",
                transition.preset, transition.letter, transition.postset
            )?;
        }
        write!(f, "initial {:?}, accepting {:?}", self.initial, self.accepting)
    }
}

/// Builds a [`PetriNet`] from lists of places and transitions, in the manner of
/// [`crate::NwaBuilder`].
///
/// # Example
///
/// ```
/// use nested_automata::prelude::*;
///
/// let net: PetriNet<String, char> = PetriNetBuilder::default()
///     .with_initial(["idle"])
///     .with_accepting(["busy"])
///     .with_transition('s', ["idle"], ["busy"])
///     .build()
///     .unwrap();
/// assert!(net.accepts(&['s']).unwrap());
/// ```
pub struct PetriNetBuilder<S: Element, L: Element> {
    places: Vec<(S, bool, bool)>,
    transitions: Vec<(L, Vec<S>, Vec<S>)>,
}

impl<S: Element, L: Element> Default for PetriNetBuilder<S, L> {
    fn default() -> Self {
        Self {
            places: vec![],
            transitions: vec![],
        }
    }
}

impl<S: Element, L: Element> PetriNetBuilder<S, L> {
    /// Declares plain places.
    pub fn with_places<X: Into<S>>(mut self, places: impl IntoIterator<Item = X>) -> Self {
        self.places
            .extend(places.into_iter().map(|p| (p.into(), false, false)));
        self
    }

    /// Declares places that are marked initially.
    pub fn with_initial<X: Into<S>>(mut self, places: impl IntoIterator<Item = X>) -> Self {
        self.places
            .extend(places.into_iter().map(|p| (p.into(), true, false)));
        self
    }

    /// Declares accepting places.
    pub fn with_accepting<X: Into<S>>(mut self, places: impl IntoIterator<Item = X>) -> Self {
        self.places
            .extend(places.into_iter().map(|p| (p.into(), false, true)));
        self
    }

    /// Adds a transition. Places mentioned here that were not declared are added as plain
    /// places.
    pub fn with_transition<X: Into<S>>(
        mut self,
        letter: L,
        preset: impl IntoIterator<Item = X>,
        postset: impl IntoIterator<Item = X>,
    ) -> Self {
        let preset = preset.into_iter().map(Into::into).collect_vec();
        let postset = postset.into_iter().map(Into::into).collect_vec();
        self.places.extend(
            preset
                .iter()
                .chain(postset.iter())
                .map(|p| (p.clone(), false, false)),
        );
        self.transitions.push((letter, preset, postset));
        self
    }

    /// Builds the net.
    pub fn build(self) -> Result<PetriNet<S, L>> {
        let mut net = PetriNet::new();
        for (place, initial, accepting) in self.places {
            net.add_place(place, initial, accepting);
        }
        for (letter, preset, postset) in self.transitions {
            net.add_transition(letter, &preset, &postset)?;
        }
        Ok(net)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::petri::tests::producer_consumer;

    #[test]
    fn firing_and_reachability() {
        let net = producer_consumer();
        assert_eq!(net.place_count(), 6);
        let markings = net.reachable_markings(&CancelToken::new()).unwrap();
        assert_eq!(markings.len(), 8);
        assert_eq!(&markings[0], net.initial_marking());

        let produce = 0;
        assert!(net.is_enabled(net.initial_marking(), produce));
        assert!(!net.is_enabled(net.initial_marking(), 1));
        let after = net.fire_sequence(&[0, 1, 2]).unwrap().unwrap();
        assert!(net.is_accepting(&after));
        assert_eq!(net.fire_sequence(&[1]).unwrap(), None);
    }

    #[test]
    fn words_of_the_net() {
        let net = producer_consumer();
        assert!(net.accepts(&['p', 's', 'c']).unwrap());
        assert!(net.accepts(&['p', 's', 'p', 'c', 's', 'd', 'c']).unwrap());
        assert!(!net.accepts(&['p', 's']).unwrap());
        assert!(!net.accepts(&['s']).unwrap());
        assert_eq!(net.letters(), vec!['p', 's', 'c', 'd']);
    }

    #[test]
    fn malformed_nets_are_rejected() {
        let res = PetriNetBuilder::<String, char>::default()
            .with_initial(["a"])
            .with_transition('t', Vec::<String>::new(), vec!["a".to_string()])
            .build();
        assert!(matches!(res, Err(AutomataError::EmptyPreset(_))));

        let mut net = PetriNet::<String, char>::new();
        net.add_place("a".to_string(), true, false);
        assert!(matches!(
            net.add_transition('t', &["a".to_string()], &["b".to_string()]),
            Err(AutomataError::UnknownPlace(_))
        ));
        assert_eq!(
            net.fire(net.initial_marking(), 3),
            Err(AutomataError::InvalidTransitionId(3))
        );
    }

    #[test]
    fn double_marking_is_unsafe() {
        let net: PetriNet<String, char> = PetriNetBuilder::default()
            .with_initial(["a"])
            .with_transition('t', ["a"], ["a", "b"])
            .build()
            .unwrap();
        let once = net.fire(net.initial_marking(), 0).unwrap();
        assert!(matches!(net.fire(&once, 0), Err(AutomataError::UnsafeNet(_))));
        assert!(net.reachable_markings(&CancelToken::new()).is_err());
    }
}
