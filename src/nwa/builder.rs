use crate::{Element, NestedAlphabet, Nwa, Result};

/// Helper struct for the construction of nested-word automata from lists of states and
/// transitions. States are registered in the order in which they are declared, a state
/// that is declared twice keeps its first id and collects all flags it was declared with.
/// Transitions may only mention declared states, otherwise [`NwaBuilder::build`] fails.
///
/// # Example
///
/// ```
/// use nested_automata::prelude::*;
///
/// let nwa: Nwa<String, char> = NwaBuilder::nested(['a'], ['c'], ['r'])
///     .unwrap()
///     .with_initial(["p"])
///     .with_states(["e"])
///     .with_final(["f"])
///     .with_call([("p", 'c', "e")])
///     .with_return([("e", "p", 'r', "f")])
///     .build()
///     .unwrap();
/// assert_eq!(nwa.size(), 3);
/// ```
pub struct NwaBuilder<S: Element, L: Element> {
    alphabet: NestedAlphabet<L>,
    states: Vec<(S, bool, bool)>,
    internal: Vec<(S, L, S)>,
    call: Vec<(S, L, S)>,
    ret: Vec<(S, S, L, S)>,
}

impl<L: Element> NwaBuilder<String, L> {
    /// A builder for an automaton with `String` states over internal letters only.
    pub fn internal(letters: impl IntoIterator<Item = L>) -> Self {
        Self::new(NestedAlphabet::internal_only(letters))
    }

    /// A builder for an automaton with `String` states over the given sub-alphabets.
    pub fn nested(
        internal: impl IntoIterator<Item = L>,
        call: impl IntoIterator<Item = L>,
        ret: impl IntoIterator<Item = L>,
    ) -> Result<Self> {
        Ok(Self::new(NestedAlphabet::new(internal, call, ret)?))
    }
}

impl<S: Element, L: Element> NwaBuilder<S, L> {
    /// A builder for an automaton over `alphabet`.
    pub fn new(alphabet: NestedAlphabet<L>) -> Self {
        Self {
            alphabet,
            states: vec![],
            internal: vec![],
            call: vec![],
            ret: vec![],
        }
    }

    /// Declares plain states.
    pub fn with_states<X: Into<S>>(mut self, states: impl IntoIterator<Item = X>) -> Self {
        self.states
            .extend(states.into_iter().map(|s| (s.into(), false, false)));
        self
    }

    /// Declares initial states.
    pub fn with_initial<X: Into<S>>(mut self, states: impl IntoIterator<Item = X>) -> Self {
        self.states
            .extend(states.into_iter().map(|s| (s.into(), true, false)));
        self
    }

    /// Declares final states.
    pub fn with_final<X: Into<S>>(mut self, states: impl IntoIterator<Item = X>) -> Self {
        self.states
            .extend(states.into_iter().map(|s| (s.into(), false, true)));
        self
    }

    /// Adds internal transitions `(source, letter, target)`.
    pub fn with_internal<X: Into<S>>(mut self, edges: impl IntoIterator<Item = (X, L, X)>) -> Self {
        self.internal
            .extend(edges.into_iter().map(|(p, a, q)| (p.into(), a, q.into())));
        self
    }

    /// Adds call transitions `(source, letter, target)`.
    pub fn with_call<X: Into<S>>(mut self, edges: impl IntoIterator<Item = (X, L, X)>) -> Self {
        self.call
            .extend(edges.into_iter().map(|(p, c, q)| (p.into(), c, q.into())));
        self
    }

    /// Adds return transitions `(source, hierarchical predecessor, letter, target)`.
    pub fn with_return<X: Into<S>>(
        mut self,
        edges: impl IntoIterator<Item = (X, X, L, X)>,
    ) -> Self {
        self.ret.extend(
            edges
                .into_iter()
                .map(|(p, h, r, q)| (p.into(), h.into(), r, q.into())),
        );
        self
    }

    /// Builds the automaton, failing on the first transition that mentions an undeclared
    /// state or uses a letter of the wrong kind.
    pub fn build(self) -> Result<Nwa<S, L>> {
        let mut nwa = Nwa::new(self.alphabet);
        for (state, initial, is_final) in self.states {
            nwa.add_state(state, initial, is_final);
        }
        for (p, a, q) in &self.internal {
            nwa.add_internal(p, a, q)?;
        }
        for (p, c, q) in &self.call {
            nwa.add_call(p, c, q)?;
        }
        for (p, h, r, q) in &self.ret {
            nwa.add_return(p, h, r, q)?;
        }
        Ok(nwa)
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[test]
    fn builder_reports_undeclared_states() {
        let res: Result<Nwa<String, char>> = NwaBuilder::internal(['a'])
            .with_initial(["p"])
            .with_internal([("p", 'a', "q")])
            .build();
        assert_eq!(res.unwrap_err(), AutomataError::UnknownState("\"q\"".into()));
    }

    #[test]
    fn flags_accumulate() {
        let nwa = NwaBuilder::internal(['a'])
            .with_initial(["p"])
            .with_final(["p"])
            .build()
            .unwrap();
        assert_eq!(nwa.size(), 1);
        assert!(nwa.is_initial_id(0) && nwa.is_final_id(0));
    }
}
