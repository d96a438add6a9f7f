use fastrand::Rng;
use itertools::Itertools;
use tracing::debug;

use crate::{
    petri::{PetriNet, PetriNetBuilder},
    NestedAlphabet, Nwa, Result,
};

/// Call letters used by the generators, at most this many call letters can be requested.
const CALLS: [char; 3] = ['(', '[', '{'];
/// Return letters used by the generators.
const RETURNS: [char; 3] = [')', ']', '}'];

/// Shape of the automata drawn by [`generate_random_nwa`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RandomNwaShape {
    /// Number of states.
    pub size: usize,
    /// Number of internal letters, starting with `a`.
    pub internal: usize,
    /// Number of call letters, at most 3.
    pub calls: usize,
    /// Number of return letters, at most 3.
    pub returns: usize,
    /// Probability of a transition for a given source and letter (and hierarchical
    /// predecessor); a second, nondeterministic target is drawn with half of it.
    pub density: f64,
    /// Probability of a state being final.
    pub final_probability: f64,
}

impl RandomNwaShape {
    /// A shape over internal letters only.
    pub fn flat(size: usize, internal: usize) -> Self {
        Self {
            size,
            internal,
            calls: 0,
            returns: 0,
            density: 0.5,
            final_probability: 0.3,
        }
    }

    /// A shape with one call and one return letter.
    pub fn nested(size: usize, internal: usize) -> Self {
        Self {
            calls: 1,
            returns: 1,
            ..Self::flat(size, internal)
        }
    }
}

/// The alphabet of `shape`: internal letters `a, b, ...`, calls `(`, `[`, `{` and the
/// matching returns.
pub fn random_alphabet(shape: &RandomNwaShape) -> Result<NestedAlphabet<char>> {
    NestedAlphabet::new(
        ('a'..='z').take(shape.internal),
        CALLS.into_iter().take(shape.calls),
        RETURNS.into_iter().take(shape.returns),
    )
}

/// Draws a random automaton with states `q0, q1, ...` of which `q0` is initial. For every
/// state and letter a transition to a random target exists with probability
/// `shape.density`, return transitions are drawn for every pair of linear and
/// hierarchical predecessor. The result may have unreachable states.
pub fn generate_random_nwa(rng: &mut Rng, shape: &RandomNwaShape) -> Result<Nwa<String, char>> {
    let alphabet = random_alphabet(shape)?;
    let mut nwa = Nwa::new(alphabet.clone());
    for q in 0..shape.size {
        nwa.add_state(format!("q{q}"), q == 0, rng.f64() < shape.final_probability);
    }
    let targets = |rng: &mut Rng| -> Vec<usize> {
        let mut out = vec![];
        if shape.size > 0 && rng.f64() < shape.density {
            out.push(rng.usize(..shape.size));
            if rng.f64() < shape.density / 2.0 {
                out.push(rng.usize(..shape.size));
            }
        }
        out
    };
    for p in 0..shape.size {
        for a in alphabet.internal_ids().collect_vec() {
            for q in targets(rng) {
                nwa.add_internal_ids(p, a, q)?;
            }
        }
        for c in alphabet.call_ids().collect_vec() {
            for q in targets(rng) {
                nwa.add_call_ids(p, c, q)?;
            }
        }
        for (h, r) in (0..shape.size).cartesian_product(alphabet.return_ids().collect_vec()) {
            for q in targets(rng) {
                nwa.add_return_ids(p, h, r, q)?;
            }
        }
    }
    debug!(
        "drew automaton with {} states and {} transitions",
        nwa.size(),
        nwa.transition_count()
    );
    Ok(nwa)
}

/// Draws a random 1-safe net made of `components` state machines with `places` places
/// each. Every component holds one token, initially on its first place. A transition
/// either moves the token of one component or, with probability `sync`, moves the
/// tokens of two components at once. The last place of the first component is
/// accepting. Letters are drawn from the first `letters` lower case letters.
pub fn generate_random_net(
    rng: &mut Rng,
    components: usize,
    places: usize,
    transitions: usize,
    letters: usize,
    sync: f64,
) -> Result<PetriNet<String, char>> {
    let place = |component: usize, i: usize| format!("m{component}.{i}");
    let mut builder = PetriNetBuilder::default()
        .with_initial((0..components).map(|k| place(k, 0)))
        .with_places((0..components).flat_map(|k| (0..places).map(move |i| place(k, i))))
        .with_accepting([place(0, places.saturating_sub(1))]);
    if components == 0 || places == 0 {
        return builder.build();
    }
    for _ in 0..transitions {
        let letter = ('a'..='z').nth(rng.usize(..letters.clamp(1, 26))).unwrap_or('a');
        let first = rng.usize(..components);
        let mut involved = vec![first];
        if components > 1 && rng.f64() < sync {
            let second = (first + 1 + rng.usize(..components - 1)) % components;
            involved.push(second);
        }
        let preset = involved.iter().map(|k| place(*k, rng.usize(..places))).collect_vec();
        let postset = involved.iter().map(|k| place(*k, rng.usize(..places))).collect_vec();
        builder = builder.with_transition(letter, preset, postset);
    }
    builder.build()
}

/// Draws a word of length `len` over all letters of `alphabet`. Calls and returns are
/// not balanced, so the word may contain pending returns.
pub fn generate_random_word(rng: &mut Rng, alphabet: &NestedAlphabet<char>, len: usize) -> Vec<char> {
    let letters = alphabet.iter().map(|(_, l, _)| *l).collect_vec();
    if letters.is_empty() {
        return vec![];
    }
    (0..len).map(|_| letters[rng.usize(..letters.len())]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buchi::ReduceDirectSimulation,
        emptiness::{BuchiIsEmpty, IsEmpty, SearchStrategy},
        factory::StringFactory,
        petri::{FinitePrefixToNet, PetriNetUnfolder, UnfoldingOptions},
        CancelToken, Operation,
    };

    #[test]
    fn generation_is_reproducible() {
        let shape = RandomNwaShape::nested(5, 2);
        let left = generate_random_nwa(&mut Rng::with_seed(7), &shape).unwrap();
        let right = generate_random_nwa(&mut Rng::with_seed(7), &shape).unwrap();
        assert_eq!(left.size(), 5);
        assert_eq!(
            left.return_transitions().collect_vec(),
            right.return_transitions().collect_vec()
        );
        assert_eq!(left.final_ids(), right.final_ids());

        let alphabet = random_alphabet(&shape).unwrap();
        let word = generate_random_word(&mut Rng::with_seed(7), &alphabet, 6);
        assert_eq!(word.len(), 6);
        assert!(word.iter().all(|l| alphabet.id_of(l).is_some()));
    }

    #[cfg(feature = "minimize")]
    #[test_log::test]
    fn reductions_keep_the_language_of_random_automata() {
        use crate::minimization::{MinimizeNwaMaxSat, MinimizeOptions};

        let cancel = CancelToken::new();
        for seed in 0..12 {
            let mut rng = Rng::with_seed(seed);
            let flat = generate_random_nwa(&mut rng, &RandomNwaShape::flat(5, 2)).unwrap();
            let nested = generate_random_nwa(&mut rng, &RandomNwaShape::nested(4, 1)).unwrap();

            let options = MinimizeOptions::default().with_check_depth(5);
            for nwa in [&flat, &nested] {
                let op = MinimizeNwaMaxSat::new(nwa, &StringFactory, options.clone(), &cancel).unwrap();
                assert!(op.result().size() <= nwa.size());
                assert_eq!(op.check_result(&StringFactory), Ok(true), "seed {seed}");
            }
            let op = ReduceDirectSimulation::new(&flat, &StringFactory, &cancel).unwrap();
            assert_eq!(op.check_result(&StringFactory), Ok(true), "seed {seed}");
        }
    }

    #[test]
    fn emptiness_checks_agree_on_random_automata() {
        let cancel = CancelToken::new();
        for seed in 0..12 {
            let mut rng = Rng::with_seed(seed);
            let nwa = generate_random_nwa(&mut rng, &RandomNwaShape::nested(5, 2)).unwrap();
            let bfs = IsEmpty::with_strategy(&nwa, SearchStrategy::BreadthFirst, &cancel).unwrap();
            let dfs = IsEmpty::with_strategy(&nwa, SearchStrategy::DepthFirst, &cancel).unwrap();
            assert_eq!(bfs.result(), dfs.result(), "seed {seed}");
            assert_eq!(bfs.check_result(&StringFactory), Ok(true));

            let buchi = BuchiIsEmpty::new(&nwa, &cancel).unwrap();
            // a Büchi accepting run has an accepting finite prefix
            if !*buchi.result() {
                assert!(!*bfs.result(), "seed {seed}");
            }
            assert!(buchi.check_result(&StringFactory).is_ok(), "seed {seed}");
        }
    }

    #[test]
    fn random_nets_have_complete_prefixes() {
        let cancel = CancelToken::new();
        for seed in 0..10 {
            let mut rng = Rng::with_seed(seed);
            let net = generate_random_net(&mut rng, 2, 3, 5, 2, 0.3).unwrap();
            let op = PetriNetUnfolder::new(&net, UnfoldingOptions::default(), &cancel).unwrap();
            assert_eq!(op.check_result(&StringFactory), Ok(true), "seed {seed}");
            let folded = FinitePrefixToNet::new(op.result(), &StringFactory, &cancel).unwrap();
            assert!(folded.result().place_count() <= op.result().conditions().len());
            assert_eq!(folded.check_result(&StringFactory), Ok(true), "seed {seed}");
        }
    }
}
