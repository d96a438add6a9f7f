use itertools::Itertools;

use crate::ConditionId;

/// Creates the states of result automata from the states of the inputs. The library
/// never invents state objects on its own, every derived state goes through a factory
/// supplied by the caller.
pub trait StateFactory<S> {
    /// A state standing for a block of merged states. Blocks are never empty and
    /// are sorted by state id.
    fn merge(&self, block: &[&S]) -> S;

    /// The state of a finite-word product.
    fn intersection(&self, left: &S, right: &S) -> S;

    /// The state of a Büchi product, `track` is `1` while waiting for an accepting
    /// state of the left automaton and `2` while waiting for the right one.
    fn buchi_intersection(&self, left: &S, right: &S, track: u8) -> S;

    /// A state of the rank-based complement. Every entry is a state of the
    /// input that is currently tracked, its rank and whether it still owes a visit to
    /// an odd rank.
    fn complement(&self, ranking: &[(&S, usize, bool)]) -> S;

    /// The place standing for `condition` (an occurrence of `place`) when a finite
    /// prefix is turned back into a net.
    fn finite_prefix_to_net(&self, place: &S, condition: ConditionId) -> S;
}

/// A [`StateFactory`] for `String` states that produces readable names.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringFactory;

impl StateFactory<String> for StringFactory {
    fn merge(&self, block: &[&String]) -> String {
        if block.len() == 1 {
            block[0].clone()
        } else {
            format!("{{{}}}", block.iter().join(", "))
        }
    }

    fn intersection(&self, left: &String, right: &String) -> String {
        format!("({left}, {right})")
    }

    fn buchi_intersection(&self, left: &String, right: &String, track: u8) -> String {
        format!("({left}, {right}, {track})")
    }

    fn complement(&self, ranking: &[(&String, usize, bool)]) -> String {
        format!(
            "[{}]",
            ranking
                .iter()
                .map(|(q, rank, owing)| format!("{q}:{rank}{}", if *owing { "*" } else { "" }))
                .join(", ")
        )
    }

    fn finite_prefix_to_net(&self, place: &String, condition: ConditionId) -> String {
        format!("c{condition}:{place}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_factory_names() {
        let (a, b) = ("a".to_string(), "b".to_string());
        assert_eq!(StringFactory.merge(&[&a]), "a");
        assert_eq!(StringFactory.merge(&[&a, &b]), "{a, b}");
        assert_eq!(StringFactory.intersection(&a, &b), "(a, b)");
        assert_eq!(StringFactory.buchi_intersection(&a, &b, 2), "(a, b, 2)");
        assert_eq!(StringFactory.complement(&[(&a, 2, true), (&b, 1, false)]), "[a:2*, b:1]");
        assert_eq!(StringFactory.finite_prefix_to_net(&a, 3), "c3:a");
    }
}
