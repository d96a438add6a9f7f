use itertools::Itertools;

use crate::{alphabet::LetterKind, CancelToken, Element, NestedAlphabet, Result};

mod product;
pub use product::{BuchiIntersect, BuchiProductNwa, Intersect, ProductNwa};

mod complement;
pub use complement::{BuchiComplementFkv, ComplementOptions, LevelRanking};

mod simulation;
pub use simulation::ReduceDirectSimulation;

/// Longest stem enumerated by [`lasso_counterexample`].
pub(crate) const LASSO_STEM: usize = 2;
/// Longest cycle enumerated by [`lasso_counterexample`].
pub(crate) const LASSO_CYCLE: usize = 3;

/// Enumerates ultimately periodic words `stem cycle^ω` over the internal letters of
/// `alphabet` with `|stem| <= LASSO_STEM` and `1 <= |cycle| <= LASSO_CYCLE` and returns
/// the first one for which `holds` is `false`.
pub(crate) fn lasso_counterexample<L: Element>(
    alphabet: &NestedAlphabet<L>,
    cancel: &CancelToken,
    mut holds: impl FnMut(&[L], &[L]) -> Result<bool>,
) -> Result<Option<(Vec<L>, Vec<L>)>> {
    let internal = alphabet
        .iter()
        .filter(|(_, _, kind)| *kind == LetterKind::Internal)
        .map(|(_, l, _)| l.clone())
        .collect_vec();
    let flat = NestedAlphabet::internal_only(internal);
    let stems = crate::nwa::word::bounded_words(&flat, LASSO_STEM);
    let cycles = crate::nwa::word::bounded_words(&flat, LASSO_CYCLE);
    for stem in &stems {
        for cycle in cycles.iter().filter(|c| !c.is_empty()) {
            cancel.check("lasso check")?;
            if !holds(stem, cycle)? {
                tracing::debug!("lasso {:?} ({:?})^ω violates the check", stem, cycle);
                return Ok(Some((stem.clone(), cycle.clone())));
            }
        }
    }
    Ok(None)
}
