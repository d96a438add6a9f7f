use thiserror::Error;

use crate::{LetterId, StateId, TransitionId};

/// Everything that can go wrong when constructing automata or running an operation
/// on them. Conflicts that are recovered internally (e.g. by backtracking in the
/// clause solver) never surface as an [`AutomataError`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AutomataError {
    /// The [`crate::CancelToken`] handed to an operation was tripped.
    #[error("operation {operation} was cancelled")]
    Cancelled {
        /// Name of the operation that observed the cancellation.
        operation: &'static str,
    },
    /// A transition or query referenced a state that was never added.
    #[error("unknown state {0}")]
    UnknownState(String),
    /// A transition or word referenced a letter that is not part of the alphabet.
    #[error("unknown letter {0}")]
    UnknownLetter(String),
    /// A letter was used as a transition of the wrong kind, e.g. a call letter
    /// on an internal transition.
    #[error("letter {letter} is a {actual} letter but was used as a {expected} letter")]
    WrongLetterKind {
        /// Debug representation of the letter.
        letter: String,
        /// The kind the letter was used with.
        expected: &'static str,
        /// The kind the letter was declared with.
        actual: &'static str,
    },
    /// The same letter was declared in two of the three sub-alphabets.
    #[error("letter {0} occurs in more than one sub-alphabet")]
    DuplicateLetter(String),
    /// A state id is out of bounds for the automaton it was used with.
    #[error("state id {0} does not exist")]
    InvalidStateId(StateId),
    /// A letter id is out of bounds for the alphabet it was used with.
    #[error("letter id {0} does not exist")]
    InvalidLetterId(LetterId),
    /// Relabelling gave two distinct states the same object.
    #[error("state {0} would stand for more than one state")]
    DuplicateState(String),
    /// A net transition referenced a place that does not exist.
    #[error("unknown place {0}")]
    UnknownPlace(String),
    /// A transition id is out of bounds for the net it was used with.
    #[error("transition id {0} does not exist")]
    InvalidTransitionId(TransitionId),
    /// Net transitions need at least one place in their pre-set.
    #[error("transition {0} has an empty pre-set")]
    EmptyPreset(String),
    /// Firing produced a second token on a place.
    #[error("net is not 1-safe: place {0} would carry two tokens")]
    UnsafeNet(String),
    /// A clause mentions an atom that was never registered with the solver.
    #[error("clause references unregistered atom {0}")]
    UnregisteredAtom(usize),
    /// The operation cannot handle the given input.
    #[error("{operation} does not support this input: {reason}")]
    Unsupported {
        /// Name of the operation.
        operation: &'static str,
        /// What is missing.
        reason: String,
    },
    /// A post-hoc `check_result` found the result to be wrong.
    #[error("result of {operation} failed verification: {reason}")]
    Verification {
        /// Name of the operation whose result was checked.
        operation: &'static str,
        /// Description of the witnessed discrepancy.
        reason: String,
    },
}

impl AutomataError {
    /// Returns `true` if this error signals cooperative cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AutomataError::Cancelled { .. })
    }
}

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, AutomataError>;
