use crate::{factory::StateFactory, Element, Result};

/// Common interface of every automaton operation. An operation computes its result
/// when it is constructed, afterwards the result can be inspected or taken out.
///
/// `check_result` is a separate, optional step. It re-validates the result with
/// independent means (emptiness of products, bounded word enumeration, replaying
/// firing sequences) and is never needed to obtain the result.
pub trait Operation: Sized {
    /// The state type of the automata involved.
    type State: Element;
    /// What the operation produces, e.g. an automaton or a boolean.
    type Output;

    /// A short, stable name of the operation.
    fn operation_name(&self) -> &'static str;

    /// Message reported when the operation starts. It is logged before the operation
    /// object exists, so it only gets the operation name.
    fn start_message(name: &'static str) -> String {
        format!("Start {name}")
    }

    /// Message reported once the result is available.
    fn exit_message(&self) -> String {
        format!("Finished {}", self.operation_name())
    }

    /// The computed result.
    fn result(&self) -> &Self::Output;

    /// Consumes the operation and returns its result.
    fn into_result(self) -> Self::Output;

    /// Verifies the result. Returns `Ok(true)` if it was verified, `Ok(false)` if the
    /// check does not apply to this input and an [`crate::AutomataError::Verification`]
    /// describing the discrepancy if the result is wrong.
    fn check_result<F: StateFactory<Self::State>>(&self, factory: &F) -> Result<bool>;
}

/// Reports [`Operation::start_message`] of `O`.
pub(crate) fn log_start<O: Operation>(name: &'static str) {
    tracing::info!("{}", O::start_message(name));
}

/// Reports the exit message of a finished operation.
pub(crate) fn log_exit<O: Operation>(op: &O) {
    tracing::info!("{}", op.exit_message());
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    use super::*;
    use crate::factory::StringFactory;

    struct Countdown(u32);

    impl Operation for Countdown {
        type State = String;
        type Output = u32;

        fn operation_name(&self) -> &'static str {
            "countdown"
        }

        fn start_message(name: &'static str) -> String {
            format!("Launching {name}")
        }

        fn result(&self) -> &u32 {
            &self.0
        }

        fn into_result(self) -> u32 {
            self.0
        }

        fn check_result<F: StateFactory<String>>(&self, _factory: &F) -> Result<bool> {
            Ok(true)
        }
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn overridden_messages_are_logged() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            log_start::<Countdown>("countdown");
            log_exit(&Countdown(3));
        });
        let logged = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("Launching countdown"));
        assert!(!logged.contains("Start countdown"));
        assert!(logged.contains("Finished countdown"));
        assert_eq!(Countdown(3).check_result(&StringFactory), Ok(true));
    }
}
