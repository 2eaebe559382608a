//! The embedded-interpreter contract.
//!
//! The runtime never implements a scripting language; it only resumes an
//! opaque coroutine and reacts to the outcome. A real embedding (Lua,
//! Wren, a WASM engine, ...) would implement [`Interpreter`] and supply an
//! [`InterpreterFactory`] when building a [`crate::service::Service`].
//! [`mock`] ships a trivial reference implementation used by this crate's
//! own tests and by the demo binaries under `cmd/`.

use std::sync::Arc;

use crate::service::Service;

/// Outcome of one `resume` call, mirroring the three dispositions a real
/// coroutine-based interpreter can return.
#[derive(Debug)]
pub enum ResumeOutcome {
    /// The coroutine yielded; it is still alive and may be resumed again.
    Yield,
    /// The coroutine's top-level function returned. In coroutine-based
    /// embeddings (Lua, etc.) this means the script has nothing left to
    /// do and the service should not be resumed again.
    Ok,
    /// The coroutine raised an error. `message` is used to build the
    /// backtrace/crash-log record.
    Error(String),
}

/// The interpreter operations a [`Service`](crate::service::Service)
/// drives. Implementors own one interpreter instance (e.g. one `lua_State`)
/// bound to a single service for its whole lifetime.
pub trait Interpreter: Send {
    /// Open the embedding's standard library surface.
    fn open_stdlibs(&mut self) {}

    /// Switch the interpreter's collector to generational mode, if it has
    /// one. A no-op for embeddings without a tunable GC.
    fn set_generational_gc(&mut self) {}

    /// Publish a value into the interpreter's registry under `key` so
    /// host-exposed functions can discover their embedding context (the
    /// bootstrap key).
    fn set_registry(&mut self, key: &str, value: Vec<u8>);

    /// Compile `code` into the interpreter's top-level coroutine.
    /// `chunk_name` is used for error messages and backtraces.
    fn compile(&mut self, code: &[u8], chunk_name: &str) -> Result<(), String>;

    /// Resume the top-level coroutine with zero arguments.
    fn resume(&mut self) -> ResumeOutcome;

    /// Render a backtrace of the currently-running coroutine into `buf`,
    /// truncating cleanly at the buffer end. Returns the number of bytes
    /// written.
    fn backtrace(&self, buf: &mut [u8]) -> usize {
        let _ = buf;
        0
    }
}

/// Constructs one [`Interpreter`] per service, given an owning handle back
/// to that service. A real embedding's host-exposed functions (send/recv,
/// memory stats, ...) close over this handle the same way the bootstrap
/// key closes over the registry: it is the one thread a concrete embedding
/// needs to reach back into its own inbox, outbox and stats block.
pub trait InterpreterFactory: Send + Sync {
    fn create(&self, handle: Arc<Service>) -> Box<dyn Interpreter>;
}

impl<F> InterpreterFactory for F
where
    F: Fn(Arc<Service>) -> Box<dyn Interpreter> + Send + Sync,
{
    fn create(&self, handle: Arc<Service>) -> Box<dyn Interpreter> {
        self(handle)
    }
}

/// Minimal reference implementations of [`Interpreter`], used by this
/// crate's tests and by the `cmd/` demo binaries in place of a real
/// scripting language.
pub mod mock {
    use super::*;

    /// An interpreter driven entirely by a host-supplied closure. `compile`
    /// just records the chunk name; every `resume` call defers to the
    /// closure, which decides whether to yield, finish, or error. The
    /// closure receives the owning service handle so tests can exercise
    /// message send/receive without a real scripting language.
    pub struct ClosureInterpreter {
        handle: Arc<Service>,
        chunk_name: String,
        step: Box<dyn FnMut(&Service) -> ResumeOutcome + Send>,
    }

    impl ClosureInterpreter {
        pub fn new(handle: Arc<Service>, step: impl FnMut(&Service) -> ResumeOutcome + Send + 'static) -> Self {
            Self { handle, chunk_name: String::new(), step: Box::new(step) }
        }

        pub fn factory(
            step: impl Fn() -> Box<dyn FnMut(&Service) -> ResumeOutcome + Send> + Send + Sync + 'static,
        ) -> impl InterpreterFactory {
            move |handle: Arc<Service>| -> Box<dyn Interpreter> {
                Box::new(ClosureInterpreter { handle, chunk_name: String::new(), step: step() })
            }
        }
    }

    impl Interpreter for ClosureInterpreter {
        fn set_registry(&mut self, _key: &str, _value: Vec<u8>) {}

        fn compile(&mut self, _code: &[u8], chunk_name: &str) -> Result<(), String> {
            self.chunk_name = chunk_name.to_string();
            Ok(())
        }

        fn resume(&mut self) -> ResumeOutcome {
            (self.step)(&self.handle)
        }

        fn backtrace(&self, buf: &mut [u8]) -> usize {
            let line = format!("{}: in main chunk\n", self.chunk_name);
            let bytes = line.as_bytes();
            let n = bytes.len().min(buf.len());
            buf[..n].copy_from_slice(&bytes[..n]);
            n
        }
    }

    /// Always yields. Used for services that should stay alive for the
    /// whole scheduler run, never completing on their own.
    pub fn forever_yielding() -> impl InterpreterFactory {
        |handle: Arc<Service>| -> Box<dyn Interpreter> {
            Box::new(ClosureInterpreter::new(handle, |_| ResumeOutcome::Yield))
        }
    }

    /// Yields for every resume except the last of `n`, which finishes.
    pub fn yields_n_then_done(n: u32) -> impl InterpreterFactory {
        move |handle: Arc<Service>| -> Box<dyn Interpreter> {
            let mut remaining = n;
            Box::new(ClosureInterpreter::new(handle, move |_| {
                if remaining == 0 {
                    ResumeOutcome::Ok
                } else {
                    remaining -= 1;
                    ResumeOutcome::Yield
                }
            }))
        }
    }

    /// Errors on the very first resume. Used to exercise the crash-log /
    /// backtrace path.
    pub fn always_errors(message: impl Into<String>) -> impl InterpreterFactory {
        let message = message.into();
        move |handle: Arc<Service>| -> Box<dyn Interpreter> {
            let message = message.clone();
            Box::new(ClosureInterpreter::new(handle, move |_| ResumeOutcome::Error(message.clone())))
        }
    }

    /// Echoes every inbound message straight back to its sender, bumping
    /// `replies` each time. Used by the stress/benchmark binaries to drive
    /// real message traffic through the scheduler without a scripting
    /// language in the loop.
    pub fn echo(replies: std::sync::Arc<std::sync::atomic::AtomicU64>) -> impl InterpreterFactory {
        move |handle: Arc<Service>| -> Box<dyn Interpreter> {
            let replies = std::sync::Arc::clone(&replies);
            Box::new(ClosureInterpreter::new(handle, move |svc| {
                if let Some(msg) = svc.pop_message() {
                    let reply = svc_core::Message::new(
                        svc.id(),
                        msg.from,
                        msg.session,
                        svc_core::MessageType::Response,
                        msg.payload,
                    );
                    let _ = svc.send_message(reply);
                    replies.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
                ResumeOutcome::Yield
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;
    use crate::service::Service;
    use svc_core::ServiceId;

    fn handle(id: u32) -> Arc<Service> {
        Arc::new(Service::new(ServiceId::from_raw(id), 4))
    }

    #[test]
    fn forever_yielding_never_finishes() {
        let factory = forever_yielding();
        let mut interp = factory.create(handle(1));
        for _ in 0..5 {
            assert!(matches!(interp.resume(), ResumeOutcome::Yield));
        }
    }

    #[test]
    fn yields_n_then_done_finishes_on_schedule() {
        let factory = yields_n_then_done(2);
        let mut interp = factory.create(handle(1));
        assert!(matches!(interp.resume(), ResumeOutcome::Yield));
        assert!(matches!(interp.resume(), ResumeOutcome::Yield));
        assert!(matches!(interp.resume(), ResumeOutcome::Ok));
    }

    #[test]
    fn always_errors_reports_message() {
        let factory = always_errors("boom");
        let mut interp = factory.create(handle(1));
        match interp.resume() {
            ResumeOutcome::Error(msg) => assert_eq!(msg, "boom"),
            other => panic!("expected error, got {other:?}"),
        }
    }
}
