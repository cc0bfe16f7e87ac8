//! The embedded interpreter seen from the relay.
//!
//! The relay never looks inside a program. It needs one capability from an
//! interpreter: take arguments, accept the yield-to-host binding, run the
//! top-level program, dispatch events, and finish. [`Interpreter`] is that
//! capability; [`InterpreterHandle`] enforces that at most one interpreter
//! is live in the process at a time.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::arguments::ArgumentList;
use crate::error::{Error, Result};
use crate::events::EventRecord;
use crate::runner::RelayLink;

/// A resumable program driven by the relay.
///
/// Every method is called on the thread that created the interpreter.
/// Dropping the interpreter finalizes it.
pub trait Interpreter {
    /// Parse process-style arguments as the interpreter's configuration.
    fn configure(&mut self, args: &ArgumentList) -> Result<()>;

    /// Make the yield-to-host primitive available to the program.
    fn bind(&mut self, host: HostLink) -> Result<()>;

    /// Run the top-level program until it returns.
    fn run(&mut self) -> Result<()>;

    /// Dispatch one event; `None` when the host passed no callback record.
    fn resume(&mut self, event: Option<&EventRecord>) -> Result<()>;

    /// Run the program's finalizer.
    fn finish(&mut self) -> Result<()>;
}

/// Creates the interpreter on the thread that will drive it.
pub type InterpreterFactory = Box<dyn FnOnce() -> Result<Box<dyn Interpreter>> + Send>;

/// What handed control back to a program that yielded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resumption {
    /// The host delivered an event.
    Event(Option<EventRecord>),
    /// The host is shutting down; the program should return.
    Finish,
    /// No other thread to yield to; the program keeps control.
    Detached,
}

/// The program's way back to the host.
#[derive(Clone)]
pub enum HostLink {
    /// Interpreter runs on the host thread.
    Direct,
    /// Interpreter runs on its own thread behind a rendezvous.
    Relay(RelayLink),
}

impl HostLink {
    /// Pass control to the host until it resumes the program.
    pub fn yield_host(&self) -> Result<Resumption> {
        match self {
            HostLink::Direct => {
                log::debug!("yield_host: direct mode, nothing to yield to");
                Ok(Resumption::Detached)
            }
            HostLink::Relay(link) => link.yield_from_program(),
        }
    }

    /// True once the host has asked the program to finish.
    pub fn is_finishing(&self) -> bool {
        match self {
            HostLink::Direct => false,
            HostLink::Relay(link) => link.is_finishing(),
        }
    }
}

impl fmt::Debug for HostLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostLink::Direct => f.write_str("HostLink::Direct"),
            HostLink::Relay(_) => f.write_str("HostLink::Relay"),
        }
    }
}

static INTERPRETER_LIVE: AtomicBool = AtomicBool::new(false);

/// A claim on the process-wide slot; gives it back on drop, including
/// when the factory unwinds, unless kept by a handle.
struct SlotClaim {
    kept: bool,
}

impl SlotClaim {
    fn take() -> Result<Self> {
        INTERPRETER_LIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| Self { kept: false })
            .map_err(|_| Error::InterpreterLive)
    }

    fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for SlotClaim {
    fn drop(&mut self) {
        if !self.kept {
            INTERPRETER_LIVE.store(false, Ordering::SeqCst);
        }
    }
}

/// The one initialized interpreter of this process.
pub struct InterpreterHandle {
    interpreter: Box<dyn Interpreter>,
}

impl InterpreterHandle {
    /// Claim the process-wide slot and initialize an interpreter in it.
    ///
    /// The factory is not called when another interpreter is live.
    pub fn acquire(factory: InterpreterFactory) -> Result<Self> {
        let claim = SlotClaim::take()?;
        let interpreter = factory()?;
        claim.keep();
        log::debug!("interpreter initialized");
        Ok(Self { interpreter })
    }

    /// Whether an interpreter is currently live in this process.
    pub fn is_live() -> bool {
        INTERPRETER_LIVE.load(Ordering::SeqCst)
    }

    pub fn configure(&mut self, args: &ArgumentList) -> Result<()> {
        self.interpreter.configure(args)
    }

    pub fn bind(&mut self, host: HostLink) -> Result<()> {
        self.interpreter.bind(host)
    }

    pub fn run(&mut self) -> Result<()> {
        self.interpreter.run()
    }

    pub fn resume(&mut self, event: Option<&EventRecord>) -> Result<()> {
        self.interpreter.resume(event)
    }

    pub fn finish(&mut self) -> Result<()> {
        self.interpreter.finish()
    }
}

impl Drop for InterpreterHandle {
    fn drop(&mut self) {
        log::debug!("interpreter finalized");
        INTERPRETER_LIVE.store(false, Ordering::SeqCst);
    }
}

impl fmt::Debug for InterpreterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterpreterHandle").finish_non_exhaustive()
    }
}
