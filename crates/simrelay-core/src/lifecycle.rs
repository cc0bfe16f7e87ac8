//! Lifecycle controller: the three entry points the event source calls.
//!
//! ```text
//! Uninitialized --on_start--> Running --on_finish--> Finalized
//!                               |  ^
//!                               +--+ on_resume
//! ```
//!
//! Any entry point called from another state is a protocol violation and
//! is returned as such; the controller never guesses what the host meant.

use std::fmt;

use crate::arguments::{ArgumentList, CallSite, ReleaseTracker};
use crate::config::{RelayConfig, RunnerSettings, Variant};
use crate::error::{ProtocolViolation, Result};
use crate::events::{CallbackData, EventRecord};
use crate::interpreter::{HostLink, InterpreterFactory, InterpreterHandle};
use crate::rendezvous::ChannelStats;
use crate::runner::{RelayLink, Runner};

/// Where the relay is in its session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Uninitialized,
    Running,
    Finalized,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Uninitialized => f.write_str("uninitialized"),
            LifecycleState::Running => f.write_str("running"),
            LifecycleState::Finalized => f.write_str("finalized"),
        }
    }
}

/// The host callbacks the controller answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    Start,
    Resume,
    Finish,
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryPoint::Start => f.write_str("on_start"),
            EntryPoint::Resume => f.write_str("on_resume"),
            EntryPoint::Finish => f.write_str("on_finish"),
        }
    }
}

enum Backend {
    Direct(InterpreterHandle),
    Threaded(Runner),
}

/// Sequences host callbacks against the interpreter.
pub struct LifecycleController {
    config: RelayConfig,
    state: LifecycleState,
    factory: Option<InterpreterFactory>,
    backend: Option<Backend>,
    link: Option<RelayLink>,
    tracker: Option<ReleaseTracker>,
    resumes: u64,
}

impl LifecycleController {
    /// Create a controller; nothing is started until [`Self::on_start`].
    pub fn new(config: RelayConfig, factory: InterpreterFactory) -> Self {
        Self {
            config,
            state: LifecycleState::Uninitialized,
            factory: Some(factory),
            backend: None,
            link: None,
            tracker: None,
            resumes: 0,
        }
    }

    /// Report the release of the start arguments to `tracker`.
    pub fn with_release_tracker(mut self, tracker: ReleaseTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn variant(&self) -> Variant {
        self.config.variant
    }

    /// Number of events delivered so far.
    pub fn resumes(&self) -> u64 {
        self.resumes
    }

    /// Rendezvous counters; `None` in the direct variant or before start.
    pub fn channel_stats(&self) -> Option<ChannelStats> {
        self.link.as_ref().map(|link| link.channel().stats())
    }

    fn require(&self, entry: EntryPoint, required: LifecycleState) -> Result<()> {
        if self.state == required {
            Ok(())
        } else {
            log::error!("{} invoked while the relay is {}", entry, self.state);
            Err(ProtocolViolation::OutOfOrder {
                entry,
                state: self.state,
            }
            .into())
        }
    }

    /// Start the interpreter and run its top-level program up to the
    /// first point where it hands control back.
    pub fn on_start(
        &mut self,
        context: Option<&CallbackData<'_>>,
        site: Option<&dyn CallSite>,
    ) -> Result<()> {
        self.require(EntryPoint::Start, LifecycleState::Uninitialized)?;
        trace_context(EntryPoint::Start, context);

        let Some(factory) = self.factory.take() else {
            return Err(ProtocolViolation::OutOfOrder {
                entry: EntryPoint::Start,
                state: self.state,
            }
            .into());
        };

        let started = capture_arguments(site, self.tracker.as_ref()).and_then(|args| {
            match self.config.variant {
                Variant::Direct => start_direct(args, factory),
                Variant::Threaded => start_threaded(args, factory, &self.config.runner),
            }
        });

        match started {
            Ok(backend) => {
                if let Backend::Threaded(runner) = &backend {
                    self.link = Some(runner.link().clone());
                }
                self.backend = Some(backend);
                self.state = LifecycleState::Running;
                Ok(())
            }
            Err(e) => {
                log::error!("on_start failed: {}", e);
                self.state = LifecycleState::Finalized;
                Err(e)
            }
        }
    }

    /// Deliver one host callback to the program and return once it yields.
    pub fn on_resume(&mut self, context: Option<&CallbackData<'_>>) -> Result<()> {
        self.require(EntryPoint::Resume, LifecycleState::Running)?;
        trace_context(EntryPoint::Resume, context);

        let event = context.map(EventRecord::from_callback);
        self.resumes += 1;

        match &mut self.backend {
            Some(Backend::Direct(handle)) => {
                if let Err(e) = handle.resume(event.as_ref()) {
                    log::error!("resume raised: {}", e);
                }
                Ok(())
            }
            Some(Backend::Threaded(runner)) => runner.resume(event).map(|_| ()),
            None => Ok(()),
        }
    }

    /// Run the program's finalizer and tear the interpreter down.
    pub fn on_finish(&mut self, context: Option<&CallbackData<'_>>) -> Result<()> {
        self.require(EntryPoint::Finish, LifecycleState::Running)?;
        trace_context(EntryPoint::Finish, context);
        self.state = LifecycleState::Finalized;

        match self.backend.take() {
            Some(Backend::Direct(mut handle)) => {
                log::info!("Finishing program...");
                if let Err(e) = handle.finish() {
                    log::error!("finalizer raised: {}", e);
                }
                drop(handle);
                Ok(())
            }
            Some(Backend::Threaded(runner)) => {
                log::info!("Finishing program and joining interpreter thread...");
                runner.finish().map(|_| ())
            }
            None => Ok(()),
        }
    }
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("state", &self.state)
            .field("variant", &self.config.variant)
            .field("resumes", &self.resumes)
            .finish_non_exhaustive()
    }
}

/// Capture from an optional call site; no site means no arguments.
fn capture_arguments(
    site: Option<&dyn CallSite>,
    tracker: Option<&ReleaseTracker>,
) -> Result<ArgumentList> {
    let args = match site {
        Some(site) => ArgumentList::capture(site)?,
        None => {
            log::debug!("no call site; starting with no arguments");
            ArgumentList::new()
        }
    };
    Ok(match tracker {
        Some(tracker) => args.with_tracker(tracker.clone()),
        None => args,
    })
}

fn trace_context(entry: EntryPoint, context: Option<&CallbackData<'_>>) {
    match context {
        Some(data) => log::debug!(
            "{}: {} @ {} (tag {:?})",
            entry,
            data.reason,
            data.time,
            data.tag
        ),
        None => log::warn!("{}: callback context is absent", entry),
    }
}

fn start_direct(args: ArgumentList, factory: InterpreterFactory) -> Result<Backend> {
    log::info!("1. Initializing interpreter on the host thread...");
    let mut handle = InterpreterHandle::acquire(factory)?;
    handle.configure(&args)?;
    log::debug!("   parsed {} arguments", args.len());
    drop(args);
    handle.bind(HostLink::Direct)?;

    log::info!("2. Running program...");
    if let Err(e) = handle.run() {
        log::error!("program raised: {}", e);
    }
    Ok(Backend::Direct(handle))
}

fn start_threaded(
    args: ArgumentList,
    factory: InterpreterFactory,
    settings: &RunnerSettings,
) -> Result<Backend> {
    log::info!("1. Starting interpreter thread...");
    let runner = Runner::start(args, factory, settings)?;

    log::info!("2. Waiting for interpreter handshake...");
    let status = runner.handshake()?;
    log::info!("   Interpreter ready ({:?})", status);
    Ok(Backend::Threaded(runner))
}
