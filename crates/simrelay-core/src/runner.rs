//! Interpreter runner thread.
//!
//! The runner owns the interpreter for the whole session. Its thread:
//! - Waits for the host's handshake
//! - Initializes the interpreter and hands it the start arguments
//! - Binds the yield-to-host primitive
//! - Runs the top-level program
//! - Serves resume requests until the host asks it to finish
//! - Finalizes the interpreter and gives control back one last time
//!
//! Host and runner share a [`RelayLink`]: the rendezvous plus a one-slot
//! mailbox for host requests and a status word for runner replies. The
//! writer fills them before releasing the other side; the reader looks
//! only after its wait returns.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::arguments::ArgumentList;
use crate::config::RunnerSettings;
use crate::error::{Error, Result};
use crate::events::EventRecord;
use crate::interpreter::{HostLink, InterpreterFactory, InterpreterHandle, Resumption};
use crate::rendezvous::{ChannelStats, RendezvousChannel, Side};

/// A request from the host to the runner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Message {
    Resume(Option<EventRecord>),
    Finish,
}

/// Where the runner stopped when it last handed control to the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunnerStatus {
    /// Thread spawned, handshake not yet completed.
    Starting,
    /// The program yielded from inside its top-level code.
    Yielded,
    /// The top-level program returned; events go to the resume dispatcher.
    Idle,
    /// The interpreter could not be brought up; the thread has exited.
    BootFailed(String),
    /// The thread unwound; it will not take control again.
    Faulted(String),
    /// The interpreter has been finalized; the thread is exiting.
    Finished,
}

impl RunnerStatus {
    /// Whether the runner can still be resumed.
    pub fn is_alive(&self) -> bool {
        matches!(
            self,
            RunnerStatus::Starting | RunnerStatus::Yielded | RunnerStatus::Idle
        )
    }
}

struct RelayShared {
    channel: RendezvousChannel,
    mailbox: Mutex<Option<Message>>,
    status: Mutex<RunnerStatus>,
    finishing: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared state between the host thread and the runner thread.
#[derive(Clone)]
pub struct RelayLink {
    shared: Arc<RelayShared>,
}

impl RelayLink {
    fn new() -> Self {
        Self {
            shared: Arc::new(RelayShared {
                channel: RendezvousChannel::new(),
                mailbox: Mutex::new(None),
                status: Mutex::new(RunnerStatus::Starting),
                finishing: AtomicBool::new(false),
            }),
        }
    }

    pub fn channel(&self) -> &RendezvousChannel {
        &self.shared.channel
    }

    pub fn status(&self) -> RunnerStatus {
        lock(&self.shared.status).clone()
    }

    fn set_status(&self, status: RunnerStatus) {
        *lock(&self.shared.status) = status;
    }

    /// True once a finish request has reached the runner.
    pub fn is_finishing(&self) -> bool {
        self.shared.finishing.load(Ordering::SeqCst)
    }

    /// Runner side: report `status`, hand control to the host, and return
    /// the request that resumed us.
    fn yield_to_host(&self, status: RunnerStatus) -> Result<Message> {
        self.set_status(status);
        self.channel().yield_to(Side::Host)?;
        let message = lock(&self.shared.mailbox).take();
        match message {
            Some(Message::Finish) => {
                self.shared.finishing.store(true, Ordering::SeqCst);
                Ok(Message::Finish)
            }
            Some(message) => Ok(message),
            None => Err(Error::RunnerFaulted(
                "interpreter resumed without a request".to_string(),
            )),
        }
    }

    /// Runner side: the program's explicit yield.
    pub(crate) fn yield_from_program(&self) -> Result<Resumption> {
        if self.is_finishing() {
            return Err(Error::Finishing);
        }
        match self.yield_to_host(RunnerStatus::Yielded)? {
            Message::Resume(event) => Ok(Resumption::Event(event)),
            Message::Finish => Ok(Resumption::Finish),
        }
    }

    /// Host side: post `message` (if any), hand control to the runner, and
    /// return the status it reported when it handed control back.
    fn exchange(&self, message: Option<Message>) -> Result<RunnerStatus> {
        if let Some(message) = message {
            *lock(&self.shared.mailbox) = Some(message);
        }
        self.channel().yield_to(Side::Interpreter)?;
        Ok(self.status())
    }
}

impl fmt::Debug for RelayLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayLink")
            .field("status", &self.status())
            .field("finishing", &self.is_finishing())
            .field("channel", self.channel())
            .finish()
    }
}

/// Hands control back to the host if the runner thread unwinds while it
/// holds control.
struct ControlGuard<'a> {
    link: &'a RelayLink,
    armed: bool,
}

impl Drop for ControlGuard<'_> {
    fn drop(&mut self) {
        if self.armed && thread::panicking() {
            log::error!("interpreter thread panicked; returning control to host");
            self.link
                .set_status(RunnerStatus::Faulted("interpreter thread panicked".to_string()));
            if let Err(e) = self.link.channel().release(Side::Host) {
                log::error!("{}", e);
            }
        }
    }
}

/// Handle to the interpreter thread, held by the host.
pub struct Runner {
    link: RelayLink,
    thread: Option<JoinHandle<()>>,
}

impl Runner {
    /// Spawn the interpreter thread.
    ///
    /// The thread parks on the interpreter side of the rendezvous until
    /// [`Runner::handshake`] releases it.
    pub fn start(
        args: ArgumentList,
        factory: InterpreterFactory,
        settings: &RunnerSettings,
    ) -> Result<Self> {
        let link = RelayLink::new();
        let thread_link = link.clone();
        log::debug!(
            "spawning {} with a {} byte stack",
            settings.thread_name,
            settings.stack_size
        );
        let thread = thread::Builder::new()
            .name(settings.thread_name.clone())
            .stack_size(settings.stack_size)
            .spawn(move || run_interpreter(thread_link, args, factory))
            .map_err(Error::Spawn)?;

        Ok(Self {
            link,
            thread: Some(thread),
        })
    }

    pub fn link(&self) -> &RelayLink {
        &self.link
    }

    pub fn status(&self) -> RunnerStatus {
        self.link.status()
    }

    pub fn stats(&self) -> ChannelStats {
        self.link.channel().stats()
    }

    /// Release the interpreter thread and wait for its ready point: the
    /// program's first yield, or the end of its top-level code.
    pub fn handshake(&self) -> Result<RunnerStatus> {
        let status = self.link.exchange(None)?;
        check(status)
    }

    /// Deliver one event and wait until the interpreter yields back.
    pub fn resume(&self, event: Option<EventRecord>) -> Result<RunnerStatus> {
        let status = self.link.status();
        if !status.is_alive() {
            return Err(Error::RunnerFaulted(format!(
                "interpreter thread is not running ({:?})",
                status
            )));
        }
        let status = self.link.exchange(Some(Message::Resume(event)))?;
        check(status)
    }

    /// Ask the interpreter to finish and join its thread.
    pub fn finish(mut self) -> Result<RunnerStatus> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<RunnerStatus> {
        let Some(thread) = self.thread.take() else {
            return Ok(self.link.status());
        };

        let mut result = Ok(());
        if self.link.status().is_alive() {
            result = self.link.exchange(Some(Message::Finish)).map(|_| ());
        }

        if let Err(panic) = thread.join() {
            let message = panic_message(&*panic);
            self.link.set_status(RunnerStatus::Faulted(message.clone()));
            return Err(Error::RunnerFaulted(message));
        }
        result?;
        check(self.link.status())
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        if self.thread.is_some() {
            log::warn!("runner dropped without finish; shutting the interpreter down");
            if let Err(e) = self.shutdown() {
                log::error!("interpreter shutdown failed: {}", e);
            }
        }
    }
}

fn check(status: RunnerStatus) -> Result<RunnerStatus> {
    match status {
        RunnerStatus::BootFailed(message) => Err(Error::Boot(message)),
        RunnerStatus::Faulted(message) => Err(Error::RunnerFaulted(message)),
        status => Ok(status),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "interpreter thread panicked".to_string()
    }
}

/// Bring the interpreter up: initialize, parse and release the arguments,
/// bind the host link.
fn boot(
    link: &RelayLink,
    args: ArgumentList,
    factory: InterpreterFactory,
) -> Result<InterpreterHandle> {
    log::debug!("runner: initializing interpreter");
    let mut handle = InterpreterHandle::acquire(factory)?;

    handle.configure(&args)?;
    log::debug!("runner: parsed {} arguments", args.len());
    drop(args);

    handle.bind(HostLink::Relay(link.clone()))?;
    Ok(handle)
}

/// Body of the interpreter thread.
fn run_interpreter(link: RelayLink, args: ArgumentList, factory: InterpreterFactory) {
    link.channel().wait(Side::Interpreter);
    let mut guard = ControlGuard {
        link: &link,
        armed: true,
    };

    let mut handle = match boot(&link, args, factory) {
        Ok(handle) => handle,
        Err(e) => {
            log::error!("interpreter failed to start: {}", e);
            link.set_status(RunnerStatus::BootFailed(e.to_string()));
            guard.armed = false;
            if let Err(e) = link.channel().release(Side::Host) {
                log::error!("{}", e);
            }
            return;
        }
    };

    log::info!("runner: running program");
    if let Err(e) = handle.run() {
        log::error!("program raised: {}", e);
    }

    if !link.is_finishing() {
        log::debug!("runner: program returned, serving resume requests");
        loop {
            match link.yield_to_host(RunnerStatus::Idle) {
                Ok(Message::Resume(event)) => {
                    if let Err(e) = handle.resume(event.as_ref()) {
                        log::error!("resume raised: {}", e);
                    }
                }
                Ok(Message::Finish) => break,
                Err(e) => {
                    log::error!("runner: {}", e);
                    break;
                }
            }
        }
    }

    log::debug!("runner: finishing program");
    if let Err(e) = handle.finish() {
        log::error!("finalizer raised: {}", e);
    }
    drop(handle);

    link.set_status(RunnerStatus::Finished);
    guard.armed = false;
    if let Err(e) = link.channel().release(Side::Host) {
        log::error!("{}", e);
    }
}
