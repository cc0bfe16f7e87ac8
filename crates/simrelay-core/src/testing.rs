//! Test doubles shared by the unit tests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crate::arguments::{ArgumentList, ReleaseTracker};
use crate::error::{Error, Result};
use crate::events::EventRecord;
use crate::interpreter::{HostLink, Interpreter, InterpreterFactory, Resumption};

static SERIAL: Mutex<()> = Mutex::new(());

/// Serializes tests that touch the process-wide interpreter slot.
///
/// Also installs a test logger so `RUST_LOG=debug` shows the relay trace.
pub(crate) fn serial() -> MutexGuard<'static, ()> {
    let _ = env_logger::builder().is_test(true).try_init();
    SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One observed interpreter call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    Configure(Vec<String>),
    Bind,
    Run,
    Yielded(Resumption),
    Resume(Option<u64>),
    Finish,
}

/// How the recording interpreter's program behaves.
#[derive(Clone, Debug, Default)]
pub(crate) struct Behavior {
    /// Yield to the host this many times from the top-level program.
    pub yields_in_run: usize,
    /// Fail `configure`.
    pub reject_arguments: bool,
    /// Return an error from `resume` for this tag.
    pub fail_on_tag: Option<u64>,
    /// Panic inside `resume` for this tag.
    pub panic_on_tag: Option<u64>,
}

#[derive(Default)]
struct Log {
    calls: Vec<Call>,
    threads: Vec<ThreadId>,
    thread_names: Vec<Option<String>>,
    released_before_run: Option<usize>,
}

/// Records every call made to the interpreters it creates.
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    log: Arc<Mutex<Log>>,
    behavior: Behavior,
    tracker: Option<ReleaseTracker>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn behave(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Note how many argument lists the tracker saw released when the
    /// program starts running.
    pub fn tracking(mut self, tracker: ReleaseTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn factory(&self) -> InterpreterFactory {
        let recorder = self.clone();
        Box::new(move || {
            recorder
                .log()
                .thread_names
                .push(thread::current().name().map(str::to_owned));
            Ok(Box::new(RecordingInterpreter {
                recorder,
                host: None,
            }) as Box<dyn Interpreter>)
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log().calls.clone()
    }

    pub fn threads(&self) -> Vec<ThreadId> {
        self.log().threads.clone()
    }

    pub fn thread_names(&self) -> Vec<Option<String>> {
        self.log().thread_names.clone()
    }

    pub fn released_before_run(&self) -> Option<usize> {
        self.log().released_before_run
    }

    pub fn count(&self, call: &Call) -> usize {
        self.log().calls.iter().filter(|c| *c == call).count()
    }

    fn log(&self) -> MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: Call) {
        let mut log = self.log();
        log.calls.push(call);
        log.threads.push(thread::current().id());
    }
}

struct RecordingInterpreter {
    recorder: Recorder,
    host: Option<HostLink>,
}

impl Interpreter for RecordingInterpreter {
    fn configure(&mut self, args: &ArgumentList) -> Result<()> {
        self.recorder
            .record(Call::Configure(args.iter().map(str::to_owned).collect()));
        if self.recorder.behavior.reject_arguments {
            return Err(Error::Arguments("rejected".to_string()));
        }
        Ok(())
    }

    fn bind(&mut self, host: HostLink) -> Result<()> {
        self.recorder.record(Call::Bind);
        self.host = Some(host);
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        self.recorder.record(Call::Run);
        if let Some(tracker) = &self.recorder.tracker {
            self.recorder.log().released_before_run = Some(tracker.lists_released());
        }
        let Some(host) = self.host.clone() else {
            return Ok(());
        };
        for _ in 0..self.recorder.behavior.yields_in_run {
            let resumption = host.yield_host()?;
            let finished = resumption == Resumption::Finish;
            self.recorder.record(Call::Yielded(resumption));
            if finished {
                break;
            }
        }
        Ok(())
    }

    fn resume(&mut self, event: Option<&EventRecord>) -> Result<()> {
        let tag = event.and_then(|e| e.tag);
        if tag.is_some() && tag == self.recorder.behavior.panic_on_tag {
            panic!("resume panicked on tag {:?}", tag);
        }
        self.recorder.record(Call::Resume(tag));
        if tag.is_some() && tag == self.recorder.behavior.fail_on_tag {
            return Err(Error::Script(format!("failed on tag {:?}", tag)));
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.recorder.record(Call::Finish);
        Ok(())
    }
}
