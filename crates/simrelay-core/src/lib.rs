//! simrelay core - run a script interpreter in lock-step with a simulator.
//!
//! A simulator's event loop calls three entry points (start, resume,
//! finish). Each one hands control to an embedded interpreter and blocks
//! until the interpreter hands it back, so exactly one side is ever running.
//!
//! - **Lifecycle** - the three entry points and their legal order
//! - **Runner** - dedicated interpreter thread with its own stack
//! - **Rendezvous** - the per-side release/wait channel behind the hand-off
//! - **Arguments** - host call-site arguments copied before the host's
//!   storage goes away
//! - **Events** - host callback records and their owned copies
//! - **Script** - Rhai binding of the interpreter
//!
//! # Variants
//!
//! - `threaded` (default) - the interpreter lives on a runner thread and
//!   can yield back to the host from anywhere in its program
//! - `direct` - the interpreter runs on the host thread; yielding is a
//!   no-op, so a long-running top-level program stalls the host loop
//!
//! # Example
//!
//! ```no_run
//! use simrelay_core::{CallbackData, Reason, RelayConfig};
//!
//! let mut relay = simrelay_core::script_relay(RelayConfig::default());
//! let args = vec!["-e".to_string(), "fn resume(ev) { print(ev.time); }".to_string()];
//! relay.on_start(None, Some(&args))?;
//! relay.on_resume(Some(&CallbackData::new(Reason::AfterDelay, 10)))?;
//! relay.on_finish(None)?;
//! # Ok::<(), simrelay_core::Error>(())
//! ```

pub mod arguments;
pub mod config;
pub mod error;
pub mod events;
pub mod interpreter;
pub mod lifecycle;
pub mod rendezvous;
pub mod runner;
pub mod script;

#[cfg(test)]
mod testing;

pub use arguments::{ArgumentList, CallSite, ReleaseTracker};
pub use config::{RelayConfig, RunnerSettings, ScriptSettings, Variant, DEFAULT_STACK_SIZE};
pub use error::{Error, ProtocolViolation, Result};
pub use events::{CallbackData, EventRecord, Reason};
pub use interpreter::{HostLink, Interpreter, InterpreterFactory, InterpreterHandle, Resumption};
pub use lifecycle::{EntryPoint, LifecycleController, LifecycleState};
pub use rendezvous::{ChannelStats, RendezvousChannel, Side};
pub use runner::{RelayLink, Runner, RunnerStatus};
pub use script::{ScriptInterpreter, ScriptOptions};

/// Lifecycle controller driving a Rhai program.
pub fn script_relay(config: RelayConfig) -> LifecycleController {
    let factory = ScriptInterpreter::factory(config.script.clone());
    LifecycleController::new(config, factory)
}
