//! Strict two-party handoff of control.
//!
//! A [`RendezvousChannel`] has one gate per [`Side`]. Each gate is a
//! single-slot channel: releasing a side puts a token in its slot, waiting
//! on a side takes the token out and leaves the gate blocked again. A
//! second release while the token is still in the slot is rejected, which
//! turns the "never release twice" convention into a checked error.
//!
//! The channel carries no payload. Data that travels with a handoff is
//! written before [`RendezvousChannel::release`] and read after
//! [`RendezvousChannel::wait`]; the channel's internal locking orders
//! those accesses.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::error::ProtocolViolation;

/// One of the two participants in a rendezvous.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    /// The event-source thread (never created by the relay).
    Host,
    /// The thread that drives the embedded interpreter.
    Interpreter,
}

impl Side {
    /// The opposite participant.
    pub fn other(self) -> Side {
        match self {
            Side::Host => Side::Interpreter,
            Side::Interpreter => Side::Host,
        }
    }

    fn index(self) -> usize {
        match self {
            Side::Host => 0,
            Side::Interpreter => 1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Host => f.write_str("host"),
            Side::Interpreter => f.write_str("interpreter"),
        }
    }
}

struct Gate {
    tx: Sender<()>,
    rx: Receiver<()>,
    releases: AtomicU64,
    waits: AtomicU64,
}

impl Gate {
    fn blocked() -> Self {
        let (tx, rx) = bounded(1);
        Self {
            tx,
            rx,
            releases: AtomicU64::new(0),
            waits: AtomicU64::new(0),
        }
    }
}

/// Counts of completed gate operations, per side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub host_releases: u64,
    pub host_waits: u64,
    pub interpreter_releases: u64,
    pub interpreter_waits: u64,
}

impl ChannelStats {
    /// True when every release on both sides has been consumed by a wait.
    pub fn is_balanced(&self) -> bool {
        self.host_releases == self.host_waits && self.interpreter_releases == self.interpreter_waits
    }

    /// Number of complete host → interpreter → host round trips.
    pub fn round_trips(&self) -> u64 {
        self.interpreter_waits.min(self.host_waits)
    }
}

/// Alternating control between exactly two threads.
pub struct RendezvousChannel {
    gates: [Gate; 2],
}

impl Default for RendezvousChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl RendezvousChannel {
    /// Create a channel with both sides blocked.
    pub fn new() -> Self {
        Self {
            gates: [Gate::blocked(), Gate::blocked()],
        }
    }

    fn gate(&self, side: Side) -> &Gate {
        &self.gates[side.index()]
    }

    /// Unblock `side`.
    ///
    /// Fails if `side` was already released and has not waited since.
    pub fn release(&self, side: Side) -> Result<(), ProtocolViolation> {
        let gate = self.gate(side);
        // Counted before the send so a woken peer never sees a stale count.
        gate.releases.fetch_add(1, Ordering::SeqCst);
        match gate.tx.try_send(()) {
            Ok(()) => {
                log::trace!("rendezvous: released {}", side);
                Ok(())
            }
            Err(TrySendError::Full(())) | Err(TrySendError::Disconnected(())) => {
                gate.releases.fetch_sub(1, Ordering::SeqCst);
                Err(ProtocolViolation::DoubleRelease(side))
            }
        }
    }

    /// Block until `side` is released, then re-arm it.
    pub fn wait(&self, side: Side) {
        let gate = self.gate(side);
        // Both ends of the gate live in `self`, so recv cannot disconnect.
        if gate.rx.recv().is_ok() {
            gate.waits.fetch_add(1, Ordering::SeqCst);
            log::trace!("rendezvous: {} resumed", side);
        }
    }

    /// Hand control to `to` and block until it comes back.
    pub fn yield_to(&self, to: Side) -> Result<(), ProtocolViolation> {
        self.release(to)?;
        self.wait(to.other());
        Ok(())
    }

    /// Whether `side` currently holds an unconsumed release.
    pub fn is_released(&self, side: Side) -> bool {
        !self.gate(side).rx.is_empty()
    }

    /// Snapshot of the release/wait counters.
    pub fn stats(&self) -> ChannelStats {
        let host = self.gate(Side::Host);
        let interp = self.gate(Side::Interpreter);
        ChannelStats {
            host_releases: host.releases.load(Ordering::SeqCst),
            host_waits: host.waits.load(Ordering::SeqCst),
            interpreter_releases: interp.releases.load(Ordering::SeqCst),
            interpreter_waits: interp.waits.load(Ordering::SeqCst),
        }
    }
}

impl fmt::Debug for RendezvousChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendezvousChannel")
            .field("stats", &self.stats())
            .finish()
    }
}
