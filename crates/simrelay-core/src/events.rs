//! Host callback records and the owned events the interpreter sees.
//!
//! The event source describes each callback with a borrowed
//! [`CallbackData`]. Its strings belong to the host and are only valid
//! for the duration of the callback, so the relay translates every record
//! into an owned [`EventRecord`] before handing it across.

use std::fmt;

/// Why the host invoked a callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Reason {
    /// Simulation is about to start.
    StartOfSimulation,
    /// Simulation has ended.
    EndOfSimulation,
    /// A watched object changed value.
    ValueChange,
    /// The read-write synchronization point of the current time step.
    ReadWriteSynch,
    /// The read-only synchronization point of the current time step.
    ReadOnlySynch,
    /// A requested delay has elapsed.
    AfterDelay,
    /// The start of the next simulation time step.
    NextSimTime,
    /// A system task bound to the relay was called.
    Task,
}

impl Reason {
    /// Name as exposed to interpreted programs.
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::StartOfSimulation => "start_of_simulation",
            Reason::EndOfSimulation => "end_of_simulation",
            Reason::ValueChange => "value_change",
            Reason::ReadWriteSynch => "read_write_synch",
            Reason::ReadOnlySynch => "read_only_synch",
            Reason::AfterDelay => "after_delay",
            Reason::NextSimTime => "next_sim_time",
            Reason::Task => "task",
        }
    }

    /// Parse a reason name, as written in stimulus files.
    pub fn parse(name: &str) -> Option<Reason> {
        let reason = match name {
            "start_of_simulation" => Reason::StartOfSimulation,
            "end_of_simulation" => Reason::EndOfSimulation,
            "value_change" => Reason::ValueChange,
            "read_write_synch" => Reason::ReadWriteSynch,
            "read_only_synch" => Reason::ReadOnlySynch,
            "after_delay" => Reason::AfterDelay,
            "next_sim_time" => Reason::NextSimTime,
            "task" => Reason::Task,
            _ => return None,
        };
        Some(reason)
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A callback record as delivered by the host.
#[derive(Clone, Copy, Debug)]
pub struct CallbackData<'a> {
    pub reason: Reason,
    /// Simulation time of the callback.
    pub time: u64,
    /// Name of the object the callback concerns, if any.
    pub object: Option<&'a str>,
    /// Formatted value of the object, if any.
    pub value: Option<&'a str>,
    /// Opaque tag the program attached when requesting the callback.
    pub tag: Option<u64>,
}

impl<'a> CallbackData<'a> {
    pub fn new(reason: Reason, time: u64) -> Self {
        Self {
            reason,
            time,
            object: None,
            value: None,
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: u64) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn with_object(mut self, object: &'a str) -> Self {
        self.object = Some(object);
        self
    }

    pub fn with_value(mut self, value: &'a str) -> Self {
        self.value = Some(value);
        self
    }
}

/// An owned event, valid for one resume cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    pub reason: Reason,
    pub time: u64,
    pub object: Option<String>,
    pub value: Option<String>,
    pub tag: Option<u64>,
}

impl EventRecord {
    /// Copy everything the interpreter may look at out of host memory.
    pub fn from_callback(data: &CallbackData<'_>) -> Self {
        Self {
            reason: data.reason,
            time: data.time,
            object: data.object.map(str::to_owned),
            value: data.value.map(str::to_owned),
            tag: data.tag,
        }
    }
}

impl fmt::Display for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.reason, self.time)?;
        if let Some(object) = &self.object {
            write!(f, " {}", object)?;
            if let Some(value) = &self.value {
                write!(f, "={}", value)?;
            }
        }
        if let Some(tag) = self.tag {
            write!(f, " [tag {}]", tag)?;
        }
        Ok(())
    }
}
