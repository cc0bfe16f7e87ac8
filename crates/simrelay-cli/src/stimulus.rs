//! Stand-in event source for running relay scripts without a simulator.
//!
//! Timer events fire every `step` time units with tags `1..=N`. A stimulus
//! file adds value changes, one per line:
//!
//! ```text
//! # time  object   value
//! 15      top.clk  1
//! 30      top.clk  0
//! ```

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use simrelay_core::{CallbackData, Reason};

/// One value change read from a stimulus file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stimulus {
    pub time: u64,
    pub object: String,
    pub value: String,
}

/// An event the stand-in source delivers to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheduled {
    Timer { time: u64, tag: u64 },
    Change(Stimulus),
}

impl Scheduled {
    pub fn time(&self) -> u64 {
        match self {
            Scheduled::Timer { time, .. } => *time,
            Scheduled::Change(stimulus) => stimulus.time,
        }
    }

    /// The host record for this event; it borrows from `self`.
    pub fn callback(&self) -> CallbackData<'_> {
        match self {
            Scheduled::Timer { time, tag } => {
                CallbackData::new(Reason::AfterDelay, *time).with_tag(*tag)
            }
            Scheduled::Change(stimulus) => CallbackData::new(Reason::ValueChange, stimulus.time)
                .with_object(&stimulus.object)
                .with_value(&stimulus.value),
        }
    }
}

pub fn parse(text: &str) -> Result<Vec<Stimulus>> {
    let mut stimuli = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [time, object, value] = fields[..] else {
            bail!(
                "line {}: expected `time object value`, got {:?}",
                index + 1,
                line
            );
        };
        let time = time
            .parse::<u64>()
            .with_context(|| format!("line {}: invalid time {:?}", index + 1, time))?;
        stimuli.push(Stimulus {
            time,
            object: object.to_string(),
            value: value.to_string(),
        });
    }
    Ok(stimuli)
}

pub fn load(path: &Path) -> Result<Vec<Stimulus>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read stimulus file: {}", path.display()))?;
    parse(&text).with_context(|| format!("Invalid stimulus file: {}", path.display()))
}

/// Merge timer events and value changes into delivery order.
///
/// Events at the same time keep timers first, then changes in file order.
pub fn schedule(events: u64, step: u64, stimuli: Vec<Stimulus>) -> Result<Vec<Scheduled>> {
    let mut scheduled = Vec::new();
    for tag in 1..=events {
        let Some(time) = tag.checked_mul(step) else {
            bail!("timer event {} at step {} overflows simulation time", tag, step);
        };
        scheduled.push(Scheduled::Timer { time, tag });
    }
    scheduled.extend(stimuli.into_iter().map(Scheduled::Change));
    scheduled.sort_by_key(Scheduled::time);
    Ok(scheduled)
}

/// Time of the finish callback, one step past the last event.
pub fn end_time(schedule: &[Scheduled], step: u64) -> Result<u64> {
    let last = schedule.last().map(Scheduled::time).unwrap_or(0);
    match last.checked_add(step) {
        Some(time) => Ok(time),
        None => bail!("end of simulation after time {} overflows at step {}", last, step),
    }
}
