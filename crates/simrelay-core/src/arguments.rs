//! Argument handoff from the host call site to the interpreter thread.
//!
//! The host's argument representation is only valid for the duration of
//! the start callback, so [`ArgumentList::capture`] deep-copies every
//! string into one owned list. The list then moves to the interpreter
//! thread, which drops it once the interpreter has parsed it.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// The host call site that carries the start arguments.
pub trait CallSite {
    /// The arguments in call order, each read as a string.
    fn scan(&self) -> Box<dyn Iterator<Item = &str> + '_>;
}

impl CallSite for [&str] {
    fn scan(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        Box::new(self.iter().map(|arg| &**arg))
    }
}

impl CallSite for [String] {
    fn scan(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        Box::new(self.iter().map(String::as_str))
    }
}

impl CallSite for Vec<String> {
    fn scan(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        self.as_slice().scan()
    }
}

/// Counts what an [`ArgumentList`] gave back when it was dropped.
#[derive(Clone, Debug, Default)]
pub struct ReleaseTracker {
    inner: Arc<TrackerCounts>,
}

#[derive(Debug, Default)]
struct TrackerCounts {
    elements: AtomicUsize,
    lists: AtomicUsize,
}

impl ReleaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strings released so far.
    pub fn elements_released(&self) -> usize {
        self.inner.elements.load(Ordering::SeqCst)
    }

    /// Containers released so far.
    pub fn lists_released(&self) -> usize {
        self.inner.lists.load(Ordering::SeqCst)
    }
}

/// Ordered, owned process-style arguments.
#[derive(Default)]
pub struct ArgumentList {
    args: Vec<String>,
    tracker: Option<ReleaseTracker>,
}

impl ArgumentList {
    /// An empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deep-copy the arguments of a call site.
    ///
    /// Fails with [`Error::OutOfMemory`] if the list or any string cannot
    /// be allocated.
    pub fn capture(site: &(impl CallSite + ?Sized)) -> Result<Self> {
        let mut args: Vec<String> = Vec::new();
        for arg in site.scan() {
            args.try_reserve(1)
                .map_err(|_| Error::OutOfMemory("command-line arguments"))?;
            let mut owned = String::new();
            owned
                .try_reserve_exact(arg.len())
                .map_err(|_| Error::OutOfMemory("command-line arguments"))?;
            owned.push_str(arg);
            args.push(owned);
        }
        Ok(Self {
            args,
            tracker: None,
        })
    }

    /// Attach a tracker that is told what this list releases on drop.
    pub fn with_tracker(mut self, tracker: ReleaseTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.args
    }
}

impl Drop for ArgumentList {
    fn drop(&mut self) {
        if let Some(tracker) = &self.tracker {
            tracker
                .inner
                .elements
                .fetch_add(self.args.len(), Ordering::SeqCst);
            tracker.inner.lists.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl fmt::Debug for ArgumentList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.args).finish()
    }
}

impl<'a> FromIterator<&'a str> for ArgumentList {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self {
            args: iter.into_iter().map(str::to_owned).collect(),
            tracker: None,
        }
    }
}
