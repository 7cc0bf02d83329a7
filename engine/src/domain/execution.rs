//! Execution status and progress reporting shared by the optimizer and strategies

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// Terminal state of a filter, export or plan execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterStatus {
    Success,
    Error,
    Cancelled,
}

impl FilterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FilterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type ProgressFn = dyn Fn(u8, &str) + Send + Sync;

/// Progress callback invoked at step boundaries
///
/// Percentages are clamped to `0..=100`. A `scaled` reporter maps its own
/// `0..=100` range into a sub-range of the parent, so nested operations can
/// report without knowing where they sit in the overall run.
#[derive(Clone, Default)]
pub struct ProgressReporter {
    callback: Option<Arc<ProgressFn>>,
    start: u8,
    end: u8,
}

impl ProgressReporter {
    pub fn new(callback: impl Fn(u8, &str) + Send + Sync + 'static) -> Self {
        Self {
            callback: Some(Arc::new(callback)),
            start: 0,
            end: 100,
        }
    }

    /// Reporter that drops every update
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.callback.is_some()
    }

    pub fn report(&self, percent: u8, message: &str) {
        if let Some(callback) = &self.callback {
            let percent = u32::from(percent.min(100));
            let span = u32::from(self.end.saturating_sub(self.start));
            let mapped = u32::from(self.start) + percent * span / 100;
            callback(mapped.min(100) as u8, message);
        }
    }

    /// Child reporter covering `start..=end` of this reporter's range
    pub fn scaled(&self, start: u8, end: u8) -> Self {
        let (start, end) = (start.min(100), end.min(100).max(start.min(100)));
        let span = u32::from(self.end.saturating_sub(self.start));
        let map = |p: u8| (u32::from(self.start) + u32::from(p) * span / 100) as u8;
        Self {
            callback: self.callback.clone(),
            start: map(start),
            end: map(end),
        }
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("enabled", &self.callback.is_some())
            .field("start", &self.start)
            .field("end", &self.end)
            .finish()
    }
}
