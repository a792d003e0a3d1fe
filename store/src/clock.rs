use std::sync::Arc;

/// Supplies the current time in Unix milliseconds to every component that
/// stamps a row (`CreateAt`, `LockAcquiredAt`, event timestamps, ...).
///
/// A single clock is shared by a `Store` so that a multi-row lease
/// acquisition observes one timestamp for every row it touches (spec §4.2,
/// §8 "batch lease"). Tests inject a deterministic clock to make ordering
/// assertions reproducible (spec §9 "Clock").
#[derive(Clone)]
pub struct Clock(Arc<dyn Fn() -> i64 + Send + Sync>);

impl Clock {
    pub fn system() -> Self {
        Clock(Arc::new(|| chrono::Utc::now().timestamp_millis()))
    }

    /// Build a clock from an arbitrary closure, for deterministic tests.
    pub fn from_fn(f: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        Clock(Arc::new(f))
    }

    pub fn now_ms(&self) -> i64 {
        (self.0)()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Clock(..)")
    }
}
