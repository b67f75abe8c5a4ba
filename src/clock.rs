use chrono::{Local, NaiveDateTime, Utc};

/// Source of local wall-clock time.
///
/// Activities carry no time zone, so every comparison happens in naive local
/// time. Epoch milliseconds are only used to mint activity ids.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn epoch_millis(&self) -> i64 {
        self.now().and_utc().timestamp_millis()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn epoch_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Wall clock pinned to an anchor instant and advanced by tokio's timer.
///
/// Under a paused tokio runtime this moves in lockstep with `sleep`, which
/// makes reminder chains reproducible.
#[derive(Debug, Clone)]
pub struct AnchoredClock {
    anchor: NaiveDateTime,
    started: tokio::time::Instant,
}

impl AnchoredClock {
    pub fn new(anchor: NaiveDateTime) -> Self {
        Self {
            anchor,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for AnchoredClock {
    fn now(&self) -> NaiveDateTime {
        let elapsed = tokio::time::Instant::now().saturating_duration_since(self.started);
        self.anchor + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }
}
