use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

static PROCESS_CLOCK: MonotonicClock = MonotonicClock::new();

/// Wall clock that never goes backwards (microsecond resolution).
/// `global()` is the instance every recorder in the process uses.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last_micros: AtomicI64,
}

impl MonotonicClock {
    pub const fn new() -> Self {
        Self { last_micros: AtomicI64::new(0) }
    }

    pub fn global() -> &'static MonotonicClock {
        &PROCESS_CLOCK
    }

    pub fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now().timestamp_micros();
        let prev = self.last_micros.fetch_max(wall, Ordering::SeqCst);
        let micros = prev.max(wall);
        let secs = micros.div_euclid(1_000_000);
        let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
        Utc.timestamp_opt(secs, nanos).single().unwrap_or_else(Utc::now)
    }
}
