use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// How often keys with no admissions left in the window are dropped.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { remaining: u32 },
    Limited { retry_after: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// Sliding-window admission gate keyed by client identity.
///
/// Every key keeps the instants of its admissions inside the window, so no
/// window of `window` length ever holds more than `limit` admissions.
pub struct ScanRateGate {
    limit: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    requests: Mutex<(HashMap<String, Vec<Instant>>, Instant)>,
}

impl ScanRateGate {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self::with_clock(limit, window, Arc::new(SystemClock))
    }

    pub fn with_clock(limit: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            limit,
            window,
            clock,
            requests: Mutex::new((HashMap::new(), now)),
        }
    }

    pub fn admit(&self, key: &str) -> Admission {
        if self.limit == 0 {
            return Admission::Admitted {
                remaining: u32::MAX,
            };
        }

        let now = self.clock.now();
        let cutoff = now.checked_sub(self.window);
        let live = |instant: &Instant| cutoff.is_none_or(|cutoff| *instant > cutoff);

        let mut guard = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        let (requests, last_sweep) = &mut *guard;

        if now.saturating_duration_since(*last_sweep) >= SWEEP_INTERVAL {
            requests.retain(|_, instants| {
                instants.retain(|instant| live(instant));
                !instants.is_empty()
            });
            *last_sweep = now;
        }

        let entry = requests.entry(key.to_owned()).or_default();
        entry.retain(|instant| live(instant));

        if entry.len() >= self.limit as usize {
            let oldest = entry[0];
            return Admission::Limited {
                retry_after: (oldest + self.window).saturating_duration_since(now),
            };
        }

        entry.push(now);
        Admission::Admitted {
            remaining: self.limit - entry.len() as u32,
        }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.requests.lock().unwrap().0.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Clock that only moves when told to.
    pub(crate) struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(Instant::now() + Duration::from_secs(3600)),
            })
        }

        pub(crate) fn advance(&self, by: Duration) {
            *self.now.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }

    fn gate(clock: &Arc<ManualClock>) -> ScanRateGate {
        ScanRateGate::with_clock(5, Duration::from_secs(60), clock.clone())
    }

    #[test]
    fn sixth_admission_in_window_is_limited() {
        let clock = ManualClock::new();
        let gate = gate(&clock);

        for expected_remaining in (0..5).rev() {
            assert_eq!(
                gate.admit("10.0.0.1"),
                Admission::Admitted {
                    remaining: expected_remaining
                }
            );
            clock.advance(Duration::from_secs(2));
        }

        match gate.admit("10.0.0.1") {
            Admission::Limited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(50));
            }
            other => panic!("expected Limited, got {:?}", other),
        }
    }

    #[test]
    fn admissions_resume_after_window() {
        let clock = ManualClock::new();
        let gate = gate(&clock);
        for _ in 0..5 {
            assert!(gate.admit("10.0.0.1").is_admitted());
        }
        assert!(!gate.admit("10.0.0.1").is_admitted());

        clock.advance(Duration::from_secs(59));
        assert!(!gate.admit("10.0.0.1").is_admitted());

        clock.advance(Duration::from_secs(1));
        assert!(gate.admit("10.0.0.1").is_admitted());
    }

    #[test]
    fn window_slides_with_each_admission() {
        let clock = ManualClock::new();
        let gate = gate(&clock);

        assert!(gate.admit("k").is_admitted());
        clock.advance(Duration::from_secs(30));
        for _ in 0..4 {
            assert!(gate.admit("k").is_admitted());
        }
        assert!(!gate.admit("k").is_admitted());

        // Only the first admission has aged out.
        clock.advance(Duration::from_secs(30));
        assert!(gate.admit("k").is_admitted());
        assert!(!gate.admit("k").is_admitted());
    }

    #[test]
    fn keys_are_independent() {
        let clock = ManualClock::new();
        let gate = gate(&clock);
        for _ in 0..5 {
            assert!(gate.admit("10.0.0.1").is_admitted());
        }
        assert!(!gate.admit("10.0.0.1").is_admitted());
        assert!(gate.admit("10.0.0.2").is_admitted());
    }

    #[test]
    fn zero_limit_admits_everything() {
        let gate = ScanRateGate::new(0, Duration::from_secs(60));
        for _ in 0..100 {
            assert!(gate.admit("any").is_admitted());
        }
    }

    #[test]
    fn stale_keys_are_swept() {
        let clock = ManualClock::new();
        let gate = gate(&clock);
        assert!(gate.admit("ip-1").is_admitted());
        assert!(gate.admit("ip-2").is_admitted());
        assert_eq!(gate.tracked_keys(), 2);

        clock.advance(SWEEP_INTERVAL);
        assert!(gate.admit("ip-3").is_admitted());
        assert_eq!(gate.tracked_keys(), 1);
    }

    #[test]
    fn concurrent_admissions_never_exceed_limit() {
        let gate = Arc::new(ScanRateGate::new(5, Duration::from_secs(60)));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let gate = gate.clone();
                std::thread::spawn(move || gate.admit("shared").is_admitted())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|admitted| *admitted)
            .count();
        assert_eq!(admitted, 5);
    }
}
