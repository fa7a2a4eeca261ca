use crate::types::{elapsed_ms, Tick};

#[derive(Debug, Clone)]
pub struct Debouncer {
    window_ms: u32,
    candidate_level: bool,
    candidate_since: Tick,
    reported_level: bool,
}

impl Debouncer {
    /// The reported level starts de-asserted; an input that is already
    /// asserted at boot is reported once it has been stable for a window.
    pub fn new(window_ms: u32, now: Tick) -> Self {
        Self {
            window_ms,
            candidate_level: false,
            candidate_since: now,
            reported_level: false,
        }
    }

    pub fn level(&self) -> bool {
        self.reported_level
    }

    /// Feed one raw reading. Returns the new stable level on the tick it
    /// changes, `None` otherwise.
    pub fn sample(&mut self, raw_level: bool, now: Tick) -> Option<bool> {
        if raw_level != self.candidate_level {
            self.candidate_level = raw_level;
            self.candidate_since = now;
            return None;
        }

        if self.candidate_level == self.reported_level {
            return None;
        }

        if elapsed_ms(now, self.candidate_since) >= self.window_ms {
            self.reported_level = self.candidate_level;
            return Some(self.reported_level);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(debouncer: &mut Debouncer, samples: &[(Tick, bool)]) -> Vec<(Tick, bool)> {
        samples
            .iter()
            .filter_map(|&(now, raw)| debouncer.sample(raw, now).map(|level| (now, level)))
            .collect()
    }

    #[test]
    fn reports_after_full_window() {
        let mut debouncer = Debouncer::new(500, 0);
        let samples: Vec<_> = (0..=60).map(|i| (i * 10, true)).collect();

        assert_eq!(run(&mut debouncer, &samples), vec![(500, true)]);
        assert!(debouncer.level());
    }

    #[test]
    fn bounce_restarts_window() {
        let mut debouncer = Debouncer::new(500, 0);

        assert_eq!(debouncer.sample(true, 0), None);
        assert_eq!(debouncer.sample(true, 400), None);
        assert_eq!(debouncer.sample(false, 410), None);
        assert_eq!(debouncer.sample(true, 420), None);
        assert_eq!(debouncer.sample(true, 910), None);
        assert_eq!(debouncer.sample(true, 920), Some(true));
    }

    #[test]
    fn fast_oscillation_never_reports() {
        let mut debouncer = Debouncer::new(500, 0);
        let samples: Vec<_> = (0..1_000).map(|i| (i * 10, (i / 20) % 2 == 0)).collect();

        assert!(run(&mut debouncer, &samples).is_empty());
        assert!(!debouncer.level());
    }

    #[test]
    fn steady_level_is_reported_once() {
        let mut debouncer = Debouncer::new(500, 0);
        let samples: Vec<_> = (0..500).map(|i| (i * 10, true)).collect();

        assert_eq!(run(&mut debouncer, &samples).len(), 1);
    }

    #[test]
    fn release_is_debounced_too() {
        let mut debouncer = Debouncer::new(500, 0);
        debouncer.sample(true, 0);
        assert_eq!(debouncer.sample(true, 500), Some(true));

        assert_eq!(debouncer.sample(false, 1_000), None);
        assert_eq!(debouncer.sample(false, 1_499), None);
        assert_eq!(debouncer.sample(false, 1_500), Some(false));
    }

    #[test]
    fn window_spans_counter_wrap() {
        let start = u32::MAX - 200;
        let mut debouncer = Debouncer::new(500, start);

        assert_eq!(debouncer.sample(true, start), None);
        assert_eq!(debouncer.sample(true, start.wrapping_add(499)), None);
        assert_eq!(debouncer.sample(true, start.wrapping_add(500)), Some(true));
    }
}
