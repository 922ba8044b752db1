//! ---
//! vk_section: "02-readiness-probing"
//! vk_subsection: "module"
//! vk_type: "source"
//! vk_scope: "code"
//! vk_description: "External readiness probing and health debouncing."
//! vk_version: "v0.1.0"
//! vk_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Samples retained for the agreement window.
const HISTORY_LEN: usize = 3;

/// Minimum quiet time between committed transitions. Together with the
/// two-sample agreement requirement this yields the 5 second stability
/// buffer against a flapping upstream.
pub const MIN_DWELL: Duration = Duration::from_secs(3);

/// Outcome of feeding one raw sample into the debouncer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceOutcome {
    /// The stable value did not change.
    Unchanged,
    /// The stable value flipped to the contained state.
    Committed(bool),
    /// The samples agreed on a flip but the dwell window has not elapsed.
    Suppressed,
}

/// Turns a noisy boolean probe signal into a stable one.
///
/// The stable value flips only when the last two raw samples agree on the
/// new value and at least [`MIN_DWELL`] has passed since the previous
/// flip. A suppressed flip is not consumed: as long as the raw readings
/// persist, a later sample commits it once the dwell expires.
#[derive(Debug)]
pub struct HealthDebouncer {
    history: VecDeque<bool>,
    stable_ok: bool,
    last_transition_at: Option<Instant>,
}

impl HealthDebouncer {
    /// Start optimistic so a node is electable before its first probe
    /// cycle completes.
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_LEN),
            stable_ok: true,
            last_transition_at: None,
        }
    }

    pub fn stable_ok(&self) -> bool {
        self.stable_ok
    }

    /// Feed one raw sample taken at `now`.
    pub fn observe(&mut self, raw_ok: bool, now: Instant) -> DebounceOutcome {
        self.history.push_back(raw_ok);
        if self.history.len() > HISTORY_LEN {
            self.history.pop_front();
        }

        let candidate = if self.history.len() >= 2 {
            let mut tail = self.history.iter().rev();
            let newest = *tail.next().expect("history has two entries");
            let previous = *tail.next().expect("history has two entries");
            if newest == previous {
                newest
            } else {
                self.stable_ok
            }
        } else {
            self.stable_ok
        };

        if candidate == self.stable_ok {
            return DebounceOutcome::Unchanged;
        }

        let dwell_elapsed = self
            .last_transition_at
            .map(|at| now.duration_since(at) >= MIN_DWELL)
            .unwrap_or(true);
        if !dwell_elapsed {
            return DebounceOutcome::Suppressed;
        }

        self.stable_ok = candidate;
        self.last_transition_at = Some(now);
        DebounceOutcome::Committed(candidate)
    }
}

impl Default for HealthDebouncer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticks(debouncer: &mut HealthDebouncer, start: Instant, samples: &[bool]) -> Vec<DebounceOutcome> {
        samples
            .iter()
            .enumerate()
            .map(|(i, raw)| debouncer.observe(*raw, start + Duration::from_secs(2 * i as u64)))
            .collect()
    }

    #[test]
    fn starts_optimistic() {
        let debouncer = HealthDebouncer::new();
        assert!(debouncer.stable_ok());
    }

    #[test]
    fn single_bad_sample_never_flips() {
        let mut debouncer = HealthDebouncer::new();
        let start = Instant::now();
        ticks(&mut debouncer, start, &[true, true, false, true, true]);
        assert!(debouncer.stable_ok());
    }

    #[test]
    fn two_agreeing_samples_commit() {
        let mut debouncer = HealthDebouncer::new();
        let start = Instant::now();
        let outcomes = ticks(&mut debouncer, start, &[false, false]);
        assert_eq!(outcomes[1], DebounceOutcome::Committed(false));
        assert!(!debouncer.stable_ok());
    }

    #[test]
    fn alternating_signal_holds_initial_value() {
        // S6: F,T,F,T,F,T at the probe cadence must not emit a transition.
        let mut debouncer = HealthDebouncer::new();
        let start = Instant::now();
        let outcomes = ticks(&mut debouncer, start, &[false, true, false, true, false, true]);
        assert!(outcomes
            .iter()
            .all(|outcome| *outcome == DebounceOutcome::Unchanged));
        assert!(debouncer.stable_ok());
    }

    #[test]
    fn dwell_suppresses_rapid_reversal() {
        let mut debouncer = HealthDebouncer::new();
        let start = Instant::now();
        debouncer.observe(false, start);
        assert_eq!(
            debouncer.observe(false, start + Duration::from_secs(2)),
            DebounceOutcome::Committed(false)
        );
        // Recovery agrees two samples later but lands inside the dwell.
        debouncer.observe(true, start + Duration::from_secs(3));
        assert_eq!(
            debouncer.observe(true, start + Duration::from_secs(4)),
            DebounceOutcome::Suppressed
        );
        assert!(!debouncer.stable_ok());
        // The reading persists, so the flip commits once the dwell expires.
        assert_eq!(
            debouncer.observe(true, start + Duration::from_secs(6)),
            DebounceOutcome::Committed(true)
        );
        assert!(debouncer.stable_ok());
    }
}
