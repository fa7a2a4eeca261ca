//! Property tests over arbitrary input traces.

use boiler_common::{
    Debouncer, EventCode, EventLog, RelayAction, RelayConfig, RelayController, RelayState,
};
use proptest::prelude::*;

const WINDOW: u32 = 50;

fn small_config() -> RelayConfig {
    let mut config = RelayConfig::with_min_off_time(100);
    config.tick_interval_ms = 1;
    config.debounce_ms = WINDOW;
    config.relay_delay_ms = 40;
    config.max_on_time_ms = 300;
    config
}

/// Run-length encoded raw input: (level, duration in ms).
fn raw_trace() -> impl Strategy<Value = Vec<(bool, u32)>> {
    proptest::collection::vec((any::<bool>(), 1u32..=120), 1..60)
}

/// Debounced input edges separated by idle time.
fn edge_trace() -> impl Strategy<Value = Vec<u32>> {
    proptest::collection::vec(1u32..=500, 1..40)
}

proptest! {
    #[test]
    fn debouncer_reports_only_stable_alternating_levels(
        trace in raw_trace(),
        start in any::<u32>(),
    ) {
        let mut debouncer = Debouncer::new(WINDOW, start);
        let mut now = start;
        let mut run_start = start;
        let mut previous_raw = false;
        let mut last_reported = false;

        for (level, duration) in trace {
            for _ in 0..duration {
                if level != previous_raw {
                    run_start = now;
                    previous_raw = level;
                }
                if let Some(reported) = debouncer.sample(level, now) {
                    prop_assert_ne!(reported, last_reported);
                    prop_assert_eq!(reported, level);
                    prop_assert!(now.wrapping_sub(run_start) >= WINDOW);
                    last_reported = reported;
                }
                now = now.wrapping_add(1);
            }
        }
    }

    #[test]
    fn controller_honours_safety_bounds(
        gaps in edge_trace(),
        start in any::<u32>(),
    ) {
        let config = small_config();
        let mut relay = RelayController::new(&config, start);

        let mut now = start;
        let mut level = false;
        let mut input_on_since: Option<u32> = None;
        let mut energized_since: Option<u32> = None;
        let mut last_off: Option<u32> = None;

        for gap in gaps {
            level = !level;
            let mut actions = relay.on_input_change(level, now);
            input_on_since = level.then_some(now);

            for _ in 0..gap {
                actions.extend(relay.on_tick(now));

                for action in actions.drain(..) {
                    match action {
                        RelayAction::Energize => {
                            let since = input_on_since.expect("energized without input");
                            prop_assert!(now.wrapping_sub(since) >= config.relay_delay_ms);
                            if let Some(off) = last_off {
                                prop_assert!(now.wrapping_sub(off) >= config.min_off_time_ms);
                            }
                            energized_since = Some(now);
                        }
                        RelayAction::DeEnergize => {
                            energized_since = None;
                            last_off = Some(now);
                        }
                        RelayAction::Record(_) => {}
                    }
                }

                if let Some(since) = energized_since {
                    prop_assert!(now.wrapping_sub(since) < config.max_on_time_ms);
                    prop_assert_eq!(relay.state(), RelayState::On);
                }
                prop_assert_eq!(relay.is_energized(), energized_since.is_some());

                now = now.wrapping_add(1);
            }
        }
    }

    #[test]
    fn lockout_is_entered_once_and_left_only_through_off(
        gaps in edge_trace(),
    ) {
        let config = small_config();
        let mut relay = RelayController::new(&config, 0);
        let mut now = 0u32;
        let mut level = false;

        for gap in gaps {
            level = !level;
            let before = relay.state();
            let actions = relay.on_input_change(level, now);
            if before == RelayState::SafetyLockout {
                prop_assert!(actions.iter().all(|action| *action != RelayAction::Energize));
                let expected = if level { RelayState::SafetyLockout } else { RelayState::Off };
                prop_assert_eq!(relay.state(), expected);
            }

            let mut trips = 0;
            for _ in 0..gap {
                let before = relay.state();
                let actions = relay.on_tick(now);
                let trip = RelayAction::Record(EventCode::MaxRuntimeProtection);
                trips += actions.iter().filter(|action| **action == trip).count();
                if before == RelayState::SafetyLockout {
                    prop_assert_eq!(relay.state(), RelayState::SafetyLockout);
                }
                now += 1;
            }
            prop_assert!(trips <= 1);
        }
    }

    #[test]
    fn tick_without_time_passing_changes_nothing(
        gaps in edge_trace(),
    ) {
        let mut relay = RelayController::new(&small_config(), 0);
        let mut now = 0u32;
        let mut level = false;

        for gap in gaps {
            level = !level;
            relay.on_input_change(level, now);
            now += gap;
            relay.on_tick(now);

            let status = relay.status(now);
            prop_assert!(relay.on_tick(now).is_empty());
            prop_assert_eq!(relay.status(now), status);
        }
    }

    #[test]
    fn event_log_keeps_newest_records(
        capacity in 1usize..16,
        times in proptest::collection::vec(any::<i64>(), 0..64),
    ) {
        let mut log = EventLog::with_capacity(capacity);
        for &time in &times {
            log.append(EventCode::DeviceOn, time);
            prop_assert!(log.len() <= capacity);
        }

        let kept: Vec<i64> = log.snapshot().iter().map(|record| record.time).collect();
        let skip = times.len().saturating_sub(capacity);
        prop_assert_eq!(kept, times[skip..].to_vec());
    }
}
