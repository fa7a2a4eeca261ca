use crate::{
    config::RelayConfig,
    types::{elapsed_ms, EventCode, RelayState, RelayStatus, Tick},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayAction {
    Energize,
    DeEnergize,
    Record(EventCode),
}

// No timers are scheduled: each tick re-checks elapsed time since state entry.
#[derive(Debug, Clone)]
pub struct RelayController {
    relay_delay_ms: u32,
    max_on_time_ms: u32,
    min_off_time_ms: u32,

    state: RelayState,
    state_since: Tick,
    input_active: bool,

    // Set when the relay drops out; cleared once min off-time has passed.
    last_off_ms: Option<Tick>,
    short_cycle_reported: bool,
}

impl RelayController {
    pub fn new(config: &RelayConfig, now: Tick) -> Self {
        Self {
            relay_delay_ms: config.relay_delay_ms,
            max_on_time_ms: config.max_on_time_ms,
            min_off_time_ms: config.min_off_time_ms,
            state: RelayState::Off,
            state_since: now,
            input_active: false,
            last_off_ms: None,
            short_cycle_reported: false,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn is_energized(&self) -> bool {
        self.state.is_energized()
    }

    pub fn input_active(&self) -> bool {
        self.input_active
    }

    /// True while a re-energize would be refused as a short cycle.
    pub fn in_short_cycle_hold(&self) -> bool {
        self.last_off_ms.is_some()
    }

    pub fn on_input_change(&mut self, level: bool, now: Tick) -> Vec<RelayAction> {
        let mut actions = Vec::new();
        self.input_active = level;

        if level {
            if self.state == RelayState::Off {
                self.enter(RelayState::DelayedOn, now);
                self.short_cycle_reported = false;
                actions.push(RelayAction::Record(EventCode::InputRelayOn));
            }
            return actions;
        }

        match self.state {
            RelayState::Off => return actions,
            RelayState::DelayedOn => {
                actions.push(RelayAction::Record(EventCode::InputRelayOff));
            }
            RelayState::On => {
                self.last_off_ms = Some(now);
                actions.push(RelayAction::DeEnergize);
                actions.push(RelayAction::Record(EventCode::OutputRelayOff));
                actions.push(RelayAction::Record(EventCode::InputRelayOff));
            }
            RelayState::SafetyLockout => {
                // Relay already dropped out on the trip; this only re-arms.
                actions.push(RelayAction::Record(EventCode::InputRelayOff));
            }
        }
        self.enter(RelayState::Off, now);

        actions
    }

    pub fn on_tick(&mut self, now: Tick) -> Vec<RelayAction> {
        let mut actions = Vec::new();

        self.expire_short_cycle_hold(now);

        match self.state {
            RelayState::Off | RelayState::SafetyLockout => {}
            RelayState::DelayedOn => {
                if elapsed_ms(now, self.state_since) < self.relay_delay_ms {
                    return actions;
                }

                if self.in_short_cycle_hold() {
                    if !self.short_cycle_reported {
                        self.short_cycle_reported = true;
                        actions.push(RelayAction::Record(EventCode::ShortCycleDetected));
                    }
                    return actions;
                }

                self.enter(RelayState::On, now);
                actions.push(RelayAction::Energize);
                actions.push(RelayAction::Record(EventCode::OutputRelayOn));
            }
            RelayState::On => {
                if elapsed_ms(now, self.state_since) >= self.max_on_time_ms {
                    self.last_off_ms = Some(now);
                    self.enter(RelayState::SafetyLockout, now);
                    actions.push(RelayAction::DeEnergize);
                    actions.push(RelayAction::Record(EventCode::MaxRuntimeProtection));
                }
            }
        }

        actions
    }

    pub fn status(&self, now: Tick) -> RelayStatus {
        let state_elapsed_ms = elapsed_ms(now, self.state_since);
        let on_remaining_ms = if self.state == RelayState::On {
            self.max_on_time_ms.saturating_sub(state_elapsed_ms)
        } else {
            0
        };

        RelayStatus {
            state: self.state,
            relay_energized: self.is_energized(),
            input_active: self.input_active,
            state_elapsed_ms,
            on_remaining_ms,
        }
    }

    fn enter(&mut self, state: RelayState, now: Tick) {
        self.state = state;
        self.state_since = now;
    }

    // Dropping the stamp once it is old enough keeps a stale value from
    // aliasing into a fresh one after the tick counter wraps.
    fn expire_short_cycle_hold(&mut self, now: Tick) {
        if let Some(off_ms) = self.last_off_ms {
            if elapsed_ms(now, off_ms) >= self.min_off_time_ms {
                self.last_off_ms = None;
            }
        }
    }
}
