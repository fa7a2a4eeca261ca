use crate::{
    config::RelayConfig,
    debounce::Debouncer,
    event_log::SharedEventLog,
    relay::{RelayAction, RelayController},
    types::{EventCode, LogRecord, RelayState, RelayStatus, Tick, WallTime},
};

/// Output relay pin. Writes are assumed infallible at this level.
pub trait RelayOutput {
    fn set_energized(&mut self, energized: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: RelayState,
    pub to: RelayState,
}

/// Owns the debouncer, the controller and the relay pin, and advances them
/// once per tick: the debouncer is always sampled before the controller.
pub struct TickDriver<O> {
    debouncer: Debouncer,
    controller: RelayController,
    output: O,
    log: SharedEventLog,
}

impl<O: RelayOutput> TickDriver<O> {
    /// Forces the relay off and records the boot event.
    pub fn new(
        config: &RelayConfig,
        mut output: O,
        log: SharedEventLog,
        now: Tick,
        wall: WallTime,
    ) -> Self {
        output.set_energized(false);
        log.append(EventCode::DeviceOn, wall);

        Self {
            debouncer: Debouncer::new(config.debounce_ms, now),
            controller: RelayController::new(config, now),
            output,
            log,
        }
    }

    pub fn tick(&mut self, raw_level: bool, now: Tick, wall: WallTime) -> Option<Transition> {
        let from = self.controller.state();

        if let Some(level) = self.debouncer.sample(raw_level, now) {
            let actions = self.controller.on_input_change(level, now);
            self.apply(actions, wall);
        }
        let actions = self.controller.on_tick(now);
        self.apply(actions, wall);

        let to = self.controller.state();
        (from != to).then_some(Transition { from, to })
    }

    pub fn current_state(&self) -> RelayState {
        self.controller.state()
    }

    pub fn status(&self, now: Tick) -> RelayStatus {
        self.controller.status(now)
    }

    pub fn in_short_cycle_hold(&self) -> bool {
        self.controller.in_short_cycle_hold()
    }

    pub fn log(&self) -> &SharedEventLog {
        &self.log
    }

    pub fn log_snapshot(&self) -> Vec<LogRecord> {
        self.log.snapshot()
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    fn apply(&mut self, actions: Vec<RelayAction>, wall: WallTime) {
        for action in actions {
            match action {
                RelayAction::Energize => self.output.set_energized(true),
                RelayAction::DeEnergize => self.output.set_energized(false),
                RelayAction::Record(code) => self.log.append(code, wall),
            }
        }
    }
}
