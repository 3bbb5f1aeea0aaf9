// src/engine.rs
//! Drives a `SamplingCycle` from the GUI frame loop and keeps the indicator state.
use crate::boards::BoardTest;
use crate::config::{ScanSettings, TestConfig, Timing};
use crate::cycle::{SamplingCycle, Step, StepOutcome};
use crate::scheduler::{Scheduler, TaskToken};
use crate::session::DeviceSession;
use crate::types::{BoardKind, Led};
use log::info;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const MAX_MESSAGES: usize = 8;
const START_DELAY_MS: u64 = 500;

pub type BoardFactory = Box<dyn FnMut(&TestConfig) -> Box<dyn BoardTest>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Task {
    Cycle(Step),
    ActivityOff,
    InstantOff,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Leds {
    pub ready: Led,
    pub activity: Led,
    /// Result of the last display cycle.
    pub instantaneous: Led,
    /// Green until the first failure of the run.
    pub overall: Led,
}

impl Default for Leds {
    fn default() -> Self {
        Self {
            ready: Led::Off,
            activity: Led::Off,
            instantaneous: Led::Off,
            overall: Led::Green,
        }
    }
}

pub struct TestEngine {
    config: TestConfig,
    factory: BoardFactory,
    cycle: SamplingCycle,
    scheduler: Scheduler<Task>,
    cycle_token: Option<TaskToken>,
    activity_token: Option<TaskToken>,
    instant_token: Option<TaskToken>,
    leds: Leds,
    running: bool,
    messages: VecDeque<String>,
    alert: Option<String>,
}

impl TestEngine {
    pub fn new(config: TestConfig, mut factory: BoardFactory) -> Self {
        let cycle = SamplingCycle::new(&config, DeviceSession::new(factory(&config)));
        let mut engine = Self {
            config,
            factory,
            cycle,
            scheduler: Scheduler::new(),
            cycle_token: None,
            activity_token: None,
            instant_token: None,
            leds: Leds::default(),
            running: false,
            messages: VecDeque::new(),
            alert: None,
        };
        engine.log(format!("{} ready", engine.config.board.title()));
        engine
    }

    pub fn kind(&self) -> BoardKind {
        self.config.board
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    pub fn cycle(&self) -> &SamplingCycle {
        &self.cycle
    }

    pub fn leds(&self) -> Leds {
        self.leds
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn messages(&self) -> impl Iterator<Item = &String> {
        self.messages.iter()
    }

    pub fn alert(&self) -> Option<&str> {
        self.alert.as_deref()
    }

    pub fn dismiss_alert(&mut self) {
        self.alert = None;
    }

    fn log(&mut self, message: String) {
        if self.messages.len() == MAX_MESSAGES {
            self.messages.pop_front();
        }
        self.messages.push_back(format!("> {message}"));
    }

    /// Starts a fresh run: counters cleared, baseline captured again.
    pub fn start(&mut self, now: Instant) {
        self.clear();
        self.running = true;
        self.cycle.arm();
        self.schedule_step(now, Step::Baseline, Timing::ms(START_DELAY_MS));
        info!("{} test started", self.kind());
        self.log("test started".to_owned());
    }

    /// Halts the run and releases the board; counters stay on screen.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.halt();
        info!("{} test stopped", self.kind());
        self.log("test stopped".to_owned());
    }

    /// Clears counters and the baseline. A running test starts over.
    pub fn reset(&mut self, now: Instant) {
        if self.running {
            self.start(now);
        } else {
            self.clear();
            self.log("counters reset".to_owned());
        }
    }

    /// Only takes effect between runs.
    pub fn set_watchdog(&mut self, enabled: bool) -> bool {
        if self.running {
            return false;
        }
        self.config.watchdog = enabled;
        self.cycle.set_watchdog(enabled);
        true
    }

    /// Channel count and rate are fixed for the duration of a run.
    pub fn set_mcc128_scan(&mut self, channel_count: usize, rate_hz: f64) -> bool {
        if self.running || self.kind() != BoardKind::Mcc128 {
            return false;
        }
        self.config.set_mcc128_scan(channel_count, rate_hz);
        let board = (self.factory)(&self.config);
        self.cycle = SamplingCycle::new(&self.config, DeviceSession::new(board));
        true
    }

    pub fn scan(&self) -> ScanSettings {
        self.config.scan
    }

    /// Runs every task due at `now`; returns when the next one is due.
    pub fn poll(&mut self, now: Instant) -> Option<Instant> {
        while let Some(task) = self.scheduler.pop_due(now) {
            match task {
                Task::Cycle(step) => {
                    self.cycle_token = None;
                    let outcome = self.cycle.run(step);
                    self.apply(now, outcome);
                }
                Task::ActivityOff => {
                    self.activity_token = None;
                    self.leds.activity = Led::Off;
                }
                Task::InstantOff => {
                    self.instant_token = None;
                    self.leds.instantaneous = Led::Off;
                }
            }
        }
        self.scheduler.next_deadline()
    }

    fn apply(&mut self, now: Instant, outcome: StepOutcome) {
        for message in outcome.messages {
            self.log(message);
        }
        if outcome.activity {
            self.leds.activity = Led::Green;
            let blink = Timing::ms(self.config.timing.activity_blink_ms);
            self.replace(now, blink, Task::ActivityOff);
        }
        if let Some(failed) = outcome.verdict {
            self.show_verdict(now, failed);
        }
        self.leds.ready = if self.cycle.session().is_open() {
            Led::Green
        } else {
            Led::Off
        };
        if let Some(alert) = outcome.alert {
            self.log(alert.clone());
            self.alert = Some(alert);
            self.halt();
            return;
        }
        if let Some((step, delay)) = outcome.next {
            self.schedule_step(now, step, delay);
        }
    }

    fn show_verdict(&mut self, now: Instant, failed: bool) {
        self.leds.instantaneous = if failed { Led::Red } else { Led::Green };
        self.leds.overall = if self.cycle.tally().latched() {
            Led::Red
        } else {
            Led::Green
        };
        if let Some(blink) = self.config.timing.inst_blink_ms {
            self.replace(now, Timing::ms(blink), Task::InstantOff);
        }
    }

    fn replace(&mut self, now: Instant, delay: Duration, task: Task) {
        let slot = match task {
            Task::ActivityOff => &mut self.activity_token,
            Task::InstantOff => &mut self.instant_token,
            Task::Cycle(_) => &mut self.cycle_token,
        };
        if let Some(token) = slot.take() {
            self.scheduler.cancel(token);
        }
        *slot = Some(self.scheduler.schedule(now, delay, task));
    }

    fn schedule_step(&mut self, now: Instant, step: Step, delay: Duration) {
        self.replace(now, delay, Task::Cycle(step));
    }

    fn halt(&mut self) {
        self.scheduler.clear();
        self.cycle_token = None;
        self.activity_token = None;
        self.instant_token = None;
        self.cycle.stop();
        self.leds.ready = Led::Off;
        self.leds.activity = Led::Off;
        self.running = false;
    }

    fn clear(&mut self) {
        self.halt();
        self.cycle.reset();
        self.leds = Leds::default();
    }
}

impl Drop for TestEngine {
    fn drop(&mut self) {
        self.halt();
    }
}
