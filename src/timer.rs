//! Per-question countdown and the async tick source that drives it.

use crate::machine::{Outcome, QuizMachine, QuizState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Stopped,
    Running(u32),
    Expired,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Countdown {
    remaining: u32,
    running: bool,
}

impl Countdown {
    pub fn new(seconds: u32) -> Self {
        Self {
            remaining: seconds,
            running: false,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Stops the countdown and loads a new budget.
    pub fn reset(&mut self, seconds: u32) {
        self.running = false;
        self.remaining = seconds;
    }

    /// One second elapses. Reaching zero reports `Expired` on the same tick.
    pub fn tick(&mut self) -> Tick {
        if !self.running {
            return Tick::Stopped;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            Tick::Expired
        } else {
            Tick::Running(self.remaining)
        }
    }
}

pub type SharedMachine = Arc<Mutex<QuizMachine>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickEvent {
    pub outcome: Outcome,
    pub state: QuizState,
    pub question_index: Option<usize>,
    pub time_remaining: u32,
}

/// Owns the single repeating interval that feeds `update_timer`. Starting it
/// again replaces the previous interval.
pub struct QuizRunner {
    machine: SharedMachine,
    period: Duration,
    events: broadcast::Sender<TickEvent>,
    ticker: Option<JoinHandle<()>>,
}

impl QuizRunner {
    pub fn new(machine: SharedMachine, period: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            machine,
            period,
            events,
            ticker: None,
        }
    }

    pub fn machine(&self) -> SharedMachine {
        self.machine.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TickEvent> {
        self.events.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.ticker.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    pub fn start(&mut self) {
        self.stop();
        let machine = self.machine.clone();
        let events = self.events.clone();
        let period = self.period;
        self.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await;

            // A timeout recorded while resuming is already waiting for its advance.
            let delay = pending_delay(&*machine.lock().await);
            if let Some(delay) = delay {
                advance_after(&machine, &events, delay).await;
            }

            loop {
                interval.tick().await;
                let (event, delay) = {
                    let mut m = machine.lock().await;
                    let outcome = m.update_timer();
                    (snapshot_event(&m, outcome), pending_delay(&m))
                };
                let _ = events.send(event);

                if let Some(delay) = delay {
                    advance_after(&machine, &events, delay).await;
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }
}

impl Drop for QuizRunner {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pending_delay(machine: &QuizMachine) -> Option<Duration> {
    machine.has_pending_advance().then(|| machine.advance_delay())
}

async fn advance_after(machine: &SharedMachine, events: &broadcast::Sender<TickEvent>, delay: Duration) {
    tokio::time::sleep(delay).await;
    let event = {
        let mut m = machine.lock().await;
        let outcome = m.fire_pending_advance();
        snapshot_event(&m, outcome)
    };
    debug!("timeout advance: {:?}", event.outcome);
    let _ = events.send(event);
}

fn snapshot_event(machine: &QuizMachine, outcome: Outcome) -> TickEvent {
    TickEvent {
        outcome,
        state: machine.state(),
        question_index: machine.progress().map(|p| p.current_question_index),
        time_remaining: machine.time_remaining(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_expires_on_last_second() {
        let mut c = Countdown::new(2);
        assert_eq!(c.tick(), Tick::Stopped);
        c.start();
        assert_eq!(c.tick(), Tick::Running(1));
        assert_eq!(c.tick(), Tick::Expired);
        assert_eq!(c.tick(), Tick::Expired);
        assert_eq!(c.remaining(), 0);
    }

    #[test]
    fn reset_stops() {
        let mut c = Countdown::new(5);
        c.start();
        c.reset(20);
        assert!(!c.is_running());
        assert_eq!(c.remaining(), 20);
    }
}
