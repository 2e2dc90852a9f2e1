//! Software controller: executes a validated state machine against a virtual
//! clock. Timers cost no wall time, so a full session simulates in
//! milliseconds; softcodes are forwarded over a channel exactly as the
//! hardware would call back into the host.

use crate::ambient::AmbientReading;
use crate::controller::Controller;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use tokio::sync::mpsc;
use vole_core::sm::{Condition, OutputAction, Target};
use vole_core::trial::StateVisit;
use vole_core::{StateMachine, TrialEvents};

/// Default virtual latency for hardware events nobody scripted. Keeps event
/// edges (e.g. the sound card's `BNC2Low`) firing in simulation; disable it
/// to assert that a machine would stall on the real device.
const DEFAULT_EVENT_LATENCY: f64 = 0.1;

pub struct SimController {
    clock: f64,
    serial: HashMap<(u8, u8), Vec<u8>>,
    pending: Option<StateMachine>,
    scripted: HashMap<String, f64>,
    default_event_latency: Option<f64>,
    softcode_tx: Option<mpsc::UnboundedSender<u8>>,
    machines_run: u32,
}

impl SimController {
    pub fn new() -> Self {
        Self {
            clock: 0.0,
            serial: HashMap::new(),
            pending: None,
            scripted: HashMap::new(),
            default_event_latency: Some(DEFAULT_EVENT_LATENCY),
            softcode_tx: None,
            machines_run: 0,
        }
    }

    /// Fire `event` that many virtual seconds after entering any state that
    /// waits on it. Overrides the default latency for that event.
    pub fn script_event(&mut self, event: impl Into<String>, secs_after_entry: f64) {
        self.scripted.insert(event.into(), secs_after_entry);
    }

    /// `None` makes unscripted event edges stall the machine, as they would
    /// on hardware with a silent input line.
    pub fn set_default_event_latency(&mut self, latency: Option<f64>) {
        self.default_event_latency = latency;
    }

    /// Receiver for softcodes emitted by state outputs.
    pub fn softcode_channel(&mut self) -> mpsc::UnboundedReceiver<u8> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.softcode_tx = Some(tx);
        rx
    }

    pub fn serial_message(&self, port: u8, index: u8) -> Option<&[u8]> {
        self.serial.get(&(port, index)).map(Vec::as_slice)
    }

    /// Virtual seconds elapsed since the controller was created.
    pub fn clock(&self) -> f64 {
        self.clock
    }

    pub fn machines_run(&self) -> u32 {
        self.machines_run
    }

    /// When does the given transition fire, relative to machine start?
    fn fire_time(
        &self,
        condition: &Condition,
        entered: f64,
        timer: f64,
    ) -> Option<(f64, String)> {
        match condition {
            Condition::Timeout => Some((entered + timer, "Tup".to_string())),
            Condition::Event(name) => {
                let latency = self
                    .scripted
                    .get(name)
                    .copied()
                    .or(self.default_event_latency)?;
                Some((entered + latency, name.clone()))
            }
        }
    }
}

impl Default for SimController {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Controller for SimController {
    async fn load_serial_message(&mut self, port: u8, index: u8, payload: Vec<u8>) -> Result<()> {
        tracing::debug!(port, index, len = payload.len(), "loading serial message");
        self.serial.insert((port, index), payload);
        Ok(())
    }

    async fn send_state_machine(&mut self, sma: &StateMachine) -> Result<()> {
        sma.validate().context("refusing to send invalid state machine")?;
        self.pending = Some(sma.clone());
        Ok(())
    }

    async fn run_state_machine(&mut self) -> Result<TrialEvents> {
        let sma = self
            .pending
            .take()
            .context("run_state_machine called with no machine sent")?;
        let start = self.clock;
        let mut events = TrialEvents::default();

        // Validated machines are non-empty; execution starts at the first state.
        let mut current = sma.states[0].name.clone();
        loop {
            let state = sma
                .state(&current)
                .with_context(|| format!("state '{current}' vanished mid-run"))?;
            let entered = self.clock - start;

            for action in &state.outputs {
                events.outputs.push((state.name.clone(), *action));
                if let OutputAction::SoftCode(code) = action {
                    if let Some(tx) = &self.softcode_tx {
                        let _ = tx.send(*code);
                    }
                }
            }

            let mut best: Option<(f64, Target, String)> = None;
            for (condition, target) in &state.transitions {
                if let Some((at, label)) = self.fire_time(condition, entered, state.timer) {
                    let better = best.as_ref().map_or(true, |(t, _, _)| at < *t);
                    if better {
                        best = Some((at, target.clone(), label));
                    }
                }
            }
            let Some((exited, target, label)) = best else {
                bail!(
                    "simulated machine stalled in state '{}': event edge with no \
                     scripted event and default latency disabled",
                    state.name
                );
            };

            self.clock = start + exited;
            events.record_event(label, exited);
            events.visited.push(StateVisit {
                state: state.name.clone(),
                entered,
                exited,
            });

            match target {
                Target::Exit => break,
                Target::State(next) => current = next,
            }
        }

        self.machines_run += 1;
        tracing::debug!(
            states = events.visited.len(),
            duration = events.duration(),
            "machine reached exit"
        );
        Ok(events)
    }

    async fn read_ambient(&mut self) -> Result<AmbientReading> {
        // A quiet room with a touch of sensor noise.
        let mut rng = rand::thread_rng();
        Ok(AmbientReading {
            temperature_c: 22.5 + rng.gen_range(-0.3..0.3),
            rel_humidity_pct: 45.0 + rng.gen_range(-2.0..2.0),
            air_pressure_hpa: 1013.0 + rng.gen_range(-1.5..1.5),
            timestamp: chrono::Utc::now(),
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.pending = None;
        Ok(())
    }

    fn name(&self) -> &str {
        "SimController"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vole_core::sm::State;

    fn linear(timers: &[f64]) -> StateMachine {
        let mut sma = StateMachine::new();
        for (i, t) in timers.iter().enumerate() {
            let state = State::named(format!("s{i}")).timer_secs(*t);
            let state = if i + 1 == timers.len() {
                state.on_timeout_exit()
            } else {
                state.on_timeout(format!("s{}", i + 1))
            };
            sma.add_state(state);
        }
        sma
    }

    #[tokio::test]
    async fn runs_a_linear_machine_in_order() {
        let mut sim = SimController::new();
        sim.send_state_machine(&linear(&[1.0, 0.5, 0.25])).await.unwrap();
        let events = sim.run_state_machine().await.unwrap();

        let visited: Vec<&str> = events.visited.iter().map(|v| v.state.as_str()).collect();
        assert_eq!(visited, ["s0", "s1", "s2"]);
        assert_eq!(events.events["Tup"].len(), 3);
        assert!((events.duration() - 1.75).abs() < 1e-9);
        assert!((sim.clock() - 1.75).abs() < 1e-9);
        assert_eq!(sim.machines_run(), 1);
    }

    #[tokio::test]
    async fn clock_accumulates_across_machines() {
        let mut sim = SimController::new();
        for _ in 0..3 {
            sim.send_state_machine(&linear(&[2.0])).await.unwrap();
            sim.run_state_machine().await.unwrap();
        }
        assert!((sim.clock() - 6.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn softcodes_are_forwarded() {
        let mut sim = SimController::new();
        let mut rx = sim.softcode_channel();

        let mut sma = StateMachine::new();
        sma.add_state(
            State::named("cue")
                .timer_secs(0.1)
                .on_timeout_exit()
                .output(OutputAction::SoftCode(1)),
        );
        sim.send_state_machine(&sma).await.unwrap();
        sim.run_state_machine().await.unwrap();

        assert_eq!(rx.recv().await, Some(1));
    }

    #[tokio::test]
    async fn scripted_event_beats_timeout() {
        let mut sim = SimController::new();
        sim.script_event("Port1In", 0.2);

        let mut sma = StateMachine::new();
        sma.add_state(
            State::named("wait")
                .timer_secs(10.0)
                .on_timeout_exit()
                .on_event("Port1In", Target::Exit),
        );
        sim.send_state_machine(&sma).await.unwrap();
        let events = sim.run_state_machine().await.unwrap();

        assert!((events.duration() - 0.2).abs() < 1e-9);
        assert_eq!(events.events["Port1In"], vec![0.2]);
        assert!(!events.events.contains_key("Tup"));
    }

    #[tokio::test]
    async fn unscripted_event_edge_stalls_without_default_latency() {
        let mut sim = SimController::new();
        sim.set_default_event_latency(None);

        let mut sma = StateMachine::new();
        sma.add_state(
            State::named("play_tone")
                .timer_secs(0.0)
                .on_event("BNC2Low", Target::Exit),
        );
        sim.send_state_machine(&sma).await.unwrap();
        let err = sim.run_state_machine().await.unwrap_err();
        assert!(err.to_string().contains("stalled"));
    }

    #[tokio::test]
    async fn invalid_machine_refused_at_send() {
        let mut sim = SimController::new();
        let err = sim.send_state_machine(&StateMachine::new()).await.unwrap_err();
        assert!(err.to_string().contains("invalid state machine"));
    }

    #[tokio::test]
    async fn run_without_send_fails() {
        let mut sim = SimController::new();
        assert!(sim.run_state_machine().await.is_err());
    }
}
