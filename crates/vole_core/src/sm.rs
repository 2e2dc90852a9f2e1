//! Trial state machine model.
//!
//! A machine is a short, hand-declared sequence of named states with fixed
//! timers, transition edges and output actions. It is composed on the host
//! and sent wholesale to the device controller, which executes it in
//! hardware; the host only gets the event log back when the machine reaches
//! exit. Machines are validated before send so a malformed one fails here
//! rather than mid-trial on the device.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};

/// Condition under which a state is left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    /// The state timer expired (the controller reports this as `Tup`).
    Timeout,
    /// A named hardware event fired, e.g. `BNC2Low`, `Port1In`,
    /// `RotaryEncoder1_3`.
    Event(String),
}

/// Where a transition leads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    State(String),
    Exit,
}

/// Output asserted for the duration of a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputAction {
    /// Open a reward valve line.
    Valve { channel: u8, value: u8 },
    /// Emit a preloaded serial message on a module port.
    Serial { port: u8, message: u8 },
    /// Ask the host to run its softcode handler (sound playback etc.).
    SoftCode(u8),
    /// Drive a BNC sync line.
    Bnc { channel: u8, value: u8 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub name: String,
    /// State timer in seconds. A zero timer with a `Timeout` edge is an
    /// instant pass-through state.
    pub timer: f64,
    pub transitions: Vec<(Condition, Target)>,
    pub outputs: Vec<OutputAction>,
}

impl State {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timer: 0.0,
            transitions: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn timer_secs(mut self, secs: f64) -> Self {
        self.timer = secs;
        self
    }

    pub fn on(mut self, condition: Condition, target: Target) -> Self {
        self.transitions.push((condition, target));
        self
    }

    /// Timer expiry moves to `next`.
    pub fn on_timeout(self, next: impl Into<String>) -> Self {
        self.on(Condition::Timeout, Target::State(next.into()))
    }

    /// Timer expiry ends the machine.
    pub fn on_timeout_exit(self) -> Self {
        self.on(Condition::Timeout, Target::Exit)
    }

    pub fn on_event(self, event: impl Into<String>, target: Target) -> Self {
        self.on(Condition::Event(event.into()), target)
    }

    pub fn output(mut self, action: OutputAction) -> Self {
        self.outputs.push(action);
        self
    }
}

/// An ordered set of states; execution starts at the first one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateMachine {
    pub states: Vec<State>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_state(&mut self, state: State) -> &mut Self {
        self.states.push(state);
        self
    }

    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.iter().find(|s| s.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Check the machine is executable: non-empty, unique non-empty state
    /// names, non-negative timers, every target resolvable, no state without
    /// an exit edge, and at least one transition to `Exit` somewhere.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.states.is_empty() {
            return Err(CoreError::EmptyStateMachine);
        }
        let mut seen = std::collections::HashSet::new();
        for state in &self.states {
            if state.name.is_empty() {
                return Err(CoreError::EmptyStateName);
            }
            if !seen.insert(state.name.as_str()) {
                return Err(CoreError::DuplicateState(state.name.clone()));
            }
            if state.timer < 0.0 || !state.timer.is_finite() {
                return Err(CoreError::NegativeTimer(state.name.clone()));
            }
        }
        let mut reaches_exit = false;
        for state in &self.states {
            if state.transitions.is_empty() {
                return Err(CoreError::DeadEndState(state.name.clone()));
            }
            for (_, target) in &state.transitions {
                match target {
                    Target::Exit => reaches_exit = true,
                    Target::State(name) => {
                        if !seen.contains(name.as_str()) {
                            return Err(CoreError::UnknownTarget {
                                state: state.name.clone(),
                                target: name.clone(),
                            });
                        }
                    }
                }
            }
        }
        if !reaches_exit {
            return Err(CoreError::NoExit);
        }
        Ok(())
    }
}
