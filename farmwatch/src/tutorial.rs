//! Guided onboarding overlay.
//!
//! `Tutorial` is an explicit state machine handed to whoever renders the
//! overlay. Only two keys are persisted: whether the tutorial has been seen,
//! and which steps were completed. A storage failure reads as "never seen",
//! so the worst case is showing the tutorial again.

use crate::storage::KeyValueStore;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, warn};

pub const SEEN_KEY: &str = "hasSeenTutorial";
pub const COMPLETED_KEY: &str = "completedTutorialSteps";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TutorialStep {
    pub id: &'static str,
    pub title: &'static str,
    pub body: &'static str,
}

pub const DEFAULT_STEPS: [TutorialStep; 7] = [
    TutorialStep {
        id: "welcome",
        title: "Welcome",
        body: "Monitor your farms and sensors in one place.",
    },
    TutorialStep {
        id: "dashboard",
        title: "Dashboard",
        body: "Latest pH, EC, soil moisture, temperature and UV readings, colour-coded by status.",
    },
    TutorialStep {
        id: "charts",
        title: "Charts",
        body: "Tap a sensor to see its last 24 hours.",
    },
    TutorialStep {
        id: "requests",
        title: "Add farms and sensors",
        body: "New farms and sensors are sent to an administrator for approval.",
    },
    TutorialStep {
        id: "notifications",
        title: "Notifications",
        body: "Approvals and alerts show up here with an unread badge.",
    },
    TutorialStep {
        id: "activity",
        title: "Activity",
        body: "Everything you request is logged in your activity feed.",
    },
    TutorialStep {
        id: "advisor",
        title: "Farming advisor",
        body: "Ask questions about your readings and get advice.",
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Closed,
    Active,
    Minimized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TutorialState {
    pub phase: Phase,
    pub current_step: usize,
    pub is_minimized: bool,
    pub is_first_time_user: bool,
    pub completed_steps: BTreeSet<String>,
}

pub struct Tutorial<S> {
    store: S,
    steps: Vec<TutorialStep>,
    state: TutorialState,
}

impl<S: KeyValueStore> Tutorial<S> {
    pub fn load(store: S, steps: Vec<TutorialStep>) -> Self {
        let seen = read_key(&store, SEEN_KEY).is_some();
        let completed_steps = read_key(&store, COMPLETED_KEY)
            .and_then(|raw| match serde_json::from_str::<BTreeSet<String>>(&raw) {
                Ok(steps) => Some(steps),
                Err(e) => {
                    warn!("Ignoring unreadable {}: {}", COMPLETED_KEY, e);
                    None
                }
            })
            .unwrap_or_default();

        Self {
            store,
            steps,
            state: TutorialState {
                phase: Phase::Closed,
                current_step: 0,
                is_minimized: false,
                is_first_time_user: !seen,
                completed_steps,
            },
        }
    }

    pub fn state(&self) -> &TutorialState {
        &self.state
    }

    pub fn steps(&self) -> &[TutorialStep] {
        &self.steps
    }

    pub fn current(&self) -> Option<&TutorialStep> {
        self.steps.get(self.state.current_step)
    }

    fn last_index(&self) -> usize {
        self.steps.len().saturating_sub(1)
    }

    pub fn should_show_overlay(&self) -> bool {
        self.state.phase == Phase::Active
    }

    fn set_phase(&mut self, phase: Phase) {
        self.state.phase = phase;
        self.state.is_minimized = phase == Phase::Minimized;
    }

    fn complete_current(&mut self) {
        if let Some(step) = self.steps.get(self.state.current_step) {
            self.state.completed_steps.insert(step.id.to_string());
        }
    }

    pub fn start(&mut self) {
        if self.state.phase != Phase::Closed || self.steps.is_empty() {
            return;
        }
        self.state.current_step = 0;
        self.set_phase(Phase::Active);
    }

    /// Advances one step. At the last step this does nothing; use `finish`.
    pub fn next(&mut self) {
        if self.state.phase != Phase::Active || self.state.current_step >= self.last_index() {
            return;
        }
        self.complete_current();
        self.state.current_step += 1;
    }

    pub fn previous(&mut self) {
        if self.state.phase != Phase::Active || self.state.current_step == 0 {
            return;
        }
        self.state.current_step -= 1;
    }

    pub fn minimize(&mut self) {
        if self.state.phase == Phase::Active {
            self.set_phase(Phase::Minimized);
        }
    }

    pub fn maximize(&mut self) {
        if self.state.phase == Phase::Minimized {
            self.set_phase(Phase::Active);
        }
    }

    pub fn finish(&mut self) {
        if self.state.phase == Phase::Closed {
            return;
        }
        self.complete_current();
        self.close();
    }

    pub fn close(&mut self) {
        self.set_phase(Phase::Closed);
        self.state.is_first_time_user = false;

        if let Err(e) = self.store.set(SEEN_KEY, "true") {
            warn!("Failed to persist {}: {}", SEEN_KEY, e);
        }
        match serde_json::to_string(&self.state.completed_steps) {
            Ok(json) => {
                if let Err(e) = self.store.set(COMPLETED_KEY, &json) {
                    warn!("Failed to persist {}: {}", COMPLETED_KEY, e);
                }
            }
            Err(e) => warn!("Failed to encode completed steps: {}", e),
        }
        debug!("Tutorial closed at step {}", self.state.current_step);
    }

    pub fn reset(&mut self) {
        for key in [SEEN_KEY, COMPLETED_KEY] {
            if let Err(e) = self.store.remove(key) {
                warn!("Failed to clear {}: {}", key, e);
            }
        }
        self.state = TutorialState {
            phase: Phase::Closed,
            current_step: 0,
            is_minimized: false,
            is_first_time_user: true,
            completed_steps: BTreeSet::new(),
        };
    }
}

fn read_key(store: &impl KeyValueStore, key: &str) -> Option<String> {
    match store.get(key) {
        Ok(value) => value,
        Err(e) => {
            warn!("Failed to read {}, treating as absent: {}", key, e);
            None
        }
    }
}
