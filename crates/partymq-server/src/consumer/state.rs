//! Consumer state machine
//!
//! Pure transition table; the controller performs the returned action and
//! commits the new state once the action succeeds.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerState {
    #[default]
    Stopped,
    Running,
}

/// Inputs observed by the controller loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerEvent {
    /// Periodic check of client availability
    Poll { clients_ready: bool },
    /// The broker ended the subscription
    SubscriptionEnded,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Subscribe to the source queue
    Start,
    /// Cancel the active subscription
    Stop,
    /// Forget a subscription the broker already ended
    Release,
    /// Cancel any subscription and leave the loop
    Exit,
}

impl ConsumerState {
    pub fn on(self, event: ControllerEvent) -> Option<Action> {
        match (self, event) {
            (_, ControllerEvent::Shutdown) => Some(Action::Exit),
            (ConsumerState::Stopped, ControllerEvent::Poll { clients_ready: true }) => {
                Some(Action::Start)
            }
            (ConsumerState::Running, ControllerEvent::Poll { clients_ready: false }) => {
                Some(Action::Stop)
            }
            (ConsumerState::Running, ControllerEvent::SubscriptionEnded) => Some(Action::Release),
            _ => None,
        }
    }

    pub fn is_running(self) -> bool {
        self == ConsumerState::Running
    }
}
