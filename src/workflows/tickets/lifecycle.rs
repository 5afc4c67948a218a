use statig::prelude::*;

use crate::discord::types::ChannelId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketEvent {
    ConfirmClose,
    CloseAborted,
    ChannelDeleted,
}

/// Per-channel lifecycle: open -> closing -> closed.
///
/// Only an open ticket accepts a close confirmation, so a second confirm is ignored.
#[derive(Debug)]
pub struct TicketLifecycle {
    pub channel: ChannelId,
}

impl TicketLifecycle {
    pub fn new(channel: ChannelId) -> Self {
        Self { channel }
    }
}

#[state_machine(initial = "State::open()")]
impl TicketLifecycle {
    #[state]
    fn open(&mut self, event: &TicketEvent) -> Outcome<State> {
        match event {
            TicketEvent::ConfirmClose => {
                tracing::info!(channel = %self.channel, "Ticket closing");
                Transition(State::closing())
            }
            _ => Handled,
        }
    }

    #[state]
    fn closing(&mut self, event: &TicketEvent) -> Outcome<State> {
        match event {
            TicketEvent::CloseAborted => {
                tracing::warn!(channel = %self.channel, "Ticket close aborted, reopening");
                Transition(State::open())
            }
            TicketEvent::ChannelDeleted => {
                tracing::info!(channel = %self.channel, "Ticket channel deleted");
                Transition(State::closed())
            }
            TicketEvent::ConfirmClose => Handled,
        }
    }

    #[state]
    fn closed(&mut self, event: &TicketEvent) -> Outcome<State> {
        tracing::debug!(channel = %self.channel, event = ?event, "Ignoring event for closed ticket");
        Handled
    }
}

pub fn is_open(state: &State) -> bool {
    matches!(state, State::Open { .. })
}

pub fn is_closing(state: &State) -> bool {
    matches!(state, State::Closing { .. })
}

pub fn is_closed(state: &State) -> bool {
    matches!(state, State::Closed { .. })
}
