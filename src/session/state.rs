//! Session lifecycle states

use super::errors::SessionError;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Created = 0,
    AwaitingBuyCompletion = 1,
    Holding = 2,
    StagedSelling = 3,
    Closed = 4,
    Aborted = 5,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::AwaitingBuyCompletion,
            2 => Self::Holding,
            3 => Self::StagedSelling,
            4 => Self::Closed,
            _ => Self::Aborted,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Aborted)
    }

    /// Whether `self -> to` is a legal edge
    pub fn can_transition(&self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Created, AwaitingBuyCompletion)
                | (Created, Aborted)
                | (AwaitingBuyCompletion, Holding)
                | (AwaitingBuyCompletion, Aborted)
                | (Holding, StagedSelling)
                | (Holding, Closed)
                | (StagedSelling, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::AwaitingBuyCompletion => "awaiting_buy",
            Self::Holding => "holding",
            Self::StagedSelling => "staged_selling",
            Self::Closed => "closed",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Lock-free cell that only accepts legal transitions
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl Default for StateCell {
    fn default() -> Self {
        Self(AtomicU8::new(SessionState::Created as u8))
    }
}

impl StateCell {
    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `to`. Re-entering the current state is a no-op.
    pub fn transition(&self, to: SessionState) -> Result<SessionState, SessionError> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                let from = SessionState::from_u8(raw);
                (from == to || from.can_transition(to)).then_some(to as u8)
            })
            .map(SessionState::from_u8)
            .map_err(|raw| SessionError::InvalidTransition {
                from: SessionState::from_u8(raw),
                to,
            })
    }
}
