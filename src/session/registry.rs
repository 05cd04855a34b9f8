//! Live session registry
//!
//! One entry per token. The follow route of the ingest stage fans every
//! deduplicated event out to the session that owns its token, and outside
//! callers reach a session's command channel through [`SessionRegistry::command`].

use super::errors::SessionError;
use super::rules::Command;
use crate::metrics::metrics;
use crate::types::SwapEvent;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    pub events: mpsc::Sender<Arc<SwapEvent>>,
    pub commands: mpsc::Sender<Command>,
    pub cancel: CancellationToken,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Pubkey, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// At most one live session per token
    pub fn register(&self, token: Pubkey, handle: SessionHandle) -> Result<(), SessionError> {
        match self.sessions.entry(token) {
            Entry::Occupied(_) => Err(SessionError::AlreadyLive(token)),
            Entry::Vacant(entry) => {
                entry.insert(handle);
                metrics().active_sessions.set(self.sessions.len() as i64);
                Ok(())
            }
        }
    }

    /// Remove the entry only if it still belongs to session `id`
    pub fn remove(&self, token: &Pubkey, id: Uuid) -> bool {
        let removed = self
            .sessions
            .remove_if(token, |_, handle| handle.id == id)
            .is_some();
        if removed {
            metrics().active_sessions.set(self.sessions.len() as i64);
        }
        removed
    }

    pub fn contains(&self, token: &Pubkey) -> bool {
        self.sessions.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Hand `event` to the session trading its token. Never blocks.
    pub fn dispatch(&self, event: &Arc<SwapEvent>) -> bool {
        let token = event.token_mint();
        let Some(handle) = self.sessions.get(&token) else {
            return false;
        };
        match handle.events.try_send(Arc::clone(event)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(token = %token, signature = %event.signature, "Session inbox full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Queue `command` on the session trading `token`. Never blocks; false when
    /// there is no live session or its command queue is full.
    pub fn command(&self, token: &Pubkey, command: Command) -> bool {
        let Some(handle) = self.sessions.get(token) else {
            return false;
        };
        match handle.commands.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(token = %token, %command, "Session command queue full, dropping command");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Follow route consumer
    pub async fn run_follow(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<Arc<SwapEvent>>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => {
                        self.dispatch(&event);
                    }
                    None => break,
                },
            }
        }
        debug!("Follow dispatcher stopped");
    }

    pub fn cancel_all(&self) {
        let live = self.sessions.len();
        for entry in self.sessions.iter() {
            entry.value().cancel.cancel();
        }
        if live > 0 {
            info!(live, "Cancelled all live sessions");
        }
    }
}
