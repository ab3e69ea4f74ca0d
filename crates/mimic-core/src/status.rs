use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

use crate::ids::UserId;

/// The chat account the process is logged in as.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BotAccount {
    pub id: UserId,
    pub name: String,
}

/// Liveness flags shared by the chat adapter (writer of `connected`), the
/// engine (writer of `paused`) and the health surface (reader of both).
#[derive(Debug, Default)]
pub struct RuntimeStatus {
    connected: AtomicBool,
    paused: AtomicBool,
    account: RwLock<Option<BotAccount>>,
}

impl RuntimeStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn bind_account(&self, account: BotAccount) {
        *self.account.write() = Some(account);
    }

    pub fn account(&self) -> Option<BotAccount> {
        self.account.read().clone()
    }

    /// Connected and processing messages.
    pub fn is_healthy(&self) -> bool {
        self.is_connected()
    }
}
