//! Operator commands typed into chat (`!py pause`, `!py status`, ...).

use mimic_core::ids::UserId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminCommand {
    Pause,
    Resume,
    Status,
    /// Prefix matched but the verb did not.
    Unknown(String),
}

impl AdminCommand {
    /// Parse `content` as a command under `prefix`. `None` when the message
    /// is ordinary conversation.
    pub fn parse(prefix: &str, content: &str) -> Option<Self> {
        let rest = content.trim().strip_prefix(prefix)?;
        // "!pyro" is chat, "!py status" is a command.
        if rest.chars().next().is_some_and(|c| !c.is_whitespace()) {
            return None;
        }
        let verb = rest.split_whitespace().next().unwrap_or_default().to_lowercase();
        Some(match verb.as_str() {
            "pause" | "stop" => Self::Pause,
            "resume" | "start" => Self::Resume,
            "status" | "" => Self::Status,
            _ => Self::Unknown(verb),
        })
    }
}

/// Who may issue commands and which prefix marks them.
#[derive(Clone, Debug)]
pub struct CommandPolicy {
    pub prefix: String,
    pub admins: Vec<UserId>,
}

impl CommandPolicy {
    pub fn new(prefix: impl Into<String>, admins: Vec<UserId>) -> Self {
        Self {
            prefix: prefix.into(),
            admins,
        }
    }

    pub fn is_admin(&self, user: &UserId) -> bool {
        self.admins.contains(user)
    }
}

/// Counters surfaced by the `status` command.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatusReport {
    pub paused: bool,
    pub channels: usize,
    pub received: u64,
    pub dispatched: u64,
    pub suppressed: u64,
}

impl StatusReport {
    pub fn render(&self) -> String {
        format!(
            "status: {} | channels {} | seen {} | sent {} | suppressed {}",
            if self.paused { "paused" } else { "active" },
            self.channels,
            self.received,
            self.dispatched,
            self.suppressed,
        )
    }
}
