//! Minimum spacing between dispatched responses.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use mimic_core::ids::{ChannelId, UserId};
use mimic_core::persona::Tunables;
use mimic_core::response::ResponseMode;

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub min_interval: Duration,
    /// Direct mentions skip the interval check.
    pub mention_bypass: bool,
    /// Optional extra spacing keyed by the author being answered.
    pub per_user_interval: Option<Duration>,
}

impl RateLimitConfig {
    pub fn from_tunables(t: &Tunables) -> Self {
        Self {
            min_interval: Duration::from_secs(t.min_interval_secs),
            mention_bypass: t.mention_bypasses_interval,
            per_user_interval: t.per_user_interval_secs.map(Duration::from_secs),
        }
    }
}

/// Per-channel (and optionally per-user) cooldown tracking.
///
/// Only [`record`](Self::record) mutates state, and it never moves a
/// timestamp backwards.
pub struct RateLimiter {
    config: RateLimitConfig,
    channels: DashMap<ChannelId, DateTime<Utc>>,
    users: DashMap<UserId, DateTime<Utc>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            channels: DashMap::new(),
            users: DashMap::new(),
        }
    }

    /// Whether a response in `mode` may be dispatched on `channel_id` at `now`.
    pub fn allow(&self, channel_id: &ChannelId, mode: ResponseMode, now: DateTime<Utc>) -> bool {
        if self.bypasses(mode) {
            return true;
        }
        match self.channels.get(channel_id) {
            Some(last) => elapsed(*last, now) >= self.config.min_interval,
            None => true,
        }
    }

    /// Per-user check; always true when no per-user interval is configured.
    pub fn allow_user(&self, author_id: &UserId, mode: ResponseMode, now: DateTime<Utc>) -> bool {
        let Some(interval) = self.config.per_user_interval else {
            return true;
        };
        if self.bypasses(mode) {
            return true;
        }
        match self.users.get(author_id) {
            Some(last) => elapsed(*last, now) >= interval,
            None => true,
        }
    }

    /// Note a dispatched response. Call only after the platform accepted it.
    pub fn record(&self, channel_id: &ChannelId, author_id: Option<&UserId>, now: DateTime<Utc>) {
        advance(&self.channels, channel_id.clone(), now);
        if let (Some(author), Some(_)) = (author_id, self.config.per_user_interval) {
            advance(&self.users, author.clone(), now);
        }
    }

    pub fn last_response_at(&self, channel_id: &ChannelId) -> Option<DateTime<Utc>> {
        self.channels.get(channel_id).map(|t| *t)
    }

    fn bypasses(&self, mode: ResponseMode) -> bool {
        self.config.mention_bypass && mode == ResponseMode::MentionReply
    }
}

fn advance<K: std::hash::Hash + Eq>(map: &DashMap<K, DateTime<Utc>>, key: K, now: DateTime<Utc>) {
    map.entry(key)
        .and_modify(|t| {
            if now > *t {
                *t = now;
            }
        })
        .or_insert(now);
}

/// Wall-clock time between two instants, zero if the clock went backwards.
fn elapsed(earlier: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - earlier).to_std().unwrap_or(Duration::ZERO)
}
