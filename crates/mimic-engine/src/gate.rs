//! Decides whether, and in which mode, the persona answers a message.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;

use mimic_core::message::Message;
use mimic_core::persona::Tunables;
use mimic_core::response::{GateDecision, ResponseMode, TriggerReason};

use crate::aliases::PersonaAliases;
use crate::error::EngineError;
use crate::random::RandomSource;

/// Channel state the gate reads. `snapshot` ends with the message under
/// evaluation when there is one.
pub struct GateInput<'a> {
    pub snapshot: &'a [Message],
    pub last_response_at: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
    pub paused: bool,
}

/// Per-message features that feed the probability.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Signals {
    pub direct_mention: bool,
    pub other_mention: bool,
    pub question: bool,
    pub topic: bool,
    pub idle: bool,
    pub continues_thread: bool,
}

pub struct ResponseGate {
    tunables: Tunables,
    random: Arc<dyn RandomSource>,
    topic: Option<Regex>,
    inline_mention: Regex,
}

impl ResponseGate {
    pub fn new(tunables: Tunables, random: Arc<dyn RandomSource>) -> Result<Self, EngineError> {
        let keywords: Vec<String> = tunables
            .topic_keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(regex::escape)
            .collect();
        // Keywords anchor at a word start so "play" matches "playing" but not "display".
        let topic = if keywords.is_empty() {
            None
        } else {
            Some(Regex::new(&format!(r"(?i)\b(?:{})", keywords.join("|")))?)
        };
        Ok(Self {
            tunables,
            random,
            topic,
            inline_mention: Regex::new(r"<@!?(\d+)>")?,
        })
    }

    /// Evaluate an inbound message.
    pub fn evaluate(
        &self,
        message: &Message,
        input: &GateInput<'_>,
        aliases: &PersonaAliases,
    ) -> GateDecision {
        if input.paused {
            return GateDecision::silent(TriggerReason::Paused, 0.0);
        }

        let signals = self.signals(message, input, aliases);
        if signals.direct_mention {
            return GateDecision {
                should_respond: true,
                mode: ResponseMode::MentionReply,
                trigger: TriggerReason::DirectMention,
                probability: 1.0,
            };
        }

        let p = self.probability(&signals);
        if self.draw(p) {
            let mode = if signals.question || signals.continues_thread {
                ResponseMode::ContinuationReply
            } else {
                ResponseMode::Ambient
            };
            return GateDecision {
                should_respond: true,
                mode,
                trigger: TriggerReason::ProbabilityDraw,
                probability: p,
            };
        }

        let previous_activity = preceding(input.snapshot, message).map(|m| m.timestamp);
        if self.long_idle(previous_activity, input.last_response_at, input.now) {
            let init = self.tunables.initiation_probability;
            if self.draw(init) {
                return GateDecision {
                    should_respond: true,
                    mode: ResponseMode::Initiation,
                    trigger: TriggerReason::LongIdleInitiation,
                    probability: init,
                };
            }
        }

        GateDecision::silent(TriggerReason::NotDrawn, p)
    }

    /// Initiation check for a channel with no new message (idle sweep).
    pub fn evaluate_initiation(&self, input: &GateInput<'_>) -> GateDecision {
        if input.paused {
            return GateDecision::silent(TriggerReason::Paused, 0.0);
        }
        let init = self.tunables.initiation_probability;
        // Only channels with known activity are eligible.
        let Some(last_activity) = input.snapshot.last().map(|m| m.timestamp) else {
            return GateDecision::silent(TriggerReason::NotDrawn, 0.0);
        };
        if self.long_idle(Some(last_activity), input.last_response_at, input.now) && self.draw(init)
        {
            return GateDecision {
                should_respond: true,
                mode: ResponseMode::Initiation,
                trigger: TriggerReason::LongIdleInitiation,
                probability: init,
            };
        }
        GateDecision::silent(TriggerReason::NotDrawn, init)
    }

    pub fn signals(
        &self,
        message: &Message,
        input: &GateInput<'_>,
        aliases: &PersonaAliases,
    ) -> Signals {
        let idle = match input.last_response_at {
            None => true,
            Some(last) => {
                exceeds(last, input.now, Duration::from_secs(self.tunables.idle_threshold_secs))
            }
        };
        Signals {
            direct_mention: aliases.is_mentioned_in(message),
            other_mention: self.mentions_someone_else(message, aliases),
            question: self.is_question(&message.content),
            topic: self
                .topic
                .as_ref()
                .is_some_and(|re| re.is_match(&message.content)),
            idle,
            continues_thread: continues_persona_thread(message, input.snapshot, aliases),
        }
    }

    /// Respond probability for a message that does not mention the persona.
    pub fn probability(&self, s: &Signals) -> f64 {
        let t = &self.tunables;
        let mut p = t.base_probability;
        if s.other_mention {
            p += t.bonus_other_mention;
        }
        if s.question {
            p += t.bonus_question;
        }
        if s.topic {
            p += t.bonus_topic;
        }
        if s.idle {
            p += t.bonus_idle;
        }
        p.clamp(0.0, 1.0).min(t.probability_cap)
    }

    /// A question ends with `?` or opens with an interrogative word.
    pub fn is_question(&self, content: &str) -> bool {
        let trimmed = content.trim_end();
        if trimmed.ends_with('?') {
            return true;
        }
        let first_word = trimmed
            .split_whitespace()
            .find(|w| !w.starts_with('@') && !w.starts_with("<@"))
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                    .to_lowercase()
            });
        match first_word {
            Some(word) => self.tunables.interrogatives.iter().any(|i| *i == word),
            None => false,
        }
    }

    fn mentions_someone_else(&self, message: &Message, aliases: &PersonaAliases) -> bool {
        let structured = message
            .mentions
            .iter()
            .any(|m| !aliases.is_persona(m) && *m != message.author_id);
        structured
            || self.inline_mention.captures_iter(&message.content).any(|c| {
                let id = &c[1];
                !aliases.ids().iter().any(|p| p.as_str() == id)
                    && id != message.author_id.as_str()
            })
    }

    fn long_idle(
        &self,
        last_activity: Option<DateTime<Utc>>,
        last_response_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        let threshold = Duration::from_secs(self.tunables.long_idle_threshold_secs);
        let quiet = last_activity.map_or(true, |t| exceeds(t, now, threshold));
        let unanswered = last_response_at.map_or(true, |t| exceeds(t, now, threshold));
        quiet && unanswered
    }

    fn draw(&self, p: f64) -> bool {
        p > 0.0 && self.random.next_f64() <= p
    }
}

fn exceeds(earlier: DateTime<Utc>, now: DateTime<Utc>, threshold: Duration) -> bool {
    (now - earlier).to_std().is_ok_and(|d| d > threshold)
}

/// The message immediately before `message` in the snapshot.
fn preceding<'a>(snapshot: &'a [Message], message: &Message) -> Option<&'a Message> {
    let pos = snapshot.iter().rposition(|m| m.id == message.id)?;
    pos.checked_sub(1).map(|i| &snapshot[i])
}

/// A reply to a persona message, or a message that directly follows one.
fn continues_persona_thread(
    message: &Message,
    snapshot: &[Message],
    aliases: &PersonaAliases,
) -> bool {
    if let Some(target) = &message.reply_to {
        if snapshot
            .iter()
            .any(|m| &m.id == target && aliases.authored(m))
        {
            return true;
        }
    }
    preceding(snapshot, message).is_some_and(|m| aliases.authored(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::FixedDraws;
    use chrono::TimeZone;
    use mimic_core::ids::UserId;
    use mimic_core::persona::PersonaIdentity;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn aliases() -> PersonaAliases {
        PersonaAliases::resolve(
            &PersonaIdentity {
                id: UserId::from("12345"),
                name: "persona".into(),
            },
            None,
        )
    }

    fn gate(draw: f64) -> ResponseGate {
        ResponseGate::new(Tunables::default(), Arc::new(FixedDraws::always(draw))).unwrap()
    }

    fn msg(id: &str, author: &str, content: &str, at: DateTime<Utc>) -> Message {
        Message::new(id, "c", author, author, content, at)
    }

    fn eval(gate: &ResponseGate, snapshot: &[Message], last: Option<DateTime<Utc>>) -> GateDecision {
        let message = snapshot.last().unwrap();
        gate.evaluate(
            message,
            &GateInput {
                snapshot,
                last_response_at: last,
                now: message.timestamp,
                paused: false,
            },
            &aliases(),
        )
    }

    #[test]
    fn direct_mention_is_certain() {
        // Draw of 0.9999 would lose any capped probability.
        let g = gate(0.9999);
        for content in ["<@12345> yo", "@persona hi", "yo <@!12345>"] {
            let snap = [msg("1", "bob", content, t0())];
            let d = eval(&g, &snap, Some(t0()));
            assert!(d.should_respond, "{content}");
            assert_eq!(d.mode, ResponseMode::MentionReply);
            assert_eq!(d.trigger, TriggerReason::DirectMention);
            assert_eq!(d.probability, 1.0);
        }
    }

    #[test]
    fn structured_mention_counts() {
        let g = gate(0.9999);
        let snap = [msg("1", "bob", "yo", t0()).with_mentions(["12345"])];
        assert_eq!(eval(&g, &snap, None).trigger, TriggerReason::DirectMention);
    }

    #[test]
    fn base_probability_only() {
        let g = gate(0.5);
        let last = t0() - chrono::Duration::minutes(5);
        let snap = [msg("1", "bob", "nice weather", t0())];
        let d = eval(&g, &snap, Some(last));
        assert!(!d.should_respond);
        assert!((d.probability - 0.25).abs() < 1e-9);
    }

    #[test]
    fn bonuses_stack_and_cap() {
        let g = gate(0.0);
        let last = t0() - chrono::Duration::minutes(5);
        let snap = [msg("1", "bob", "<@777> wanna play valorant?", t0())];
        let d = eval(&g, &snap, Some(last));
        // 0.25 + 0.3 + 0.3 + 0.3 clamps to 1.0 then caps at 0.85.
        assert!((d.probability - 0.85).abs() < 1e-9);
        assert!(d.should_respond);
        assert_eq!(d.mode, ResponseMode::ContinuationReply);
    }

    #[test]
    fn idle_bonus_when_never_responded_or_long_ago() {
        let g = gate(1.0);
        let snap = [msg("1", "bob", "hm", t0())];
        assert!((eval(&g, &snap, None).probability - 0.45).abs() < 1e-9);
        let three_hours = t0() - chrono::Duration::hours(3);
        assert!((eval(&g, &snap, Some(three_hours)).probability - 0.45).abs() < 1e-9);
    }

    #[test]
    fn valorant_in_idle_channel_scores_at_least_point_seven_five() {
        let g = gate(1.0);
        let snap = [msg("1", "bob", "anyone on valorant tonight", t0())];
        let last = t0() - chrono::Duration::hours(3);
        let d = eval(&g, &snap, Some(last));
        assert!(d.probability >= 0.75 - 1e-9, "p = {}", d.probability);
    }

    #[test]
    fn draw_equal_to_probability_responds() {
        let g = gate(0.25);
        let last = t0() - chrono::Duration::minutes(1);
        let snap = [msg("1", "bob", "ok", t0())];
        let d = eval(&g, &snap, Some(last));
        assert!(d.should_respond);
        assert_eq!(d.mode, ResponseMode::Ambient);
    }

    #[test]
    fn reply_to_persona_is_continuation() {
        let g = gate(0.0);
        let snap = [
            msg("1", "12345", "skill issue", t0()),
            msg("2", "carol", "lol", t0()),
            msg("3", "bob", "nah", t0()).with_reply_to("1"),
        ];
        let d = eval(&g, &snap, Some(t0()));
        assert_eq!(d.mode, ResponseMode::ContinuationReply);
    }

    #[test]
    fn message_after_persona_is_continuation() {
        let g = gate(0.0);
        let snap = [msg("1", "12345", "skill issue", t0()), msg("2", "bob", "nah", t0())];
        assert_eq!(eval(&g, &snap, Some(t0())).mode, ResponseMode::ContinuationReply);
    }

    #[test]
    fn question_heuristics() {
        let g = gate(0.0);
        assert!(g.is_question("you good?"));
        assert!(g.is_question("what's your rank"));
        assert!(g.is_question("@persona what's your rank"));
        assert!(g.is_question("How did that happen"));
        assert!(!g.is_question("i know what happened"));
        assert!(!g.is_question(""));
    }

    #[test]
    fn self_mention_by_author_is_not_other_mention() {
        let g = gate(1.0);
        let snap = [msg("1", "bob", "hm", t0()).with_mentions(["bob"])];
        let signals = g.signals(
            &snap[0],
            &GateInput {
                snapshot: &snap,
                last_response_at: Some(t0()),
                now: t0(),
                paused: false,
            },
            &aliases(),
        );
        assert!(!signals.other_mention);
    }

    #[test]
    fn paused_never_responds() {
        let g = gate(0.0);
        let snap = [msg("1", "bob", "<@12345> hi", t0())];
        let d = g.evaluate(
            &snap[0],
            &GateInput {
                snapshot: &snap,
                last_response_at: None,
                now: t0(),
                paused: true,
            },
            &aliases(),
        );
        assert!(!d.should_respond);
        assert_eq!(d.trigger, TriggerReason::Paused);
    }

    #[test]
    fn long_idle_initiation_after_missed_draw() {
        // First draw loses the probability, second wins the initiation gate.
        let g = ResponseGate::new(Tunables::default(), Arc::new(FixedDraws::new([0.99, 0.05])))
            .unwrap();
        let earlier = t0() - chrono::Duration::hours(5);
        let snap = [msg("1", "bob", "old", earlier), msg("2", "bob", "anyone here", t0())];
        let d = eval(&g, &snap, Some(earlier));
        assert!(d.should_respond);
        assert_eq!(d.mode, ResponseMode::Initiation);
        assert_eq!(d.trigger, TriggerReason::LongIdleInitiation);
    }

    #[test]
    fn no_initiation_in_active_channel() {
        let g = ResponseGate::new(Tunables::default(), Arc::new(FixedDraws::new([0.99, 0.0])))
            .unwrap();
        let snap = [
            msg("1", "bob", "a", t0() - chrono::Duration::minutes(1)),
            msg("2", "bob", "b", t0()),
        ];
        let d = eval(&g, &snap, Some(t0() - chrono::Duration::hours(5)));
        assert!(!d.should_respond);
        assert_eq!(d.trigger, TriggerReason::NotDrawn);
    }

    #[test]
    fn sweep_initiation() {
        let g = gate(0.05);
        let snap = [msg("1", "bob", "gn", t0())];
        let input = |now| GateInput {
            snapshot: &snap,
            last_response_at: None,
            now,
            paused: false,
        };
        assert!(!g.evaluate_initiation(&input(t0() + chrono::Duration::hours(1))).should_respond);
        let d = g.evaluate_initiation(&input(t0() + chrono::Duration::hours(5)));
        assert!(d.should_respond);
        assert_eq!(d.mode, ResponseMode::Initiation);

        let empty: [Message; 0] = [];
        let d = g.evaluate_initiation(&GateInput {
            snapshot: &empty,
            last_response_at: None,
            now: t0(),
            paused: false,
        });
        assert!(!d.should_respond);
    }

    #[test]
    fn topic_keywords_anchor_at_word_start() {
        let g = gate(1.0);
        let check = |content: &str| {
            let snap = [msg("1", "bob", content, t0())];
            g.signals(
                &snap[0],
                &GateInput {
                    snapshot: &snap,
                    last_response_at: Some(t0()),
                    now: t0(),
                    paused: false,
                },
                &aliases(),
            )
            .topic
        };
        assert!(check("we playing later"));
        assert!(check("GG"));
        assert!(!check("check the display"));
        assert!(!check("egg"));
    }
}
