//! Assembles the model prompt from persona text and channel history.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use mimic_core::message::Message;
use mimic_core::persona::{PersonaProfile, CONTEXT_PLACEHOLDER};
use mimic_core::prompt::{Prompt, SectionLabel};
use mimic_core::response::ResponseMode;

use crate::error::EngineError;

const EMPTY_HISTORY: &str = "No recent messages in this channel.";
const LATEST_MARKER: &str = "LATEST MESSAGE:";

pub struct PromptBuilder {
    timezone: Tz,
    max_context_messages: usize,
}

impl PromptBuilder {
    pub fn new(profile: &PersonaProfile) -> Result<Self, EngineError> {
        let tz_name = &profile.tunables.timezone;
        let timezone =
            Tz::from_str(tz_name).map_err(|_| EngineError::InvalidTimezone(tz_name.clone()))?;
        Ok(Self {
            timezone,
            max_context_messages: profile.tunables.max_context_messages.max(1),
        })
    }

    /// Build the prompt for one response.
    ///
    /// `trigger` is the message being answered (absent for initiation);
    /// when it is the newest transcript line it is marked as the latest message.
    pub fn build(
        &self,
        profile: &PersonaProfile,
        snapshot: &[Message],
        trigger: Option<&Message>,
        mode: ResponseMode,
        now: DateTime<Utc>,
    ) -> Prompt {
        let situation = self.situation(now);
        let mut prompt = Prompt::empty();

        if profile.system_prompt.contains(CONTEXT_PLACEHOLDER) {
            prompt.push(
                SectionLabel::Persona,
                profile.system_prompt.replacen(CONTEXT_PLACEHOLDER, &situation, 1),
            );
        } else {
            prompt.push(SectionLabel::Persona, profile.system_prompt.clone());
            prompt.push(SectionLabel::Situation, situation);
        }

        prompt.push(SectionLabel::Transcript, self.transcript(snapshot, trigger));
        prompt.push(
            SectionLabel::Instruction,
            instruction(&profile.identity.name, mode),
        );
        prompt
    }

    fn situation(&self, now: DateTime<Utc>) -> String {
        let local = now.with_timezone(&self.timezone);
        format!(
            "Current local time ({}): {}",
            self.timezone.name(),
            local.format("%I:%M %p on %A, %B %d")
        )
    }

    fn transcript(&self, snapshot: &[Message], trigger: Option<&Message>) -> String {
        let lines: Vec<&Message> = snapshot
            .iter()
            .filter(|m| !m.content.trim().is_empty())
            .collect();
        let start = lines.len().saturating_sub(self.max_context_messages);
        let recent = &lines[start..];
        if recent.is_empty() {
            return EMPTY_HISTORY.to_string();
        }

        let last = recent.len() - 1;
        let body: Vec<String> = recent
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let is_latest = i == last && trigger.is_some_and(|t| t.id == m.id);
                if is_latest {
                    format!("{LATEST_MARKER} {}: {}", m.author_name, m.content)
                } else {
                    let at = m.timestamp.with_timezone(&self.timezone).format("%H:%M");
                    format!("[{at}] {}: {}", m.author_name, m.content)
                }
            })
            .collect();
        format!(
            "RECENT CHAT HISTORY (last {} messages):\n{}",
            recent.len(),
            body.join("\n")
        )
    }
}

fn instruction(name: &str, mode: ResponseMode) -> String {
    let rules = "Write strictly in lowercase (ALL-CAPS only for emphasis), with no ending \
                 punctuation and no @mentions. Keep it short.";
    match mode {
        ResponseMode::MentionReply | ResponseMode::ContinuationReply => format!(
            "You are {name} and have just read the chat above. The {LATEST_MARKER} line is \
             addressed to you: respond to this message now, the way {name} would, following \
             every rule of your persona. {rules}\n\nYour response:"
        ),
        ResponseMode::Ambient => format!(
            "You are {name} and have just read the chat above. Nobody asked you anything; \
             continue the conversation naturally, the way {name} would chime in. {rules}\n\n\
             Your response:"
        ),
        ResponseMode::Initiation => format!(
            "You are {name}. The chat has gone quiet for a while, so continue the conversation \
             naturally: say something {name} would say to get it going again. {rules}\n\n\
             Your message:"
        ),
    }
}
