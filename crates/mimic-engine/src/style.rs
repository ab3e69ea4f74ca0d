//! Deterministic post-processing that makes a model completion read like
//! the persona wrote it.
//!
//! Rules run in a fixed order:
//! 1. strip sentence-terminal punctuation at line ends
//! 2. lower-case everything except ALL-CAPS emphasis
//! 3. apply the persona's mandatory substitutions
//! 4. drop inline mention tokens of other users
//! 5. drop self-mention handles
//! 6. suppress outright on any denylisted term
//! 7. truncate to the word and character budget
//!
//! A final tidy pass collapses whitespace left by removals and re-strips
//! punctuation exposed by truncation. Running the validator on its own
//! output returns that output unchanged.

use regex::{Captures, Regex};

use mimic_core::persona::Lexicon;

use crate::aliases::is_handle_char;
use crate::error::EngineError;

/// Characters treated as sentence-terminal at a line end.
const TERMINAL: &[char] = &['.', '!', '?', ',', ';', '…'];

const MAX_REPAIR_PASSES: usize = 3;

/// Why a candidate produced no output. Suppression is silent to chat.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuppressReason {
    Denylisted,
    Empty,
}

impl SuppressReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Denylisted => "denylisted",
            Self::Empty => "empty",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Validated {
    Accepted {
        text: String,
        /// The raw candidate tried to @-address someone; delivered as a reply instead.
        had_mentions: bool,
    },
    Suppressed(SuppressReason),
}

#[derive(Clone, Copy, Debug)]
pub struct Limits {
    pub max_words: usize,
    pub max_chars: usize,
}

pub struct StyleValidator {
    limits: Limits,
    substitutions: Vec<(Regex, String)>,
    denylist: Vec<Regex>,
    token: Regex,
    inline_mention: Regex,
    broadcast: Regex,
}

impl StyleValidator {
    pub fn new(lexicon: &Lexicon, limits: Limits) -> Result<Self, EngineError> {
        if limits.max_words == 0 || limits.max_chars == 0 {
            return Err(EngineError::InvalidTunable(
                "response word and character limits must be at least 1".into(),
            ));
        }
        let substitutions = lexicon
            .substitutions
            .iter()
            .filter(|(from, _)| !from.trim().is_empty())
            .map(|(from, to)| Ok((word_pattern(from)?, to.clone())))
            .collect::<Result<Vec<_>, EngineError>>()?;
        let denylist = lexicon
            .denylist
            .iter()
            .filter(|term| !term.trim().is_empty())
            .map(|term| containment_pattern(term))
            .collect::<Result<Vec<_>, EngineError>>()?;
        Ok(Self {
            limits,
            substitutions,
            denylist,
            token: Regex::new(r"\S+")?,
            inline_mention: Regex::new(r"<@[!&]?\d+>")?,
            broadcast: Regex::new(r"(?i)@(?:everyone|here)\b")?,
        })
    }

    /// Run every rule over a raw completion. `self_names` are the
    /// persona's lower-cased handles.
    pub fn process(&self, raw: &str, self_names: &[String]) -> Validated {
        let had_mentions = raw.contains("<@");
        let handles = handle_patterns(self_names);

        let mut text = match self.repair(raw, &handles) {
            Ok(text) => text,
            Err(reason) => return Validated::Suppressed(reason),
        };
        // Truncation can expose what an earlier rule would have caught
        // (a lone capital, a shortened handle); repeat until stable.
        for _ in 0..MAX_REPAIR_PASSES {
            match self.repair(&text, &handles) {
                Ok(next) if next == text => break,
                Ok(next) => text = next,
                Err(reason) => return Validated::Suppressed(reason),
            }
        }
        Validated::Accepted { text, had_mentions }
    }

    fn repair(&self, raw: &str, handles: &[Regex]) -> Result<String, SuppressReason> {
        let text = strip_line_end_punctuation(raw);
        let text = self.fold_case(&text);
        let text = self.substitute(&text);
        let text = self.inline_mention.replace_all(&text, "").into_owned();
        let text = self.broadcast.replace_all(&text, "").into_owned();
        let text = remove_handles(&text, handles);

        if self
            .denylist
            .iter()
            .any(|re| re.is_match(raw) || re.is_match(&text))
        {
            return Err(SuppressReason::Denylisted);
        }

        let text = tidy(&text);
        let text = truncate_words(&text, self.limits.max_words);
        let text = truncate_chars(&text, self.limits.max_chars);
        let text = tidy(&text);

        if text.is_empty() {
            return Err(SuppressReason::Empty);
        }
        Ok(text)
    }

    fn fold_case(&self, text: &str) -> String {
        self.token
            .replace_all(text, |caps: &Captures<'_>| {
                let word = &caps[0];
                if is_emphasis(word) {
                    word.to_string()
                } else {
                    word.to_lowercase()
                }
            })
            .into_owned()
    }

    fn substitute(&self, text: &str) -> String {
        self.substitutions
            .iter()
            .fold(text.to_string(), |acc, (re, to)| {
                re.replace_all(&acc, regex::NoExpand(to)).into_owned()
            })
    }
}

/// Case-insensitive match anywhere in the text, so inflected and compound
/// forms are caught too. Runs of whitespace inside the term match any spacing.
fn containment_pattern(term: &str) -> Result<Regex, EngineError> {
    let parts: Vec<String> = term.split_whitespace().map(regex::escape).collect();
    Ok(Regex::new(&format!("(?i){}", parts.join(r"\s+")))?)
}

/// Case-insensitive whole-word pattern for a literal phrase.
fn word_pattern(phrase: &str) -> Result<Regex, EngineError> {
    let escaped = regex::escape(phrase.trim());
    let start = if phrase.trim().starts_with(|c: char| c.is_alphanumeric()) {
        r"\b"
    } else {
        ""
    };
    let end = if phrase.trim().ends_with(|c: char| c.is_alphanumeric()) {
        r"\b"
    } else {
        ""
    };
    Ok(Regex::new(&format!("(?i){start}{escaped}{end}"))?)
}

/// ALL-CAPS emphasis: at least two letters, none lower-case.
fn is_emphasis(word: &str) -> bool {
    let letters = word.chars().filter(|c| c.is_alphabetic()).count();
    letters >= 2 && !word.chars().any(|c| c.is_lowercase())
}

fn strip_line_end_punctuation(text: &str) -> String {
    text.lines()
        .map(|line| line.trim_end_matches(|c: char| TERMINAL.contains(&c) || c.is_whitespace()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn handle_patterns(names: &[String]) -> Vec<Regex> {
    names
        .iter()
        .filter(|n| !n.is_empty())
        .filter_map(|n| Regex::new(&format!("(?i)@{}", regex::escape(n))).ok())
        .collect()
}

/// Drop `@name` handles that stand alone (not part of a longer handle or address).
fn remove_handles(text: &str, handles: &[Regex]) -> String {
    let mut out = text.to_string();
    for re in handles {
        let mut kept = String::with_capacity(out.len());
        let mut last = 0;
        for m in re.find_iter(&out) {
            let before_ok = out[..m.start()]
                .chars()
                .next_back()
                .map_or(true, |c| !is_handle_char(c));
            let after_ok = out[m.end()..]
                .chars()
                .next()
                .map_or(true, |c| !is_handle_char(c));
            if before_ok && after_ok {
                kept.push_str(&out[last..m.start()]);
                last = m.end();
            }
        }
        kept.push_str(&out[last..]);
        out = kept;
    }
    out
}

/// Collapse whitespace runs, strip line-end punctuation, drop blank lines.
fn tidy(text: &str) -> String {
    text.lines()
        .map(|line| {
            let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
            collapsed
                .trim_end_matches(|c: char| TERMINAL.contains(&c) || c.is_whitespace())
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Keep the first `max` words, preserving line breaks.
fn truncate_words(text: &str, max: usize) -> String {
    let mut remaining = max;
    let mut lines = Vec::new();
    for line in text.lines() {
        if remaining == 0 {
            break;
        }
        let words: Vec<&str> = line.split_whitespace().take(remaining).collect();
        remaining -= words.len();
        lines.push(words.join(" "));
    }
    lines.join("\n")
}

/// Cut to at most `max` characters, backing off to a word boundary when one exists.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut = text
        .char_indices()
        .nth(max)
        .map_or(text.len(), |(i, _)| i);
    let head = &text[..cut];
    let next_is_break = text[cut..].starts_with(char::is_whitespace);
    if next_is_break {
        return head.to_string();
    }
    match head.rfind(char::is_whitespace) {
        Some(boundary) if boundary > 0 => head[..boundary].to_string(),
        _ => head.to_string(),
    }
}
