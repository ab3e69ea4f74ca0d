use mimic_core::ids::UserId;
use mimic_core::message::Message;
use mimic_core::persona::PersonaIdentity;
use mimic_core::status::BotAccount;

/// Every id and handle the persona answers to: the impersonated identity
/// plus, once the gateway reports it, the bot account it is logged in as.
#[derive(Clone, Debug, Default)]
pub struct PersonaAliases {
    ids: Vec<UserId>,
    names: Vec<String>,
}

impl PersonaAliases {
    pub fn resolve(identity: &PersonaIdentity, account: Option<&BotAccount>) -> Self {
        let mut aliases = Self::default();
        aliases.push(identity.id.clone(), &identity.name);
        if let Some(account) = account {
            aliases.push(account.id.clone(), &account.name);
        }
        aliases
    }

    fn push(&mut self, id: UserId, name: &str) {
        if !self.ids.contains(&id) {
            self.ids.push(id);
        }
        let name = name.trim().to_lowercase();
        if !name.is_empty() && !self.names.contains(&name) {
            self.names.push(name);
        }
    }

    pub fn ids(&self) -> &[UserId] {
        &self.ids
    }

    /// Lower-cased display names.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_persona(&self, id: &UserId) -> bool {
        self.ids.contains(id)
    }

    pub fn authored(&self, message: &Message) -> bool {
        self.is_persona(&message.author_id)
    }

    /// Whether `message` addresses the persona: a structured mention, an
    /// inline `<@id>`/`<@!id>` token, or a typed `@name` handle.
    pub fn is_mentioned_in(&self, message: &Message) -> bool {
        if message.mentions.iter().any(|m| self.is_persona(m)) {
            return true;
        }
        let content = &message.content;
        if self.ids.iter().any(|id| {
            content.contains(&format!("<@{id}>")) || content.contains(&format!("<@!{id}>"))
        }) {
            return true;
        }
        let lower = content.to_lowercase();
        self.names.iter().any(|name| contains_handle(&lower, name))
    }
}

/// `@name` present as a standalone handle in already-lowercased text.
fn contains_handle(lower: &str, name: &str) -> bool {
    let needle = format!("@{name}");
    lower.match_indices(&needle).any(|(start, _)| {
        let before_ok = lower[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !is_handle_char(c));
        let after_ok = lower[start + needle.len()..]
            .chars()
            .next()
            .map_or(true, |c| !is_handle_char(c));
        before_ok && after_ok
    })
}

pub(crate) fn is_handle_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
