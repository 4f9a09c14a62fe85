use std::fmt::{Display, Formatter, Result};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Push,
}

impl Channel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Some(Channel::Email),
            "push" => Some(Channel::Push),
            _ => None,
        }
    }

    /// Routing key on the notifications exchange.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Push => "push",
        }
    }

    pub fn queue_name(&self) -> String {
        format!("{}.queue", self.as_str())
    }

    pub fn retry_queue_name(&self) -> String {
        format!("{}.retry.queue", self.as_str())
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive_and_trims() {
        assert_eq!(Channel::parse(" Email "), Some(Channel::Email));
        assert_eq!(Channel::parse("PUSH"), Some(Channel::Push));
        assert_eq!(Channel::parse("sms"), None);
        assert_eq!(Channel::parse(""), None);
    }

    #[test]
    fn queue_names_follow_routing_key() {
        assert_eq!(Channel::Email.queue_name(), "email.queue");
        assert_eq!(Channel::Push.retry_queue_name(), "push.retry.queue");
    }
}
