use std::fmt;

use serde::{Deserialize, Serialize};

/// A platform user, either invoking a command or appearing in an event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub is_bot: bool,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: None,
            display_name: None,
            is_bot: false,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn as_bot(mut self) -> Self {
        self.is_bot = true;
        self
    }

    /// Best human-readable label: username, then display name, then id
    pub fn label(&self) -> &str {
        self.username
            .as_deref()
            .or(self.display_name.as_deref())
            .unwrap_or(&self.id)
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_prefers_username() {
        let user = User::new("42").with_display_name("Ada").with_username("ada");
        assert_eq!(user.label(), "ada");
        assert_eq!(User::new("42").with_display_name("Ada").label(), "Ada");
        assert_eq!(User::new("42").to_string(), "42");
    }
}
