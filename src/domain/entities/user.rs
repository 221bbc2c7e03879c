use std::borrow::Cow;
use std::fmt;

/// Sender of a chat message. `id` is the principal used for rate limiting
/// and allowlists; the name fields only feed log records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct User {
    pub id: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: None,
            first_name: None,
            last_name: None,
        }
    }

    /// `@handle` when the platform has one, else the full name, else the id
    pub fn display_name(&self) -> Cow<'_, str> {
        match (&self.username, &self.first_name, &self.last_name) {
            (Some(handle), _, _) => Cow::Owned(format!("@{}", handle)),
            (None, Some(first), Some(last)) => Cow::Owned(format!("{} {}", first, last)),
            (None, Some(first), None) => Cow::Borrowed(first),
            (None, None, _) => Cow::Borrowed(&self.id),
        }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}
