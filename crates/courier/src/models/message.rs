//! Message model representing a mirrored Gmail message

use super::{MessageId, ThreadId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An email address with optional display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name (e.g., "Doe, Jane")
    pub name: Option<String>,
    /// Email address, lower-cased (e.g., "jane@example.com")
    pub email: String,
}

impl EmailAddress {
    /// Create a new email address with just the email
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    /// Create a new email address with a display name
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: email.into(),
        }
    }

    /// Parse a single address like `"Jane Doe" <jane@example.com>` or a bare
    /// `jane@example.com`
    pub fn parse(s: &str) -> Self {
        let s = s.trim();

        if s.ends_with('>')
            && let Some(angle_start) = s.rfind('<')
        {
            let raw = s[..angle_start].trim();
            let name = match raw.strip_prefix('"').and_then(|n| n.strip_suffix('"')) {
                Some(quoted) => unescape_quoted(quoted),
                None => raw.to_string(),
            };
            let name = name.trim();
            let email = s[angle_start + 1..s.len() - 1].trim();
            return Self {
                name: if name.is_empty() {
                    None
                } else {
                    Some(name.to_string())
                },
                email: email.to_lowercase(),
            };
        }

        Self {
            name: None,
            email: s.to_lowercase(),
        }
    }

    /// Parse a comma-separated address header (`To`, `Cc`).
    ///
    /// Commas inside quoted display names do not separate addresses.
    pub fn parse_list(s: &str) -> Vec<Self> {
        split_outside_quotes(s, ',')
            .into_iter()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Format the email address for display
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

/// Drop the backslash from quoted-pair escapes (`\"`, `\\`)
fn unescape_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => out.extend(chars.next()),
            c => out.push(c),
        }
    }
    out
}

/// Split on `sep`, ignoring separators between double quotes.
/// A backslash escapes the next character inside a quoted run.
fn split_outside_quotes(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (idx, ch) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                parts.push(&s[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Attachment metadata. Content is fetched lazily by id and never mirrored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Provider attachment id used to fetch the content
    pub attachment_id: String,
}

/// A single mirrored message. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailMessage {
    pub user_id: UserId,
    /// Gmail message id
    pub id: MessageId,
    /// Gmail id of the owning thread
    pub thread_id: ThreadId,
    pub from: EmailAddress,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub body_html: Option<String>,
    pub body_text: Option<String>,
    pub snippet: Option<String>,
    /// `Date` header, or the provider receipt time when the header is unusable
    pub sent_at: DateTime<Utc>,
    /// Whether the message carries the SENT label
    pub is_outbound: bool,
    pub attachments: Vec<Attachment>,
}

impl MailMessage {
    /// Create a new message builder
    pub fn builder(user_id: UserId, id: MessageId, thread_id: ThreadId) -> MailMessageBuilder {
        MailMessageBuilder::new(user_id, id, thread_id)
    }
}

/// Builder for creating MailMessage instances
pub struct MailMessageBuilder {
    user_id: UserId,
    id: MessageId,
    thread_id: ThreadId,
    from: Option<EmailAddress>,
    to: Vec<EmailAddress>,
    cc: Vec<EmailAddress>,
    body_html: Option<String>,
    body_text: Option<String>,
    snippet: Option<String>,
    sent_at: DateTime<Utc>,
    is_outbound: bool,
    attachments: Vec<Attachment>,
}

impl MailMessageBuilder {
    fn new(user_id: UserId, id: MessageId, thread_id: ThreadId) -> Self {
        Self {
            user_id,
            id,
            thread_id,
            from: None,
            to: Vec::new(),
            cc: Vec::new(),
            body_html: None,
            body_text: None,
            snippet: None,
            sent_at: DateTime::<Utc>::default(),
            is_outbound: false,
            attachments: Vec::new(),
        }
    }

    pub fn from(mut self, from: EmailAddress) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: Vec<EmailAddress>) -> Self {
        self.to = to;
        self
    }

    pub fn cc(mut self, cc: Vec<EmailAddress>) -> Self {
        self.cc = cc;
        self
    }

    pub fn body_html(mut self, body_html: Option<String>) -> Self {
        self.body_html = body_html;
        self
    }

    pub fn body_text(mut self, body_text: Option<String>) -> Self {
        self.body_text = body_text;
        self
    }

    pub fn snippet(mut self, snippet: Option<String>) -> Self {
        self.snippet = snippet;
        self
    }

    pub fn sent_at(mut self, sent_at: DateTime<Utc>) -> Self {
        self.sent_at = sent_at;
        self
    }

    pub fn outbound(mut self, is_outbound: bool) -> Self {
        self.is_outbound = is_outbound;
        self
    }

    pub fn attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn build(self) -> MailMessage {
        MailMessage {
            user_id: self.user_id,
            id: self.id,
            thread_id: self.thread_id,
            from: self.from.unwrap_or_else(|| EmailAddress::new("")),
            to: self.to,
            cc: self.cc,
            body_html: self.body_html,
            body_text: self.body_text,
            snippet: self.snippet,
            sent_at: self.sent_at,
            is_outbound: self.is_outbound,
            attachments: self.attachments,
        }
    }
}
