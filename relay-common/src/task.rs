//! The unit of work handed from the coordinator to an agent.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// A display name and mailbox address pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    #[serde(default)]
    pub name: String,
    pub addr: String,
}

impl EmailAddress {
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
        }
    }

    /// A bare address with no display name.
    pub fn bare(addr: impl Into<String>) -> Self {
        Self::new(String::new(), addr)
    }

    /// Checks that `addr` is exactly one syntactically valid mailbox.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let addr = self.addr.trim();
        if addr.is_empty() || addr.chars().any(char::is_whitespace) {
            return false;
        }

        let Some((local, domain)) = addr.rsplit_once('@') else {
            return false;
        };
        if local.is_empty() || domain.is_empty() || domain.starts_with('.') {
            return false;
        }

        match mailparse::addrparse(addr) {
            Ok(list) => matches!(
                list.as_slice(),
                [mailparse::MailAddr::Single(single)] if single.addr == addr
            ),
            Err(_) => false,
        }
    }

    /// Header form, `"Name" <addr>` or just `addr` when unnamed.
    #[must_use]
    pub fn mailbox(&self) -> String {
        if self.name.trim().is_empty() {
            self.addr.clone()
        } else {
            let escaped = self.name.replace('\\', "\\\\").replace('"', "\\\"");
            format!("\"{escaped}\" <{}>", self.addr)
        }
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mailbox())
    }
}

/// Which header list a recipient came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientRole {
    To,
    Cc,
    Bcc,
}

impl fmt::Display for RecipientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::To => "to",
            Self::Cc => "cc",
            Self::Bcc => "bcc",
        })
    }
}

/// The SMTP server an agent should submit through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpServer {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Credentials for SMTP AUTH.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpAuth {
    pub user: String,
    pub pass: String,
}

impl fmt::Debug for SmtpAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpAuth")
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .finish()
    }
}

/// Message importance, carried on the wire as its ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    NonUrgent,
    Urgent,
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Low,
            1 => Self::Normal,
            2 => Self::High,
            3 => Self::NonUrgent,
            4 => Self::Urgent,
            other => return Err(format!("unknown priority {other}")),
        })
    }
}

impl From<Priority> for u8 {
    fn from(value: Priority) -> Self {
        match value {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::NonUrgent => 3,
            Priority::Urgent => 4,
        }
    }
}

/// Content-Transfer-Encoding for an attachment part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum TransferEncoding {
    #[default]
    Base64,
    QuotedPrintable,
}

impl TransferEncoding {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Base64 => "base64",
            Self::QuotedPrintable => "quoted-printable",
        }
    }
}

impl TryFrom<String> for TransferEncoding {
    type Error = TaskError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        // Producers that never set an encoding send the empty string.
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "base64" => Ok(Self::Base64),
            "quoted-printable" => Ok(Self::QuotedPrintable),
            _ => Err(TaskError::UnsupportedEncoding(value)),
        }
    }
}

impl From<TransferEncoding> for &'static str {
    fn from(value: TransferEncoding) -> Self {
        value.as_str()
    }
}

/// A file attached to the message. `content` travels as base64 in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    #[serde(default)]
    pub encoding: TransferEncoding,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

/// The two body types an agent will build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyType {
    Plain,
    Html,
}

impl BodyType {
    /// Parses a content type such as `text/html; charset=utf-8`.
    ///
    /// # Errors
    ///
    /// Anything other than `text/plain` or `text/html` is
    /// [`TaskError::UnsupportedContentType`]; a charset parameter other than
    /// UTF-8 is [`TaskError::UnsupportedCharset`].
    pub fn parse(content_type: &str) -> Result<Self, TaskError> {
        let mut parts = content_type.split(';');
        let mime = parts.next().unwrap_or_default().trim();

        let body_type = if mime.eq_ignore_ascii_case("text/plain") {
            Self::Plain
        } else if mime.eq_ignore_ascii_case("text/html") {
            Self::Html
        } else {
            return Err(TaskError::UnsupportedContentType(content_type.to_string()));
        };

        for param in parts {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            if key.trim().eq_ignore_ascii_case("charset") {
                let charset = value.trim().trim_matches('"');
                if !charset.eq_ignore_ascii_case("utf-8") {
                    return Err(TaskError::UnsupportedCharset(charset.to_string()));
                }
            }
        }

        Ok(body_type)
    }

    #[must_use]
    pub const fn mime(self) -> &'static str {
        match self {
            Self::Plain => "text/plain",
            Self::Html => "text/html",
        }
    }
}

/// A request to deliver one message through a given SMTP server.
///
/// The `id` is the correlation key between the queue, the SMTP submission and
/// the confirmation; it must not change once the task is enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendTask {
    pub id: String,
    pub server: SmtpServer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<SmtpAuth>,
    pub from: EmailAddress,
    #[serde(default)]
    pub to: Vec<EmailAddress>,
    #[serde(default)]
    pub cc: Vec<EmailAddress>,
    #[serde(default)]
    pub bcc: Vec<EmailAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub content_type: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(rename = "files", default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl SendTask {
    /// All recipients in to, cc, bcc order, tagged with their role.
    pub fn recipients(&self) -> impl Iterator<Item = (RecipientRole, &EmailAddress)> {
        self.to
            .iter()
            .map(|addr| (RecipientRole::To, addr))
            .chain(self.cc.iter().map(|addr| (RecipientRole::Cc, addr)))
            .chain(self.bcc.iter().map(|addr| (RecipientRole::Bcc, addr)))
    }

    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }

    /// The parsed body type.
    ///
    /// # Errors
    ///
    /// See [`BodyType::parse`].
    pub fn body_type(&self) -> Result<BodyType, TaskError> {
        BodyType::parse(&self.content_type)
    }

    /// Strict validation used on submission: every field must be usable.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<BodyType, TaskError> {
        if self.id.trim().is_empty() {
            return Err(TaskError::MissingField("id"));
        }
        if self.server.host.trim().is_empty() {
            return Err(TaskError::MissingField("server.host"));
        }

        let body_type = self.body_type()?;

        if !self.from.is_valid() {
            return Err(TaskError::MalformedSender(self.from.addr.clone()));
        }

        if self.recipient_count() == 0 {
            return Err(TaskError::NoRecipients);
        }

        if let Some((role, addr)) = self.recipients().find(|(_, addr)| !addr.is_valid()) {
            return Err(TaskError::MalformedAddress {
                role,
                address: addr.addr.clone(),
            });
        }

        Ok(body_type)
    }
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.trim()).map_err(D::Error::custom)
    }
}
