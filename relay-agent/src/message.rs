//! Builds the RFC 5322 message and SMTP envelope for a [`SendTask`].

use std::fmt::Write as _;

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use relay_common::{
    Attachment, BodyType, EmailAddress, Priority, SendTask, TaskError, TransferEncoding,
};
use ulid::Ulid;

const LINE_LIMIT: usize = 76;

/// Bytes of UTF-8 per RFC 2047 encoded word, keeping each word under 75
/// characters once base64 and the `=?utf-8?B?...?=` wrapper are added.
const ENCODED_WORD_BYTES: usize = 45;

/// Where the message goes, as opposed to what it says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailEnvelope {
    pub sender: String,
    pub recipients: Vec<String>,
}

/// A message ready for the DATA phase.
#[derive(Debug, Clone)]
pub struct Message {
    pub envelope: MailEnvelope,
    pub content: Vec<u8>,
    /// Recipients dropped because their address did not parse.
    pub skipped: Vec<String>,
}

impl Message {
    /// Builds the message for `task`.
    ///
    /// # Errors
    ///
    /// If the content type is not plain text or HTML in UTF-8, the sender is
    /// malformed, or no recipient has a valid address.
    pub fn build(task: &SendTask) -> Result<Self, TaskError> {
        Self::build_at(task, Utc::now(), Ulid::new())
    }

    fn build_at(task: &SendTask, date: DateTime<Utc>, unique: Ulid) -> Result<Self, TaskError> {
        let body_type = task.body_type()?;

        if !task.from.is_valid() {
            return Err(TaskError::MalformedSender(task.from.addr.clone()));
        }

        let mut skipped = Vec::new();
        let mut valid = |addresses: &[EmailAddress]| -> Vec<EmailAddress> {
            addresses
                .iter()
                .filter(|address| {
                    let ok = address.is_valid();
                    if !ok {
                        skipped.push(address.addr.clone());
                    }
                    ok
                })
                .cloned()
                .collect()
        };
        let to = valid(&task.to);
        let cc = valid(&task.cc);
        let bcc = valid(&task.bcc);

        let recipients: Vec<String> = to
            .iter()
            .chain(&cc)
            .chain(&bcc)
            .map(|address| address.addr.clone())
            .collect();
        if recipients.is_empty() {
            return Err(TaskError::NoRecipients);
        }

        let mut headers = Headers::default();
        headers.push("From", &display_mailbox(&task.from));
        if !to.is_empty() {
            headers.push("To", &address_list(&to));
        }
        if !cc.is_empty() {
            headers.push("Cc", &address_list(&cc));
        }
        headers.push("Subject", &encode_header_text(&task.subject));
        headers.push("Date", &date.to_rfc2822());
        headers.push(
            "Message-ID",
            &format!("<{unique}@{}>", sender_domain(&task.from)),
        );
        headers.push("MIME-Version", "1.0");
        if let Some(user_agent) = task.user_agent.as_deref().filter(|ua| !ua.is_empty()) {
            headers.push("X-Mailer", &encode_header_text(user_agent));
        }
        if let Some(priority) = task.priority {
            priority_headers(&mut headers, priority);
        }

        let mut content = headers.0;
        if task.attachments.is_empty() {
            write_body_part(&mut content, body_type, &task.body);
        } else {
            let boundary = format!("=_relay_{unique}");
            let _ = write!(
                content,
                "Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n"
            );
            content.push_str("This is a multi-part message in MIME format.\r\n");

            let _ = write!(content, "\r\n--{boundary}\r\n");
            write_body_part(&mut content, body_type, &task.body);

            for attachment in &task.attachments {
                let _ = write!(content, "\r\n--{boundary}\r\n");
                write_attachment(&mut content, attachment);
            }
            let _ = write!(content, "\r\n--{boundary}--\r\n");
        }

        Ok(Self {
            envelope: MailEnvelope {
                sender: task.from.addr.clone(),
                recipients,
            },
            content: content.into_bytes(),
            skipped,
        })
    }
}

#[derive(Default)]
struct Headers(String);

impl Headers {
    fn push(&mut self, name: &str, value: &str) {
        let _ = write!(self.0, "{name}: {value}\r\n");
    }
}

fn priority_headers(headers: &mut Headers, priority: Priority) {
    let (importance, priority_value, x_priority) = match priority {
        Priority::Normal => return,
        Priority::Low => ("low", "0", "5"),
        Priority::NonUrgent => ("non-urgent", "0", "5"),
        Priority::High => ("high", "1", "1"),
        Priority::Urgent => ("urgent", "1", "1"),
    };

    headers.push("Importance", importance);
    headers.push("Priority", priority_value);
    headers.push("X-Priority", x_priority);
    headers.push("X-MSMail-Priority", priority_value);
}

fn write_body_part(out: &mut String, body_type: BodyType, body: &str) {
    let _ = write!(
        out,
        "Content-Type: {}; charset=utf-8\r\nContent-Transfer-Encoding: quoted-printable\r\n\r\n",
        body_type.mime()
    );
    out.push_str(&quoted_printable(body.as_bytes()));
    out.push_str("\r\n");
}

fn write_attachment(out: &mut String, attachment: &Attachment) {
    let name = encode_header_text(&attachment.name);
    let content_type = if attachment.content_type.trim().is_empty() {
        "application/octet-stream"
    } else {
        attachment.content_type.trim()
    };

    let _ = write!(
        out,
        "Content-Type: {content_type}; name=\"{name}\"\r\n\
         Content-Disposition: attachment; filename=\"{name}\"\r\n\
         Content-Transfer-Encoding: {}\r\n\r\n",
        attachment.encoding.as_str()
    );

    match attachment.encoding {
        TransferEncoding::Base64 => {
            let encoded = STANDARD.encode(&attachment.content);
            // Base64 output is ASCII, so every split lands on a char boundary.
            let mut rest = encoded.as_str();
            while !rest.is_empty() {
                let (line, tail) = rest.split_at(rest.len().min(LINE_LIMIT));
                out.push_str(line);
                out.push_str("\r\n");
                rest = tail;
            }
        }
        TransferEncoding::QuotedPrintable => {
            out.push_str(&quoted_printable(&attachment.content));
            out.push_str("\r\n");
        }
    }
}

/// Quoted-printable (RFC 2045 section 6.7) with CRLF line breaks and soft
/// breaks keeping every line within 76 characters.
pub fn quoted_printable(input: &[u8]) -> String {
    let mut out = String::with_capacity(input.len() * 3 / 2);
    let mut line_len = 0;
    let mut i = 0;

    while i < input.len() {
        let byte = input[i];

        if byte == b'\r' && input.get(i + 1) == Some(&b'\n') {
            i += 1;
            continue;
        }
        if byte == b'\n' {
            out.push_str("\r\n");
            line_len = 0;
            i += 1;
            continue;
        }

        let next_is_break = matches!(input.get(i + 1), None | Some(b'\r' | b'\n'));
        let literal = match byte {
            b'\t' | b' ' => !next_is_break,
            b'=' => false,
            33..=126 => true,
            _ => false,
        };

        let width = if literal { 1 } else { 3 };
        // Leave room for the trailing `=` of a soft break.
        let limit = if next_is_break { LINE_LIMIT } else { LINE_LIMIT - 1 };
        if line_len + width > limit {
            out.push_str("=\r\n");
            line_len = 0;
        }

        if literal {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "={byte:02X}");
        }
        line_len += width;
        i += 1;
    }

    out
}

/// RFC 2047 `B` encoding for header text that is not plain ASCII.
fn encode_header_text(text: &str) -> String {
    if text.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return text.to_string();
    }

    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (index, c) in text.char_indices() {
        let next = index + c.len_utf8();
        if next - start > ENCODED_WORD_BYTES && end > start {
            words.push(&text[start..end]);
            start = end;
        }
        end = next;
    }
    if end > start {
        words.push(&text[start..end]);
    }

    words
        .iter()
        .map(|word| format!("=?utf-8?B?{}?=", STANDARD.encode(word)))
        .collect::<Vec<_>>()
        .join("\r\n ")
}

fn display_mailbox(address: &EmailAddress) -> String {
    if address.name.is_ascii() {
        address.mailbox()
    } else {
        format!("{} <{}>", encode_header_text(&address.name), address.addr)
    }
}

fn address_list(addresses: &[EmailAddress]) -> String {
    addresses
        .iter()
        .map(display_mailbox)
        .collect::<Vec<_>>()
        .join(",\r\n ")
}

fn sender_domain(from: &EmailAddress) -> &str {
    from.addr
        .rsplit_once('@')
        .map_or("localhost", |(_, domain)| domain)
}
