//! Outbound message composition
//!
//! Produces RFC 5322 bytes with an HTML body via `mail-builder`. The caller hands them to
//! [`MailboxClient::send_message`](super::MailboxClient::send_message),
//! which takes care of the base64url transfer encoding.

use mail_builder::MessageBuilder;
use mail_builder::headers::address::Address;

use crate::models::EmailAddress;

/// A message to send
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingMessage {
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub subject: String,
    /// HTML body
    pub body: String,
    /// `Message-ID` header of the message being answered
    pub in_reply_to: Option<String>,
}

impl OutgoingMessage {
    pub fn new(to: Vec<EmailAddress>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to,
            subject: subject.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn cc(mut self, cc: Vec<EmailAddress>) -> Self {
        self.cc = cc;
        self
    }

    pub fn in_reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.in_reply_to = Some(message_id.into());
        self
    }

    /// Render the message with encoded headers and an HTML body
    pub fn to_mime(&self) -> std::io::Result<Vec<u8>> {
        let subject = header_value(&self.subject);
        let reply_id = self.in_reply_to.as_deref().map(message_id);
        let mut builder = MessageBuilder::new()
            .to(address_list(&self.to))
            .subject(subject.as_str())
            .html_body(self.body.as_str());
        if !self.cc.is_empty() {
            builder = builder.cc(address_list(&self.cc));
        }
        if let Some(id) = &reply_id {
            builder = builder.in_reply_to(id.as_str()).references(id.as_str());
        }
        builder.write_to_vec()
    }
}

fn address_list(addresses: &[EmailAddress]) -> Address<'_> {
    Address::new_list(
        addresses
            .iter()
            .map(|a| {
                let name = a.name.as_deref().map(header_value);
                Address::new_address(name, a.email.as_str())
            })
            .collect(),
    )
}

/// Header values never carry line breaks
fn header_value(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// Bare id; the builder adds the angle brackets
fn message_id(value: &str) -> String {
    header_value(value)
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(msg: &OutgoingMessage) -> (String, String) {
        let mime = String::from_utf8(msg.to_mime().unwrap()).unwrap();
        let (headers, body) = mime.split_once("\r\n\r\n").unwrap();
        (headers.to_string(), body.to_string())
    }

    #[test]
    fn test_mime_headers() {
        let msg = OutgoingMessage::new(
            vec![EmailAddress::new("a@x.com"), EmailAddress::with_name("Doe, Jane", "jane@x.com")],
            "Lunch?",
            "<p>Noon works</p>",
        )
        .cc(vec![EmailAddress::new("c@x.com")])
        .in_reply_to("<abc@mail.gmail.com>");

        let (headers, body) = render(&msg);
        assert!(headers.contains("Subject: Lunch?\r\n"));
        assert!(headers.contains("a@x.com"));
        assert!(headers.contains("Doe, Jane"));
        assert!(headers.contains("<jane@x.com>"));
        assert!(headers.contains("Cc: "));
        assert!(headers.contains("c@x.com"));
        assert!(headers.contains("In-Reply-To: <abc@mail.gmail.com>"));
        assert!(headers.contains("References: <abc@mail.gmail.com>"));
        assert!(headers.to_ascii_lowercase().contains("content-type: text/html"));
        assert!(body.contains("<p>Noon works</p>"));
    }

    #[test]
    fn test_non_ascii_headers_are_encoded() {
        let msg = OutgoingMessage::new(
            vec![EmailAddress::with_name("José Müller", "j@x.com")],
            "Café ☕ plans",
            "<p>À bientôt</p>",
        );

        let (headers, body) = render(&msg);
        assert!(headers.is_ascii());
        assert!(headers.to_ascii_lowercase().contains("=?utf-8?"));
        assert!(headers.to_ascii_lowercase().contains("content-transfer-encoding"));
        assert!(body.is_ascii());
    }

    #[test]
    fn test_header_injection_is_neutralized() {
        let msg = OutgoingMessage::new(
            vec![EmailAddress::with_name("Eve\r\nBcc: evil@x.com", "a@x.com")],
            "Hi\r\nBcc: evil@x.com",
            "body",
        );
        let (headers, _) = render(&msg);
        assert!(!headers.contains("\r\nBcc:"));
    }

    #[test]
    fn test_optional_headers_are_omitted() {
        let msg = OutgoingMessage::new(vec![EmailAddress::new("a@x.com")], "s", "b");
        let (headers, _) = render(&msg);
        assert!(!headers.contains("Cc:"));
        assert!(!headers.contains("In-Reply-To:"));
    }
}
