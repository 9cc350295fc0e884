//! Gmail message decoding
//!
//! Converts a raw Gmail message (headers plus a recursive MIME part tree)
//! into a [`MailMessage`] and the label information the thread needs.

use base64::prelude::*;
use chrono::{DateTime, TimeZone, Utc};

use super::api::{GmailMessage, Header, MessagePart};
use crate::error::SyncError;
use crate::models::{
    Attachment, EmailAddress, LabelFlags, MailMessage, MessageId, ThreadId, UserId,
};

/// Subject used when the header is missing or blank
pub const NO_SUBJECT: &str = "(no subject)";

/// A decoded message plus the per-message data used for thread aggregation
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub message: MailMessage,
    pub subject: String,
    /// Raw provider label ids
    pub labels: Vec<String>,
    pub flags: LabelFlags,
}

/// Decodes raw provider messages for one user
#[derive(Debug, Clone)]
pub struct MessageDecoder {
    user_id: UserId,
}

/// Bodies and attachments found while walking the part tree
#[derive(Default)]
struct PartContent {
    html: Option<String>,
    text: Option<String>,
    attachments: Vec<Attachment>,
}

impl MessageDecoder {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    pub fn decode(&self, raw: &GmailMessage) -> Result<DecodedMessage, SyncError> {
        let decode_error = |reason: String| SyncError::Decode {
            message_id: raw.id.clone(),
            reason,
        };

        let payload = raw
            .payload
            .as_ref()
            .ok_or_else(|| decode_error("message has no payload".to_string()))?;
        let headers = payload.headers.as_deref().unwrap_or_default();

        let from = header(headers, "From")
            .map(EmailAddress::parse)
            .unwrap_or_else(|| EmailAddress::new(""));
        let to = header(headers, "To")
            .map(EmailAddress::parse_list)
            .unwrap_or_default();
        let cc = header(headers, "Cc")
            .map(EmailAddress::parse_list)
            .unwrap_or_default();
        let subject = header(headers, "Subject")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(NO_SUBJECT)
            .to_string();

        let sent_at = header(headers, "Date")
            .and_then(parse_date_header)
            .or_else(|| internal_date(raw))
            .unwrap_or_default();

        let mut content = PartContent::default();
        if payload.parts.as_ref().is_none_or(Vec::is_empty) {
            collect_single_part(payload, &mut content).map_err(decode_error)?;
        } else {
            collect_parts(payload, &mut content).map_err(decode_error)?;
        }

        let snippet = raw
            .snippet
            .as_deref()
            .map(decode_html_entities)
            .filter(|s| !s.is_empty());

        let labels = raw.label_ids.clone().unwrap_or_default();
        let flags = LabelFlags::from_labels(&labels);

        let message = MailMessage::builder(
            self.user_id.clone(),
            MessageId::new(raw.id.as_str()),
            ThreadId::new(raw.thread_id.as_str()),
        )
        .from(from)
        .to(to)
        .cc(cc)
        .body_html(content.html)
        .body_text(content.text)
        .snippet(snippet)
        .sent_at(sent_at)
        .outbound(flags.is_outbound)
        .attachments(content.attachments)
        .build();

        Ok(DecodedMessage {
            message,
            subject,
            labels,
            flags,
        })
    }
}

/// Extract a header value by name (case-insensitive)
fn header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// `text/plain; charset=utf-8` -> `text/plain`
fn essence(mime_type: Option<&str>) -> String {
    mime_type
        .unwrap_or_default()
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// A payload without sub-parts: HTML if declared so, otherwise text
fn collect_single_part(part: &MessagePart, content: &mut PartContent) -> Result<(), String> {
    if as_attachment(part).is_some() {
        return collect_parts(part, content);
    }
    if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
        let decoded = decode_body(data)?;
        if essence(part.mime_type.as_deref()) == "text/html" {
            content.html = Some(decoded);
        } else {
            content.text = Some(decoded);
        }
    }
    Ok(())
}

/// Depth-first walk. Attachments are recorded, never inlined; the first
/// `text/html` and `text/plain` bodies win.
fn collect_parts(part: &MessagePart, content: &mut PartContent) -> Result<(), String> {
    if let Some(attachment) = as_attachment(part) {
        content.attachments.push(attachment);
        return Ok(());
    }

    if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
        match essence(part.mime_type.as_deref()).as_str() {
            "text/html" if content.html.is_none() => content.html = Some(decode_body(data)?),
            "text/plain" if content.text.is_none() => content.text = Some(decode_body(data)?),
            _ => {}
        }
    }

    for child in part.parts.iter().flatten() {
        collect_parts(child, content)?;
    }
    Ok(())
}

fn as_attachment(part: &MessagePart) -> Option<Attachment> {
    let body = part.body.as_ref()?;
    let attachment_id = body.attachment_id.as_deref()?;
    let filename = part.filename.as_deref().filter(|f| !f.is_empty())?;
    Some(Attachment {
        filename: filename.to_string(),
        mime_type: essence(part.mime_type.as_deref()),
        size_bytes: body.size.unwrap_or(0),
        attachment_id: attachment_id.to_string(),
    })
}

/// Decode base64url body data
///
/// Gmail uses URL-safe base64 but padding can vary; the standard alphabet is
/// accepted as a fallback. Invalid UTF-8 is replaced rather than rejected.
fn decode_body(data: &str) -> Result<String, String> {
    let cleaned: String = data
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let unpadded = cleaned.trim_end_matches('=');

    let bytes = BASE64_URL_SAFE_NO_PAD
        .decode(unpadded)
        .or_else(|_| BASE64_STANDARD_NO_PAD.decode(unpadded))
        .map_err(|e| format!("invalid base64 body: {}", e))?;

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// RFC 2822 date, tolerating a trailing `(UTC)`-style comment
fn parse_date_header(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let value = match value.rfind('(') {
        Some(idx) if value.ends_with(')') => value[..idx].trim_end(),
        _ => value,
    };
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Provider receipt time (`internalDate`, epoch millis)
fn internal_date(raw: &GmailMessage) -> Option<DateTime<Utc>> {
    let millis: i64 = raw.internal_date.as_deref()?.trim().parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

/// Decode HTML entities in snippet text
pub(crate) fn decode_html_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn b64(s: &str) -> String {
        BASE64_URL_SAFE_NO_PAD.encode(s)
    }

    fn decoder() -> MessageDecoder {
        MessageDecoder::new(UserId::new("user-1"))
    }

    fn message(value: serde_json::Value) -> GmailMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_decode_multipart_alternative_with_attachment() {
        let raw = message(json!({
            "id": "m1",
            "threadId": "t1",
            "labelIds": ["INBOX", "UNREAD"],
            "snippet": "Hi &amp; welcome",
            "internalDate": "1700000000000",
            "payload": {
                "mimeType": "multipart/mixed",
                "headers": [
                    { "name": "FROM", "value": "\"Doe, Jane\" <Jane@X.com>" },
                    { "name": "to", "value": "a@y.com, \"B, C\" <b@y.com>" },
                    { "name": "Subject", "value": "Quarterly plan" },
                    { "name": "Date", "value": "Tue, 14 Nov 2023 10:00:00 +0000 (UTC)" }
                ],
                "parts": [
                    {
                        "mimeType": "multipart/alternative",
                        "parts": [
                            { "mimeType": "text/plain; charset=UTF-8", "body": { "size": 5, "data": b64("hello") } },
                            { "mimeType": "text/html", "body": { "size": 12, "data": b64("<p>hello</p>") } }
                        ]
                    },
                    {
                        "mimeType": "application/pdf",
                        "filename": "plan.pdf",
                        "body": { "size": 2048, "attachmentId": "att-1" }
                    }
                ]
            }
        }));

        let decoded = decoder().decode(&raw).unwrap();
        let msg = &decoded.message;
        assert_eq!(msg.from, EmailAddress::with_name("Doe, Jane", "jane@x.com"));
        assert_eq!(msg.to.len(), 2);
        assert_eq!(msg.to[1].name.as_deref(), Some("B, C"));
        assert_eq!(msg.body_text.as_deref(), Some("hello"));
        assert_eq!(msg.body_html.as_deref(), Some("<p>hello</p>"));
        assert_eq!(msg.snippet.as_deref(), Some("Hi & welcome"));
        assert_eq!(msg.sent_at, Utc.with_ymd_and_hms(2023, 11, 14, 10, 0, 0).unwrap());
        assert_eq!(
            msg.attachments,
            vec![Attachment {
                filename: "plan.pdf".to_string(),
                mime_type: "application/pdf".to_string(),
                size_bytes: 2048,
                attachment_id: "att-1".to_string(),
            }]
        );
        assert_eq!(decoded.subject, "Quarterly plan");
        assert!(!decoded.flags.is_read);
        assert!(!msg.is_outbound);
    }

    #[test]
    fn test_first_body_of_each_type_wins() {
        let raw = message(json!({
            "id": "m1", "threadId": "t1",
            "payload": {
                "mimeType": "multipart/mixed",
                "parts": [
                    { "mimeType": "text/plain", "body": { "data": b64("first") } },
                    { "mimeType": "text/plain", "body": { "data": b64("second") } }
                ]
            }
        }));
        let decoded = decoder().decode(&raw).unwrap();
        assert_eq!(decoded.message.body_text.as_deref(), Some("first"));
        assert_eq!(decoded.message.body_html, None);
    }

    #[test]
    fn test_single_part_bodies() {
        let html = message(json!({
            "id": "m1", "threadId": "t1",
            "payload": { "mimeType": "text/html", "body": { "data": b64("<b>x</b>") } }
        }));
        assert_eq!(decoder().decode(&html).unwrap().message.body_html.as_deref(), Some("<b>x</b>"));

        let other = message(json!({
            "id": "m2", "threadId": "t1",
            "payload": { "mimeType": "text/calendar", "body": { "data": b64("BEGIN:VCALENDAR") } }
        }));
        assert_eq!(
            decoder().decode(&other).unwrap().message.body_text.as_deref(),
            Some("BEGIN:VCALENDAR")
        );
    }

    #[test]
    fn test_attachment_without_filename_is_not_recorded() {
        let raw = message(json!({
            "id": "m1", "threadId": "t1",
            "payload": {
                "mimeType": "multipart/mixed",
                "parts": [
                    { "mimeType": "image/png", "filename": "", "body": { "attachmentId": "inline-1", "size": 10 } }
                ]
            }
        }));
        assert!(decoder().decode(&raw).unwrap().message.attachments.is_empty());
    }

    #[test]
    fn test_missing_payload_is_decode_error() {
        let raw = message(json!({ "id": "m1", "threadId": "t1" }));
        assert!(matches!(
            decoder().decode(&raw),
            Err(SyncError::Decode { message_id, .. }) if message_id == "m1"
        ));
    }

    #[test]
    fn test_invalid_base64_is_decode_error() {
        let raw = message(json!({
            "id": "m1", "threadId": "t1",
            "payload": { "mimeType": "text/plain", "body": { "data": "***not base64***" } }
        }));
        assert!(matches!(decoder().decode(&raw), Err(SyncError::Decode { .. })));
    }

    #[test]
    fn test_date_falls_back_to_internal_date_then_epoch() {
        let raw = message(json!({
            "id": "m1", "threadId": "t1", "internalDate": "1700000000000",
            "payload": { "headers": [ { "name": "Date", "value": "sometime last week" } ] }
        }));
        assert_eq!(decoder().decode(&raw).unwrap().message.sent_at.timestamp(), 1_700_000_000);

        let raw = message(json!({ "id": "m2", "threadId": "t1", "payload": {} }));
        assert_eq!(decoder().decode(&raw).unwrap().message.sent_at.timestamp(), 0);
    }

    #[test]
    fn test_defaults_for_missing_headers() {
        let raw = message(json!({
            "id": "m1", "threadId": "t1", "labelIds": ["SENT", "STARRED"],
            "payload": { "headers": [ { "name": "Subject", "value": "   " } ] }
        }));
        let decoded = decoder().decode(&raw).unwrap();
        assert_eq!(decoded.subject, NO_SUBJECT);
        assert_eq!(decoded.message.from.email, "");
        assert!(decoded.message.is_outbound);
        assert!(decoded.flags.is_starred);
        assert!(decoded.flags.is_read);
    }

    #[test]
    fn test_decode_body_accepts_padding_and_standard_alphabet() {
        assert_eq!(decode_body("SGVsbG8sIFdvcmxkIQ").unwrap(), "Hello, World!");
        assert_eq!(decode_body("SGVsbG8sIFdvcmxkIQ==").unwrap(), "Hello, World!");
        // "??>" encodes to "Pz8+" in the standard alphabet
        assert_eq!(decode_body("Pz8+").unwrap(), "??>");
        assert_eq!(decode_body("Pz8-").unwrap(), "??>");
    }

    #[test]
    fn test_decode_body_is_lossy_for_invalid_utf8() {
        let data = BASE64_URL_SAFE_NO_PAD.encode([0x66, 0x6f, 0xff, 0x6f]);
        assert_eq!(decode_body(&data).unwrap(), "fo\u{fffd}o");
    }

    #[test]
    fn test_essence_strips_parameters() {
        assert_eq!(essence(Some("Text/HTML; charset=\"utf-8\"")), "text/html");
        assert_eq!(essence(None), "");
    }
}
