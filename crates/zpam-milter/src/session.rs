//! Per-connection milter session state (C8). One `Session` lives for
//! the lifetime of one MTA connection and is driven through
//! `Negotiate → Connect → Helo → Mail → Rcpt* → Headers* → Eoh → Body*
//! → Eom → {NextMessage | QuitSession}` by indymilter's callbacks
//! (spec §4.8).

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use mail_parser::{MessageParser, MimeHeaders};
use tokio::sync::OwnedSemaphorePermit;
use zpam_types::message::{Attachment, Message, SessionInfo};
use zpam_utils::BoundedBuffer;

/// Live-session accounting shared by every connection. `active`
/// backs the graceful-shutdown wait; the semaphore backs
/// `MaxConcurrent` admission control.
pub struct SessionRegistry {
    pub concurrency: Arc<tokio::sync::Semaphore>,
    pub active: Arc<AtomicUsize>,
    pub accepting: Arc<std::sync::atomic::AtomicBool>,
}

impl SessionRegistry {
    pub fn new(max_concurrent: usize) -> Self {
        SessionRegistry {
            concurrency: Arc::new(tokio::sync::Semaphore::new(max_concurrent)),
            active: Arc::new(AtomicUsize::new(0)),
            accepting: Arc::new(std::sync::atomic::AtomicBool::new(true)),
        }
    }
}

/// Marks one live session. Decrements the shared counter on drop, so a
/// session is "done" the instant indymilter drops its context data
/// (normal completion, abort, or connection loss all go through this).
pub struct SessionGuard {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
}

impl SessionGuard {
    pub fn new(permit: OwnedSemaphorePermit, active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        SessionGuard {
            _permit: permit,
            active,
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Header-prefix-qualified session buffer assembled across `Headers*`
/// and `Body*` events, handed to the engine at `Eom` (spec §4.8
/// "message assembly").
pub struct MilterSession {
    pub guard: Option<SessionGuard>,
    pub client_ip: Option<IpAddr>,
    pub helo_name: String,
    pub tls_cipher: String,
    pub envelope_from: String,
    pub envelope_to: Vec<String>,
    pub headers: Vec<(String, String)>,
    pub body: BoundedBuffer,
    pub attachments: Vec<Attachment>,
    pub connect_time: Instant,
}

impl MilterSession {
    pub fn new(guard: SessionGuard, body_cap_bytes: usize) -> Self {
        MilterSession {
            guard: Some(guard),
            client_ip: None,
            helo_name: String::new(),
            tls_cipher: String::new(),
            envelope_from: String::new(),
            envelope_to: Vec::new(),
            headers: Vec::new(),
            body: BoundedBuffer::new(body_cap_bytes),
            attachments: Vec::new(),
            connect_time: Instant::now(),
        }
    }

    /// Builds the C1 `Message` the engine scores at end-of-message.
    /// Headers arrived pre-split from indymilter; the body is still raw
    /// MIME bytes, so the two are stitched back into one buffer and run
    /// through `mail-parser` to recover `body_text`/`body_html` and
    /// attachment metadata (spec §4.1: "decoded plain-text body (lossy
    /// decode allowed)"; attachment bytes themselves are never kept).
    pub fn build_message(&self, receive_timestamp: i64) -> Result<Message, zpam_types::message::MalformedMessage> {
        let (body_text, body_html, attachments) = decode_mime(&self.headers, self.body.as_slice());
        let mut attachments = attachments;
        attachments.extend(self.attachments.iter().cloned());

        Message::new(
            self.envelope_from.clone(),
            self.envelope_to.clone(),
            self.headers.clone(),
            body_text,
            body_html,
            attachments,
            SessionInfo {
                client_ip: self.client_ip.unwrap_or(IpAddr::from([0, 0, 0, 0])),
                helo_name: self.helo_name.clone(),
                tls_cipher: self.tls_cipher.clone(),
                receive_timestamp,
            },
        )
    }

    pub fn reset_for_next_message(&mut self) {
        self.envelope_from.clear();
        self.envelope_to.clear();
        self.headers.clear();
        self.body.clear();
        self.attachments.clear();
    }
}

/// Reassembles the header block indymilter already split out with the
/// raw body bytes into one RFC 5322 buffer, then hands it to
/// `mail-parser` so multipart structure (text/HTML alternatives,
/// attachment parts) is recovered. A body that fails to parse as a
/// valid message (malformed MIME, binary garbage) falls back to a
/// lossy whole-body decode as plain text rather than erroring — C1
/// construction only fails on missing envelope data.
fn decode_mime(headers: &[(String, String)], raw_body: &[u8]) -> (String, String, Vec<Attachment>) {
    let mut raw = Vec::with_capacity(raw_body.len() + 256);
    for (name, value) in headers {
        raw.extend_from_slice(name.as_bytes());
        raw.extend_from_slice(b": ");
        raw.extend_from_slice(value.as_bytes());
        raw.extend_from_slice(b"\r\n");
    }
    raw.extend_from_slice(b"\r\n");
    raw.extend_from_slice(raw_body);

    match MessageParser::default().parse(&raw) {
        Some(parsed) => {
            let body_text = parsed.body_text(0).map(|c| c.into_owned()).unwrap_or_default();
            let body_html = parsed.body_html(0).map(|c| c.into_owned()).unwrap_or_default();
            let attachments = parsed
                .attachments
                .iter()
                .filter_map(|&idx| parsed.parts.get(idx as usize))
                .map(|part| {
                    let content_type = part
                        .content_type()
                        .map(|ct| match ct.subtype() {
                            Some(sub) => format!("{}/{sub}", ct.ctype()),
                            None => ct.ctype().to_string(),
                        })
                        .unwrap_or_default();
                    Attachment {
                        filename: part.attachment_name().unwrap_or("").to_string(),
                        content_type,
                        declared_size: part.offset_end.saturating_sub(part.offset_body) as u64,
                    }
                })
                .collect();
            (body_text, body_html, attachments)
        }
        None => (String::from_utf8_lossy(raw_body).into_owned(), String::new(), Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permit() -> SessionGuard {
        let sem = Arc::new(tokio::sync::Semaphore::new(1));
        let permit = sem.try_acquire_owned().unwrap();
        SessionGuard::new(permit, Arc::new(AtomicUsize::new(0)))
    }

    #[test]
    fn build_message_decodes_plain_text_body() {
        let mut session = MilterSession::new(permit(), 1024);
        session.envelope_from = "alice@example.com".to_string();
        session.envelope_to.push("bob@example.com".to_string());
        session
            .headers
            .push(("Subject".to_string(), "hello".to_string()));
        session.body.push(b"hi there").unwrap();

        let message = session.build_message(0).unwrap();
        assert_eq!(message.body_text, "hi there");
        assert!(message.body_html.is_empty());
    }

    #[test]
    fn build_message_splits_multipart_alternative() {
        let mut session = MilterSession::new(permit(), 4096);
        session.envelope_from = "alice@example.com".to_string();
        session.envelope_to.push("bob@example.com".to_string());
        session
            .headers
            .push(("Subject".to_string(), "hi".to_string()));
        session.headers.push((
            "Content-Type".to_string(),
            "multipart/alternative; boundary=\"b1\"".to_string(),
        ));
        let body = b"--b1\r\nContent-Type: text/plain\r\n\r\nplain body\r\n--b1\r\nContent-Type: text/html\r\n\r\n<p>html body</p>\r\n--b1--\r\n";
        session.body.push(body).unwrap();

        let message = session.build_message(0).unwrap();
        assert_eq!(message.body_text, "plain body");
        assert!(message.body_html.contains("html body"));
    }

    #[test]
    fn reset_for_next_message_preserves_buffer_capacity() {
        let mut session = MilterSession::new(permit(), 16);
        session.body.push(b"0123456789").unwrap();
        session.reset_for_next_message();
        assert_eq!(session.body.len(), 0);
        session.body.push(b"0123456789012345").unwrap();
        assert_eq!(session.body.len(), 16);
    }
}
