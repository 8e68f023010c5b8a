//! The immutable parsed-message record (spec C1).

use std::fmt;

/// A single SMTP session's fixed facts, captured once at connect time.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub client_ip: std::net::IpAddr,
    pub helo_name: String,
    pub tls_cipher: String,
    pub receive_timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub declared_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedMessage {
    #[error("envelope_to is empty")]
    EmptyEnvelopeTo,
    #[error("envelope_from is empty")]
    EmptyEnvelopeFrom,
}

/// A fully assembled message, handed to the scoring orchestrator (C7) at
/// end-of-message. Once constructed it is never mutated; every field is
/// a plain owned value so it can be moved into the scoring task without
/// further synchronization (spec §9: "message-local builders passed by
/// value").
#[derive(Debug, Clone)]
pub struct Message {
    pub envelope_from: String,
    pub envelope_to: Vec<String>,
    headers: Vec<(String, String)>,
    pub body_text: String,
    pub body_html: String,
    pub attachments: Vec<Attachment>,
    pub session: SessionInfo,
}

impl Message {
    /// Builds a `Message`, enforcing the only two invariants the model
    /// requires at construction: a non-empty envelope sender and at
    /// least one recipient. Everything else (missing headers, empty
    /// body) is valid and yields empty strings rather than an error.
    pub fn new(
        envelope_from: String,
        envelope_to: Vec<String>,
        headers: Vec<(String, String)>,
        body_text: String,
        body_html: String,
        attachments: Vec<Attachment>,
        session: SessionInfo,
    ) -> Result<Self, MalformedMessage> {
        if envelope_from.is_empty() {
            return Err(MalformedMessage::EmptyEnvelopeFrom);
        }
        if envelope_to.is_empty() {
            return Err(MalformedMessage::EmptyEnvelopeTo);
        }
        Ok(Message {
            envelope_from,
            envelope_to,
            headers,
            body_text,
            body_html,
            attachments,
            session,
        })
    }

    /// Case-insensitive lookup of the first header with this name.
    /// Returns an empty string when absent — callers must not treat a
    /// missing header as an error condition.
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    /// All values for a (possibly repeated) header name, in arrival
    /// order. Required for headers such as `Received` where duplicates
    /// are expected and meaningful.
    pub fn headers_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn subject(&self) -> &str {
        self.header("Subject")
    }

    /// Domain portion of an address (after the last `@`), or the whole
    /// string if no `@` is present. Used across C3/C5 for domain
    /// comparisons.
    pub fn domain_of(address: &str) -> &str {
        address.rsplit('@').next().unwrap_or(address)
    }

    pub fn envelope_from_domain(&self) -> &str {
        Self::domain_of(&self.envelope_from)
    }
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.client_ip, self.helo_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionInfo {
        SessionInfo {
            client_ip: "127.0.0.1".parse().unwrap(),
            helo_name: "mail.example.com".into(),
            tls_cipher: String::new(),
            receive_timestamp: 0,
        }
    }

    #[test]
    fn rejects_empty_envelope_to() {
        let err = Message::new(
            "a@example.com".into(),
            vec![],
            vec![],
            String::new(),
            String::new(),
            vec![],
            session(),
        )
        .unwrap_err();
        assert_eq!(err, MalformedMessage::EmptyEnvelopeTo);
    }

    #[test]
    fn missing_header_is_empty_not_error() {
        let msg = Message::new(
            "a@example.com".into(),
            vec!["b@example.com".into()],
            vec![],
            String::new(),
            String::new(),
            vec![],
            session(),
        )
        .unwrap();
        assert_eq!(msg.header("Subject"), "");
    }

    #[test]
    fn header_lookup_is_case_insensitive_and_preserves_duplicates() {
        let msg = Message::new(
            "a@example.com".into(),
            vec!["b@example.com".into()],
            vec![
                ("received".into(), "hop1".into()),
                ("Received".into(), "hop2".into()),
            ],
            String::new(),
            String::new(),
            vec![],
            session(),
        )
        .unwrap();
        assert_eq!(msg.header("RECEIVED"), "hop1");
        assert_eq!(msg.headers_all("Received").count(), 2);
    }

    #[test]
    fn domain_of_handles_bare_domain() {
        assert_eq!(Message::domain_of("alice@example.com"), "example.com");
        assert_eq!(Message::domain_of("example.com"), "example.com");
    }
}
