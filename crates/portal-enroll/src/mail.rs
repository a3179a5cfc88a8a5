//! Outgoing verification email.
//!
//! The [`Notifier`] is the transport seam: production wires an SMTP relay
//! or the [`LogNotifier`]; tests use an [`Outbox`]. The plaintext token
//! only ever leaves the process inside the link composed here.

use std::sync::{Arc, Mutex};

use portal_crypto::blake3::{self, contexts};
use portal_types::token::TokenPurpose;
use rand::RngCore;
use tracing::info;

/// A rendered message ready for delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

/// Receipt from the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: String,
}

/// Notifier error types.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("relay rejected message: {0}")]
    Rejected(String),

    #[error("relay unreachable: {0}")]
    Unreachable(String),
}

pub trait Notifier: Send + Sync {
    fn send(&self, email: &OutgoingEmail) -> Result<Delivery, NotifyError>;
}

fn new_message_id(email: &OutgoingEmail) -> String {
    let mut nonce = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    let mut material = Vec::with_capacity(email.to.len() + email.subject.len() + nonce.len());
    material.extend_from_slice(email.to.as_bytes());
    material.extend_from_slice(email.subject.as_bytes());
    material.extend_from_slice(&nonce);
    hex::encode(&blake3::derive_key(contexts::MESSAGE_ID, &material)[..12])
}

/// Logs the envelope instead of delivering. Bodies are not logged since
/// they contain the token.
#[derive(Clone, Debug)]
pub struct LogNotifier {
    sender: String,
}

impl LogNotifier {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
        }
    }
}

impl Notifier for LogNotifier {
    fn send(&self, email: &OutgoingEmail) -> Result<Delivery, NotifyError> {
        let message_id = new_message_id(email);
        info!(
            from = %self.sender,
            to = %email.to,
            subject = %email.subject,
            message_id = %message_id,
            "Verification email queued"
        );
        Ok(Delivery { message_id })
    }
}

/// Keeps every message in memory. Can be switched to fail.
#[derive(Debug, Default)]
pub struct Outbox {
    sent: Mutex<Vec<OutgoingEmail>>,
    failing: Mutex<Option<String>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent send fail with `reason`, or succeed again with `None`.
    pub fn fail_with(&self, reason: Option<&str>) {
        if let Ok(mut failing) = self.failing.lock() {
            *failing = reason.map(str::to_string);
        }
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<OutgoingEmail> {
        self.sent().pop()
    }

    /// Extract the token from the most recent message's confirm link.
    pub fn last_token(&self) -> Option<String> {
        let email = self.last()?;
        let start = email.text_body.find("token=")? + "token=".len();
        let token: String = email.text_body[start..]
            .chars()
            .take_while(|c| c.is_ascii_hexdigit())
            .collect();
        Some(token)
    }
}

impl Notifier for Outbox {
    fn send(&self, email: &OutgoingEmail) -> Result<Delivery, NotifyError> {
        let failing = self
            .failing
            .lock()
            .map_err(|_| NotifyError::Unreachable("outbox lock poisoned".into()))?
            .clone();
        if let Some(reason) = failing {
            return Err(NotifyError::Unreachable(reason));
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| NotifyError::Unreachable("outbox lock poisoned".into()))?;
        sent.push(email.clone());
        Ok(Delivery {
            message_id: format!("outbox-{}", sent.len()),
        })
    }
}

/// Builds the links embedded in emails and handed to the waiting page.
#[derive(Clone, Debug)]
pub struct LinkBuilder {
    base_url: String,
    confirm_path: String,
    poll_path: String,
}

impl LinkBuilder {
    pub fn new(base_url: &str, confirm_path: &str, poll_path: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            confirm_path: confirm_path.to_string(),
            poll_path: poll_path.to_string(),
        }
    }

    pub fn confirm_link(&self, token: &str) -> String {
        format!("{}{}?token={}", self.base_url, self.confirm_path, token)
    }

    pub fn poll_link(&self, token: &str) -> String {
        format!("{}{}?token={}", self.base_url, self.poll_path, token)
    }
}

/// What goes into a verification email.
#[derive(Clone, Copy, Debug)]
pub struct VerificationEmail<'a> {
    pub to: &'a str,
    pub purpose: TokenPurpose,
    pub token: &'a str,
    /// Only for enrollment tokens.
    pub training_name: Option<&'a str>,
    pub ttl_minutes: u32,
}

/// Renders verification emails and hands them to the notifier.
#[derive(Clone)]
pub struct Mailer {
    notifier: Arc<dyn Notifier>,
    links: LinkBuilder,
    organisation: String,
}

impl Mailer {
    pub fn new(notifier: Arc<dyn Notifier>, links: LinkBuilder, organisation: impl Into<String>) -> Self {
        Self {
            notifier,
            links,
            organisation: organisation.into(),
        }
    }

    pub fn links(&self) -> &LinkBuilder {
        &self.links
    }

    pub fn send_verification(&self, email: &VerificationEmail<'_>) -> Result<Delivery, NotifyError> {
        let message = self.render(email);
        self.notifier.send(&message)
    }

    pub fn render(&self, email: &VerificationEmail<'_>) -> OutgoingEmail {
        let link = self.links.confirm_link(email.token);
        let (subject, action) = match email.purpose {
            TokenPurpose::Enrollment => {
                let training = email.training_name.unwrap_or("your training");
                (
                    format!("Confirm your enrollment in {training}"),
                    format!("confirm your email address and complete your enrollment in {training}"),
                )
            }
            TokenPurpose::EmailChange => (
                "Confirm your new email address".to_string(),
                "confirm this address as your new contact email".to_string(),
            ),
            TokenPurpose::Recovery => (
                format!("Recover access to your {} account", self.organisation),
                "recover access to your account".to_string(),
            ),
        };
        let text_body = format!(
            "Hello,\n\nFollow this link to {action}:\n\n{link}\n\n\
             The link expires in {} minutes and can be used once.\n\
             If you did not request this, ignore this email.\n\n{}\n",
            email.ttl_minutes, self.organisation
        );
        let html_body = format!(
            "<p>Hello,</p><p>Follow this link to {}:</p>\
             <p><a href=\"{link}\">{link}</a></p>\
             <p>The link expires in {} minutes and can be used once. \
             If you did not request this, ignore this email.</p><p>{}</p>",
            escape_html(&action),
            email.ttl_minutes,
            escape_html(&self.organisation)
        );
        OutgoingEmail {
            to: email.to.to_string(),
            subject,
            text_body,
            html_body,
        }
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mailer(outbox: Arc<Outbox>) -> Mailer {
        Mailer::new(
            outbox,
            LinkBuilder::new("https://portal.example.org/", "/enroll/verify", "/enroll/waiting"),
            "Example Institute",
        )
    }

    #[test]
    fn test_links_strip_trailing_slash() {
        let links = LinkBuilder::new("https://portal.example.org/", "/enroll/verify", "/enroll/waiting");
        assert_eq!(
            links.confirm_link("ab12"),
            "https://portal.example.org/enroll/verify?token=ab12"
        );
        assert_eq!(
            links.poll_link("ab12"),
            "https://portal.example.org/enroll/waiting?token=ab12"
        );
    }

    #[test]
    fn test_enrollment_email_names_training_and_link() {
        let outbox = Arc::new(Outbox::new());
        let token = "0f".repeat(32);
        mailer(outbox.clone())
            .send_verification(&VerificationEmail {
                to: "ana@example.org",
                purpose: TokenPurpose::Enrollment,
                token: &token,
                training_name: Some("First Aid"),
                ttl_minutes: 15,
            })
            .expect("send");

        let email = outbox.last().expect("sent");
        assert_eq!(email.to, "ana@example.org");
        assert!(email.subject.contains("First Aid"));
        assert!(email.text_body.contains("15 minutes"));
        assert_eq!(outbox.last_token(), Some(token));
    }

    #[test]
    fn test_html_body_is_escaped() {
        let outbox = Arc::new(Outbox::new());
        let email = mailer(outbox).render(&VerificationEmail {
            to: "ana@example.org",
            purpose: TokenPurpose::Enrollment,
            token: "aa",
            training_name: Some("<b>Welding</b>"),
            ttl_minutes: 15,
        });
        assert!(email.html_body.contains("&lt;b&gt;Welding"));
        assert!(!email.html_body.contains("<b>Welding"));
    }

    #[test]
    fn test_outbox_can_fail() {
        let outbox = Arc::new(Outbox::new());
        outbox.fail_with(Some("connection refused"));
        let result = mailer(outbox.clone()).send_verification(&VerificationEmail {
            to: "ana@example.org",
            purpose: TokenPurpose::Recovery,
            token: "aa",
            training_name: None,
            ttl_minutes: 15,
        });
        assert!(matches!(result, Err(NotifyError::Unreachable(_))));
        assert!(outbox.sent().is_empty());
    }

    #[test]
    fn test_log_notifier_issues_message_ids() {
        let notifier = LogNotifier::new("portal@example.org");
        let email = OutgoingEmail {
            to: "ana@example.org".into(),
            subject: "s".into(),
            text_body: String::new(),
            html_body: String::new(),
        };
        let a = notifier.send(&email).expect("send");
        let b = notifier.send(&email).expect("send");
        assert_eq!(a.message_id.len(), 24);
        assert_ne!(a.message_id, b.message_id);
    }
}
