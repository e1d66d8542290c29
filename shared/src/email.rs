use async_trait::async_trait;
use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message};
use aws_sdk_sesv2::Client as SesClient;
use std::sync::Mutex;

/// Outbound notification email. Callers treat failures as non-fatal.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &[String], subject: &str, text: &str) -> Result<(), String>;
}

/// Send plain-text email via AWS SES.
pub struct SesMailer {
    client: SesClient,
    sender: String,
}

impl SesMailer {
    pub fn new(client: SesClient, sender: impl Into<String>) -> Self {
        Self {
            client,
            sender: sender.into(),
        }
    }
}

#[async_trait]
impl Mailer for SesMailer {
    async fn send(&self, to: &[String], subject: &str, text: &str) -> Result<(), String> {
        if to.is_empty() {
            return Ok(());
        }

        let destination = Destination::builder()
            .set_to_addresses(Some(to.to_vec()))
            .build();

        let subject = Content::builder()
            .data(subject)
            .charset("UTF-8")
            .build()
            .map_err(|e| format!("Failed to build subject: {:?}", e))?;

        let text_content = Content::builder()
            .data(text)
            .charset("UTF-8")
            .build()
            .map_err(|e| format!("Failed to build text content: {:?}", e))?;

        let message = Message::builder()
            .subject(subject)
            .body(Body::builder().text(text_content).build())
            .build();

        self.client
            .send_email()
            .from_email_address(&self.sender)
            .destination(destination)
            .content(EmailContent::builder().simple(message).build())
            .send()
            .await
            .map_err(|e| format!("Failed to send email: {:?}", e))?;

        Ok(())
    }
}

/// Used when `SES_SENDER` is not configured.
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, to: &[String], subject: &str, _text: &str) -> Result<(), String> {
        tracing::info!("SES_SENDER not set; skipping email {:?} to {:?}", subject, to);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
}

/// Captures outgoing mail for assertions.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentEmail>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &[String], subject: &str, text: &str) -> Result<(), String> {
        self.sent
            .lock()
            .map_err(|_| "mailer lock poisoned".to_string())?
            .push(SentEmail {
                to: to.to_vec(),
                subject: subject.to_string(),
                text: text.to_string(),
            });
        Ok(())
    }
}

/// Send and log; an email failure never fails the calling operation.
pub async fn notify(mailer: &dyn Mailer, to: &[String], subject: &str, text: &str) {
    if let Err(e) = mailer.send(to, subject, text).await {
        tracing::error!("Failed to send {:?} to {:?}: {}", subject, to, e);
    } else {
        tracing::info!("Email {:?} sent to {:?}", subject, to);
    }
}
