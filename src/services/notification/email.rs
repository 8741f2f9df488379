use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{Notification, NotificationChannel, SenderError};
use crate::config::ChannelConfig;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Delivers notifications by SMTP.
pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
    label: String,
}

impl EmailChannel {
    pub fn from_config(config: &ChannelConfig) -> Result<Self, SenderError> {
        let ChannelConfig::Email {
            smtp_host,
            smtp_port,
            username,
            password,
            from,
            to,
            use_tls,
        } = config
        else {
            return Err(SenderError::InvalidConfiguration(
                "Expected email config, but found a different type.".to_string(),
            ));
        };

        let mut builder = if *use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(smtp_host).map_err(|e| {
                SenderError::InvalidConfiguration(format!("Invalid SMTP relay {}: {}", smtp_host, e))
            })?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        };

        builder = builder.port(*smtp_port).timeout(Some(SMTP_TIMEOUT));
        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let from = parse_mailbox(from)?;
        let to = to
            .iter()
            .map(|addr| parse_mailbox(addr))
            .collect::<Result<Vec<_>, _>>()?;
        if to.is_empty() {
            return Err(SenderError::InvalidConfiguration(
                "Email channel needs at least one recipient".to_string(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
            label: format!("email:{}", smtp_host),
        })
    }

    fn build_message(&self, notification: &Notification) -> Result<Message, SenderError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(format!("[keyfleet] {}", notification.title))
            .header(ContentType::TEXT_PLAIN);
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }

        builder
            .body(notification.body.clone())
            .map_err(|e| SenderError::SendFailed(format!("Failed to build email: {}", e)))
    }
}

fn parse_mailbox(raw: &str) -> Result<Mailbox, SenderError> {
    raw.parse::<Mailbox>().map_err(|e| {
        SenderError::InvalidConfiguration(format!("Invalid email address {}: {}", raw, e))
    })
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> String {
        self.label.clone()
    }

    async fn send(&self, notification: &Notification) -> Result<(), SenderError> {
        let message = self.build_message(notification)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| SenderError::SendFailed(format!("SMTP delivery failed: {}", e)))?;
        Ok(())
    }
}
