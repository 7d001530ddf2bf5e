use crate::settings::SmtpSettings;
use crate::{AppError, Result};
use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};

fn build_message(smtp: &SmtpSettings, subject: &str, body: &str) -> Result<Message> {
    let from = smtp
        .from
        .parse::<Mailbox>()
        .map_err(|e| AppError::BadRequest(format!("Invalid smtp_from '{}': {}", smtp.from, e)))?;
    let to = smtp
        .to
        .parse::<Mailbox>()
        .map_err(|e| AppError::BadRequest(format!("Invalid notify_email '{}': {}", smtp.to, e)))?;

    Message::builder()
        .from(from)
        .to(to)
        .subject(subject)
        .body(body.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to build e-mail: {}", e)))
}

/// Send one plain-text e-mail through the configured relay (STARTTLS).
pub async fn send(smtp: &SmtpSettings, subject: &str, body: &str) -> Result<()> {
    let message = build_message(smtp, subject, body)?;

    let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
        .map_err(|e| AppError::Upstream(format!("SMTP setup failed: {}", e)))?
        .port(smtp.port)
        .credentials(Credentials::new(smtp.user.clone(), smtp.pass.clone()))
        .build();

    transport
        .send(message)
        .await
        .map_err(|e| AppError::Upstream(format!("SMTP send failed: {}", e)))?;

    tracing::info!(to = %smtp.to, subject = %subject, "E-mail sent");
    Ok(())
}
