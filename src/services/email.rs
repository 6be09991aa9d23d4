//! Outgoing email
//!
//! Messages go out over SMTP when email is enabled in configuration.
//! Otherwise they are logged and dropped.

use crate::config::EmailConfig;
use crate::models::{Program, Registration, RegistrationStatus, User, Waiver};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;
use std::time::Duration;

/// A rendered message ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Delivery backend
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<()>;

    /// Whether a successful `deliver` means the message actually left
    fn is_live(&self) -> bool {
        true
    }
}

/// SMTP delivery through lettre
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        if config.smtp_host.trim().is_empty() {
            return Err(anyhow!("SMTP host not configured"));
        }
        let from: Mailbox = format!("{} <{}>", config.from_name, config.from_address)
            .parse()
            .map_err(|e| anyhow!("Invalid from address: {}", e))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| anyhow!("Failed to create SMTP transport: {}", e))?
            .port(config.smtp_port)
            .timeout(Some(Duration::from_secs(15)));
        if !config.smtp_username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(email
                .to
                .parse()
                .map_err(|e| anyhow!("Invalid to address: {}", e))?)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())
            .map_err(|e| anyhow!("Failed to build email: {}", e))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| anyhow!("Failed to send email: {}", e))?;
        Ok(())
    }
}

/// Logs messages instead of sending them
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<()> {
        tracing::info!(
            "Email delivery disabled; dropping \"{}\" to {}",
            email.subject,
            email.to
        );
        Ok(())
    }

    fn is_live(&self) -> bool {
        false
    }
}

/// Email service
pub struct EmailService {
    mailer: Arc<dyn Mailer>,
    site_name: String,
}

impl EmailService {
    pub fn new(mailer: Arc<dyn Mailer>, site_name: impl Into<String>) -> Self {
        Self {
            mailer,
            site_name: site_name.into(),
        }
    }

    /// SMTP when enabled, log-only otherwise
    pub fn from_config(config: &EmailConfig) -> Result<Self> {
        let mailer: Arc<dyn Mailer> = if config.enabled {
            Arc::new(SmtpMailer::new(config)?)
        } else {
            Arc::new(LogMailer)
        };
        Ok(Self::new(mailer, config.from_name.clone()))
    }

    /// False when messages are only logged
    pub fn delivers(&self) -> bool {
        self.mailer.is_live()
    }

    pub async fn send(&self, email: OutgoingEmail) -> Result<()> {
        self.mailer.deliver(&email).await?;
        tracing::debug!("Sent \"{}\" to {}", email.subject, email.to);
        Ok(())
    }

    pub async fn send_registration_confirmation(
        &self,
        guardian: &User,
        program: &Program,
        enrolled: &[(String, Registration)],
    ) -> Result<()> {
        self.send(registration_confirmation(&self.site_name, guardian, program, enrolled))
            .await
    }

    pub async fn send_waiver_reminder(
        &self,
        guardian: &User,
        student_name: &str,
        waiver: &Waiver,
    ) -> Result<()> {
        self.send(waiver_reminder(&self.site_name, guardian, student_name, waiver))
            .await
    }
}

/// Confirmation listing each student and their registration status
pub fn registration_confirmation(
    site_name: &str,
    guardian: &User,
    program: &Program,
    enrolled: &[(String, Registration)],
) -> OutgoingEmail {
    let mut lines = String::new();
    for (student_name, registration) in enrolled {
        let status = match registration.status {
            RegistrationStatus::Waitlisted => "waitlisted",
            RegistrationStatus::Confirmed => "confirmed",
            _ => "received, pending review",
        };
        lines.push_str(&format!("  - {}: {}\n", student_name, status));
    }

    let mut body = format!(
        "Hello {},\n\nThank you for registering with {}. We have your registration for {}:\n\n{}",
        guardian.first_name, site_name, program.name, lines
    );
    if let Some(start) = program.start_date {
        body.push_str(&format!("\nThe program starts on {}.", start.format("%B %-d, %Y")));
    }
    if let Some(schedule) = &program.schedule {
        body.push_str(&format!("\nSchedule: {}", schedule));
    }
    if enrolled
        .iter()
        .any(|(_, r)| r.status == RegistrationStatus::Waitlisted)
    {
        body.push_str("\n\nWe will contact you if a waitlisted spot opens up.");
    }
    body.push_str(&format!("\n\n{}\n", site_name));

    OutgoingEmail {
        to: guardian.email.clone(),
        subject: format!("[{}] Registration received: {}", site_name, program.name),
        body,
    }
}

/// Reminder to sign an outstanding or lapsed waiver
pub fn waiver_reminder(
    site_name: &str,
    guardian: &User,
    student_name: &str,
    waiver: &Waiver,
) -> OutgoingEmail {
    OutgoingEmail {
        to: guardian.email.clone(),
        subject: format!("[{}] Waiver needed for {}", site_name, student_name),
        body: format!(
            "Hello {},\n\nThe \"{}\" waiver for {} still needs your signature. \
             Please sign in to the portal and sign it before the next session.\n\n{}\n",
            guardian.first_name, waiver.title, student_name, site_name
        ),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingMailer;
    use super::*;
    use crate::models::{ProgramInput, UserRole};
    use chrono::NaiveDate;

    fn guardian() -> User {
        User::new(
            "pat@example.com".to_string(),
            "hash".to_string(),
            "Pat".to_string(),
            "Lee".to_string(),
            UserRole::Guardian,
        )
    }

    #[test]
    fn test_confirmation_lists_each_student() {
        let program = Program::from_input(ProgramInput {
            name: "Robotics".to_string(),
            start_date: NaiveDate::from_ymd_opt(2024, 7, 1),
            ..Default::default()
        });
        let enrolled = vec![
            (
                "Ada Lee".to_string(),
                Registration::new(1, 1, RegistrationStatus::Pending),
            ),
            (
                "Bo Lee".to_string(),
                Registration::new(2, 1, RegistrationStatus::Waitlisted),
            ),
        ];

        let email = registration_confirmation("Homer Hub", &guardian(), &program, &enrolled);
        assert_eq!(email.to, "pat@example.com");
        assert!(email.subject.contains("Robotics"));
        assert!(email.body.contains("Ada Lee: received, pending review"));
        assert!(email.body.contains("Bo Lee: waitlisted"));
        assert!(email.body.contains("July 1, 2024"));
        assert!(email.body.contains("waitlisted spot"));
    }

    #[tokio::test]
    async fn test_waiver_reminder_is_delivered() {
        let mailer = Arc::new(RecordingMailer::default());
        let service = EmailService::new(mailer.clone(), "Homer Hub");
        let waiver = Waiver::new(1, "Field trip release".to_string());

        service
            .send_waiver_reminder(&guardian(), "Ada Lee", &waiver)
            .await
            .unwrap();

        let sent = mailer.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.contains("Ada Lee"));
        assert!(sent[0].body.contains("Field trip release"));
    }

    #[tokio::test]
    async fn test_disabled_config_logs_only() {
        let service = EmailService::from_config(&EmailConfig::default()).unwrap();
        assert!(!service.delivers());
        let result = service
            .send(OutgoingEmail {
                to: "pat@example.com".to_string(),
                subject: "hi".to_string(),
                body: "hello".to_string(),
            })
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_enabled_without_host_is_an_error() {
        let config = EmailConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(EmailService::from_config(&config).is_err());
    }
}
