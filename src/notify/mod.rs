//! Best-effort operator notifications
//!
//! Notifications are sent for the periodic status digest and for fatal
//! run failures. Delivery problems are logged and never interrupt a crawl.

use crate::config::NotifyConfig;
use std::io::Write;
use std::process::{Command, Stdio};
use thiserror::Error;

/// Errors raised while delivering a notification
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Failed to run mail command: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mail command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },
}

/// Destination for operator notifications
pub trait NotificationSink: Send {
    fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// Writes notifications to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        tracing::info!("Notification for {}: {}\n{}", recipient, subject, body);
        Ok(())
    }
}

/// Pipes an RFC 5322 message into a mail transfer command such as
/// `sendmail -t`
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    program: String,
    args: Vec<String>,
}

impl CommandNotifier {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl NotificationSink for CommandNotifier {
    fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(format_message(recipient, subject, body).as_bytes())?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(NotifyError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Formats a plain-text message with `To`, `Subject` and `Date` headers
pub fn format_message(recipient: &str, subject: &str, body: &str) -> String {
    let subject: String = subject.chars().filter(|c| *c != '\r' && *c != '\n').collect();
    format!(
        "To: {}\r\nSubject: {}\r\nDate: {}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}\r\n",
        recipient,
        subject,
        chrono::Utc::now().to_rfc2822(),
        body.replace('\n', "\r\n")
    )
}

/// Sink plus recipient, swallowing delivery errors
pub struct Notifier {
    sink: Box<dyn NotificationSink>,
    recipient: Option<String>,
}

impl Notifier {
    pub fn new(sink: Box<dyn NotificationSink>, recipient: Option<String>) -> Self {
        Self { sink, recipient }
    }

    /// Builds the notifier described by the `[notify]` section
    ///
    /// Without a command, notifications only reach the log.
    pub fn from_config(config: &NotifyConfig) -> Self {
        let sink: Box<dyn NotificationSink> = match config.command.as_deref() {
            Some([program, args @ ..]) => Box::new(CommandNotifier::new(program, args.to_vec())),
            _ => Box::new(LogNotifier),
        };
        Self::new(sink, config.recipient.clone())
    }

    /// A notifier that only logs
    pub fn log_only() -> Self {
        Self::new(Box::new(LogNotifier), None)
    }

    /// Sends a notification, logging instead of failing
    pub fn notify(&self, subject: &str, body: &str) {
        let recipient = self.recipient.as_deref().unwrap_or("operator");
        if let Err(e) = self.sink.send(recipient, subject, body) {
            tracing::warn!("Failed to send notification '{}': {}", subject, e);
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("recipient", &self.recipient)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recording(Arc<Mutex<Vec<(String, String)>>>);

    impl NotificationSink for Recording {
        fn send(&self, recipient: &str, subject: &str, _body: &str) -> Result<(), NotifyError> {
            self.0
                .lock()
                .unwrap()
                .push((recipient.to_string(), subject.to_string()));
            Ok(())
        }
    }

    struct Failing;

    impl NotificationSink for Failing {
        fn send(&self, _: &str, _: &str, _: &str) -> Result<(), NotifyError> {
            Err(NotifyError::CommandFailed {
                status: "exit status: 1".to_string(),
                stderr: "no route".to_string(),
            })
        }
    }

    #[test]
    fn test_format_message_headers() {
        let message = format_message("ops@example.com", "Status\nupdate", "line one\nline two");
        assert!(message.starts_with("To: ops@example.com\r\nSubject: Statusupdate\r\n"));
        assert!(message.contains("\r\n\r\nline one\r\nline two\r\n"));
    }

    #[test]
    fn test_notifier_uses_recipient() {
        let recording = Recording::default();
        let notifier = Notifier::new(
            Box::new(recording.clone()),
            Some("ops@example.com".to_string()),
        );
        notifier.notify("Crawl blocked", "body");

        let sent = recording.0.lock().unwrap();
        assert_eq!(
            sent.as_slice(),
            &[("ops@example.com".to_string(), "Crawl blocked".to_string())]
        );
    }

    #[test]
    fn test_failed_delivery_is_swallowed() {
        let notifier = Notifier::new(Box::new(Failing), None);
        notifier.notify("subject", "body");
    }

    #[test]
    fn test_from_config_without_command_logs() {
        let notifier = Notifier::from_config(&NotifyConfig::default());
        notifier.notify("subject", "body");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_notifier_reports_failure() {
        let notifier = CommandNotifier::new("false", Vec::new());
        let result = notifier.send("ops@example.com", "subject", "body");
        assert!(matches!(
            result,
            Err(NotifyError::CommandFailed { .. }) | Err(NotifyError::Io(_))
        ));
    }
}
