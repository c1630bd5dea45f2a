//! Email notification over SMTP.

use super::{NotificationContext, Notifier, NotifyError};
use crate::fault::FaultDetail;
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

/// SMTP connection and addressing
#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub smtp_host: String,
    pub smtp_port: u16,
    /// STARTTLS when true, plain connection otherwise
    pub starttls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub sender: String,
    pub recipients: Vec<String>,
}

pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    recipients: Vec<Mailbox>,
}

impl EmailNotifier {
    pub fn new(settings: EmailSettings) -> Result<Self, NotifyError> {
        if settings.recipients.is_empty() {
            return Err(NotifyError::NotConfigured(
                "no notification recipients configured".to_string(),
            ));
        }

        let sender: Mailbox = settings.sender.parse()?;
        let recipients = settings
            .recipients
            .iter()
            .map(|r| r.parse::<Mailbox>())
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder = if settings.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.smtp_host)
        };
        builder = builder.port(settings.smtp_port);
        if let (Some(username), Some(password)) = (settings.username, settings.password) {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: builder.build(),
            sender,
            recipients,
        })
    }

    pub fn build_message(
        &self,
        detail: &FaultDetail,
        context: &NotificationContext,
    ) -> Result<Message, NotifyError> {
        let mut builder = Message::builder()
            .from(self.sender.clone())
            .subject(build_subject(&context.process_name));
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }

        Ok(builder.multipart(MultiPart::alternative_plain_html(
            build_body_text(detail, context),
            build_body_html(detail, context),
        ))?)
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(
        &self,
        detail: &FaultDetail,
        context: &NotificationContext,
    ) -> Result<(), NotifyError> {
        let message = self.build_message(detail, context)?;
        self.transport.send(message).await?;

        info!(
            recipients = self.recipients.len(),
            fault_type = %detail.kind,
            "Fault notification email sent"
        );
        Ok(())
    }
}

pub fn build_subject(process_name: &str) -> String {
    format!("Error screenshot: {process_name}")
}

pub fn build_body_text(detail: &FaultDetail, context: &NotificationContext) -> String {
    let mut body = format!(
        "Process: {}\nType: {}\nMessage: {}\nTime: {}",
        context.process_name,
        detail.kind,
        detail.message,
        detail.occurred_at.to_rfc3339()
    );
    if let Some(reference) = &context.item_reference {
        body.push_str(&format!("\nReference: {reference}"));
    }
    if !detail.traceback.is_empty() {
        body.push_str(&format!("\n\nTrace:\n{}", detail.trace_text()));
    }
    body
}

pub fn build_body_html(detail: &FaultDetail, context: &NotificationContext) -> String {
    let reference = context
        .item_reference
        .as_deref()
        .map(|r| format!("<p><b>Reference:</b> {}</p>", escape_html(r)))
        .unwrap_or_default();
    let trace = if detail.traceback.is_empty() {
        String::new()
    } else {
        format!("<pre>{}</pre>", escape_html(&detail.trace_text()))
    };
    let screenshot = match &context.screenshot_png_base64 {
        Some(png) => {
            debug!(bytes = png.len(), "Embedding screenshot in notification");
            format!(r#"<img src="data:image/png;base64,{png}" alt="Screenshot">"#)
        }
        None => String::new(),
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<body>
    <p>Error type: {}</p>
    <p>Error message: {}</p>
    {}
    {}
    <p>Time: {}</p>
    {}
</body>
</html>"#,
        detail.kind,
        escape_html(&detail.message),
        reference,
        trace,
        detail.occurred_at.to_rfc3339(),
        screenshot
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
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
