use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::EmailConfig;
use crate::models::org::OrgUnitNode;

fn build_smtp_transport(cfg: &EmailConfig) -> Option<AsyncSmtpTransport<Tokio1Executor>> {
    let host = cfg.smtp_host.as_deref()?;
    let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host).ok()?;
    builder = builder.port(cfg.smtp_port);
    if let (Some(user), Some(pass)) = (&cfg.smtp_user, &cfg.smtp_pass) {
        builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
    }
    Some(builder.build())
}

pub fn build_email_body(
    new_subtrees_with_engagements: &[OrgUnitNode],
    units_with_engagements: &[OrgUnitNode],
) -> String {
    let mut body = String::from(
        "The following organisation changes touched units with active engagements\n\
         and may need manual follow-up:\n\n",
    );
    if !new_subtrees_with_engagements.is_empty() {
        body.push_str("New subtrees containing engagements:\n");
        for unit in new_subtrees_with_engagements {
            body.push_str(&format!("  {} ({})\n", unit.name, unit.uuid));
        }
        body.push('\n');
    }
    if !units_with_engagements.is_empty() {
        body.push_str("Moved or changed units with engagements:\n");
        for unit in units_with_engagements {
            body.push_str(&format!("  {} ({})\n", unit.name, unit.uuid));
        }
    }
    body
}

/// Sends a plain-text run summary when email notification is enabled and
/// SMTP is configured. Sending problems are logged, never fatal.
pub struct EmailNotifier {
    config: EmailConfig,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig) -> Self {
        let transport = if config.enabled {
            let transport = build_smtp_transport(&config);
            if transport.is_some() {
                tracing::info!("email notification: SMTP configured");
            } else {
                tracing::warn!("email notification enabled but SMTP is not configured");
            }
            transport
        } else {
            None
        };
        Self { config, transport }
    }

    pub async fn send_run_summary(
        &self,
        new_subtrees_with_engagements: &[OrgUnitNode],
        units_with_engagements: &[OrgUnitNode],
    ) {
        let Some(transport) = &self.transport else {
            return;
        };
        if new_subtrees_with_engagements.is_empty() && units_with_engagements.is_empty() {
            return;
        }

        let body = build_email_body(new_subtrees_with_engagements, units_with_engagements);
        for recipient in &self.config.recipients {
            let Ok(to) = recipient.parse() else {
                tracing::warn!("invalid notification recipient {recipient}");
                continue;
            };
            let Ok(from) = self.config.smtp_from.parse() else {
                tracing::warn!(from = %self.config.smtp_from, "invalid sender address");
                return;
            };
            let message = Message::builder()
                .from(from)
                .to(to)
                .subject("Organisation sync: units with engagements changed")
                .header(ContentType::TEXT_PLAIN)
                .body(body.clone());
            match message {
                Ok(email) => {
                    if let Err(e) = transport.send(email).await {
                        tracing::warn!("notification email to {recipient} failed: {e}");
                    }
                }
                Err(e) => tracing::warn!("failed to build notification email: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::org::Validity;
    use crate::models::timeline::{NEG_INF, POS_INF};
    use uuid::Uuid;

    fn unit(name: &str) -> OrgUnitNode {
        OrgUnitNode {
            uuid: Uuid::new_v4(),
            parent_uuid: None,
            user_key: name.to_lowercase(),
            name: name.to_string(),
            level: None,
            hierarchy_class: None,
            validity: Validity { from: NEG_INF, to: POS_INF },
            addresses: vec![],
        }
    }

    #[test]
    fn body_lists_both_sections() {
        let subtree = unit("New department");
        let moved = unit("Moved department");
        let body = build_email_body(&[subtree.clone()], &[moved.clone()]);

        assert!(body.contains("New subtrees containing engagements:"));
        assert!(body.contains(&subtree.uuid.to_string()));
        assert!(body.contains("Moved or changed units with engagements:"));
        assert!(body.contains("Moved department"));
    }

    #[test]
    fn disabled_notifier_has_no_transport() {
        let notifier = EmailNotifier::new(EmailConfig::default());
        assert!(notifier.transport.is_none());
    }
}
