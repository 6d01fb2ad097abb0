//! Notification email templates
//!
//! Subject and body are rendered here and carried on the short-tasks lane;
//! actual delivery belongs to the mail relay.

use harvester_common::db::models::{Connector, Job};

/// A frequency-keyed template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailTemplate {
    MissingIn24h,
    MissingIn48h,
    IclWeekly,
    IclFortnightly,
    IclMonthly,
}

impl EmailTemplate {
    pub fn key(&self) -> &'static str {
        match self {
            EmailTemplate::MissingIn24h => "missing-in-24h",
            EmailTemplate::MissingIn48h => "missing-in-48h",
            EmailTemplate::IclWeekly => "icl-weekly",
            EmailTemplate::IclFortnightly => "icl-fortnightly",
            EmailTemplate::IclMonthly => "icl-monthly",
        }
    }

    fn subject_template(&self) -> &'static str {
        match self {
            EmailTemplate::MissingIn24h => {
                "Action Required: No invoices found in 24 hours for {connector_name}."
            }
            EmailTemplate::MissingIn48h => {
                "Action Required: No invoices found in 48 hours for {connector_name}."
            }
            EmailTemplate::IclWeekly => {
                "Weekly - Downloaded Invoice count is lower than expected"
            }
            EmailTemplate::IclFortnightly => {
                "Fortnightly - Downloaded Invoice count is lower than expected"
            }
            EmailTemplate::IclMonthly => {
                "Monthly - Downloaded Invoice count is lower than expected"
            }
        }
    }

    fn body_template(&self) -> &'static str {
        match self {
            EmailTemplate::MissingIn24h => {
                "Hi,\n\nThe connection with {connector_name} for the username: {username}. \
                 Invoices not found in the vendor portal in last 24 hours.\n"
            }
            EmailTemplate::MissingIn48h => {
                "Hi,\n\nThe connection with {connector_name} for the username: {username}. \
                 Invoices not found in the vendor portal in last 48 hours.\n"
            }
            EmailTemplate::IclWeekly
            | EmailTemplate::IclFortnightly
            | EmailTemplate::IclMonthly => {
                "Hi,\n\nThe connection with {connector_name} for the username: {username}. \
                 No of invoices downloaded are less than the expected.\n"
            }
        }
    }

    /// Render (subject, body) for a job
    pub fn render(&self, job: &Job, connector: &Connector) -> (String, String) {
        let username = job.username.as_deref().unwrap_or("-");
        let subject = fill(self.subject_template(), &connector.name, username);
        let body = fill(self.body_template(), &connector.name, username);
        (subject, body)
    }
}

fn fill(template: &str, connector_name: &str, username: &str) -> String {
    template
        .replace("{connector_name}", connector_name)
        .replace("{username}", username)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn fixtures() -> (Job, Connector) {
        let now = Utc::now();
        let connector = Connector {
            id: Uuid::new_v4(),
            name: "Acme Foods".to_string(),
            adapter_code: "acme".to_string(),
            connector_type: "VENDOR".to_string(),
            channel: "WEB".to_string(),
            enabled: true,
            capabilities: serde_json::json!(["invoice.download"]),
            login_url: None,
            icon_url: None,
            df_download_url_skip_duplicates: false,
            download_future_invoices: true,
            custom_properties: serde_json::json!({}),
            created_at: now.into(),
            updated_at: now.into(),
        };
        let job = Job {
            id: Uuid::new_v4(),
            account_id: "acct-1".to_string(),
            connector_id: connector.id,
            name: "Acme for Cafe 9".to_string(),
            username: Some("billing@cafe9.example".to_string()),
            password: None,
            ftp_credential_handle: None,
            location_id: None,
            location_group_id: None,
            companies: serde_json::json!([]),
            login_url: None,
            edi_type: None,
            create_missing_vendors: false,
            suppress_invoices: false,
            download_future_invoices: None,
            enabled: true,
            disabled_reason: None,
            created_at: now.into(),
            updated_at: now.into(),
            deleted_at: None,
        };
        (job, connector)
    }

    #[test]
    fn test_weekly_template_rendering() {
        let (job, connector) = fixtures();
        let (subject, body) = EmailTemplate::IclWeekly.render(&job, &connector);
        assert_eq!(subject, "Weekly - Downloaded Invoice count is lower than expected");
        assert!(body.contains("Acme Foods"));
        assert!(body.contains("billing@cafe9.example"));
    }

    #[test]
    fn test_missing_in_24h_subject_carries_connector() {
        let (job, connector) = fixtures();
        let (subject, _) = EmailTemplate::MissingIn24h.render(&job, &connector);
        assert_eq!(
            subject,
            "Action Required: No invoices found in 24 hours for Acme Foods."
        );
    }
}
