//! Connector entity: a named third-party integration definition

use super::operation::Operation;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Connector type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectorType {
    Vendor,
    Accounting,
}

impl From<String> for ConnectorType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "ACCOUNTING" => ConnectorType::Accounting,
            _ => ConnectorType::Vendor,
        }
    }
}

impl From<ConnectorType> for String {
    fn from(t: ConnectorType) -> Self {
        match t {
            ConnectorType::Vendor => "VENDOR".to_string(),
            ConnectorType::Accounting => "ACCOUNTING".to_string(),
        }
    }
}

/// Access channel used by the adapter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Web,
    Ftp,
}

impl From<String> for Channel {
    fn from(s: String) -> Self {
        match s.as_str() {
            "FTP" => Channel::Ftp,
            _ => Channel::Web,
        }
    }
}

impl From<Channel> for String {
    fn from(c: Channel) -> Self {
        match c {
            Channel::Web => "WEB".to_string(),
            Channel::Ftp => "FTP".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "connectors")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub name: String,

    /// Stable key into the adapter registry
    #[sea_orm(column_type = "Text")]
    pub adapter_code: String,

    #[sea_orm(column_type = "Text")]
    pub connector_type: String,

    #[sea_orm(column_type = "Text")]
    pub channel: String,

    pub enabled: bool,

    /// Operation tags this connector supports
    pub capabilities: Json,

    #[sea_orm(column_type = "Text", nullable)]
    pub login_url: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub icon_url: Option<String>,

    /// Skip re-download when a prior file matches by reference or URL
    pub df_download_url_skip_duplicates: bool,

    /// Whether the default document window extends into the future
    pub download_future_invoices: bool,

    pub custom_properties: Json,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn connector_type(&self) -> ConnectorType {
        ConnectorType::from(self.connector_type.clone())
    }

    pub fn channel(&self) -> Channel {
        Channel::from(self.channel.clone())
    }

    /// Declared capabilities, dropping tags that no longer parse
    pub fn capabilities(&self) -> Vec<Operation> {
        self.capabilities
            .as_array()
            .map(|tags| {
                tags.iter()
                    .filter_map(|tag| tag.as_str())
                    .filter_map(|tag| Operation::parse(tag).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Capability check with multi-entity expansion
    pub fn has_capability(&self, operation: Operation) -> bool {
        self.capabilities()
            .iter()
            .any(|cap| cap.implied().contains(&operation))
    }

    /// The operation scheduled and manual runs perform when none is named
    pub fn default_operation(&self) -> Operation {
        match self.connector_type() {
            ConnectorType::Vendor => Operation::InvoiceDownload,
            ConnectorType::Accounting => Operation::AccountingImportMultipleEntities,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::job::Entity")]
    Job,
}

impl Related<super::job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Job.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn connector(capabilities: serde_json::Value) -> Model {
        Model {
            id: Uuid::new_v4(),
            name: "Acme Foods".to_string(),
            adapter_code: "acme".to_string(),
            connector_type: "VENDOR".to_string(),
            channel: "WEB".to_string(),
            enabled: true,
            capabilities,
            login_url: None,
            icon_url: None,
            df_download_url_skip_duplicates: false,
            download_future_invoices: true,
            custom_properties: serde_json::json!({}),
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    #[test]
    fn test_has_capability() {
        let c = connector(serde_json::json!(["invoice.download", "statement.download"]));
        assert!(c.has_capability(Operation::InvoiceDownload));
        assert!(!c.has_capability(Operation::PaymentPay));
    }

    #[test]
    fn test_multi_entity_capability_expands() {
        let c = connector(serde_json::json!(["accounting.import_multiple_entities"]));
        assert!(c.has_capability(Operation::VendorImportList));
        assert!(c.has_capability(Operation::GlImportList));
        assert!(!c.has_capability(Operation::InvoiceDownload));
    }

    #[test]
    fn test_unknown_tags_ignored() {
        let c = connector(serde_json::json!(["invoice.download", "telepathy.read"]));
        assert_eq!(c.capabilities().len(), 1);
    }
}
