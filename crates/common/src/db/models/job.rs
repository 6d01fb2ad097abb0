//! Job entity: one account's configured use of a connector

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Job disabled because stored credentials were rejected by the portal.
/// Cleared automatically when credentials are updated.
pub const DISABLED_REASON_INCORRECT_CREDENTIALS: &str = "INCORRECT_CREDENTIALS";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning account (opaque external tenant id)
    #[sea_orm(column_type = "Text")]
    pub account_id: String,

    pub connector_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub name: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub username: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub password: Option<String>,

    /// Handle into the FTP credential store
    #[sea_orm(column_type = "Text", nullable)]
    pub ftp_credential_handle: Option<String>,

    pub location_id: Option<i64>,

    pub location_group_id: Option<i64>,

    /// Company ids for accounting-side operations
    pub companies: Json,

    #[sea_orm(column_type = "Text", nullable)]
    pub login_url: Option<String>,

    /// EDI parser code carried into payment EDI payloads
    #[sea_orm(column_type = "Text", nullable)]
    pub edi_type: Option<String>,

    pub create_missing_vendors: bool,

    /// Initial backfill job; discovered invoices are not forwarded downstream
    pub suppress_invoices: bool,

    /// Job-level override for the connector's future-invoice window
    pub download_future_invoices: Option<bool>,

    pub enabled: bool,

    #[sea_orm(column_type = "Text", nullable)]
    pub disabled_reason: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,

    pub deleted_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn has_credential_failure(&self) -> bool {
        self.disabled_reason.as_deref() == Some(DISABLED_REASON_INCORRECT_CREDENTIALS)
    }

    pub fn company_ids(&self) -> Vec<i64> {
        self.companies
            .as_array()
            .map(|ids| ids.iter().filter_map(|v| v.as_i64()).collect())
            .unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::connector::Entity",
        from = "Column::ConnectorId",
        to = "super::connector::Column::Id"
    )]
    Connector,

    #[sea_orm(has_many = "super::run::Entity")]
    Run,

    #[sea_orm(has_many = "super::job_schedule::Entity")]
    JobSchedule,
}

impl Related<super::connector::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Connector.def()
    }
}

impl Related<super::run::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Run.def()
    }
}

impl Related<super::job_schedule::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::JobSchedule.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
