//! Run entity: one attempted execution of an operation against a job

use super::operation::Operation;
use chrono::NaiveDate;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Run status state machine
///
/// CREATED -> SCHEDULED -> STARTED -> SUCCEEDED | PARTIALLY_SUCCEEDED | FAILED
/// CREATED/SCHEDULED -> CANCELED (maintenance only)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Created,
    Scheduled,
    Started,
    Succeeded,
    PartiallySucceeded,
    Failed,
    Canceled,
}

impl RunStatus {
    pub const TERMINAL: &'static [RunStatus] = &[
        RunStatus::Succeeded,
        RunStatus::PartiallySucceeded,
        RunStatus::Failed,
        RunStatus::Canceled,
    ];

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Created => "CREATED",
            RunStatus::Scheduled => "SCHEDULED",
            RunStatus::Started => "STARTED",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::PartiallySucceeded => "PARTIALLY_SUCCEEDED",
            RunStatus::Failed => "FAILED",
            RunStatus::Canceled => "CANCELED",
        }
    }
}

impl From<String> for RunStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "SCHEDULED" => RunStatus::Scheduled,
            "STARTED" => RunStatus::Started,
            "SUCCEEDED" => RunStatus::Succeeded,
            "PARTIALLY_SUCCEEDED" => RunStatus::PartiallySucceeded,
            "FAILED" => RunStatus::Failed,
            "CANCELED" => RunStatus::Canceled,
            _ => RunStatus::Created,
        }
    }
}

impl From<RunStatus> for String {
    fn from(status: RunStatus) -> Self {
        status.as_str().to_string()
    }
}

/// What caused a run to exist
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreatedVia {
    Scheduled,
    AdminRequest,
    ApiRequest,
    SlaBreach,
}

impl CreatedVia {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreatedVia::Scheduled => "scheduled",
            CreatedVia::AdminRequest => "admin_request",
            CreatedVia::ApiRequest => "api_request",
            CreatedVia::SlaBreach => "sla_breach",
        }
    }
}

impl From<String> for CreatedVia {
    fn from(s: String) -> Self {
        match s.as_str() {
            "admin_request" => CreatedVia::AdminRequest,
            "api_request" => CreatedVia::ApiRequest,
            "sla_breach" => CreatedVia::SlaBreach,
            _ => CreatedVia::Scheduled,
        }
    }
}

impl From<CreatedVia> for String {
    fn from(v: CreatedVia) -> Self {
        v.as_str().to_string()
    }
}

/// Typed request-parameter bag serialized to JSON at the persistence boundary
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestParameters {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,

    #[serde(default)]
    pub suppress_invoices: bool,

    /// Entity kinds for accounting sync runs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub import_entities: Vec<String>,

    /// Payment ids for export runs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payment_ids: Vec<i64>,
}

fn default_version() -> u32 {
    1
}

impl Default for RequestParameters {
    fn default() -> Self {
        Self {
            version: 1,
            start_date: None,
            end_date: None,
            suppress_invoices: false,
            import_entities: Vec::new(),
            payment_ids: Vec::new(),
        }
    }
}

impl RequestParameters {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({"version": 1}))
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "runs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub job_id: Uuid,

    /// The operation this run performs
    #[sea_orm(column_type = "Text")]
    pub action: String,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    pub dry_run: bool,

    pub is_manual: bool,

    #[sea_orm(column_type = "Text")]
    pub created_via: String,

    pub request_parameters: Json,

    pub execution_start_ts: Option<DateTimeWithTimeZone>,

    pub execution_end_ts: Option<DateTimeWithTimeZone>,

    #[sea_orm(nullable)]
    pub failure_issue: Option<Json>,

    /// External handle from the remote batch service
    #[sea_orm(column_type = "Text", nullable)]
    pub batch_job_id: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub cancel_reason: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,

    pub deleted_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    pub fn run_status(&self) -> RunStatus {
        RunStatus::from(self.status.clone())
    }

    pub fn is_terminal(&self) -> bool {
        self.run_status().is_terminal()
    }

    pub fn created_via(&self) -> CreatedVia {
        CreatedVia::from(self.created_via.clone())
    }

    pub fn operation(&self) -> Result<Operation, crate::errors::AppError> {
        Operation::parse(&self.action)
    }

    pub fn request_parameters(&self) -> RequestParameters {
        RequestParameters::from_json(&self.request_parameters)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::job::Entity",
        from = "Column::JobId",
        to = "super::job::Column::Id"
    )]
    Job,

    #[sea_orm(has_many = "super::discovered_file::Entity")]
    DiscoveredFile,

    #[sea_orm(has_many = "super::check_run::Entity")]
    CheckRun,
}

impl Related<super::job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Job.def()
    }
}

impl Related<super::discovered_file::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DiscoveredFile.def()
    }
}

impl Related<super::check_run::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CheckRun.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::PartiallySucceeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Canceled.is_terminal());
        assert!(!RunStatus::Created.is_terminal());
        assert!(!RunStatus::Scheduled.is_terminal());
        assert!(!RunStatus::Started.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            RunStatus::Created,
            RunStatus::Scheduled,
            RunStatus::Started,
            RunStatus::Succeeded,
            RunStatus::PartiallySucceeded,
            RunStatus::Failed,
            RunStatus::Canceled,
        ] {
            assert_eq!(RunStatus::from(String::from(status)), status);
        }
    }

    #[test]
    fn test_request_parameters_serde() {
        let params = RequestParameters {
            version: 1,
            start_date: NaiveDate::from_ymd_opt(2021, 5, 4),
            end_date: NaiveDate::from_ymd_opt(2021, 8, 2),
            suppress_invoices: true,
            import_entities: vec![],
            payment_ids: vec![],
        };
        let json = params.to_json();
        assert_eq!(RequestParameters::from_json(&json), params);
    }

    #[test]
    fn test_request_parameters_default_version() {
        let params = RequestParameters::from_json(&serde_json::json!({}));
        assert_eq!(params.version, 1);
        assert!(!params.suppress_invoices);
    }
}
