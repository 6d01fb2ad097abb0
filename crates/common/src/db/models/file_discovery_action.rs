//! FileDiscoveryAction entity: per-job routing of artifacts to handlers

use crate::errors::AppError;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Post-processing handler kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    None,
    PiqStandardUpload,
    PiqEdiUpload,
    PaymentsEdiUpload,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::None => "none",
            ActionType::PiqStandardUpload => "piq_standard_upload",
            ActionType::PiqEdiUpload => "piq_edi_upload",
            ActionType::PaymentsEdiUpload => "payments_edi_upload",
        }
    }
}

impl From<String> for ActionType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "piq_standard_upload" => ActionType::PiqStandardUpload,
            "piq_edi_upload" => ActionType::PiqEdiUpload,
            "payments_edi_upload" => ActionType::PaymentsEdiUpload,
            _ => ActionType::None,
        }
    }
}

impl From<ActionType> for String {
    fn from(a: ActionType) -> Self {
        a.as_str().to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "file_discovery_actions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Exactly one of job_id / connector_id is set
    pub job_id: Option<Uuid>,

    pub connector_id: Option<Uuid>,

    #[sea_orm(column_type = "Text")]
    pub document_type: String,

    #[sea_orm(column_type = "Text")]
    pub action_type: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub edi_parser_code: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn action_type(&self) -> ActionType {
        ActionType::from(self.action_type.clone())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        match (self.job_id, self.connector_id) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(AppError::Validation {
                message: "Exactly one of job or connector must be set".to_string(),
                field: None,
            }),
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_exactly_one_owner() {
        let mut action = Model {
            id: Uuid::new_v4(),
            job_id: Some(Uuid::new_v4()),
            connector_id: None,
            document_type: "invoice".to_string(),
            action_type: "piq_standard_upload".to_string(),
            edi_parser_code: None,
            created_at: Utc::now().into(),
        };
        assert!(action.validate().is_ok());

        action.connector_id = Some(Uuid::new_v4());
        assert!(action.validate().is_err());

        action.job_id = None;
        assert!(action.validate().is_ok());

        action.connector_id = None;
        assert!(action.validate().is_err());
    }

    #[test]
    fn test_unknown_action_type_is_noop() {
        assert_eq!(ActionType::from("bogus".to_string()), ActionType::None);
    }
}
