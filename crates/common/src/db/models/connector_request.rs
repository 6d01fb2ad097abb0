//! ConnectorRequest entity: user-submitted requests for new integrations
//!
//! An operator (or maintenance, by matching login URL and name) links a
//! connector; conversion then creates a job carrying the submitted
//! credentials.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "connector_requests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub account_id: String,

    #[sea_orm(column_type = "Text")]
    pub name: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub login_url: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub username: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub password: Option<String>,

    /// Linked by an operator or by maintenance matching
    pub connector_id: Option<Uuid>,

    /// Job created from this request
    pub converted_job_id: Option<Uuid>,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn is_converted(&self) -> bool {
        self.converted_job_id.is_some()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
