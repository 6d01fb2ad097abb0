//! PIQMapping entity: per-job translation of vendor-side identifiers
//!
//! `mapping_data` is normalized to lowercase on save and lookups are
//! case-insensitive.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "piq_mappings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub job_id: Uuid,

    /// Vendor-side identifier, stored lowercase
    #[sea_orm(column_type = "Text")]
    pub mapping_data: String,

    /// Canonical internal entity id
    #[sea_orm(column_type = "Text")]
    pub piq_data: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::job::Entity",
        from = "Column::JobId",
        to = "super::job::Column::Id"
    )]
    Job,
}

impl Related<super::job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Job.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
