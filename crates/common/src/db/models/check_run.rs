//! CheckRun entity: one payment-export attempt keyed by an external chequerun

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "check_runs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub run_id: Uuid,

    /// External payment-export identity
    pub chequerun_id: i64,

    pub is_patch_success: bool,

    pub is_checkrun_success: bool,

    /// Administratively disabled; create_unique rejects further attempts
    pub is_disabled: bool,

    /// Payment date carried from the export request
    pub payment_date: Option<Date>,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    /// Fully successful export: the export itself and the post-export patch
    pub fn is_success(&self) -> bool {
        self.is_checkrun_success && self.is_patch_success
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::run::Entity",
        from = "Column::RunId",
        to = "super::run::Column::Id"
    )]
    Run,
}

impl Related<super::run::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Run.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
