//! JobAlertRule entity: per-job expected-output alert policy

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "job_alert_rules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub job_id: Uuid,

    /// day, week or month
    #[sea_orm(column_type = "Text")]
    pub period: String,

    pub period_count: i32,

    pub expected_document_count: i32,

    pub enabled: bool,

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

impl Model {
    /// Length of the evaluation window in days. Months are counted as 30
    /// days; the rule is a coarse expected-volume check, not a calendar.
    pub fn window_days(&self) -> i64 {
        let unit = match self.period.as_str() {
            "day" => 1,
            "month" => 30,
            _ => 7,
        };
        unit * i64::from(self.period_count.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rule(period: &str, period_count: i32) -> Model {
        Model {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            period: period.to_string(),
            period_count,
            expected_document_count: 10,
            enabled: true,
            created_at: Utc::now().into(),
        }
    }

    #[test]
    fn test_window_days_by_period() {
        assert_eq!(rule("day", 3).window_days(), 3);
        assert_eq!(rule("week", 2).window_days(), 14);
        assert_eq!(rule("month", 1).window_days(), 30);
    }

    #[test]
    fn test_window_never_collapses_to_zero() {
        assert_eq!(rule("week", 0).window_days(), 7);
    }
}
