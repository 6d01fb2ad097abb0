//! JobSchedule entity and the schedule evaluator
//!
//! `matches` is the canonical "is this job due now" check. It is pure: the
//! trigger feeds it the current date, tests feed it fixed dates.

use crate::errors::AppError;
use chrono::{Datelike, NaiveDate};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Schedule frequency
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Fortnightly,
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Fortnightly => "fortnightly",
            Frequency::Monthly => "monthly",
        }
    }
}

impl From<String> for Frequency {
    fn from(s: String) -> Self {
        match s.as_str() {
            "weekly" => Frequency::Weekly,
            "fortnightly" => Frequency::Fortnightly,
            "monthly" => Frequency::Monthly,
            _ => Frequency::Daily,
        }
    }
}

impl From<Frequency> for String {
    fn from(f: Frequency) -> Self {
        match f {
            Frequency::Daily => "daily".to_string(),
            Frequency::Weekly => "weekly".to_string(),
            Frequency::Fortnightly => "fortnightly".to_string(),
            Frequency::Monthly => "monthly".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "job_schedules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub job_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub frequency: String,

    /// Weekdays, 0 = Monday .. 6 = Sunday
    pub day_of_week: Json,

    /// Ordinal weeks of the month, 1..5
    pub week_of_month: Json,

    /// Days of the month, 1..31
    pub date_of_month: Json,

    pub created_at: DateTimeWithTimeZone,
}

/// Ordinal week of the month for a date: days 1-7 are week 1, 8-14 week 2, ...
pub fn week_of_month(date: NaiveDate) -> u32 {
    (date.day() - 1) / 7 + 1
}

impl Model {
    pub fn frequency(&self) -> Frequency {
        Frequency::from(self.frequency.clone())
    }

    fn json_set(&self, value: &Json) -> Vec<u32> {
        value
            .as_array()
            .map(|xs| xs.iter().filter_map(|v| v.as_u64().map(|n| n as u32)).collect())
            .unwrap_or_default()
    }

    pub fn days_of_week(&self) -> Vec<u32> {
        self.json_set(&self.day_of_week)
    }

    pub fn weeks_of_month(&self) -> Vec<u32> {
        self.json_set(&self.week_of_month)
    }

    pub fn dates_of_month(&self) -> Vec<u32> {
        self.json_set(&self.date_of_month)
    }

    /// Validate field constraints per frequency
    pub fn validate(&self) -> Result<(), AppError> {
        match self.frequency() {
            Frequency::Weekly | Frequency::Fortnightly => {
                if self.days_of_week().is_empty() {
                    return Err(AppError::Validation {
                        message: "When the frequency is weekly, specifying day of week is mandatory"
                            .to_string(),
                        field: Some("day_of_week".to_string()),
                    });
                }
            }
            Frequency::Monthly => {
                let dates = self.dates_of_month();
                if dates.is_empty() && self.days_of_week().is_empty() {
                    return Err(AppError::Validation {
                        message:
                            "When the frequency is monthly, specifying date of month is mandatory"
                                .to_string(),
                        field: Some("date_of_month".to_string()),
                    });
                }
                if dates.iter().any(|d| *d < 1 || *d > 31) {
                    return Err(AppError::Validation {
                        message: "Date of a month must be between 1 and 31".to_string(),
                        field: Some("date_of_month".to_string()),
                    });
                }
            }
            Frequency::Daily => {}
        }

        Ok(())
    }

    /// Does this schedule fire on the given date?
    ///
    /// Fortnightly is weekly with a two-week cadence anchored to the ISO week
    /// of the schedule's creation date.
    pub fn matches(&self, date: NaiveDate) -> bool {
        match self.frequency() {
            Frequency::Daily => true,
            Frequency::Weekly => self.matches_weekly(date),
            Frequency::Fortnightly => {
                let anchor_week = self.created_at.date_naive().iso_week().week();
                let this_week = date.iso_week().week();
                anchor_week % 2 == this_week % 2 && self.matches_weekly(date)
            }
            Frequency::Monthly => {
                let by_date = self.dates_of_month().contains(&date.day());
                let dow = self.days_of_week();
                let by_weekday =
                    !dow.is_empty() && dow.contains(&date.weekday().num_days_from_monday());
                by_date || by_weekday
            }
        }
    }

    fn matches_weekly(&self, date: NaiveDate) -> bool {
        if !self
            .days_of_week()
            .contains(&date.weekday().num_days_from_monday())
        {
            return false;
        }
        let weeks = self.weeks_of_month();
        weeks.is_empty() || weeks.contains(&week_of_month(date))
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

    fn schedule(frequency: &str, dow: &[u32], wom: &[u32], dom: &[u32]) -> Model {
        Model {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            frequency: frequency.to_string(),
            day_of_week: serde_json::json!(dow),
            week_of_month: serde_json::json!(wom),
            date_of_month: serde_json::json!(dom),
            created_at: Utc::now().into(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_daily_always_matches() {
        let s = schedule("daily", &[], &[], &[]);
        assert!(s.matches(date(2021, 6, 3)));
        assert!(s.matches(date(2021, 6, 4)));
    }

    #[test]
    fn test_weekly_with_week_of_month() {
        // Mon, Tue, Fri in weeks 1 and 4
        let s = schedule("weekly", &[0, 1, 4], &[1, 4], &[]);
        // 2021-06-01 is a Tuesday in week 1
        assert!(s.matches(date(2021, 6, 1)));
        // 2021-06-11 is a Friday, but in week 2
        assert!(!s.matches(date(2021, 6, 11)));
        // 2021-06-25 is a Friday in week 4
        assert!(s.matches(date(2021, 6, 25)));
    }

    #[test]
    fn test_weekly_without_week_of_month() {
        let s = schedule("weekly", &[2], &[], &[]);
        // Every Wednesday
        assert!(s.matches(date(2021, 6, 2)));
        assert!(s.matches(date(2021, 6, 9)));
        assert!(!s.matches(date(2021, 6, 3)));
    }

    #[test]
    fn test_monthly_union_of_date_and_weekday() {
        // Mon, Thu or the 1st/4th of the month
        let s = schedule("monthly", &[0, 3], &[], &[1, 4]);
        // 2021-06-02 is a Wednesday and not a listed date
        assert!(!s.matches(date(2021, 6, 2)));
        // 2021-06-03 is a Thursday
        assert!(s.matches(date(2021, 6, 3)));
        // 2021-06-04 is a Friday but the date matches
        assert!(s.matches(date(2021, 6, 4)));
    }

    #[test]
    fn test_monthly_short_month_has_no_substitute() {
        let s = schedule("monthly", &[], &[], &[31]);
        // June has 30 days; the 30th does not stand in for the 31st
        assert!(!s.matches(date(2021, 6, 30)));
        assert!(s.matches(date(2021, 7, 31)));
    }

    #[test]
    fn test_fortnightly_parity() {
        let mut s = schedule("fortnightly", &[0], &[], &[]);
        // Anchor on a Monday and check alternating weeks
        s.created_at = date(2021, 6, 7).and_hms_opt(9, 0, 0).unwrap().and_utc().into();
        assert!(s.matches(date(2021, 6, 7)));
        assert!(!s.matches(date(2021, 6, 14)));
        assert!(s.matches(date(2021, 6, 21)));
    }

    #[test]
    fn test_week_of_month() {
        assert_eq!(week_of_month(date(2021, 6, 1)), 1);
        assert_eq!(week_of_month(date(2021, 6, 7)), 1);
        assert_eq!(week_of_month(date(2021, 6, 8)), 2);
        assert_eq!(week_of_month(date(2021, 6, 30)), 5);
    }

    #[test]
    fn test_weekly_requires_day_of_week() {
        let s = schedule("weekly", &[], &[], &[]);
        let err = s.validate().unwrap_err();
        assert!(err
            .to_string()
            .contains("When the frequency is weekly, specifying day of week is mandatory"));
    }

    #[test]
    fn test_monthly_requires_date_of_month() {
        let s = schedule("monthly", &[], &[], &[]);
        let err = s.validate().unwrap_err();
        assert!(err
            .to_string()
            .contains("When the frequency is monthly, specifying date of month is mandatory"));
    }

    #[test]
    fn test_monthly_date_range() {
        let s = schedule("monthly", &[], &[], &[0]);
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("Date of a month must be between 1 and 31"));

        let s = schedule("monthly", &[], &[], &[32]);
        assert!(s.validate().is_err());

        let s = schedule("monthly", &[], &[], &[1, 15, 31]);
        assert!(s.validate().is_ok());
    }
}
