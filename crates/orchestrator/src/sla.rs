//! Delivery SLA evaluation
//!
//! Weekly schedules are checked on Saturdays against the current week's
//! discovered-file counts; monthly schedules on the 5th against the previous
//! calendar month. A breach creates a catch-up run and queues an alert email.

use crate::emails::EmailTemplate;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use harvester_common::config::SlaConfig;
use harvester_common::db::models::{Connector, CreatedVia, Frequency, Job, Operation};
use harvester_common::dispatch::{Dispatcher, RunFactory, RunRequest};
use harvester_common::errors::Result;
use harvester_common::metrics::record_sla_breach;
use harvester_common::queue::{EmailMessage, QueueLane, QueueSet, ShortTaskMessage};
use harvester_common::Repository;
use std::collections::HashSet;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Outcome counts for one evaluation pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SlaReport {
    pub schedules_checked: u64,
    pub rules_checked: u64,
    pub breaches: u64,
    pub errors: u64,
}

pub struct SlaEvaluator {
    repo: Repository,
    factory: RunFactory,
    dispatcher: Dispatcher,
    queues: QueueSet,
    config: SlaConfig,
}

/// Sunday that starts the week containing `today`, through `today`
pub fn current_week_window(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let sunday = today - Duration::days(today.weekday().num_days_from_sunday() as i64);
    (sunday, today)
}

/// First and last day of the month before the one containing `today`
pub fn previous_month_window(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first_of_month = today.with_day(1).unwrap_or(today);
    let last_of_previous = first_of_month - Duration::days(1);
    let first_of_previous = last_of_previous.with_day(1).unwrap_or(last_of_previous);
    (first_of_previous, last_of_previous)
}

impl SlaEvaluator {
    pub fn new(
        repo: Repository,
        factory: RunFactory,
        dispatcher: Dispatcher,
        queues: QueueSet,
        config: SlaConfig,
    ) -> Self {
        Self {
            repo,
            factory,
            dispatcher,
            queues,
            config,
        }
    }

    /// Is this the day to evaluate schedules of the given frequency?
    pub fn is_check_day(&self, frequency: Frequency, today: NaiveDate) -> bool {
        match frequency {
            Frequency::Daily => true,
            Frequency::Weekly | Frequency::Fortnightly => {
                today.weekday().num_days_from_monday() == self.config.weekly_check_weekday
            }
            Frequency::Monthly => today.day() == self.config.monthly_check_day,
        }
    }

    /// Evaluate every schedule of every runnable job for the given instant
    #[instrument(skip(self), fields(date = %now.date_naive()))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<SlaReport> {
        let mut report = SlaReport::default();
        if !self.config.enabled {
            return Ok(report);
        }

        let today = now.date_naive();
        // One catch-up run per job per pass, whichever schedule breached first
        let mut breached_jobs: HashSet<Uuid> = HashSet::new();

        for (job, connector) in self.repo.list_runnable_jobs().await? {
            let schedules = match self.repo.schedules_for_job(job.id).await {
                Ok(schedules) => schedules,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Failed to load schedules");
                    report.errors += 1;
                    continue;
                }
            };

            for schedule in schedules {
                let frequency = schedule.frequency();
                if !self.is_check_day(frequency, today) {
                    continue;
                }
                report.schedules_checked += 1;

                match self.breach_template(&job, frequency, today).await {
                    Ok(Some(template)) => {
                        report.breaches += 1;
                        record_sla_breach(frequency.as_str());
                        if breached_jobs.insert(job.id) {
                            if let Err(e) = self.handle_breach(&job, &connector, template).await {
                                warn!(job_id = %job.id, error = %e, "SLA breach handling failed");
                                report.errors += 1;
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(job_id = %job.id, error = %e, "SLA evaluation failed");
                        report.errors += 1;
                    }
                }
            }
        }

        self.evaluate_alert_rules(today, &mut breached_jobs, &mut report).await;

        info!(
            checked = report.schedules_checked,
            rules = report.rules_checked,
            breaches = report.breaches,
            errors = report.errors,
            "SLA pass complete"
        );
        Ok(report)
    }

    /// Per-job expected-volume rules, checked every pass. A rule breaches
    /// when the window's file count falls short of the expected count.
    async fn evaluate_alert_rules(
        &self,
        today: NaiveDate,
        breached_jobs: &mut HashSet<Uuid>,
        report: &mut SlaReport,
    ) {
        let rules = match self.repo.list_enabled_alert_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(error = %e, "Failed to load alert rules");
                report.errors += 1;
                return;
            }
        };

        for (rule, job) in rules {
            report.rules_checked += 1;
            let from = today - Duration::days(rule.window_days());
            let count = match self.repo.sum_df_count(job.id, from, today).await {
                Ok(count) => count,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Alert rule count failed");
                    report.errors += 1;
                    continue;
                }
            };
            if count >= i64::from(rule.expected_document_count) {
                continue;
            }

            report.breaches += 1;
            record_sla_breach(&rule.period);
            if !breached_jobs.insert(job.id) {
                continue;
            }
            let connector = match self.repo.find_connector_by_id(job.connector_id).await {
                Ok(Some(connector)) => connector,
                Ok(None) => continue,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Alert rule connector lookup failed");
                    report.errors += 1;
                    continue;
                }
            };
            let template = match rule.period.as_str() {
                "day" => EmailTemplate::MissingIn24h,
                "month" => EmailTemplate::IclMonthly,
                _ => EmailTemplate::IclWeekly,
            };
            if let Err(e) = self.handle_breach(&job, &connector, template).await {
                warn!(job_id = %job.id, error = %e, "Alert rule breach handling failed");
                report.errors += 1;
            }
        }
    }

    /// Returns the alert template when the window's file count is zero
    async fn breach_template(
        &self,
        job: &Job,
        frequency: Frequency,
        today: NaiveDate,
    ) -> Result<Option<EmailTemplate>> {
        match frequency {
            Frequency::Weekly | Frequency::Fortnightly => {
                let (from, to) = current_week_window(today);
                let count = self.repo.sum_df_count(job.id, from, to).await?;
                if count > 0 {
                    return Ok(None);
                }
                Ok(Some(match frequency {
                    Frequency::Fortnightly => EmailTemplate::IclFortnightly,
                    _ => EmailTemplate::IclWeekly,
                }))
            }
            Frequency::Monthly => {
                let (from, to) = previous_month_window(today);
                let count = self.repo.sum_df_count(job.id, from, to).await?;
                if count > 0 {
                    return Ok(None);
                }
                Ok(Some(EmailTemplate::IclMonthly))
            }
            Frequency::Daily => {
                let two_days = self
                    .repo
                    .sum_df_count(job.id, today - Duration::days(2), today)
                    .await?;
                if two_days == 0 {
                    return Ok(Some(EmailTemplate::MissingIn48h));
                }
                let one_day = self
                    .repo
                    .sum_df_count(job.id, today - Duration::days(1), today)
                    .await?;
                if one_day == 0 {
                    return Ok(Some(EmailTemplate::MissingIn24h));
                }
                Ok(None)
            }
        }
    }

    /// Create the catch-up run and queue the alert email
    async fn handle_breach(
        &self,
        job: &Job,
        connector: &Connector,
        template: EmailTemplate,
    ) -> Result<()> {
        let run = self
            .factory
            .create_run(
                job,
                connector,
                Operation::InvoiceDownload,
                CreatedVia::SlaBreach,
                RunRequest {
                    is_manual: true,
                    ..Default::default()
                },
            )
            .await?;
        self.dispatcher.dispatch(&run, false).await?;

        let (subject, body) = template.render(job, connector);
        let message = ShortTaskMessage::Email(EmailMessage {
            job_id: job.id,
            template: template.key().to_string(),
            subject,
            body,
        });
        self.queues.lane(QueueLane::ShortTasks)?.send(&message).await?;

        info!(job_id = %job.id, template = template.key(), run_id = %run.id, "SLA breach handled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_current_week_window_starts_sunday() {
        // 2021-06-05 is a Saturday; the week began Sunday 2021-05-30
        let (from, to) = current_week_window(date(2021, 6, 5));
        assert_eq!(from, date(2021, 5, 30));
        assert_eq!(to, date(2021, 6, 5));

        // A Sunday is its own week start
        let (from, _) = current_week_window(date(2021, 5, 30));
        assert_eq!(from, date(2021, 5, 30));
    }

    #[test]
    fn test_previous_month_window() {
        let (from, to) = previous_month_window(date(2021, 6, 5));
        assert_eq!(from, date(2021, 5, 1));
        assert_eq!(to, date(2021, 5, 31));

        // January rolls back across the year boundary
        let (from, to) = previous_month_window(date(2021, 1, 5));
        assert_eq!(from, date(2020, 12, 1));
        assert_eq!(to, date(2020, 12, 31));
    }
}
