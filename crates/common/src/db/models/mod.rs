//! SeaORM entity models
//!
//! Database entities for the run orchestration subsystem

mod check_run;
mod connector;
mod connector_request;
mod discovered_file;
mod file_discovery_action;
mod job;
mod job_alert_rule;
mod job_schedule;
mod job_stat;
mod operation;
mod piq_mapping;
mod run;

pub use operation::{DocumentType, Operation};

pub use connector::{
    Entity as ConnectorEntity,
    Model as Connector,
    ActiveModel as ConnectorActiveModel,
    Column as ConnectorColumn,
    Channel,
    ConnectorType,
};

pub use job::{
    Entity as JobEntity,
    Model as Job,
    ActiveModel as JobActiveModel,
    Column as JobColumn,
    DISABLED_REASON_INCORRECT_CREDENTIALS,
};

pub use job_schedule::{
    Entity as JobScheduleEntity,
    Model as JobSchedule,
    ActiveModel as JobScheduleActiveModel,
    Column as JobScheduleColumn,
    Frequency,
    week_of_month,
};

pub use run::{
    Entity as RunEntity,
    Model as Run,
    ActiveModel as RunActiveModel,
    Column as RunColumn,
    CreatedVia,
    RequestParameters,
    RunStatus,
};

pub use discovered_file::{
    Entity as DiscoveredFileEntity,
    Model as DiscoveredFile,
    ActiveModel as DiscoveredFileActiveModel,
    Column as DiscoveredFileColumn,
    content_fingerprint,
    text_fingerprint,
    DELETED_HASH_MARKER,
};

pub use check_run::{
    Entity as CheckRunEntity,
    Model as CheckRun,
    ActiveModel as CheckRunActiveModel,
    Column as CheckRunColumn,
};

pub use file_discovery_action::{
    Entity as FileDiscoveryActionEntity,
    Model as FileDiscoveryAction,
    ActiveModel as FileDiscoveryActionActiveModel,
    Column as FileDiscoveryActionColumn,
    ActionType,
};

pub use piq_mapping::{
    Entity as PiqMappingEntity,
    Model as PiqMapping,
    ActiveModel as PiqMappingActiveModel,
    Column as PiqMappingColumn,
};

pub use job_stat::{
    Entity as JobStatEntity,
    Model as JobStat,
    ActiveModel as JobStatActiveModel,
    Column as JobStatColumn,
};

pub use job_alert_rule::{
    Entity as JobAlertRuleEntity,
    Model as JobAlertRule,
    ActiveModel as JobAlertRuleActiveModel,
    Column as JobAlertRuleColumn,
};

pub use connector_request::{
    Entity as ConnectorRequestEntity,
    Model as ConnectorRequest,
    ActiveModel as ConnectorRequestActiveModel,
    Column as ConnectorRequestColumn,
};
