//! Adapter contract and registry
//!
//! Per-vendor extraction logic plugs in here. An adapter is registered under
//! its connector's `adapter_code` at program start; unknown codes are
//! rejected when a run tries to resolve them.

pub mod mock;

use crate::checkruns::CheckRunRecorder;
use crate::errors::{FlowError, FlowResult};
use crate::pipeline::FilePipeline;
use async_trait::async_trait;
use harvester_common::db::models::{Connector, Job, Run};
use harvester_common::errors::AppError;
use harvester_common::issues::Issue;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything an adapter gets to work with for one run
pub struct RunContext {
    pub run: Run,
    pub job: Job,
    pub connector: Connector,
    pub pipeline: FilePipeline,
    pub check_runs: CheckRunRecorder,
    /// Exclusive per-run scratch directory, removed on terminal transition
    pub temp_dir: PathBuf,
}

/// Result of one flow invocation
#[derive(Debug, Default, Clone)]
pub struct FlowOutcome {
    /// Artifacts persisted (discovered files or checkruns)
    pub artifacts: u64,
    /// Per-row failures the adapter swallowed to keep going
    pub partial_failures: Vec<Issue>,
}

impl FlowOutcome {
    pub fn artifact(count: u64) -> Self {
        Self {
            artifacts: count,
            partial_failures: Vec::new(),
        }
    }
}

/// The per-vendor plug-in contract. Default methods reject the operation so
/// an adapter only implements the flows its connector advertises.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Stable registry key
    fn code(&self) -> &str;

    /// Drive document discovery (invoices, statements, order guides, POs,
    /// payment info)
    async fn documents_download_flow(&self, _ctx: &RunContext) -> FlowResult<FlowOutcome> {
        Err(self.unsupported("documents_download_flow"))
    }

    /// Verify credentials without extracting anything
    async fn login_flow(&self, _ctx: &RunContext) -> FlowResult<bool> {
        Err(self.unsupported("login_flow"))
    }

    /// Submit vendor payments
    async fn payment_flow(&self, _ctx: &RunContext) -> FlowResult<FlowOutcome> {
        Err(self.unsupported("payment_flow"))
    }

    /// Export payment info, producing checkruns
    async fn payment_update_flow(&self, _ctx: &RunContext) -> FlowResult<FlowOutcome> {
        Err(self.unsupported("payment_update_flow"))
    }

    /// Sync accounting entities (vendors, GL accounts, bank accounts)
    async fn sync_flow(&self, _ctx: &RunContext) -> FlowResult<FlowOutcome> {
        Err(self.unsupported("sync_flow"))
    }

    fn unsupported(&self, flow: &str) -> FlowError {
        FlowError::Contextual(
            harvester_common::issues::IssueCode::CommonUnsupportedOperation
                .with_param("operation", format!("{}.{}", self.code(), flow)),
        )
    }
}

type AdapterFactory = Box<dyn Fn() -> Arc<dyn Adapter> + Send + Sync>;

/// Explicit adapter registry populated at program start
#[derive(Default)]
pub struct AdapterRegistry {
    factories: HashMap<String, AdapterFactory>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under an adapter code. Last registration wins.
    pub fn register<F>(&mut self, code: &str, factory: F)
    where
        F: Fn() -> Arc<dyn Adapter> + Send + Sync + 'static,
    {
        self.factories.insert(code.to_string(), Box::new(factory));
    }

    /// Resolve an adapter; unknown codes are a fatal run error
    pub fn resolve(&self, code: &str) -> Result<Arc<dyn Adapter>, AppError> {
        self.factories
            .get(code)
            .map(|factory| factory())
            .ok_or_else(|| AppError::UnknownAdapter {
                code: code.to_string(),
            })
    }

    pub fn codes(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockAdapter;

    #[test]
    fn test_unknown_code_is_rejected() {
        let registry = AdapterRegistry::new();
        let result = registry.resolve("nope");
        assert!(matches!(result, Err(AppError::UnknownAdapter { code }) if code == "nope"));
    }

    #[test]
    fn test_registered_adapter_resolves() {
        let mut registry = AdapterRegistry::new();
        registry.register("mock", || Arc::new(MockAdapter::succeeding("mock", 2)));
        let adapter = registry.resolve("mock").unwrap();
        assert_eq!(adapter.code(), "mock");
    }
}
