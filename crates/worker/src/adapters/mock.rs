//! Scriptable adapter for integration tests and queue smoke tests

use super::{Adapter, FlowOutcome, RunContext};
use crate::download::StaticDownloader;
use crate::errors::{FlowError, FlowResult};
use crate::pipeline::NewFileSpec;
use async_trait::async_trait;
use harvester_common::db::models::DocumentType;
use harvester_common::issues::IssueCode;

/// What the mock should do when a flow is invoked
#[derive(Debug, Clone)]
enum Script {
    /// Register `count` synthetic invoices through the pipeline
    Succeed { count: u64 },
    /// Fail with a credential issue
    BadCredentials,
    /// Fail as if the vendor site was unreachable
    Crash,
}

pub struct MockAdapter {
    code: String,
    script: Script,
}

impl MockAdapter {
    pub fn succeeding(code: &str, count: u64) -> Self {
        Self {
            code: code.to_string(),
            script: Script::Succeed { count },
        }
    }

    pub fn bad_credentials(code: &str) -> Self {
        Self {
            code: code.to_string(),
            script: Script::BadCredentials,
        }
    }

    pub fn crashing(code: &str) -> Self {
        Self {
            code: code.to_string(),
            script: Script::Crash,
        }
    }

    fn fail(&self) -> Option<FlowError> {
        match self.script {
            Script::Succeed { .. } => None,
            Script::BadCredentials => Some(FlowError::Contextual(
                IssueCode::AuthenticationFailedWeb.issue(),
            )),
            Script::Crash => Some(FlowError::Contextual(
                IssueCode::ExternalUpstreamUnavailable.issue(),
            )),
        }
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn code(&self) -> &str {
        &self.code
    }

    async fn documents_download_flow(&self, ctx: &RunContext) -> FlowResult<FlowOutcome> {
        if let Some(error) = self.fail() {
            return Err(error);
        }
        let Script::Succeed { count } = self.script else {
            return Ok(FlowOutcome::default());
        };

        let mut registered = 0;
        for n in 0..count {
            let reference = format!("MOCK-{n}");
            let spec = NewFileSpec {
                original_filename: Some(format!("{reference}.pdf")),
                document_properties: serde_json::json!({ "mock": true }),
                ..NewFileSpec::new(reference.clone(), DocumentType::Invoice)
            };
            let downloader = StaticDownloader::new(
                format!("{reference}.pdf"),
                format!("mock invoice {n}").into_bytes(),
            );
            ctx.pipeline
                .register_file(&ctx.run, &ctx.job, &ctx.connector, spec, &downloader, &ctx.temp_dir)
                .await?;
            registered += 1;
        }
        Ok(FlowOutcome::artifact(registered))
    }

    async fn login_flow(&self, _ctx: &RunContext) -> FlowResult<bool> {
        match self.fail() {
            Some(error) => Err(error),
            None => Ok(true),
        }
    }

    async fn payment_flow(&self, _ctx: &RunContext) -> FlowResult<FlowOutcome> {
        match (self.fail(), &self.script) {
            (Some(error), _) => Err(error),
            (None, Script::Succeed { count }) => Ok(FlowOutcome::artifact(*count)),
            (None, _) => Ok(FlowOutcome::default()),
        }
    }

    async fn payment_update_flow(&self, ctx: &RunContext) -> FlowResult<FlowOutcome> {
        if let Some(error) = self.fail() {
            return Err(error);
        }
        let Script::Succeed { count } = self.script else {
            return Ok(FlowOutcome::default());
        };

        // Chequerun ids are derived from the run id so replays of the same
        // run hit the uniqueness checks rather than minting fresh ids.
        let seed = (ctx.run.id.as_u128() & 0x7fff_ffff) as i64;
        let mut exported = 0;
        for n in 0..count {
            let chequerun_id = seed + n as i64;
            let check_run = ctx.check_runs.open(&ctx.run, chequerun_id, None).await?;
            ctx.check_runs.close(&check_run, true, true).await?;
            exported += 1;
        }
        Ok(FlowOutcome::artifact(exported))
    }

    async fn sync_flow(&self, _ctx: &RunContext) -> FlowResult<FlowOutcome> {
        match self.fail() {
            Some(error) => Err(error),
            None => Ok(FlowOutcome::artifact(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_produce_the_right_issue() {
        let ok = MockAdapter::succeeding("mock", 1);
        assert!(ok.fail().is_none());

        let bad = MockAdapter::bad_credentials("mock");
        let issue = match bad.fail() {
            Some(FlowError::Contextual(issue)) => issue,
            other => panic!("unexpected: {other:?}"),
        };
        assert!(issue.code.is_credential_failure());
    }
}
