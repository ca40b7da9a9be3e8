//! Report assembly: gathers what earlier steps left in the execution
//! context and publishes one report event.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

use acadbatch_batch::{ExecutionContext, StepCounters, StepSummary, Tasklet};
use acadbatch_core::BatchError;
use acadbatch_events::{EventBus, NotificationKey, OutboundMessage, topics};

use crate::anomaly::keys;

/// Payload published on `batch.reports`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_name: String,
    pub run_key: String,
    pub generated_at: DateTime<Utc>,
    pub steps: Vec<StepSummary>,
    pub violations_found: u64,
    pub corrections_applied: u64,
    pub failed_passes: Vec<String>,
}

pub struct ReportAssembler {
    bus: Arc<dyn EventBus<OutboundMessage>>,
}

impl ReportAssembler {
    pub fn new(bus: Arc<dyn EventBus<OutboundMessage>>) -> Self {
        Self { bus }
    }

    pub fn assemble(&self, context: &ExecutionContext) -> Result<JobReport, BatchError> {
        let steps = context
            .entries_with_prefix("step.")
            .filter(|(key, _)| key.ends_with(".summary"))
            .map(|(_, value)| serde_json::from_value::<StepSummary>(value.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        let summary = context.get(&keys::summary())?.unwrap_or_default();

        Ok(JobReport {
            job_name: context.job_name().to_string(),
            run_key: context.run_key().to_string(),
            generated_at: Utc::now(),
            steps,
            violations_found: context.counter(&keys::violations_found())?,
            corrections_applied: context.counter(&keys::corrections_applied())?,
            failed_passes: summary.failed_passes().into_iter().map(String::from).collect(),
        })
    }
}

impl Tasklet for ReportAssembler {
    fn execute(&self, counters: &mut StepCounters, context: &mut ExecutionContext) -> Result<(), BatchError> {
        let report = self.assemble(context)?;
        let payload: JsonValue = serde_json::to_value(&report)?;
        // One report per execution; the run key makes redelivery detectable.
        let key = NotificationKey::new(format!("report:{}:{}", report.job_name, report.run_key));
        self.bus.publish(OutboundMessage::new(topics::REPORTS, key, payload))?;
        counters.write_count += 1;
        info!(
            job = %report.job_name,
            steps = report.steps.len(),
            violations = report.violations_found,
            "job report published"
        );
        Ok(())
    }
}
