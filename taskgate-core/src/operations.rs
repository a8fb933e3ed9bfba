//! Built-in operations.
//!
//! - `export`: batched record export that asks for the format when it is
//!   missing and asks for confirmation before large exports.
//! - `echo`: returns its input after optional steps, an optional question,
//!   and an optional failure. Useful for exercising clients.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

use crate::executor::{Operation, OperationError, StepError, TaskContext};
use crate::task::InputRequest;

// ============================================================================
// export
// ============================================================================

const EXPORT_FORMATS: [&str; 2] = ["csv", "json"];
const CONTINUE: &str = "continue";
const CANCEL: &str = "cancel";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ExportParams {
    #[serde(default)]
    format: Option<String>,
    #[serde(default = "default_records")]
    records: u64,
    #[serde(default = "default_batch_size")]
    batch_size: u64,
    #[serde(default = "default_step_delay_ms")]
    step_delay_ms: u64,
    /// Exports larger than this ask for confirmation first
    #[serde(default = "default_confirm_over")]
    confirm_over: u64,
}

fn default_records() -> u64 {
    50_000
}

fn default_batch_size() -> u64 {
    10_000
}

fn default_step_delay_ms() -> u64 {
    50
}

fn default_confirm_over() -> u64 {
    10_000
}

/// Batched record export.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportOperation;

#[async_trait]
impl Operation for ExportOperation {
    async fn run(&self, params: Value, ctx: &mut TaskContext) -> Result<Value, OperationError> {
        let params: ExportParams = serde_json::from_value(params)
            .map_err(|e| OperationError::failed(format!("Invalid export params: {e}")))?;

        let format = match params.format {
            Some(format) if EXPORT_FORMATS.contains(&format.as_str()) => format,
            Some(other) => {
                return Err(OperationError::failed(format!(
                    "Unsupported export format '{other}'"
                )));
            }
            None => {
                let answer = ctx
                    .ask(InputRequest::choice("Which format?", EXPORT_FORMATS))
                    .await?;
                answer.as_str().unwrap_or(EXPORT_FORMATS[0]).to_string()
            }
        };

        ctx.progress(0.0, format!("Counting records for {format} export"))?;
        ctx.checkpoint().await?;

        if params.records > params.confirm_over {
            let answer = ctx
                .ask(InputRequest::choice(
                    format!("{} records found, continue?", params.records),
                    [CONTINUE, CANCEL],
                ))
                .await?;
            if answer.as_str() == Some(CANCEL) {
                return Err(StepError::Cancelled.into());
            }
        }

        let batch_size = params.batch_size.max(1);
        let delay = Duration::from_millis(params.step_delay_ms);
        let mut exported = 0;
        while exported < params.records {
            ctx.sleep(delay).await?;
            exported = (exported + batch_size).min(params.records);
            ctx.progress(
                exported as f64 / params.records as f64,
                format!("Exported {exported}/{} records", params.records),
            )?;
        }

        Ok(json!({
            "format": format,
            "records": params.records,
            "location": format!("exports/{}.{format}", ctx.id()),
        }))
    }
}

// ============================================================================
// echo
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct EchoParams {
    #[serde(default)]
    value: Value,
    #[serde(default)]
    steps: u32,
    #[serde(default = "default_echo_delay_ms")]
    delay_ms: u64,
    /// Question to ask before finishing
    #[serde(default)]
    ask: Option<InputRequest>,
    /// Fail with this message instead of completing
    #[serde(default)]
    fail: Option<String>,
}

fn default_echo_delay_ms() -> u64 {
    10
}

/// Returns its `value` param, optionally after steps and a question.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoOperation;

#[async_trait]
impl Operation for EchoOperation {
    async fn run(&self, params: Value, ctx: &mut TaskContext) -> Result<Value, OperationError> {
        let params: EchoParams = serde_json::from_value(params)
            .map_err(|e| OperationError::failed(format!("Invalid echo params: {e}")))?;

        let delay = Duration::from_millis(params.delay_ms);
        for step in 1..=params.steps {
            ctx.sleep(delay).await?;
            ctx.progress(
                f64::from(step) / f64::from(params.steps),
                format!("Step {step}/{}", params.steps),
            )?;
        }

        let input = match params.ask {
            Some(request) => Some(ctx.ask(request).await?),
            None => None,
        };

        if let Some(message) = params.fail {
            return Err(OperationError::failed(message));
        }

        ctx.checkpoint().await?;
        Ok(match input {
            Some(input) => json!({ "value": params.value, "input": input }),
            None => json!({ "value": params.value }),
        })
    }
}
