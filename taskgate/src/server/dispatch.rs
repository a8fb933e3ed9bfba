//! Maps `tasks/*` methods onto [`TaskService`] calls.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use taskgate_core::TaskService;
use taskgate_core::error::RpcError;
use taskgate_core::events::TaskEventStream;
use taskgate_core::protocol::{
    CancelResult, InputParams, ListParams, ListResult, METHOD_CANCEL, METHOD_GET, METHOD_INPUT,
    METHOD_LIST, METHOD_PING, METHOD_START, METHOD_SUBSCRIBE, METHOD_WAIT, StartParams,
    StartResult, SubscribeResult, TaskIdParams, WaitParams,
};
use taskgate_core::task::TaskError;

/// What a handled request produced.
#[derive(Debug)]
pub enum Dispatched {
    /// Plain result.
    Reply(Value),
    /// `tasks/subscribe`: the result plus the stream to forward as
    /// notifications tagged with `subscription`.
    Subscribed {
        result: Value,
        subscription: String,
        stream: TaskEventStream,
    },
}

/// Request handler shared by every in-flight request.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    service: Arc<TaskService>,
}

impl Dispatcher {
    pub fn new(service: Arc<TaskService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<TaskService> {
        &self.service
    }

    /// Handles one request.
    ///
    /// # Errors
    ///
    /// `MethodNotFound` for unknown methods, `InvalidParams` when params do
    /// not match the method, otherwise the task error from the service.
    pub async fn handle(&self, method: &str, params: Option<Value>) -> Result<Dispatched, RpcError> {
        debug!(method, "Dispatching request");
        match method {
            METHOD_START => {
                let p: StartParams = parse_params(params)?;
                let snapshot = self.service.start(&p.operation, p.params)?;
                reply(&StartResult::from(&snapshot))
            }
            METHOD_GET => {
                let p: TaskIdParams = parse_params(params)?;
                reply(&self.service.get_status(&p.task_id)?)
            }
            METHOD_INPUT => {
                let p: InputParams = parse_params(params)?;
                reply(&self.service.provide_input(&p.task_id, p.value).await?)
            }
            METHOD_CANCEL => {
                let p: TaskIdParams = parse_params(params)?;
                let outcome = self.service.cancel(&p.task_id)?;
                reply(&CancelResult::from(&outcome))
            }
            METHOD_LIST => {
                let p: ListParams = match params {
                    None | Some(Value::Null) => ListParams::default(),
                    some => parse_params(some)?,
                };
                let tasks = self.service.list(p.state, p.limit());
                reply(&ListResult { tasks })
            }
            METHOD_SUBSCRIBE => {
                let p: TaskIdParams = parse_params(params)?;
                // Attach before reading the snapshot so no commit falls between
                let stream = self.service.subscribe(&p.task_id)?;
                let snapshot = self.service.get_status(&p.task_id)?;
                let subscription = taskgate_core::protocol::correlation_id();
                let result = to_value(&SubscribeResult {
                    subscription: subscription.clone(),
                    snapshot,
                })?;
                Ok(Dispatched::Subscribed {
                    result,
                    subscription,
                    stream,
                })
            }
            METHOD_WAIT => {
                let p: WaitParams = parse_params(params)?;
                let snapshot = self
                    .service
                    .wait(&p.task_id, p.condition(), p.timeout())
                    .await?;
                reply(&snapshot)
            }
            METHOD_PING => Ok(Dispatched::Reply(json!({}))),
            other => Err(RpcError::MethodNotFound {
                method: other.to_string(),
            }),
        }
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, RpcError> {
    let params = params.ok_or_else(|| RpcError::InvalidParams {
        details: "missing params".to_string(),
    })?;
    serde_json::from_value(params).map_err(|e| RpcError::InvalidParams {
        details: e.to_string(),
    })
}

fn to_value<T: Serialize>(result: &T) -> Result<Value, RpcError> {
    serde_json::to_value(result).map_err(|e| {
        RpcError::Task(TaskError::Internal {
            details: format!("failed to encode result: {e}"),
        })
    })
}

fn reply<T: Serialize>(result: &T) -> Result<Dispatched, RpcError> {
    to_value(result).map(Dispatched::Reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskgate_core::config::Config;
    use taskgate_core::executor::OperationCatalog;

    fn dispatcher() -> Dispatcher {
        let service = TaskService::new(&Config::default(), OperationCatalog::with_builtins(), None);
        Dispatcher::new(service)
    }

    fn result(dispatched: Dispatched) -> Value {
        match dispatched {
            Dispatched::Reply(value) => value,
            Dispatched::Subscribed { result, .. } => result,
        }
    }

    #[tokio::test]
    async fn test_start_then_get() {
        let d = dispatcher();
        let started = result(
            d.handle(
                METHOD_START,
                Some(json!({"operation": "echo", "params": {"value": 1}})),
            )
            .await
            .unwrap(),
        );
        assert_eq!(started["state"], "pending");
        let task_id = started["taskId"].clone();

        let status = result(
            d.handle(METHOD_GET, Some(json!({"taskId": task_id})))
                .await
                .unwrap(),
        );
        assert_eq!(status["taskId"], task_id);
        assert_eq!(status["operation"], "echo");
    }

    #[tokio::test]
    async fn test_unknown_method_and_bad_params() {
        let d = dispatcher();
        let err = d.handle("tasks/frobnicate", None).await.unwrap_err();
        assert_eq!(err.to_jsonrpc_code(), -32601);

        let err = d.handle(METHOD_GET, None).await.unwrap_err();
        assert_eq!(err.to_jsonrpc_code(), -32602);

        let err = d
            .handle(METHOD_START, Some(json!({"params": {}})))
            .await
            .unwrap_err();
        assert_eq!(err.to_jsonrpc_code(), -32602);
    }

    #[tokio::test]
    async fn test_task_errors_pass_through() {
        let d = dispatcher();
        let err = d
            .handle(METHOD_GET, Some(json!({"taskId": "missing"})))
            .await
            .unwrap_err();
        assert_eq!(err.error_type_name(), "task_not_found");

        let err = d
            .handle(METHOD_START, Some(json!({"operation": "nope"})))
            .await
            .unwrap_err();
        assert_eq!(err.error_type_name(), "unknown_operation");
    }

    #[tokio::test]
    async fn test_list_without_params() {
        let d = dispatcher();
        let listed = result(d.handle(METHOD_LIST, None).await.unwrap());
        assert_eq!(listed["tasks"], json!([]));
        assert_eq!(result(d.handle(METHOD_PING, None).await.unwrap()), json!({}));
    }
}
