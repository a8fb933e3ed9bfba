//! JSON-RPC over stdio.
//!
//! - `ndjson.rs` - Line framing and message parsing
//! - `dispatch.rs` - Method routing onto the task service
//!
//! The read loop never blocks on a request: each one runs in its own task,
//! so a long `tasks/wait` does not hold up a `tasks/cancel` behind it.
//! Every outgoing line goes through a single writer task.

pub mod dispatch;
pub mod ndjson;

use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use taskgate_core::error::RpcError;
use taskgate_core::protocol::{
    JsonRpcId, JsonRpcMessageKind, JsonRpcNotification, JsonRpcResponse, NOTIFICATION_STATUS,
    StatusNotification, correlation_id,
};

use crate::error::{FramingError, ServeError};
use dispatch::{Dispatched, Dispatcher};
use ndjson::{MAX_MESSAGE_BYTES, bounded_read_line, decode_line, parse_message};

/// Outgoing lines buffered ahead of the writer.
const OUTBOUND_CAPACITY: usize = 1024;

/// How long in-flight requests may run after the client closes its input.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Serve JSON-RPC requests from `reader`, writing replies to `writer`.
///
/// Returns at EOF or when `shutdown` fires. In-flight requests get
/// [`DRAIN_GRACE`] to finish; subscription streams stop at once.
///
/// # Errors
///
/// Returns `ServeError::Io` if reading the input fails.
pub async fn run_stdio<R, W>(
    dispatcher: Dispatcher,
    reader: R,
    writer: W,
    shutdown: CancellationToken,
) -> Result<(), ServeError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let (tx, rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
    let writer_task = tokio::spawn(write_loop(writer, rx));

    let closed = CancellationToken::new();
    let mut in_flight = JoinSet::new();
    let mut buf = Vec::new();

    let read_result = loop {
        buf.clear();
        let read = tokio::select! {
            read = bounded_read_line(&mut reader, &mut buf, MAX_MESSAGE_BYTES) => read,
            () = shutdown.cancelled() => {
                info!("Shutdown requested, closing stdio server");
                break Ok(());
            }
        };

        match read {
            Ok(0) => {
                debug!("Client closed input");
                break Ok(());
            }
            Ok(_) => {}
            Err(FramingError::Io(e)) => break Err(ServeError::Io(e)),
            Err(e) => {
                send_framing_error(&tx, &e).await;
                continue;
            }
        }

        let line = match decode_line(std::mem::take(&mut buf)) {
            Ok(line) => line,
            Err(e) => {
                send_framing_error(&tx, &e).await;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let message = match parse_message(&line) {
            Ok(message) => message,
            Err(e) => {
                send_framing_error(&tx, &e).await;
                continue;
            }
        };

        match message.kind {
            JsonRpcMessageKind::Request { id, method } => {
                in_flight.spawn(handle_request(
                    dispatcher.clone(),
                    id,
                    method,
                    message.params,
                    tx.clone(),
                    closed.clone(),
                ));
            }
            JsonRpcMessageKind::Notification { method } => {
                debug!(method = %method, "Ignoring client notification");
            }
            JsonRpcMessageKind::Response { id } => {
                warn!(id = %id, "Ignoring unexpected response from client");
            }
        }

        // Reap finished requests so the set does not grow unbounded
        while in_flight.try_join_next().is_some() {}
    };

    closed.cancel();
    if tokio::time::timeout(DRAIN_GRACE, in_flight.join_all())
        .await
        .is_err()
    {
        warn!(grace = ?DRAIN_GRACE, "In-flight requests did not finish before close");
    }

    drop(tx);
    if let Err(e) = writer_task.await {
        warn!(error = %e, "Writer task failed");
    }
    read_result
}

async fn handle_request(
    dispatcher: Dispatcher,
    id: JsonRpcId,
    method: String,
    params: Option<serde_json::Value>,
    tx: mpsc::Sender<String>,
    closed: CancellationToken,
) {
    match dispatcher.handle(&method, params).await {
        Ok(Dispatched::Reply(result)) => {
            send(&tx, &JsonRpcResponse::success(id, result)).await;
        }
        Ok(Dispatched::Subscribed {
            result,
            subscription,
            mut stream,
        }) => {
            if !send(&tx, &JsonRpcResponse::success(id, result)).await {
                return;
            }
            loop {
                let snapshot = tokio::select! {
                    next = stream.next() => match next {
                        Some(snapshot) => snapshot,
                        None => break,
                    },
                    () = closed.cancelled() => break,
                };
                let params = StatusNotification {
                    subscription: subscription.clone(),
                    snapshot,
                };
                let params = match serde_json::to_value(&params) {
                    Ok(params) => params,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode status notification");
                        break;
                    }
                };
                if !send(&tx, &JsonRpcNotification::new(NOTIFICATION_STATUS, params)).await {
                    break;
                }
            }
            debug!(subscription = %subscription, "Subscription ended");
        }
        Err(e) => send_error(&tx, id, &method, &e).await,
    }
}

async fn send_error(tx: &mpsc::Sender<String>, id: JsonRpcId, method: &str, err: &RpcError) {
    let correlation_id = correlation_id();
    match err {
        RpcError::Task(taskgate_core::task::TaskError::Internal { details }) => warn!(
            correlation_id = %correlation_id,
            method,
            details = %details,
            "Request failed with internal error"
        ),
        _ => debug!(
            correlation_id = %correlation_id,
            method,
            error_type = err.error_type_name(),
            "Request rejected"
        ),
    }
    send(
        tx,
        &JsonRpcResponse::error(id, err.to_jsonrpc_error(&correlation_id)),
    )
    .await;
}

async fn send_framing_error(tx: &mpsc::Sender<String>, err: &FramingError) {
    warn!(error_type = err.error_type(), error = %err, "Rejected input line");
    send_error(tx, JsonRpcId::Null, "", &err.to_rpc_error()).await;
}

/// Queues one message. Returns false once the writer is gone.
async fn send<T: Serialize>(tx: &mpsc::Sender<String>, message: &T) -> bool {
    match serde_json::to_string(message) {
        Ok(line) => tx.send(line).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to encode outgoing message");
            true
        }
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(mut writer: W, mut rx: mpsc::Receiver<String>) {
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            warn!(error = %e, "Failed to write to client, dropping output");
            return;
        }
    }
}
