//! WebSocket JSON-RPC implementation of `ChainRpc`.
//!
//! A background task owns the socket; callers talk to it over a command
//! channel and get responses through per-request oneshots. Subscription
//! notifications (`eth_subscription`) are routed to the receiver handed
//! out by `subscribe_logs`.
//!
//! Deliberately no auto-reconnect: reconnection policy (probing,
//! fallback, restoration) belongs to the connection monitor. When the
//! socket drops, every pending request errors out and every subscription
//! channel closes, which is the failure signal the engine listens for.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

use impactsync_core::{LogFilter, RawLog, SubscriberError};

use crate::rpc::ChainRpc;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, SubscriberError>>>>>;
type SubMap = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<RawLog>>>>;

enum WsCommand {
    Send {
        id: u64,
        payload: String,
        tx: oneshot::Sender<Result<Value, SubscriberError>>,
    },
    Close,
}

/// A single WebSocket connection to one JSON-RPC endpoint.
pub struct WsChainRpc {
    url: String,
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
    subs: SubMap,
    req_id: AtomicU64,
}

impl WsChainRpc {
    /// Connect to `url` and start the socket task. Fails fast if the
    /// endpoint is unreachable — the monitor owns retries.
    pub async fn connect(url: impl Into<String>) -> Result<Self, SubscriberError> {
        let url = url.into();
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| SubscriberError::Rpc(format!("WS connect: {e}")))?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<WsCommand>();
        let subs: SubMap = Arc::new(Mutex::new(HashMap::new()));

        let task_subs = subs.clone();
        let task_url = url.clone();
        tokio::spawn(async move {
            ws_task(task_url, ws_stream, cmd_rx, task_subs).await;
        });

        Ok(Self {
            url,
            cmd_tx,
            subs,
            req_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, SubscriberError> {
        let id = self.req_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        })
        .to_string();

        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(WsCommand::Send { id, payload, tx })
            .map_err(|_| SubscriberError::Rpc("WS task closed".into()))?;
        rx.await
            .map_err(|_| SubscriberError::Rpc("WS connection dropped".into()))?
    }

    fn filter_param(filter: &LogFilter) -> Value {
        let mut obj = json!({ "topics": [filter.topic0_values] });
        if let Some(from) = filter.from_block {
            obj["fromBlock"] = json!(format!("0x{from:x}"));
        }
        match filter.to_block {
            Some(to) => obj["toBlock"] = json!(format!("0x{to:x}")),
            None => obj["toBlock"] = json!("latest"),
        }
        obj
    }
}

impl Drop for WsChainRpc {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(WsCommand::Close);
    }
}

#[async_trait]
impl ChainRpc for WsChainRpc {
    async fn latest_block(&self) -> Result<u64, SubscriberError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let hex_str = result.as_str().ok_or_else(|| {
            SubscriberError::Rpc("eth_blockNumber: non-string result".into())
        })?;
        Ok(impactsync_core::types::parse_hex_u64(hex_str))
    }

    async fn get_logs(
        &self,
        from: u64,
        to: u64,
        filter: &LogFilter,
    ) -> Result<Vec<RawLog>, SubscriberError> {
        let param = Self::filter_param(&filter.clone().range(from, Some(to)));
        let result = self.call("eth_getLogs", json!([param])).await?;
        serde_json::from_value(result)
            .map_err(|e| SubscriberError::Rpc(format!("eth_getLogs decode: {e}")))
    }

    async fn subscribe_logs(
        &self,
        filter: &LogFilter,
    ) -> Result<mpsc::UnboundedReceiver<RawLog>, SubscriberError> {
        let param = json!({ "topics": [filter.topic0_values] });
        let result = self.call("eth_subscribe", json!(["logs", param])).await?;
        let sub_id = result
            .as_str()
            .ok_or_else(|| SubscriberError::Rpc("eth_subscribe: non-string id".into()))?
            .to_string();

        let (tx, rx) = mpsc::unbounded_channel();
        self.subs.lock().unwrap().insert(sub_id, tx);
        Ok(rx)
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

/// Background task owning the socket until it closes or errors.
async fn ws_task(
    url: String,
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    subs: SubMap,
) {
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    None | Some(WsCommand::Close) => break,
                    Some(WsCommand::Send { id, payload, tx }) => {
                        pending.lock().unwrap().insert(id, tx);
                        if sink.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            msg = stream.next() => {
                match msg {
                    None => break,
                    Some(Err(e)) => {
                        tracing::warn!(url = %url, error = %e, "WS receive error");
                        break;
                    }
                    Some(Ok(Message::Text(text))) => {
                        handle_message(text.as_str(), &pending, &subs);
                    }
                    Some(Ok(Message::Close(_))) => break,
                    _ => {}
                }
            }
        }
    }

    tracing::warn!(url = %url, "WS connection closed");

    // Fail pending requests and close subscription channels so the
    // engine observes the disconnect.
    for (_, tx) in pending.lock().unwrap().drain() {
        let _ = tx.send(Err(SubscriberError::Rpc("WS connection closed".into())));
    }
    subs.lock().unwrap().clear();
}

fn handle_message(text: &str, pending: &PendingMap, subs: &SubMap) {
    let Ok(val) = serde_json::from_str::<Value>(text) else {
        tracing::debug!("failed to parse WS message as JSON");
        return;
    };

    // Subscription notification?
    if val.get("method").and_then(|m| m.as_str()) == Some("eth_subscription") {
        let Some(params) = val.get("params") else { return };
        let Some(sub_id) = params["subscription"].as_str() else { return };
        match serde_json::from_value::<RawLog>(params["result"].clone()) {
            Ok(log) => {
                if let Some(tx) = subs.lock().unwrap().get(sub_id) {
                    let _ = tx.send(log);
                }
            }
            Err(e) => tracing::warn!(error = %e, "unparseable subscription log"),
        }
        return;
    }

    // Regular JSON-RPC response.
    let Some(id) = val.get("id").and_then(|i| i.as_u64()) else { return };
    let Some(tx) = pending.lock().unwrap().remove(&id) else { return };
    if let Some(err) = val.get("error") {
        let _ = tx.send(Err(SubscriberError::Rpc(err.to_string())));
    } else {
        let _ = tx.send(Ok(val.get("result").cloned().unwrap_or(Value::Null)));
    }
}
