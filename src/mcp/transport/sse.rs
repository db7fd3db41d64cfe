//! The legacy HTTP sub-protocol: one long-lived GET event stream carries
//! every server-to-client message, and an `endpoint` event names the URL
//! client messages are POSTed back to.

use crate::core::config::data::ServerConfig;
use crate::mcp::client::protocol::parse_initialize_result;
use crate::mcp::transport::stdio::dispatch_message;
use crate::mcp::transport::streamable_http::{
    build_http_client, build_streaming_http_client, header_pairs, is_event_stream_content_type,
    sse_data_payload, sse_event_name, SseLineBuffer,
};
use crate::mcp::transport::{client_details_for, HANDSHAKE_TIMEOUT_SECONDS, REQUEST_TIMEOUT_SECONDS};
use futures_util::StreamExt;
use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ServerMessage,
};
use rust_mcp_schema::RequestId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

const ENDPOINT_EVENT: &str = "endpoint";
const DEFAULT_EVENT: &str = "message";

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ServerMessage>>>>;

pub struct SseChannel {
    http: reqwest::Client,
    endpoint: String,
    headers: Vec<(String, String)>,
    server_name: String,
    pending: PendingMap,
    next_request_id: AtomicI64,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SseChannel {
    pub(crate) async fn open(config: &ServerConfig) -> Result<Arc<Self>, String> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| "A url is required for remote transports.".to_string())?;
        let headers = header_pairs(config);

        let stream_client = build_streaming_http_client()?;
        let mut request = stream_client
            .get(&url)
            .header("Accept", "text/event-stream");
        for (name, value) in &headers {
            request = request.header(name, value);
        }
        let response = request.send().await.map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP error: {}", response.status()));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if !is_event_stream_content_type(content_type) {
            return Err(format!("Expected an event stream, got {content_type:?}."));
        }

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let reader = spawn_stream_reader(
            response,
            pending.clone(),
            endpoint_tx,
            config.name.clone(),
        );

        let handshake = tokio::time::Duration::from_secs(HANDSHAKE_TIMEOUT_SECONDS);
        let endpoint = match tokio::time::timeout(handshake, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                reader.abort();
                return Err("Event stream closed before the endpoint event.".to_string());
            }
            Err(_) => {
                reader.abort();
                return Err("Timed out waiting for the endpoint event.".to_string());
            }
        };
        let endpoint = resolve_endpoint(&url, &endpoint)?;
        debug!(server = %config.name, endpoint = %endpoint, "Resolved SSE endpoint");

        let channel = Arc::new(Self {
            http: build_http_client()?,
            endpoint,
            headers,
            server_name: config.name.clone(),
            pending,
            next_request_id: AtomicI64::new(0),
            reader: std::sync::Mutex::new(Some(reader)),
        });

        match tokio::time::timeout(handshake, channel.initialize(config)).await {
            Ok(Ok(())) => Ok(channel),
            Ok(Err(message)) => {
                channel.close().await;
                Err(message)
            }
            Err(_) => {
                channel.close().await;
                Err(format!(
                    "Handshake timed out after {HANDSHAKE_TIMEOUT_SECONDS} seconds."
                ))
            }
        }
    }

    async fn initialize(&self, config: &ServerConfig) -> Result<(), String> {
        let response = self
            .send_request(RequestFromClient::InitializeRequest(client_details_for(
                config,
            )))
            .await?;
        parse_initialize_result(response)?;
        self.send_notification(NotificationFromClient::InitializedNotification(None))
            .await
    }

    pub(crate) async fn send_request(
        &self,
        request: RequestFromClient,
    ) -> Result<ServerMessage, String> {
        let request_id = RequestId::Integer(self.next_request_id.fetch_add(1, Ordering::SeqCst));
        let message = ClientMessage::from_message(
            MessageFromClient::RequestFromClient(request),
            Some(request_id.clone()),
        )
        .map_err(|err| err.to_string())?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(request_id.clone(), tx);
        }

        if let Err(message) = self.post_message(&message).await {
            self.pending.lock().await.remove(&request_id);
            return Err(message);
        }

        let timeout = tokio::time::Duration::from_secs(REQUEST_TIMEOUT_SECONDS);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err("Event stream closed before the response arrived.".to_string()),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err("SSE request timed out.".to_string())
            }
        }
    }

    async fn send_notification(&self, notification: NotificationFromClient) -> Result<(), String> {
        let message = ClientMessage::from_message(
            MessageFromClient::NotificationFromClient(notification),
            None,
        )
        .map_err(|err| err.to_string())?;
        self.post_message(&message).await
    }

    async fn post_message(&self, message: &ClientMessage) -> Result<(), String> {
        let payload = serde_json::to_string(message).map_err(|err| err.to_string())?;
        debug!(server = %self.server_name, endpoint = %self.endpoint, bytes = payload.len(), "Posting SSE client message");
        let mut request = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .body(payload);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP error: {}", response.status()));
        }
        Ok(())
    }

    pub(crate) async fn close(&self) {
        if let Some(reader) = self
            .reader
            .lock()
            .expect("reader handle lock poisoned")
            .take()
        {
            reader.abort();
        }
        self.pending.lock().await.clear();
    }
}

/// The endpoint event may carry an absolute URL or a path relative to the
/// stream URL.
fn resolve_endpoint(stream_url: &str, endpoint: &str) -> Result<String, String> {
    let base = reqwest::Url::parse(stream_url).map_err(|err| err.to_string())?;
    base.join(endpoint)
        .map(|url| url.to_string())
        .map_err(|err| err.to_string())
}

fn spawn_stream_reader(
    response: reqwest::Response,
    pending: PendingMap,
    endpoint_tx: oneshot::Sender<String>,
    server_name: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut endpoint_tx = Some(endpoint_tx);
        let mut event_name = DEFAULT_EVENT.to_string();
        let mut stream = response.bytes_stream();
        let mut buffer = SseLineBuffer::default();

        while let Some(chunk) = stream.next().await {
            let Ok(chunk) = chunk else {
                break;
            };
            for line in buffer.push(&chunk) {
                handle_stream_line(
                    &line,
                    &mut event_name,
                    &mut endpoint_tx,
                    &pending,
                    &server_name,
                )
                .await;
            }
        }
        for line in buffer.finish() {
            handle_stream_line(
                &line,
                &mut event_name,
                &mut endpoint_tx,
                &pending,
                &server_name,
            )
            .await;
        }

        // Stream over; fail the requests still waiting.
        pending.lock().await.clear();
    })
}

async fn handle_stream_line(
    line: &str,
    event_name: &mut String,
    endpoint_tx: &mut Option<oneshot::Sender<String>>,
    pending: &PendingMap,
    server_name: &str,
) {
    if let Some(name) = sse_event_name(line) {
        *event_name = name.to_string();
        return;
    }
    let Some(payload) = sse_data_payload(line) else {
        return;
    };
    if payload.is_empty() {
        return;
    }

    if event_name.as_str() == ENDPOINT_EVENT {
        if let Some(tx) = endpoint_tx.take() {
            let _ = tx.send(payload.to_string());
        }
    } else {
        match serde_json::from_str::<ServerMessage>(payload) {
            Ok(message) => dispatch_message(pending, message, server_name).await,
            Err(err) => {
                debug!(server = %server_name, error = %err, "Undecodable event payload");
            }
        }
    }
    *event_name = DEFAULT_EVENT.to_string();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_resolution_handles_relative_and_absolute_forms() {
        assert_eq!(
            resolve_endpoint(
                "https://mcp.example.com/sse",
                "/messages?sessionId=abc"
            )
            .expect("endpoint should resolve"),
            "https://mcp.example.com/messages?sessionId=abc"
        );
        assert_eq!(
            resolve_endpoint(
                "https://mcp.example.com/sse",
                "https://other.example.com/messages"
            )
            .expect("endpoint should resolve"),
            "https://other.example.com/messages"
        );
    }
}
