use crate::core::config::data::ServerConfig;
use crate::mcp::client::protocol::{parse_initialize_result, requested_protocol_version};
use crate::mcp::transport::{client_details_for, HANDSHAKE_TIMEOUT_SECONDS};
use futures_util::StreamExt;
use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ServerMessage,
};
use rust_mcp_schema::RequestId;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

pub(crate) const JSON_CONTENT_TYPE: &str = "application/json";
pub(crate) const JSON_AND_SSE_ACCEPT: &str = "application/json, text/event-stream";
pub(crate) const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
pub(crate) const SESSION_ID_HEADER: &str = "mcp-session-id";

const HTTP_CONNECT_TIMEOUT_SECONDS: u64 = 10;
const HTTP_REQUEST_TIMEOUT_SECONDS: u64 = 60;
const HTTP_POOL_IDLE_TIMEOUT_SECONDS: u64 = 90;
const HTTP_POOL_MAX_IDLE_PER_HOST: usize = 8;

pub(crate) fn build_http_client() -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECONDS))
        .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECONDS))
        .pool_idle_timeout(Duration::from_secs(HTTP_POOL_IDLE_TIMEOUT_SECONDS))
        .pool_max_idle_per_host(HTTP_POOL_MAX_IDLE_PER_HOST)
        .build()
        .map_err(|err| err.to_string())
}

/// Client for long-lived event streams; no total request timeout, or the
/// stream would be cut mid-session.
pub(crate) fn build_streaming_http_client() -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECONDS))
        .build()
        .map_err(|err| err.to_string())
}

/// The multiplexed HTTP sub-protocol: every client message is a POST, and a
/// reply arrives either as a JSON body or as the first response message on a
/// short event stream. A session id handed out by the server is echoed on
/// every subsequent request.
pub struct StreamableHttpChannel {
    http: reqwest::Client,
    url: String,
    headers: Vec<(String, String)>,
    server_name: String,
    requested_protocol_version: String,
    negotiated_protocol_version: Mutex<Option<String>>,
    session_id: Mutex<Option<String>>,
    next_request_id: AtomicI64,
}

impl StreamableHttpChannel {
    pub(crate) async fn open(config: &ServerConfig) -> Result<Arc<Self>, String> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| "A url is required for remote transports.".to_string())?;
        let http = build_http_client()?;
        let channel = Arc::new(Self {
            http,
            url,
            headers: header_pairs(config),
            server_name: config.name.clone(),
            requested_protocol_version: requested_protocol_version(config),
            negotiated_protocol_version: Mutex::new(None),
            session_id: Mutex::new(None),
            next_request_id: AtomicI64::new(0),
        });

        let handshake = Duration::from_secs(HANDSHAKE_TIMEOUT_SECONDS);
        match tokio::time::timeout(handshake, channel.initialize(config)).await {
            Ok(Ok(())) => Ok(channel),
            Ok(Err(message)) => Err(message),
            Err(_) => Err(format!(
                "Handshake timed out after {HANDSHAKE_TIMEOUT_SECONDS} seconds."
            )),
        }
    }

    async fn initialize(&self, config: &ServerConfig) -> Result<(), String> {
        let response = self
            .send_request(RequestFromClient::InitializeRequest(client_details_for(
                config,
            )))
            .await?;
        let details = parse_initialize_result(response)?;
        *self
            .negotiated_protocol_version
            .lock()
            .expect("protocol version lock poisoned") = Some(details.protocol_version);
        self.send_notification(NotificationFromClient::InitializedNotification(None))
            .await
    }

    pub(crate) async fn send_request(
        &self,
        request: RequestFromClient,
    ) -> Result<ServerMessage, String> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let message = ClientMessage::from_message(
            MessageFromClient::RequestFromClient(request),
            Some(RequestId::Integer(request_id)),
        )
        .map_err(|err| err.to_string())?;

        debug!(server = %self.server_name, url = %self.url, request_id, "Sending HTTP request");
        let response = self.post_message(&message).await?;

        let session_id = response_session_id(&response);
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();

        let server_message = if is_event_stream_content_type(&content_type) {
            next_sse_server_message(response).await?
        } else {
            let body = response.bytes().await.map_err(|err| err.to_string())?;
            serde_json::from_slice::<ServerMessage>(&body).map_err(|err| err.to_string())?
        };

        if let Some(session_id) = session_id {
            *self.session_id.lock().expect("session id lock poisoned") = Some(session_id);
        }
        Ok(server_message)
    }

    async fn send_notification(&self, notification: NotificationFromClient) -> Result<(), String> {
        let message = ClientMessage::from_message(
            MessageFromClient::NotificationFromClient(notification),
            None,
        )
        .map_err(|err| err.to_string())?;
        let response = self.post_message(&message).await?;
        if let Some(session_id) = response_session_id(&response) {
            *self.session_id.lock().expect("session id lock poisoned") = Some(session_id);
        }
        Ok(())
    }

    async fn post_message(&self, message: &ClientMessage) -> Result<reqwest::Response, String> {
        let payload = serde_json::to_string(message).map_err(|err| err.to_string())?;
        let protocol_version = {
            let negotiated = self
                .negotiated_protocol_version
                .lock()
                .expect("protocol version lock poisoned");
            negotiated
                .clone()
                .unwrap_or_else(|| self.requested_protocol_version.clone())
        };

        let mut request = self
            .http
            .post(&self.url)
            .header("Content-Type", JSON_CONTENT_TYPE)
            .header("Accept", JSON_AND_SSE_ACCEPT)
            .header(PROTOCOL_VERSION_HEADER, protocol_version)
            .body(payload);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        if let Some(session_id) = self
            .session_id
            .lock()
            .expect("session id lock poisoned")
            .clone()
        {
            request = request.header(SESSION_ID_HEADER, session_id);
        }

        let response = request.send().await.map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP error: {}", response.status()));
        }
        Ok(response)
    }

    pub(crate) async fn close(&self) {}
}

pub(crate) fn header_pairs(config: &ServerConfig) -> Vec<(String, String)> {
    config
        .headers
        .as_ref()
        .map(|headers| {
            headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default()
}

fn response_session_id(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(SESSION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

/// Reassembles SSE lines from arbitrarily chunked network reads.
#[derive(Default)]
pub(crate) struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        self.drain_lines(false)
    }

    pub fn finish(&mut self) -> Vec<String> {
        self.drain_lines(true)
    }

    fn drain_lines(&mut self, flush: bool) -> Vec<String> {
        let mut lines = Vec::new();
        let mut search_index = 0;

        while let Some(relative_pos) = self.buffer[search_index..].iter().position(|b| *b == b'\n')
        {
            let newline_index = search_index + relative_pos;
            let mut line_end = newline_index;
            if line_end > search_index && self.buffer[line_end - 1] == b'\r' {
                line_end -= 1;
            }

            let line_bytes = &self.buffer[search_index..line_end];
            if let Ok(text) = std::str::from_utf8(line_bytes) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    lines.push(trimmed.to_string());
                }
            }

            search_index = newline_index + 1;
        }

        if flush {
            if let Ok(text) = std::str::from_utf8(&self.buffer[search_index..]) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    lines.push(trimmed.to_string());
                }
            }
            self.buffer.clear();
        } else if search_index > 0 {
            self.buffer.drain(..search_index);
        }

        lines
    }
}

pub(crate) fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("text/event-stream"))
}

pub(crate) fn sse_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

pub(crate) fn sse_event_name(line: &str) -> Option<&str> {
    line.strip_prefix("event:").map(str::trim)
}

/// Reads an event stream until the first response or error message; other
/// messages on the stream are ignored.
pub(crate) async fn next_sse_server_message(
    response: reqwest::Response,
) -> Result<ServerMessage, String> {
    let mut stream = response.bytes_stream();
    let mut buffer = SseLineBuffer::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| err.to_string())?;
        for line in buffer.push(&chunk) {
            if let Some(message) = decode_sse_line(&line)? {
                return Ok(message);
            }
        }
    }

    for line in buffer.finish() {
        if let Some(message) = decode_sse_line(&line)? {
            return Ok(message);
        }
    }

    Err("Empty event-stream response.".to_string())
}

fn decode_sse_line(line: &str) -> Result<Option<ServerMessage>, String> {
    let Some(payload) = sse_data_payload(line) else {
        return Ok(None);
    };
    if payload.is_empty() {
        return Ok(None);
    }

    let message =
        serde_json::from_str::<ServerMessage>(payload).map_err(|err| err.to_string())?;
    match message {
        ServerMessage::Response(_) | ServerMessage::Error(_) => Ok(Some(message)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_line_buffer_handles_chunk_boundaries() {
        let mut buffer = SseLineBuffer::default();
        assert_eq!(buffer.push(b"data: one\n\n"), vec!["data: one"]);
        assert_eq!(buffer.push(b"data: t"), Vec::<String>::new());
        assert_eq!(buffer.push(b"wo\n"), vec!["data: two"]);
        assert_eq!(buffer.finish(), Vec::<String>::new());
    }

    #[test]
    fn detects_event_stream_content_type() {
        assert!(is_event_stream_content_type(
            "text/event-stream; charset=utf-8"
        ));
        assert!(is_event_stream_content_type("Text/Event-Stream"));
        assert!(!is_event_stream_content_type("application/json"));
    }

    #[test]
    fn extracts_sse_fields() {
        assert_eq!(sse_data_payload("data: {\"id\":1}"), Some("{\"id\":1}"));
        assert_eq!(sse_data_payload("event: ping"), None);
        assert_eq!(sse_event_name("event: endpoint"), Some("endpoint"));
        assert_eq!(sse_event_name("data: x"), None);
    }
}
