use crate::core::config::data::ServerConfig;
use rust_mcp_schema::schema_utils::ServerMessage;
use rust_mcp_schema::{InitializeResult, RpcError, LATEST_PROTOCOL_VERSION};
use serde_json::Value;

pub(crate) fn requested_protocol_version(config: &ServerConfig) -> String {
    config
        .protocol_version
        .clone()
        .unwrap_or_else(|| LATEST_PROTOCOL_VERSION.to_string())
}

pub(crate) fn parse_initialize_result(message: ServerMessage) -> Result<InitializeResult, String> {
    let value = parse_response_value(message)?;
    let result =
        serde_json::from_value::<InitializeResult>(value).map_err(|err| err.to_string())?;
    if result.protocol_version.trim().is_empty() {
        return Err("Unexpected initialize response.".to_string());
    }
    Ok(result)
}

/// One page of a tool listing, kept at the Value level so the normalizer can
/// work with whatever schema shapes the server sent.
pub(crate) struct ToolListPage {
    pub tools: Vec<Value>,
    pub next_cursor: Option<String>,
}

pub(crate) fn parse_tool_list_page(message: ServerMessage) -> Result<ToolListPage, String> {
    let value = parse_response_value(message)?;
    let tools = match value.get("tools") {
        Some(Value::Array(tools)) => tools.clone(),
        Some(other) => {
            return Err(format!("Unexpected tools listing shape: {other}"));
        }
        None => Vec::new(),
    };
    let next_cursor = value
        .get("nextCursor")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(ToolListPage { tools, next_cursor })
}

pub(crate) fn parse_response_value(message: ServerMessage) -> Result<Value, String> {
    match message {
        ServerMessage::Response(response) => {
            serde_json::to_value(&response.result).map_err(|err| err.to_string())
        }
        ServerMessage::Error(error) => Err(format_rpc_error(&error.error)),
        other => Err(format_unexpected_server_message(&other)),
    }
}

pub(crate) fn format_unexpected_server_message(message: &ServerMessage) -> String {
    format!("Unexpected server message: {message:?}")
}

pub(crate) fn format_rpc_error(error: &RpcError) -> String {
    let mut output = format!("Server error {}: {}", error.code, error.message);
    if let Some(data) = &error.data {
        let details = data
            .get("details")
            .and_then(|value| value.as_str())
            .map(|value| value.to_string())
            .or_else(|| data.as_str().map(|value| value.to_string()))
            .or_else(|| serde_json::to_string_pretty(data).ok());

        if let Some(details) = details {
            if !details.is_empty() {
                output.push('\n');
                output.push_str(&details);
            }
        }
    }
    output
}
