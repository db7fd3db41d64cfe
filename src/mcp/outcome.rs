//! Classifies heterogeneous tool-call responses into a uniform outcome.
//!
//! Servers encode "this tool failed" three different ways: a protocol-level
//! `isError` flag, JSON text content carrying a `status` field, or plain
//! text starting with "error". The explicit flag always wins; the text and
//! JSON sniffing are fallbacks for servers that never set it.

use base64::Engine;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success,
    /// The tool ran and reported a logical failure inside a structurally
    /// successful response.
    ToolFailure,
    /// The call itself could not complete: no session, broken channel, or a
    /// protocol-level error.
    TransportError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeContent {
    Text(String),
    StructuredJson(Value),
    Image { data: Vec<u8>, mime_type: String },
    Raw(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvocationOutcome {
    pub status: OutcomeStatus,
    pub content: OutcomeContent,
}

impl InvocationOutcome {
    pub fn transport_error(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::TransportError,
            content: OutcomeContent::Text(message.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status != OutcomeStatus::Success
    }
}

/// Maps a raw call result (or transport failure) to a classified outcome.
pub fn classify_call_result(result: Result<Value, String>) -> InvocationOutcome {
    let value = match result {
        Ok(value) => value,
        Err(message) => return InvocationOutcome::transport_error(message),
    };

    let flagged = value
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if let Some(entry) = value
        .get("content")
        .and_then(Value::as_array)
        .and_then(|content| content.first())
    {
        let (heuristic_failure, content) = classify_content_entry(entry);
        let status = if flagged || heuristic_failure {
            OutcomeStatus::ToolFailure
        } else {
            OutcomeStatus::Success
        };
        return InvocationOutcome { status, content };
    }

    let status = if flagged || has_error_status(&value) {
        OutcomeStatus::ToolFailure
    } else {
        OutcomeStatus::Success
    };
    InvocationOutcome {
        status,
        content: OutcomeContent::Raw(value),
    }
}

fn classify_content_entry(entry: &Value) -> (bool, OutcomeContent) {
    if let (Some(data), Some(mime_type)) = (
        entry.get("data").and_then(Value::as_str),
        entry.get("mimeType").and_then(Value::as_str),
    ) {
        return match base64::engine::general_purpose::STANDARD.decode(data) {
            Ok(bytes) => (
                false,
                OutcomeContent::Image {
                    data: bytes,
                    mime_type: mime_type.to_string(),
                },
            ),
            Err(_) => (false, OutcomeContent::Raw(entry.clone())),
        };
    }

    if let Some(text) = entry.get("text").and_then(Value::as_str) {
        return match serde_json::from_str::<Value>(text) {
            Ok(parsed) => {
                let failed = has_error_status(&parsed);
                (failed, OutcomeContent::StructuredJson(parsed))
            }
            Err(_) => {
                let failed = leading_word_is_error(text);
                (failed, OutcomeContent::Text(text.to_string()))
            }
        };
    }

    (false, OutcomeContent::Raw(entry.clone()))
}

fn has_error_status(value: &Value) -> bool {
    value
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|status| status.eq_ignore_ascii_case("error"))
}

fn leading_word_is_error(text: &str) -> bool {
    text.split_whitespace()
        .next()
        .map(|word| word.trim_end_matches(':'))
        .is_some_and(|word| word.eq_ignore_ascii_case("error"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn explicit_flag_wins_over_json_success_status() {
        let outcome = classify_call_result(Ok(json!({
            "isError": true,
            "content": [{ "type": "text", "text": "{\"status\":\"success\"}" }]
        })));

        assert_eq!(outcome.status, OutcomeStatus::ToolFailure);
        assert_eq!(
            outcome.content,
            OutcomeContent::StructuredJson(json!({ "status": "success" }))
        );
    }

    #[test]
    fn json_text_with_error_status_is_a_tool_failure() {
        let outcome = classify_call_result(Ok(json!({
            "content": [{ "type": "text", "text": "{\"status\":\"error\"}" }]
        })));

        assert_eq!(outcome.status, OutcomeStatus::ToolFailure);
        assert!(matches!(
            outcome.content,
            OutcomeContent::StructuredJson(_)
        ));
    }

    #[test]
    fn json_status_check_is_case_insensitive() {
        let outcome = classify_call_result(Ok(json!({
            "content": [{ "type": "text", "text": "{\"status\":\"ERROR\"}" }]
        })));

        assert_eq!(outcome.status, OutcomeStatus::ToolFailure);
    }

    #[test]
    fn plain_text_with_leading_error_word_is_a_tool_failure() {
        let outcome = classify_call_result(Ok(json!({
            "content": [{ "type": "text", "text": "Error: file not found" }]
        })));

        assert_eq!(outcome.status, OutcomeStatus::ToolFailure);
        assert_eq!(
            outcome.content,
            OutcomeContent::Text("Error: file not found".to_string())
        );
    }

    #[test]
    fn plain_text_mentioning_error_later_is_a_success() {
        let outcome = classify_call_result(Ok(json!({
            "content": [{ "type": "text", "text": "No error occurred" }]
        })));

        assert_eq!(outcome.status, OutcomeStatus::Success);
    }

    #[test]
    fn image_content_decodes_and_keeps_the_mime_type() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"fake-png-bytes");
        let outcome = classify_call_result(Ok(json!({
            "content": [{ "type": "image", "data": encoded, "mimeType": "image/png" }]
        })));

        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(
            outcome.content,
            OutcomeContent::Image {
                data: b"fake-png-bytes".to_vec(),
                mime_type: "image/png".to_string()
            }
        );
    }

    #[test]
    fn undecodable_image_data_falls_back_to_raw() {
        let outcome = classify_call_result(Ok(json!({
            "content": [{ "type": "image", "data": "not base64!!!", "mimeType": "image/png" }]
        })));

        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert!(matches!(outcome.content, OutcomeContent::Raw(_)));
    }

    #[test]
    fn top_level_error_status_without_content_is_a_tool_failure() {
        let outcome = classify_call_result(Ok(json!({ "status": "error", "detail": "boom" })));

        assert_eq!(outcome.status, OutcomeStatus::ToolFailure);
        assert!(matches!(outcome.content, OutcomeContent::Raw(_)));
    }

    #[test]
    fn unrecognized_payload_is_a_raw_success() {
        let outcome = classify_call_result(Ok(json!({ "rows": [1, 2, 3] })));

        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(
            outcome.content,
            OutcomeContent::Raw(json!({ "rows": [1, 2, 3] }))
        );
    }

    #[test]
    fn empty_content_list_falls_through_to_the_status_check() {
        let outcome = classify_call_result(Ok(json!({ "content": [], "status": "error" })));

        assert_eq!(outcome.status, OutcomeStatus::ToolFailure);
    }

    #[test]
    fn transport_failure_carries_the_error_message() {
        let outcome = classify_call_result(Err("connection reset".to_string()));

        assert_eq!(outcome.status, OutcomeStatus::TransportError);
        assert_eq!(
            outcome.content,
            OutcomeContent::Text("connection reset".to_string())
        );
        assert!(outcome.is_failure());
    }

    #[test]
    fn flag_alone_fails_a_raw_payload() {
        let outcome = classify_call_result(Ok(json!({ "isError": true, "value": 7 })));

        assert_eq!(outcome.status, OutcomeStatus::ToolFailure);
    }
}
