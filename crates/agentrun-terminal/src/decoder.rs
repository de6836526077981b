//! Decoding of batch-mode agent responses
//!
//! A batch run prints one JSON envelope on stdout (`--output-format json`
//! style). It is only looked at once the process has exited.

use agentrun_types::ProcessEvent;
use serde_json::Value;

/// Fields extracted from a batch response envelope
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchResponse {
    pub result: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("empty batch response")]
    Empty,
    #[error("batch response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse the accumulated stdout of a finished batch run
///
/// Both fields are optional. A non-string `result` is rendered as compact JSON.
/// Only a buffer with no bytes at all counts as empty; whitespace is not JSON.
pub fn decode_batch_response(buffer: &str) -> Result<BatchResponse, DecodeError> {
    if buffer.is_empty() {
        return Err(DecodeError::Empty);
    }

    let value: Value = serde_json::from_str(buffer)?;

    let result = value.get("result").and_then(|v| match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    });

    let session_id = value
        .get("session_id")
        .or_else(|| value.get("sessionId"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(BatchResponse { result, session_id })
}

/// Events for a finished batch run, in emission order
///
/// `data` (decoded result, or the raw buffer when decoding fails), then the
/// resumable id when one was captured, then `exit`.
pub fn batch_exit_events(session_id: &str, buffer: &str, code: i32) -> Vec<ProcessEvent> {
    let mut events = Vec::with_capacity(3);

    match decode_batch_response(buffer) {
        Ok(response) => {
            if let Some(result) = response.result {
                events.push(ProcessEvent::data(session_id, result));
            }
            if let Some(captured) = response.session_id {
                events.push(ProcessEvent::captured_session(session_id, captured));
            }
        }
        Err(DecodeError::Empty) => {}
        Err(e) => {
            log::debug!("[{}] batch response fell back to raw text: {}", session_id, e);
            events.push(ProcessEvent::data(session_id, buffer));
        }
    }

    events.push(ProcessEvent::exit(session_id, code));
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_result_and_session_id() {
        let response =
            decode_batch_response(r#"{"type":"result","result":"hi there","session_id":"abc123"}"#)
                .unwrap();
        assert_eq!(response.result.as_deref(), Some("hi there"));
        assert_eq!(response.session_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn fields_are_optional() {
        let response = decode_batch_response(r#"{"is_error":false}"#).unwrap();
        assert_eq!(response, BatchResponse::default());
    }

    #[test]
    fn accepts_camel_case_session_id() {
        let response = decode_batch_response(r#"{"result":"ok","sessionId":"s-9"}"#).unwrap();
        assert_eq!(response.session_id.as_deref(), Some("s-9"));
    }

    #[test]
    fn non_string_result_is_rendered_as_json() {
        let response = decode_batch_response(r#"{"result":{"answer":42}}"#).unwrap();
        assert_eq!(response.result.as_deref(), Some(r#"{"answer":42}"#));
    }

    #[test]
    fn malformed_and_partial_json_fail() {
        assert!(matches!(decode_batch_response("not json"), Err(DecodeError::Json(_))));
        assert!(matches!(
            decode_batch_response(r#"{"result":"trunc"#),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(decode_batch_response("  \n"), Err(DecodeError::Json(_))));
        assert!(matches!(decode_batch_response(""), Err(DecodeError::Empty)));
    }

    #[test]
    fn exit_events_for_valid_envelope() {
        let events = batch_exit_events("s1", r#"{"result":"hi there","session_id":"abc123"}"#, 0);
        assert_eq!(
            events,
            vec![
                ProcessEvent::data("s1", "hi there"),
                ProcessEvent::captured_session("s1", "abc123"),
                ProcessEvent::exit("s1", 0),
            ]
        );
    }

    #[test]
    fn exit_events_fall_back_to_raw_buffer() {
        let events = batch_exit_events("s1", "not json", 1);
        assert_eq!(
            events,
            vec![ProcessEvent::data("s1", "not json"), ProcessEvent::exit("s1", 1)]
        );
    }

    #[test]
    fn whitespace_buffer_is_emitted_verbatim() {
        assert_eq!(
            batch_exit_events("w", "\n  \n", 0),
            vec![ProcessEvent::data("w", "\n  \n"), ProcessEvent::exit("w", 0)]
        );
    }

    #[test]
    fn envelope_with_surrounding_newlines_still_decodes() {
        let response = decode_batch_response("\n{\"result\":\"ok\"}\n").unwrap();
        assert_eq!(response.result.as_deref(), Some("ok"));
    }

    #[test]
    fn empty_buffer_only_exits() {
        assert_eq!(batch_exit_events("s1", "", 2), vec![ProcessEvent::exit("s1", 2)]);
    }
}
