//! Engine output protocol: diagnostic lines followed by one JSON line.

use crate::error::EngineError;
use crate::types::{EngineResponse, LpaPayload};
use serde::de::DeserializeOwned;

/// Split stdout into `(diagnostic lines, trailing line)`.
///
/// Surrounding whitespace is dropped first; `\n`, `\r\n` and bare `\r` all
/// end a line.
pub fn split_output(stdout: &str) -> (Vec<&str>, &str) {
    let mut lines: Vec<&str> = stdout
        .trim()
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .flat_map(|l| l.split('\r'))
        .collect();
    let last = lines.pop().unwrap_or_default();
    (lines, last)
}

/// Parse the trailing line as `{ type, payload }`.
pub fn parse_response(line: &str) -> Result<EngineResponse, EngineError> {
    serde_json::from_str(line).map_err(|e| EngineError::Parse {
        line: line.to_string(),
        reason: e.to_string(),
    })
}

/// Narrow an untyped payload into `T`.
pub fn narrow<T: DeserializeOwned>(payload: serde_json::Value) -> Result<T, EngineError> {
    let line = payload.to_string();
    serde_json::from_value(payload).map_err(|e| EngineError::Parse {
        line,
        reason: e.to_string(),
    })
}

/// Narrow to an `lpa` payload and require `message == "success"`.
pub fn expect_success(payload: serde_json::Value) -> Result<LpaPayload, EngineError> {
    let lpa: LpaPayload = narrow(payload)?;
    if !lpa.is_success() {
        return Err(EngineError::Rejected {
            code: lpa.code.unwrap_or(-1),
            message: lpa.message,
        });
    }
    Ok(lpa)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_mixed_newlines() {
        let (diag, last) = split_output("a\r\nb\rc\n{\"x\":1}\n");
        assert_eq!(diag, vec!["a", "b", "c"]);
        assert_eq!(last, "{\"x\":1}");
    }

    #[test]
    fn test_split_single_line() {
        let (diag, last) = split_output("  {\"type\":\"lpa\"}  ");
        assert!(diag.is_empty());
        assert_eq!(last, "{\"type\":\"lpa\"}");
    }

    #[test]
    fn test_split_empty_output() {
        let (diag, last) = split_output("\n\n");
        assert!(diag.is_empty());
        assert_eq!(last, "");
    }

    #[test]
    fn test_parse_response_ok() {
        let r = parse_response(r#"{"type":"driver","payload":{"LPAC_APDU":[]}}"#).unwrap();
        assert_eq!(r.kind, "driver");
        assert_eq!(r.payload, json!({ "LPAC_APDU": [] }));
    }

    #[test]
    fn test_parse_response_rejects_garbage() {
        let err = parse_response("not json").unwrap_err();
        assert!(matches!(err, EngineError::Parse { ref line, .. } if line == "not json"));
    }

    #[test]
    fn test_parse_response_requires_payload() {
        let err = parse_response(r#"{"type":"lpa"}"#).unwrap_err();
        assert!(matches!(err, EngineError::Parse { .. }));
    }

    #[test]
    fn test_expect_success() {
        let ok = expect_success(json!({ "code": 0, "message": "success", "data": null })).unwrap();
        assert_eq!(ok.code, Some(0));

        let err = expect_success(json!({ "code": -1, "message": "es10c_enable_profile", "data": null }))
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Rejected {
                code: -1,
                message: "es10c_enable_profile".into()
            }
        );
    }

    #[test]
    fn test_narrow_shape_mismatch() {
        let err = narrow::<LpaPayload>(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, EngineError::Parse { .. }));
    }
}
