// Structural sanitization of inbound ops. Payload semantics stay opaque;
// only the field set is constrained before hand-off to the orderer.

use chrono::Utc;
use serde_json::{Map, Value as JsonValue, json};

/// Ops of this type are latency probes. They are never forwarded; their
/// traces go to the metric sink instead.
pub const ROUND_TRIP_MESSAGE_TYPE: &str = "roundTrip";

const SANITIZED_FIELDS: &[&str] = &[
    "clientSequenceNumber",
    "contents",
    "metadata",
    "referenceSequenceNumber",
    "traces",
    "type",
];

const TRACE_SAMPLE_ONE_IN: u32 = 100;

pub fn is_round_trip(op: &JsonValue) -> bool {
    op.get("type").and_then(JsonValue::as_str) == Some(ROUND_TRIP_MESSAGE_TYPE)
}

/// Trace list of a round-trip probe, when it carries one.
pub fn round_trip_traces(op: &JsonValue) -> Option<&JsonValue> {
    op.get("traces").filter(|traces| traces.is_array())
}

/// Projects an inbound op onto the allowed field set; everything else is
/// dropped silently. One op in a hundred gets a relay trace span appended.
pub fn sanitize_operation(op: &JsonValue) -> JsonValue {
    sanitize_operation_with(op, || fastrand::u32(..TRACE_SAMPLE_ONE_IN) == 0)
}

fn sanitize_operation_with(op: &JsonValue, sample: impl FnOnce() -> bool) -> JsonValue {
    let mut projected = Map::new();
    if let JsonValue::Object(fields) = op {
        for key in SANITIZED_FIELDS {
            if let Some(value) = fields.get(*key) {
                projected.insert((*key).to_string(), value.clone());
            }
        }
    }

    if sample() {
        if let Some(JsonValue::Array(traces)) = projected.get_mut("traces") {
            traces.push(json!({
                "action": "start",
                "service": "alfred",
                "timestamp": Utc::now().timestamp_millis(),
            }));
        }
    }

    JsonValue::Object(projected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_op() -> JsonValue {
        json!({
            "clientSequenceNumber": 7,
            "contents": { "delta": "abc" },
            "metadata": { "flag": true },
            "referenceSequenceNumber": 3,
            "traces": [{ "action": "start", "service": "browser", "timestamp": 1 }],
            "type": "op",
            "origin": "should-be-dropped",
            "serverMetadata": { "secret": true },
        })
    }

    #[test]
    fn only_whitelisted_fields_survive() {
        let sanitized = sanitize_operation_with(&raw_op(), || false);
        let fields = sanitized.as_object().unwrap();

        assert_eq!(fields.len(), 6);
        assert!(fields.contains_key("clientSequenceNumber"));
        assert!(fields.contains_key("contents"));
        assert!(fields.contains_key("metadata"));
        assert!(fields.contains_key("referenceSequenceNumber"));
        assert!(fields.contains_key("traces"));
        assert!(fields.contains_key("type"));
        assert!(!fields.contains_key("origin"));
        assert!(!fields.contains_key("serverMetadata"));
    }

    #[test]
    fn missing_fields_are_not_invented() {
        let sanitized = sanitize_operation_with(&json!({ "type": "op" }), || false);
        let fields = sanitized.as_object().unwrap();
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn sampled_ops_gain_a_relay_trace_span() {
        let sanitized = sanitize_operation_with(&raw_op(), || true);
        let traces = sanitized["traces"].as_array().unwrap();
        assert_eq!(traces.len(), 2);

        let span = &traces[1];
        assert_eq!(span["action"], "start");
        assert_eq!(span["service"], "alfred");
        assert!(span["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn sampling_without_a_trace_array_is_a_no_op() {
        let sanitized = sanitize_operation_with(&json!({ "type": "op", "traces": 5 }), || true);
        assert_eq!(sanitized["traces"], 5);

        let sanitized = sanitize_operation_with(&json!({ "type": "op" }), || true);
        assert!(sanitized.get("traces").is_none());
    }

    #[test]
    fn round_trip_probes_are_recognized() {
        let probe = json!({ "type": "roundTrip", "traces": [{ "service": "browser" }] });
        assert!(is_round_trip(&probe));
        assert!(round_trip_traces(&probe).is_some());

        let probe_without_traces = json!({ "type": "roundTrip" });
        assert!(is_round_trip(&probe_without_traces));
        assert!(round_trip_traces(&probe_without_traces).is_none());

        assert!(!is_round_trip(&json!({ "type": "op" })));
    }
}
