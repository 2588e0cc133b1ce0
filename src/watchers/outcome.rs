//! Batch result extraction
//!
//! Batch targets return results of unknown shape. Extraction attempts a
//! tolerant decode into a structured outcome; anything undecodable falls
//! back to "full success" rather than failing the wrapped call.

use crate::entry::OutcomeStatus;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct RawOutcome {
    #[serde(alias = "successful", alias = "success")]
    processed: Option<u64>,
    failed: Option<u64>,
    errors: Option<Vec<Value>>,
}

/// Decoded outcome of a batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub processed: u64,
    pub failed: u64,
    pub errors: Vec<String>,
}

impl BatchOutcome {
    /// Decode a successful result. A JSON record is read for explicit
    /// `processed`/`successful`/`success`, `failed`, and `errors` fields;
    /// any other shape means the target reported nothing structured and
    /// the whole input is assumed processed.
    pub fn from_result(result: &Value, total_items: u64) -> Self {
        if !result.is_object() {
            return Self::assume_success(total_items);
        }

        match serde_json::from_value::<RawOutcome>(result.clone()) {
            Ok(raw) => Self {
                processed: raw.processed.unwrap_or(total_items),
                failed: raw.failed.unwrap_or(0),
                errors: raw
                    .errors
                    .unwrap_or_default()
                    .into_iter()
                    .map(stringify)
                    .collect(),
            },
            Err(_) => Self::assume_success(total_items),
        }
    }

    /// Outcome for a call that raised: nothing processed, everything failed.
    pub fn from_failure(error: String, total_items: u64) -> Self {
        Self {
            processed: 0,
            failed: total_items,
            errors: vec![error],
        }
    }

    fn assume_success(total_items: u64) -> Self {
        Self {
            processed: total_items,
            failed: 0,
            errors: Vec::new(),
        }
    }

    pub fn status(&self) -> OutcomeStatus {
        if self.failed == 0 {
            OutcomeStatus::Completed
        } else if self.processed > 0 {
            OutcomeStatus::Partial
        } else {
            OutcomeStatus::Failed
        }
    }
}

fn stringify(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_structured_record_is_read() {
        let outcome = BatchOutcome::from_result(&json!({"processed": 10, "failed": 0}), 5);
        assert_eq!(outcome.processed, 10);
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.status(), OutcomeStatus::Completed);
    }

    #[test]
    fn test_partial_when_some_failed() {
        let outcome = BatchOutcome::from_result(&json!({"processed": 8, "failed": 2}), 10);
        assert_eq!(outcome.status(), OutcomeStatus::Partial);
    }

    #[test]
    fn test_all_failed() {
        let outcome = BatchOutcome::from_result(&json!({"processed": 0, "failed": 3}), 3);
        assert_eq!(outcome.status(), OutcomeStatus::Failed);
    }

    #[test]
    fn test_non_record_result_assumes_full_success() {
        let outcome = BatchOutcome::from_result(&json!("ok"), 5);
        assert_eq!(outcome.processed, 5);
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.status(), OutcomeStatus::Completed);
    }

    #[test]
    fn test_aliases() {
        let outcome = BatchOutcome::from_result(&json!({"successful": 4}), 4);
        assert_eq!(outcome.processed, 4);

        let outcome = BatchOutcome::from_result(&json!({"success": 2, "failed": 1}), 3);
        assert_eq!(outcome.processed, 2);
        assert_eq!(outcome.status(), OutcomeStatus::Partial);
    }

    #[test]
    fn test_undecodable_record_falls_back_to_defaults() {
        // wrong types inside a record shape must not break extraction
        let outcome = BatchOutcome::from_result(&json!({"processed": "many"}), 7);
        assert_eq!(outcome.processed, 7);
        assert_eq!(outcome.failed, 0);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn test_failure_outcome() {
        let outcome = BatchOutcome::from_failure("boom".to_string(), 3);
        assert_eq!(outcome.processed, 0);
        assert_eq!(outcome.failed, 3);
        assert_eq!(outcome.errors, vec!["boom".to_string()]);
        assert_eq!(outcome.status(), OutcomeStatus::Failed);
    }

    #[test]
    fn test_error_values_are_stringified() {
        let outcome = BatchOutcome::from_result(
            &json!({"processed": 1, "failed": 1, "errors": ["bad row", {"row": 7}]}),
            2,
        );
        assert_eq!(outcome.errors[0], "bad row");
        assert_eq!(outcome.errors[1], "{\"row\":7}");
    }
}
