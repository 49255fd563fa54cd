//! Structured outcome of one execution call.

use crate::error::{ErrorKind, Fault};
use crate::validate::ValidationOutcome;
use serde::{Deserialize, Serialize};

/// What the caller gets back from every execution call.
///
/// On failure `error` reads `"<Kind>: <message>"` and `error_kind` holds
/// the kind; `output` keeps whatever was printed before the failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ExecutionResult {
    pub fn success(output: String, last_value: Option<String>) -> Self {
        Self {
            success: true,
            output,
            error: None,
            last_value,
            error_kind: None,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl AsRef<str>, output: String) -> Self {
        Self {
            success: false,
            output,
            error: Some(format!("{kind}: {}", message.as_ref())),
            last_value: None,
            error_kind: Some(kind),
        }
    }

    /// Result for source the validator refused; nothing ran.
    ///
    /// Returns `None` when `outcome` is [`ValidationOutcome::Ok`].
    pub fn rejected(outcome: &ValidationOutcome) -> Option<Self> {
        match outcome {
            ValidationOutcome::Ok => None,
            ValidationOutcome::Rejected { rule_id, matched_text } => Some(Self::failure(
                ErrorKind::ValidationRejected,
                format!("rule '{rule_id}' matched '{matched_text}'"),
                String::new(),
            )),
        }
    }

    /// Whether the call failed with `kind`.
    #[must_use]
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.error_kind == Some(kind)
    }
}

impl From<(Fault, String)> for ExecutionResult {
    fn from((fault, output): (Fault, String)) -> Self {
        Self::failure(fault.kind, fault.message, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_serializes_camel_case_without_empty_fields() {
        let result = ExecutionResult::success("84".into(), Some("84".into()));
        let json = serde_json::to_value(&result).expect("serialize");
        assert_eq!(json["success"], true);
        assert_eq!(json["lastValue"], "84");
        assert!(json.get("error").is_none());
        assert!(json.get("errorKind").is_none());
    }

    #[test]
    fn failure_prefixes_kind() {
        let result = ExecutionResult::failure(ErrorKind::AccessDenied, "nope", "partial".into());
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("AccessDenied: nope"));
        assert_eq!(result.output, "partial");
        assert!(result.is(ErrorKind::AccessDenied));

        let json = serde_json::to_value(&result).expect("serialize");
        assert_eq!(json["errorKind"], "AccessDenied");
    }

    #[test]
    fn rejected_only_for_rejections() {
        assert!(ExecutionResult::rejected(&ValidationOutcome::Ok).is_none());
        let outcome = ValidationOutcome::Rejected {
            rule_id: "proc-os-execute".into(),
            matched_text: "os.execute".into(),
        };
        let result = ExecutionResult::rejected(&outcome).expect("rejection result");
        assert!(result.is(ErrorKind::ValidationRejected));
        assert!(result.error.as_deref().is_some_and(|e| e.contains("proc-os-execute")));
    }
}
