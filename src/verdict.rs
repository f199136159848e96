//! The per-rule outcome record produced by the executor and consumed by the
//! aggregator and reporters.

use serde::Serialize;

/// The final outcome for one rule. `violations` is populated whenever the
/// check actually executed against the engine; it is `None` only when the
/// rule was skipped before any SQL ran, or when compilation/execution
/// failed.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub rule_id:    String,
    pub ok:         bool,
    pub skipped:    bool,
    pub violations: Option<i64>,
    pub check_type: String,
    pub message:    String,
    pub reason:     Option<String>,
    pub error:      Option<String>
}

impl Verdict {
    pub fn skip(rule_id: impl Into<String>, check_type: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            rule_id: rule_id.into(),
            ok: true,
            skipped: true,
            violations: Some(0),
            check_type: check_type.into(),
            message: reason.clone(),
            reason: Some(reason),
            error: None
        }
    }

    pub fn passed(rule_id: impl Into<String>, check_type: impl Into<String>, violations: i64) -> Self {
        Self {
            rule_id: rule_id.into(),
            ok: violations == 0,
            skipped: false,
            violations: Some(violations),
            check_type: check_type.into(),
            message: if violations == 0 {
                "passed".to_string()
            } else {
                format!("{violations} violation(s)")
            },
            reason: None,
            error: None
        }
    }

    pub fn errored(rule_id: impl Into<String>, check_type: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            rule_id: rule_id.into(),
            ok: false,
            skipped: false,
            violations: None,
            check_type: check_type.into(),
            message: error.to_string(),
            reason: None,
            error: Some(error.to_string())
        }
    }
}
