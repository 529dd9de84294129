//! Step conditions over upstream outcomes

use crate::core::{context::PipelineContext, error::PipelineError};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Condition as written in the pipeline file
///
/// Exactly one of `contains`, `matches`, `equals` or `status` is set; this is
/// checked during validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionDefinition {
    /// Upstream step whose outcome is inspected
    pub step: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<String>,

    /// Upstream status label (`completed`, `failed`, `skipped`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Invert the result
    #[serde(default)]
    pub negate: bool,
}

/// Pattern for matching upstream output (not serializable due to Regex)
#[derive(Debug, Clone)]
pub enum ConditionPattern {
    /// Simple string contains match
    Contains(String),
    /// Regular expression match
    Regex(Regex),
    /// Exact match after trimming whitespace
    Equals(String),
    /// Match on the upstream status label
    Status(String),
}

/// Compiled condition
#[derive(Debug, Clone)]
pub struct Condition {
    pub step: String,
    pub pattern: ConditionPattern,
    pub negate: bool,
}

impl Condition {
    /// Compile a condition definition
    pub fn compile(definition: &ConditionDefinition) -> Result<Self, PipelineError> {
        let pattern = if let Some(text) = &definition.contains {
            ConditionPattern::Contains(text.clone())
        } else if let Some(pattern) = &definition.matches {
            let regex = Regex::new(pattern).map_err(|e| {
                PipelineError::Validation(format!("invalid regex '{}': {}", pattern, e))
            })?;
            ConditionPattern::Regex(regex)
        } else if let Some(text) = &definition.equals {
            ConditionPattern::Equals(text.clone())
        } else if let Some(status) = &definition.status {
            ConditionPattern::Status(status.to_lowercase())
        } else {
            return Err(PipelineError::Validation(format!(
                "condition on '{}' has no predicate",
                definition.step
            )));
        };

        Ok(Self {
            step: definition.step.clone(),
            pattern,
            negate: definition.negate,
        })
    }

    /// Evaluate against the recorded outcomes
    ///
    /// A step with no recorded outcome never satisfies a positive predicate.
    pub fn evaluate(&self, context: &PipelineContext) -> bool {
        let result = match context.outcome(&self.step) {
            Some(outcome) => match &self.pattern {
                ConditionPattern::Contains(text) => outcome.output.contains(text.as_str()),
                ConditionPattern::Regex(regex) => regex.is_match(&outcome.output),
                ConditionPattern::Equals(text) => outcome.output.trim() == text.trim(),
                ConditionPattern::Status(status) => outcome.status == *status,
            },
            None => false,
        };

        result != self.negate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_with(step: &str, status: &str, output: &str) -> PipelineContext {
        let mut context = PipelineContext::new();
        context.record_outcome(step, status, output);
        context
    }

    fn definition(step: &str) -> ConditionDefinition {
        ConditionDefinition {
            step: step.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_contains_condition() {
        let condition = Condition::compile(&ConditionDefinition {
            contains: Some("APPROVED".to_string()),
            ..definition("review")
        })
        .unwrap();

        assert!(condition.evaluate(&context_with("review", "completed", "Result: APPROVED")));
        assert!(!condition.evaluate(&context_with("review", "completed", "Result: REJECTED")));
    }

    #[test]
    fn test_regex_condition() {
        let condition = Condition::compile(&ConditionDefinition {
            matches: Some(r"coverage:\s*9\d%".to_string()),
            ..definition("test")
        })
        .unwrap();

        assert!(condition.evaluate(&context_with("test", "completed", "coverage: 93%")));
        assert!(!condition.evaluate(&context_with("test", "completed", "coverage: 42%")));
    }

    #[test]
    fn test_status_condition_with_negate() {
        let condition = Condition::compile(&ConditionDefinition {
            status: Some("Failed".to_string()),
            negate: true,
            ..definition("lint")
        })
        .unwrap();

        assert!(condition.evaluate(&context_with("lint", "completed", "")));
        assert!(!condition.evaluate(&context_with("lint", "failed", "")));
    }

    #[test]
    fn test_missing_outcome_is_false() {
        let condition = Condition::compile(&ConditionDefinition {
            equals: Some("yes".to_string()),
            ..definition("absent")
        })
        .unwrap();

        assert!(!condition.evaluate(&PipelineContext::new()));
    }

    #[test]
    fn test_condition_without_predicate_is_rejected() {
        assert!(Condition::compile(&definition("a")).is_err());
    }
}
