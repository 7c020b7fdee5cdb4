//! JSON Schema contracts for oracle output.

use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use jsonschema::{Validator, validator_for};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::SchemaValidationError;

const WORK_ITEM_SCHEMA: &str = include_str!("../../schemas/work_item.schema.json");
const REFINEMENT_SCHEMA: &str = include_str!("../../schemas/refinement.schema.json");

static WORK_ITEM: LazyLock<OutputSchema> = LazyLock::new(|| {
    OutputSchema::compile("work_item", WORK_ITEM_SCHEMA)
        .expect("work item schema should be valid")
});

static REFINEMENT: LazyLock<OutputSchema> = LazyLock::new(|| {
    OutputSchema::compile("refinement", REFINEMENT_SCHEMA)
        .expect("refinement schema should be valid")
});

/// A compiled schema plus its JSON document.
pub struct OutputSchema {
    name: &'static str,
    value: Value,
    validator: Validator,
}

impl std::fmt::Debug for OutputSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSchema")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl OutputSchema {
    /// Schema for a drafted work item.
    pub fn work_item() -> &'static OutputSchema {
        &WORK_ITEM
    }

    /// Schema for a refinement pass (refined draft plus verdict).
    pub fn refinement() -> &'static OutputSchema {
        &REFINEMENT
    }

    pub fn compile(name: &'static str, source: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(source).map_err(|err| anyhow!("parse {name} schema: {err}"))?;
        let validator =
            validator_for(&value).map_err(|err| anyhow!("invalid {name} schema: {err}"))?;
        Ok(Self {
            name,
            value,
            validator,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Parse raw oracle text, validate it and deserialize it into `T`.
    ///
    /// A surrounding markdown code fence is tolerated.
    pub fn parse<T: DeserializeOwned>(&self, raw: &str) -> Result<T, SchemaValidationError> {
        let text = strip_code_fence(raw.trim());
        if text.is_empty() {
            return Err(SchemaValidationError::MissingOutput);
        }
        let value: Value = serde_json::from_str(text)
            .map_err(|err| SchemaValidationError::Parse(err.to_string()))?;
        let violations: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect();
        if !violations.is_empty() {
            return Err(SchemaValidationError::Violations(violations));
        }
        serde_json::from_value(value).map_err(|err| SchemaValidationError::Shape(err.to_string()))
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => return text,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::WorkItemDraft;

    const VALID: &str = r#"{
        "title": "Add endpoint",
        "description": "Expose orders.",
        "acceptance_criteria": ["GET /orders returns JSON"],
        "estimate": null,
        "metadata": {"feature_id": "F-1"}
    }"#;

    #[test]
    fn embedded_schemas_compile() {
        assert_eq!(OutputSchema::work_item().name(), "work_item");
        assert_eq!(OutputSchema::refinement().name(), "refinement");
        assert!(OutputSchema::work_item().value().is_object());
    }

    #[test]
    fn parses_valid_draft() {
        let draft: WorkItemDraft = OutputSchema::work_item().parse(VALID).expect("parse");
        assert_eq!(draft.title, "Add endpoint");
        assert_eq!(draft.acceptance_criteria.len(), 1);
        assert_eq!(draft.estimate, None);
    }

    #[test]
    fn tolerates_code_fences() {
        let fenced = format!("```json\n{VALID}\n```");
        let draft: WorkItemDraft = OutputSchema::work_item().parse(&fenced).expect("parse");
        assert_eq!(draft.title, "Add endpoint");
    }

    #[test]
    fn classifies_failures() {
        let schema = OutputSchema::work_item();
        assert_eq!(
            schema.parse::<WorkItemDraft>("  ").unwrap_err(),
            SchemaValidationError::MissingOutput
        );
        assert!(matches!(
            schema.parse::<WorkItemDraft>("{not json").unwrap_err(),
            SchemaValidationError::Parse(_)
        ));
        let missing_criteria = r#"{"title": "t", "description": "d", "estimate": null, "metadata": {}}"#;
        assert!(matches!(
            schema.parse::<WorkItemDraft>(missing_criteria).unwrap_err(),
            SchemaValidationError::Violations(_)
        ));
    }
}
