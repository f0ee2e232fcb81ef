//! Structured-output schema and permissive coercion
//!
//! The model is asked for a JSON document with a `project_summary` string and
//! a `findings` array. Untrusted output is coerced, never trusted: unknown
//! severities fall back to `Note`, unknown categories to `Code Quality`, and
//! an object-valued summary is flattened into a string. Given the same raw
//! content the coerced output is deterministic.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sourcelens_core::model::Severity;

/// Finding categories the report UI understands
pub const KNOWN_CATEGORIES: &[&str] = &[
    "Security",
    "Performance",
    "Code Quality",
    "Architecture",
    "Logic",
    "Lifecycle",
];

/// Default category for unknown labels
pub const DEFAULT_CATEGORY: &str = "Code Quality";

/// The serialization contract sent to the model
pub const FORMAT_INSTRUCTIONS: &str = r#"Reply with a single JSON object and nothing else:
{
  "project_summary": "<two-paragraph summary of the analysis>",
  "findings": [
    {
      "file_path": "<repository-relative path>",
      "line_start": <number>,
      "line_end": <number>,
      "severity": "Error" | "Warning" | "Note" | "Info",
      "category": "Security" | "Performance" | "Code Quality" | "Architecture" | "Logic" | "Lifecycle",
      "message": "<what is wrong>",
      "suggestion": "<how to fix it>",
      "finding_type": "<short machine tag>"
    }
  ]
}"#;

/// One structured finding after coercion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StructuredFinding {
    /// Repository-relative path
    pub file_path: String,
    /// First affected line
    pub line_start: usize,
    /// Last affected line
    pub line_end: usize,
    /// Coerced severity
    pub severity: Severity,
    /// Coerced category
    pub category: String,
    /// The observation
    pub message: String,
    /// Suggested remediation
    pub suggestion: String,
    /// Producer-defined tag
    pub finding_type: String,
}

/// The validated analysis document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisOutput {
    /// Overall summary text
    pub project_summary: String,
    /// Structured findings
    pub findings: Vec<StructuredFinding>,
}

/// Outcome of a validation attempt
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    /// The coerced document
    pub output: AnalysisOutput,
    /// Non-fatal coercion notes ("severity 'critical' coerced to Note", ...)
    pub warnings: Vec<String>,
}

/// Validate raw model output against the schema.
///
/// Tries a strict JSON parse first; if the reply wraps the document in prose,
/// the first balanced `{...}` block is extracted and retried. `Err` carries a
/// parsing error suitable for the repair prompt.
pub fn validate(raw: &str) -> Result<ValidationOutcome, String> {
    let value = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value) => value,
        Err(first_err) => {
            let candidate = extract_json_object(raw)
                .ok_or_else(|| format!("no JSON object found in reply: {first_err}"))?;
            serde_json::from_str::<Value>(&candidate)
                .map_err(|e| format!("embedded JSON object does not parse: {e}"))?
        }
    };
    coerce(value)
}

/// First balanced top-level `{...}` block in free-form text
pub fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn coerce(value: Value) -> Result<ValidationOutcome, String> {
    let Value::Object(map) = value else {
        return Err("top-level JSON value is not an object".to_string());
    };
    let mut warnings = Vec::new();

    let project_summary = match map.get("project_summary") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(obj)) => {
            warnings.push("project_summary was an object, flattened to string".to_string());
            flatten_summary_object(obj)
        }
        Some(other) => {
            warnings.push(format!(
                "project_summary had unexpected type, stringified: {}",
                type_name(other)
            ));
            other.to_string()
        }
        None => {
            warnings.push("project_summary missing, defaulted to empty".to_string());
            String::new()
        }
    };

    let raw_findings = match map.get("findings") {
        Some(Value::Array(items)) => items.clone(),
        Some(other) => {
            return Err(format!(
                "findings must be an array, got {}",
                type_name(other)
            ))
        }
        None => Vec::new(),
    };

    let mut findings = Vec::with_capacity(raw_findings.len());
    for (idx, item) in raw_findings.into_iter().enumerate() {
        let Value::Object(obj) = item else {
            warnings.push(format!("finding #{idx} is not an object, dropped"));
            continue;
        };
        findings.push(coerce_finding(idx, &obj, &mut warnings));
    }

    Ok(ValidationOutcome {
        output: AnalysisOutput {
            project_summary,
            findings,
        },
        warnings,
    })
}

fn coerce_finding(
    idx: usize,
    obj: &serde_json::Map<String, Value>,
    warnings: &mut Vec<String>,
) -> StructuredFinding {
    let severity = match obj.get("severity").and_then(Value::as_str) {
        Some(raw) => match Severity::parse_lenient(raw) {
            Some(severity) => severity,
            None => {
                warnings.push(format!(
                    "finding #{idx}: unknown severity '{raw}' coerced to Note"
                ));
                Severity::Note
            }
        },
        None => {
            warnings.push(format!("finding #{idx}: severity missing, defaulted to Note"));
            Severity::Note
        }
    };

    let category = match obj.get("category").and_then(Value::as_str) {
        Some(raw) => {
            match KNOWN_CATEGORIES
                .iter()
                .find(|known| known.eq_ignore_ascii_case(raw))
            {
                Some(known) => known.to_string(),
                None => {
                    warnings.push(format!(
                        "finding #{idx}: unknown category '{raw}' coerced to {DEFAULT_CATEGORY}"
                    ));
                    DEFAULT_CATEGORY.to_string()
                }
            }
        }
        None => DEFAULT_CATEGORY.to_string(),
    };

    StructuredFinding {
        file_path: str_field(obj, "file_path"),
        line_start: num_field(obj, "line_start"),
        line_end: num_field(obj, "line_end"),
        severity,
        category,
        message: str_field(obj, "message"),
        suggestion: str_field(obj, "suggestion"),
        finding_type: str_field(obj, "finding_type"),
    }
}

fn str_field(obj: &serde_json::Map<String, Value>, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn num_field(obj: &serde_json::Map<String, Value>, key: &str) -> usize {
    match obj.get(key) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as usize,
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Render a summary object's recognizable metrics into a sentence
fn flatten_summary_object(obj: &serde_json::Map<String, Value>) -> String {
    let mut parts = Vec::new();
    for (key, value) in obj {
        match value {
            Value::String(s) => parts.push(format!("{key}: {s}")),
            Value::Number(n) => parts.push(format!("{key}: {n}")),
            Value::Bool(b) => parts.push(format!("{key}: {b}")),
            _ => {}
        }
    }
    parts.join("; ")
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "project_summary": "All good.",
        "findings": [{
            "file_path": "src/a.py",
            "line_start": 3,
            "line_end": 9,
            "severity": "Warning",
            "category": "Security",
            "message": "injection",
            "suggestion": "sanitize",
            "finding_type": "sql_injection"
        }]
    }"#;

    #[test]
    fn test_strict_parse() {
        let outcome = validate(VALID).unwrap();
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.output.findings.len(), 1);
        let finding = &outcome.output.findings[0];
        assert_eq!(finding.severity, Severity::Warning);
        assert_eq!(finding.category, "Security");
        assert_eq!(finding.line_start, 3);
    }

    #[test]
    fn test_prose_wrapped_json_is_extracted() {
        let wrapped = format!("Here's the analysis you asked for:\n\n{VALID}\n\nHope it helps!");
        let outcome = validate(&wrapped).unwrap();
        assert_eq!(outcome.output.findings.len(), 1);
    }

    #[test]
    fn test_unknown_severity_coerces_to_note() {
        let raw = r#"{"project_summary": "s", "findings": [
            {"file_path": "a.py", "severity": "CRITICAL", "category": "Security",
             "message": "m", "suggestion": "s", "finding_type": "t",
             "line_start": 1, "line_end": 1}
        ]}"#;
        let outcome = validate(raw).unwrap();
        assert_eq!(outcome.output.findings[0].severity, Severity::Note);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("CRITICAL"));
    }

    #[test]
    fn test_case_insensitive_severity() {
        let raw = r#"{"project_summary": "s", "findings": [
            {"file_path": "a.py", "severity": "warning", "category": "logic",
             "message": "m", "suggestion": "s", "finding_type": "t",
             "line_start": 1, "line_end": 2}
        ]}"#;
        let outcome = validate(raw).unwrap();
        assert_eq!(outcome.output.findings[0].severity, Severity::Warning);
        assert_eq!(outcome.output.findings[0].category, "Logic");
    }

    #[test]
    fn test_unknown_category_defaults() {
        let raw = r#"{"project_summary": "s", "findings": [
            {"file_path": "a.py", "severity": "Info", "category": "Vibes",
             "message": "m", "suggestion": "s", "finding_type": "t",
             "line_start": 1, "line_end": 1}
        ]}"#;
        let outcome = validate(raw).unwrap();
        assert_eq!(outcome.output.findings[0].category, DEFAULT_CATEGORY);
    }

    #[test]
    fn test_object_summary_flattened() {
        let raw = r#"{"project_summary": {"files": 10, "verdict": "healthy"},
                      "findings": []}"#;
        let outcome = validate(raw).unwrap();
        assert!(outcome.output.project_summary.contains("files: 10"));
        assert!(outcome.output.project_summary.contains("verdict: healthy"));
    }

    #[test]
    fn test_prose_only_fails() {
        let err = validate("I could not find any problems worth reporting.").unwrap_err();
        assert!(err.contains("no JSON object"));
    }

    #[test]
    fn test_coercion_is_deterministic() {
        let raw = r#"{"project_summary": "s", "findings": [
            {"file_path": "a.py", "severity": "bananas", "category": "Vibes",
             "message": "m", "suggestion": "s", "finding_type": "t",
             "line_start": "7", "line_end": 9}
        ]}"#;
        let first = validate(raw).unwrap();
        let second = validate(raw).unwrap();
        assert_eq!(first.output, second.output);
        assert_eq!(first.warnings, second.warnings);
        assert_eq!(first.output.findings[0].line_start, 7, "numeric string coerced");
    }

    #[test]
    fn test_braces_inside_strings_do_not_confuse_extraction() {
        let text = r#"Note: {"project_summary": "uses {braces} inside", "findings": []} done"#;
        let outcome = validate(text).unwrap();
        assert!(outcome.output.project_summary.contains("{braces}"));
    }
}
