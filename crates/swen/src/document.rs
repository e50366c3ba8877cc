//! Flow documents
//!
//! Typed view of the YAML a flow is written in. Parsing lives here so the
//! workflow core only ever sees well-formed structures.

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use tracing::debug;

use crate::Result;

/// Top-level flow document. Keys other than the ones below (e.g. `version`)
/// are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowDocument {
    /// Flow identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Free-text description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,

    /// Steps in document order; absent and null both mean "no steps"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<Vec<StepDocument>>,
}

/// One entry of the `flow` list. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDocument {
    /// Unique step id
    pub id: String,

    /// Command line, shell-tokenized into program and arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,

    /// Free-text description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,

    /// Pipe the previous step's stdout into this step's stdin
    #[serde(default, alias = "with-stdin")]
    pub with_stdin: bool,

    /// Step to run next when this one exits with 0
    #[serde(default, alias = "on-success", skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,

    /// Step to run next when this one exits non-zero
    #[serde(default, alias = "on-failure", skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,

    /// Reserved. Kept as written, never used for routing.
    #[serde(default, alias = "on-exit-code", skip_serializing_if = "Option::is_none")]
    pub on_exit_code: Option<serde_json::Value>,
}

impl FlowDocument {
    pub fn from_yaml(data: &str) -> Result<Self> {
        // An empty document is a valid flow with nothing in it
        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        let document: Option<FlowDocument> = serde_yaml::from_str(data)?;
        let document = document.unwrap_or_default();
        debug!("Parsed flow document: {:?}", document);
        Ok(document)
    }

    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut data = String::new();
        reader.read_to_string(&mut data)?;
        Self::from_yaml(&data)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading flow document from {}", path.display());
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn steps(&self) -> &[StepDocument] {
        self.flow.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ONE_STEP: &str = r#"---
version: 1.0
id: "id-test"
doc: "doc-test"
flow:
- id: s_1
  step: ./s_1.sh
  doc: "step-test"
"#;

    #[test]
    fn parses_single_step_and_ignores_version() {
        let document = FlowDocument::from_yaml(ONE_STEP).unwrap();
        assert_eq!(document.id.as_deref(), Some("id-test"));
        assert_eq!(document.doc.as_deref(), Some("doc-test"));
        assert_eq!(
            document.steps(),
            &[StepDocument {
                id: "s_1".to_string(),
                step: Some("./s_1.sh".to_string()),
                doc: Some("step-test".to_string()),
                with_stdin: false,
                on_success: None,
                on_failure: None,
                on_exit_code: None,
            }]
        );
    }

    #[test]
    fn missing_or_null_flow_has_no_steps() {
        let no_flow = FlowDocument::from_yaml("id: x\ndoc: y\n").unwrap();
        assert!(no_flow.flow.is_none());
        assert!(no_flow.steps().is_empty());

        let null_flow = FlowDocument::from_yaml("id: x\nflow:\n").unwrap();
        assert!(null_flow.steps().is_empty());

        let empty = FlowDocument::from_yaml("").unwrap();
        assert_eq!(empty, FlowDocument::default());
    }

    #[test]
    fn accepts_hyphenated_keys() {
        let yaml = r#"
flow:
- id: a
  step: "true"
  with-stdin: true
  on-success: b
  on-failure: b
- id: b
"#;
        let document = FlowDocument::from_yaml(yaml).unwrap();
        let first = &document.steps()[0];
        assert!(first.with_stdin);
        assert_eq!(first.on_success.as_deref(), Some("b"));
        assert_eq!(first.on_failure.as_deref(), Some("b"));
    }

    #[test]
    fn keeps_on_exit_code_verbatim() {
        let yaml = r#"
flow:
- id: a
  step: "true"
  on_exit_code:
    "3": b
- id: b
"#;
        let document = FlowDocument::from_yaml(yaml).unwrap();
        assert_eq!(document.steps()[0].on_exit_code, Some(json!({"3": "b"})));
    }

    #[test]
    fn rejects_unknown_step_keys() {
        let yaml = r#"
flow:
- id: a
  step: "true"
  on_sucess: b
"#;
        assert!(matches!(
            FlowDocument::from_yaml(yaml),
            Err(crate::Error::Document(_))
        ));
    }

    #[test]
    fn rejects_step_without_id() {
        assert!(FlowDocument::from_yaml("flow:\n- step: ls\n").is_err());
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.yml");
        std::fs::write(&path, ONE_STEP).unwrap();
        let document = FlowDocument::from_path(&path).unwrap();
        assert_eq!(document.steps().len(), 1);
    }
}
