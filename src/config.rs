//! The declarative configuration document.
//!
//! A document maps node names to ordered lists of chain descriptors:
//!
//! ```yaml
//! node:
//!   - name: ticker
//!     source: { timing.every: { seconds: 1 } }
//!     steps:
//!       - output.dump: { prefix: "TICK" }
//!     to: [ sink ]
//!   - name: sink
//!     steps: [ output.log ]
//! ```
//!
//! Descriptors are immutable parse-tree values; building them into live
//! objects is a one-way, one-time transform done by the graph builder.
//! Raw text is environment-variable-expanded before structural parsing.

use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{PipelineError, Result};

/// Marker for an inline object-construction reference inside argument
/// values. Implied on element names.
pub const OBJ_MARKER: &str = "obj@";

/// Keyword arguments of one element descriptor.
pub type Kwargs = Map<String, Value>;

/// One element descriptor: a bare name, or a single-key mapping from name
/// to keyword arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ElementConfig {
    Name(String),
    Call(Map<String, Value>),
}

impl ElementConfig {
    /// Split into `(name, kwargs)`, stripping the object marker. A
    /// mapping with more than one key is malformed.
    pub fn parts(&self, at: &str) -> Result<(&str, Kwargs)> {
        match self {
            ElementConfig::Name(name) => Ok((strip_marker(name), Kwargs::new())),
            ElementConfig::Call(map) => {
                if map.len() != 1 {
                    return Err(PipelineError::config(
                        format!(
                            "object config must have exactly one key, got {:?}",
                            map.keys().collect::<Vec<_>>()
                        ),
                        at,
                    ));
                }
                let (name, args) = map.iter().next().expect("len checked above");
                let kwargs = match args {
                    Value::Object(m) => m.clone(),
                    Value::Null => Kwargs::new(),
                    other => {
                        return Err(PipelineError::config(
                            format!("arguments of `{name}` must be a mapping, got {other}"),
                            at,
                        ));
                    }
                };
                Ok((strip_marker(name), kwargs))
            }
        }
    }
}

pub fn strip_marker(name: &str) -> &str {
    name.strip_prefix(OBJ_MARKER).unwrap_or(name)
}

/// One chain descriptor: an optional declared source, the ordered element
/// list, and the forwarding targets.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    #[serde(default)]
    pub source: Option<ElementConfig>,
    #[serde(default)]
    pub steps: Vec<ElementConfig>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub to: Vec<String>,
}

/// `to: ch` and `to: [ch1, ch2]` are both accepted.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// Node name → ordered chain descriptors.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct ConfigDoc(pub HashMap<String, Vec<ChainConfig>>);

impl ConfigDoc {
    pub fn node(&self, name: &str) -> Option<&[ChainConfig]> {
        self.0.get(name).map(Vec::as_slice)
    }

    pub fn node_names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }
}

/// Expand `$VAR` and `${VAR}` from the process environment. Unknown
/// variables are left untouched.
pub fn expand_env_vars(text: &str) -> String {
    static PATTERN: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)";
    let re = Regex::new(PATTERN).expect("static pattern");
    re.replace_all(text, |caps: &regex::Captures| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .expect("one group always matches")
            .as_str();
        match std::env::var(name) {
            Ok(val) => val,
            Err(_) => caps.get(0).expect("whole match").as_str().to_string(),
        }
    })
    .into_owned()
}

pub fn parse_str(text: &str) -> Result<ConfigDoc> {
    let expanded = expand_env_vars(text);
    let doc: ConfigDoc = serde_yaml_bw::from_str(&expanded).map_err(|e| {
        PipelineError::config(format!("invalid configuration document: {e}"), "config")
    })?;
    debug!(nodes = ?doc.node_names(), "parsed configuration");
    Ok(doc)
}

pub async fn load_file(path: impl AsRef<Path>) -> Result<ConfigDoc> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        PipelineError::config(format!("cannot read {}: {e}", path.display()), "config")
    })?;
    parse_str(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DOC: &str = r#"
node:
  - name: ticker
    source: { timing.every: { seconds: 1 } }
    steps:
      - output.dump: { prefix: "TICK" }
    to: sink
  - name: sink
    steps: [ output.log ]
"#;

    #[test]
    fn parses_chain_descriptors_in_order() {
        let doc = parse_str(DOC).unwrap();
        let chains = doc.node("node").unwrap();
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0].name, "ticker");
        assert_eq!(chains[0].to, vec!["sink"]);
        assert!(chains[0].source.is_some());
        assert_eq!(chains[1].name, "sink");
        assert!(chains[1].source.is_none());
    }

    #[test]
    fn element_parts_splits_name_and_kwargs() {
        let doc = parse_str(DOC).unwrap();
        let chains = doc.node("node").unwrap();
        let (name, kwargs) = chains[0].source.as_ref().unwrap().parts("node[0]").unwrap();
        assert_eq!(name, "timing.every");
        assert_eq!(kwargs.get("seconds"), Some(&json!(1)));

        let (name, kwargs) = chains[1].steps[0].parts("node[1]").unwrap();
        assert_eq!(name, "output.log");
        assert!(kwargs.is_empty());
    }

    #[test]
    fn multi_key_object_config_is_rejected() {
        let el = ElementConfig::Call(
            [("a".to_string(), json!({})), ("b".to_string(), json!({}))]
                .into_iter()
                .collect(),
        );
        assert!(matches!(
            el.parts("chain[1]"),
            Err(PipelineError::Configuration { at, .. }) if at == "chain[1]"
        ));
    }

    #[test]
    fn env_vars_expand_and_unknown_names_survive() {
        // set before any concurrent env reader in this test binary matters
        unsafe { std::env::set_var("SNAPFLOW_TEST_PORT", "9000") };
        let out =
            expand_env_vars("addr: tcp://host:${SNAPFLOW_TEST_PORT} keep: $NOT_SET_ANYWHERE_XYZ");
        assert_eq!(out, "addr: tcp://host:9000 keep: $NOT_SET_ANYWHERE_XYZ");
    }

    #[test]
    fn obj_marker_is_stripped() {
        let el = ElementConfig::Name("obj@output.log".into());
        let (name, _) = el.parts("chain[0]").unwrap();
        assert_eq!(name, "output.log");
    }
}
