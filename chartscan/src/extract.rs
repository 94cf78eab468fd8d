//! Image reference discovery in raw YAML documents.
//!
//! Charts spell image references in several ways and nothing guarantees a
//! schema, so every mapping in every document is checked for all of them:
//!
//! - `image: "registry/repo:tag"`
//! - `image: { registry, repository | name, tag, digest }`
//! - `repository` and `tag` as sibling keys

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::models::ReferenceSet;

/// Result of scanning one document source.
#[derive(Debug, Default)]
pub struct DocumentOutcome {
    /// Subdocuments that parsed and were walked
    pub parsed: usize,
    /// Parse error that stopped the scan of this source, if any
    pub error: Option<serde_yaml::Error>,
}

/// Whether an archive entry name denotes a YAML document.
pub fn is_yaml_document(name: &str) -> bool {
    name.ends_with(".yaml") || name.ends_with(".yml")
}

/// Parse every `---`-separated subdocument of `content` and collect its image
/// references into `found`.
///
/// A YAML stream cannot be resumed after a syntax error, so the first failure
/// ends the scan of this source. References from subdocuments parsed before
/// the failure are kept.
pub fn extract_from_document(content: &[u8], found: &mut ReferenceSet) -> DocumentOutcome {
    let mut outcome = DocumentOutcome::default();

    for document in serde_yaml::Deserializer::from_slice(content) {
        match Value::deserialize(document) {
            Ok(tree) => {
                collect_references(&tree, found);
                outcome.parsed += 1;
            }
            Err(e) => {
                outcome.error = Some(e);
                break;
            }
        }
    }

    outcome
}

/// Walk a parsed tree and add every image reference it contains to `found`.
pub fn collect_references(node: &Value, found: &mut ReferenceSet) {
    walk(node, false, found);
}

// `under_image` marks the mapping that is the value of an `image:` key. Its
// own repository/tag keys were already consumed by the structured rule and
// must not be reported a second time as a sibling pair.
fn walk(node: &Value, under_image: bool, found: &mut ReferenceSet) {
    match node {
        Value::Mapping(map) => {
            inspect_mapping(map, !under_image, found);
            for (key, child) in map {
                walk(child, key.as_str() == Some("image"), found);
            }
        }
        Value::Sequence(items) => {
            for item in items {
                walk(item, false, found);
            }
        }
        Value::Tagged(tagged) => walk(&tagged.value, under_image, found),
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {}
    }
}

// All conventions are checked independently; one mapping may match several.
fn inspect_mapping(map: &Mapping, check_siblings: bool, found: &mut ReferenceSet) {
    match map.get("image") {
        Some(Value::String(image)) => {
            debug!("Found image field: {}", image);
            found.insert(image.clone());
        }
        Some(Value::Mapping(structured)) => {
            if let Some(image) = compose_structured(structured) {
                debug!("Found structured image field: {}", image);
                found.insert(image);
            }
        }
        _ => {}
    }

    if !check_siblings {
        return;
    }

    if let (Some(repository), Some(tag)) = (string_field(map, "repository"), string_field(map, "tag")) {
        let image = format!("{}:{}", repository, tag);
        debug!("Found repository/tag pair: {}", image);
        found.insert(image);
    }
}

/// Build a reference from an `image:` mapping. Digest beats tag; without a
/// repository or name there is nothing to report.
fn compose_structured(image: &Mapping) -> Option<String> {
    let repository = non_empty(image, "repository").or_else(|| non_empty(image, "name"))?;

    let registry = string_field(image, "registry")
        .unwrap_or_default()
        .trim_end_matches('/');

    let mut reference = if registry.is_empty() {
        repository.to_string()
    } else {
        format!("{}/{}", registry, repository)
    };

    if let Some(digest) = non_empty(image, "digest") {
        reference.push('@');
        reference.push_str(digest);
    } else if let Some(tag) = non_empty(image, "tag") {
        reference.push(':');
        reference.push_str(tag);
    }

    Some(reference)
}

fn string_field<'a>(map: &'a Mapping, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

fn non_empty<'a>(map: &'a Mapping, key: &str) -> Option<&'a str> {
    string_field(map, key).filter(|value| !value.is_empty())
}
