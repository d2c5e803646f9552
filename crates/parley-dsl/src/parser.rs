use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_yaml::with::singleton_map_recursive;

use crate::document::{ParsedDocument, SUPPORTED_DSL_VERSION};
use crate::error::DslError;

/// Deserialize YAML, reading enum variants from single-key maps (`- match: {...}`)
pub(crate) fn from_yaml_str<T: DeserializeOwned>(source: &str) -> Result<T, DslError> {
    let deserializer = serde_yaml::Deserializer::from_str(source);
    Ok(singleton_map_recursive::deserialize(deserializer)?)
}

/// Serialize to YAML in the same single-key map form [`from_yaml_str`] reads
pub(crate) fn to_yaml_string<T: Serialize>(value: &T) -> Result<String, DslError> {
    let mut buffer = Vec::new();
    let mut serializer = serde_yaml::Serializer::new(&mut buffer);
    singleton_map_recursive::serialize(value, &mut serializer)?;
    String::from_utf8(buffer).map_err(|err| DslError::InternalError(err.to_string()))
}

/// Parse a YAML string into a ParsedDocument.
///
/// Only the conversion from text and the version check happen here.
/// Structure and references are checked by the validation module.
///
/// Flows without a `source_code` get their own YAML rendering attached so
/// that it can be reported back for diagnostics.
pub fn parse_flow_document(yaml_str: &str) -> Result<ParsedDocument, DslError> {
    let mut document: ParsedDocument = from_yaml_str(yaml_str)?;

    if document.dsl_version != SUPPORTED_DSL_VERSION {
        return Err(DslError::UnsupportedVersion(document.dsl_version));
    }

    for flow in &mut document.flows {
        if flow.source_code.is_none() {
            flow.source_code = Some(to_yaml_string(&*flow)?);
        }
    }

    Ok(document)
}
