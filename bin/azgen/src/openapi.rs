//! Serde model of the subset of OpenAPI 2.0 the Azure
//! resource-manager specs use.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

/// Http methods a path item can carry.
pub const METHODS: [&str; 8] = [
  "get", "put", "post", "delete", "options", "head", "patch",
  "trace",
];

/// Any schema position: a reference, an enum, an array, or a
/// definition (which also covers bare primitives).
///
/// Variant order matters for untagged deserialisation: the
/// catch-all [OaSchema::Def] must come last.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum OaSchema {
  Ref(OaRef),
  Enum(OaEnum),
  Array(OaArray),
  Def(OaDef),
}

/// `{"$ref": "file.json#/definitions/Name"}`
#[derive(Deserialize, Debug, Clone)]
pub struct OaRef {
  #[serde(rename = "$ref")]
  pub reference: String,
  pub description: Option<String>,
}

/// `{"type": "string", "enum": [...]}`
#[derive(Deserialize, Debug, Clone)]
pub struct OaEnum {
  #[serde(rename = "type")]
  pub typ: String,
  #[serde(rename = "enum")]
  pub values: Vec<Value>,
  pub description: Option<String>,
}

/// `{"type": "array", "items": ...}`
#[derive(Deserialize, Debug, Clone)]
pub struct OaArray {
  #[serde(rename = "type")]
  pub typ: String,
  pub items: Box<OaSchema>,
  pub description: Option<String>,
}

/// An object definition, a composition, a dictionary, or a bare
/// primitive, depending on which fields are present.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct OaDef {
  #[serde(rename = "type")]
  pub typ: Option<String>,
  pub format: Option<String>,
  pub description: Option<String>,
  #[serde(default)]
  pub properties: IndexMap<String, OaSchema>,
  #[serde(rename = "allOf", default)]
  pub all_of: Vec<OaSchema>,
  #[serde(default)]
  pub required: Vec<String>,
  /// `true`, `false`, or a value schema.
  #[serde(rename = "additionalProperties")]
  pub additional_properties: Option<Value>,
  #[serde(rename = "readOnly", default)]
  pub read_only: bool,
}

impl OaDef {
  /// Whether this definition is a bare primitive.
  pub fn is_primitive(&self) -> bool {
    matches!(
      self.typ.as_deref(),
      Some("string" | "integer" | "number" | "boolean")
    )
  }
}

/// One operation under a path item.
#[derive(Deserialize, Debug, Clone)]
pub struct OaOperation {
  #[serde(rename = "operationId")]
  pub operation_id: Option<String>,
  pub description: Option<String>,
  /// Entries are either inline parameters or `$ref`s to shared
  /// ones; resolution happens in the transformer.
  #[serde(default)]
  pub parameters: Vec<Value>,
  #[serde(default)]
  pub responses: IndexMap<String, OaResponse>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct OaResponse {
  pub description: Option<String>,
  pub schema: Option<OaSchema>,
}

/// A single operation parameter.
#[derive(Deserialize, Debug, Clone)]
pub struct OaParam {
  pub name: String,
  #[serde(rename = "in")]
  pub location: String,
  #[serde(default)]
  pub required: bool,
  /// Set for path and query parameters.
  #[serde(rename = "type")]
  pub typ: Option<String>,
  /// Set for `type: array` parameters.
  pub items: Option<OaSchema>,
  /// Set for body parameters.
  pub schema: Option<OaSchema>,
}

/// The operations of a path item, in declaration order.
pub fn operations(
  path_object: &Value,
) -> Vec<(String, OaOperation)> {
  let Some(object) = path_object.as_object() else {
    return Vec::new();
  };
  object
    .iter()
    .filter(|(k, _)| METHODS.contains(&k.as_str()))
    .filter_map(|(k, v)| {
      match serde_json::from_value::<OaOperation>(v.clone()) {
        Ok(op) => Some((k.clone(), op)),
        Err(e) => {
          tracing::warn!(
            "skipping unparseable operation | method: {k} | {e}"
          );
          None
        }
      }
    })
    .collect()
}
