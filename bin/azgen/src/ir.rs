//! Transformation of OpenAPI schemas into the intermediate
//! representation the code generator emits from.
//!
//! References resolve through a per-run [RefCache] keyed by
//! (file, definition name). Before recursing into a definition
//! the transformer marks the key as initialising; a re-entrant
//! lookup then yields a forward reference by name instead of
//! recursing, which is what lets self-referential definitions
//! terminate.

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context;
use heck::ToUpperCamelCase;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
  openapi::{
    OaDef, OaEnum, OaOperation, OaParam, OaSchema, operations,
  },
  reader::{Reader, ReaderCache},
};

/// A type in any position, with its use-site flags.
#[derive(Debug, Clone, PartialEq)]
pub struct IrT {
  pub t: IrKind,
  pub read_only: bool,
  pub required: bool,
}

impl IrT {
  pub fn of(t: IrKind) -> IrT {
    IrT {
      t,
      read_only: false,
      required: false,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IrKind {
  Str,
  Int,
  Float,
  Bool,
  /// Schemaless json.
  Any,
  Def(IrDef),
  List(Box<IrT>),
  /// String-keyed dictionary of the value type.
  Dict(Box<IrT>),
  Enum(IrEnum),
  /// A forward reference by name, produced when resolution hits
  /// a definition which is still being resolved.
  Name(String),
}

/// An object definition.
#[derive(Debug, Clone, PartialEq)]
pub struct IrDef {
  pub name: String,
  pub properties: IndexMap<String, IrT>,
  pub description: Option<String>,
  /// The file which defines this type, for import generation.
  pub src: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrEnum {
  pub name: String,
  pub values: Vec<IrEnumValue>,
  pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrEnumValue {
  /// Identifier in emitted source.
  pub ident: String,
  /// Value on the wire.
  pub wire: String,
}

/// The methods which map onto `Req` constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
  Get,
  Put,
  Post,
  Patch,
  Delete,
}

impl HttpMethod {
  pub fn parse(method: &str) -> Option<HttpMethod> {
    match method {
      "get" => Some(HttpMethod::Get),
      "put" => Some(HttpMethod::Put),
      "post" => Some(HttpMethod::Post),
      "patch" => Some(HttpMethod::Patch),
      "delete" => Some(HttpMethod::Delete),
      _ => None,
    }
  }

  /// The matching `Req` constructor.
  pub fn constructor(&self) -> &'static str {
    match self {
      HttpMethod::Get => "get",
      HttpMethod::Put => "put",
      HttpMethod::Post => "post",
      HttpMethod::Patch => "patch",
      HttpMethod::Delete => "delete",
    }
  }

  pub fn has_body(&self) -> bool {
    matches!(
      self,
      HttpMethod::Put | HttpMethod::Post | HttpMethod::Patch
    )
  }
}

/// One operation, grouped under the prefix of its `operationId`.
#[derive(Debug, Clone)]
pub struct IrOp {
  pub group: String,
  pub name: String,
  pub description: Option<String>,
  pub method: HttpMethod,
  pub path: String,
  pub body: Option<(IrT, String)>,
  pub url_params: IndexMap<String, IrT>,
  pub query_params: IndexMap<String, IrT>,
  /// None for operations with no response schema. A non-required
  /// type marks an optional return (some responses carry no
  /// body).
  pub ret: Option<IrT>,
}

/// Everything transformed out of one document.
#[derive(Debug)]
pub struct FileIr {
  pub path: PathBuf,
  pub apiv: String,
  pub defs: Vec<(String, IrT)>,
  pub ops: Vec<IrOp>,
}

#[derive(Debug, Clone)]
enum RefEntry {
  Initialising,
  Done(IrT),
}

/// (file, definition name) → resolution state.
#[derive(Debug, Default)]
pub struct RefCache {
  entries: HashMap<(PathBuf, String), RefEntry>,
}

impl RefCache {
  fn get(&self, key: &(PathBuf, String)) -> Option<&RefEntry> {
    self.entries.get(key)
  }

  fn begin(&mut self, key: (PathBuf, String)) {
    self.entries.insert(key, RefEntry::Initialising);
  }

  fn complete(&mut self, key: (PathBuf, String), ir: IrT) {
    self.entries.insert(key, RefEntry::Done(ir));
  }
}

/// Turns OpenAPI documents into [FileIr]. Owns the document and
/// reference caches for one generation run.
pub struct IrTransformer {
  readers: ReaderCache,
  cache: RefCache,
}

impl IrTransformer {
  pub fn new(root: impl Into<String>) -> IrTransformer {
    IrTransformer {
      readers: ReaderCache::new(root),
      cache: RefCache::default(),
    }
  }

  /// Paths of every document loaded so far, including documents
  /// pulled in through cross-file references.
  pub fn loaded(&self) -> Vec<PathBuf> {
    self.readers.loaded()
  }

  /// Transform one document: its definitions and its operations.
  pub fn transform_file(
    &mut self,
    path: &Path,
  ) -> anyhow::Result<FileIr> {
    let reader = self.readers.load(path).with_context(|| {
      format!("failed to load spec {}", path.display())
    })?;
    let apiv =
      reader.api_version().unwrap_or_default().to_string();

    let mut defs = Vec::new();
    for (name, _) in reader.definitions() {
      let ir = self
        .resolve_ref(&reader, &format!("#/definitions/{name}"))
        .with_context(|| {
          format!(
            "failed to transform definition {name} in {}",
            path.display()
          )
        })?;
      defs.push((name.clone(), ir));
    }

    let mut ops = Vec::new();
    for (url_path, path_object) in reader.paths() {
      for (method, op) in operations(path_object) {
        if let Some(op) = self
          .transform_op(&reader, url_path, &method, &op)
          .with_context(|| {
            format!("failed to transform {method} {url_path}")
          })?
        {
          ops.push(op);
        }
      }
    }

    Ok(FileIr {
      path: path.to_path_buf(),
      apiv,
      defs,
      ops,
    })
  }

  /// Resolve a `$ref` through the cache.
  fn resolve_ref(
    &mut self,
    current: &Arc<Reader>,
    reference: &str,
  ) -> anyhow::Result<IrT> {
    let (target, object_path) = self
      .readers
      .load_relative(current, reference)
      .with_context(|| {
        format!("failed to load target of $ref {reference}")
      })?;
    let ref_name = object_path
      .rsplit('/')
      .next()
      .unwrap_or_default()
      .to_string();
    let key = (target.path.clone(), ref_name.clone());

    match self.cache.get(&key) {
      Some(RefEntry::Done(ir)) => return Ok(ir.clone()),
      Some(RefEntry::Initialising) => {
        return Ok(IrT::of(IrKind::Name(ref_name)));
      }
      None => {}
    }

    self.cache.begin(key.clone());
    let value = target.resolve(&object_path).with_context(|| {
      format!("failed to look up $ref {reference}")
    })?;
    let schema: OaSchema = serde_json::from_value(value.clone())
      .with_context(|| {
        format!("unparseable schema at $ref {reference}")
      })?;
    let ir = self.resolve_schema(&target, &schema, &ref_name)?;
    self.cache.complete(key, ir.clone());
    Ok(ir)
  }

  /// Resolve any schema position. `name` names the type if one
  /// has to be minted (definitions, inline enums).
  fn resolve_schema(
    &mut self,
    reader: &Arc<Reader>,
    schema: &OaSchema,
    name: &str,
  ) -> anyhow::Result<IrT> {
    match schema {
      OaSchema::Ref(r) => self.resolve_ref(reader, &r.reference),
      OaSchema::Enum(e) => {
        Ok(IrT::of(IrKind::Enum(ir_enum(name, e))))
      }
      OaSchema::Array(a) => {
        let item = self.resolve_schema(reader, &a.items, name)?;
        Ok(IrT::of(IrKind::List(Box::new(item))))
      }
      OaSchema::Def(d) if d.is_primitive() => Ok(IrT {
        t: primitive(d.typ.as_deref().unwrap_or_default())?,
        read_only: d.read_only,
        required: false,
      }),
      OaSchema::Def(d) => self.transform_def(reader, name, d),
    }
  }

  /// Transform an object definition: aliases, dictionaries,
  /// enums-in-disguise and plain property bags, with `allOf`
  /// composition merged in.
  fn transform_def(
    &mut self,
    reader: &Arc<Reader>,
    name: &str,
    def: &OaDef,
  ) -> anyhow::Result<IrT> {
    // A lone $ref in allOf with no local properties is an alias.
    if def.properties.is_empty() && def.all_of.len() == 1 {
      if let OaSchema::Ref(r) = &def.all_of[0] {
        return self.resolve_ref(reader, &r.reference);
      }
    }

    if def.properties.is_empty() && def.all_of.is_empty() {
      if let Some(value_t) =
        self.dict_value(reader, def, name)?
      {
        return Ok(IrT::of(IrKind::Dict(Box::new(value_t))));
      }
      if def.typ.as_deref() == Some("object") {
        // `type: object` and nothing else
        return Ok(IrT::of(IrKind::Dict(Box::new(IrT::of(
          IrKind::Any,
        )))));
      }
      return Ok(IrT::of(IrKind::Any));
    }

    // Local properties first, inherited after; local wins.
    let mut properties = IndexMap::new();
    for (prop_name, prop_schema) in &def.properties {
      let hint =
        format!("{name}{}", prop_name.to_upper_camel_case());
      let mut prop =
        self.resolve_schema(reader, prop_schema, &hint)?;
      prop.required =
        def.required.iter().any(|r| r == prop_name);
      properties.insert(prop_name.clone(), prop);
    }
    for entry in &def.all_of {
      let parent = self.resolve_schema(reader, entry, name)?;
      match parent.t {
        IrKind::Def(parent_def) => {
          for (k, v) in parent_def.properties {
            properties.entry(k).or_insert(v);
          }
        }
        other => {
          warn!(
            "cannot merge properties of non-definition into {name} | got: {other:?}"
          );
        }
      }
    }

    Ok(IrT::of(IrKind::Def(IrDef {
      name: name.to_string(),
      properties,
      description: def.description.clone(),
      src: Some(reader.path.clone()),
    })))
  }

  /// The value type of a dictionary-shaped definition, if
  /// `additionalProperties` marks it as one.
  fn dict_value(
    &mut self,
    reader: &Arc<Reader>,
    def: &OaDef,
    name: &str,
  ) -> anyhow::Result<Option<IrT>> {
    match &def.additional_properties {
      None | Some(Value::Bool(false)) => Ok(None),
      Some(Value::Bool(true)) => {
        Ok(Some(IrT::of(IrKind::Any)))
      }
      Some(schema) => {
        let schema: OaSchema =
          serde_json::from_value(schema.clone())
            .with_context(|| {
              format!(
                "unparseable additionalProperties on {name}"
              )
            })?;
        Ok(Some(self.resolve_schema(reader, &schema, name)?))
      }
    }
  }

  fn transform_op(
    &mut self,
    reader: &Arc<Reader>,
    url_path: &str,
    method: &str,
    op: &OaOperation,
  ) -> anyhow::Result<Option<IrOp>> {
    let Some(op_id) = &op.operation_id else {
      debug!(
        "skipping operation without operationId | path: {url_path} | method: {method}"
      );
      return Ok(None);
    };
    let Some(http_method) = HttpMethod::parse(method) else {
      debug!(
        "skipping unsupported method | op: {op_id} | method: {method}"
      );
      return Ok(None);
    };

    let (group, name) = match op_id.split_once('_') {
      Some((group, name)) => {
        (group.to_string(), name.to_string())
      }
      None => (String::new(), op_id.clone()),
    };

    let mut body = None;
    let mut url_params = IndexMap::new();
    let mut query_params = IndexMap::new();
    for raw in &op.parameters {
      let (preader, param) = self
        .resolve_param(reader, raw)
        .with_context(|| {
          format!("failed to resolve parameter of {op_id}")
        })?;
      match param.location.as_str() {
        "body" => {
          let schema = param.schema.as_ref().with_context(
            || format!("body parameter {} without schema", param.name),
          )?;
          let t = self.resolve_schema(
            &preader,
            schema,
            &param.name.to_upper_camel_case(),
          )?;
          body = Some((t, param.name.clone()));
        }
        "path" => {
          let t = self.param_type(&preader, &param)?;
          url_params.insert(param.name.clone(), t);
        }
        "query" => {
          // api-version is driven by Req.apiv, never a param.
          if param.name == "api-version" {
            continue;
          }
          let mut t = self.param_type(&preader, &param)?;
          t.required = param.required;
          query_params.insert(param.name.clone(), t);
        }
        other => {
          debug!(
            "skipping parameter | op: {op_id} | name: {} | in: {other}",
            param.name
          );
        }
      }
    }

    let mut candidates = Vec::new();
    for (code, response) in &op.responses {
      if code == "default" {
        continue;
      }
      match &response.schema {
        Some(schema) => candidates.push(Some(
          self.resolve_schema(
            reader,
            schema,
            &format!("{group}{name}Response"),
          )?,
        )),
        None => candidates.push(None),
      }
    }
    let ret = unify_returns(op_id, candidates);

    Ok(Some(IrOp {
      group,
      name,
      description: op.description.clone(),
      method: http_method,
      path: url_path.to_string(),
      body,
      url_params,
      query_params,
      ret,
    }))
  }

  /// A parameter entry is either inline or a `$ref` to a shared
  /// parameter, possibly in another file. Returns the document
  /// the parameter is defined in, so nested schema refs resolve
  /// against the right file.
  fn resolve_param(
    &mut self,
    reader: &Arc<Reader>,
    raw: &Value,
  ) -> anyhow::Result<(Arc<Reader>, OaParam)> {
    if let Some(reference) =
      raw.get("$ref").and_then(|r| r.as_str())
    {
      let (target, object_path) =
        self.readers.load_relative(reader, reference)?;
      let value = target
        .resolve(&object_path)
        .with_context(|| {
          format!("failed to look up parameter {reference}")
        })?;
      let param = serde_json::from_value(value.clone())
        .with_context(|| {
          format!("unparseable parameter at {reference}")
        })?;
      Ok((target, param))
    } else {
      let param = serde_json::from_value(raw.clone())
        .context("unparseable inline parameter")?;
      Ok((reader.clone(), param))
    }
  }

  /// The type of a non-body parameter.
  fn param_type(
    &mut self,
    reader: &Arc<Reader>,
    param: &OaParam,
  ) -> anyhow::Result<IrT> {
    match param.typ.as_deref() {
      Some("array") => {
        let items = param.items.as_ref().with_context(|| {
          format!("array parameter {} without items", param.name)
        })?;
        let item =
          self.resolve_schema(reader, items, &param.name)?;
        Ok(IrT::of(IrKind::List(Box::new(item))))
      }
      Some(typ) => Ok(IrT::of(primitive(typ)?)),
      None => Ok(IrT::of(IrKind::Any)),
    }
  }

  #[cfg(test)]
  pub fn insert_reader(&mut self, reader: Reader) -> Arc<Reader> {
    self.readers.insert(reader)
  }
}

fn primitive(typ: &str) -> anyhow::Result<IrKind> {
  match typ {
    "string" => Ok(IrKind::Str),
    "integer" => Ok(IrKind::Int),
    "number" => Ok(IrKind::Float),
    "boolean" => Ok(IrKind::Bool),
    "object" => Ok(IrKind::Any),
    other => anyhow::bail!("unknown primitive type {other}"),
  }
}

fn ir_enum(name: &str, e: &OaEnum) -> IrEnum {
  let values = e
    .values
    .iter()
    .map(|v| {
      let wire = match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
      };
      IrEnumValue {
        ident: enum_ident(&wire),
        wire,
      }
    })
    .collect();
  IrEnum {
    name: name.to_string(),
    values,
    description: e.description.clone(),
  }
}

/// Normalise a wire value into a variant identifier. The wire
/// value itself is preserved through a rename.
fn enum_ident(wire: &str) -> String {
  let mut ident: String = wire
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
    .collect();
  if ident
    .chars()
    .next()
    .is_some_and(|c| c.is_ascii_digit())
  {
    ident.insert(0, '_');
  }
  if ident == "None" {
    // avoid the null sentinel
    ident.push('_');
  }
  ident
}

/// Unify the response schemas of an operation: empty collapses
/// to no return, a single type stands alone, a single type next
/// to body-less responses turns optional, and anything mixed
/// falls back to schemaless json.
fn unify_returns(
  op_id: &str,
  candidates: Vec<Option<IrT>>,
) -> Option<IrT> {
  let mut types: Vec<IrT> = Vec::new();
  let mut saw_empty = false;
  for candidate in candidates {
    match candidate {
      Some(t) => {
        if !types.iter().any(|x| x.t == t.t) {
          types.push(t);
        }
      }
      None => saw_empty = true,
    }
  }
  match types.len() {
    0 => None,
    1 => types.pop().map(|mut t| {
      t.required = !saw_empty;
      t
    }),
    _ => {
      warn!(
        "mixed response types, falling back to json | op: {op_id}"
      );
      let mut t = IrT::of(IrKind::Any);
      t.required = !saw_empty;
      Some(t)
    }
  }
}

/// When a definition is a list envelope (its only interesting
/// property is `value: array<T>`, plus at most a `nextLink`),
/// it is emitted as an alias of the runtime's list type.
pub fn az_list_item(def: &IrDef) -> Option<&IrT> {
  let interesting: Vec<_> = def
    .properties
    .keys()
    .filter(|k| k.as_str() != "nextLink")
    .collect();
  if interesting.len() != 1 || interesting[0] != "value" {
    return None;
  }
  match &def.properties["value"].t {
    IrKind::List(item) => Some(item),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn tx() -> IrTransformer {
    IrTransformer::new("")
  }

  fn doc_reader(definitions: Value) -> Reader {
    Reader::from_value(
      "spec.json",
      json!({
        "info": {"version": "2024-01-01"},
        "definitions": definitions,
        "paths": {},
      }),
    )
  }

  fn resolve(
    tx: &mut IrTransformer,
    reader: &Arc<Reader>,
    name: &str,
  ) -> IrT {
    tx.resolve_ref(reader, &format!("#/definitions/{name}"))
      .unwrap()
  }

  #[test]
  fn resolves_primitives() {
    let mut tx = tx();
    let reader = tx.insert_reader(doc_reader(json!({
      "S": {"type": "string"},
      "I": {"type": "integer", "format": "int64"},
      "F": {"type": "number"},
      "B": {"type": "boolean", "readOnly": true},
    })));
    assert_eq!(resolve(&mut tx, &reader, "S").t, IrKind::Str);
    assert_eq!(resolve(&mut tx, &reader, "I").t, IrKind::Int);
    assert_eq!(resolve(&mut tx, &reader, "F").t, IrKind::Float);
    let b = resolve(&mut tx, &reader, "B");
    assert_eq!(b.t, IrKind::Bool);
    assert!(b.read_only);
  }

  #[test]
  fn resolves_string_array() {
    let mut tx = tx();
    let reader = tx.insert_reader(doc_reader(json!({
      "A": {"type": "array", "items": {"type": "string"}},
    })));
    let a = resolve(&mut tx, &reader, "A");
    assert_eq!(
      a.t,
      IrKind::List(Box::new(IrT::of(IrKind::Str)))
    );
  }

  #[test]
  fn transforms_bag_of_props() {
    let mut tx = tx();
    let reader = tx.insert_reader(doc_reader(json!({
      "MyClass": {
        "type": "object",
        "description": "d0",
        "properties": {
          "p0": {"type": "string"},
          "p1": {"type": "integer"},
        },
        "required": ["p0"],
      },
    })));
    let ir = resolve(&mut tx, &reader, "MyClass");
    let IrKind::Def(def) = ir.t else {
      panic!("expected def");
    };
    assert_eq!(def.name, "MyClass");
    assert_eq!(def.description.as_deref(), Some("d0"));
    assert!(def.properties["p0"].required);
    assert!(!def.properties["p1"].required);
    assert_eq!(def.properties["p1"].t, IrKind::Int);
  }

  #[test]
  fn all_of_single_ref_is_alias() {
    let mut tx = tx();
    let reader = tx.insert_reader(doc_reader(json!({
      "Base": {
        "type": "object",
        "properties": {"id": {"type": "string"}},
      },
      "Alias": {"allOf": [{"$ref": "#/definitions/Base"}]},
    })));
    let ir = resolve(&mut tx, &reader, "Alias");
    let IrKind::Def(def) = ir.t else {
      panic!("expected def");
    };
    assert_eq!(def.name, "Base");
  }

  #[test]
  fn all_of_merges_with_local_priority() {
    let mut tx = tx();
    let reader = tx.insert_reader(doc_reader(json!({
      "Base": {
        "type": "object",
        "properties": {
          "id": {"type": "string"},
          "kind": {"type": "string"},
        },
      },
      "Child": {
        "type": "object",
        "properties": {"kind": {"type": "integer"}},
        "allOf": [{"$ref": "#/definitions/Base"}],
      },
    })));
    let ir = resolve(&mut tx, &reader, "Child");
    let IrKind::Def(def) = ir.t else {
      panic!("expected def");
    };
    // local first, then inherited
    let keys: Vec<_> = def.properties.keys().collect();
    assert_eq!(keys, vec!["kind", "id"]);
    // local definition wins on clash
    assert_eq!(def.properties["kind"].t, IrKind::Int);
  }

  #[test]
  fn additional_properties_true_is_dict_of_any() {
    let mut tx = tx();
    let reader = tx.insert_reader(doc_reader(json!({
      "Tags": {"type": "object", "additionalProperties": true},
    })));
    let ir = resolve(&mut tx, &reader, "Tags");
    assert_eq!(
      ir.t,
      IrKind::Dict(Box::new(IrT::of(IrKind::Any)))
    );
  }

  #[test]
  fn additional_properties_schema_is_typed_dict() {
    let mut tx = tx();
    let reader = tx.insert_reader(doc_reader(json!({
      "Tags": {
        "type": "object",
        "additionalProperties": {"type": "string"},
      },
    })));
    let ir = resolve(&mut tx, &reader, "Tags");
    assert_eq!(
      ir.t,
      IrKind::Dict(Box::new(IrT::of(IrKind::Str)))
    );
  }

  #[test]
  fn bare_object_is_dict_of_any() {
    let mut tx = tx();
    let reader = tx.insert_reader(doc_reader(json!({
      "Anything": {"type": "object"},
    })));
    let ir = resolve(&mut tx, &reader, "Anything");
    assert_eq!(
      ir.t,
      IrKind::Dict(Box::new(IrT::of(IrKind::Any)))
    );
  }

  #[test]
  fn enum_idents_are_normalised() {
    let e = ir_enum(
      "PrincipalType",
      &OaEnum {
        typ: String::from("string"),
        values: vec![
          json!("User"),
          json!("None"),
          json!("a,b"),
          json!("2x"),
        ],
        description: None,
      },
    );
    let idents: Vec<_> =
      e.values.iter().map(|v| v.ident.as_str()).collect();
    assert_eq!(idents, vec!["User", "None_", "a_b", "_2x"]);
    // wire values preserved
    assert_eq!(e.values[1].wire, "None");
    assert_eq!(e.values[2].wire, "a,b");
  }

  #[test]
  fn self_referential_definition_terminates() {
    let mut tx = tx();
    let reader = tx.insert_reader(doc_reader(json!({
      "ErrorDetail": {
        "type": "object",
        "properties": {
          "code": {"type": "string"},
          "details": {
            "type": "array",
            "items": {"$ref": "#/definitions/ErrorDetail"},
          },
        },
      },
    })));
    let ir = resolve(&mut tx, &reader, "ErrorDetail");
    let IrKind::Def(def) = ir.t else {
      panic!("expected def");
    };
    let IrKind::List(item) = &def.properties["details"].t
    else {
      panic!("expected list");
    };
    // the cycle resolves to a reference by name
    assert_eq!(
      item.t,
      IrKind::Name(String::from("ErrorDetail"))
    );
  }

  #[test]
  fn mutually_recursive_definitions_terminate() {
    let mut tx = tx();
    let reader = tx.insert_reader(doc_reader(json!({
      "A": {
        "type": "object",
        "properties": {"b": {"$ref": "#/definitions/B"}},
      },
      "B": {
        "type": "object",
        "properties": {"a": {"$ref": "#/definitions/A"}},
      },
    })));
    let a = resolve(&mut tx, &reader, "A");
    let IrKind::Def(def) = a.t else {
      panic!("expected def");
    };
    let IrKind::Def(b) = &def.properties["b"].t else {
      panic!("expected def for B");
    };
    assert_eq!(b.properties["a"].t, IrKind::Name(String::from("A")));
    // B itself resolves fully once A has finished
    let b = resolve(&mut tx, &reader, "B");
    assert!(matches!(b.t, IrKind::Def(_)));
  }

  #[test]
  fn list_envelope_is_detected() {
    let def = IrDef {
      name: String::from("RoleListResult"),
      properties: IndexMap::from([
        (
          String::from("value"),
          IrT::of(IrKind::List(Box::new(IrT::of(
            IrKind::Name(String::from("Role")),
          )))),
        ),
        (String::from("nextLink"), IrT::of(IrKind::Str)),
      ]),
      description: None,
      src: None,
    };
    let item = az_list_item(&def).unwrap();
    assert_eq!(item.t, IrKind::Name(String::from("Role")));
  }

  #[test]
  fn transform_op_splits_group_and_filters_api_version() {
    let mut tx = tx();
    let reader = tx.insert_reader(Reader::from_value(
      "spec.json",
      json!({
        "info": {"version": "2024-01-01"},
        "definitions": {
          "Thing": {
            "type": "object",
            "properties": {"id": {"type": "string"}},
          },
        },
        "paths": {
          "/subscriptions/{subscriptionId}/things": {
            "get": {
              "operationId": "Things_List",
              "description": "List the things.",
              "parameters": [
                {
                  "name": "subscriptionId",
                  "in": "path",
                  "required": true,
                  "type": "string",
                },
                {
                  "name": "api-version",
                  "in": "query",
                  "required": true,
                  "type": "string",
                },
                {
                  "name": "$filter",
                  "in": "query",
                  "type": "string",
                },
              ],
              "responses": {
                "200": {
                  "schema": {"$ref": "#/definitions/Thing"}
                },
              },
            },
          },
        },
      }),
    ));
    let file =
      tx.transform_file(Path::new("spec.json")).unwrap();
    assert_eq!(file.apiv, "2024-01-01");
    assert_eq!(file.ops.len(), 1);
    let op = &file.ops[0];
    assert_eq!(op.group, "Things");
    assert_eq!(op.name, "List");
    assert_eq!(op.method, HttpMethod::Get);
    assert!(op.url_params.contains_key("subscriptionId"));
    assert!(!op.query_params.contains_key("api-version"));
    assert!(op.query_params.contains_key("$filter"));
    let ret = op.ret.as_ref().unwrap();
    assert!(matches!(&ret.t, IrKind::Def(d) if d.name == "Thing"));
    assert!(ret.required);
  }

  #[test]
  fn return_unification_turns_optional_with_empty_response() {
    let with_schema = Some(IrT::of(IrKind::Str));
    let ret =
      unify_returns("X_Get", vec![with_schema, None]).unwrap();
    assert_eq!(ret.t, IrKind::Str);
    assert!(!ret.required);
  }

  #[test]
  fn return_unification_collapses_empty() {
    assert!(unify_returns("X_Delete", vec![None, None]).is_none());
    assert!(unify_returns("X_Delete", vec![]).is_none());
  }
}
