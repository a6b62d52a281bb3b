//! Emission of Rust modules from the intermediate
//! representation. One input spec becomes one module of record
//! structs, enums, list aliases and operation groups building
//! `Req`s against the client runtime.

use std::{
  collections::{BTreeMap, BTreeSet},
  fmt::Write,
  path::Path,
};

use heck::{ToSnakeCase, ToUpperCamelCase};
use indexmap::IndexMap;

use crate::{
  ir::{FileIr, IrDef, IrEnum, IrKind, IrOp, IrT, az_list_item},
  paths::{import_path, module_path},
};

const RUST_KEYWORDS: [&str; 15] = [
  "as", "else", "fn", "for", "if", "impl", "in", "let", "loop",
  "match", "mod", "ref", "type", "use", "where",
];

/// Emit the module for one transformed spec file.
pub fn emit_module(file: &FileIr, package: &str) -> String {
  let mut body = String::new();
  let mut ctx = Ctx::new(&file.path);

  if !file.apiv.is_empty() {
    let _ = writeln!(
      body,
      "pub const API_VERSION: &str = \"{}\";\n",
      file.apiv
    );
  }

  let top_level: BTreeSet<String> =
    file.defs.iter().map(|(name, _)| name.clone()).collect();

  // Definitions, in declaration order.
  for (name, ir) in &file.defs {
    emit_def(&mut body, &mut ctx, name, ir);
  }

  // Types minted while resolving: inline objects and enums
  // nested inside properties which have no top-level definition
  // of their own.
  let mut nested = Vec::new();
  for (_, ir) in &file.defs {
    collect_nested(ir, &file.path, &mut nested);
  }
  for op in &file.ops {
    if let Some((t, _)) = &op.body {
      collect_nested(t, &file.path, &mut nested);
    }
    if let Some(ret) = &op.ret {
      collect_nested(ret, &file.path, &mut nested);
    }
  }
  let mut seen = top_level.clone();
  for item in nested {
    let name = match &item {
      Nested::Def(def) => def.name.clone(),
      Nested::Enum(e) => e.name.clone(),
    };
    if !seen.insert(name) {
      continue;
    }
    match item {
      Nested::Def(def) => {
        emit_struct(&mut body, &mut ctx, &def);
      }
      Nested::Enum(e) => emit_enum(&mut body, &e),
    }
  }

  // Operation groups.
  let mut groups: IndexMap<String, Vec<&IrOp>> = IndexMap::new();
  for op in &file.ops {
    groups.entry(op.group.clone()).or_default().push(op);
  }
  for (group, ops) in &groups {
    emit_ops(&mut body, &mut ctx, group, ops);
  }

  // Header and imports, now the body knows what it used.
  let mut out = String::new();
  let _ = writeln!(
    out,
    "//! Generated by azgen from `{}`. Do not edit.\n",
    file.path.display()
  );
  let mut runtime = Vec::new();
  if ctx.uses_az_list {
    runtime.push("AzList");
  }
  if ctx.uses_read_only {
    runtime.push("ReadOnly");
  }
  if !file.ops.is_empty() {
    runtime.push("Req");
  }
  if !runtime.is_empty() {
    let _ = writeln!(
      out,
      "use azrest_client::models::{{{}}};",
      runtime.join(", ")
    );
  }
  if ctx.uses_serde {
    let _ = writeln!(out, "use serde::{{Deserialize, Serialize}};");
  }
  for (module, names) in &ctx.imports {
    let names: Vec<&str> =
      names.iter().map(String::as_str).collect();
    let _ = writeln!(
      out,
      "use {}::{{{}}};",
      import_path(package, &module_path(module)),
      names.join(", ")
    );
  }
  let _ = writeln!(out);
  out.push_str(&body);
  out
}

/// Per-module emission state: which imports and runtime types
/// the emitted body needs.
struct Ctx<'a> {
  current: &'a Path,
  imports: BTreeMap<std::path::PathBuf, BTreeSet<String>>,
  uses_az_list: bool,
  uses_read_only: bool,
  uses_serde: bool,
}

impl<'a> Ctx<'a> {
  fn new(current: &'a Path) -> Ctx<'a> {
    Ctx {
      current,
      imports: BTreeMap::new(),
      uses_az_list: false,
      uses_read_only: false,
      uses_serde: false,
    }
  }

  /// Record a cross-file reference for import emission.
  fn reference(&mut self, def: &IrDef) {
    if let Some(src) = &def.src {
      if src != self.current {
        self
          .imports
          .entry(src.clone())
          .or_default()
          .insert(type_ident(&def.name));
      }
    }
  }
}

fn emit_def(
  out: &mut String,
  ctx: &mut Ctx,
  name: &str,
  ir: &IrT,
) {
  match &ir.t {
    IrKind::Def(def) if def.name == name => {
      if let Some(item) = az_list_item(def) {
        ctx.uses_az_list = true;
        let item = type_name(ctx, item);
        let _ = writeln!(
          out,
          "pub type {} = AzList<{item}>;\n",
          type_ident(name)
        );
      } else {
        emit_struct(out, ctx, def);
      }
    }
    // An alias: the definition resolved to a type with a
    // different name.
    IrKind::Def(def) => {
      ctx.reference(def);
      let _ = writeln!(
        out,
        "pub type {} = {};\n",
        type_ident(name),
        type_ident(&def.name)
      );
    }
    IrKind::Enum(e) => emit_enum(out, e),
    _ => {
      let target = type_name(ctx, ir);
      let _ = writeln!(
        out,
        "pub type {} = {target};\n",
        type_ident(name)
      );
    }
  }
}

fn emit_struct(out: &mut String, ctx: &mut Ctx, def: &IrDef) {
  ctx.uses_serde = true;
  emit_doc(out, def.description.as_deref(), "");
  let _ = writeln!(
    out,
    "#[derive(Serialize, Deserialize, Debug, Clone)]"
  );
  let _ = writeln!(out, "pub struct {} {{", type_ident(&def.name));
  for (wire, prop) in &def.properties {
    let field = field_ident(wire);
    let mut attrs = Vec::new();
    if field.trim_start_matches("r#") != wire {
      attrs.push(format!("rename = \"{wire}\""));
    }
    let optional = prop.read_only || !prop.required;
    if optional {
      attrs.push(String::from("default"));
      attrs.push(String::from(
        "skip_serializing_if = \"Option::is_none\"",
      ));
    }
    if !attrs.is_empty() {
      let _ =
        writeln!(out, "  #[serde({})]", attrs.join(", "));
    }
    let t = type_name(ctx, prop);
    let t = if prop.read_only {
      ctx.uses_read_only = true;
      format!("ReadOnly<{t}>")
    } else if !prop.required {
      format!("Option<{t}>")
    } else {
      t
    };
    let _ = writeln!(out, "  pub {field}: {t},");
  }
  let _ = writeln!(out, "}}\n");

  // Structural equality over the writable fields only, so
  // round-tripping service-managed metadata does not affect
  // identity.
  let writable: Vec<String> = def
    .properties
    .iter()
    .filter(|(_, prop)| !prop.read_only)
    .map(|(wire, _)| field_ident(wire))
    .collect();
  let _ =
    writeln!(out, "impl PartialEq for {} {{", type_ident(&def.name));
  if writable.is_empty() {
    let _ =
      writeln!(out, "  fn eq(&self, _other: &Self) -> bool {{");
    let _ = writeln!(out, "    true");
  } else {
    let _ =
      writeln!(out, "  fn eq(&self, other: &Self) -> bool {{");
    for (i, field) in writable.iter().enumerate() {
      let lead = if i == 0 { "    " } else { "      && " };
      let _ =
        writeln!(out, "{lead}self.{field} == other.{field}");
    }
  }
  let _ = writeln!(out, "  }}");
  let _ = writeln!(out, "}}\n");
}

fn emit_enum(out: &mut String, e: &IrEnum) {
  emit_doc(out, e.description.as_deref(), "");
  let _ = writeln!(
    out,
    "#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]"
  );
  let _ = writeln!(out, "pub enum {} {{", type_ident(&e.name));
  for value in &e.values {
    let _ =
      writeln!(out, "  #[serde(rename = \"{}\")]", value.wire);
    let _ = writeln!(out, "  {},", value.ident);
  }
  let _ = writeln!(out, "}}\n");
}

fn emit_ops(
  out: &mut String,
  ctx: &mut Ctx,
  group: &str,
  ops: &[&IrOp],
) {
  let struct_name = if group.is_empty() {
    String::from("AzOps")
  } else {
    format!("Az{}", type_ident(group))
  };
  let _ = writeln!(out, "pub struct {struct_name};\n");
  let _ = writeln!(out, "impl {struct_name} {{");
  for (i, op) in ops.iter().enumerate() {
    if i > 0 {
      let _ = writeln!(out);
    }
    emit_op(out, ctx, group, op);
  }
  let _ = writeln!(out, "}}\n");
}

fn emit_op(out: &mut String, ctx: &mut Ctx, group: &str, op: &IrOp) {
  emit_doc(out, op.description.as_deref(), "  ");

  let ret = match &op.ret {
    None => String::from("()"),
    Some(ir) if !ir.required => {
      format!("Option<{}>", type_name(ctx, ir))
    }
    Some(ir) => type_name(ctx, ir),
  };
  let body = op
    .body
    .as_ref()
    .filter(|_| op.method.has_body());
  let fn_ret = if body.is_some() {
    format!("serde_json::Result<Req<{ret}>>")
  } else {
    format!("Req<{ret}>")
  };

  // signature
  let mut args = Vec::new();
  for (wire, t) in &op.url_params {
    args.push(format!(
      "{}: {}",
      field_ident(wire),
      param_type(t)
    ));
  }
  if let Some((t, name)) = body {
    args.push(format!(
      "{}: &{}",
      field_ident(name),
      type_name(ctx, t)
    ));
  }
  for (wire, t) in &op.query_params {
    let ident = field_ident(wire);
    let t = if t.required {
      param_type(t).to_string()
    } else {
      format!("Option<{}>", param_type(t))
    };
    args.push(format!("{ident}: {t}"));
  }
  let fn_name = fn_ident(&op.name);
  if args.is_empty() {
    let _ = writeln!(out, "  pub fn {fn_name}() -> {fn_ret} {{");
  } else {
    let _ = writeln!(out, "  pub fn {fn_name}(");
    for arg in &args {
      let _ = writeln!(out, "    {arg},");
    }
    let _ = writeln!(out, "  ) -> {fn_ret} {{");
  }

  // path template with url params interpolated
  let mut path = op.path.clone();
  for wire in op.url_params.keys() {
    path = path.replace(
      &format!("{{{wire}}}"),
      &format!("{{{}}}", field_ident(wire)),
    );
  }
  let path_expr = if op.url_params.is_empty() {
    format!("\"{path}\"")
  } else {
    format!("format!(\"{path}\")")
  };

  let req_name = if group.is_empty() {
    op.name.clone()
  } else {
    format!("{group}.{}", op.name)
  };
  let constructor = op.method.constructor();
  let has_query = !op.query_params.is_empty();

  let mut ctor_args = String::new();
  let _ = writeln!(ctor_args, "      \"{req_name}\",");
  let _ = writeln!(ctor_args, "      {path_expr},");
  let _ = writeln!(ctor_args, "      API_VERSION,");
  if op.method.has_body() {
    match body {
      Some((_, name)) => {
        let _ = writeln!(
          ctor_args,
          "      Some(serde_json::to_value({})?),",
          field_ident(name)
        );
      }
      None => {
        let _ = writeln!(ctor_args, "      None,");
      }
    }
  }

  if has_query {
    let _ =
      writeln!(out, "    let mut req = Req::{constructor}(");
    out.push_str(&ctor_args);
    let _ = writeln!(out, "    );");
    for (wire, t) in &op.query_params {
      let ident = field_ident(wire);
      if t.required {
        let _ = writeln!(
          out,
          "    req = req.add_params([(\n      String::from(\"{wire}\"),\n      {ident}.to_string(),\n    )]);"
        );
      } else {
        let _ = writeln!(
          out,
          "    if let Some({ident}) = {ident} {{\n      req = req.add_params([(\n        String::from(\"{wire}\"),\n        {ident}.to_string(),\n      )]);\n    }}"
        );
      }
    }
    if body.is_some() {
      let _ = writeln!(out, "    Ok(req)");
    } else {
      let _ = writeln!(out, "    req");
    }
  } else if body.is_some() {
    let _ = writeln!(out, "    Ok(Req::{constructor}(");
    out.push_str(&ctor_args);
    let _ = writeln!(out, "    ))");
  } else {
    let _ = writeln!(out, "    Req::{constructor}(");
    out.push_str(&ctor_args);
    let _ = writeln!(out, "    )");
  }
  let _ = writeln!(out, "  }}");
}

/// Nested types minted during resolution which need their own
/// emission.
enum Nested {
  Def(IrDef),
  Enum(IrEnum),
}

fn collect_nested(
  ir: &IrT,
  current: &Path,
  out: &mut Vec<Nested>,
) {
  match &ir.t {
    IrKind::Def(def) => {
      if def.src.as_deref() != Some(current) {
        return;
      }
      for prop in def.properties.values() {
        collect_nested_inner(prop, current, out);
      }
    }
    IrKind::List(item) | IrKind::Dict(item) => {
      collect_nested(item, current, out);
    }
    _ => {}
  }
}

fn collect_nested_inner(
  ir: &IrT,
  current: &Path,
  out: &mut Vec<Nested>,
) {
  match &ir.t {
    IrKind::Def(def) => {
      if def.src.as_deref() == Some(current) {
        out.push(Nested::Def(def.clone()));
        for prop in def.properties.values() {
          collect_nested_inner(prop, current, out);
        }
      }
    }
    IrKind::Enum(e) => out.push(Nested::Enum(e.clone())),
    IrKind::List(item) | IrKind::Dict(item) => {
      collect_nested_inner(item, current, out);
    }
    _ => {}
  }
}

/// Render a type in field or return position, recording imports.
fn type_name(ctx: &mut Ctx, ir: &IrT) -> String {
  match &ir.t {
    IrKind::Str => String::from("String"),
    IrKind::Int => String::from("i64"),
    IrKind::Float => String::from("f64"),
    IrKind::Bool => String::from("bool"),
    IrKind::Any => String::from("serde_json::Value"),
    IrKind::Def(def) => {
      ctx.reference(def);
      type_ident(&def.name)
    }
    IrKind::Enum(e) => type_ident(&e.name),
    IrKind::Name(name) => type_ident(name),
    IrKind::List(item) => {
      format!("Vec<{}>", type_name(ctx, item))
    }
    IrKind::Dict(value) => format!(
      "std::collections::HashMap<String, {}>",
      type_name(ctx, value)
    ),
  }
}

/// Argument type for a path or query parameter.
fn param_type(ir: &IrT) -> &'static str {
  match ir.t {
    IrKind::Int => "i64",
    IrKind::Float => "f64",
    IrKind::Bool => "bool",
    _ => "&str",
  }
}

fn emit_doc(out: &mut String, doc: Option<&str>, indent: &str) {
  if let Some(doc) = doc {
    for line in doc.lines() {
      let line = line.trim_end();
      if line.is_empty() {
        let _ = writeln!(out, "{indent}///");
      } else {
        let _ = writeln!(out, "{indent}/// {line}");
      }
    }
  }
}

/// A type identifier: the definition name restricted to what
/// Rust accepts.
fn type_ident(name: &str) -> String {
  let mut ident: String = name
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
  ident
}

/// A field or argument identifier, with keywords escaped.
fn field_ident(wire: &str) -> String {
  let ident = wire
    .trim_start_matches('$')
    .to_snake_case();
  if RUST_KEYWORDS.contains(&ident.as_str()) {
    format!("r#{ident}")
  } else {
    ident
  }
}

/// A function identifier from an operation name.
fn fn_ident(name: &str) -> String {
  field_ident(&name.to_upper_camel_case())
}
