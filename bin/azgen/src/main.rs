use std::{
  collections::{BTreeMap, BTreeSet, HashSet},
  path::{Path, PathBuf},
};

use anyhow::Context;

use crate::ir::IrTransformer;

#[macro_use]
extern crate tracing;

mod codegen;
mod config;
mod ir;
mod openapi;
mod paths;
mod reader;

fn main() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();

  let config = config::load()?;
  logger::init(&config.logging)?;

  info!("azgen version: v{}", env!("CARGO_PKG_VERSION"));

  let specs: Vec<PathBuf> = config
    .specs
    .split([',', ';'])
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(PathBuf::from)
    .collect();
  anyhow::ensure!(!specs.is_empty(), "no spec files given");

  let mut tx = IrTransformer::new(config.root.clone());
  let mut emitted: HashSet<PathBuf> = HashSet::new();
  let mut modules: Vec<Vec<String>> = Vec::new();
  let mut queue = specs;

  while let Some(path) = queue.pop() {
    if !emitted.insert(path.clone()) {
      continue;
    }
    let file = tx.transform_file(&path)?;
    let module = codegen::emit_module(&file, &config.package);
    let segments = paths::module_path(&path);
    write_module(&config.output, &segments, &module)?;
    info!(
      "generated | spec: {} | module: {}",
      path.display(),
      segments.join("::")
    );
    modules.push(segments);

    // Documents discovered through cross-file references are
    // emitted too, so every import has a target.
    let mut loaded = tx.loaded();
    loaded.sort();
    for path in loaded {
      if !emitted.contains(&path) {
        queue.push(path);
      }
    }
  }

  write_module_tree(&config.output, &modules)?;
  info!(
    "generated {} modules into {}",
    modules.len(),
    config.output.display()
  );
  Ok(())
}

fn write_module(
  output: &Path,
  segments: &[String],
  contents: &str,
) -> anyhow::Result<()> {
  let leaf =
    segments.last().context("empty module path")?;
  let mut path = output.to_path_buf();
  for segment in &segments[..segments.len() - 1] {
    path.push(segment);
  }
  std::fs::create_dir_all(&path).with_context(|| {
    format!("failed to create {}", path.display())
  })?;
  path.push(format!("{leaf}.rs"));
  std::fs::write(&path, contents).with_context(|| {
    format!("failed to write {}", path.display())
  })?;
  Ok(())
}

/// Write the `mod.rs` chain declaring every generated module.
fn write_module_tree(
  output: &Path,
  modules: &[Vec<String>],
) -> anyhow::Result<()> {
  let mut children: BTreeMap<PathBuf, BTreeSet<String>> =
    BTreeMap::new();
  for segments in modules {
    for i in 0..segments.len() {
      let dir: PathBuf = segments[..i].iter().collect();
      children
        .entry(dir)
        .or_default()
        .insert(segments[i].clone());
    }
  }
  for (dir, mods) in children {
    let path = output.join(&dir).join("mod.rs");
    let contents: String = mods
      .iter()
      .map(|m| format!("pub mod {m};\n"))
      .collect();
    std::fs::write(&path, contents).with_context(|| {
      format!("failed to write {}", path.display())
    })?;
  }
  Ok(())
}
