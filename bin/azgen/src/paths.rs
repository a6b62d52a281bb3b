//! Mapping from spec file paths to output module paths.

use std::path::Path;

use heck::ToSnakeCase;

/// Derive the output module path for a spec file.
///
/// `common-types` specs collapse into a `c/` tree keyed by their
/// version directory. Resource specs become
/// `<category>/<provider namespace>/<schema>`, with the provider
/// namespace split on its dots. Anything else falls back to its
/// sanitised directory path.
pub fn module_path(spec_path: &Path) -> Vec<String> {
  let parts: Vec<String> = spec_path
    .iter()
    .map(|part| part.to_string_lossy().into_owned())
    .collect();
  let stem = spec_path
    .file_stem()
    .map(|stem| stem.to_string_lossy().to_snake_case())
    .unwrap_or_else(|| String::from("unnamed"));

  if parts.iter().any(|p| p == "common-types") {
    let version = parts
      .iter()
      .rev()
      .skip(1)
      .find(|p| is_version_dir(p))
      .cloned()
      .unwrap_or_else(|| String::from("v1"));
    return vec![String::from("c"), version, stem];
  }

  if let (Some(category), Some(provider)) = (
    parts
      .iter()
      .position(|p| p == "specification")
      .and_then(|i| parts.get(i + 1)),
    parts
      .iter()
      .find(|p| p.contains('.') && !p.ends_with(".json")),
  ) {
    let mut segments = vec![category.to_snake_case()];
    segments.extend(
      provider.split('.').map(|part| part.to_snake_case()),
    );
    segments.push(stem);
    return segments;
  }

  // unfamiliar layout, keep the directories
  let mut segments: Vec<String> = parts
    .iter()
    .take(parts.len().saturating_sub(1))
    .map(|p| p.to_snake_case())
    .collect();
  segments.push(stem);
  segments
}

/// Render a module path as a Rust import path under `package`.
pub fn import_path(package: &str, segments: &[String]) -> String {
  let mut path = String::from(package);
  for segment in segments {
    path.push_str("::");
    path.push_str(segment);
  }
  path
}

fn is_version_dir(part: &str) -> bool {
  part
    .strip_prefix('v')
    .is_some_and(|rest| rest.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use super::*;

  #[test]
  fn resource_spec_maps_to_provider_tree() {
    let path = PathBuf::from(
      "specification/authorization/resource-manager/Microsoft.Authorization/stable/2022-04-01/authorization-RoleAssignmentsCalls.json",
    );
    assert_eq!(
      module_path(&path),
      vec![
        "authorization",
        "microsoft",
        "authorization",
        "authorization_role_assignments_calls",
      ]
    );
  }

  #[test]
  fn common_types_collapse_to_c_tree() {
    let path = PathBuf::from(
      "specification/common-types/resource-management/v2/types.json",
    );
    assert_eq!(module_path(&path), vec!["c", "v2", "types"]);
  }

  #[test]
  fn unfamiliar_layout_keeps_directories() {
    let path = PathBuf::from("local/specs/thing.json");
    assert_eq!(
      module_path(&path),
      vec!["local", "specs", "thing"]
    );
  }

  #[test]
  fn import_path_joins_segments() {
    assert_eq!(
      import_path(
        "crate",
        &[String::from("c"), String::from("v2")]
      ),
      "crate::c::v2"
    );
  }
}
