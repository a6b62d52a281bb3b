//! Loading Microsoft OpenAPI specifications, including documents
//! referenced across files.

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  sync::Arc,
};

use serde_json::Value;

/// A document which could not be read or parsed.
/// Fatal for the generation run.
#[derive(thiserror::Error, Debug)]
pub enum LoadError {
  #[error("failed to read {path} | {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },

  #[error("failed to fetch {url} | {source}")]
  Http { url: String, source: reqwest::Error },

  #[error("{path} is not valid json | {source}")]
  Json {
    path: PathBuf,
    source: serde_json::Error,
  },

  #[error("unsupported spec root: {0}")]
  Root(String),
}

/// A `$ref` naming a path which does not exist in the target
/// document. Fatal for the generation run.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("Error while looking up path: {path}")]
pub struct PathLookupError {
  pub path: String,
  pub segment: String,
}

/// Walk a `/`-separated object path into a document, skipping
/// empty segments.
pub fn get_by_path<'a>(
  doc: &'a Value,
  object_path: &str,
) -> Result<&'a Value, PathLookupError> {
  let mut current = doc;
  for segment in
    object_path.split('/').filter(|s| !s.is_empty())
  {
    current = current
      .as_object()
      .and_then(|o| o.get(segment))
      .ok_or_else(|| PathLookupError {
        path: object_path.to_string(),
        segment: segment.to_string(),
      })?;
  }
  Ok(current)
}

/// Split a `$ref` into its file part and its object path.
pub fn split_ref(reference: &str) -> (Option<&str>, &str) {
  match reference.split_once('#') {
    Some((file, object_path)) => {
      let file = (!file.is_empty()).then_some(file);
      (file, object_path.trim_start_matches('/'))
    }
    None => (Some(reference), ""),
  }
}

/// Resolve a relative file reference against the directory of the
/// referring document, folding `.` and `..` segments textually
/// (the path may name a remote document).
pub fn normalise(base: &Path, relative: &str) -> PathBuf {
  let mut parts: Vec<String> = Vec::new();
  let combined = base.join(relative);
  for component in combined.components() {
    match component {
      std::path::Component::Normal(part) => {
        parts.push(part.to_string_lossy().into_owned());
      }
      std::path::Component::ParentDir => {
        if parts.pop().is_none() {
          parts.push(String::from(".."));
        }
      }
      _ => {}
    }
  }
  parts.iter().collect()
}

/// One parsed OpenAPI document.
#[derive(Debug)]
pub struct Reader {
  /// Path of this document relative to the spec root.
  pub path: PathBuf,
  doc: Value,
}

impl Reader {
  /// Load the document at `path` under `root`. The root is a
  /// `http(s)://` or `file://` uri, or a bare directory.
  pub fn load(
    root: &str,
    path: &Path,
  ) -> Result<Reader, LoadError> {
    let text = fetch(root, path)?;
    let doc = serde_json::from_str(&text).map_err(|e| {
      LoadError::Json {
        path: path.to_path_buf(),
        source: e,
      }
    })?;
    Ok(Reader {
      path: path.to_path_buf(),
      doc,
    })
  }

  #[cfg(test)]
  pub fn from_value(path: impl Into<PathBuf>, doc: Value) -> Reader {
    Reader {
      path: path.into(),
      doc,
    }
  }

  /// The spec's api version (`info.version`).
  pub fn api_version(&self) -> Option<&str> {
    self.doc["info"]["version"].as_str()
  }

  /// All paths: the union of `paths` and `x-ms-paths`.
  pub fn paths(&self) -> Vec<(&String, &Value)> {
    ["paths", "x-ms-paths"]
      .iter()
      .filter_map(|key| self.doc[*key].as_object())
      .flatten()
      .collect()
  }

  /// The document's type definitions.
  pub fn definitions(&self) -> Vec<(&String, &Value)> {
    self.doc["definitions"]
      .as_object()
      .into_iter()
      .flatten()
      .collect()
  }

  /// Look up an object path in this document.
  pub fn resolve(
    &self,
    object_path: &str,
  ) -> Result<&Value, PathLookupError> {
    get_by_path(&self.doc, object_path)
  }
}

/// Per-run cache of loaded documents, so each file is fetched and
/// parsed at most once.
#[derive(Debug)]
pub struct ReaderCache {
  root: String,
  readers: HashMap<PathBuf, Arc<Reader>>,
}

impl ReaderCache {
  pub fn new(root: impl Into<String>) -> ReaderCache {
    ReaderCache {
      root: root.into(),
      readers: HashMap::new(),
    }
  }

  /// Load `path`, or return the cached document.
  pub fn load(
    &mut self,
    path: &Path,
  ) -> Result<Arc<Reader>, LoadError> {
    if let Some(reader) = self.readers.get(path) {
      return Ok(reader.clone());
    }
    tracing::debug!("loading spec | path: {}", path.display());
    let reader = Arc::new(Reader::load(&self.root, path)?);
    self.readers.insert(path.to_path_buf(), reader.clone());
    Ok(reader)
  }

  /// Resolve a `$ref` from `current` to the document holding the
  /// target, and the object path within it. Without a file part
  /// the target is `current` itself.
  pub fn load_relative(
    &mut self,
    current: &Arc<Reader>,
    reference: &str,
  ) -> Result<(Arc<Reader>, String), LoadError> {
    let (file, object_path) = split_ref(reference);
    match file {
      None => Ok((current.clone(), object_path.to_string())),
      Some(file) => {
        let base =
          current.path.parent().unwrap_or(Path::new(""));
        let target = normalise(base, file);
        Ok((self.load(&target)?, object_path.to_string()))
      }
    }
  }

  /// Paths of every document loaded so far.
  pub fn loaded(&self) -> Vec<PathBuf> {
    self.readers.keys().cloned().collect()
  }

  #[cfg(test)]
  pub fn insert(&mut self, reader: Reader) -> Arc<Reader> {
    let reader = Arc::new(reader);
    self
      .readers
      .insert(reader.path.clone(), reader.clone());
    reader
  }
}

fn fetch(root: &str, path: &Path) -> Result<String, LoadError> {
  if root.starts_with("http://") || root.starts_with("https://") {
    let mut root = root.to_string();
    if !root.ends_with('/') {
      root.push('/');
    }
    let url = url::Url::parse(&root)
      .and_then(|u| u.join(&path.to_string_lossy()))
      .map_err(|e| LoadError::Root(format!("{root} | {e}")))?;
    reqwest::blocking::get(url.clone())
      .and_then(|res| res.error_for_status())
      .and_then(|res| res.text())
      .map_err(|e| LoadError::Http {
        url: url.to_string(),
        source: e,
      })
  } else {
    let base = root.strip_prefix("file://").unwrap_or(root);
    let full = Path::new(base).join(path);
    std::fs::read_to_string(&full)
      .map_err(|e| LoadError::Io {
        path: full,
        source: e,
      })
  }
}
