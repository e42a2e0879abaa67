//! Request descriptors and resource classification.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::config::ClassificationConfig;

/// Header map with unique, lowercased names.
pub type Headers = BTreeMap<String, String>;

/// Category of a requested resource, used to pick a caching strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceClass {
  Document,
  Api,
  StaticAsset,
  Other,
}

impl ResourceClass {
  pub const ALL: [ResourceClass; 4] = [
    ResourceClass::Document,
    ResourceClass::Api,
    ResourceClass::StaticAsset,
    ResourceClass::Other,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Document => "document",
      Self::Api => "api",
      Self::StaticAsset => "staticAsset",
      Self::Other => "other",
    }
  }
}

impl fmt::Display for ResourceClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ResourceClass {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
      "document" => Ok(Self::Document),
      "api" => Ok(Self::Api),
      "staticasset" => Ok(Self::StaticAsset),
      "other" => Ok(Self::Other),
      _ => Err(format!(
        "unknown resource class '{}' (expected document, api, staticAsset or other)",
        s
      )),
    }
  }
}

/// One intercepted request. Built once by the caller, then only read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
  url: String,
  resource_class: Option<ResourceClass>,
  method: String,
  headers: Headers,
}

impl RequestDescriptor {
  /// Create a GET descriptor for `url`.
  pub fn get(url: impl Into<String>) -> Self {
    Self::new(url, "GET")
  }

  pub fn new(url: impl Into<String>, method: impl AsRef<str>) -> Self {
    Self {
      url: url.into(),
      resource_class: None,
      method: method.as_ref().to_ascii_uppercase(),
      headers: Headers::new(),
    }
  }

  /// Pin the resource class instead of deriving it from the url.
  pub fn with_class(mut self, class: ResourceClass) -> Self {
    self.resource_class = Some(class);
    self
  }

  /// Add a header. A later value for the same name replaces the earlier one.
  pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
    self
      .headers
      .insert(name.as_ref().to_ascii_lowercase(), value.into());
    self
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn resource_class(&self) -> Option<ResourceClass> {
    self.resource_class
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn headers(&self) -> &Headers {
    &self.headers
  }

  /// Only GET responses are ever read from or written to a partition.
  pub fn is_cacheable(&self) -> bool {
    self.method == "GET"
  }

  /// Path component of the url, without query or fragment.
  pub fn path(&self) -> String {
    match Url::parse(&self.url) {
      Ok(parsed) => parsed.path().to_string(),
      Err(_) => {
        let end = self.url.find(['?', '#']).unwrap_or(self.url.len());
        self.url[..end].to_string()
      }
    }
  }
}

/// Derives a [`ResourceClass`] from url heuristics when the caller gave none.
#[derive(Debug, Clone)]
pub struct Classifier {
  api_prefixes: Vec<String>,
  document_extensions: Vec<String>,
}

impl Classifier {
  pub fn new(config: &ClassificationConfig) -> Self {
    Self {
      api_prefixes: config.api_prefixes.clone(),
      document_extensions: config
        .document_extensions
        .iter()
        .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
        .collect(),
    }
  }

  pub fn classify(&self, descriptor: &RequestDescriptor) -> ResourceClass {
    if let Some(class) = descriptor.resource_class() {
      return class;
    }

    let path = descriptor.path();

    if self
      .api_prefixes
      .iter()
      .any(|prefix| path.starts_with(prefix.as_str()))
    {
      return ResourceClass::Api;
    }

    if path.is_empty() || path == "/" {
      return ResourceClass::Document;
    }

    let last_segment = path.rsplit('/').next().unwrap_or_default();
    let is_document = last_segment
      .rsplit_once('.')
      .map(|(_, ext)| {
        let ext = ext.to_ascii_lowercase();
        self.document_extensions.iter().any(|d| *d == ext)
      })
      .unwrap_or(false);

    if is_document {
      ResourceClass::Document
    } else {
      ResourceClass::StaticAsset
    }
  }
}
