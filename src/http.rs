//! Request and response types exchanged between the host, the router and the network.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// Ordered header list. Names are lowercased; repeated names are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "HeaderRepr")]
pub struct Headers(Vec<(String, String)>);

/// Stored form. Entries written before repeated headers were kept are maps.
#[derive(Deserialize)]
#[serde(untagged)]
enum HeaderRepr {
  List(Vec<(String, String)>),
  Map(BTreeMap<String, String>),
}

impl From<HeaderRepr> for Headers {
  fn from(repr: HeaderRepr) -> Self {
    let pairs = match repr {
      HeaderRepr::List(pairs) => pairs,
      HeaderRepr::Map(map) => map.into_iter().collect(),
    };
    pairs.into_iter().fold(Self::default(), |mut headers, (name, value)| {
      headers.append(&name, value);
      headers
    })
  }
}

impl Headers {
  pub fn new() -> Self {
    Self::default()
  }

  /// First value for `name`.
  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .0
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  #[cfg(test)]
  pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    self
      .0
      .iter()
      .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Replace every value of `name` with `value`.
  pub fn set(&mut self, name: &str, value: impl Into<String>) {
    self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    self.append(name, value);
  }

  pub fn append(&mut self, name: &str, value: impl Into<String>) {
    self.0.push((name.to_lowercase(), value.into()));
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
  }

  #[cfg(test)]
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  #[cfg(test)]
  pub fn clear(&mut self) {
    self.0.clear();
  }
}

impl From<&reqwest::header::HeaderMap> for Headers {
  fn from(map: &reqwest::header::HeaderMap) -> Self {
    map.iter().fold(Self::default(), |mut headers, (name, value)| {
      headers.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()).into_owned());
      headers
    })
  }
}

/// What the host says the request is for (mirrors `Request.destination`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Destination {
  #[default]
  Empty,
  Document,
  Image,
  Script,
  Style,
  Font,
  Manifest,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      destination: Destination::Empty,
      headers: Headers::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// A top-level page load.
  pub fn navigate(url: Url) -> Self {
    Self::get(url)
      .with_destination(Destination::Document)
      .with_header("accept", "text/html,application/xhtml+xml")
  }

  /// A JSON POST, as the UI issues for translate/chat calls.
  pub fn post_json(url: Url, body: &serde_json::Value) -> Self {
    Self::new(Method::POST, url)
      .with_header("content-type", "application/json")
      .with_body(body.to_string().into_bytes())
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.set(name, value);
    self
  }

  pub fn with_body(mut self, body: Vec<u8>) -> Self {
    self.body = Some(body);
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(name)
  }

  pub fn accept(&self) -> Option<&str> {
    self.header("accept")
  }

  pub fn is_get(&self) -> bool {
    self.method == Method::GET
  }

  /// Canonical identity used as the stored-entry key: method + URL without fragment.
  pub fn cache_key(&self) -> String {
    cache_key(&self.method, &self.url)
  }
}

pub fn cache_key(method: &Method, url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  format!("{} {}", method, url)
}

/// Where a response came from. Diagnostic only; never alters the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
  Network,
  Cache,
  Offline,
}

impl std::fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Offline => "offline",
    };
    f.write_str(s)
  }
}

/// A response handed back to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
  pub source: ResponseSource,
}

impl Response {
  pub fn new(status: u16, body: Vec<u8>, source: ResponseSource) -> Self {
    Self {
      status,
      headers: Headers::new(),
      body,
      source,
    }
  }

  pub fn json(status: u16, value: &serde_json::Value) -> Self {
    Self::new(status, value.to_string().into_bytes(), ResponseSource::Offline)
      .with_header("content-type", "application/json")
  }

  pub fn html(status: u16, document: String) -> Self {
    Self::new(status, document.into_bytes(), ResponseSource::Offline)
      .with_header("content-type", "text/html; charset=utf-8")
  }

  pub fn text(status: u16, text: &str) -> Self {
    Self::new(status, text.as_bytes().to_vec(), ResponseSource::Offline)
      .with_header("content-type", "text/plain")
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.set(name, value);
    self
  }

  /// 2xx, the only responses eligible for caching.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn content_type(&self) -> Option<&str> {
    self.headers.get("content-type")
  }

  #[cfg(test)]
  pub fn json_body(&self) -> Option<serde_json::Value> {
    serde_json::from_slice(&self.body).ok()
  }
}
