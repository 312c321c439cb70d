//! Request classification: decides which caching strategy handles a request.

use url::{Origin, Url};

use crate::config::RoutesConfig;
use crate::http::{Destination, Request};

/// Class of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  Static,
  Api,
  Image,
  Navigation,
  CrossOrigin,
  Other,
}

impl RequestClass {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Static => "static",
      Self::Api => "api",
      Self::Image => "image",
      Self::Navigation => "navigation",
      Self::CrossOrigin => "cross-origin",
      Self::Other => "other",
    }
  }
}

/// Pure classifier over URL shape and request metadata.
#[derive(Debug, Clone)]
pub struct Classifier {
  origin: Origin,
  static_root: String,
  api_root: String,
  api_routes: Vec<String>,
  static_extensions: Vec<String>,
}

impl Classifier {
  pub fn new(origin: &Url, routes: &RoutesConfig) -> Self {
    Self {
      origin: origin.origin(),
      static_root: routes.static_root.clone(),
      api_root: routes.api_root.clone(),
      api_routes: routes.api_routes.clone(),
      static_extensions: routes.static_extensions.clone(),
    }
  }

  pub fn is_same_origin(&self, url: &Url) -> bool {
    url.origin() == self.origin
  }

  /// Same-origin path under the API root or one of the legacy API routes.
  pub fn is_api_path(&self, url: &Url) -> bool {
    if !self.is_same_origin(url) {
      return false;
    }
    let path = url.path();
    path.starts_with(&self.api_root) || self.api_routes.iter().any(|r| is_route(path, r))
  }

  pub fn classify(&self, request: &Request) -> RequestClass {
    let url = &request.url;
    if !matches!(url.scheme(), "http" | "https") {
      return RequestClass::Other;
    }

    let path = url.path().to_lowercase();
    if self.static_extensions.iter().any(|ext| path.ends_with(ext.as_str()))
      || path.starts_with(&self.static_root)
    {
      return RequestClass::Static;
    }

    if self.is_api_path(url) {
      return RequestClass::Api;
    }

    let accept = request.accept().unwrap_or_default();
    if request.destination == Destination::Image || accept.contains("image/") {
      return RequestClass::Image;
    }

    if request.destination == Destination::Document || accept.contains("text/html") {
      return RequestClass::Navigation;
    }

    if !self.is_same_origin(url) {
      return RequestClass::CrossOrigin;
    }

    RequestClass::Other
  }
}

/// `path` is `route` itself or lies below it; `/chat` does not match `/chatbot`.
fn is_route(path: &str, route: &str) -> bool {
  match path.strip_prefix(route.trim_end_matches('/')) {
    Some(rest) => rest.is_empty() || rest.starts_with('/'),
    None => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn classifier() -> Classifier {
    Classifier::new(
      &Url::parse("https://app.example/").unwrap(),
      &RoutesConfig::default(),
    )
  }

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[test]
  fn test_static_by_extension_and_root() {
    let c = classifier();
    assert_eq!(c.classify(&get("https://app.example/static/img/logo")), RequestClass::Static);
    assert_eq!(c.classify(&get("https://app.example/app.JS")), RequestClass::Static);
    assert_eq!(c.classify(&get("https://app.example/manifest.json")), RequestClass::Static);
    assert_eq!(
      c.classify(&get("https://cdn.jsdelivr.net/npm/bootstrap@5.3.0/dist/css/bootstrap.min.css")),
      RequestClass::Static
    );
  }

  #[test]
  fn test_static_wins_over_api() {
    // Extension check comes first, even under the API root.
    let c = classifier();
    assert_eq!(c.classify(&get("https://app.example/api/schema.json")), RequestClass::Static);
  }

  #[test]
  fn test_api_root_and_legacy_routes() {
    let c = classifier();
    assert_eq!(c.classify(&get("https://app.example/api/chat")), RequestClass::Api);
    assert_eq!(c.classify(&get("https://app.example/get_settings")), RequestClass::Api);
    assert_eq!(c.classify(&get("https://app.example/translate")), RequestClass::Api);
  }

  #[test]
  fn test_legacy_routes_match_whole_segments() {
    let c = classifier();
    assert_eq!(c.classify(&get("https://app.example/chat")), RequestClass::Api);
    assert_eq!(c.classify(&get("https://app.example/chat/history")), RequestClass::Api);
    assert_ne!(c.classify(&get("https://app.example/chatbot")), RequestClass::Api);
    assert_ne!(c.classify(&get("https://app.example/translator")), RequestClass::Api);
  }

  #[test]
  fn test_cross_origin_api_path_is_not_ours() {
    let c = classifier();
    assert_eq!(c.classify(&get("https://other.example/api/chat")), RequestClass::CrossOrigin);
  }

  #[test]
  fn test_image_by_destination_or_accept() {
    let c = classifier();
    let by_dest = get("https://app.example/uploads/rx-1").with_destination(Destination::Image);
    let by_accept = get("https://app.example/uploads/rx-2").with_header("accept", "image/avif,image/webp");
    assert_eq!(c.classify(&by_dest), RequestClass::Image);
    assert_eq!(c.classify(&by_accept), RequestClass::Image);
  }

  #[test]
  fn test_navigation() {
    let c = classifier();
    assert_eq!(
      c.classify(&Request::navigate(Url::parse("https://app.example/reminders").unwrap())),
      RequestClass::Navigation
    );
    let by_accept = get("https://app.example/chatbot").with_header("accept", "text/html");
    assert_eq!(c.classify(&by_accept), RequestClass::Navigation);
  }

  #[test]
  fn test_cross_origin_and_other() {
    let c = classifier();
    assert_eq!(c.classify(&get("https://fonts.example/family?id=3")), RequestClass::CrossOrigin);
    assert_eq!(c.classify(&get("https://app.example/health")), RequestClass::Other);
    assert_eq!(c.classify(&get("chrome-extension://abc/script")), RequestClass::Other);
  }

  #[test]
  fn test_classification_is_deterministic() {
    let c = classifier();
    let request = get("https://app.example/api/offline-status");
    let first = c.classify(&request);
    for _ in 0..10 {
      assert_eq!(c.classify(&request), first);
    }
  }
}
