//! Window clients known to the worker.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

/// A page the worker may control.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Client {
  pub id: String,
  pub url: Url,
  /// Whether this generation controls the page's fetches
  pub controlled: bool,
  pub focused: bool,
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
  clients: BTreeMap<String, Client>,
  next_id: u64,
}

impl ClientRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  fn allocate_id(&mut self) -> String {
    self.next_id += 1;
    format!("client-{}", self.next_id)
  }

  /// Register a page that loaded. Pages that load while a generation is
  /// controlling start out controlled.
  pub fn connect(&mut self, url: Url, controlled: bool) -> Client {
    let id = self.allocate_id();
    let client = Client {
      id: id.clone(),
      url,
      controlled,
      focused: false,
    };
    debug!(id = %id, url = %client.url, controlled, "Client connected");
    self.clients.insert(id, client.clone());
    client
  }

  pub fn get(&self, id: &str) -> Option<&Client> {
    self.clients.get(id)
  }

  /// Every known client, optionally including uncontrolled ones.
  pub fn match_all(&self, include_uncontrolled: bool) -> Vec<&Client> {
    self
      .clients
      .values()
      .filter(|c| include_uncontrolled || c.controlled)
      .collect()
  }

  pub fn is_controlled(&self, id: &str) -> bool {
    self.get(id).is_some_and(|c| c.controlled)
  }

  /// Take control of every uncontrolled client. Returns how many changed hands.
  pub fn claim(&mut self) -> usize {
    let mut claimed = 0;
    for client in self.clients.values_mut().filter(|c| !c.controlled) {
      client.controlled = true;
      claimed += 1;
    }
    claimed
  }

  /// Focus the first client whose URL contains `target`.
  pub fn focus_matching(&mut self, target: &str) -> Option<Client> {
    let id = self
      .match_all(true)
      .into_iter()
      .find(|c| c.url.as_str().contains(target))
      .map(|c| c.id.clone())?;

    for client in self.clients.values_mut() {
      client.focused = client.id == id;
    }
    self.clients.get(&id).cloned()
  }

  /// Open a new focused window.
  pub fn open_window(&mut self, url: Url) -> Client {
    for client in self.clients.values_mut() {
      client.focused = false;
    }
    let id = self.allocate_id();
    let client = Client {
      id: id.clone(),
      url,
      controlled: true,
      focused: true,
    };
    self.clients.insert(id, client.clone());
    client
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_claim_takes_uncontrolled_clients() {
    let mut registry = ClientRegistry::new();
    registry.connect(url("https://app.example/"), false);
    registry.connect(url("https://app.example/reminders"), false);
    registry.connect(url("https://app.example/chatbot"), true);

    assert_eq!(registry.match_all(false).len(), 1);
    assert_eq!(registry.claim(), 2);
    assert_eq!(registry.match_all(false).len(), 3);
    assert_eq!(registry.claim(), 0);
  }

  #[test]
  fn test_focus_matching_prefers_existing_window() {
    let mut registry = ClientRegistry::new();
    let home = registry.connect(url("https://app.example/"), true);
    let reminders = registry.connect(url("https://app.example/reminders"), true);

    let focused = registry.focus_matching("/reminders").unwrap();
    assert_eq!(focused.id, reminders.id);
    assert!(focused.focused);
    assert!(!registry.get(&home.id).unwrap().focused);

    assert!(registry.focus_matching("/chatbot").is_none());
  }

  #[test]
  fn test_open_window_adds_focused_client() {
    let mut registry = ClientRegistry::new();
    let existing = registry.connect(url("https://app.example/"), true);
    registry.focus_matching("/");

    let opened = registry.open_window(url("https://app.example/chatbot"));
    assert!(opened.focused);
    assert!(registry.is_controlled(&opened.id));
    assert!(!registry.get(&existing.id).unwrap().focused);
    assert_eq!(registry.match_all(true).len(), 2);
  }

  #[test]
  fn test_unknown_client_is_not_controlled() {
    let registry = ClientRegistry::new();
    assert!(!registry.is_controlled("client-42"));
  }
}
