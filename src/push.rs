//! Push payload rendering and notification click routing.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
}

/// Incoming push body. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushPayload {
  title: Option<String>,
  body: Option<String>,
  tag: Option<String>,
  require_interaction: Option<bool>,
  #[serde(default)]
  actions: Vec<NotificationAction>,
  data: Option<Value>,
}

/// A notification ready for the host to display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub tag: String,
  pub require_interaction: bool,
  pub actions: Vec<NotificationAction>,
  pub data: Value,
}

/// Render a push body. Empty or malformed payloads produce no notification.
pub fn render(payload: &[u8], config: &Config) -> Option<Notification> {
  if payload.iter().all(u8::is_ascii_whitespace) {
    debug!("Ignoring push without payload");
    return None;
  }

  let payload: PushPayload = match serde_json::from_slice(payload) {
    Ok(payload) => payload,
    Err(e) => {
      warn!(error = %e, "Ignoring malformed push payload");
      return None;
    }
  };

  Some(Notification {
    title: payload.title.unwrap_or_else(|| config.app_name.clone()),
    body: payload
      .body
      .unwrap_or_else(|| format!("{} notification", config.app_name)),
    icon: config.push.icon.clone(),
    badge: config.push.badge.clone(),
    tag: payload.tag.unwrap_or_else(|| "general".to_string()),
    require_interaction: payload.require_interaction.unwrap_or(false),
    actions: payload.actions,
    data: payload
      .data
      .filter(Value::is_object)
      .unwrap_or_else(|| Value::Object(Default::default())),
  })
}

/// What a notification click should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickIntent {
  /// Focus a window showing this path, or open one
  Open(String),
  /// Close the notification and do nothing else
  Dismiss,
}

pub fn route_click(action: Option<&str>, data: &Value) -> ClickIntent {
  match action {
    Some("snooze") => return ClickIntent::Dismiss,
    Some("taken") => return ClickIntent::Open("/reminders?action=taken".to_string()),
    _ => {}
  }

  let target = match data.get("type").and_then(Value::as_str) {
    Some("medication-reminder") => "/reminders",
    Some("chat-message") => "/chatbot",
    _ if action == Some("open-app") => data.get("url").and_then(Value::as_str).unwrap_or("/"),
    _ => "/",
  };
  ClickIntent::Open(target.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_render_applies_defaults() {
    let notification = render(b"{}", &Config::default()).unwrap();
    assert_eq!(notification.title, "MediTranslate+");
    assert_eq!(notification.body, "MediTranslate+ notification");
    assert_eq!(notification.tag, "general");
    assert_eq!(notification.icon, "/static/icon-192.png");
    assert_eq!(notification.badge, "/static/badge-72.png");
    assert!(!notification.require_interaction);
    assert!(notification.actions.is_empty());
    assert!(notification.data.is_object());
  }

  #[test]
  fn test_render_full_payload() {
    let payload = json!({
      "title": "Medication Reminder",
      "body": "Time to take Metformin - 500mg",
      "tag": "medication-7",
      "requireInteraction": true,
      "actions": [{"action": "taken", "title": "Taken"}, {"action": "snooze", "title": "Snooze"}],
      "data": {"type": "medication-reminder"}
    });
    let notification = render(payload.to_string().as_bytes(), &Config::default()).unwrap();
    assert_eq!(notification.title, "Medication Reminder");
    assert_eq!(notification.tag, "medication-7");
    assert!(notification.require_interaction);
    assert_eq!(notification.actions.len(), 2);
    assert_eq!(notification.data["type"], "medication-reminder");

    let wire = serde_json::to_value(&notification).unwrap();
    assert_eq!(wire["requireInteraction"], true);
  }

  #[test]
  fn test_empty_and_malformed_payloads_are_ignored() {
    let config = Config::default();
    assert!(render(b"", &config).is_none());
    assert!(render(b"  \n", &config).is_none());
    assert!(render(b"not json", &config).is_none());
    assert!(render(b"[1, 2]", &config).is_none());
  }

  #[test]
  fn test_click_routing() {
    let none = json!({});
    assert_eq!(route_click(Some("snooze"), &none), ClickIntent::Dismiss);
    assert_eq!(
      route_click(Some("taken"), &none),
      ClickIntent::Open("/reminders?action=taken".to_string())
    );
    assert_eq!(
      route_click(None, &json!({"type": "medication-reminder"})),
      ClickIntent::Open("/reminders".to_string())
    );
    assert_eq!(
      route_click(None, &json!({"type": "chat-message"})),
      ClickIntent::Open("/chatbot".to_string())
    );
    assert_eq!(
      route_click(Some("open-app"), &json!({"url": "/prescription"})),
      ClickIntent::Open("/prescription".to_string())
    );
    assert_eq!(route_click(Some("open-app"), &none), ClickIntent::Open("/".to_string()));
    assert_eq!(route_click(None, &none), ClickIntent::Open("/".to_string()));
  }
}
