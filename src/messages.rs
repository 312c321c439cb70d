//! Control-plane messages posted by the host application.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::sync::SyncKind;

/// A translation result the UI wants available offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationRecord {
  pub text: String,
  pub source_lang: String,
  pub target_lang: String,
  #[serde(default)]
  pub translated_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  /// Activate the waiting generation now
  SkipWaiting,
  /// Reply with the current cache generation token
  GetVersion,
  /// Delete every bucket
  ClearCache,
  /// Store a translation under its text + language-pair key
  CacheTranslation { translation: TranslationRecord },
  /// Durably queue a mutation for background sync
  QueueSync { kind: SyncKind, payload: Value },
}

impl ControlMessage {
  /// Parse a posted message. Unknown or malformed messages are logged and dropped.
  pub fn parse(data: &Value) -> Option<Self> {
    match serde_json::from_value(data.clone()) {
      Ok(message) => Some(message),
      Err(e) => {
        let kind = data.get("type").and_then(Value::as_str).unwrap_or("<none>");
        warn!(kind, error = %e, "Ignoring unknown control message");
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_simple_messages() {
    assert_eq!(
      ControlMessage::parse(&json!({"type": "SKIP_WAITING"})),
      Some(ControlMessage::SkipWaiting)
    );
    assert_eq!(
      ControlMessage::parse(&json!({"type": "GET_VERSION"})),
      Some(ControlMessage::GetVersion)
    );
    assert_eq!(
      ControlMessage::parse(&json!({"type": "CLEAR_CACHE"})),
      Some(ControlMessage::ClearCache)
    );
  }

  #[test]
  fn test_parse_cache_translation() {
    let message = ControlMessage::parse(&json!({
      "type": "CACHE_TRANSLATION",
      "translation": {
        "text": "Take one tablet",
        "source_lang": "en",
        "target_lang": "hi",
        "translated_text": "एक गोली लें"
      }
    }))
    .unwrap();

    match message {
      ControlMessage::CacheTranslation { translation } => {
        assert_eq!(translation.target_lang, "hi");
        assert_eq!(translation.translated_text, "एक गोली लें");
      }
      other => panic!("unexpected message {:?}", other),
    }
  }

  #[test]
  fn test_parse_queue_sync() {
    let message = ControlMessage::parse(&json!({
      "type": "QUEUE_SYNC",
      "kind": "chat",
      "payload": {"message": "headache since morning"}
    }));
    assert!(matches!(
      message,
      Some(ControlMessage::QueueSync { kind: SyncKind::Chat, .. })
    ));
  }

  #[test]
  fn test_unknown_and_malformed_are_dropped() {
    assert_eq!(ControlMessage::parse(&json!({"type": "REBOOT"})), None);
    assert_eq!(ControlMessage::parse(&json!({"no_type": true})), None);
    assert_eq!(ControlMessage::parse(&json!("SKIP_WAITING")), None);
    assert_eq!(
      ControlMessage::parse(&json!({"type": "CACHE_TRANSLATION"})),
      None
    );
  }
}
