//! Offline response synthesis.
//!
//! The terminal fallback of the pipeline: when neither network nor cache can
//! answer, build a response with the same shape the UI expects from a live call.
//! Nothing here can fail.

use serde_json::json;
use url::Url;

use crate::classify::RequestClass;
use crate::config::Config;
use crate::http::Response;

#[derive(Debug, Clone)]
pub struct OfflineResponder {
  app_name: String,
  emergency_number: String,
}

impl OfflineResponder {
  pub fn new(config: &Config) -> Self {
    Self {
      app_name: config.app_name.clone(),
      emergency_number: config.emergency_number.clone(),
    }
  }

  /// Pick the fallback by request class.
  pub fn for_class(&self, class: RequestClass, url: &Url) -> Response {
    match class {
      RequestClass::Api => self.api(url),
      RequestClass::Navigation => self.navigation(),
      _ => self.resource(),
    }
  }

  /// Contract-preserving JSON for an API endpoint.
  pub fn api(&self, url: &Url) -> Response {
    let path = url.path();

    if path.contains("/translate") {
      return Response::json(
        503,
        &json!({
          "success": false,
          "error": "Translation service unavailable offline. Please check your connection.",
          "offline": true,
        }),
      );
    }

    if path.contains("/chat") {
      return Response::json(
        200,
        &json!({
          "response": format!(
            "I am currently offline. Please connect to the internet to chat with me. For emergencies, call {}.",
            self.emergency_number
          ),
          "offline": true,
          "language": "en",
        }),
      );
    }

    if path.contains("/scan-prescription") || path.contains("/scan_prescription") {
      return Response::json(
        503,
        &json!({
          "error": "OCR scanning requires internet connection",
          "offline": true,
          "message": "Please connect to the internet or use manual entry",
        }),
      );
    }

    if path.contains("/offline-status") {
      return Response::json(
        200,
        &json!({
          "status": "offline",
          "features_available": ["reminders", "manual_entry"],
          "message": "Limited functionality available offline",
        }),
      );
    }

    if path.contains("/get_settings") {
      return Response::json(
        200,
        &json!({
          "success": true,
          "settings": {
            "theme": "light",
            "language": "en",
            "voice_enabled": true,
            "notifications_enabled": true,
            "settings_data": {},
          },
        }),
      );
    }

    Response::json(
      503,
      &json!({
        "error": "Service unavailable offline",
        "offline": true,
        "message": "This feature requires an internet connection",
      }),
    )
  }

  /// Standalone offline page for navigations with no cached copy.
  pub fn navigation(&self) -> Response {
    let document = OFFLINE_PAGE
      .replace("{{APP_NAME}}", &html_escape(&self.app_name))
      .replace("{{EMERGENCY}}", &html_escape(&self.emergency_number));
    Response::html(200, document)
  }

  /// Anything else.
  pub fn resource(&self) -> Response {
    Response::text(503, "Offline - Resource not available")
  }
}

fn html_escape(s: &str) -> String {
  s.replace('&', "&amp;")
    .replace('<', "&lt;")
    .replace('>', "&gt;")
    .replace('"', "&quot;")
}

const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>Offline - {{APP_NAME}}</title>
  <style>
    body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 0; padding: 20px; background: #f8f9fa; color: #343a40; text-align: center; }
    .container { max-width: 600px; margin: 50px auto; padding: 40px 20px; background: #fff; border-radius: 15px; box-shadow: 0 4px 6px rgba(0,0,0,0.1); }
    h1 { color: #2E7D32; }
    .feature-list { text-align: left; margin: 30px 0; }
    .feature-item { padding: 10px 0; border-bottom: 1px solid #eee; }
    .available { color: #28a745; }
    .unavailable { color: #6c757d; }
    .btn { display: inline-block; padding: 12px 24px; background: #2E7D32; color: #fff; text-decoration: none; border-radius: 8px; margin: 10px; font-weight: 600; }
    .emergency { background: #dc3545; color: #fff; padding: 20px; border-radius: 10px; margin: 20px 0; }
    .emergency .btn { background: #fff; color: #dc3545; }
  </style>
</head>
<body>
  <div class="container">
    <h1>{{APP_NAME}} Offline</h1>
    <p>You're currently offline. Some features are still available:</p>

    <div class="feature-list">
      <div class="feature-item"><span class="available">&#10003; Medication Reminders</span> - View and manage your medication schedule</div>
      <div class="feature-item"><span class="available">&#10003; Manual Prescription Entry</span> - Add medications manually</div>
      <div class="feature-item"><span class="available">&#10003; Emergency Contacts</span> - Call emergency services</div>
      <div class="feature-item"><span class="unavailable">&#10007; AI Translation</span> - Requires internet connection</div>
      <div class="feature-item"><span class="unavailable">&#10007; Health Chatbot</span> - Requires internet connection</div>
      <div class="feature-item"><span class="unavailable">&#10007; Prescription Scanning</span> - Requires internet connection</div>
    </div>

    <div class="emergency">
      <strong>Emergency:</strong> For medical emergencies, call {{EMERGENCY}} immediately
      <br>
      <a href="tel:{{EMERGENCY}}" class="btn">Call {{EMERGENCY}}</a>
    </div>

    <a href="/" class="btn">Return to Home</a>
    <a href="/reminders" class="btn">View Reminders</a>

    <p style="margin-top: 30px; color: #6c757d; font-size: 0.9rem;">Connect to the internet to access all features</p>
  </div>

  <script>
    window.addEventListener('online', function () { location.reload(); });
    setInterval(function () { if (navigator.onLine) { location.reload(); } }, 5000);
  </script>
</body>
</html>
"#;
