//! Push payloads and notification clicks, as pure functions.

use serde_json::Value;

pub const DEFAULT_TITLE: &str = "Asset Manager";
pub const DEFAULT_BODY: &str = "You have a new notification from Asset Manager";
pub const DEFAULT_TAG: &str = "asset-manager";

/// Notification the shell should present.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub tag: String,
  pub actions: Vec<NotificationAction>,
  /// The push payload, kept for the click handler
  pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

/// What to do after a notification was clicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickEffect {
  /// Close the notification and do nothing else
  Close,
  /// Close the notification, then focus a view showing `url` or open one
  Open { url: String },
}

/// Build the notification for a push message.
pub fn notification_for_push(data: Option<&Value>) -> Notification {
  let text = |key: &str| data.and_then(|d| d.get(key)).and_then(Value::as_str);

  Notification {
    title: text("title").unwrap_or(DEFAULT_TITLE).to_string(),
    body: text("body").unwrap_or(DEFAULT_BODY).to_string(),
    tag: text("tag").unwrap_or(DEFAULT_TAG).to_string(),
    actions: vec![
      NotificationAction {
        action: "view".into(),
        title: "View".into(),
      },
      NotificationAction {
        action: "dismiss".into(),
        title: "Dismiss".into(),
      },
    ],
    data: data.cloned().unwrap_or(Value::Null),
  }
}

/// Resolve a click on a notification carrying `data`.
pub fn click_effect(action: Option<&str>, data: &Value) -> ClickEffect {
  if action == Some("dismiss") {
    return ClickEffect::Close;
  }
  let url = data
    .get("url")
    .and_then(Value::as_str)
    .filter(|u| !u.is_empty())
    .unwrap_or("/");
  ClickEffect::Open {
    url: url.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_push_without_payload_uses_defaults() {
    let n = notification_for_push(None);
    assert_eq!(n.title, DEFAULT_TITLE);
    assert_eq!(n.tag, DEFAULT_TAG);
    assert_eq!(
      n.actions.iter().map(|a| a.action.as_str()).collect::<Vec<_>>(),
      vec!["view", "dismiss"]
    );
  }

  #[test]
  fn test_push_payload_overrides() {
    let data = json!({"title": "Sync done", "body": "3 updates sent", "url": "/stats"});
    let n = notification_for_push(Some(&data));
    assert_eq!(n.title, "Sync done");
    assert_eq!(n.body, "3 updates sent");
    assert_eq!(n.data, data);
  }

  #[test]
  fn test_click_effects() {
    let data = json!({"url": "/stats"});
    assert_eq!(click_effect(Some("dismiss"), &data), ClickEffect::Close);
    assert_eq!(
      click_effect(Some("view"), &data),
      ClickEffect::Open {
        url: "/stats".into()
      }
    );
    assert_eq!(
      click_effect(None, &Value::Null),
      ClickEffect::Open { url: "/".into() }
    );
  }
}
