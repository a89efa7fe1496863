use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::resources::Notification;
use crate::settings::SettingsStore;
use crate::sync::SyncTrigger;

/// Application events
#[derive(Debug)]
pub enum Event {
  /// One line from the scanner or keyboard
  Input(String),
  /// A line that is not valid UTF-8, decoded lossily
  InvalidInput(String),
  /// Input reached end of file
  InputClosed,
  /// Periodic tick driving periodic sync
  Tick,
  /// The backend endpoint became reachable
  Online,
  /// The backend endpoint stopped being reachable
  Offline,
  /// A sync request relayed by the resource worker
  Sync(SyncTrigger),
  /// A notification to present
  Notify(Notification),
  /// A location the user asked to open
  Open(String),
}

/// Last observed reachability of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
  Unknown,
  Online,
  Offline,
}

impl Connectivity {
  /// Apply a reachability result; returns the new state and the event to emit, if
  /// reachability changed.
  pub fn observe(self, reachable: bool) -> (Self, Option<Event>) {
    match (self, reachable) {
      (Self::Online, true) => (Self::Online, None),
      (Self::Offline, false) => (Self::Offline, None),
      (_, true) => (Self::Online, Some(Event::Online)),
      (_, false) => (Self::Offline, Some(Event::Offline)),
    }
  }
}

/// Event handler that produces events from input lines, a tick timer and a
/// connectivity check
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn input reader
    tokio::spawn(read_lines(BufReader::new(tokio::io::stdin()), tx.clone()));

    // Spawn ticker
    let tick_tx = tx.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(tick_rate);
      // The first tick completes immediately
      interval.tick().await;
      loop {
        interval.tick().await;
        if tick_tx.send(Event::Tick).is_err() {
          break;
        }
      }
    });

    Self { tx, rx }
  }

  /// Sender for tasks that report back to the app
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Check the configured endpoint every `interval` and emit `Online` or
  /// `Offline` when reachability changes.
  pub fn watch_connectivity(&self, settings: SettingsStore, interval: Duration) {
    let tx = self.tx.clone();
    tokio::spawn(async move {
      let mut state = Connectivity::Unknown;
      let mut ticker = tokio::time::interval(interval);
      loop {
        ticker.tick().await;
        let endpoint = match settings.load() {
          Ok(s) => s.endpoint().map(String::from),
          Err(e) => {
            debug!(error = %e, "failed to load settings for connectivity check");
            None
          }
        };
        // Nothing to check until an endpoint is configured
        let Some(endpoint) = endpoint else {
          continue;
        };

        let reachable = can_reach(&endpoint, interval).await;
        let (next, event) = state.observe(reachable);
        state = next;
        if let Some(event) = event {
          info!(?state, "connectivity changed");
          if tx.send(event).is_err() {
            break;
          }
        }
      }
    });
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

/// Forward input lines until end of input. A garbled line is reported and
/// reading carries on.
async fn read_lines<R>(mut reader: R, tx: mpsc::UnboundedSender<Event>)
where
  R: AsyncBufRead + Unpin,
{
  let mut buf = Vec::new();
  loop {
    buf.clear();
    let event = match reader.read_until(b'\n', &mut buf).await {
      Ok(0) => Event::InputClosed,
      Ok(_) => {
        let line: &[u8] = &buf;
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        match std::str::from_utf8(line) {
          Ok(text) => Event::Input(text.to_string()),
          Err(_) => Event::InvalidInput(String::from_utf8_lossy(line).into_owned()),
        }
      }
      Err(e) => {
        warn!(error = %e, "failed to read input");
        Event::InputClosed
      }
    };

    let closed = matches!(event, Event::InputClosed);
    if tx.send(event).is_err() || closed {
      break;
    }
  }
}

/// Whether a TCP connection to the endpoint's host can be opened.
pub async fn can_reach(endpoint: &str, timeout: Duration) -> bool {
  let Ok(url) = url::Url::parse(endpoint) else {
    return false;
  };
  let (Some(host), Some(port)) = (url.host_str(), url.port_or_known_default()) else {
    return false;
  };
  matches!(
    tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
    Ok(Ok(_))
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_transitions_emit_once() {
    let (state, event) = Connectivity::Unknown.observe(true);
    assert_eq!(state, Connectivity::Online);
    assert!(matches!(event, Some(Event::Online)));

    let (state, event) = state.observe(true);
    assert_eq!(state, Connectivity::Online);
    assert!(event.is_none());

    let (state, event) = state.observe(false);
    assert_eq!(state, Connectivity::Offline);
    assert!(matches!(event, Some(Event::Offline)));

    let (_, event) = state.observe(false);
    assert!(event.is_none());
  }

  #[test]
  fn test_unknown_to_offline_is_reported() {
    let (state, event) = Connectivity::Unknown.observe(false);
    assert_eq!(state, Connectivity::Offline);
    assert!(matches!(event, Some(Event::Offline)));
  }

  #[tokio::test]
  async fn test_garbled_line_does_not_end_input() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    read_lines(&b"A1\r\n\xffB\nA3"[..], tx).await;

    assert!(matches!(rx.recv().await, Some(Event::Input(line)) if line == "A1"));
    assert!(matches!(rx.recv().await, Some(Event::InvalidInput(line)) if line == "\u{FFFD}B"));
    assert!(matches!(rx.recv().await, Some(Event::Input(line)) if line == "A3"));
    assert!(matches!(rx.recv().await, Some(Event::InputClosed)));
    assert!(rx.recv().await.is_none());
  }

  #[tokio::test]
  async fn test_can_reach() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let live = format!("http://127.0.0.1:{}/exec", port);
    assert!(can_reach(&live, Duration::from_secs(2)).await);
    assert!(!can_reach("http://127.0.0.1:9/exec", Duration::from_secs(2)).await);
    assert!(!can_reach("not a url", Duration::from_secs(2)).await);
  }
}
