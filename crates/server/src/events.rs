//! Operational event reporting.
//!
//! Sessions and share workers report through [`EventLog`] instead of
//! logging directly, so tests can capture the stream and deployments
//! can route it. [`TracingEventLog`] is the production sink.

use std::net::SocketAddr;
use std::sync::Mutex;

use chinwag_protocol::ShareKind;
use tracing::{info, warn};

/// How a data share negotiation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareOutcome {
    Accepted,
    Rejected,
    /// The payload never arrived intact from the sender.
    FailedFromSender,
    /// The payload or its receipt confirmation was lost on the
    /// receiver's side.
    FailedToReceiver,
}

/// Sink for server lifecycle and session events.
///
/// Every method has an empty default so implementations only handle
/// what they care about.
pub trait EventLog: Send + Sync + 'static {
    fn server_started(&self, addr: SocketAddr) {
        let _ = addr;
    }

    /// A logged-in client issued the shutdown phrase.
    fn server_stopped(&self, issued_by: &str) {
        let _ = issued_by;
    }

    fn client_connected(&self, username: &str, addr: SocketAddr, connected: usize) {
        let _ = (username, addr, connected);
    }

    fn client_disconnected(&self, username: &str, addr: SocketAddr, connected: usize) {
        let _ = (username, addr, connected);
    }

    fn failed_login(&self, addr: SocketAddr, attempted: &str) {
        let _ = (addr, attempted);
    }

    fn share_outcome(
        &self,
        outcome: ShareOutcome,
        kind: ShareKind,
        sender: &str,
        receiver: Option<&str>,
        filename: &str,
        bytes: usize,
    ) {
        let _ = (outcome, kind, sender, receiver, filename, bytes);
    }
}

/// Event sink that writes structured tracing records.
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
    fn server_started(&self, addr: SocketAddr) {
        info!(%addr, "server started");
    }

    fn server_stopped(&self, issued_by: &str) {
        info!(issued_by, "server stopped by admin");
    }

    fn client_connected(&self, username: &str, addr: SocketAddr, connected: usize) {
        info!(username, %addr, connected, "client connected");
    }

    fn client_disconnected(&self, username: &str, addr: SocketAddr, connected: usize) {
        info!(username, %addr, connected, "client disconnected");
    }

    fn failed_login(&self, addr: SocketAddr, attempted: &str) {
        warn!(%addr, attempted, "failed password attempt");
    }

    fn share_outcome(
        &self,
        outcome: ShareOutcome,
        kind: ShareKind,
        sender: &str,
        receiver: Option<&str>,
        filename: &str,
        bytes: usize,
    ) {
        let kind = kind.label();
        let receiver = receiver.unwrap_or("-");
        match outcome {
            ShareOutcome::Accepted => {
                info!(sender, receiver, filename, bytes, kind, "share accepted")
            }
            ShareOutcome::Rejected => {
                info!(sender, receiver, filename, bytes, kind, "share rejected")
            }
            ShareOutcome::FailedFromSender => {
                warn!(sender, filename, bytes, kind, "share failed in sender transmission")
            }
            ShareOutcome::FailedToReceiver => {
                warn!(sender, receiver, filename, bytes, kind, "share failed in receiver delivery")
            }
        }
    }
}

/// Event sink that captures everything for later inspection. Used by
/// the test suites; not wired into production binaries.
#[derive(Default)]
pub struct RecordingEventLog {
    events: Mutex<Vec<RecordedEvent>>,
}

/// One captured [`EventLog`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent {
    Started,
    Stopped {
        issued_by: String,
    },
    Connected {
        username: String,
        connected: usize,
    },
    Disconnected {
        username: String,
        connected: usize,
    },
    FailedLogin {
        attempted: String,
    },
    Share {
        outcome: ShareOutcome,
        kind: ShareKind,
        sender: String,
        receiver: Option<String>,
        filename: String,
        bytes: usize,
    },
}

impl RecordingEventLog {
    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RecordedEvent>> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl EventLog for RecordingEventLog {
    fn server_started(&self, _addr: SocketAddr) {
        self.lock().push(RecordedEvent::Started);
    }

    fn server_stopped(&self, issued_by: &str) {
        self.lock().push(RecordedEvent::Stopped {
            issued_by: issued_by.to_string(),
        });
    }

    fn client_connected(&self, username: &str, _addr: SocketAddr, connected: usize) {
        self.lock().push(RecordedEvent::Connected {
            username: username.to_string(),
            connected,
        });
    }

    fn client_disconnected(&self, username: &str, _addr: SocketAddr, connected: usize) {
        self.lock().push(RecordedEvent::Disconnected {
            username: username.to_string(),
            connected,
        });
    }

    fn failed_login(&self, _addr: SocketAddr, attempted: &str) {
        self.lock().push(RecordedEvent::FailedLogin {
            attempted: attempted.to_string(),
        });
    }

    fn share_outcome(
        &self,
        outcome: ShareOutcome,
        kind: ShareKind,
        sender: &str,
        receiver: Option<&str>,
        filename: &str,
        bytes: usize,
    ) {
        self.lock().push(RecordedEvent::Share {
            outcome,
            kind,
            sender: sender.to_string(),
            receiver: receiver.map(str::to_string),
            filename: filename.to_string(),
            bytes,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_log_captures_in_order() {
        let log = RecordingEventLog::default();
        let addr = SocketAddr::from(([127, 0, 0, 1], 40000));
        log.client_connected("mick", addr, 1);
        log.failed_login(addr, "guess");
        log.client_disconnected("mick", addr, 0);

        assert_eq!(
            log.events(),
            vec![
                RecordedEvent::Connected {
                    username: "mick".into(),
                    connected: 1
                },
                RecordedEvent::FailedLogin {
                    attempted: "guess".into()
                },
                RecordedEvent::Disconnected {
                    username: "mick".into(),
                    connected: 0
                },
            ]
        );
    }

    #[test]
    fn default_methods_are_no_ops() {
        struct Silent;
        impl EventLog for Silent {}

        let log = Silent;
        log.server_started(SocketAddr::from(([127, 0, 0, 1], 1)));
        log.share_outcome(
            ShareOutcome::Accepted,
            ShareKind::File,
            "a",
            Some("b"),
            "f.txt",
            3,
        );
    }
}
