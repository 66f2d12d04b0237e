//! Accept loop and shared server state.
//!
//! The engine owns the seat table, the admission semaphore and the root
//! cancellation token. Each accepted stream is handed to a session task
//! and forgotten; admission permits travel with the tasks so a seat
//! only frees up once its session has fully torn down.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::events::EventLog;
use crate::registry::Registry;
use crate::session;
use crate::settings::Settings;
use crate::transport::Transport;

/// Chat relay server.
pub struct Engine {
    settings: Arc<Settings>,
    registry: Arc<Registry>,
    events: Arc<dyn EventLog>,
    admission: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Engine {
    /// Validates `settings` and prepares an engine around them.
    pub fn new(settings: Settings, events: Arc<dyn EventLog>) -> Result<Self, EngineError> {
        settings.validate()?;
        let registry = Arc::new(Registry::new(settings.connection_limit));
        let admission = Arc::new(Semaphore::new(settings.connection_limit));
        Ok(Self {
            settings: Arc::new(settings),
            registry,
            events,
            admission,
            cancel: CancellationToken::new(),
        })
    }

    /// Token that stops the accept loop and every session when
    /// cancelled. A client issuing the shutdown phrase cancels it too.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Accepts connections until cancelled, then waits for the open
    /// sessions to wind down.
    pub async fn run<T: Transport>(&self, mut transport: T) -> Result<(), EngineError> {
        self.events.server_started(transport.local_addr()?);

        let mut sessions: Vec<JoinHandle<()>> = Vec::new();
        loop {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = self.admission.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let accepted = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                accepted = transport.accept() => accepted,
            };
            let (stream, addr) = match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    warn!("accept failed: {err}");
                    continue;
                }
            };
            debug!(%addr, "connection accepted");

            let (_, handle) = session::launch(
                stream,
                addr,
                self.settings.clone(),
                self.registry.clone(),
                self.events.clone(),
                self.cancel.clone(),
                Some(permit),
            );
            sessions.push(handle);
            sessions.retain(|session| !session.is_finished());
        }

        for session in sessions {
            let _ = session.await;
        }
        debug!("all sessions finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{RecordedEvent, RecordingEventLog};
    use crate::transport::TcpTransport;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::time::{Instant, timeout};

    fn fast_settings() -> Settings {
        Settings {
            transmission_delay_ms: 2,
            coalesce_timeout_ms: 40,
            ..Settings::default()
        }
    }

    async fn read_until(stream: &mut TcpStream, needle: &str) -> String {
        let mut collected = String::new();
        let mut buf = [0u8; 8192];
        let deadline = Instant::now() + Duration::from_secs(3);
        while !collected.contains(needle) {
            let wait = deadline.saturating_duration_since(Instant::now());
            let read = match timeout(wait, stream.read(&mut buf)).await {
                Ok(read) => read,
                Err(_) => panic!("timed out waiting for {needle:?}, got {collected:?}"),
            };
            match read {
                Ok(0) => panic!("stream closed waiting for {needle:?}, got {collected:?}"),
                Ok(n) => collected.push_str(&String::from_utf8_lossy(&buf[..n])),
                Err(err) => panic!("read failed waiting for {needle:?}: {err}"),
            }
        }
        collected
    }

    async fn login_as(stream: &mut TcpStream, name: &str) {
        read_until(stream, "Enter your username").await;
        stream.write_all(name.as_bytes()).await.unwrap();
        read_until(stream, "other connected client(s)").await;
    }

    async fn start_engine(
        settings: Settings,
    ) -> (
        Arc<Engine>,
        Arc<RecordingEventLog>,
        std::net::SocketAddr,
        JoinHandle<Result<(), EngineError>>,
    ) {
        let events = Arc::new(RecordingEventLog::default());
        let engine = Arc::new(Engine::new(settings, events.clone()).unwrap());
        let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();
        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run(transport).await })
        };
        (engine, events, addr, runner)
    }

    #[tokio::test]
    async fn relays_between_tcp_clients() {
        let (engine, events, addr, runner) = start_engine(fast_settings()).await;

        let mut ann = TcpStream::connect(addr).await.unwrap();
        login_as(&mut ann, "ann").await;
        let mut mick = TcpStream::connect(addr).await.unwrap();
        login_as(&mut mick, "mick").await;
        read_until(&mut ann, "mick has joined the chinwag").await;

        mick.write_all(b"g'day all").await.unwrap();
        read_until(&mut ann, "mick : g'day all").await;

        assert!(events.events().contains(&RecordedEvent::Started));
        engine.cancel_token().cancel();
        timeout(Duration::from_secs(3), runner)
            .await
            .expect("engine should stop")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn admission_queues_when_all_seats_are_taken() {
        let mut settings = fast_settings();
        settings.connection_limit = 1;
        let (engine, _, addr, runner) = start_engine(settings).await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        login_as(&mut first, "mick").await;

        // The second connection sits in the backlog unanswered.
        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 64];
        assert!(
            timeout(Duration::from_millis(300), second.read(&mut buf))
                .await
                .is_err()
        );

        drop(first);
        read_until(&mut second, "Enter your username").await;

        engine.cancel_token().cancel();
        timeout(Duration::from_secs(3), runner)
            .await
            .expect("engine should stop")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn client_shutdown_phrase_stops_the_engine() {
        let mut settings = fast_settings();
        settings.shutdown_phrase = "close it now".into();
        let (_engine, events, addr, runner) = start_engine(settings).await;

        let mut mick = TcpStream::connect(addr).await.unwrap();
        login_as(&mut mick, "mick").await;
        mick.write_all(b"close it now").await.unwrap();
        read_until(&mut mick, "Admin has shut down this server, please re/connect").await;

        timeout(Duration::from_secs(3), runner)
            .await
            .expect("engine should stop")
            .unwrap()
            .unwrap();
        assert!(events.events().contains(&RecordedEvent::Stopped {
            issued_by: "mick".into(),
        }));
    }

    #[tokio::test]
    async fn rejects_invalid_settings() {
        let settings = Settings {
            buffer_size: 0,
            ..Settings::default()
        };
        assert!(Engine::new(settings, Arc::new(RecordingEventLog::default())).is_err());
    }
}
