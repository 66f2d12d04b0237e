//! Chat relay server: connection engine, stream framing and data-share
//! negotiation.
//!
//! One task per connection, one writer pump per stream. Sessions meet
//! only through the shared seat table and message channels; no task
//! ever reads or writes another session's socket. The engine runs over
//! any [`Transport`], TCP in production and in-memory pipes in tests.

pub mod channel;
pub mod engine;
pub mod error;
pub mod events;
mod negotiate;
pub mod registry;
mod session;
pub mod settings;
pub mod timer;
pub mod transport;
pub mod writer;

pub use channel::{ChannelConfig, FramedChannel};
pub use engine::Engine;
pub use error::{EngineError, SessionError};
pub use events::{EventLog, RecordedEvent, RecordingEventLog, ShareOutcome, TracingEventLog};
pub use registry::Registry;
pub use settings::{Settings, SettingsError};
pub use transport::{TcpTransport, Transport};
