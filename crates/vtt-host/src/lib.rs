//! Session host: per-session actors, broadcast fan-out, periodic durable
//! sync, and a Unix-socket control surface.

pub mod broadcast;
pub mod config;
pub mod control;
pub mod daemon;
pub mod durable;
pub mod error;
pub mod registry;
pub mod session;

pub use broadcast::{DropReason, PublishStats, SubscriberId, Subscription};
pub use config::HostConfig;
pub use control::{ControlClient, ControlServer, RequestEnvelope, ResponseEnvelope, StreamEvent};
pub use daemon::Daemon;
pub use error::HostError;
pub use registry::{SessionRegistry, SessionSummary};
pub use session::{Ended, SessionHandle};
