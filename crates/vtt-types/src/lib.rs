//! Session-state data model shared by the engine, the store, and the wire.
//!
//! The value tree is a closed set of container and scalar kinds so that
//! patch operations can walk it structurally; the message types mirror the
//! JSON shapes exchanged with writers and observers.

mod error;
mod message;
mod op;
mod path;
mod session;
mod value;
mod version;

pub use error::ErrorCode;
pub use message::{
    FullState, FullStateRequest, FullStateResponse, ResponseError, SessionEnd, StateUpdate,
    StateUpdateBroadcast, StateUpdateResponse,
};
pub use op::{StateOperation, Verb};
pub use path::{Path, PathSegment};
pub use session::{ParticipantId, SessionId, SessionStatus};
pub use value::{Value, ValueError, ValueKind};
pub use version::{Version, VersionParseError};

pub use vtt_cbor::Hash;
