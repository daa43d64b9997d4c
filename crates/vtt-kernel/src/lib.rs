//! Deterministic session engine: patch interpretation, atomic batches,
//! integrity hashing, writer gating, and reconciliation.
//!
//! Nothing in this crate performs I/O or spawns tasks; the host wraps each
//! [`SessionKernel`] in its own serialization unit.

pub mod error;
pub mod ops;
pub mod reconcile;
pub mod session;
pub mod state;
pub mod verify;

pub use error::{EngineError, OpFailure};
pub use ops::apply_operation;
pub use reconcile::reconcile;
pub use session::{SessionKernel, SessionSnapshot, SessionSpec};
pub use state::{Applied, Limits, StateStore, DEFAULT_MAX_OPS, DEFAULT_MAX_PATH_DEPTH};
pub use verify::{canonical_hash, verify_state};
