//! Lock controller subsystem
//!
//! Implements the local input path and its composition with the broker link:
//!
//! 1. [`debouncer`] - Debounced press events from the three color buttons
//! 2. [`sequence_lock`] - Security code and attempt adjudication
//! 3. [`control_loop`] - Lifecycle and the cooperative tick loop
//!
//! # Architecture
//!
//! ```text
//! Buttons ──► Debouncer ──► SequenceLock ──► LedFeedback
//!                               ▲   │
//!        BrokerLink (code) ─────┘   └────► BrokerLink (UNLOCK)
//! ```
//!
//! Everything runs on one thread with a 50ms tick.

pub mod control_loop;
pub mod debouncer;
pub mod sequence_lock;

pub use control_loop::{ControllerError, ControllerSettings, LockController};
pub use debouncer::{ButtonDebouncer, ButtonInput};
pub use sequence_lock::{CodeUpdateError, Color, Outcome, SecurityCode, SequenceLock};
