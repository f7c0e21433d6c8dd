//! Core utilities shared by the keyward crates.
//!
//! A swappable clock so time-sensitive checks can be tested
//! deterministically, and a helper for keeping secrets out of log output.

pub mod clock;
pub mod redact;

pub use clock::{Clock, ManualClock, SystemClock};
pub use redact::preview;
