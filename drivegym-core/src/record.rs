//! Key-value records attached to environment steps.
//!
//! A [`Record`] is the `info` mapping returned next to every [`Step`](crate::Step).
//! Environments put whatever they consider useful for diagnosis into it, e.g.,
//! the speed of the agent or the reason an episode ended.
//!
//! ```rust
//! use drivegym_core::record::{Record, RecordValue};
//!
//! let mut record = Record::empty();
//! record.insert("frame_step", RecordValue::Scalar(12.0));
//! record.insert("termination", RecordValue::String("collision".to_string()));
//!
//! assert_eq!(record.get_scalar("frame_step").unwrap(), 12.0);
//! ```
mod base;
pub use base::{Record, RecordValue};
