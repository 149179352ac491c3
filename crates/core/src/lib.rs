#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Shared models and logic for the hourly avatar updater.

pub mod api;
pub mod blobs;
pub mod error;
pub mod merge;
pub mod model;

mod util;

pub use blobs::BlobTable;
pub use error::{Result, UpdateError};
pub use merge::merge_blobs;
pub use model::{BlobPair, BlobRef, HourKey, ProfileRecord, PROFILE_COLLECTION, PROFILE_RKEY};
pub use util::new_ulid;
