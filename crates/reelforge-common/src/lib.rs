//! Reelforge-Common: shared types and errors.
//!
//! This crate provides functionality used across reelforge:
//!
//! - **Identities**: [`StreamKey`], [`FileLocator`], [`PlayerSessionId`]
//! - **Stream facts**: [`Stream`], [`StreamType`], [`Rational`]
//! - **Error Handling**: the engine-wide error taxonomy and result alias
//!
//! # Examples
//!
//! ```
//! use reelforge_common::{FileLocator, StreamKey};
//!
//! let locator = FileLocator::from_relative_path("movies/big_buck_bunny.mkv").unwrap();
//! let key = StreamKey::new(locator, 0);
//! assert_eq!(key.stream_index, 0);
//! ```

pub mod error;
pub mod ids;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;
