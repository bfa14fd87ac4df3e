//! Reelforge-Media: representations, segment planning and manifests
//!
//! This crate holds the pure media logic of reelforge. Nothing here touches
//! processes or the network; the server crate feeds it probed streams and
//! keyframe lists and serves what it produces.
//!
//! # Modules
//!
//! - `params` - encoder settings and H.264 level selection
//! - `presets` - the fixed video and audio ladders
//! - `representation` - representation ids and their descriptions
//! - `segments` - keyframe-aligned and constant segment planning
//! - `resolver` - stream + representation id to segment layout
//! - `codec_filter` - client codec matching and best-representation choice
//! - `manifest` - HLS playlists and DASH MPD generation
//! - `fmp4` - fragment sequence number patching

pub mod codec_filter;
pub mod fmp4;
pub mod manifest;
pub mod params;
pub mod presets;
pub mod representation;
pub mod resolver;
pub mod segments;

pub use codec_filter::{choose_best, PlayableCodecs};
pub use manifest::{
    build_dash_manifest, build_master_playlist, build_media_playlist, RepresentationCombination,
};
pub use params::EncoderParams;
pub use representation::{Delivery, Representation, RepresentationId, StreamRepresentation};
pub use resolver::{candidate_ids, RepresentationResolver};
pub use segments::{Interval, Segment, SegmentList};
