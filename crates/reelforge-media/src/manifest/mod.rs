//! Streaming manifests.
//!
//! - `hls` - master and media playlists (m3u8)
//! - `dash` - static MPD

pub mod dash;
pub mod hls;

pub use dash::{build_manifest as build_dash_manifest, select_representations};
pub use hls::{
    build_master_playlist, build_media_playlist, representation_uri, MasterPlaylist,
    MediaPlaylist, RepresentationCombination,
};
