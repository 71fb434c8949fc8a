//! HLS manifest proxying.

mod rewrite;

pub use rewrite::{rewrite_manifest, PlaylistRewriter};
