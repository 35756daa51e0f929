// Subtitle compiler
//
// Pure transformations only, no I/O:
// - cue: SRT parsing, timecodes and serialization
// - style: style snapshot defaults and margin computation
// - render: overlay filter chains and ASS style documents

pub mod cue;
pub mod render;
pub mod style;

pub use cue::{parse_srt, to_srt, Cue};
pub use render::{build_overlay_filter, build_style_document, RenderDescription, Resolution};
pub use style::{ResolvedStyle, Rgb, StyleConfig};
