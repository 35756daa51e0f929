//! Subforge - subtitle pipeline for uploaded media
//!
//! Extracts or ingests subtitles for a media file, optionally translates them,
//! and burns them into a new video on request. Job progress is pushed to
//! subscribers over an in-process notification bus, and a background task
//! mirrors each owner's remote video listing into a local cache.

pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod job;
pub mod media;
pub mod notify;
pub mod pipeline;
pub mod process;
pub mod storage;
pub mod subtitle;
pub mod sync;
pub mod translate;
