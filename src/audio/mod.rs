//! # Audio Module
//!
//! Per-guild playback for the queue bot.
//!
//! ## Architecture
//!
//! ### [`registry`] - Guild Registry
//! - Lazily creates one [`manager::QueueManager`] per guild
//! - Guilds never share queue or playback state
//!
//! ### [`manager`] - Queue State Machine
//! - One worker task per guild owns the playlist and the stopped flag
//! - Commands, pipeline results and sink idle signals are serialized
//! - Results are published as [`events::PlaybackEvent`]s
//!
//! ### [`transcoder`] / [`sink`] - Pipeline Stages
//! - ffmpeg turns the raw source stream into Ogg/Opus at a fixed gain
//! - songbird plays the encoded file and reports when it goes idle
//!
//! ## Pipeline
//!
//! ```text
//! url ─▶ MediaResolver::open ─▶ Transcoder ─▶ PlayerSink ─▶ idle ─▶ next head
//! ```
//!
//! Only one pipeline runs per guild. Replacing it (skip, stop, a new
//! `play(url)`) cancels the running one and kills its subprocesses.

pub mod events;
pub mod manager;
pub mod queue;
pub mod registry;
pub mod sink;
pub mod transcoder;
