//! # Audio Module
//!
//! Per-guild playback for Guild Jukebox.
//!
//! ## Architecture
//!
//! ### [`player`] - Playback Engine
//! - One state machine per guild (idle, resolving, playing, paused)
//! - Starts the next queue item, reopens the active source on seek/filter changes
//! - Consumes completions from the [`bridge`] and ignores stale ones
//!
//! ### [`queue`] - Queue Management
//! - Insertion order plus a lossless shuffled order
//! - Cursor based prev/next and pagination
//!
//! ### [`source`] / [`pipeline`] - Rendering
//! - A resolved [`source::Source`] owns one ffmpeg render process at a time
//! - Progress is counted in 20ms frames so a reopen can resume at the same offset
//!
//! ### [`idle`] - Idle Monitor
//! - Periodic sweep that disconnects guilds left without playback
//!
//! ## Audio Quality
//!
//! - **Sample Rate**: 48kHz (Discord standard)
//! - **Channels**: Stereo (2 channels)
//! - **Encoding**: Opus, 96 to 256kbps depending on [`effects::Quality`]

pub mod bridge;
pub mod effects;
pub mod idle;
pub mod item;
pub mod notify;
pub mod pipeline;
pub mod player;
pub mod queue;
pub mod source;
pub mod state;
pub mod transport;
pub mod voice;
