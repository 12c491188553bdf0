#![warn(rust_2018_idioms)]

//! Per-track capture of live WebRTC audio to disk, offline reconstruction of
//! a room's recordings into one time-aligned mix, and a client for handing
//! recording off to a remote recorder.

// re-export sub-crates
pub use dtls;
pub use rtp;

pub mod chunk_writer;
pub mod error;
pub mod media;
pub mod processing;
pub mod recorder;
pub mod remote;
pub mod session;
pub mod track;

pub use error::{Error, Result};
