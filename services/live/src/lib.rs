//! Foxlive host library.
//!
//! Configuration, console rendering, and the audio endpoints the `foxlive`
//! binary wires to a live session. The binary is a thin wrapper around this crate.

pub mod audio_utils;
pub mod config;
pub mod console;
#[cfg(feature = "device-audio")]
pub mod device;
pub mod tools;
pub mod wav;
