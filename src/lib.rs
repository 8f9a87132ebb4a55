//! Core library for the qscope application.
//!
//! This library contains the scan planning, waveform synthesis, acquisition,
//! and decoding logic for a galvo-mirror raster scanning microscope with a
//! photon-counting detector. It is used by the `qscope` command-line binary
//! and is independent of any particular vendor driver: hardware access goes
//! through the capability traits in [`device`].
//!
//! # Pipeline
//!
//! ```text
//! plan -> waveform -> acquisition (hardware or external process)
//!      -> stream (live decode + progress) -> frame -> scanfile
//! ```

pub mod acquisition;
pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod plan;
pub mod scanfile;
pub mod stream;
pub mod waveform;
