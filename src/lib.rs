//! # Dual-View Time-Lapse DAQ Library
//!
//! Controller for an imaging rig with two fixed views ("Y" and "X"), each a
//! camera paired with an LED. It previews the selected view live and runs
//! timed multi-frame time-lapse captures, optionally saving every frame to
//! an HDF5 file. The `dualview_daq` binary drives it headlessly.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: The sequencer (preview and capture state machine),
//!   the worker task running it, the preview slot and the interrupt flag.
//! - **`config`**: Loading and validating configuration with `figment`.
//! - **`display`**: Headless display refresher computing levels and progress.
//! - **`error`**: The `DaqError` enum used across the crate.
//! - **`hardware`**: Camera and illuminator capability traits, simulated
//!   devices and rig connection.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`settings`**: Observable measurement settings and the snapshot a
//!   capture runs with.
//! - **`storage`**: Container traits, dataset layout and the memory and HDF5
//!   backends.
//! - **`validation`**: Helpers for validating configuration values.

pub mod acquisition;
pub mod config;
pub mod display;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod settings;
pub mod storage;
pub mod validation;
