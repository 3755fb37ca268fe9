//! Core library for the galileo measurement coordinator.
//!
//! A session polls a rig of instruments on a fixed interval, logs every
//! sample to CSV, and streams a lossy copy of the data to a live-plot worker
//! process. An interactive prompt drives the run: pause, resume, stop,
//! replot, autoscale, annotate.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod experiment;
pub mod instrument;
pub mod logging;
pub mod plot;
pub mod protocol;
pub mod run_state;
pub mod sample;
pub mod shell;
pub mod storage;
