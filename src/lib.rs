//! linespeed measures a connection's round-trip latency, jitter, and
//! download/upload throughput against a probe server.
//!
//! The measurement core lives under [`measure`]: a [`measure::TestEngine`]
//! drives the three phases (ping, download, upload) strictly in sequence,
//! each phase sampling through the timed transfer primitive in [`client`]
//! and reducing its raw samples with the functions in [`stats`]. Consumers
//! subscribe to [`progress::ProgressEvent`]s for live output and receive a
//! final [`results::TestResult`], which the [`history`] module persists as a
//! capped most-recent-first list.
//!
//! The crate also bundles the synthetic test server ([`server`]) that the
//! client measures against, with configurable network-condition envelopes
//! and seedable shaping randomness.

pub mod client;
pub mod errors;
pub mod history;
pub mod identity;
pub mod measure;
pub mod progress;
pub mod results;
pub mod server;
pub mod stats;
