//! Live host telemetry: samples counters on a fixed interval, turns cumulative
//! byte counters into rates, and keeps bounded histories for graphing.
//!
//! The [`TelemetryEngine`] drives everything; subscribers get a
//! [`TelemetrySnapshot`] per tick through a latest-wins [`Subscription`].

pub mod config;
pub mod error;
pub mod feed;
pub mod history;
pub mod rank;
pub mod rate;
pub mod sampler;
pub mod scripted;
pub mod session;
pub mod source;
pub mod types;

pub use config::TelemetryConfig;
pub use error::{CounterError, EngineError};
pub use sampler::{SessionState, Subscription, TelemetryEngine};
pub use scripted::ScriptedSource;
pub use source::{CounterSource, SysinfoSource};
pub use types::{
    Connection, DiskUsage, EventLine, Metric, ProcessEntry, ProcessRank, RateBasis, RateSample,
    RawSample, TelemetrySnapshot,
};
