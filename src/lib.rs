//! Weatherset core library: Lamport-clock ordered weather aggregation.
//!
//! Producers push per-station readings to one aggregation node over a
//! line-oriented HTTP-flavored protocol; readers pull them back. Every
//! request and reply carries a `Lamport-Clock` header so observed events
//! have a causal order independent of the participants' wall clocks.

#[macro_use]
mod utils;

mod client;
mod node;

pub use crate::utils::{logger_init, WeathersetError, ME};

pub use crate::node::payload;
pub use crate::node::{
    AggregationConfig, AggregationContext, AggregationNode, BackupFile,
    LamportClock, RecordStore, WeatherRecord,
};

pub use crate::client::{
    source_to_payload, Response, ServiceStub, TargetAddr,
};
