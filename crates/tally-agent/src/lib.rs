//! tally-agent: collector side of tally.
//!
//! One control task owns an accumulator. Every poll tick appends a fresh
//! sample; every report tick ships the accumulator to the server as one gzip
//! JSON batch, backing off on transient server failures.
//!
//! # Modules
//!
//! | Module | Contents |
//! |---|---|
//! | [`alloc`] | Counting global allocator feeding the heap gauges |
//! | [`sampler`] | Runtime, random and system gauges plus `PollCount` |
//! | [`transport`] | HTTP delivery of batches |
//! | [`agent`] | The poll/report control loop |
//! | [`config`] | Flag, env and TOML layering |

pub mod agent;
pub mod alloc;
pub mod config;
pub mod sampler;
pub mod transport;

pub use agent::Agent;
pub use config::{AgentConfig, Cli};
pub use sampler::Sampler;
pub use transport::{DeliveryError, HttpTransport, Transport};
