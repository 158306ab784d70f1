//! Per-node coordination engine for a decentralized federated-learning
//! runtime: round loop, overlay communications, aggregation buffer and
//! reputation scoring.
//!
//! The crate is organized the way the round loop in [`engine`] consumes
//! it: a wire [`message`] format and per-peer [`connection`] plumbing
//! multiplexed by [`comm`], a pluggable [`aggregation`] buffer and
//! [`reputation`] engine feeding a [`role`]-dispatched training cycle,
//! with [`config`] and [`controller`] handling everything that sits
//! outside the overlay itself.

pub mod aggregation;
pub mod arbiter;
pub mod comm;
pub mod config;
pub mod connection;
pub mod controller;
pub mod crash;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod events;
pub mod message;
pub mod netsim;
pub mod node_id;
pub mod parameter_store;
pub mod propagator;
pub mod reputation;
pub mod role;
pub mod training;

pub use config::Config;
pub use engine::{Engine, EngineState};
pub use error::{Error, Result};
pub use node_id::NodeId;
