//! # cog-relay
//!
//! Core of a Cog relay: a long-running agent that connects to the Cog bus,
//! executes command bundles across a bounded worker pool, and keeps its
//! bundle catalog in sync with the controller.
//!
//! The crate supplies the supervisory state machine, work dispatch, catalog,
//! and output parsing. Transports and execution backends are injected through
//! the [`bus::BusConnector`] and [`engines::EngineFactory`] contracts:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cog_relay::{Config, Relay};
//! # use cog_relay::bus::BusConnector;
//! # use cog_relay::engines::EngineFactory;
//!
//! # async fn run(connector: Arc<dyn BusConnector>, engines: Arc<dyn EngineFactory>) {
//! let relay = Relay::new(Config::default(), connector, engines);
//! relay.start().await.expect("relay startup");
//! # }
//! ```

pub mod bus;
pub mod catalog;
pub mod config;
pub mod engines;
pub mod error;
pub mod logging;
pub mod output;
pub mod protocol;
pub mod queue;
pub mod relay;
mod worker;

pub use catalog::BundleCatalog;
pub use config::{CogConfig, Config, DockerConfig};
pub use error::RelayError;
pub use relay::{ControlMessage, Relay, RelayState};
