//! # Ground Core
//!
//! Command and telemetry core of a ground system: decommutated values flow
//! into a current value table, get classified by the limits engine, and
//! commands are validated, rendered and dispatched over acknowledged streams.
//!
//! ## Quick Start
//!
//! ```rust
//! use groundcore::catalog::{DataType, ItemDef, PacketDef, PacketKind};
//! use groundcore::{Catalog, CoreConfig, GroundAgent};
//!
//! let mut catalog = Catalog::new();
//! catalog.add_packet(
//!     PacketKind::Telemetry,
//!     PacketDef::new("INST", "HEALTH_STATUS")
//!         .with_item(ItemDef::new("TEMP1", 0, 16, DataType::Int)),
//! );
//! let agent = GroundAgent::new(catalog, CoreConfig::default());
//!
//! // Defined but never received
//! assert!(agent.tlm("INST HEALTH_STATUS TEMP1").unwrap().is_null());
//! ```
//!
//! ## Architecture
//!
//! - [`catalog`] - Target, packet and item definitions
//! - [`resolver`] - RAW/CONVERTED/FORMATTED/WITH_UNITS resolution
//! - [`cvt`] - Current value table with overrides and staleness
//! - [`limits`] - Limits monitoring, sets, groups and events
//! - [`command`] - Command validation, building and dispatch
//! - [`queue`] - Deferred command queues
//! - [`decom`] / [`handler`] - Per-target workers
//! - [`topic`] - In-process stream substrate
//! - [`agent`] - Facade tying the services together

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod agent;
pub mod catalog;
pub mod codec;
pub mod command;
pub mod config;
pub mod cvt;
pub mod decom;
pub mod error;
pub mod extract;
pub mod format;
pub mod handler;
pub mod limits;
pub mod queue;
pub mod resolver;
pub mod topic;
pub mod value;

// Re-export main public types for convenience
pub use agent::GroundAgent;
pub use catalog::Catalog;
pub use command::{CmdOptions, CommandPipeline, DispatchOptions};
pub use config::CoreConfig;
pub use error::{CoreError, CoreResult, NotFoundKind};
pub use value::{OverrideType, Value, ValueType};
