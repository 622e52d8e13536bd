//! Real-time fan-out hub over WebSocket.
//!
//! Every message a client sends is turned into an event, and the hub
//! rebroadcasts the result to every connected client (the sender included).
//! Each module covers one piece of that path:
//!
//! - [`transport`] adapts a duplex connection into a `Sink`/`Stream` of [`transport::Frame`]s.
//! - [`registry`] is the set of live peers, behind one lock.
//! - [`listener`] runs one read loop per peer and feeds the event channel.
//! - [`dispatch`] is the single consumer turning events into broadcasts.
//! - [`broadcast`] writes a message to every peer, pruning the ones that fail.
//! - [`hub`] wires those together; [`server`] puts them behind axum.
//! - [`message`] holds the JSON wire types, [`error`] the error taxonomy.
//! - [`cli`] and [`client`] back the binary's `serve` and `client` commands.
//!
//! Tests build hubs directly with in-memory channels as transports, so
//! nothing here is global and any number of hubs can run side by side.

pub mod broadcast;
pub mod cli;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod hub;
pub mod listener;
pub mod message;
pub mod registry;
pub mod server;
pub mod transport;

pub use config::HubConfig;
pub use error::HubError;
pub use hub::Hub;
