//! # docsync Sync Server
//!
//! Peer-side request handling for docsync replication.
//!
//! This crate provides:
//! - [`PeerServer`]: decodes requests, dispatches them and encodes replies
//! - Handshake checks for protocol version and object model fingerprint
//! - Paged changes feed, revs-diff, fetch and push over a [`Datastore`]
//!
//! The server holds no replication state of its own. Everything it serves
//! comes from the datastore: the changes feed, revision trees and
//! attachment bytes. Push applies each bundle independently and reports
//! the ones it rejects.
//!
//! [`Datastore`]: docsync_core::Datastore

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, PeerInfo, RequestHandler};
pub use server::PeerServer;
