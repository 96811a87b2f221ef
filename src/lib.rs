//! Client SDK for the Webcom hierarchical realtime datasync protocol.
//!
//! The entry point is [`Context`]: construct one from a [`ContextConfig`],
//! then call its `put`/`merge`/`push`/`on_*`/`off_*` methods. Everything
//! else in this crate is a component `Context` composes — see each module's
//! doc comment for what it owns and what it's grounded on.

pub mod cache;
pub mod codec;
pub mod config;
pub mod connection;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod path;
pub mod pushid;
pub mod reactor;
pub mod registry;
pub mod transport;
pub mod tree;

pub use cache::{Cache, PathMutation};
pub use config::ContextConfig;
pub use context::Context;
pub use error::{Result, WebcomError};
pub use path::Path;
pub use pushid::PushIdGenerator;
pub use reactor::{Reactor, TimerHandle, TokioReactor};
pub use registry::on::{EventKind, SubscriptionId};
pub use transport::{Transport, WebcomTransport};
pub use tree::{Hash, Node};
