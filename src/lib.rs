#![doc = include_str!("../README.md")]

// Public modules
mod common;
mod error;

pub mod rpc;

pub use crate::common::{
    messages, AddressFamily, Bucket, Id, KrpcCodec, Message, MessageCodec, Node, NodeCounts,
    NodeEntry, Quality, RoutingTable, SplitPolicy, MAX_BUCKET_SIZE_K,
};
pub use crate::error::{DecodeError, Error};
pub use crate::rpc::{
    config::{resolve_bootstrap, Config, DEFAULT_BOOTSTRAP_NODES},
    events::{Event, EventHandler, NoopEvents},
    transport::{Transport, UdpTransport},
    Dht, SearchId, SearchMode,
};

/// Alias `Result<T, Error>`.
pub type Result<T, E = Error> = core::result::Result<T, E>;
