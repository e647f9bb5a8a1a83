//! Main Crate Error

use std::net::{IpAddr, SocketAddr};

#[derive(thiserror::Error, Debug)]
/// Peerdht crate error enum.
///
/// None of these are fatal to a [crate::Dht]; they are returned so the caller can log them.
pub enum Error {
    /// A datagram that could not be decoded into a KRPC message.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A response or error for a transaction that is absent, expired, or was sent
    /// to a different address than the one the reply came from.
    #[error("Unknown transaction {transaction_id} from {from}")]
    UnknownTransaction {
        /// Transaction id carried by the reply.
        transaction_id: u32,
        /// Source address of the reply.
        from: SocketAddr,
    },

    /// No usable address to send a request to.
    #[error("Unreachable address: {0}")]
    Unreachable(SocketAddr),

    /// An announce_peer request carried a token we did not issue recently.
    #[error("Invalid announce token from {0}")]
    InvalidToken(SocketAddr),

    /// The bucket owning a contact is full of healthy nodes and can not split.
    #[error("Routing table bucket is full")]
    TableFull,

    /// Datagram from a source that sent too many malformed messages.
    #[error("Ignoring blacklisted source {0}")]
    Blacklisted(IpAddr),

    /// Incoming request dropped by the requests rate limiter.
    #[error("Incoming request dropped by rate limiter")]
    RateLimited,

    #[error(transparent)]
    /// Transparent [std::io::Error]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
/// Errors encoding or decoding KRPC messages.
pub enum DecodeError {
    /// Errors related to parsing DHT messages.
    #[error("Failed to parse packet bytes: {0}")]
    BencodeError(#[from] serde_bencode::Error),

    /// Id is not 20 bytes.
    #[error("Invalid Id size, expected 20, got {0}")]
    InvalidIdSize(usize),

    /// Transaction id longer than 4 bytes or empty.
    #[error("Invalid transaction_id: {0:?}")]
    InvalidTransactionId(Vec<u8>),

    /// Compact node or peer info with a length that is neither IPv4 nor IPv6.
    #[error("Invalid compact address length: {0}")]
    InvalidAddressLength(usize),

    /// Compact node list whose length is not a multiple of the node size.
    #[error("Wrong number of bytes for nodes message ({0})")]
    InvalidNodesLength(usize),

    /// Malformed `e` list in an error message.
    #[error("Invalid error message: {0}")]
    InvalidErrorMessage(&'static str),

    /// A query for a method this node does not implement.
    #[error("Unknown method: {method}")]
    UnknownMethod {
        /// Transaction id of the query, to answer it with an error.
        transaction_id: Vec<u8>,
        method: String,
    },

    /// Hex string is not a valid Id.
    #[error("Invalid Id encoding: {0}")]
    InvalidIdEncoding(String),
}
