//! Serialize and deserialize KRPC messages (BEP_0005, with BEP_0032 IPv6 contacts).

mod internal;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use serde_bytes::ByteBuf;

use crate::common::{AddressFamily, Id, Node, ID_SIZE};
use crate::error::DecodeError;

/// A generic error.
pub const ERROR_GENERIC: i32 = 201;
/// A server error.
pub const ERROR_SERVER: i32 = 202;
/// Malformed packet, invalid arguments or bad token.
pub const ERROR_PROTOCOL: i32 = 203;
/// Method unknown.
pub const ERROR_METHOD_UNKNOWN: i32 = 204;

const COMPACT_V4_SIZE: usize = 6;
const COMPACT_V6_SIZE: usize = 18;
const NODE4_SIZE: usize = ID_SIZE + COMPACT_V4_SIZE;
const NODE6_SIZE: usize = ID_SIZE + COMPACT_V6_SIZE;

#[derive(Debug, PartialEq, Clone)]
pub struct Message {
    /// Opaque bytes chosen by the requester and echoed back in the reply.
    pub transaction_id: Vec<u8>,

    /// The version of the requester or responder.
    pub version: Option<Vec<u8>>,

    /// The IP address and port ("SocketAddr") of the requester as seen from the responder's point of view.
    /// Only set on responses.
    pub requester_ip: Option<SocketAddr>,

    pub message_type: MessageType,
}

#[derive(Debug, PartialEq, Clone)]
pub enum MessageType {
    Request(RequestSpecific),

    Response(ResponseSpecific),

    Error(ErrorSpecific),
}

#[derive(Debug, PartialEq, Clone)]
pub struct ErrorSpecific {
    pub code: i32,
    pub description: String,
}

#[derive(Debug, PartialEq, Clone)]
pub struct RequestSpecific {
    pub requester_id: Id,
    pub request_type: RequestTypeSpecific,
}

#[derive(Debug, PartialEq, Clone)]
pub enum RequestTypeSpecific {
    Ping,
    FindNode(FindNodeRequestArguments),
    GetPeers(GetPeersRequestArguments),
    AnnouncePeer(AnnouncePeerRequestArguments),
}

#[derive(Debug, PartialEq, Clone)]
pub enum ResponseSpecific {
    Ping(PingResponseArguments),
    FindNode(FindNodeResponseArguments),
    GetPeers(GetPeersResponseArguments),
}

// === PING ===

#[derive(Debug, PartialEq, Clone)]
pub struct PingResponseArguments {
    pub responder_id: Id,
}

// === FIND_NODE ===

#[derive(Debug, PartialEq, Clone)]
pub struct FindNodeRequestArguments {
    pub target: Id,
    /// Address families the requester wants contacts for, empty means the
    /// family the request was sent over.
    pub want: Vec<AddressFamily>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FindNodeResponseArguments {
    pub responder_id: Id,
    /// IPv4 and IPv6 contacts, split into `nodes` and `nodes6` on the wire.
    pub nodes: Vec<Node>,
}

// === Get Peers ===

#[derive(Debug, PartialEq, Clone)]
pub struct GetPeersRequestArguments {
    pub info_hash: Id,
    pub want: Vec<AddressFamily>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct GetPeersResponseArguments {
    pub responder_id: Id,
    pub token: Vec<u8>,
    pub values: Vec<SocketAddr>,
    pub nodes: Vec<Node>,
}

// === Announce Peer ===

#[derive(Debug, PartialEq, Clone)]
pub struct AnnouncePeerRequestArguments {
    pub info_hash: Id,
    pub port: u16,
    /// Use the source port of the request instead of `port`.
    pub implied_port: bool,
    pub token: Vec<u8>,
}

/// Turns raw datagrams into [Message]s and back.
pub trait MessageCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, DecodeError>;

    fn decode(&self, bytes: &[u8]) -> Result<Message, DecodeError>;
}

#[derive(Debug, Clone, Copy, Default)]
/// Bencoded KRPC messages as used by the BitTorrent Mainline DHT.
pub struct KrpcCodec;

impl MessageCodec for KrpcCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, DecodeError> {
        message.to_bytes()
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message, DecodeError> {
        Message::from_bytes(bytes)
    }
}

impl Message {
    fn into_serde_message(self) -> internal::DHTMessage {
        internal::DHTMessage {
            transaction_id: self.transaction_id,
            version: self.version,
            ip: self
                .requester_ip
                .map(|sockaddr| sockaddr_to_bytes(&sockaddr)),
            variant: match self.message_type {
                MessageType::Request(RequestSpecific {
                    requester_id,
                    request_type,
                }) => internal::DHTMessageVariant::Request(match request_type {
                    RequestTypeSpecific::Ping => internal::DHTRequestSpecific::Ping {
                        arguments: internal::DHTPingArguments {
                            id: requester_id.to_vec(),
                        },
                    },
                    RequestTypeSpecific::FindNode(find_node_args) => {
                        internal::DHTRequestSpecific::FindNode {
                            arguments: internal::DHTFindNodeRequestArguments {
                                id: requester_id.to_vec(),
                                target: find_node_args.target.to_vec(),
                                want: want_to_bytes(&find_node_args.want),
                            },
                        }
                    }
                    RequestTypeSpecific::GetPeers(get_peers_args) => {
                        internal::DHTRequestSpecific::GetPeers {
                            arguments: internal::DHTGetPeersRequestArguments {
                                id: requester_id.to_vec(),
                                info_hash: get_peers_args.info_hash.to_vec(),
                                want: want_to_bytes(&get_peers_args.want),
                            },
                        }
                    }
                    RequestTypeSpecific::AnnouncePeer(announce_peer_args) => {
                        internal::DHTRequestSpecific::AnnouncePeer {
                            arguments: internal::DHTAnnouncePeerRequestArguments {
                                id: requester_id.to_vec(),
                                info_hash: announce_peer_args.info_hash.to_vec(),
                                port: announce_peer_args.port,
                                token: announce_peer_args.token,
                                implied_port: Some(announce_peer_args.implied_port.into()),
                            },
                        }
                    }
                }),

                MessageType::Response(res) => {
                    internal::DHTMessageVariant::Response(internal::DHTResponseSpecific {
                        arguments: match res {
                            ResponseSpecific::Ping(ping_args) => internal::DHTResponseArguments {
                                id: ping_args.responder_id.to_vec(),
                                nodes: None,
                                nodes6: None,
                                token: None,
                                values: None,
                            },
                            ResponseSpecific::FindNode(find_node_args) => {
                                let (nodes, nodes6) = split_nodes(&find_node_args.nodes);

                                internal::DHTResponseArguments {
                                    id: find_node_args.responder_id.to_vec(),
                                    // An empty `nodes` still marks this as a find_node response.
                                    nodes: nodes.or_else(|| nodes6.is_none().then(Vec::new)),
                                    nodes6,
                                    token: None,
                                    values: None,
                                }
                            }
                            ResponseSpecific::GetPeers(get_peers_args) => {
                                let (nodes, nodes6) = split_nodes(&get_peers_args.nodes);

                                internal::DHTResponseArguments {
                                    id: get_peers_args.responder_id.to_vec(),
                                    nodes,
                                    nodes6,
                                    token: Some(get_peers_args.token),
                                    values: if get_peers_args.values.is_empty() {
                                        None
                                    } else {
                                        Some(peers_to_bytes(&get_peers_args.values))
                                    },
                                }
                            }
                        },
                    })
                }

                MessageType::Error(err) => {
                    internal::DHTMessageVariant::Error(internal::DHTErrorSpecific {
                        error_info: vec![
                            serde_bencode::value::Value::Int(err.code.into()),
                            serde_bencode::value::Value::Bytes(err.description.into()),
                        ],
                    })
                }
            },
        }
    }

    fn from_serde_message(msg: internal::DHTMessage) -> Result<Message, DecodeError> {
        if msg.transaction_id.is_empty() {
            return Err(DecodeError::InvalidTransactionId(msg.transaction_id));
        }

        Ok(Message {
            transaction_id: msg.transaction_id,
            version: msg.version,
            requester_ip: match msg.ip {
                Some(ip) => Some(bytes_to_sockaddr(ip)?),
                _ => None,
            },
            message_type: match msg.variant {
                internal::DHTMessageVariant::Request(req_variant) => {
                    MessageType::Request(match req_variant {
                        internal::DHTRequestSpecific::Ping { arguments } => RequestSpecific {
                            requester_id: Id::from_bytes(arguments.id)?,
                            request_type: RequestTypeSpecific::Ping,
                        },
                        internal::DHTRequestSpecific::FindNode { arguments } => RequestSpecific {
                            requester_id: Id::from_bytes(arguments.id)?,
                            request_type: RequestTypeSpecific::FindNode(FindNodeRequestArguments {
                                target: Id::from_bytes(arguments.target)?,
                                want: bytes_to_want(arguments.want),
                            }),
                        },
                        internal::DHTRequestSpecific::GetPeers { arguments } => RequestSpecific {
                            requester_id: Id::from_bytes(arguments.id)?,
                            request_type: RequestTypeSpecific::GetPeers(GetPeersRequestArguments {
                                info_hash: Id::from_bytes(arguments.info_hash)?,
                                want: bytes_to_want(arguments.want),
                            }),
                        },
                        internal::DHTRequestSpecific::AnnouncePeer { arguments } => {
                            RequestSpecific {
                                requester_id: Id::from_bytes(arguments.id)?,
                                request_type: RequestTypeSpecific::AnnouncePeer(
                                    AnnouncePeerRequestArguments {
                                        info_hash: Id::from_bytes(&arguments.info_hash)?,
                                        port: arguments.port,
                                        implied_port: arguments
                                            .implied_port
                                            .map(|implied_port| implied_port != 0)
                                            .unwrap_or(false),
                                        token: arguments.token,
                                    },
                                ),
                            }
                        }
                    })
                }
                internal::DHTMessageVariant::Response(internal::DHTResponseSpecific {
                    arguments,
                }) => {
                    let responder_id = Id::from_bytes(&arguments.id)?;

                    let mut nodes = match &arguments.nodes {
                        Some(nodes) => bytes_to_nodes(nodes, NODE4_SIZE)?,
                        None => vec![],
                    };
                    if let Some(nodes6) = &arguments.nodes6 {
                        nodes.extend(bytes_to_nodes(nodes6, NODE6_SIZE)?);
                    }

                    MessageType::Response(match arguments.token {
                        Some(token) => ResponseSpecific::GetPeers(GetPeersResponseArguments {
                            responder_id,
                            token,
                            values: match arguments.values {
                                Some(values) => bytes_to_peers(values)?,
                                None => vec![],
                            },
                            nodes,
                        }),
                        None if arguments.nodes.is_some() || arguments.nodes6.is_some() => {
                            ResponseSpecific::FindNode(FindNodeResponseArguments {
                                responder_id,
                                nodes,
                            })
                        }
                        None => ResponseSpecific::Ping(PingResponseArguments { responder_id }),
                    })
                }
                internal::DHTMessageVariant::Error(err) => {
                    if err.error_info.len() < 2 {
                        return Err(DecodeError::InvalidErrorMessage(
                            "Error packet should have at least 2 elements",
                        ));
                    }
                    MessageType::Error(ErrorSpecific {
                        code: match err.error_info[0] {
                            serde_bencode::value::Value::Int(code) => match code.try_into() {
                                Ok(code) => code,
                                Err(_) => {
                                    return Err(DecodeError::InvalidErrorMessage(
                                        "error parsing error code",
                                    ))
                                }
                            },
                            _ => {
                                return Err(DecodeError::InvalidErrorMessage(
                                    "Expected error code as first element",
                                ))
                            }
                        },
                        description: match &err.error_info[1] {
                            serde_bencode::value::Value::Bytes(desc) => {
                                String::from_utf8_lossy(desc).to_string()
                            }
                            _ => {
                                return Err(DecodeError::InvalidErrorMessage(
                                    "Expected description as second element",
                                ))
                            }
                        },
                    })
                }
            },
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        Ok(self.clone().into_serde_message().to_bytes()?)
    }

    /// Decode a bencoded KRPC message.
    ///
    /// A query for a method we don't implement fails with [DecodeError::UnknownMethod],
    /// carrying the transaction id so the caller can still answer it.
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Message, DecodeError> {
        let bytes = bytes.as_ref();

        match internal::DHTMessage::from_bytes(bytes) {
            Ok(message) => Message::from_serde_message(message),
            Err(error) => {
                if let Ok(header) = serde_bencode::from_bytes::<internal::DHTMessageHeader>(bytes) {
                    if let Some(method) = header.method {
                        let known = ["ping", "find_node", "get_peers", "announce_peer"];

                        if header.message_type == "q"
                            && !header.transaction_id.is_empty()
                            && !known.contains(&method.as_str())
                        {
                            return Err(DecodeError::UnknownMethod {
                                transaction_id: header.transaction_id,
                                method,
                            });
                        }
                    }
                }

                Err(error.into())
            }
        }
    }

    /// Return the Id of the sender of the Message, Error messages carry none.
    pub fn get_author_id(&self) -> Option<Id> {
        let id = match &self.message_type {
            MessageType::Request(arguments) => arguments.requester_id,
            MessageType::Response(response_variant) => match response_variant {
                ResponseSpecific::Ping(arguments) => arguments.responder_id,
                ResponseSpecific::FindNode(arguments) => arguments.responder_id,
                ResponseSpecific::GetPeers(arguments) => arguments.responder_id,
            },
            MessageType::Error(_) => {
                return None;
            }
        };

        Some(id)
    }

    /// Contacts carried by a find_node or get_peers response.
    pub fn get_closer_nodes(&self) -> Option<&[Node]> {
        match &self.message_type {
            MessageType::Response(ResponseSpecific::FindNode(arguments)) => Some(&arguments.nodes),
            MessageType::Response(ResponseSpecific::GetPeers(arguments)) => Some(&arguments.nodes),
            _ => None,
        }
    }

    pub fn get_token(&self) -> Option<&[u8]> {
        match &self.message_type {
            MessageType::Response(ResponseSpecific::GetPeers(arguments)) => Some(&arguments.token),
            _ => None,
        }
    }

    /// Peers carried by a get_peers response.
    pub fn get_values(&self) -> Option<&[SocketAddr]> {
        match &self.message_type {
            MessageType::Response(ResponseSpecific::GetPeers(arguments)) => {
                Some(&arguments.values)
            }
            _ => None,
        }
    }
}

/// Our own transaction ids are always 4 bytes, anything else is not a reply to us.
pub fn transaction_id(bytes: &[u8]) -> Result<u32, DecodeError> {
    let array: [u8; 4] = bytes
        .try_into()
        .map_err(|_| DecodeError::InvalidTransactionId(bytes.to_vec()))?;

    Ok(u32::from_be_bytes(array))
}

fn bytes_to_sockaddr<T: AsRef<[u8]>>(bytes: T) -> Result<SocketAddr, DecodeError> {
    let bytes = bytes.as_ref();
    match bytes.len() {
        COMPACT_V4_SIZE => {
            let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
            let port = u16::from_be_bytes([bytes[4], bytes[5]]);

            Ok(SocketAddr::new(IpAddr::V4(ip), port))
        }
        COMPACT_V6_SIZE => {
            let octets: [u8; 16] = bytes[..16]
                .try_into()
                .map_err(|_| DecodeError::InvalidAddressLength(bytes.len()))?;
            let port = u16::from_be_bytes([bytes[16], bytes[17]]);

            Ok(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        length => Err(DecodeError::InvalidAddressLength(length)),
    }
}

/// Compact address, IPv4-mapped IPv6 addresses are written as IPv4.
pub fn sockaddr_to_bytes(sockaddr: &SocketAddr) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(COMPACT_V6_SIZE);

    match sockaddr.ip() {
        IpAddr::V4(v4) => bytes.extend_from_slice(&v4.octets()),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => bytes.extend_from_slice(&v4.octets()),
            None => bytes.extend_from_slice(&v6.octets()),
        },
    }
    bytes.extend_from_slice(&sockaddr.port().to_be_bytes());

    bytes
}

fn nodes_to_bytes<'a>(nodes: impl Iterator<Item = &'a Node>) -> Vec<u8> {
    let mut vec = Vec::new();

    for node in nodes {
        vec.extend_from_slice(node.id.as_bytes());
        vec.extend(sockaddr_to_bytes(&node.address));
    }

    vec
}

/// Compact `nodes` and `nodes6` strings, `None` when a family has no contacts.
fn split_nodes(nodes: &[Node]) -> (Option<Vec<u8>>, Option<Vec<u8>>) {
    let of = |family| {
        let mut of_family = nodes.iter().filter(move |n| n.family() == family).peekable();

        of_family.peek().is_some().then(|| nodes_to_bytes(of_family))
    };

    (of(AddressFamily::Ipv4), of(AddressFamily::Ipv6))
}

fn bytes_to_nodes(bytes: &[u8], node_size: usize) -> Result<Vec<Node>, DecodeError> {
    if bytes.len() % node_size != 0 {
        return Err(DecodeError::InvalidNodesLength(bytes.len()));
    }

    bytes
        .chunks_exact(node_size)
        .map(|chunk| {
            let id = Id::from_bytes(&chunk[..ID_SIZE])?;
            let address = bytes_to_sockaddr(&chunk[ID_SIZE..])?;

            Ok(Node::new(id, address))
        })
        .collect()
}

fn peers_to_bytes(peers: &[SocketAddr]) -> Vec<ByteBuf> {
    peers
        .iter()
        .map(|p| ByteBuf::from(sockaddr_to_bytes(p)))
        .collect()
}

fn bytes_to_peers(bytes: Vec<ByteBuf>) -> Result<Vec<SocketAddr>, DecodeError> {
    bytes.iter().map(bytes_to_sockaddr).collect()
}

fn want_to_bytes(want: &[AddressFamily]) -> Option<Vec<ByteBuf>> {
    if want.is_empty() {
        return None;
    }

    Some(
        want.iter()
            .map(|family| match family {
                AddressFamily::Ipv4 => ByteBuf::from(b"n4".to_vec()),
                AddressFamily::Ipv6 => ByteBuf::from(b"n6".to_vec()),
            })
            .collect(),
    )
}

fn bytes_to_want(want: Option<Vec<ByteBuf>>) -> Vec<AddressFamily> {
    want.unwrap_or_default()
        .iter()
        .filter_map(|item| match item.as_slice() {
            b"n4" => Some(AddressFamily::Ipv4),
            b"n6" => Some(AddressFamily::Ipv6),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id() {
        assert_eq!(transaction_id(&[0, 0, 1, 2]).unwrap(), 258);
        assert!(transaction_id(&[1, 2]).is_err());
        assert!(transaction_id(&[]).is_err());
    }

    #[test]
    fn test_decode_ping_request() {
        let bytes = b"d1:ad2:id20:abcdefghij0123456789e1:q4:ping1:t2:aa1:y1:qe";

        let message = KrpcCodec.decode(bytes).unwrap();

        assert_eq!(message.transaction_id, b"aa".to_vec());
        assert_eq!(
            message.message_type,
            MessageType::Request(RequestSpecific {
                requester_id: Id::from_bytes(b"abcdefghij0123456789").unwrap(),
                request_type: RequestTypeSpecific::Ping,
            })
        );
    }

    #[test]
    fn test_encode_ping_response() {
        let message = Message {
            transaction_id: b"aa".to_vec(),
            version: None,
            requester_ip: None,
            message_type: MessageType::Response(ResponseSpecific::Ping(PingResponseArguments {
                responder_id: Id::from_bytes(b"mnopqrstuvwxyz123456").unwrap(),
            })),
        };

        assert_eq!(
            KrpcCodec.encode(&message).unwrap(),
            b"d1:rd2:id20:mnopqrstuvwxyz123456e1:t2:aa1:y1:re".to_vec()
        );
    }

    #[test]
    fn test_find_node_request() {
        let original_msg = Message {
            transaction_id: vec![0, 0, 1, 2],
            version: Some(b"PD01".to_vec()),
            requester_ip: None,
            message_type: MessageType::Request(RequestSpecific {
                requester_id: Id::random(),
                request_type: RequestTypeSpecific::FindNode(FindNodeRequestArguments {
                    target: Id::random(),
                    want: vec![AddressFamily::Ipv4, AddressFamily::Ipv6],
                }),
            }),
        };

        let bytes = original_msg.to_bytes().unwrap();
        let parsed_msg = Message::from_bytes(bytes).unwrap();

        assert_eq!(parsed_msg, original_msg);
    }

    #[test]
    fn test_find_node_response_both_families() {
        let original_msg = Message {
            transaction_id: vec![0, 0, 1, 2],
            version: Some(vec![1]),
            requester_ip: Some("50.51.52.53:5455".parse().unwrap()),
            message_type: MessageType::Response(ResponseSpecific::FindNode(
                FindNodeResponseArguments {
                    responder_id: Id::random(),
                    nodes: vec![
                        Node::new(Id::random(), "49.50.52.52:5354".parse().unwrap()),
                        Node::new(Id::random(), "[2001:db8::7]:6881".parse().unwrap()),
                    ],
                },
            )),
        };

        let bytes = original_msg.to_bytes().unwrap();
        let parsed_msg = Message::from_bytes(bytes).unwrap();

        assert_eq!(parsed_msg, original_msg);
    }

    #[test]
    fn test_empty_find_node_response_is_not_a_ping() {
        let original_msg = Message {
            transaction_id: vec![0, 0, 0, 9],
            version: None,
            requester_ip: None,
            message_type: MessageType::Response(ResponseSpecific::FindNode(
                FindNodeResponseArguments {
                    responder_id: Id::random(),
                    nodes: vec![],
                },
            )),
        };

        let parsed_msg = Message::from_bytes(original_msg.to_bytes().unwrap()).unwrap();

        assert_eq!(parsed_msg, original_msg);
    }

    #[test]
    fn test_get_peers_response_peers() {
        let original_msg = Message {
            transaction_id: vec![0, 0, 0, 3],
            version: Some(vec![1]),
            requester_ip: Some("[2001:db8::1]:5455".parse().unwrap()),
            message_type: MessageType::Response(ResponseSpecific::GetPeers(
                GetPeersResponseArguments {
                    responder_id: Id::random(),
                    token: vec![99, 100, 101, 102],
                    values: vec![
                        "123.123.123.123:123".parse().unwrap(),
                        "[2001:db8::2]:6881".parse().unwrap(),
                    ],
                    nodes: vec![],
                },
            )),
        };

        let bytes = original_msg.to_bytes().unwrap();
        let parsed_msg = Message::from_bytes(bytes).unwrap();

        assert_eq!(parsed_msg, original_msg);
        assert_eq!(parsed_msg.get_values().map(|v| v.len()), Some(2));
        assert_eq!(parsed_msg.get_token(), Some(&[99, 100, 101, 102][..]));
    }

    #[test]
    fn test_announce_peer_request() {
        let original_msg = Message {
            transaction_id: vec![0, 0, 0, 4],
            version: None,
            requester_ip: None,
            message_type: MessageType::Request(RequestSpecific {
                requester_id: Id::random(),
                request_type: RequestTypeSpecific::AnnouncePeer(AnnouncePeerRequestArguments {
                    info_hash: Id::random(),
                    port: 6881,
                    implied_port: true,
                    token: vec![1, 2, 3, 4],
                }),
            }),
        };

        let parsed_msg = Message::from_bytes(original_msg.to_bytes().unwrap()).unwrap();

        assert_eq!(parsed_msg, original_msg);
    }

    #[test]
    fn test_error_message() {
        let bytes = b"d1:eli203e13:Invalid tokene1:t4:abcd1:y1:ee";

        let message = Message::from_bytes(bytes).unwrap();

        assert_eq!(
            message.message_type,
            MessageType::Error(ErrorSpecific {
                code: ERROR_PROTOCOL,
                description: "Invalid token".to_string()
            })
        );
        assert_eq!(message.get_author_id(), None);
    }

    #[test]
    fn test_unknown_method() {
        let bytes = b"d1:ad2:id20:abcdefghij0123456789e1:q4:vote1:t2:xy1:y1:qe";

        match Message::from_bytes(bytes) {
            Err(DecodeError::UnknownMethod {
                transaction_id,
                method,
            }) => {
                assert_eq!(transaction_id, b"xy".to_vec());
                assert_eq!(method, "vote");
            }
            other => panic!("expected unknown method, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed() {
        assert!(Message::from_bytes(b"not bencode").is_err());
        assert!(Message::from_bytes(b"d1:rd2:id3:abce1:t2:aa1:y1:re").is_err());

        // 25 bytes of nodes is not a whole contact.
        let mut bytes = b"d1:rd2:id20:abcdefghij01234567895:nodes25:".to_vec();
        bytes.extend([7_u8; 25]);
        bytes.extend(b"e1:t2:aa1:y1:re");

        assert!(matches!(
            Message::from_bytes(bytes),
            Err(DecodeError::InvalidNodesLength(25))
        ));
    }
}
