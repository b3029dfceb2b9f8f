use crate::connection::ConnectionPacket;
use crate::serialize::{ReadStream, Stream, StreamError, WirePacket, WriteStream};

pub const MAX_PACKET_SIZE: usize = 4096;
pub const MAX_FRAGMENT_SIZE: usize = 1024;
pub const MAX_BLOCK_FRAGMENTS: usize = 1024;

/// Host-supplied clock. The runtime owns no clock of its own; every update
/// is driven by the time base pushed in by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeBase {
    pub time: f64,
    pub delta_time: f64,
}

// 16-bit wrap comparison: a > b iff the signed difference a - b is positive.
#[inline]
pub fn sequence_greater_than(s1: u16, s2: u16) -> bool {
    (s1.wrapping_sub(s2) as i16) > 0
}

const PACKET_KIND_COUNT: u32 = 9;

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    ConnectionRequest {
        client_guid: u64,
    },
    ConnectionChallenge {
        client_guid: u64,
        server_guid: u64,
    },
    ConnectionDenied {
        client_guid: u64,
        reason: u32,
    },
    ChallengeResponse {
        client_guid: u64,
        server_guid: u64,
    },
    ReadyForConnection {
        client_guid: u64,
        server_guid: u64,
    },
    DataBlockFragment {
        client_guid: u64,
        server_guid: u64,
        block_size: u32,
        num_fragments: u32,
        fragment_id: u32,
        fragment_bytes: u32,
        fragment_data: Vec<u8>,
    },
    DataBlockFragmentAck {
        client_guid: u64,
        server_guid: u64,
        fragment_id: u32,
    },
    Connection(ConnectionPacket),
    Disconnected {
        client_guid: u64,
        server_guid: u64,
    },
}

impl Packet {
    fn kind(&self) -> u32 {
        match self {
            Packet::ConnectionRequest { .. } => 0,
            Packet::ConnectionChallenge { .. } => 1,
            Packet::ConnectionDenied { .. } => 2,
            Packet::ChallengeResponse { .. } => 3,
            Packet::ReadyForConnection { .. } => 4,
            Packet::DataBlockFragment { .. } => 5,
            Packet::DataBlockFragmentAck { .. } => 6,
            Packet::Connection(_) => 7,
            Packet::Disconnected { .. } => 8,
        }
    }

    fn with_kind(kind: u32) -> Option<Packet> {
        match kind {
            0 => Some(Packet::ConnectionRequest { client_guid: 0 }),
            1 => Some(Packet::ConnectionChallenge {
                client_guid: 0,
                server_guid: 0,
            }),
            2 => Some(Packet::ConnectionDenied {
                client_guid: 0,
                reason: 0,
            }),
            3 => Some(Packet::ChallengeResponse {
                client_guid: 0,
                server_guid: 0,
            }),
            4 => Some(Packet::ReadyForConnection {
                client_guid: 0,
                server_guid: 0,
            }),
            5 => Some(Packet::DataBlockFragment {
                client_guid: 0,
                server_guid: 0,
                block_size: 0,
                num_fragments: 0,
                fragment_id: 0,
                fragment_bytes: 0,
                fragment_data: Vec::new(),
            }),
            6 => Some(Packet::DataBlockFragmentAck {
                client_guid: 0,
                server_guid: 0,
                fragment_id: 0,
            }),
            7 => Some(Packet::Connection(ConnectionPacket::default())),
            8 => Some(Packet::Disconnected {
                client_guid: 0,
                server_guid: 0,
            }),
            _ => None,
        }
    }

    fn serialize_fields<S: Stream>(&mut self, stream: &mut S) -> Result<(), StreamError> {
        match self {
            Packet::ConnectionRequest { client_guid } => stream.serialize_u64(client_guid),
            Packet::ConnectionChallenge {
                client_guid,
                server_guid,
            }
            | Packet::ChallengeResponse {
                client_guid,
                server_guid,
            }
            | Packet::ReadyForConnection {
                client_guid,
                server_guid,
            }
            | Packet::Disconnected {
                client_guid,
                server_guid,
            } => {
                stream.serialize_u64(client_guid)?;
                stream.serialize_u64(server_guid)
            }
            Packet::ConnectionDenied {
                client_guid,
                reason,
            } => {
                stream.serialize_u64(client_guid)?;
                stream.serialize_u32(reason)
            }
            Packet::DataBlockFragment {
                client_guid,
                server_guid,
                block_size,
                num_fragments,
                fragment_id,
                fragment_bytes,
                fragment_data,
            } => {
                stream.serialize_u64(client_guid)?;
                stream.serialize_u64(server_guid)?;
                stream.serialize_u32(block_size)?;
                stream.serialize_uint(num_fragments, MAX_BLOCK_FRAGMENTS as u32)?;
                stream.serialize_uint(fragment_id, MAX_BLOCK_FRAGMENTS as u32 - 1)?;
                stream.serialize_uint(fragment_bytes, MAX_FRAGMENT_SIZE as u32)?;
                if S::IS_WRITING && fragment_data.len() != *fragment_bytes as usize {
                    return Err(StreamError::OutOfRange);
                }
                if S::IS_READING {
                    fragment_data.resize(*fragment_bytes as usize, 0);
                }
                stream.serialize_bytes(fragment_data)
            }
            Packet::DataBlockFragmentAck {
                client_guid,
                server_guid,
                fragment_id,
            } => {
                stream.serialize_u64(client_guid)?;
                stream.serialize_u64(server_guid)?;
                stream.serialize_uint(fragment_id, MAX_BLOCK_FRAGMENTS as u32 - 1)
            }
            Packet::Connection(connection_packet) => connection_packet.serialize_fields(stream),
        }
    }
}

impl WirePacket for Packet {
    fn write_to(&mut self, stream: &mut WriteStream) -> Result<(), StreamError> {
        let mut kind = self.kind();
        stream.serialize_uint(&mut kind, PACKET_KIND_COUNT - 1)?;
        self.serialize_fields(stream)
    }

    fn read_from(stream: &mut ReadStream<'_>) -> Result<Self, StreamError> {
        let mut kind = 0u32;
        stream.serialize_uint(&mut kind, PACKET_KIND_COUNT - 1)?;
        let mut packet = Packet::with_kind(kind).ok_or(StreamError::OutOfRange)?;
        packet.serialize_fields(stream)?;
        Ok(packet)
    }
}
