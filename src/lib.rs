mod block;
mod channel;
mod client;
mod connection;
mod endpoint;
mod lockstep;
mod protocol;
mod resolver;
mod serialize;
mod simulator;
mod stats;
mod window;

pub use block::{Block, DataBlockError, DataBlockReceiver, DataBlockSender, SessionInfo};
pub use channel::{
    Channel, ChannelConfig, ChannelError, ChannelStructure, MessageChannel,
    MessageChannelStructure, MAX_CHANNELS,
};
pub use client::{Client, ClientConfig, ClientError, ClientState};
pub use connection::{Connection, ConnectionPacket};
pub use endpoint::{NetworkInterface, UdpEndpoint};
pub use lockstep::{
    InputReceiver, InputSender, LockstepConfig, LockstepInput, LockstepPacket, PlayoutDelayBuffer,
    MAX_INPUTS,
};
pub use protocol::{
    sequence_greater_than, Packet, TimeBase, MAX_BLOCK_FRAGMENTS, MAX_FRAGMENT_SIZE,
    MAX_PACKET_SIZE,
};
pub use resolver::{DnsResolver, ResolveEntry, ResolveStatus, Resolver, StaticResolver};
pub use serialize::{
    bits_required, ReadStream, Stream, StreamError, WirePacket, WriteStream,
};
pub use simulator::{NetworkCondition, NetworkSimulator, SimulatorConfig, SimulatorEndpoint};
pub use stats::{generate_guid, NetworkStats};
pub use window::{SlidingWindow, WindowFull};
