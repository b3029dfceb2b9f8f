use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;

use crate::block::{Block, DataBlockReceiver, DataBlockSender, SessionInfo};
use crate::channel::ChannelStructure;
use crate::connection::Connection;
use crate::endpoint::NetworkInterface;
use crate::protocol::{Packet, TimeBase, MAX_FRAGMENT_SIZE};
use crate::resolver::{ResolveStatus, Resolver};
use crate::stats::generate_guid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClientState {
    Disconnected = 0,
    ResolvingHostname = 1,
    SendingConnectionRequest = 2,
    SendingChallengeResponse = 3,
    SendingClientData = 4,
    ReadyForConnection = 5,
    Connected = 6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientError {
    None = 0,
    ResolveHostnameFailed = 1,
    ResolveHostnameTimedOut = 2,
    InvalidConnectAddress = 3,
    MissingResolver = 4,
    ConnectionRequestDenied = 5,
    ConnectionTimedOut = 6,
    ConnectionError = 7,
    DisconnectedFromServer = 8,
    DataBlockError = 9,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub fragment_size: usize,
    pub fragments_per_second: f64,
    pub max_server_data_size: usize,
    pub connecting_send_rate: f64,
    pub connected_send_rate: f64,
    pub connecting_time_out: f64,
    pub connected_time_out: f64,
    pub default_server_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            fragment_size: 1024,
            fragments_per_second: 60.0,
            max_server_data_size: 256 * 1024,
            connecting_send_rate: 10.0,
            connected_send_rate: 30.0,
            connecting_time_out: 5.0,
            connected_time_out: 10.0,
            default_server_port: 10000,
        }
    }
}

/// Client side of the connection protocol. All progress happens inside
/// `update`, driven by the host's time base; nothing blocks.
pub struct Client {
    config: ClientConfig,
    network: Rc<RefCell<dyn NetworkInterface>>,
    connection: Connection,
    resolver: Option<Box<dyn Resolver>>,
    client_data: Option<Rc<Block>>,
    data_block_sender: Option<DataBlockSender>,
    data_block_receiver: Option<DataBlockReceiver>,
    state: ClientState,
    error: ClientError,
    extended_error: u32,
    time_base: TimeBase,
    send_accumulator: f64,
    address: Option<SocketAddr>,
    hostname: Option<String>,
    client_guid: u64,
    server_guid: u64,
    last_packet_receive_time: f64,
}

impl Client {
    pub fn new(
        network: Rc<RefCell<dyn NetworkInterface>>,
        channel_structure: &dyn ChannelStructure,
        config: ClientConfig,
    ) -> Self {
        assert!(config.fragment_size > 0 && config.fragment_size <= MAX_FRAGMENT_SIZE);
        let connection = Connection::new(channel_structure);
        let data_block_receiver = (config.max_server_data_size > 0)
            .then(|| DataBlockReceiver::new(config.fragment_size, config.max_server_data_size));
        Self {
            network,
            connection,
            resolver: None,
            client_data: None,
            data_block_sender: None,
            data_block_receiver,
            state: ClientState::Disconnected,
            error: ClientError::None,
            extended_error: 0,
            time_base: TimeBase::default(),
            send_accumulator: 0.0,
            address: None,
            hostname: None,
            client_guid: 0,
            server_guid: 0,
            last_packet_receive_time: 0.0,
            config,
        }
    }

    pub fn with_resolver(mut self, resolver: Box<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Arms the out-of-band upload of a client data block during connect.
    pub fn with_client_data(mut self, block: Rc<Block>) -> Self {
        self.data_block_sender = Some(DataBlockSender::new(
            Rc::clone(&block),
            self.config.fragment_size,
            self.config.fragments_per_second,
        ));
        self.client_data = Some(block);
        self
    }

    pub fn connect(&mut self, address: SocketAddr) {
        self.disconnect();
        self.clear_error();
        log::info!("connecting to {}", address);
        self.state = ClientState::SendingConnectionRequest;
        self.address = Some(address);
        self.client_guid = generate_guid();
        self.send_accumulator = 0.0;
        self.last_packet_receive_time = self.time_base.time;
    }

    pub fn connect_hostname(&mut self, hostname: &str) {
        self.disconnect();
        self.clear_error();

        // a hostname that parses as an address connects directly
        if let Ok(address) = hostname.parse::<SocketAddr>() {
            self.connect(address);
            return;
        }

        if self.resolver.is_none() {
            log::warn!("cannot connect to {}: no resolver configured", hostname);
            self.disconnect_with_error(ClientError::InvalidConnectAddress, 0);
            return;
        }

        log::info!("resolving {}", hostname);
        if let Some(resolver) = &mut self.resolver {
            resolver.resolve(hostname);
        }
        self.state = ClientState::ResolvingHostname;
        self.hostname = Some(hostname.to_owned());
        self.last_packet_receive_time = self.time_base.time;
    }

    /// Tears the session down immediately, sending one best-effort farewell
    /// packet. The latched error, if any, survives until the next connect.
    pub fn disconnect(&mut self) {
        if self.is_disconnected() {
            return;
        }
        log::info!("client disconnect");

        if let Some(address) = self.address {
            self.network.borrow_mut().send_packet(
                address,
                Packet::Disconnected {
                    client_guid: self.client_guid,
                    server_guid: self.server_guid,
                },
            );
        }

        self.connection.reset();
        self.clear_state_data();
        self.state = ClientState::Disconnected;

        if let Some(sender) = &mut self.data_block_sender {
            sender.clear();
        }
        if let Some(receiver) = &mut self.data_block_receiver {
            receiver.clear();
        }
    }

    pub fn update(&mut self, time_base: TimeBase) {
        self.time_base = time_base;
        self.update_resolver();
        self.update_connection();
        self.update_send_packets();
        self.update_network_interface();
        self.update_receive_packets();
        self.update_send_client_data();
        self.update_timeout();
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_disconnected(&self) -> bool {
        self.state == ClientState::Disconnected
    }

    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.state > ClientState::Disconnected && self.state < ClientState::Connected
    }

    pub fn has_error(&self) -> bool {
        self.error != ClientError::None
    }

    pub fn error(&self) -> ClientError {
        self.error
    }

    pub fn extended_error(&self) -> u32 {
        self.extended_error
    }

    pub fn server_address(&self) -> Option<SocketAddr> {
        self.address
    }

    pub fn client_guid(&self) -> u64 {
        self.client_guid
    }

    pub fn server_guid(&self) -> u64 {
        self.server_guid
    }

    /// Server data block, once fully received.
    pub fn server_data(&self) -> Option<&[u8]> {
        self.data_block_receiver
            .as_ref()
            .and_then(|receiver| receiver.block())
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    fn update_resolver(&mut self) {
        let time_base = self.time_base;
        if let Some(resolver) = &mut self.resolver {
            resolver.update(&time_base);
        }
        if self.state != ClientState::ResolvingHostname {
            return;
        }
        let Some(hostname) = self.hostname.clone() else {
            return;
        };
        let Some(resolver) = &self.resolver else {
            return;
        };

        let entry = resolver
            .entry(&hostname)
            .map(|entry| (entry.status, entry.addresses.first().copied()));
        match entry {
            None | Some((ResolveStatus::Failed, _)) | Some((ResolveStatus::Succeeded, None)) => {
                log::warn!("failed to resolve {}", hostname);
                self.disconnect_with_error(ClientError::ResolveHostnameFailed, 0);
            }
            Some((ResolveStatus::Succeeded, Some(mut address))) => {
                if address.port() == 0 {
                    address.set_port(self.config.default_server_port);
                }
                log::info!("resolved {} to {}", hostname, address);
                self.connect(address);
            }
            Some((ResolveStatus::Pending, _)) => {}
        }
    }

    fn update_connection(&mut self) {
        if self.state != ClientState::Connected {
            return;
        }
        self.connection.update(&self.time_base);
        if let Some(error) = self.connection.error() {
            log::warn!("connection error: {}", error);
            self.disconnect_with_error(ClientError::ConnectionError, error as u32);
        }
    }

    fn update_send_packets(&mut self) {
        if self.state < ClientState::SendingConnectionRequest {
            return;
        }

        self.send_accumulator += self.time_base.delta_time;
        let send_rate = if self.is_connected() {
            self.config.connected_send_rate
        } else {
            self.config.connecting_send_rate
        };
        let time_between_packets = 1.0 / send_rate;
        if self.send_accumulator < time_between_packets {
            return;
        }
        self.send_accumulator -= time_between_packets;

        let Some(address) = self.address else {
            return;
        };

        let packet = match self.state {
            ClientState::SendingConnectionRequest => Some(Packet::ConnectionRequest {
                client_guid: self.client_guid,
            }),
            ClientState::SendingChallengeResponse => Some(Packet::ChallengeResponse {
                client_guid: self.client_guid,
                server_guid: self.server_guid,
            }),
            ClientState::ReadyForConnection => Some(Packet::ReadyForConnection {
                client_guid: self.client_guid,
                server_guid: self.server_guid,
            }),
            ClientState::Connected => match self.connection.write_packet() {
                Ok(connection_packet) => Some(Packet::Connection(connection_packet)),
                Err(err) => {
                    log::warn!("failed to write connection packet: {}", err);
                    None
                }
            },
            // the data block sender paces itself in update_send_client_data
            _ => None,
        };

        if let Some(packet) = packet {
            self.network.borrow_mut().send_packet(address, packet);
        }
    }

    fn update_network_interface(&mut self) {
        self.network.borrow_mut().update(&self.time_base);
    }

    fn update_receive_packets(&mut self) {
        loop {
            let received = self.network.borrow_mut().receive_packet();
            let Some((from, packet)) = received else {
                break;
            };
            self.process_packet(from, packet);
        }
    }

    fn process_packet(&mut self, from: SocketAddr, packet: Packet) {
        if let Packet::Disconnected {
            client_guid,
            server_guid,
        } = packet
        {
            self.process_disconnected(from, client_guid, server_guid);
            return;
        }

        match self.state {
            ClientState::SendingConnectionRequest => match packet {
                Packet::ConnectionChallenge {
                    client_guid,
                    server_guid,
                } => self.process_connection_challenge(from, client_guid, server_guid),
                Packet::ConnectionDenied {
                    client_guid,
                    reason,
                } => {
                    if Some(from) == self.address && client_guid == self.client_guid {
                        log::info!("connection denied by {} (reason {})", from, reason);
                        self.disconnect_with_error(ClientError::ConnectionRequestDenied, reason);
                    }
                }
                _ => {}
            },
            ClientState::SendingChallengeResponse => match packet {
                Packet::DataBlockFragment {
                    client_guid,
                    server_guid,
                    block_size,
                    num_fragments,
                    fragment_id,
                    fragment_bytes,
                    fragment_data,
                } => self.process_data_block_fragment(
                    client_guid,
                    server_guid,
                    block_size,
                    num_fragments,
                    fragment_id,
                    fragment_bytes,
                    &fragment_data,
                ),
                Packet::ReadyForConnection {
                    client_guid,
                    server_guid,
                } => {
                    if Some(from) == self.address
                        && client_guid == self.client_guid
                        && server_guid == self.server_guid
                    {
                        self.state = if self.client_data.is_some() {
                            log::debug!("sending client data");
                            ClientState::SendingClientData
                        } else {
                            ClientState::ReadyForConnection
                        };
                        self.last_packet_receive_time = self.time_base.time;
                    }
                }
                _ => {}
            },
            ClientState::SendingClientData => match packet {
                Packet::DataBlockFragment {
                    client_guid,
                    server_guid,
                    block_size,
                    num_fragments,
                    fragment_id,
                    fragment_bytes,
                    fragment_data,
                } => self.process_data_block_fragment(
                    client_guid,
                    server_guid,
                    block_size,
                    num_fragments,
                    fragment_id,
                    fragment_bytes,
                    &fragment_data,
                ),
                Packet::DataBlockFragmentAck {
                    client_guid,
                    server_guid,
                    fragment_id,
                } => {
                    if client_guid == self.client_guid && server_guid == self.server_guid {
                        if let Some(sender) = &mut self.data_block_sender {
                            sender.process_ack(fragment_id);
                        }
                    }
                }
                _ => {}
            },
            ClientState::ReadyForConnection | ClientState::Connected => match packet {
                Packet::DataBlockFragment {
                    client_guid,
                    server_guid,
                    block_size,
                    num_fragments,
                    fragment_id,
                    fragment_bytes,
                    fragment_data,
                } => self.process_data_block_fragment(
                    client_guid,
                    server_guid,
                    block_size,
                    num_fragments,
                    fragment_id,
                    fragment_bytes,
                    &fragment_data,
                ),
                Packet::Connection(connection_packet) => {
                    if self.connection.read_packet(&connection_packet) {
                        if self.state == ClientState::ReadyForConnection {
                            log::info!("client connected to {}", from);
                            self.state = ClientState::Connected;
                        }
                        self.last_packet_receive_time = self.time_base.time;
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }

    fn process_connection_challenge(
        &mut self,
        from: SocketAddr,
        client_guid: u64,
        server_guid: u64,
    ) {
        if Some(from) != self.address || client_guid != self.client_guid {
            return;
        }
        log::debug!("received connection challenge from {}", from);

        self.state = ClientState::SendingChallengeResponse;
        self.server_guid = server_guid;
        self.last_packet_receive_time = self.time_base.time;

        let info = SessionInfo {
            address: from,
            client_guid: self.client_guid,
            server_guid,
        };
        if let Some(sender) = &mut self.data_block_sender {
            sender.set_info(info);
        }
        if let Some(receiver) = &mut self.data_block_receiver {
            receiver.set_info(info);
        }
    }

    fn process_disconnected(&mut self, from: SocketAddr, client_guid: u64, server_guid: u64) {
        if Some(from) != self.address {
            return;
        }
        if client_guid != self.client_guid || server_guid != self.server_guid {
            return;
        }
        log::info!("disconnected by server {}", from);
        self.disconnect_with_error(ClientError::DisconnectedFromServer, 0);
    }

    #[allow(clippy::too_many_arguments)]
    fn process_data_block_fragment(
        &mut self,
        client_guid: u64,
        server_guid: u64,
        block_size: u32,
        num_fragments: u32,
        fragment_id: u32,
        fragment_bytes: u32,
        fragment_data: &[u8],
    ) {
        if client_guid != self.client_guid || server_guid != self.server_guid {
            return;
        }
        let result = match &mut self.data_block_receiver {
            Some(receiver) => receiver.process_fragment(
                block_size,
                num_fragments,
                fragment_id,
                fragment_bytes,
                fragment_data,
            ),
            None => return,
        };
        match result {
            Ok(ack_fragment_id) => {
                if let Some(address) = self.address {
                    self.network.borrow_mut().send_packet(
                        address,
                        Packet::DataBlockFragmentAck {
                            client_guid: self.client_guid,
                            server_guid: self.server_guid,
                            fragment_id: ack_fragment_id,
                        },
                    );
                }
            }
            Err(error) => {
                self.disconnect_with_error(ClientError::DataBlockError, error as u32);
            }
        }
    }

    fn update_send_client_data(&mut self) {
        if self.state != ClientState::SendingClientData {
            return;
        }
        let Some(sender) = &mut self.data_block_sender else {
            return;
        };
        if sender.send_completed() {
            log::debug!("client data sent, ready for connection");
            self.state = ClientState::ReadyForConnection;
            return;
        }
        sender.update(&self.time_base, &mut *self.network.borrow_mut());
    }

    fn update_timeout(&mut self) {
        if self.is_disconnected() {
            return;
        }
        let timeout = if self.is_connected() {
            self.config.connected_time_out
        } else {
            self.config.connecting_time_out
        };
        if self.last_packet_receive_time + timeout < self.time_base.time {
            let previous_state = self.state;
            log::warn!("client timed out in state {:?}", previous_state);
            let error = if previous_state == ClientState::ResolvingHostname {
                ClientError::ResolveHostnameTimedOut
            } else {
                ClientError::ConnectionTimedOut
            };
            self.disconnect_with_error(error, previous_state as u32);
        }
    }

    fn disconnect_with_error(&mut self, error: ClientError, extended_error: u32) {
        self.disconnect();
        self.error = error;
        self.extended_error = extended_error;
    }

    fn clear_error(&mut self) {
        self.error = ClientError::None;
        self.extended_error = 0;
    }

    fn clear_state_data(&mut self) {
        self.hostname = None;
        self.address = None;
        self.client_guid = 0;
        self.server_guid = 0;
    }
}
