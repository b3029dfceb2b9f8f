use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;

use locknet::{
    generate_guid, Block, Client, ClientConfig, ClientError, ClientState, Connection,
    DataBlockReceiver, MessageChannel, MessageChannelStructure, NetworkCondition,
    NetworkInterface, NetworkSimulator, Packet, SessionInfo, SimulatorConfig, SimulatorEndpoint,
    TimeBase,
};

const DELTA_TIME: f64 = 1.0 / 60.0;

fn addr(port: u16) -> SocketAddr {
    format!("[::1]:{}", port).parse().unwrap()
}

fn tick(time: f64) -> TimeBase {
    TimeBase {
        time,
        delta_time: DELTA_TIME,
    }
}

/// Hand-driven server side: answers the handshake, receives client data if
/// configured, and exchanges connection packets once the client reports
/// ready. Server-to-client block streaming is covered in data_block.rs.
struct TestServer {
    endpoint: SimulatorEndpoint<Packet>,
    connection: Connection,
    server_guid: u64,
    client_data: Option<DataBlockReceiver>,
    connected: bool,
}

impl TestServer {
    fn new(simulator: &NetworkSimulator, port: u16) -> Self {
        Self {
            endpoint: simulator.endpoint::<Packet>(addr(port)),
            connection: Connection::new(&MessageChannelStructure::default()),
            server_guid: generate_guid(),
            client_data: None,
            connected: false,
        }
    }

    fn expecting_client_data(mut self, max_block_size: usize) -> Self {
        self.client_data = Some(DataBlockReceiver::new(1024, max_block_size));
        self
    }

    fn update(&mut self, time: &TimeBase) {
        self.endpoint.update(time);

        while let Some((from, packet)) = self.endpoint.receive_packet() {
            match packet {
                Packet::ConnectionRequest { client_guid } => {
                    self.endpoint.send_packet(
                        from,
                        Packet::ConnectionChallenge {
                            client_guid,
                            server_guid: self.server_guid,
                        },
                    );
                }
                Packet::ChallengeResponse {
                    client_guid,
                    server_guid,
                } => {
                    if server_guid != self.server_guid {
                        continue;
                    }
                    if let Some(receiver) = &mut self.client_data {
                        if receiver.info().is_none() {
                            receiver.set_info(SessionInfo {
                                address: from,
                                client_guid,
                                server_guid,
                            });
                        }
                    }
                    self.endpoint.send_packet(
                        from,
                        Packet::ReadyForConnection {
                            client_guid,
                            server_guid,
                        },
                    );
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
                    if server_guid != self.server_guid {
                        continue;
                    }
                    if let Some(receiver) = &mut self.client_data {
                        if let Ok(ack) = receiver.process_fragment(
                            block_size,
                            num_fragments,
                            fragment_id,
                            fragment_bytes,
                            &fragment_data,
                        ) {
                            self.endpoint.send_packet(
                                from,
                                Packet::DataBlockFragmentAck {
                                    client_guid,
                                    server_guid,
                                    fragment_id: ack,
                                },
                            );
                        }
                    }
                }
                Packet::ReadyForConnection { server_guid, .. } => {
                    if server_guid == self.server_guid {
                        self.connected = true;
                    }
                }
                Packet::Connection(connection_packet) => {
                    self.connection.read_packet(&connection_packet);
                }
                Packet::Disconnected { .. } => {
                    self.connected = false;
                }
                _ => {}
            }
        }

        if self.connected {
            // client addr is fixed in these tests
            if let Ok(connection_packet) = self.connection.write_packet() {
                self.endpoint
                    .send_packet(addr(5000), Packet::Connection(connection_packet));
            }
        }
    }
}

fn client_with_endpoint(
    simulator: &NetworkSimulator,
    port: u16,
    config: ClientConfig,
) -> (Client, Rc<RefCell<SimulatorEndpoint<Packet>>>) {
    let endpoint = Rc::new(RefCell::new(simulator.endpoint::<Packet>(addr(port))));
    let network: Rc<RefCell<dyn NetworkInterface>> = endpoint.clone();
    let client = Client::new(network, &MessageChannelStructure::default(), config);
    (client, endpoint)
}

#[test]
fn test_handshake_connects_within_one_second() {
    let simulator = NetworkSimulator::new(SimulatorConfig::default());
    let (mut client, _) = client_with_endpoint(&simulator, 5000, ClientConfig::default());
    let mut server = TestServer::new(&simulator, 5001);

    client.connect(addr(5001));
    assert_eq!(client.state(), ClientState::SendingConnectionRequest);

    let mut time = 0.0;
    let mut saw_challenge_response_state = false;
    while time < 1.0 && !client.is_connected() {
        time += DELTA_TIME;
        client.update(tick(time));
        server.update(&tick(time));
        if client.state() == ClientState::SendingChallengeResponse {
            saw_challenge_response_state = true;
        }
    }

    assert!(client.is_connected(), "client did not connect within 1s");
    assert!(saw_challenge_response_state);
    assert_eq!(client.error(), ClientError::None);
    assert_eq!(client.server_guid(), server.server_guid);
    assert!(time <= 1.0);
}

#[test]
fn test_connection_denied() {
    let simulator = NetworkSimulator::new(SimulatorConfig::default());
    let (mut client, _) = client_with_endpoint(&simulator, 5000, ClientConfig::default());
    let mut server_endpoint = simulator.endpoint::<Packet>(addr(5001));

    client.connect(addr(5001));

    let mut time = 0.0;
    for _ in 0..120 {
        time += DELTA_TIME;
        client.update(tick(time));

        server_endpoint.update(&tick(time));
        while let Some((from, packet)) = server_endpoint.receive_packet() {
            if let Packet::ConnectionRequest { client_guid } = packet {
                server_endpoint.send_packet(
                    from,
                    Packet::ConnectionDenied {
                        client_guid,
                        reason: 7,
                    },
                );
            }
        }
        if client.has_error() {
            break;
        }
    }

    assert_eq!(client.state(), ClientState::Disconnected);
    assert_eq!(client.error(), ClientError::ConnectionRequestDenied);
    assert_eq!(client.extended_error(), 7);
}

#[test]
fn test_timeout_while_connecting() {
    let simulator = NetworkSimulator::new(SimulatorConfig::default());
    simulator.add_state(NetworkCondition {
        latency: 0.0,
        packet_loss: 100.0,
        jitter: 0.0,
    });
    let (mut client, _) = client_with_endpoint(&simulator, 5000, ClientConfig::default());
    let mut server = TestServer::new(&simulator, 5001);

    client.connect(addr(5001));

    let mut time = 0.0;
    for _ in 0..(7.0 / DELTA_TIME) as usize {
        time += DELTA_TIME;
        client.update(tick(time));
        server.update(&tick(time));
    }

    assert_eq!(client.state(), ClientState::Disconnected);
    assert_eq!(client.error(), ClientError::ConnectionTimedOut);
    assert_eq!(
        client.extended_error(),
        ClientState::SendingConnectionRequest as u32
    );
}

#[test]
fn test_challenge_with_wrong_guid_or_address_ignored() {
    let simulator = NetworkSimulator::new(SimulatorConfig::default());
    let (mut client, _) = client_with_endpoint(&simulator, 5000, ClientConfig::default());
    let mut server_endpoint = simulator.endpoint::<Packet>(addr(5001));
    let mut impostor_endpoint = simulator.endpoint::<Packet>(addr(5002));

    client.connect(addr(5001));

    let mut time = 0.0;
    for _ in 0..60 {
        time += DELTA_TIME;
        client.update(tick(time));

        server_endpoint.update(&tick(time));
        while let Some((from, packet)) = server_endpoint.receive_packet() {
            if let Packet::ConnectionRequest { client_guid } = packet {
                // wrong client guid from the right address
                server_endpoint.send_packet(
                    from,
                    Packet::ConnectionChallenge {
                        client_guid: client_guid ^ 1,
                        server_guid: 42,
                    },
                );
                // right client guid from the wrong address
                impostor_endpoint.send_packet(
                    from,
                    Packet::ConnectionChallenge {
                        client_guid,
                        server_guid: 43,
                    },
                );
            }
        }
    }

    assert_eq!(client.state(), ClientState::SendingConnectionRequest);
    assert_eq!(client.server_guid(), 0);
}

#[test]
fn test_disconnect_sends_farewell_packet() {
    let simulator = NetworkSimulator::new(SimulatorConfig::default());
    let (mut client, _) = client_with_endpoint(&simulator, 5000, ClientConfig::default());
    let mut server = TestServer::new(&simulator, 5001);

    client.connect(addr(5001));
    let mut time = 0.0;
    while time < 2.0 && !client.is_connected() {
        time += DELTA_TIME;
        client.update(tick(time));
        server.update(&tick(time));
    }
    assert!(client.is_connected());
    assert!(server.connected);

    client.disconnect();
    assert_eq!(client.state(), ClientState::Disconnected);
    assert!(!client.has_error());

    // farewell packet reaches the server on the next tick
    time += DELTA_TIME;
    server.update(&tick(time));
    assert!(!server.connected);
}

#[test]
fn test_server_side_disconnect() {
    let simulator = NetworkSimulator::new(SimulatorConfig::default());
    let (mut client, _) = client_with_endpoint(&simulator, 5000, ClientConfig::default());
    let mut server = TestServer::new(&simulator, 5001);

    client.connect(addr(5001));
    let mut time = 0.0;
    while time < 2.0 && !client.is_connected() {
        time += DELTA_TIME;
        client.update(tick(time));
        server.update(&tick(time));
    }
    assert!(client.is_connected());
    let client_guid = client.client_guid();

    server.endpoint.send_packet(
        addr(5000),
        Packet::Disconnected {
            client_guid,
            server_guid: server.server_guid,
        },
    );

    time += DELTA_TIME;
    client.update(tick(time));

    assert_eq!(client.state(), ClientState::Disconnected);
    assert_eq!(client.error(), ClientError::DisconnectedFromServer);
}

#[test]
fn test_client_data_upload() {
    let simulator = NetworkSimulator::new(SimulatorConfig::default());
    let client_block: Vec<u8> = (0..4000).map(|i| (i % 251) as u8).collect();

    let (client, _) = client_with_endpoint(&simulator, 5000, ClientConfig::default());
    let mut client = client.with_client_data(Rc::new(Block::new(client_block.clone())));
    let mut server = TestServer::new(&simulator, 5001).expecting_client_data(65536);

    client.connect(addr(5001));

    let mut time = 0.0;
    let mut saw_sending_client_data = false;
    while time < 5.0 && !client.is_connected() {
        time += DELTA_TIME;
        client.update(tick(time));
        server.update(&tick(time));
        if client.state() == ClientState::SendingClientData {
            saw_sending_client_data = true;
        }
    }

    assert!(client.is_connected());
    assert!(saw_sending_client_data);
    let received = server
        .client_data
        .as_ref()
        .unwrap()
        .block()
        .expect("server did not assemble client data");
    assert_eq!(received, &client_block[..]);
}

#[test]
fn test_connected_messaging_round_trip() {
    #[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, PartialEq)]
    struct ChatLine {
        user: String,
        text: String,
    }

    let simulator = NetworkSimulator::new(SimulatorConfig::default());
    let (mut client, _) = client_with_endpoint(&simulator, 5000, ClientConfig::default());
    let mut server = TestServer::new(&simulator, 5001);

    client.connect(addr(5001));
    let mut time = 0.0;
    while time < 2.0 && !client.is_connected() {
        time += DELTA_TIME;
        client.update(tick(time));
        server.update(&tick(time));
    }
    assert!(client.is_connected());

    let line = ChatLine {
        user: "left".to_owned(),
        text: "ready when you are".to_owned(),
    };
    let payload = rkyv::to_bytes::<rkyv::rancor::Error>(&line).unwrap();
    client
        .connection_mut()
        .channel_mut(0)
        .as_any_mut()
        .downcast_mut::<MessageChannel>()
        .unwrap()
        .send_message(payload.to_vec())
        .unwrap();

    let mut received = None;
    while time < 4.0 && received.is_none() {
        time += DELTA_TIME;
        client.update(tick(time));
        server.update(&tick(time));
        received = server
            .connection
            .channel_mut(0)
            .as_any_mut()
            .downcast_mut::<MessageChannel>()
            .unwrap()
            .receive_message();
    }

    let received = received.expect("server never received the message");
    let decoded: ChatLine =
        rkyv::from_bytes::<ChatLine, rkyv::rancor::Error>(&received).unwrap();
    assert_eq!(decoded, line);
}
