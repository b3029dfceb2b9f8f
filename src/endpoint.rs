use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use crate::protocol::{Packet, TimeBase, MAX_PACKET_SIZE};
use crate::serialize::WirePacket;
use crate::stats::NetworkStats;

/// Packet transport polled by the runtime. `send_packet` takes ownership of
/// the packet; `receive_packet` hands packets back with the source address
/// attached. Implementations queue internally and never block.
pub trait NetworkInterface<P: WirePacket = Packet> {
    fn send_packet(&mut self, to: SocketAddr, packet: P);

    fn receive_packet(&mut self) -> Option<(SocketAddr, P)>;

    fn update(&mut self, time: &TimeBase);

    fn max_packet_size(&self) -> usize;
}

pub struct UdpEndpoint<P: WirePacket = Packet> {
    socket: UdpSocket,
    local_addr: SocketAddr,
    max_packet_size: usize,
    recv_buffer: Vec<u8>,
    queue: VecDeque<(SocketAddr, P)>,
    stats: NetworkStats,
}

impl<P: WirePacket> UdpEndpoint<P> {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;
        Ok(Self {
            socket,
            local_addr,
            max_packet_size: MAX_PACKET_SIZE,
            recv_buffer: vec![0u8; MAX_PACKET_SIZE],
            queue: VecDeque::new(),
            stats: NetworkStats::default(),
        })
    }

    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self.recv_buffer.resize(max_packet_size, 0);
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }
}

impl<P: WirePacket> NetworkInterface<P> for UdpEndpoint<P> {
    fn send_packet(&mut self, to: SocketAddr, mut packet: P) {
        let data = match packet.encode(self.max_packet_size) {
            Ok(data) => data,
            Err(err) => {
                log::warn!("dropping outbound packet to {}: {}", to, err);
                self.stats.packets_dropped += 1;
                return;
            }
        };
        match self.socket.send_to(&data, to) {
            Ok(bytes) => {
                self.stats.packets_sent += 1;
                self.stats.bytes_sent += bytes as u64;
            }
            Err(err) => {
                log::warn!("udp send to {} failed: {}", to, err);
                self.stats.packets_dropped += 1;
            }
        }
    }

    fn receive_packet(&mut self) -> Option<(SocketAddr, P)> {
        self.queue.pop_front()
    }

    fn update(&mut self, _time: &TimeBase) {
        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, from)) => match P::decode(&self.recv_buffer[..size]) {
                    Ok(packet) => {
                        self.stats.packets_received += 1;
                        self.stats.bytes_received += size as u64;
                        self.queue.push_back((from, packet));
                    }
                    Err(err) => {
                        log::debug!("dropping malformed packet from {}: {}", from, err);
                        self.stats.packets_dropped += 1;
                    }
                },
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    log::warn!("udp receive failed: {}", err);
                    break;
                }
            }
        }
    }

    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}
