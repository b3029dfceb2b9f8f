use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::rc::Rc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::endpoint::NetworkInterface;
use crate::protocol::{Packet, TimeBase, MAX_PACKET_SIZE};
use crate::serialize::WirePacket;
use crate::stats::NetworkStats;

/// One simulated link state. `packet_loss` is a percentage, `latency` and
/// `jitter` are seconds; each packet is delayed by
/// `latency + uniform(-jitter, +jitter)`.
#[derive(Debug, Clone, Copy)]
pub struct NetworkCondition {
    pub latency: f64,
    pub packet_loss: f64,
    pub jitter: f64,
}

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub max_packet_size: usize,
    pub tcp_mode: bool,
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
            tcp_mode: false,
            seed: 0,
        }
    }
}

#[derive(Debug)]
struct InFlight {
    release_time: f64,
    tie: u64,
    from: SocketAddr,
    to: SocketAddr,
    data: Vec<u8>,
}

impl PartialEq for InFlight {
    fn eq(&self, other: &Self) -> bool {
        self.release_time == other.release_time && self.tie == other.tie
    }
}

impl Eq for InFlight {}

impl PartialOrd for InFlight {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InFlight {
    fn cmp(&self, other: &Self) -> Ordering {
        // reverse order for min-heap; ties pop in send order
        other
            .release_time
            .total_cmp(&self.release_time)
            .then_with(|| other.tie.cmp(&self.tie))
    }
}

struct SimulatorInner {
    max_packet_size: usize,
    tcp_mode: bool,
    conditions: Vec<NetworkCondition>,
    rng: SmallRng,
    now: f64,
    next_tie: u64,
    in_flight: BinaryHeap<InFlight>,
    inboxes: HashMap<SocketAddr, VecDeque<(SocketAddr, Vec<u8>)>>,
    last_release: HashMap<(SocketAddr, SocketAddr), f64>,
}

impl SimulatorInner {
    fn enqueue(&mut self, from: SocketAddr, to: SocketAddr, data: Vec<u8>) {
        let mut delay = 0.0;
        if !self.conditions.is_empty() {
            let condition = self.conditions[self.rng.gen_range(0..self.conditions.len())];
            // TCP-equivalent mode is reliable: loss is ignored
            if !self.tcp_mode
                && condition.packet_loss > 0.0
                && self.rng.gen_range(0.0..100.0) < condition.packet_loss
            {
                return;
            }
            delay = condition.latency;
            if condition.jitter > 0.0 {
                delay += self.rng.gen_range(-condition.jitter..=condition.jitter);
            }
            if delay < 0.0 {
                delay = 0.0;
            }
        }

        let mut release_time = self.now + delay;
        if self.tcp_mode {
            // in-order delivery: a packet never overtakes an earlier one on its flow
            let last = self.last_release.entry((from, to)).or_insert(0.0);
            if release_time < *last {
                release_time = *last;
            } else {
                *last = release_time;
            }
        }

        let tie = self.next_tie;
        self.next_tie += 1;
        self.in_flight.push(InFlight {
            release_time,
            tie,
            from,
            to,
            data,
        });
    }

    fn advance(&mut self, time: f64) {
        if time > self.now {
            self.now = time;
        }
        while let Some(head) = self.in_flight.peek() {
            if head.release_time > self.now {
                break;
            }
            let packet = self.in_flight.pop().unwrap();
            self.inboxes
                .entry(packet.to)
                .or_default()
                .push_back((packet.from, packet.data));
        }
    }
}

/// In-process packet medium for tests and local loopback. Endpoints attach
/// by address; everything an endpoint sends is serialized to wire bytes,
/// delayed/dropped per the configured conditions and delivered to the
/// destination endpoint's inbox.
pub struct NetworkSimulator {
    inner: Rc<RefCell<SimulatorInner>>,
}

impl NetworkSimulator {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SimulatorInner {
                max_packet_size: config.max_packet_size,
                tcp_mode: config.tcp_mode,
                conditions: Vec::new(),
                rng: SmallRng::seed_from_u64(config.seed),
                now: 0.0,
                next_tie: 0,
                in_flight: BinaryHeap::new(),
                inboxes: HashMap::new(),
                last_release: HashMap::new(),
            })),
        }
    }

    pub fn add_state(&self, condition: NetworkCondition) {
        self.inner.borrow_mut().conditions.push(condition);
    }

    pub fn set_tcp_mode(&self, tcp_mode: bool) {
        self.inner.borrow_mut().tcp_mode = tcp_mode;
    }

    pub fn tcp_mode(&self) -> bool {
        self.inner.borrow().tcp_mode
    }

    pub fn update(&self, time: &TimeBase) {
        self.inner.borrow_mut().advance(time.time);
    }

    pub fn endpoint<P: WirePacket>(&self, local_addr: SocketAddr) -> SimulatorEndpoint<P> {
        self.inner
            .borrow_mut()
            .inboxes
            .entry(local_addr)
            .or_default();
        SimulatorEndpoint {
            inner: Rc::clone(&self.inner),
            local_addr,
            stats: NetworkStats::default(),
            _packet: PhantomData,
        }
    }
}

pub struct SimulatorEndpoint<P: WirePacket = Packet> {
    inner: Rc<RefCell<SimulatorInner>>,
    local_addr: SocketAddr,
    stats: NetworkStats,
    _packet: PhantomData<P>,
}

impl<P: WirePacket> SimulatorEndpoint<P> {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }
}

impl<P: WirePacket> NetworkInterface<P> for SimulatorEndpoint<P> {
    fn send_packet(&mut self, to: SocketAddr, mut packet: P) {
        let max_packet_size = self.inner.borrow().max_packet_size;
        match packet.encode(max_packet_size) {
            Ok(data) => {
                self.stats.packets_sent += 1;
                self.stats.bytes_sent += data.len() as u64;
                self.inner.borrow_mut().enqueue(self.local_addr, to, data);
            }
            Err(err) => {
                log::warn!("dropping outbound packet to {}: {}", to, err);
                self.stats.packets_dropped += 1;
            }
        }
    }

    fn receive_packet(&mut self) -> Option<(SocketAddr, P)> {
        loop {
            let next = {
                let mut inner = self.inner.borrow_mut();
                inner
                    .inboxes
                    .get_mut(&self.local_addr)
                    .and_then(|inbox| inbox.pop_front())
            };
            let (from, data) = next?;
            match P::decode(&data) {
                Ok(packet) => {
                    self.stats.packets_received += 1;
                    self.stats.bytes_received += data.len() as u64;
                    return Some((from, packet));
                }
                Err(err) => {
                    log::debug!("dropping malformed packet from {}: {}", from, err);
                    self.stats.packets_dropped += 1;
                }
            }
        }
    }

    fn update(&mut self, time: &TimeBase) {
        self.inner.borrow_mut().advance(time.time);
    }

    fn max_packet_size(&self) -> usize {
        self.inner.borrow().max_packet_size
    }
}
