use std::net::SocketAddr;
use std::rc::Rc;

use crate::endpoint::NetworkInterface;
use crate::protocol::{Packet, TimeBase, MAX_BLOCK_FRAGMENTS, MAX_FRAGMENT_SIZE};

/// Immutable byte block exchanged out of band during connection setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    data: Vec<u8>,
}

impl Block {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Session identity handed to the block sender/receiver once the challenge
/// completes. Passing it in breaks the ownership cycle between the client,
/// the transport and the block machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub address: SocketAddr,
    pub client_guid: u64,
    pub server_guid: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DataBlockError {
    BlockTooLarge = 1,
    InvalidBlockSize = 2,
    InconsistentBlockSize = 3,
    InconsistentFragmentCount = 4,
    InvalidFragmentId = 5,
    InvalidFragmentSize = 6,
}

fn num_fragments_for(block_size: usize, fragment_size: usize) -> usize {
    (block_size + fragment_size - 1) / fragment_size
}

/// Fragments a block and drives acked retransmission at a fixed rate.
/// Quiescent once every fragment has been acked.
#[derive(Debug)]
pub struct DataBlockSender {
    block: Rc<Block>,
    fragment_size: usize,
    fragments_per_second: f64,
    num_fragments: usize,
    acked: Vec<bool>,
    acked_count: usize,
    next_to_send: usize,
    send_accumulator: f64,
    info: Option<SessionInfo>,
}

impl DataBlockSender {
    pub fn new(block: Rc<Block>, fragment_size: usize, fragments_per_second: f64) -> Self {
        assert!(fragment_size > 0 && fragment_size <= MAX_FRAGMENT_SIZE);
        assert!(fragments_per_second > 0.0);
        assert!(!block.is_empty());
        let num_fragments = num_fragments_for(block.len(), fragment_size);
        assert!(num_fragments <= MAX_BLOCK_FRAGMENTS);
        Self {
            block,
            fragment_size,
            fragments_per_second,
            num_fragments,
            acked: vec![false; num_fragments],
            acked_count: 0,
            next_to_send: 0,
            send_accumulator: 0.0,
            info: None,
        }
    }

    pub fn set_info(&mut self, info: SessionInfo) {
        self.info = Some(info);
    }

    pub fn clear(&mut self) {
        for acked in &mut self.acked {
            *acked = false;
        }
        self.acked_count = 0;
        self.next_to_send = 0;
        self.send_accumulator = 0.0;
        self.info = None;
    }

    pub fn num_fragments(&self) -> usize {
        self.num_fragments
    }

    pub fn acked_count(&self) -> usize {
        self.acked_count
    }

    pub fn send_completed(&self) -> bool {
        self.acked_count == self.num_fragments
    }

    pub fn process_ack(&mut self, fragment_id: u32) {
        let fragment_id = fragment_id as usize;
        if fragment_id >= self.num_fragments {
            return;
        }
        if !self.acked[fragment_id] {
            self.acked[fragment_id] = true;
            self.acked_count += 1;
        }
    }

    pub fn update(&mut self, time: &TimeBase, network: &mut dyn NetworkInterface) {
        let Some(info) = self.info else {
            return;
        };
        if self.send_completed() {
            return;
        }

        self.send_accumulator += time.delta_time;
        let time_between_fragments = 1.0 / self.fragments_per_second;

        while self.send_accumulator >= time_between_fragments {
            self.send_accumulator -= time_between_fragments;
            let Some(fragment_id) = self.next_unacked_fragment() else {
                break;
            };
            self.next_to_send = (fragment_id + 1) % self.num_fragments;
            network.send_packet(info.address, self.fragment_packet(&info, fragment_id));
        }
    }

    // round-robin scan starting at next_to_send, wrapping
    fn next_unacked_fragment(&self) -> Option<usize> {
        (0..self.num_fragments)
            .map(|i| (self.next_to_send + i) % self.num_fragments)
            .find(|&id| !self.acked[id])
    }

    fn fragment_packet(&self, info: &SessionInfo, fragment_id: usize) -> Packet {
        let begin = fragment_id * self.fragment_size;
        let end = (begin + self.fragment_size).min(self.block.len());
        let fragment_data = self.block.bytes()[begin..end].to_vec();
        Packet::DataBlockFragment {
            client_guid: info.client_guid,
            server_guid: info.server_guid,
            block_size: self.block.len() as u32,
            num_fragments: self.num_fragments as u32,
            fragment_id: fragment_id as u32,
            fragment_bytes: fragment_data.len() as u32,
            fragment_data,
        }
    }
}

/// Reassembles a fragmented block. Metadata is pinned by the first valid
/// fragment; any later inconsistency latches an error.
#[derive(Debug)]
pub struct DataBlockReceiver {
    fragment_size: usize,
    max_block_size: usize,
    block_size: Option<usize>,
    num_fragments: usize,
    received: Vec<bool>,
    received_count: usize,
    buffer: Vec<u8>,
    error: Option<DataBlockError>,
    info: Option<SessionInfo>,
}

impl DataBlockReceiver {
    pub fn new(fragment_size: usize, max_block_size: usize) -> Self {
        assert!(fragment_size > 0 && fragment_size <= MAX_FRAGMENT_SIZE);
        assert!(max_block_size > 0);
        Self {
            fragment_size,
            max_block_size,
            block_size: None,
            num_fragments: 0,
            received: Vec::new(),
            received_count: 0,
            buffer: Vec::new(),
            error: None,
            info: None,
        }
    }

    pub fn set_info(&mut self, info: SessionInfo) {
        self.info = Some(info);
    }

    pub fn info(&self) -> Option<SessionInfo> {
        self.info
    }

    pub fn clear(&mut self) {
        self.block_size = None;
        self.num_fragments = 0;
        self.received.clear();
        self.received_count = 0;
        self.buffer.clear();
        self.error = None;
        self.info = None;
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<DataBlockError> {
        self.error
    }

    pub fn block(&self) -> Option<&[u8]> {
        let block_size = self.block_size?;
        if self.num_fragments > 0 && self.received_count == self.num_fragments {
            Some(&self.buffer[..block_size])
        } else {
            None
        }
    }

    /// Accepts one fragment. Returns the fragment id to ack, for duplicates
    /// too; validation failures latch an error and the receiver goes inert.
    pub fn process_fragment(
        &mut self,
        block_size: u32,
        num_fragments: u32,
        fragment_id: u32,
        fragment_bytes: u32,
        fragment_data: &[u8],
    ) -> Result<u32, DataBlockError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if fragment_data.len() != fragment_bytes as usize {
            return Err(self.latch(DataBlockError::InvalidFragmentSize));
        }

        let block_size = block_size as usize;
        let num_fragments = num_fragments as usize;

        match self.block_size {
            None => {
                if block_size == 0 {
                    return Err(self.latch(DataBlockError::InvalidBlockSize));
                }
                if block_size > self.max_block_size {
                    return Err(self.latch(DataBlockError::BlockTooLarge));
                }
                if num_fragments != num_fragments_for(block_size, self.fragment_size) {
                    return Err(self.latch(DataBlockError::InconsistentFragmentCount));
                }
                self.block_size = Some(block_size);
                self.num_fragments = num_fragments;
                self.received = vec![false; num_fragments];
                self.buffer = vec![0u8; block_size];
            }
            Some(pinned) => {
                if block_size != pinned {
                    return Err(self.latch(DataBlockError::InconsistentBlockSize));
                }
                if num_fragments != self.num_fragments {
                    return Err(self.latch(DataBlockError::InconsistentFragmentCount));
                }
            }
        }

        let fragment_id = fragment_id as usize;
        if fragment_id >= self.num_fragments {
            return Err(self.latch(DataBlockError::InvalidFragmentId));
        }

        let expected_bytes = if fragment_id == self.num_fragments - 1 {
            self.block_size.unwrap() - (self.num_fragments - 1) * self.fragment_size
        } else {
            self.fragment_size
        };
        if fragment_bytes as usize != expected_bytes {
            return Err(self.latch(DataBlockError::InvalidFragmentSize));
        }

        // duplicates re-ack without copying
        if !self.received[fragment_id] {
            let begin = fragment_id * self.fragment_size;
            self.buffer[begin..begin + expected_bytes].copy_from_slice(fragment_data);
            self.received[fragment_id] = true;
            self.received_count += 1;
        }

        Ok(fragment_id as u32)
    }

    fn latch(&mut self, error: DataBlockError) -> DataBlockError {
        log::warn!("data block receive failed: {:?}", error);
        self.error = Some(error);
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{NetworkSimulator, SimulatorConfig};

    fn test_block(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    fn feed(
        receiver: &mut DataBlockReceiver,
        sender_block: &[u8],
        fragment_size: usize,
        fragment_id: usize,
    ) -> Result<u32, DataBlockError> {
        let num_fragments = num_fragments_for(sender_block.len(), fragment_size);
        let begin = fragment_id * fragment_size;
        let end = (begin + fragment_size).min(sender_block.len());
        receiver.process_fragment(
            sender_block.len() as u32,
            num_fragments as u32,
            fragment_id as u32,
            (end - begin) as u32,
            &sender_block[begin..end],
        )
    }

    #[test]
    fn test_reassembly_in_order() {
        let data = test_block(10000);
        let mut receiver = DataBlockReceiver::new(1024, 65536);
        for id in 0..10 {
            assert_eq!(feed(&mut receiver, &data, 1024, id), Ok(id as u32));
        }
        assert_eq!(receiver.block(), Some(&data[..]));
        assert!(!receiver.is_error());
    }

    #[test]
    fn test_reassembly_out_of_order_with_duplicates() {
        let data = test_block(5000);
        let mut receiver = DataBlockReceiver::new(1024, 65536);
        for id in [4usize, 1, 0, 1, 3, 2, 4] {
            assert_eq!(feed(&mut receiver, &data, 1024, id), Ok(id as u32));
        }
        assert_eq!(receiver.block(), Some(&data[..]));
    }

    #[test]
    fn test_block_too_large() {
        let data = test_block(3000);
        let mut receiver = DataBlockReceiver::new(1024, 2048);
        assert_eq!(
            feed(&mut receiver, &data, 1024, 0),
            Err(DataBlockError::BlockTooLarge)
        );
        assert!(receiver.is_error());
        // latched: even a fragment that would otherwise be fine is refused
        assert!(feed(&mut receiver, &data, 1024, 1).is_err());
    }

    #[test]
    fn test_short_non_last_fragment_rejected() {
        let mut receiver = DataBlockReceiver::new(1024, 65536);
        let short = vec![0u8; 100];
        assert_eq!(
            receiver.process_fragment(5000, 5, 0, 100, &short),
            Err(DataBlockError::InvalidFragmentSize)
        );
    }

    #[test]
    fn test_short_last_fragment_accepted() {
        let data = test_block(2500);
        let mut receiver = DataBlockReceiver::new(1024, 65536);
        assert_eq!(feed(&mut receiver, &data, 1024, 2), Ok(2));
        assert!(!receiver.is_error());
    }

    #[test]
    fn test_inconsistent_metadata_rejected() {
        let data = test_block(5000);
        let mut receiver = DataBlockReceiver::new(1024, 65536);
        feed(&mut receiver, &data, 1024, 0).unwrap();
        let fragment = vec![0u8; 1024];
        assert_eq!(
            receiver.process_fragment(6000, 5, 1, 1024, &fragment),
            Err(DataBlockError::InconsistentBlockSize)
        );
    }

    #[test]
    fn test_fragment_count_must_match_block_size() {
        let mut receiver = DataBlockReceiver::new(1024, 65536);
        let fragment = vec![0u8; 1024];
        assert_eq!(
            receiver.process_fragment(5000, 3, 0, 1024, &fragment),
            Err(DataBlockError::InconsistentFragmentCount)
        );
    }

    #[test]
    fn test_sender_round_robin_and_completion() {
        let block = Rc::new(Block::new(test_block(2500)));
        let mut sender = DataBlockSender::new(Rc::clone(&block), 1024, 60.0);
        assert_eq!(sender.num_fragments(), 3);

        let info = SessionInfo {
            address: "[::1]:2000".parse().unwrap(),
            client_guid: 1,
            server_guid: 2,
        };
        sender.set_info(info);

        let simulator = NetworkSimulator::new(SimulatorConfig::default());
        let mut network = simulator.endpoint::<Packet>("[::1]:1000".parse().unwrap());
        let mut sink = simulator.endpoint::<Packet>("[::1]:2000".parse().unwrap());

        let mut time = TimeBase {
            time: 0.0,
            delta_time: 1.0 / 60.0,
        };

        let mut receiver = DataBlockReceiver::new(1024, 65536);
        for _ in 0..600 {
            time.time += time.delta_time;
            sender.update(&time, &mut network);
            sink.update(&time);
            while let Some((_, packet)) = sink.receive_packet() {
                if let Packet::DataBlockFragment {
                    block_size,
                    num_fragments,
                    fragment_id,
                    fragment_bytes,
                    fragment_data,
                    ..
                } = packet
                {
                    let ack = receiver
                        .process_fragment(
                            block_size,
                            num_fragments,
                            fragment_id,
                            fragment_bytes,
                            &fragment_data,
                        )
                        .unwrap();
                    sender.process_ack(ack);
                }
            }
            if sender.send_completed() {
                break;
            }
        }

        assert!(sender.send_completed());
        assert_eq!(receiver.block(), Some(block.bytes()));
    }

    #[test]
    fn test_duplicate_ack_is_idempotent() {
        let block = Rc::new(Block::new(test_block(2500)));
        let mut sender = DataBlockSender::new(block, 1024, 60.0);
        sender.process_ack(0);
        sender.process_ack(0);
        sender.process_ack(99);
        assert_eq!(sender.acked_count(), 1);
        assert!(!sender.send_completed());
    }
}
