use std::any::Any;
use std::collections::VecDeque;

use thiserror::Error;

use crate::protocol::TimeBase;
use crate::serialize::{ReadStream, Stream, StreamError, WriteStream};
use crate::window::SlidingWindow;

pub const MAX_CHANNELS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("channel send queue full")]
    SendQueueFull = 1,
    #[error("message larger than channel limit")]
    MessageTooLarge = 2,
    #[error("malformed channel packet data")]
    BadPacketData = 3,
}

/// One channel of a connection. Each send tick the channel contributes a
/// data blob to the connection packet; each received connection packet
/// hands the matching blob back.
pub trait Channel {
    fn update(&mut self, time: &TimeBase);

    fn write_packet_data(&mut self) -> Result<Vec<u8>, ChannelError>;

    fn read_packet_data(&mut self, data: &[u8]) -> Result<(), ChannelError>;

    /// Latched local failure, mapped into the client error taxonomy by the
    /// owning state machine.
    fn error(&self) -> Option<ChannelError>;

    fn reset(&mut self);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Describes the channels a connection transports. Borrowed at connection
/// construction; the messages themselves are opaque bytes.
pub trait ChannelStructure {
    fn num_channels(&self) -> usize;

    fn create_channel(&self, channel_index: usize) -> Box<dyn Channel>;
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub send_window_size: usize,
    pub receive_queue_size: usize,
    pub max_message_size: usize,
    pub max_messages_per_packet: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            send_window_size: 256,
            receive_queue_size: 1024,
            max_message_size: 256,
            max_messages_per_packet: 8,
        }
    }
}

/// Reliable-ordered byte messages over unreliable connection packets. Every
/// packet carries the whole unacked suffix of the send window plus a
/// cumulative ack of received messages, so any single delivered packet
/// catches the peer up completely.
pub struct MessageChannel {
    config: ChannelConfig,
    send_window: SlidingWindow<Vec<u8>>,
    receive_queue: VecDeque<Vec<u8>>,
    next_receive_sequence: u16,
    error: Option<ChannelError>,
}

impl MessageChannel {
    pub fn new(config: ChannelConfig) -> Self {
        let send_window = SlidingWindow::new(config.send_window_size);
        Self {
            config,
            send_window,
            receive_queue: VecDeque::new(),
            next_receive_sequence: 0,
            error: None,
        }
    }

    pub fn send_message(&mut self, message: Vec<u8>) -> Result<(), ChannelError> {
        if message.len() > self.config.max_message_size {
            return Err(ChannelError::MessageTooLarge);
        }
        if self.send_window.insert(message).is_err() {
            self.error = Some(ChannelError::SendQueueFull);
            return Err(ChannelError::SendQueueFull);
        }
        Ok(())
    }

    pub fn receive_message(&mut self) -> Option<Vec<u8>> {
        self.receive_queue.pop_front()
    }

    pub fn num_pending_sends(&self) -> usize {
        self.send_window.len()
    }

    fn packet_data_capacity(&self) -> usize {
        self.config.max_messages_per_packet * (self.config.max_message_size + 4) + 16
    }
}

impl Channel for MessageChannel {
    fn update(&mut self, _time: &TimeBase) {}

    fn write_packet_data(&mut self) -> Result<Vec<u8>, ChannelError> {
        let mut stream = WriteStream::new(self.packet_data_capacity());

        let mut ack = self.next_receive_sequence.wrapping_sub(1);
        let mut first_sequence = self.send_window.first_sequence();
        let num_messages = self
            .send_window
            .len()
            .min(self.config.max_messages_per_packet);
        let mut num = num_messages as u32;

        let result = (|| -> Result<(), StreamError> {
            stream.serialize_u16(&mut ack)?;
            stream.serialize_u16(&mut first_sequence)?;
            stream.serialize_uint(&mut num, self.config.max_messages_per_packet as u32)?;
            for message in self.send_window.iter().take(num_messages) {
                let mut length = message.len() as u32;
                stream.serialize_uint(&mut length, self.config.max_message_size as u32)?;
                let mut bytes = message.clone();
                stream.serialize_bytes(&mut bytes)?;
            }
            Ok(())
        })();
        result.map_err(|_| ChannelError::BadPacketData)?;

        stream.finish().map_err(|_| ChannelError::BadPacketData)
    }

    fn read_packet_data(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        let mut stream = ReadStream::new(data);

        let mut ack = 0u16;
        let mut first_sequence = 0u16;
        let mut num = 0u32;

        stream
            .serialize_u16(&mut ack)
            .map_err(|_| ChannelError::BadPacketData)?;
        stream
            .serialize_u16(&mut first_sequence)
            .map_err(|_| ChannelError::BadPacketData)?;
        stream
            .serialize_uint(&mut num, self.config.max_messages_per_packet as u32)
            .map_err(|_| ChannelError::BadPacketData)?;

        self.send_window.ack(ack);

        for i in 0..num {
            let mut length = 0u32;
            stream
                .serialize_uint(&mut length, self.config.max_message_size as u32)
                .map_err(|_| ChannelError::BadPacketData)?;
            let mut message = vec![0u8; length as usize];
            stream
                .serialize_bytes(&mut message)
                .map_err(|_| ChannelError::BadPacketData)?;

            let sequence = first_sequence.wrapping_add(i as u16);
            if sequence == self.next_receive_sequence
                && self.receive_queue.len() < self.config.receive_queue_size
            {
                self.next_receive_sequence = self.next_receive_sequence.wrapping_add(1);
                self.receive_queue.push_back(message);
            }
        }

        Ok(())
    }

    fn error(&self) -> Option<ChannelError> {
        self.error
    }

    fn reset(&mut self) {
        self.send_window.reset();
        self.receive_queue.clear();
        self.next_receive_sequence = 0;
        self.error = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub struct MessageChannelStructure {
    config: ChannelConfig,
}

impl MessageChannelStructure {
    pub fn new(config: ChannelConfig) -> Self {
        Self { config }
    }
}

impl Default for MessageChannelStructure {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}

impl ChannelStructure for MessageChannelStructure {
    fn num_channels(&self) -> usize {
        1
    }

    fn create_channel(&self, _channel_index: usize) -> Box<dyn Channel> {
        Box::new(MessageChannel::new(self.config.clone()))
    }
}
