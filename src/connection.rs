use crate::channel::{Channel, ChannelError, ChannelStructure, MAX_CHANNELS};
use crate::protocol::{TimeBase, MAX_PACKET_SIZE};
use crate::serialize::{Stream, StreamError};

/// Payload of a `Packet::Connection`: one data blob per channel, plus a
/// packet sequence for diagnostics. Channel blobs are opaque here; the
/// channels themselves define their contents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionPacket {
    pub sequence: u16,
    pub channel_data: Vec<Vec<u8>>,
}

impl ConnectionPacket {
    pub(crate) fn serialize_fields<S: Stream>(&mut self, stream: &mut S) -> Result<(), StreamError> {
        stream.serialize_u16(&mut self.sequence)?;

        let mut num_channels = self.channel_data.len() as u32;
        stream.serialize_uint(&mut num_channels, MAX_CHANNELS as u32)?;
        if S::IS_READING {
            self.channel_data = vec![Vec::new(); num_channels as usize];
        }

        for data in &mut self.channel_data {
            let mut length = data.len() as u32;
            stream.serialize_uint(&mut length, MAX_PACKET_SIZE as u32)?;
            if S::IS_READING {
                data.resize(length as usize, 0);
            }
            stream.serialize_bytes(data)?;
        }
        Ok(())
    }
}

/// Carries application messages over unreliable packets: produces one
/// connection packet per send tick and consumes one per receive.
pub struct Connection {
    channels: Vec<Box<dyn Channel>>,
    sequence: u16,
    packets_read: u64,
    packets_written: u64,
}

impl Connection {
    pub fn new(structure: &dyn ChannelStructure) -> Self {
        let num_channels = structure.num_channels();
        assert!(num_channels > 0 && num_channels <= MAX_CHANNELS);
        let channels = (0..num_channels)
            .map(|index| structure.create_channel(index))
            .collect();
        Self {
            channels,
            sequence: 0,
            packets_read: 0,
            packets_written: 0,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, channel_index: usize) -> &dyn Channel {
        self.channels[channel_index].as_ref()
    }

    pub fn channel_mut(&mut self, channel_index: usize) -> &mut dyn Channel {
        self.channels[channel_index].as_mut()
    }

    pub fn update(&mut self, time: &TimeBase) {
        for channel in &mut self.channels {
            channel.update(time);
        }
    }

    /// First latched channel error, if any.
    pub fn error(&self) -> Option<ChannelError> {
        self.channels.iter().find_map(|channel| channel.error())
    }

    pub fn write_packet(&mut self) -> Result<ConnectionPacket, ChannelError> {
        let mut channel_data = Vec::with_capacity(self.channels.len());
        for channel in &mut self.channels {
            channel_data.push(channel.write_packet_data()?);
        }
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        self.packets_written += 1;
        Ok(ConnectionPacket {
            sequence,
            channel_data,
        })
    }

    /// Feeds one received connection packet to the channels. Returns false
    /// for packets that do not match the channel layout or fail to parse;
    /// those are dropped without surfacing an error.
    pub fn read_packet(&mut self, packet: &ConnectionPacket) -> bool {
        if packet.channel_data.len() != self.channels.len() {
            return false;
        }
        let mut ok = true;
        for (channel, data) in self.channels.iter_mut().zip(&packet.channel_data) {
            if channel.read_packet_data(data).is_err() {
                ok = false;
            }
        }
        if ok {
            self.packets_read += 1;
        }
        ok
    }

    pub fn packets_read(&self) -> u64 {
        self.packets_read
    }

    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    pub fn reset(&mut self) {
        self.sequence = 0;
        self.packets_read = 0;
        self.packets_written = 0;
        for channel in &mut self.channels {
            channel.reset();
        }
    }
}
