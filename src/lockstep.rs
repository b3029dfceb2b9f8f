use std::collections::VecDeque;
use std::fmt::Debug;

use crate::protocol::sequence_greater_than;
use crate::serialize::{ReadStream, Stream, StreamError, WirePacket, WriteStream};
use crate::window::SlidingWindow;

pub const MAX_INPUTS: usize = 256;

const FRAME_TIME: f64 = 1.0 / 60.0;

/// Per-frame input carried by the lockstep pipeline. Serialization must be
/// symmetric: the same field sequence in both directions.
pub trait LockstepInput: Copy + Default + PartialEq + Debug {
    fn serialize<S: Stream>(&mut self, stream: &mut S) -> Result<(), StreamError>;
}

#[derive(Debug, Clone)]
pub struct LockstepConfig {
    pub left_port: u16,
    pub right_port: u16,
    pub max_packet_size: usize,
    pub max_inputs: usize,
    pub playout_delay_buffer_size: usize,
    pub max_sim_frames: usize,
    pub playout_delay: f64,
    pub latency: f64,
    pub packet_loss: f64,
    pub jitter: f64,
}

impl LockstepConfig {
    /// TCP-equivalent transport: reliable-ordered delivery, mild conditions.
    pub fn tcp() -> Self {
        Self {
            left_port: 1000,
            right_port: 1001,
            max_packet_size: 1024,
            max_inputs: MAX_INPUTS,
            playout_delay_buffer_size: 1024,
            max_sim_frames: 4,
            playout_delay: 0.25,
            latency: 0.05,
            packet_loss: 1.0,
            jitter: 1.0 / 60.0,
        }
    }

    /// Raw UDP transport: harsher conditions, acks required.
    pub fn udp() -> Self {
        Self {
            latency: 0.1,
            packet_loss: 5.0,
            jitter: 2.0 / 60.0,
            ..Self::tcp()
        }
    }
}

impl Default for LockstepConfig {
    fn default() -> Self {
        Self::tcp()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LockstepPacket<I> {
    /// Entire unacked input suffix; `sequence` is one past the last input.
    Input { sequence: u16, inputs: Vec<I> },
    Ack { ack: u16 },
}

impl<I: LockstepInput> LockstepPacket<I> {
    fn serialize_fields<S: Stream>(&mut self, stream: &mut S) -> Result<(), StreamError> {
        match self {
            LockstepPacket::Input { sequence, inputs } => {
                stream.serialize_u16(sequence)?;

                let mut num_inputs = inputs.len() as u32;
                stream.serialize_uint(&mut num_inputs, MAX_INPUTS as u32)?;
                if S::IS_READING {
                    inputs.resize(num_inputs as usize, I::default());
                }

                if num_inputs >= 1 {
                    inputs[0].serialize(stream)?;
                    // delta encoding: unchanged inputs cost a single bit
                    for i in 1..num_inputs as usize {
                        let mut changed = S::IS_WRITING && inputs[i] != inputs[i - 1];
                        stream.serialize_bool(&mut changed)?;
                        if changed {
                            inputs[i].serialize(stream)?;
                        } else if S::IS_READING {
                            let previous = inputs[i - 1];
                            inputs[i] = previous;
                        }
                    }
                }
                Ok(())
            }
            LockstepPacket::Ack { ack } => stream.serialize_u16(ack),
        }
    }
}

impl<I: LockstepInput> WirePacket for LockstepPacket<I> {
    fn write_to(&mut self, stream: &mut WriteStream) -> Result<(), StreamError> {
        let mut kind = match self {
            LockstepPacket::Input { .. } => 0u32,
            LockstepPacket::Ack { .. } => 1u32,
        };
        stream.serialize_uint(&mut kind, 1)?;
        self.serialize_fields(stream)
    }

    fn read_from(stream: &mut ReadStream<'_>) -> Result<Self, StreamError> {
        let mut kind = 0u32;
        stream.serialize_uint(&mut kind, 1)?;
        let mut packet = match kind {
            0 => LockstepPacket::Input {
                sequence: 0,
                inputs: Vec::new(),
            },
            _ => LockstepPacket::Ack { ack: 0 },
        };
        packet.serialize_fields(stream)?;
        Ok(packet)
    }
}

/// Sender half of the pipeline: a sliding window of local inputs with
/// cumulative retransmission. The cumulative ack keeps the window drained;
/// overrunning it is a defect, not a recoverable condition.
pub struct InputSender<I> {
    window: SlidingWindow<I>,
}

impl<I: LockstepInput> InputSender<I> {
    pub fn new(max_inputs: usize) -> Self {
        Self {
            window: SlidingWindow::new(max_inputs),
        }
    }

    /// Inserts this frame's input and builds the packet carrying the whole
    /// unacked suffix.
    pub fn add_input(&mut self, input: I) -> LockstepPacket<I> {
        self.window
            .insert(input)
            .expect("input sliding window full");
        LockstepPacket::Input {
            sequence: self.window.sequence(),
            inputs: self.window.iter().copied().collect(),
        }
    }

    pub fn process_ack(&mut self, ack: u16) {
        self.window.ack(ack);
    }

    /// TCP-equivalent transports deliver reliably, so the window self-acks
    /// right after sending instead of waiting for an ack packet.
    pub fn self_ack(&mut self) {
        let sequence = self.window.sequence();
        self.window.ack(sequence);
    }

    pub fn num_pending(&self) -> usize {
        self.window.len()
    }

    pub fn reset(&mut self) {
        self.window.reset();
    }
}

/// Receiver half: aggregates the tick's best ack and feeds the playout
/// delay buffer.
pub struct InputReceiver<I> {
    playout: PlayoutDelayBuffer<I>,
    received_this_tick: bool,
    ack_sequence: u16,
}

impl<I: LockstepInput> InputReceiver<I> {
    pub fn new(config: &LockstepConfig) -> Self {
        Self {
            playout: PlayoutDelayBuffer::new(
                config.playout_delay_buffer_size,
                config.playout_delay,
                config.max_sim_frames,
            ),
            received_this_tick: false,
            ack_sequence: 0,
        }
    }

    pub fn process_input_packet(&mut self, time: f64, sequence: u16, inputs: &[I]) {
        let ack = sequence.wrapping_sub(1);
        if !self.received_this_tick {
            self.received_this_tick = true;
            self.ack_sequence = ack;
        } else if sequence_greater_than(ack, self.ack_sequence) {
            self.ack_sequence = ack;
        }
        self.playout.add_inputs(time, sequence, inputs);
    }

    /// Ack to send back this tick, if any input packets arrived. Not used
    /// on TCP-equivalent transports.
    pub fn take_ack(&mut self) -> Option<u16> {
        if self.received_this_tick {
            self.received_this_tick = false;
            Some(self.ack_sequence)
        } else {
            None
        }
    }

    /// Pops up to `max_sim_frames` inputs due for simulation at `time`.
    pub fn frames(&mut self, time: f64, out: &mut Vec<I>) {
        self.playout.frames(time, out);
    }

    pub fn frame(&self) -> u64 {
        self.playout.frame()
    }

    pub fn reset(&mut self) {
        self.playout.reset();
        self.received_this_tick = false;
        self.ack_sequence = 0;
    }
}

/// FIFO of contiguous inputs behind a fixed playout delay. Only the next
/// expected sequence is accepted from each incoming batch, which makes
/// accumulation duplicate-free and gap-free no matter how the transport
/// reorders or repeats packets.
pub struct PlayoutDelayBuffer<I> {
    queue: VecDeque<I>,
    capacity: usize,
    playout_delay: f64,
    max_sim_frames: usize,
    stopped: bool,
    start_time: f64,
    most_recent_input: u16,
    frame: u64,
}

impl<I: LockstepInput> PlayoutDelayBuffer<I> {
    pub fn new(capacity: usize, playout_delay: f64, max_sim_frames: usize) -> Self {
        assert!(capacity > 0);
        assert!(max_sim_frames > 0);
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            playout_delay,
            max_sim_frames,
            stopped: true,
            start_time: 0.0,
            most_recent_input: 0,
            frame: 0,
        }
    }

    pub fn add_inputs(&mut self, time: f64, sequence: u16, inputs: &[I]) {
        if inputs.is_empty() {
            return;
        }
        if self.stopped {
            self.start_time = time;
            self.stopped = false;
        }

        let first_input_sequence = sequence.wrapping_sub(inputs.len() as u16);
        for (i, input) in inputs.iter().enumerate() {
            let input_sequence = first_input_sequence.wrapping_add(i as u16);
            if input_sequence == self.most_recent_input && self.queue.len() < self.capacity {
                self.most_recent_input = input_sequence.wrapping_add(1);
                self.queue.push_back(*input);
            }
        }
    }

    pub fn frames(&mut self, time: f64, out: &mut Vec<I>) {
        out.clear();
        if self.stopped {
            return;
        }
        for _ in 0..self.max_sim_frames {
            // frames play out at their midpoints, one playout delay late
            let frame_time =
                self.start_time + (self.frame as f64 + 0.5) * FRAME_TIME + self.playout_delay;
            if time < frame_time {
                break;
            }
            let Some(input) = self.queue.pop_front() else {
                break;
            };
            out.push(input);
            self.frame += 1;
        }
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn reset(&mut self) {
        self.queue.clear();
        self.stopped = true;
        self.start_time = 0.0;
        self.most_recent_input = 0;
        self.frame = 0;
    }
}
