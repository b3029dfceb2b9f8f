use thiserror::Error;

use crate::protocol::sequence_greater_than;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sliding window full")]
pub struct WindowFull;

/// Bounded suffix of produced items pending cumulative ack. Sequence numbers
/// are 16-bit and wrap; `first_sequence <= sequence <= first_sequence + capacity`
/// holds at all times under wrap arithmetic.
#[derive(Debug)]
pub struct SlidingWindow<T> {
    entries: Vec<Option<T>>,
    first_sequence: u16,
    sequence: u16,
}

impl<T: Clone> SlidingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0 && capacity <= 0x8000);
        Self {
            entries: vec![None; capacity],
            first_sequence: 0,
            sequence: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.sequence.wrapping_sub(self.first_sequence) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.sequence == self.first_sequence
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.entries.len()
    }

    /// Next sequence number to be assigned by `insert`.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn first_sequence(&self) -> u16 {
        self.first_sequence
    }

    pub fn insert(&mut self, value: T) -> Result<(), WindowFull> {
        if self.is_full() {
            return Err(WindowFull);
        }
        let index = self.sequence as usize % self.entries.len();
        self.entries[index] = Some(value);
        self.sequence = self.sequence.wrapping_add(1);
        Ok(())
    }

    /// Cumulative ack: frees every entry up to and including `ack`. Duplicate
    /// and stale acks are ignored; an ack beyond the last produced sequence
    /// clamps at it, so the window can empty but never go negative.
    pub fn ack(&mut self, ack: u16) {
        let mut target = ack.wrapping_add(1);
        if !sequence_greater_than(target, self.first_sequence) {
            return;
        }
        if sequence_greater_than(target, self.sequence) {
            target = self.sequence;
        }
        while self.first_sequence != target {
            let index = self.first_sequence as usize % self.entries.len();
            self.entries[index] = None;
            self.first_sequence = self.first_sequence.wrapping_add(1);
        }
    }

    /// Unacked suffix in sequence order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let capacity = self.entries.len();
        let first = self.first_sequence;
        (0..self.len()).map(move |i| {
            let sequence = first.wrapping_add(i as u16);
            self.entries[sequence as usize % capacity]
                .as_ref()
                .expect("unacked window entry present")
        })
    }

    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            *entry = None;
        }
        self.first_sequence = 0;
        self.sequence = 0;
    }
}
