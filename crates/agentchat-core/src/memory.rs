//! Chat Memory
//!
//! Bounded, ordered log of conversation turns. Each agent owns exactly one
//! buffer; nothing is shared, so no locking is needed.

use std::collections::VecDeque;

use uuid::Uuid;

use crate::message::Message;

/// Default number of turns retained by [`BufferMemory`]
pub const DEFAULT_CAPACITY: usize = 20;

/// Interface for the model context, short or long term.
///
/// `add` and `get` are the required surface; `id` exists for stores that
/// persist, summarize, or otherwise address a conversation.
pub trait ChatMemory: Send + Sync {
    /// Stable identifier for this conversation's memory
    fn id(&self) -> &str;

    /// Append a turn to the tail
    fn add(&mut self, message: Message);

    /// Ordered view, most-recent-last. `limit` keeps only the most recent N.
    fn get(&self, limit: Option<usize>) -> Vec<Message>;

    /// The most recent turn, if any
    fn last(&self) -> Option<&Message>;

    /// Number of stored turns
    fn len(&self) -> usize;

    /// Check if empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory FIFO buffer bounded by a fixed capacity.
///
/// When an `add` pushes the buffer past capacity, the oldest turns are
/// evicted from the head until capacity is respected. Eviction is silent:
/// bounded memory, not correctness.
#[derive(Clone, Debug)]
pub struct BufferMemory {
    id: String,
    capacity: usize,
    messages: VecDeque<Message>,
}

impl BufferMemory {
    /// Create a buffer retaining at most `capacity` turns (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            capacity: capacity.max(1),
            messages: VecDeque::new(),
        }
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for BufferMemory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChatMemory for BufferMemory {
    fn id(&self) -> &str {
        &self.id
    }

    fn add(&mut self, message: Message) {
        self.messages.push_back(message);
        while self.messages.len() > self.capacity {
            self.messages.pop_front();
        }
    }

    fn get(&self, limit: Option<usize>) -> Vec<Message> {
        let skip = match limit {
            Some(n) => self.messages.len().saturating_sub(n),
            None => 0,
        };
        self.messages.iter().skip(skip).cloned().collect()
    }

    fn last(&self) -> Option<&Message> {
        self.messages.back()
    }

    fn len(&self) -> usize {
        self.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(i: usize) -> Message {
        Message::user(format!("turn-{i}"))
    }

    #[test]
    fn test_add_and_get_order() {
        let mut memory = BufferMemory::new(5);
        memory.add(turn(1));
        memory.add(turn(2));
        memory.add(turn(3));

        let view = memory.get(None);
        assert_eq!(view.len(), 3);
        assert_eq!(view[0].content, "turn-1");
        assert_eq!(view[2].content, "turn-3");
        assert_eq!(memory.last().unwrap().content, "turn-3");
    }

    #[test]
    fn test_eviction_keeps_last_capacity_turns() {
        let capacity = 3;
        let mut memory = BufferMemory::new(capacity);
        for i in 0..capacity + 4 {
            memory.add(turn(i));
        }

        let view = memory.get(None);
        assert_eq!(view.len(), capacity);
        // oldest evicted first, relative order preserved
        assert_eq!(view[0].content, "turn-4");
        assert_eq!(view[1].content, "turn-5");
        assert_eq!(view[2].content, "turn-6");
    }

    #[test]
    fn test_get_with_limit() {
        let mut memory = BufferMemory::new(10);
        for i in 0..5 {
            memory.add(turn(i));
        }

        let view = memory.get(Some(2));
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].content, "turn-3");
        assert_eq!(view[1].content, "turn-4");

        // limit larger than contents returns everything
        assert_eq!(memory.get(Some(100)).len(), 5);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut memory = BufferMemory::new(0);
        memory.add(turn(1));
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn test_buffer_id_assigned() {
        let memory = BufferMemory::default();
        assert!(!memory.id().is_empty());
        assert_eq!(memory.capacity(), DEFAULT_CAPACITY);
    }
}
