//! Bounded inbound message buffer
//!
//! Appends never block and never drop the newest arrival: when the buffer
//! grows past its bound the oldest messages are evicted first.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::models::MqttMessage;

/// Thread-safe FIFO with a drop-oldest overflow policy
#[derive(Debug)]
pub struct MessageQueue {
    buffer: Mutex<VecDeque<MqttMessage>>,
    max_size: NonZeroUsize,
}

impl MessageQueue {
    pub fn new(max_size: NonZeroUsize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            max_size,
        }
    }

    pub fn max_size(&self) -> NonZeroUsize {
        self.max_size
    }

    /// Append a message, returning how many old messages were evicted
    pub fn push(&self, message: MqttMessage) -> usize {
        let mut buffer = self.lock();
        buffer.push_back(message);

        let overflow = buffer.len().saturating_sub(self.max_size.get());
        buffer.drain(..overflow);
        overflow
    }

    /// Take every buffered message in arrival order, leaving the buffer empty
    pub fn drain(&self) -> Vec<MqttMessage> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // No code runs under this lock that can panic halfway through a
    // mutation, so a poisoned buffer is still consistent.
    fn lock(&self) -> MutexGuard<'_, VecDeque<MqttMessage>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QoS;
    use std::sync::Arc;
    use std::thread;

    fn message(topic: &str) -> MqttMessage {
        MqttMessage::new(topic.to_string(), topic.to_string(), QoS::ExactlyOnce, false)
    }

    fn queue(bound: usize) -> MessageQueue {
        MessageQueue::new(NonZeroUsize::new(bound).unwrap())
    }

    #[test]
    fn test_drain_returns_arrival_order_then_empty() {
        let queue = queue(10);
        for i in 0..3 {
            queue.push(message(&format!("t{i}")));
        }

        let topics: Vec<_> = queue.drain().iter().map(|m| m.topic().to_string()).collect();
        assert_eq!(topics, ["t0", "t1", "t2"]);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let queue = queue(5);
        let mut evicted = 0;
        for i in 0..10 {
            evicted += queue.push(message(&format!("t{i}")));
        }

        assert_eq!(evicted, 5);
        let topics: Vec<_> = queue.drain().iter().map(|m| m.topic().to_string()).collect();
        assert_eq!(topics, ["t5", "t6", "t7", "t8", "t9"]);
    }

    #[test]
    fn test_bound_of_one_keeps_newest() {
        let queue = queue(1);
        assert_eq!(queue.push(message("a")), 0);
        assert_eq!(queue.push(message("b")), 1);

        let drained = queue.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].topic(), "b");
    }

    #[test]
    fn test_len_tracks_contents() {
        let queue = queue(3);
        assert!(queue.is_empty());
        queue.push(message("a"));
        queue.push(message("b"));
        assert_eq!(queue.len(), 2);
        queue.drain();
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_concurrent_push_and_drain_never_exceeds_bound() {
        let queue = Arc::new(queue(50));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..500 {
                        queue.push(message(&format!("p{p}/{i}")));
                    }
                })
            })
            .collect();

        let mut drained = 0;
        for _ in 0..100 {
            let batch = queue.drain();
            assert!(batch.len() <= 50);
            drained += batch.len();
        }

        for producer in producers {
            producer.join().unwrap();
        }
        drained += queue.drain().len();
        assert!(drained <= 2000);
        assert!(queue.is_empty());
    }
}
