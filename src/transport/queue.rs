//! Bounded inbound event queue that evicts audio before anything else.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::transport::InboundEvent;

struct QueueInner {
    events: VecDeque<InboundEvent>,
    closed: bool,
    evicted_audio: u64,
}

/// Single-producer, single-consumer event queue.
///
/// When full, the oldest `AudioChunk` is evicted to make room. Control events
/// are never dropped, so the queue may exceed its capacity while it holds
/// nothing but control events. An `Interrupted` event purges every pending
/// audio chunk ahead of it, since those would be cut on arrival anyway.
pub(crate) struct InboundQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
}

impl InboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                events: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
                evicted_audio: 0,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Pushes an event. Returns the running eviction count if audio had to be
    /// dropped to make room.
    pub fn push(&self, event: InboundEvent) -> Option<u64> {
        let evicted = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return None;
            }

            if matches!(event, InboundEvent::Interrupted) {
                inner.events.retain(|e| !e.is_audio());
            }

            let mut evicted = false;
            if inner.events.len() >= self.capacity {
                if let Some(index) = inner.events.iter().position(InboundEvent::is_audio) {
                    inner.events.remove(index);
                    evicted = true;
                } else if event.is_audio() {
                    // Only control events queued; the new chunk is the oldest audio.
                    inner.evicted_audio += 1;
                    return Some(inner.evicted_audio);
                }
            }
            inner.events.push_back(event);

            if evicted {
                inner.evicted_audio += 1;
                Some(inner.evicted_audio)
            } else {
                None
            }
        };
        self.notify.notify_one();
        evicted
    }

    /// Stops accepting events. Already queued events are still delivered.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_one();
    }

    /// Removes the next event without waiting.
    pub fn try_recv(&self) -> Option<InboundEvent> {
        self.inner.lock().events.pop_front()
    }

    /// Waits for the next event. Returns `None` once closed and drained.
    pub async fn recv(&self) -> Option<InboundEvent> {
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(event) = inner.events.pop_front() {
                    return Some(event);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn evicted_audio(&self) -> u64 {
        self.inner.lock().evicted_audio
    }
}
