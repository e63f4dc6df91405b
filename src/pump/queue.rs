//! Bounded payload queues.
//!
//! Both directions of UDP payloads go through a [`PayloadQueue`]. The two
//! directions treat a full queue differently:
//! - downlink uses [`PayloadQueue::push`], evicting the oldest payload so
//!   fresh telemetry wins over stale
//! - uplink uses [`PayloadQueue::try_push`], refusing the newest payload so
//!   ground commands are never reordered
//!
//! Alerts go to the front with [`PayloadQueue::push_front_urgent`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::Notify;

use crate::protocol::FixedRing;

#[derive(Debug)]
struct Shared {
    ring: Mutex<FixedRing<Bytes>>,
    notify: Notify,
}

/// Bounded queue of whole UDP payloads.
///
/// Cloning shares the same queue.
#[derive(Debug, Clone)]
pub struct PayloadQueue {
    shared: Arc<Shared>,
}

impl PayloadQueue {
    /// # Panics
    ///
    /// Panics if `depth` is zero.
    pub fn new(depth: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                ring: Mutex::new(FixedRing::with_capacity(depth)),
                notify: Notify::new(),
            }),
        }
    }

    fn ring(&self) -> MutexGuard<'_, FixedRing<Bytes>> {
        self.shared.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a payload. Returns the evicted payload if the queue was full.
    pub fn push(&self, payload: Bytes) -> Option<Bytes> {
        let evicted = self.ring().force_enqueue(payload);
        if let Some(old) = &evicted {
            tracing::warn!("Payload queue full, dropped oldest payload ({} bytes)", old.len());
        }
        self.shared.notify.notify_one();
        evicted
    }

    /// Queue a payload unless the queue is full, in which case it is
    /// handed back.
    pub fn try_push(&self, payload: Bytes) -> std::result::Result<(), Bytes> {
        self.ring().enqueue(payload)?;
        self.shared.notify.notify_one();
        Ok(())
    }

    /// Put a payload at the front so it is sent next.
    ///
    /// If the queue is full it is cleared first: the alert matters more than
    /// the backlog.
    pub fn push_front_urgent(&self, payload: Bytes) {
        {
            let mut ring = self.ring();
            if let Err(payload) = ring.push_front(payload) {
                tracing::warn!("Payload queue full, cleared {} payloads for alert", ring.len());
                ring.clear();
                let _ = ring.enqueue(payload);
            }
        }
        self.shared.notify.notify_one();
    }

    /// Drop every queued payload. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut ring = self.ring();
        let n = ring.len();
        ring.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.ring().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring().is_empty()
    }

    /// Take the next payload without waiting.
    pub fn try_pop(&self) -> Option<Bytes> {
        self.ring().dequeue()
    }

    /// Wait for the next payload.
    pub async fn pop(&self) -> Bytes {
        loop {
            let notified = self.shared.notify.notified();
            if let Some(payload) = self.try_pop() {
                return payload;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let q = PayloadQueue::new(3);
        q.push(Bytes::from_static(b"a"));
        q.push(Bytes::from_static(b"b"));
        assert_eq!(q.try_pop().as_deref(), Some(&b"a"[..]));
        assert_eq!(q.try_pop().as_deref(), Some(&b"b"[..]));
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let q = PayloadQueue::new(2);
        assert!(q.push(Bytes::from_static(b"1")).is_none());
        assert!(q.push(Bytes::from_static(b"2")).is_none());
        assert_eq!(q.push(Bytes::from_static(b"3")).as_deref(), Some(&b"1"[..]));
        assert_eq!(q.len(), 2);
        assert_eq!(q.try_pop().as_deref(), Some(&b"2"[..]));
    }

    #[test]
    fn test_try_push_refuses_newest() {
        let q = PayloadQueue::new(1);
        q.try_push(Bytes::from_static(b"first")).unwrap();
        assert_eq!(
            q.try_push(Bytes::from_static(b"second")),
            Err(Bytes::from_static(b"second"))
        );
        assert_eq!(q.try_pop().as_deref(), Some(&b"first"[..]));
    }

    #[test]
    fn test_urgent_goes_first() {
        let q = PayloadQueue::new(3);
        q.push(Bytes::from_static(b"normal"));
        q.push_front_urgent(Bytes::from_static(b"alert"));
        assert_eq!(q.try_pop().as_deref(), Some(&b"alert"[..]));
        assert_eq!(q.try_pop().as_deref(), Some(&b"normal"[..]));
    }

    #[test]
    fn test_urgent_on_full_queue_clears_backlog() {
        let q = PayloadQueue::new(2);
        q.push(Bytes::from_static(b"a"));
        q.push(Bytes::from_static(b"b"));
        q.push_front_urgent(Bytes::from_static(b"alert"));
        assert_eq!(q.len(), 1);
        assert_eq!(q.try_pop().as_deref(), Some(&b"alert"[..]));
    }

    #[test]
    fn test_clear_reports_count() {
        let q = PayloadQueue::new(4);
        q.push(Bytes::from_static(b"a"));
        q.push(Bytes::from_static(b"b"));
        assert_eq!(q.clear(), 2);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let q = PayloadQueue::new(2);
        let producer = q.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.push(Bytes::from_static(b"late"));
        });
        let got = tokio::time::timeout(Duration::from_secs(1), q.pop())
            .await
            .unwrap();
        assert_eq!(&got[..], b"late");
    }
}
