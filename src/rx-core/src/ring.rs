// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Fixed pool of sample buffers handed between one producer and one consumer.
//!
//! All N buffers are allocated up front. A buffer is always in exactly one
//! place: the free queue, the filled queue, or a guard held by one side.
//! Guards return their buffer to the free queue when dropped, so an early
//! return on the producer side never leaks a slot and the consumer side
//! releases by simply dropping what it acquired.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    #[error("ring peer disconnected")]
    Disconnected,
}

/// Point-in-time view of the ring accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    pub capacity: usize,
    pub free: usize,
    pub filled: usize,
    pub published: u64,
    pub consumed: u64,
}

struct Shared<T> {
    free_tx: Sender<T>,
    free_rx: Receiver<T>,
    filled_rx: Receiver<T>,
    capacity: usize,
    high_watermark: usize,
    published: AtomicU64,
    consumed: AtomicU64,
}

impl<T> Shared<T> {
    fn stats(&self) -> RingStats {
        RingStats {
            capacity: self.capacity,
            free: self.free_rx.len(),
            filled: self.filled_rx.len(),
            published: self.published.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
        }
    }

    fn recycle(&self, buf: T) {
        // The free queue has room for every slot, so this never blocks.
        let _ = self.free_tx.send(buf);
    }
}

/// Build a ring of `slots` buffers created by `make_slot`.
///
/// `high_watermark` is the filled count at which [`SlotProducer::near_full`]
/// starts reporting true; it is clamped to `1..=slots`.
pub fn ring_buffer<T, F>(
    slots: usize,
    high_watermark: usize,
    mut make_slot: F,
) -> (SlotProducer<T>, SlotConsumer<T>)
where
    F: FnMut() -> T,
{
    let capacity = slots.max(1);
    let (free_tx, free_rx) = bounded(capacity);
    let (filled_tx, filled_rx) = bounded(capacity);
    for _ in 0..capacity {
        let _ = free_tx.send(make_slot());
    }

    let shared = Arc::new(Shared {
        free_tx,
        free_rx,
        filled_rx,
        capacity,
        high_watermark: high_watermark.clamp(1, capacity),
        published: AtomicU64::new(0),
        consumed: AtomicU64::new(0),
    });

    (
        SlotProducer {
            shared: Arc::clone(&shared),
            filled_tx,
        },
        SlotConsumer { shared },
    )
}

// ---------------------------------------------------------------------------
// Producer side
// ---------------------------------------------------------------------------

pub struct SlotProducer<T> {
    shared: Arc<Shared<T>>,
    filled_tx: Sender<T>,
}

impl<T> SlotProducer<T> {
    /// Block until a free slot is available.
    pub fn acquire_free(&self) -> Result<FreeSlot<'_, T>, RingError> {
        let buf = self
            .shared
            .free_rx
            .recv()
            .map_err(|_| RingError::Disconnected)?;
        Ok(FreeSlot::new(buf, self))
    }

    /// Wait up to `timeout` for a free slot. `Ok(None)` on timeout.
    pub fn acquire_free_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<FreeSlot<'_, T>>, RingError> {
        match self.shared.free_rx.recv_timeout(timeout) {
            Ok(buf) => Ok(Some(FreeSlot::new(buf, self))),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(RingError::Disconnected),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn free_count(&self) -> usize {
        self.shared.free_rx.len()
    }

    pub fn filled_count(&self) -> usize {
        self.shared.filled_rx.len()
    }

    /// True once the consumer has fallen behind by the watermark.
    pub fn near_full(&self) -> bool {
        self.filled_count() >= self.shared.high_watermark
    }

    pub fn stats(&self) -> RingStats {
        self.shared.stats()
    }
}

/// A free slot held by the producer. Dropping it without
/// [`publish`](FreeSlot::publish) returns it to the free pool.
pub struct FreeSlot<'a, T> {
    buf: Option<T>,
    producer: &'a SlotProducer<T>,
}

impl<'a, T> FreeSlot<'a, T> {
    fn new(buf: T, producer: &'a SlotProducer<T>) -> Self {
        Self {
            buf: Some(buf),
            producer,
        }
    }

    /// Hand the slot to the consumer.
    pub fn publish(mut self) -> Result<(), RingError> {
        let Some(buf) = self.buf.take() else {
            return Ok(());
        };
        match self.producer.filled_tx.send(buf) {
            Ok(()) => {
                self.producer.shared.published.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                self.producer.shared.recycle(err.into_inner());
                Err(RingError::Disconnected)
            }
        }
    }
}

impl<T> Deref for FreeSlot<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.buf.as_ref().expect("slot present until publish or drop")
    }
}

impl<T> DerefMut for FreeSlot<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.buf.as_mut().expect("slot present until publish or drop")
    }
}

impl<T> Drop for FreeSlot<'_, T> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.producer.shared.recycle(buf);
        }
    }
}

// ---------------------------------------------------------------------------
// Consumer side
// ---------------------------------------------------------------------------

pub struct SlotConsumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> SlotConsumer<T> {
    /// Block until the producer publishes a slot.
    ///
    /// Fails with [`RingError::Disconnected`] once the producer is gone and
    /// every published slot has been drained.
    pub fn acquire_filled(&self) -> Result<FilledSlot<'_, T>, RingError> {
        let buf = self
            .shared
            .filled_rx
            .recv()
            .map_err(|_| RingError::Disconnected)?;
        Ok(FilledSlot::new(buf, self))
    }

    /// Wait up to `timeout` for a filled slot. `Ok(None)` on timeout.
    pub fn acquire_filled_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<FilledSlot<'_, T>>, RingError> {
        match self.shared.filled_rx.recv_timeout(timeout) {
            Ok(buf) => Ok(Some(FilledSlot::new(buf, self))),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(RingError::Disconnected),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn free_count(&self) -> usize {
        self.shared.free_rx.len()
    }

    pub fn filled_count(&self) -> usize {
        self.shared.filled_rx.len()
    }

    pub fn stats(&self) -> RingStats {
        self.shared.stats()
    }
}

/// A filled slot held by the consumer. Dropping it releases the slot back
/// to the free pool.
pub struct FilledSlot<'a, T> {
    buf: Option<T>,
    consumer: &'a SlotConsumer<T>,
}

impl<'a, T> FilledSlot<'a, T> {
    fn new(buf: T, consumer: &'a SlotConsumer<T>) -> Self {
        Self {
            buf: Some(buf),
            consumer,
        }
    }

    /// Explicit form of dropping the guard.
    pub fn release(self) {}
}

impl<T> Deref for FilledSlot<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.buf.as_ref().expect("slot present until release")
    }
}

impl<T> DerefMut for FilledSlot<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.buf.as_mut().expect("slot present until release")
    }
}

impl<T> Drop for FilledSlot<'_, T> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.consumer.shared.consumed.fetch_add(1, Ordering::Relaxed);
            self.consumer.shared.recycle(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn byte_ring(slots: usize, len: usize) -> (SlotProducer<Vec<u8>>, SlotConsumer<Vec<u8>>) {
        ring_buffer(slots, slots.saturating_sub(1), || vec![0u8; len])
    }

    #[test]
    fn test_new_ring_all_free() {
        let (producer, consumer) = byte_ring(4, 16);
        assert_eq!(producer.capacity(), 4);
        assert_eq!(producer.free_count(), 4);
        assert_eq!(consumer.filled_count(), 0);
    }

    #[test]
    fn test_fifo_order() {
        let (producer, consumer) = byte_ring(4, 1);
        for id in 0..3u8 {
            let mut slot = producer.acquire_free().unwrap();
            slot[0] = id;
            slot.publish().unwrap();
        }
        for id in 0..3u8 {
            let slot = consumer.acquire_filled().unwrap();
            assert_eq!(slot[0], id);
        }
    }

    #[test]
    fn test_unpublished_slot_returns_to_free_pool() {
        let (producer, consumer) = byte_ring(2, 8);
        {
            let mut slot = producer.acquire_free().unwrap();
            slot[0] = 42;
            assert_eq!(producer.free_count(), 1);
        }
        assert_eq!(producer.free_count(), 2);
        assert_eq!(consumer.filled_count(), 0);
        assert!(consumer
            .acquire_filled_timeout(Duration::from_millis(5))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_accounting_holds_with_slots_in_flight() {
        let (producer, consumer) = byte_ring(4, 4);
        let n = producer.capacity();
        let a = producer.acquire_free().unwrap();
        let b = producer.acquire_free().unwrap();
        assert_eq!(producer.free_count() + consumer.filled_count() + 2, n);
        a.publish().unwrap();
        assert_eq!(producer.free_count() + consumer.filled_count() + 1, n);
        let held = consumer.acquire_filled().unwrap();
        assert_eq!(producer.free_count() + consumer.filled_count() + 2, n);
        drop(held);
        drop(b);
        assert_eq!(producer.free_count() + consumer.filled_count(), n);
        let stats = consumer.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.consumed, 1);
    }

    #[test]
    fn test_exhausted_pool_times_out() {
        let (producer, _consumer) = byte_ring(2, 4);
        producer.acquire_free().unwrap().publish().unwrap();
        producer.acquire_free().unwrap().publish().unwrap();
        assert!(producer.near_full());
        let waited = producer
            .acquire_free_timeout(Duration::from_millis(10))
            .unwrap();
        assert!(waited.is_none(), "no free slot while consumer holds none back");
    }

    #[test]
    fn test_consumer_sees_disconnect_after_drain() {
        let (producer, consumer) = byte_ring(2, 4);
        producer.acquire_free().unwrap().publish().unwrap();
        drop(producer);
        assert!(consumer.acquire_filled().is_ok());
        assert_eq!(
            consumer.acquire_filled().err(),
            Some(RingError::Disconnected)
        );
    }

    #[test]
    fn test_threaded_fifo_without_corruption() {
        const BLOCKS: u64 = 5_000;
        const LEN: usize = 64;
        let (producer, consumer) = byte_ring(4, LEN);

        let writer = thread::spawn(move || {
            for seq in 0..BLOCKS {
                let mut slot = producer.acquire_free().unwrap();
                slot[..8].copy_from_slice(&seq.to_le_bytes());
                let fill = (seq % 251) as u8;
                for byte in &mut slot[8..] {
                    *byte = fill;
                }
                slot.publish().unwrap();
                let stats = producer.stats();
                assert!(stats.free + stats.filled <= stats.capacity);
            }
        });

        let mut expected = 0u64;
        while expected < BLOCKS {
            let slot = consumer.acquire_filled().unwrap();
            let mut seq_bytes = [0u8; 8];
            seq_bytes.copy_from_slice(&slot[..8]);
            let seq = u64::from_le_bytes(seq_bytes);
            assert_eq!(seq, expected, "blocks must arrive in publish order");
            let fill = (seq % 251) as u8;
            assert!(slot[8..].iter().all(|&b| b == fill), "slot {seq} corrupted");
            expected += 1;
        }

        writer.join().unwrap();
        assert_eq!(consumer.free_count(), consumer.capacity());
    }
}
