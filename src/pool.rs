//! Fixed-size buffer pool shared between reader threads and the writer.
//!
//! Grounded on the reference daemon's `Buff_t`/`AddFreeBuff`/`GetFreeBuff`/
//! `AddBuff`/`GetBuff`: two FIFO queues, each behind its own mutex, with a
//! condvar per queue signaled on every insertion. The intrusive
//! queue-node-plus-raw-pointer pattern of the source is replaced here with
//! plain ownership transfer: a `Buffer` is moved into and out of a
//! `VecDeque`, so the type system rules out the double-ownership the source
//! relied on queue discipline alone to avoid.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use log::info;

/// One packet-sized buffer plus the metadata the reader stamps on it before
/// handing it to the writer.
pub struct Buffer {
    pub data: Vec<u8>,
    pub len: usize,
    pub router: Ipv4Addr,
    pub drop_detection: bool,
}

impl Buffer {
    fn new(payload_size: usize) -> Self {
        Buffer {
            data: vec![0u8; payload_size],
            len: 0,
            router: Ipv4Addr::UNSPECIFIED,
            drop_detection: true,
        }
    }
}

struct Queue {
    items: VecDeque<Buffer>,
}

pub struct BufferPool {
    free: Mutex<Queue>,
    free_cond: Condvar,
    ready: Mutex<Queue>,
    ready_cond: Condvar,
    name: &'static str,
}

impl BufferPool {
    /// Allocates `capacity` buffers of `payload_size` bytes, all starting on
    /// the free queue.
    pub fn init(capacity: usize, payload_size: usize, name: &'static str) -> Self {
        let mut free_items = VecDeque::with_capacity(capacity);
        for _ in 0..capacity {
            free_items.push_back(Buffer::new(payload_size));
        }

        BufferPool {
            free: Mutex::new(Queue { items: free_items }),
            free_cond: Condvar::new(),
            ready: Mutex::new(Queue {
                items: VecDeque::with_capacity(capacity),
            }),
            ready_cond: Condvar::new(),
            name,
        }
    }

    /// Removes one buffer from the free queue. If empty and `wait`, blocks
    /// until one is released. If empty and `!wait`, steals the oldest
    /// buffer from the ready queue instead of waiting, dropping whatever
    /// work it held.
    pub fn acquire_free(&self, wait: bool) -> Buffer {
        let mut guard = self.free.lock().unwrap();
        let mut dropping = false;

        loop {
            if let Some(buf) = guard.items.pop_front() {
                if dropping {
                    info!(
                        "the free buffer list for {} now has {} free buffers.",
                        self.name,
                        guard.items.len()
                    );
                }
                return buf;
            }

            if !dropping {
                info!(
                    "the free buffer list for {} is empty. will {}.",
                    self.name,
                    if wait { "wait for a buffer" } else { "drop an inuse buffer" }
                );
                dropping = true;
            }

            if wait {
                guard = self.free_cond.wait(guard).unwrap();
            } else {
                // Release free_q before reaching into ready_q: the two
                // queues' mutexes must never be held simultaneously.
                drop(guard);
                let stolen = self.take_ready();
                guard = self.free.lock().unwrap();
                guard.items.push_back(stolen);
            }
        }
    }

    /// Returns a buffer to the free queue and wakes one waiter.
    pub fn release_free(&self, buf: Buffer) {
        let mut guard = self.free.lock().unwrap();
        guard.items.push_back(buf);
        self.free_cond.notify_one();
    }

    /// Appends a buffer to the ready queue and wakes one waiter.
    pub fn submit(&self, buf: Buffer) {
        let mut guard = self.ready.lock().unwrap();
        guard.items.push_back(buf);
        self.ready_cond.notify_one();
    }

    /// Blocks until the ready queue is non-empty, then removes one buffer.
    pub fn take_ready(&self) -> Buffer {
        let mut guard = self.ready.lock().unwrap();
        loop {
            if let Some(buf) = guard.items.pop_front() {
                return buf;
            }
            guard = self.ready_cond.wait(guard).unwrap();
        }
    }

    /// Like [`take_ready`](Self::take_ready), but gives up after `timeout`
    /// so a caller can periodically re-check a shutdown flag instead of
    /// blocking forever. This is how the writer implements "select between
    /// the ready queue and a shutdown signal" without OS thread
    /// cancellation.
    pub fn take_ready_timeout(&self, timeout: Duration) -> Option<Buffer> {
        let guard = self.ready.lock().unwrap();
        let (mut guard, _) = self
            .ready_cond
            .wait_timeout_while(guard, timeout, |q| q.items.is_empty())
            .unwrap();
        guard.items.pop_front()
    }

    #[cfg(test)]
    pub fn free_len(&self) -> usize {
        self.free.lock().unwrap().items.len()
    }

    #[cfg(test)]
    pub fn ready_len(&self) -> usize {
        self.ready.lock().unwrap().items.len()
    }
}
