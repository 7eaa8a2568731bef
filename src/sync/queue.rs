//! Message queue
//!
//! A fixed-capacity FIFO of fixed-size byte items. Items are copied in on
//! `send` and copied out on `receive`; producer and consumer never share a
//! buffer.
//!
//! ## Blocking
//!
//! - A receiver on an empty queue is parked; the next `send` delivers its
//!   item straight into the receiver's control block.
//! - A sender on a full queue parks its item in its own control block;
//!   each `receive` that frees a slot admits the earliest parked item.
//!
//! Either way the queue's arrival order is preserved.

use log::{debug, warn};

use super::{Outcome, WaitList};
use crate::arch::ContextSwitch;
use crate::arena::Key;
use crate::config::{MAX_ITEM_SIZE, QUEUE_STORAGE_BYTES};
use crate::error::{Error, Result};
use crate::scheduler::Scheduler;
use crate::task::WaitTarget;

/// Handle to a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(pub(crate) Key);

/// Ring of `capacity` items of `item_size` bytes.
pub(crate) struct Queue {
    item_size: usize,
    capacity: usize,
    storage: [u8; QUEUE_STORAGE_BYTES],
    head: usize,
    tail: usize,
    count: usize,
    pub(crate) senders: WaitList,
    pub(crate) receivers: WaitList,
}

impl Queue {
    fn new(item_size: usize, capacity: usize) -> Self {
        Self {
            item_size,
            capacity,
            storage: [0; QUEUE_STORAGE_BYTES],
            head: 0,
            tail: 0,
            count: 0,
            senders: WaitList::new(),
            receivers: WaitList::new(),
        }
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.count == self.capacity
    }

    fn slot(&mut self, index: usize) -> &mut [u8] {
        let start = index * self.item_size;
        &mut self.storage[start..start + self.item_size]
    }

    /// Append at the tail. Caller checks for room.
    fn push(&mut self, item: &[u8]) {
        let tail = self.tail;
        self.slot(tail).copy_from_slice(item);
        self.tail = (self.tail + 1) % self.capacity;
        self.count += 1;
    }

    /// Remove from the head into `out[..item_size]`. Caller checks for an
    /// item.
    fn pop(&mut self, out: &mut [u8]) {
        let head = self.head;
        let size = self.item_size;
        out[..size].copy_from_slice(self.slot(head));
        self.head = (self.head + 1) % self.capacity;
        self.count -= 1;
    }
}

impl<P: ContextSwitch> Scheduler<P> {
    /// Create a queue of `capacity` items, each `item_size` bytes.
    pub fn create_queue(&mut self, item_size: usize, capacity: usize) -> Result<QueueId> {
        if item_size == 0 || item_size > MAX_ITEM_SIZE || capacity == 0 {
            return Err(Error::InvalidOperation);
        }
        match item_size.checked_mul(capacity) {
            Some(bytes) if bytes <= QUEUE_STORAGE_BYTES => {}
            _ => {
                warn!("create_queue: {} x {} bytes exceeds item storage", capacity, item_size);
                return Err(Error::AllocationFailed);
            }
        }
        let key = self
            .queues
            .insert_with(|_| Queue::new(item_size, capacity))
            .ok_or(Error::TableFull)?;
        debug!("queue {:?} created ({} x {} bytes)", key, capacity, item_size);
        Ok(QueueId(key))
    }

    /// Destroy a queue. Parked senders and receivers are released with
    /// `InvalidHandle`; parked items are dropped.
    pub fn delete_queue(&mut self, id: QueueId) -> Result<()> {
        let mut queue = self.queues.remove(id.0).ok_or(Error::InvalidHandle)?;
        let senders = queue.senders.drain();
        let receivers = queue.receivers.drain();
        self.release_all(senders, Err(Error::InvalidHandle));
        self.release_all(receivers, Err(Error::InvalidHandle));
        debug!("queue {:?} deleted", id.0);
        Ok(())
    }

    /// Copy `item` into the queue, waiting up to `timeout` ticks for room.
    /// `item` must be exactly the queue's item size.
    pub fn queue_send(&mut self, id: QueueId, item: &[u8], timeout: u32) -> Result<Outcome> {
        let queue = self.queues.get_mut(id.0).ok_or(Error::InvalidHandle)?;
        if item.len() != queue.item_size {
            return Err(Error::InvalidOperation);
        }

        // A parked receiver means the queue is empty: hand over directly
        if let Some(receiver) = queue.receivers.pop_front() {
            let tcb = self.tcb_mut(receiver);
            tcb.parcel.clear();
            // Item size is bounded by MAX_ITEM_SIZE at creation
            let _ = tcb.parcel.extend_from_slice(item);
            self.release_waiter(receiver, Ok(()));
            return Ok(Outcome::Complete);
        }
        if !queue.is_full() {
            queue.push(item);
            return Ok(Outcome::Complete);
        }
        if timeout == 0 {
            return Err(Error::Timeout);
        }

        let me = self.calling_task()?;
        let tcb = self.tcb_mut(me);
        tcb.parcel.clear();
        let _ = tcb.parcel.extend_from_slice(item);
        if let Some(queue) = self.queues.get_mut(id.0) {
            queue.senders.push(me);
        }
        self.block_task(me, WaitTarget::QueueSend(id), timeout);
        self.dispatch();
        Ok(Outcome::Blocked)
    }

    /// Copy the oldest item into `out`, waiting up to `timeout` ticks for
    /// one. `out` must hold at least one item.
    ///
    /// When this call blocks, the item is delivered later through
    /// [`complete_wait`](Self::complete_wait).
    pub fn queue_receive(&mut self, id: QueueId, out: &mut [u8], timeout: u32) -> Result<Outcome> {
        let queue = self.queues.get_mut(id.0).ok_or(Error::InvalidHandle)?;
        if out.len() < queue.item_size {
            return Err(Error::InvalidOperation);
        }

        if queue.count > 0 {
            queue.pop(out);
            // A slot just opened: admit the earliest parked sender
            if let Some(sender) = queue.senders.pop_front() {
                let tcb = self.tcb_mut(sender);
                let parcel = core::mem::take(&mut tcb.parcel);
                if let Some(queue) = self.queues.get_mut(id.0) {
                    queue.push(&parcel);
                }
                self.release_waiter(sender, Ok(()));
            }
            return Ok(Outcome::Complete);
        }
        if timeout == 0 {
            return Err(Error::Timeout);
        }

        let me = self.calling_task()?;
        if let Some(queue) = self.queues.get_mut(id.0) {
            queue.receivers.push(me);
        }
        self.block_task(me, WaitTarget::QueueReceive(id), timeout);
        self.dispatch();
        Ok(Outcome::Blocked)
    }

    /// Items currently stored.
    pub fn queue_len(&self, id: QueueId) -> Result<usize> {
        self.queues
            .get(id.0)
            .map(|q| q.count)
            .ok_or(Error::InvalidHandle)
    }

    pub fn queue_capacity(&self, id: QueueId) -> Result<usize> {
        self.queues
            .get(id.0)
            .map(|q| q.capacity)
            .ok_or(Error::InvalidHandle)
    }
}
