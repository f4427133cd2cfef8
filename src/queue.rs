//! Blocking bounded containers for pipeline flow control.
//!
//! This module provides the two synchronizing containers the pipeline is
//! built from:
//!
//! - [`BoundedFifo`]: a thread-safe bounded FIFO with closing semantics
//! - [`OrderedQueue`]: a bounded container keyed by a monotone index,
//!   releasing items strictly in index order starting at 0
//!
//! Both are instances of one waiting skeleton ([`SyncBounded`]): a mutex, a
//! condition variable per side, a closed flag, and a [`BufferPolicy`] that
//! decides when the container can accept or yield. The containers differ
//! only in their policies, so the blocking and shutdown behavior cannot
//! diverge between them.
//!
//! # Deadlock Prevention
//!
//! [`OrderedQueue`] admits an over-capacity push whenever the pushed index
//! is smaller than every resident index. Without this rule, a full queue
//! whose resident indices are all above the watermark would block the one
//! producer carrying the index the consumer is waiting for, and the
//! pipeline would stall with work still in flight.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};

use parking_lot::{Condvar, Mutex};

use crate::errors::PushError;

// ============================================================================
// Waiting skeleton
// ============================================================================

/// Container-specific behavior behind the shared waiting skeleton.
///
/// The four hooks mirror the four decisions a bounded blocking container
/// has to make: may a producer deposit this item, may a consumer take one,
/// and how items enter and leave the underlying storage.
trait BufferPolicy {
    type Item;

    /// Whether a producer may deposit `item` without waiting.
    fn can_accept(&self, item: &Self::Item) -> bool;
    /// Whether a consumer may remove an item without waiting.
    fn can_yield(&self) -> bool;
    /// Deposit an item. Only called when `can_accept` held under the lock.
    fn insert(&mut self, item: Self::Item);
    /// Remove the next item. Only called when `can_yield` held under the lock.
    fn remove(&mut self) -> Self::Item;
    /// Number of items currently stored.
    fn len(&self) -> usize;
    /// Discard all stored items.
    fn clear(&mut self);
}

struct Shared<P> {
    policy: P,
    closed: bool,
}

/// Shared blocking skeleton: one mutex, one condvar per side, a closed flag.
///
/// Waits release the lock for their duration and reacquire it on wake. No
/// method holds the lock while calling into another container.
struct SyncBounded<P: BufferPolicy> {
    shared: Mutex<Shared<P>>,
    can_accept: Condvar,
    can_yield: Condvar,
}

impl<P: BufferPolicy> SyncBounded<P> {
    fn new(policy: P) -> Self {
        Self {
            shared: Mutex::new(Shared { policy, closed: false }),
            can_accept: Condvar::new(),
            can_yield: Condvar::new(),
        }
    }

    /// Block until the policy accepts the item or the container closes.
    fn push(&self, item: P::Item) -> Result<(), PushError<P::Item>> {
        let mut shared = self.shared.lock();
        while !shared.closed && !shared.policy.can_accept(&item) {
            self.can_accept.wait(&mut shared);
        }
        if shared.closed {
            return Err(PushError(item));
        }
        shared.policy.insert(item);
        self.can_yield.notify_one();
        Ok(())
    }

    /// Block until the policy can yield or the container closes.
    ///
    /// Returns `None` once the container is closed and cannot yield.
    fn pop(&self) -> Option<P::Item> {
        let mut shared = self.shared.lock();
        while !shared.closed && !shared.policy.can_yield() {
            self.can_yield.wait(&mut shared);
        }
        if !shared.policy.can_yield() {
            return None;
        }
        let item = shared.policy.remove();
        self.can_accept.notify_one();
        Some(item)
    }

    /// Close the container and wake all waiters. Idempotent.
    fn close(&self) {
        let mut shared = self.shared.lock();
        shared.closed = true;
        self.can_accept.notify_all();
        self.can_yield.notify_all();
    }

    /// Close and discard all pending items.
    ///
    /// Unlike `close`, consumers draining the container see `None`
    /// immediately rather than the remaining items.
    fn cancel(&self) {
        let mut shared = self.shared.lock();
        shared.closed = true;
        shared.policy.clear();
        self.can_accept.notify_all();
        self.can_yield.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    fn len(&self) -> usize {
        self.shared.lock().policy.len()
    }
}

// ============================================================================
// Bounded FIFO
// ============================================================================

struct FifoPolicy<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BufferPolicy for FifoPolicy<T> {
    type Item = T;

    fn can_accept(&self, _item: &T) -> bool {
        self.items.len() < self.capacity
    }

    fn can_yield(&self) -> bool {
        !self.items.is_empty()
    }

    fn insert(&mut self, item: T) {
        self.items.push_back(item);
    }

    fn remove(&mut self) -> T {
        self.items.pop_front().expect("remove called on an empty FIFO")
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn clear(&mut self) {
        self.items.clear();
    }
}

/// A thread-safe bounded FIFO with closing semantics.
///
/// `push` blocks while the queue is full; `pop` blocks while it is empty.
/// After [`close`](BoundedFifo::close), pushes fail with [`PushError`] and
/// pops drain the remaining items before returning `None`.
///
/// # Example
///
/// ```
/// use ordpipe::BoundedFifo;
///
/// let fifo = BoundedFifo::new(4);
/// fifo.push(1).unwrap();
/// fifo.push(2).unwrap();
/// fifo.close();
///
/// assert_eq!(fifo.pop(), Some(1));
/// assert_eq!(fifo.pop(), Some(2));
/// assert_eq!(fifo.pop(), None);
/// assert!(fifo.push(3).is_err());
/// ```
pub struct BoundedFifo<T> {
    inner: SyncBounded<FifoPolicy<T>>,
}

impl<T> BoundedFifo<T> {
    /// Create a FIFO holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "FIFO capacity must be >= 1");
        Self { inner: SyncBounded::new(FifoPolicy { items: VecDeque::new(), capacity }) }
    }

    /// Append an item, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns the item back if the queue has been closed.
    pub fn push(&self, item: T) -> Result<(), PushError<T>> {
        self.inner.push(item)
    }

    /// Remove the front item, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn pop(&self) -> Option<T> {
        self.inner.pop()
    }

    /// Close the queue and wake all waiters. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Close the queue and discard any buffered items.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Whether the queue has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Number of items currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the queue is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Ordered queue
// ============================================================================

/// A heap entry ordered by its submission index alone.
struct Entry<T> {
    idx: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.idx == other.idx
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.idx.cmp(&other.idx)
    }
}

struct OrderedPolicy<T> {
    heap: BinaryHeap<Reverse<Entry<T>>>,
    next_index: u64,
    capacity: usize,
}

impl<T> OrderedPolicy<T> {
    fn head_index(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse(entry)| entry.idx)
    }
}

impl<T> BufferPolicy for OrderedPolicy<T> {
    type Item = Entry<T>;

    /// Admission rule: accept on free capacity, or whenever the item
    /// improves the head of the queue. The second arm is what keeps a full
    /// queue from blocking the producer that carries the index the
    /// consumer is waiting for.
    fn can_accept(&self, item: &Entry<T>) -> bool {
        self.heap.len() < self.capacity || self.head_index().is_some_and(|head| item.idx < head)
    }

    fn can_yield(&self) -> bool {
        self.head_index() == Some(self.next_index)
    }

    fn insert(&mut self, item: Entry<T>) {
        self.heap.push(Reverse(item));
    }

    fn remove(&mut self) -> Entry<T> {
        let Reverse(entry) = self.heap.pop().expect("remove called on an empty heap");
        debug_assert_eq!(
            entry.idx, self.next_index,
            "ordered queue released index {} while expecting {}; \
             a producer submitted a duplicate or out-of-contract index",
            entry.idx, self.next_index
        );
        self.next_index += 1;
        entry
    }

    fn len(&self) -> usize {
        self.heap.len()
    }

    fn clear(&mut self) {
        self.heap.clear();
    }
}

/// A thread-safe bounded container that releases items strictly in index
/// order, starting at 0, with no gaps.
///
/// Producers push items tagged with a `u64` index; the consumer's `pop`
/// blocks until the item carrying the watermark index arrives. Indices
/// must form a contiguous range and must not repeat; a duplicate is
/// caught by a debug assertion at pop time.
///
/// # Admission
///
/// A push is admitted when the queue has free capacity **or** when its
/// index is smaller than every resident index (see the module docs for why
/// the second arm is required).
///
/// # Example
///
/// ```
/// use ordpipe::OrderedQueue;
///
/// let queue = OrderedQueue::new(4);
/// queue.push(2, "third").unwrap();
/// queue.push(0, "first").unwrap();
/// queue.push(1, "second").unwrap();
/// queue.close();
///
/// assert_eq!(queue.pop(), Some((0, "first")));
/// assert_eq!(queue.pop(), Some((1, "second")));
/// assert_eq!(queue.pop(), Some((2, "third")));
/// assert_eq!(queue.pop(), None);
/// ```
pub struct OrderedQueue<T> {
    inner: SyncBounded<OrderedPolicy<T>>,
}

impl<T> OrderedQueue<T> {
    /// Create an ordered queue holding at most `capacity` items (subject
    /// to head-improvement admission).
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "ordered queue capacity must be >= 1");
        Self {
            inner: SyncBounded::new(OrderedPolicy {
                heap: BinaryHeap::new(),
                next_index: 0,
                capacity,
            }),
        }
    }

    /// Insert an item tagged with its submission index, blocking until the
    /// admission rule allows it.
    ///
    /// # Errors
    ///
    /// Returns the item back if the queue has been closed.
    pub fn push(&self, idx: u64, item: T) -> Result<(), PushError<T>> {
        self.inner.push(Entry { idx, item }).map_err(|e| PushError(e.into_inner().item))
    }

    /// Remove the item at the watermark, blocking until it arrives.
    ///
    /// Returns `None` once the queue is closed and can no longer yield in
    /// order.
    pub fn pop(&self) -> Option<(u64, T)> {
        self.inner.pop().map(|entry| (entry.idx, entry.item))
    }

    /// Close the queue and wake all waiters. Pops continue to drain in
    /// order until the heap is empty. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Close the queue and discard all pending items.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Whether the queue has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// The next index `pop` will release.
    #[must_use]
    pub fn next_index(&self) -> u64 {
        self.inner.shared.lock().policy.next_index
    }

    /// Number of items currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the queue is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
