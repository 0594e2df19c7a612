//! # SPSC Queue
//!
//! Unbounded lock-free single-producer single-consumer queue used to hand
//! records between concurrently running pipeline stages.
//!
//! ## Design
//!
//! - Intrusive singly-linked list with a dummy link at the consumer's tail
//! - Consumer cursor and producer cursors live on separate cache lines
//! - Consumed links go back to a producer-private cache instead of being
//!   freed, so memory tracks the most items ever in flight, not throughput
//! - Release stores publish, acquire loads observe; no locks, no fences
//!
//! [`channel`] returns one [`Producer`] and one [`Consumer`]. Neither can be
//! cloned and both operate through `&mut self`, so a second producer or
//! consumer cannot exist.

use std::cell::UnsafeCell;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

/// Pads a value to a cache line boundary to prevent false sharing.
#[repr(C, align(64))]
pub struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    pub const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T> std::ops::DerefMut for CachePadded<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.value
    }
}

struct Link<T> {
    next: AtomicPtr<Link<T>>,
    value: Option<T>,
}

impl<T> Link<T> {
    fn boxed() -> *mut Link<T> {
        Box::into_raw(Box::new(Link {
            next: AtomicPtr::new(ptr::null_mut()),
            value: None,
        }))
    }
}

/// Producer-private cursors.
struct ProducerCursor<T> {
    /// Newest link; its `next` is where the next item gets published.
    head: *mut Link<T>,
    /// Oldest link of the recycle cache.
    first: *mut Link<T>,
    /// Last observed consumer tail; links in `first..tail_copy` are reusable.
    tail_copy: *mut Link<T>,
    allocated: usize,
}

impl<T> ProducerCursor<T> {
    fn alloc_link(&mut self, tail: &AtomicPtr<Link<T>>) -> *mut Link<T> {
        if self.first == self.tail_copy {
            self.tail_copy = tail.load(Ordering::Acquire);
        }
        if self.first != self.tail_copy {
            let link = self.first;
            // SAFETY: `link` lies strictly behind the consumer's tail, so the
            // consumer is done with it and its `next` was written by us.
            self.first = unsafe { (*link).next.load(Ordering::Relaxed) };
            return link;
        }
        self.allocated += 1;
        Link::boxed()
    }
}

struct RawQueue<T> {
    /// Consumer part; read by the producer only when its cache runs dry.
    tail: CachePadded<AtomicPtr<Link<T>>>,
    /// Producer part.
    producer: CachePadded<UnsafeCell<ProducerCursor<T>>>,
}

// SAFETY: links are only reached through the two endpoints, each of which is
// unique; items cross threads, hence `T: Send`.
unsafe impl<T: Send> Send for RawQueue<T> {}

// SAFETY: shared access is limited to the atomic tail; the producer cursor is
// only touched through `&mut Producer`.
unsafe impl<T: Send> Sync for RawQueue<T> {}

impl<T> Drop for RawQueue<T> {
    fn drop(&mut self) {
        // every link ever allocated is still chained from `first`
        let mut link = self.producer.get_mut().first;
        while !link.is_null() {
            // SAFETY: both endpoints are gone; we own the whole chain.
            let boxed = unsafe { Box::from_raw(link) };
            link = boxed.next.load(Ordering::Relaxed);
        }
    }
}

/// Creates a connected producer/consumer pair.
pub fn channel<T: Send>() -> (Producer<T>, Consumer<T>) {
    let dummy = Link::boxed();
    let queue = Arc::new(RawQueue {
        tail: CachePadded::new(AtomicPtr::new(dummy)),
        producer: CachePadded::new(UnsafeCell::new(ProducerCursor {
            head: dummy,
            first: dummy,
            tail_copy: dummy,
            allocated: 1,
        })),
    });
    (
        Producer {
            queue: Arc::clone(&queue),
        },
        Consumer { queue },
    )
}

/// Sending half of an SPSC queue.
pub struct Producer<T> {
    queue: Arc<RawQueue<T>>,
}

impl<T: Send> Producer<T> {
    /// Appends `value`. Never blocks and never fails.
    pub fn enqueue(&mut self, value: T) {
        // SAFETY: `&mut self` makes this the only live access to the cursor.
        let cursor = unsafe { &mut *self.queue.producer.get() };
        let link = cursor.alloc_link(&self.queue.tail);

        // SAFETY: `link` is fresh or recycled, unreachable by the consumer
        // until the release store below; `head` is always a live link.
        unsafe {
            (*link).next.store(ptr::null_mut(), Ordering::Relaxed);
            (*link).value = Some(value);
            (*cursor.head).next.store(link, Ordering::Release);
        }
        cursor.head = link;
    }

    /// Total links allocated over the queue's life, the initial dummy included.
    pub fn allocated_links(&self) -> usize {
        // SAFETY: only `enqueue` writes the cursor and it needs `&mut self`.
        unsafe { (*self.queue.producer.get()).allocated }
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer").finish_non_exhaustive()
    }
}

/// Receiving half of an SPSC queue.
pub struct Consumer<T> {
    queue: Arc<RawQueue<T>>,
}

impl<T: Send> Consumer<T> {
    /// Takes the oldest item, or `None` if nothing is pending.
    pub fn dequeue(&mut self) -> Option<T> {
        let tail = self.queue.tail.load(Ordering::Relaxed);

        // SAFETY: the tail link is never recycled while it is the tail.
        let next = unsafe { (*tail).next.load(Ordering::Acquire) };
        if next.is_null() {
            return None;
        }

        // SAFETY: the acquire load pairs with the producer's release store,
        // so `next` is fully written; the producer won't reuse it until it
        // observes a tail beyond it.
        let value = unsafe { (*next).value.take() };
        self.queue.tail.store(next, Ordering::Release);
        value
    }

    /// Takes up to `max` items in FIFO order.
    pub fn dequeue_batch(&mut self, max: usize) -> Vec<T> {
        let mut items = Vec::new();
        while items.len() < max {
            match self.dequeue() {
                Some(item) => items.push(item),
                None => break,
            }
        }
        items
    }

    /// Snapshot; the producer may publish right after this returns.
    pub fn is_empty(&self) -> bool {
        let tail = self.queue.tail.load(Ordering::Relaxed);
        // SAFETY: see `dequeue`.
        unsafe { (*tail).next.load(Ordering::Acquire).is_null() }
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer").finish_non_exhaustive()
    }
}
