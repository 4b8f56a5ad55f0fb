//! Lock-free property hand-off
//!
//! Control threads publish fully-built property objects by atomically
//! exchanging them into an update slot; the mixer exchanges them out,
//! applies them, and returns the carcass to a free list the control side
//! allocates from. Neither side ever frees on the hot path, and once
//! published an object is never written by its producer again.
//!
//! The free list is a Treiber stack. The usual ABA concern doesn't bite
//! here: nodes only move between the slot and the stack, and the mixer is
//! the single consumer of the slot.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// A property object with its intrusive free-list link.
pub struct PropNode<T> {
    next: AtomicPtr<PropNode<T>>,
    pub value: T,
}

impl<T> PropNode<T> {
    pub fn new(value: T) -> Box<Self> {
        Box::new(Self { next: AtomicPtr::new(ptr::null_mut()), value })
    }
}

/// Treiber stack of recycled property objects.
pub struct FreeList<T> {
    head: AtomicPtr<PropNode<T>>,
}

impl<T> Default for FreeList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FreeList<T> {
    pub fn new() -> Self {
        Self { head: AtomicPtr::new(ptr::null_mut()) }
    }

    /// Pop a node for reuse, or None if the list is dry.
    pub fn pop(&self) -> Option<Box<PropNode<T>>> {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            if head.is_null() {
                return None;
            }
            // SAFETY: a non-null head is a node previously pushed via
            // Box::into_raw and not yet popped; reading its link is safe.
            let next = unsafe { (*head).next.load(Ordering::Relaxed) };
            match self.head.compare_exchange_weak(
                head,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                // SAFETY: the winning CAS transfers ownership to us.
                Ok(_) => return Some(unsafe { Box::from_raw(head) }),
                Err(actual) => head = actual,
            }
        }
    }

    /// Push a node back for reuse.
    pub fn push(&self, node: Box<PropNode<T>>) {
        let node_ptr = Box::into_raw(node);
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            // SAFETY: we own node_ptr until the CAS succeeds.
            unsafe { (*node_ptr).next.store(head, Ordering::Relaxed) };
            match self.head.compare_exchange_weak(
                head,
                node_ptr,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => head = actual,
            }
        }
    }
}

impl<T> Drop for FreeList<T> {
    fn drop(&mut self) {
        let mut head = *self.head.get_mut();
        while !head.is_null() {
            // SAFETY: sole owner at drop time.
            let node = unsafe { Box::from_raw(head) };
            head = node.next.load(Ordering::Relaxed);
        }
    }
}

/// The atomic update slot an object exposes to its control thread.
pub struct UpdateSlot<T> {
    ptr: AtomicPtr<PropNode<T>>,
}

impl<T> Default for UpdateSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> UpdateSlot<T> {
    pub fn new() -> Self {
        Self { ptr: AtomicPtr::new(ptr::null_mut()) }
    }

    /// Control side: publish a property object. A still-pending previous
    /// object is superseded and recycled.
    pub fn publish(&self, node: Box<PropNode<T>>, free: &FreeList<T>) {
        let old = self.ptr.swap(Box::into_raw(node), Ordering::AcqRel);
        if !old.is_null() {
            // SAFETY: the exchange took the old node out of the slot; the
            // mixer never saw it.
            free.push(unsafe { Box::from_raw(old) });
        }
    }

    /// Mixer side: take the pending object, if any. The caller applies it
    /// and returns it through [`FreeList::push`].
    pub fn take(&self) -> Option<Box<PropNode<T>>> {
        let old = self.ptr.swap(ptr::null_mut(), Ordering::AcqRel);
        if old.is_null() {
            None
        } else {
            // SAFETY: the exchange gives us exclusive ownership.
            Some(unsafe { Box::from_raw(old) })
        }
    }
}

impl<T> Drop for UpdateSlot<T> {
    fn drop(&mut self) {
        let ptr = *self.ptr.get_mut();
        if !ptr.is_null() {
            // SAFETY: sole owner at drop time.
            drop(unsafe { Box::from_raw(ptr) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_take_roundtrip() {
        let slot: UpdateSlot<u32> = UpdateSlot::new();
        let free: FreeList<u32> = FreeList::new();

        slot.publish(PropNode::new(42), &free);
        let node = slot.take().expect("published value should be pending");
        assert_eq!(node.value, 42);
        assert!(slot.take().is_none());
        free.push(node);

        // The recycled node comes back from the free list.
        let recycled = free.pop().expect("node was recycled");
        assert_eq!(recycled.value, 42);
    }

    #[test]
    fn test_superseded_update_recycles() {
        let slot: UpdateSlot<u32> = UpdateSlot::new();
        let free: FreeList<u32> = FreeList::new();

        slot.publish(PropNode::new(1), &free);
        slot.publish(PropNode::new(2), &free);

        // First publish was superseded and went to the free list.
        assert_eq!(free.pop().map(|n| n.value), Some(1));
        assert_eq!(slot.take().map(|n| n.value), Some(2));
    }

    #[test]
    fn test_freelist_lifo() {
        let free: FreeList<u32> = FreeList::new();
        free.push(PropNode::new(1));
        free.push(PropNode::new(2));
        assert_eq!(free.pop().map(|n| n.value), Some(2));
        assert_eq!(free.pop().map(|n| n.value), Some(1));
        assert!(free.pop().is_none());
    }

    #[test]
    fn test_concurrent_publish_consume() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let slot: Arc<UpdateSlot<u64>> = Arc::new(UpdateSlot::new());
        let free: Arc<FreeList<u64>> = Arc::new(FreeList::new());
        let done = Arc::new(AtomicBool::new(false));

        let producer = {
            let slot = Arc::clone(&slot);
            let free = Arc::clone(&free);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                for i in 0..50_000u64 {
                    let node = free.pop().map(|mut n| {
                        n.value = i;
                        n
                    });
                    let node = node.unwrap_or_else(|| PropNode::new(i));
                    slot.publish(node, &free);
                }
                done.store(true, Ordering::Release);
            })
        };

        let mut last = 0u64;
        loop {
            if let Some(node) = slot.take() {
                assert!(node.value >= last, "saw stale update");
                last = node.value;
                free.push(node);
            } else if done.load(Ordering::Acquire) {
                break;
            }
        }
        producer.join().unwrap();
    }
}
