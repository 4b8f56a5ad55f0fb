//! Async events from the mixer to the control thread

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use crate::ring::SpscRing;
use crate::slot::EffectState;

/// Source state reported by [`AsyncEvent::SourceState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncSrcState {
    Reset,
    Stop,
    Play,
    Pause,
}

/// Events the mixer posts asynchronously.
pub enum AsyncEvent {
    /// A source changed play state (or stopped on its own).
    SourceState { id: u32, state: AsyncSrcState },
    /// `count` queued buffers finished on the source.
    BufferComplete { id: u32, count: u32 },
    /// A replaced effect state to be dropped off the mixer thread.
    EffectRelease { state: Box<dyn EffectState> },
    /// The device disconnected.
    Disconnect { msg: String },
}

impl std::fmt::Debug for AsyncEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AsyncEvent::SourceState { id, state } => {
                f.debug_struct("SourceState").field("id", id).field("state", state).finish()
            }
            AsyncEvent::BufferComplete { id, count } => {
                f.debug_struct("BufferComplete").field("id", id).field("count", count).finish()
            }
            AsyncEvent::EffectRelease { .. } => f.write_str("EffectRelease"),
            AsyncEvent::Disconnect { msg } => {
                f.debug_struct("Disconnect").field("msg", msg).finish()
            }
        }
    }
}

/// Enable bit for source-state events.
pub const EVT_SOURCE_STATE: u32 = 1 << 0;
/// Enable bit for buffer-complete events.
pub const EVT_BUFFER_COMPLETE: u32 = 1 << 1;
/// Enable bit for disconnect events.
pub const EVT_DISCONNECT: u32 = 1 << 2;

/// The per-context event channel: a bounded SPSC ring plus a wakeup the
/// control thread can sleep on.
pub struct EventChannel {
    ring: SpscRing<AsyncEvent>,
    enabled: AtomicU32,
    pending: AtomicBool,
    wait_lock: Mutex<()>,
    wait_cond: Condvar,
}

impl EventChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: SpscRing::new(capacity),
            enabled: AtomicU32::new(0),
            pending: AtomicBool::new(false),
            wait_lock: Mutex::new(()),
            wait_cond: Condvar::new(),
        }
    }

    /// Which event kinds the control thread asked for.
    #[inline]
    pub fn enabled(&self) -> u32 {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, bits: u32) {
        self.enabled.store(bits, Ordering::Release);
    }

    /// Mixer side: post an event; dropped if the ring is full.
    pub fn post(&self, event: AsyncEvent) -> bool {
        self.ring.try_write(event).is_ok()
    }

    /// Mixer side: post an event, handing it back when the ring is full.
    /// Use this for payloads that must not be dropped on the mixer.
    pub fn try_post(&self, event: AsyncEvent) -> Result<(), AsyncEvent> {
        self.ring.try_write(event)
    }

    /// Mixer side: posting room left.
    pub fn write_space(&self) -> usize {
        self.ring.write_space()
    }

    /// Mixer side: events are waiting, wake any sleeping control thread.
    pub fn signal(&self) {
        if self.ring.read_space() > 0 {
            self.pending.store(true, Ordering::Release);
            self.wait_cond.notify_all();
        }
    }

    /// Control side: take the next event.
    pub fn pop(&self) -> Option<AsyncEvent> {
        self.ring.pop()
    }

    /// Control side: drain all pending events.
    pub fn drain<F: FnMut(AsyncEvent)>(&self, handler: F) {
        self.pending.store(false, Ordering::Relaxed);
        self.ring.drain(handler);
    }

    /// Control side: block until events are pending or the timeout runs
    /// out. Returns whether events are pending.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.pending.swap(false, Ordering::Acquire) || self.ring.read_space() > 0 {
            return true;
        }
        let mut guard = self.wait_lock.lock();
        let _ = self.wait_cond.wait_for(&mut guard, timeout);
        self.ring.read_space() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_and_drain() {
        let chan = EventChannel::new(16);
        chan.post(AsyncEvent::SourceState { id: 7, state: AsyncSrcState::Stop });
        chan.post(AsyncEvent::BufferComplete { id: 7, count: 3 });
        chan.signal();

        let mut seen = Vec::new();
        chan.drain(|evt| seen.push(format!("{evt:?}")));
        assert_eq!(seen.len(), 2);
        assert!(seen[0].contains("SourceState"));
    }

    #[test]
    fn test_full_channel_drops() {
        let chan = EventChannel::new(2);
        assert!(chan.post(AsyncEvent::BufferComplete { id: 0, count: 1 }));
        assert!(chan.post(AsyncEvent::BufferComplete { id: 0, count: 2 }));
        assert!(!chan.post(AsyncEvent::BufferComplete { id: 0, count: 3 }));
    }

    #[test]
    fn test_enable_bits() {
        let chan = EventChannel::new(4);
        chan.set_enabled(EVT_SOURCE_STATE | EVT_DISCONNECT);
        assert_ne!(chan.enabled() & EVT_SOURCE_STATE, 0);
        assert_eq!(chan.enabled() & EVT_BUFFER_COMPLETE, 0);
    }
}
