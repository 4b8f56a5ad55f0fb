//! Per-context mixer state and the voice-change queue
//!
//! A context owns its voices and effect slots (mixer side) and shares the
//! lock-free control surface — update slots, free lists, event channel,
//! and the voice-change queue — with control threads through an `Arc`.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sf_core::{CoreError, DistanceModel, MAX_AMBI_ORDER};
use sf_spatial::{Mat3, Vec3};

use crate::events::{AsyncEvent, AsyncSrcState, EventChannel, EVT_SOURCE_STATE};
use crate::lockfree::{FreeList, UpdateSlot};
use crate::params::{
    calc_context_params, calc_effect_slot_params, calc_source_params, DeviceParams,
};
use crate::props::{ContextProps, EffectSlotProps, VoiceProps};
use crate::slot::{sort_slot_order, EffectSlot, EffectTarget};
use crate::voice::{MixEnv, PlayState, Voice};

/// Listener-derived parameters the mixer recomputes on update.
#[derive(Debug, Clone)]
pub struct ContextParams {
    pub position: Vec3,
    pub matrix: Mat3,
    pub velocity: Vec3,
    pub gain: f32,
    pub meters_per_unit: f32,
    pub air_absorption_gain_hf: f32,
    pub doppler_factor: f32,
    pub speed_of_sound: f32,
    pub source_distance_model: bool,
    pub distance_model: DistanceModel,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            matrix: Mat3::IDENTITY,
            velocity: Vec3::ZERO,
            gain: 1.0,
            meters_per_unit: 1.0,
            air_absorption_gain_hf: sf_core::AIR_ABSORB_GAIN_HF,
            doppler_factor: 1.0,
            speed_of_sound: sf_core::SPEED_OF_SOUND_METERS_PER_SEC,
            source_distance_model: false,
            distance_model: DistanceModel::InverseClamped,
        }
    }
}

/// Voice state transitions a control thread can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VChangeState {
    Reset,
    Stop,
    Play,
    Pause,
    Restart,
}

/// One queued state-change record.
pub struct VoiceChange {
    pub state: VChangeState,
    pub voice: Option<usize>,
    pub old_voice: Option<usize>,
    pub source_id: u32,
    next: AtomicPtr<VoiceChange>,
}

impl VoiceChange {
    fn sentinel() -> Box<Self> {
        Box::new(Self {
            state: VChangeState::Stop,
            voice: None,
            old_voice: None,
            source_id: 0,
            next: AtomicPtr::new(ptr::null_mut()),
        })
    }
}

struct QueueInner {
    /// Oldest still-allocated node; everything before `current` is
    /// reclaimable.
    head: *mut VoiceChange,
    /// Last appended node.
    tail: *mut VoiceChange,
    free: Vec<Box<VoiceChange>>,
}

// SAFETY: the raw pointers are only dereferenced under the queue's
// protocol (control side under the mutex, mixer side read-only forward
// walking).
unsafe impl Send for QueueInner {}

/// Singly-linked voice-change hand-off: control appends pre-allocated
/// records, the mixer walks and publishes its progress through `current`.
/// Consumed records are recycled by the control side on the next append.
pub struct VoiceChangeQueue {
    /// Last record the mixer processed.
    current: AtomicPtr<VoiceChange>,
    inner: Mutex<QueueInner>,
}

impl VoiceChangeQueue {
    pub fn new() -> Self {
        let sentinel = Box::into_raw(VoiceChange::sentinel());
        Self {
            current: AtomicPtr::new(sentinel),
            inner: Mutex::new(QueueInner { head: sentinel, tail: sentinel, free: Vec::new() }),
        }
    }

    /// Control side: append a change record.
    pub fn publish(
        &self,
        state: VChangeState,
        voice: Option<usize>,
        old_voice: Option<usize>,
        source_id: u32,
    ) {
        let mut inner = self.inner.lock();

        // Reclaim records the mixer has moved past.
        let current = self.current.load(Ordering::Acquire);
        while inner.head != current {
            // SAFETY: nodes before `current` are no longer read by the
            // mixer, and we allocated them.
            let node = unsafe { Box::from_raw(inner.head) };
            inner.head = node.next.load(Ordering::Relaxed);
            inner.free.push(node);
        }

        let mut node = inner.free.pop().unwrap_or_else(VoiceChange::sentinel);
        node.state = state;
        node.voice = voice;
        node.old_voice = old_voice;
        node.source_id = source_id;
        node.next.store(ptr::null_mut(), Ordering::Relaxed);

        let node_ptr = Box::into_raw(node);
        // SAFETY: tail is a live node we own; linking releases the new
        // record to the mixer.
        unsafe { (*inner.tail).next.store(node_ptr, Ordering::Release) };
        inner.tail = node_ptr;
    }

    fn current_ptr(&self) -> *mut VoiceChange {
        self.current.load(Ordering::Acquire)
    }
}

impl Default for VoiceChangeQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for VoiceChangeQueue {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        let mut node = inner.head;
        while !node.is_null() {
            // SAFETY: sole owner at drop time.
            let boxed = unsafe { Box::from_raw(node) };
            node = boxed.next.load(Ordering::Relaxed);
        }
    }
}

/// Context state shared with control threads.
pub struct ContextShared {
    pub update: UpdateSlot<ContextProps>,
    pub free_context_props: FreeList<ContextProps>,
    pub free_voice_props: FreeList<VoiceProps>,
    pub free_slot_props: FreeList<EffectSlotProps>,
    pub events: EventChannel,
    pub vchange: VoiceChangeQueue,
    /// Auxiliary sends the owning device offers to voices.
    pub num_sends: usize,
    /// Control-side mirror of the slot target graph; publications that
    /// would close a cycle are rejected against it before the mixer ever
    /// sees them.
    slot_targets: Mutex<Vec<Option<usize>>>,
    /// Applied on top of the published listener gain.
    pub gain_boost: f32,
    /// Defer property application while a batch is staged.
    pub hold_updates: AtomicBool,
    /// Odd while an update pass runs; readers can detect torn views.
    pub update_count: AtomicU64,
    pub stop_voices_on_disconnect: AtomicBool,
    /// Cleared when the device disconnects.
    pub connected: AtomicBool,
}

impl ContextShared {
    pub fn new(event_capacity: usize, num_sends: usize) -> Arc<Self> {
        Arc::new(Self {
            update: UpdateSlot::new(),
            free_context_props: FreeList::new(),
            free_voice_props: FreeList::new(),
            free_slot_props: FreeList::new(),
            events: EventChannel::new(event_capacity),
            vchange: VoiceChangeQueue::new(),
            num_sends,
            slot_targets: Mutex::new(Vec::new()),
            gain_boost: 1.0,
            hold_updates: AtomicBool::new(false),
            update_count: AtomicU64::new(0),
            stop_voices_on_disconnect: AtomicBool::new(true),
            connected: AtomicBool::new(true),
        })
    }

    /// Control helper: publish a voice property update. Sends beyond what
    /// the device offers are rejected.
    pub fn publish_voice_props(
        &self,
        voice: &crate::voice::VoiceShared,
        props: VoiceProps,
    ) -> Result<(), CoreError> {
        for (i, send) in props.send.iter().enumerate() {
            if send.slot.is_some() && i >= self.num_sends {
                return Err(CoreError::SendIndex(i, self.num_sends));
            }
        }

        let node = match self.free_voice_props.pop() {
            Some(mut node) => {
                node.value = props;
                node
            }
            None => crate::lockfree::PropNode::new(props),
        };
        voice.update.publish(node, &self.free_voice_props);
        Ok(())
    }

    /// Control helper: publish a listener update.
    pub fn publish_context_props(&self, props: ContextProps) {
        let node = match self.free_context_props.pop() {
            Some(mut node) => {
                node.value = props;
                node
            }
            None => crate::lockfree::PropNode::new(props),
        };
        self.update.publish(node, &self.free_context_props);
    }

    /// Control helper: publish an effect-slot update. Targets that would
    /// make the slot feed itself, directly or through other slots, are
    /// rejected; the slot forest stays a DAG for the mixer's sort.
    pub fn publish_slot_props(
        &self,
        slot_idx: usize,
        slot: &crate::slot::SlotShared,
        props: EffectSlotProps,
    ) -> Result<(), CoreError> {
        let mut targets = self.slot_targets.lock();
        if slot_idx >= targets.len() {
            targets.resize(slot_idx + 1, None);
        }

        // Walk from the proposed target toward the roots; reaching this
        // slot again closes a loop.
        let mut cur = props.target;
        let mut hops = 0usize;
        while let Some(t) = cur {
            if t == slot_idx {
                return Err(CoreError::SlotCycle);
            }
            cur = targets.get(t).copied().flatten();
            hops += 1;
            if hops > targets.len() {
                return Err(CoreError::SlotCycle);
            }
        }
        targets[slot_idx] = props.target;
        drop(targets);

        let node = match self.free_slot_props.pop() {
            Some(mut node) => {
                node.value = props;
                node
            }
            None => crate::lockfree::PropNode::new(props),
        };
        slot.update.publish(node, &self.free_slot_props);
        Ok(())
    }
}

/// The mixer-side context.
pub struct Context {
    pub shared: Arc<ContextShared>,
    pub params: ContextParams,
    pub voices: Vec<Voice>,
    pub slots: Vec<EffectSlot>,
    sorted_slots: Vec<usize>,
    slots_need_sort: bool,
}

impl Context {
    pub fn new(event_capacity: usize, num_sends: usize) -> Self {
        Self {
            shared: ContextShared::new(event_capacity, num_sends),
            params: ContextParams::default(),
            voices: Vec::new(),
            slots: Vec::new(),
            sorted_slots: Vec::new(),
            slots_need_sort: true,
        }
    }

    /// Register an effect slot, mirroring its target in the shared graph
    /// the cycle check runs against. Returns the slot's index.
    pub fn add_slot(&mut self, slot: EffectSlot) -> usize {
        self.shared.slot_targets.lock().push(slot.target);
        self.slots.push(slot);
        self.slots_need_sort = true;
        self.slots.len() - 1
    }

    /// Drain the voice-change queue, applying state transitions.
    pub fn process_voice_changes(&mut self) {
        let mut cur = self.shared.vchange.current_ptr();
        // SAFETY: `current` always points at a live node; nodes ahead of
        // it stay allocated until the mixer publishes its progress.
        let mut next = unsafe { (*cur).next.load(Ordering::Acquire) };
        if next.is_null() {
            return;
        }

        let enabled = self.shared.events.enabled();
        while !next.is_null() {
            cur = next;
            // SAFETY: see above.
            let change = unsafe { &*cur };

            let mut sendevt = false;
            match change.state {
                VChangeState::Reset | VChangeState::Stop => {
                    if let Some(vi) = change.voice {
                        let v = &self.voices[vi].shared;
                        v.current_buffer.store(ptr::null_mut(), Ordering::Relaxed);
                        v.loop_buffer.store(ptr::null_mut(), Ordering::Relaxed);
                        // A non-zero source ID means it was playing or
                        // paused, which gets an event.
                        sendevt = v.source_id.swap(0, Ordering::Relaxed) != 0;
                        let _ = cas_play_state(
                            &v.play_state,
                            PlayState::Playing,
                            PlayState::Stopping,
                        );
                        v.pending_change.store(false, Ordering::Release);
                    }
                    // Reset events always fire, even with no voice.
                    sendevt |= change.state == VChangeState::Reset;
                }
                VChangeState::Pause => {
                    if let Some(vi) = change.voice {
                        let v = &self.voices[vi].shared;
                        sendevt = cas_play_state(
                            &v.play_state,
                            PlayState::Playing,
                            PlayState::Stopping,
                        )
                        .is_ok();
                    }
                }
                VChangeState::Play => {
                    // An event fires if there's no old voice to stop, or
                    // if the old voice already stopped on its own.
                    if let Some(ovi) = change.old_voice {
                        let old = &self.voices[ovi].shared;
                        old.current_buffer.store(ptr::null_mut(), Ordering::Relaxed);
                        old.loop_buffer.store(ptr::null_mut(), Ordering::Relaxed);
                        old.source_id.store(0, Ordering::Relaxed);
                        sendevt = cas_play_state(
                            &old.play_state,
                            PlayState::Playing,
                            PlayState::Stopping,
                        )
                        .is_err();
                        old.pending_change.store(false, Ordering::Release);
                    } else {
                        sendevt = true;
                    }
                    if let Some(vi) = change.voice {
                        self.voices[vi].shared.set_play_state(PlayState::Playing);
                    }
                }
                VChangeState::Restart => {
                    // Restarting never sends a state event.
                    if let Some(ovi) = change.old_voice {
                        let old = &self.voices[ovi].shared;
                        old.current_buffer.store(ptr::null_mut(), Ordering::Relaxed);
                        old.loop_buffer.store(ptr::null_mut(), Ordering::Relaxed);
                        // No source ID means the old voice finished; don't
                        // start the new one at its offset.
                        if old.source_id.swap(0, Ordering::Relaxed) != 0 {
                            let was_playing = cas_play_state(
                                &old.play_state,
                                PlayState::Playing,
                                PlayState::Stopping,
                            )
                            .is_ok();
                            if let Some(vi) = change.voice {
                                self.voices[vi].shared.set_play_state(if was_playing {
                                    PlayState::Playing
                                } else {
                                    PlayState::Stopped
                                });
                            }
                        }
                        old.pending_change.store(false, Ordering::Release);
                    }
                }
            }

            if sendevt && (enabled & EVT_SOURCE_STATE) != 0 {
                let state = match change.state {
                    VChangeState::Reset => AsyncSrcState::Reset,
                    VChangeState::Stop => AsyncSrcState::Stop,
                    VChangeState::Play => AsyncSrcState::Play,
                    VChangeState::Pause => AsyncSrcState::Pause,
                    VChangeState::Restart => AsyncSrcState::Reset,
                };
                self.shared
                    .events
                    .post(AsyncEvent::SourceState { id: change.source_id, state });
            }

            next = change.next.load(Ordering::Acquire);
        }
        self.shared.vchange.current.store(cur, Ordering::Release);
    }

    /// Apply pending property updates for the context and everything on
    /// it.
    fn process_param_updates(&mut self, dev: &DeviceParams) {
        self.process_voice_changes();

        self.shared.update_count.fetch_add(1, Ordering::AcqRel);
        if !self.shared.hold_updates.load(Ordering::Acquire) {
            let mut force = calc_context_params(&self.shared, &mut self.params);
            for idx in 0..self.slots.len() {
                force |= calc_effect_slot_params(
                    idx,
                    &mut self.slots,
                    &mut self.slots_need_sort,
                    &self.shared,
                    dev.sample_rate,
                );
            }

            let slots = &self.slots;
            for voice in self.voices.iter_mut() {
                // Only voices with a source get updates.
                if voice.shared.source_id.load(Ordering::Relaxed) != 0 {
                    calc_source_params(voice, &self.shared, &self.params, slots, dev, force);
                }
            }
        }
        self.shared.update_count.fetch_add(1, Ordering::AcqRel);
    }

    /// One block: updates, wet-bus clear, voice mixing, effect
    /// processing, event signaling.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn process(
        &mut self,
        dev: &DeviceParams,
        dry_buffer: &mut [sf_core::BufferLine],
        real_buffer: &mut [sf_core::BufferLine],
        scratch: &mut crate::device::MixerScratch,
        mut hrtf: Option<&mut crate::device::HrtfMixState>,
        nfc_chan_counts: [usize; MAX_AMBI_ORDER + 1],
        device_time_ns: u64,
        samples_to_do: usize,
    ) {
        self.process_param_updates(dev);

        // Clear the wet buses.
        for slot in self.slots.iter_mut() {
            for line in slot.wet.buffer.iter_mut() {
                line.fill(0.0);
            }
        }

        // Mix voices with a playing source.
        for voice in self.voices.iter_mut() {
            let vstate = voice.shared.play_state();
            if vstate != PlayState::Stopped && vstate != PlayState::Pending {
                let mut env = MixEnv {
                    dry_buffer: &mut *dry_buffer,
                    real_buffer: &mut *real_buffer,
                    slots: &mut self.slots,
                    scratch: &mut *scratch,
                    hrtf: hrtf.as_deref_mut(),
                    num_sends: dev.num_sends,
                    sample_rate: dev.sample_rate,
                    nfc_chan_counts,
                };
                voice.mix(vstate, &self.shared, device_time_ns, samples_to_do, &mut env);
            }
        }

        // Process effects in dependency order.
        if !self.slots.is_empty() {
            if self.slots_need_sort || self.sorted_slots.len() != self.slots.len() {
                sort_slot_order(&self.slots, &mut self.sorted_slots);
                self.slots_need_sort = false;
            }

            for pos in 0..self.sorted_slots.len() {
                let idx = self.sorted_slots[pos];
                let Some(mut state) = self.slots[idx].state.take() else { continue };
                let target = self.slots[idx].target;

                match target {
                    Some(t) if t != idx => {
                        let (src_wet, dst_wet) = if idx < t {
                            let (left, right) = self.slots.split_at_mut(t);
                            (&left[idx].wet, &mut right[0].wet)
                        } else {
                            let (left, right) = self.slots.split_at_mut(idx);
                            (&right[0].wet, &mut left[t].wet)
                        };
                        let mut out =
                            EffectTarget { main: &mut dst_wet.buffer, real_out: None };
                        state.process(samples_to_do, &src_wet.buffer, &mut out);
                    }
                    _ => {
                        let wet = &self.slots[idx].wet;
                        let mut out = EffectTarget {
                            main: &mut *dry_buffer,
                            real_out: Some(&mut *real_buffer),
                        };
                        state.process(samples_to_do, &wet.buffer, &mut out);
                    }
                }

                self.slots[idx].state = Some(state);
            }
        }

        // Wake the event handler if anything was posted.
        self.shared.events.signal();
    }

    /// Invalidate the sorted order (a slot target changed externally).
    pub fn invalidate_slot_order(&mut self) {
        self.slots_need_sort = true;
    }
}

fn cas_play_state(
    state: &AtomicU8,
    expect: PlayState,
    replace: PlayState,
) -> Result<u8, u8> {
    state.compare_exchange(
        expect as u8,
        replace as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_change_queue_roundtrip() {
        let queue = VoiceChangeQueue::new();
        queue.publish(VChangeState::Play, Some(0), None, 7);
        queue.publish(VChangeState::Stop, Some(0), None, 7);

        // Walk like the mixer.
        let mut cur = queue.current_ptr();
        let mut seen = Vec::new();
        loop {
            let next = unsafe { (*cur).next.load(Ordering::Acquire) };
            if next.is_null() {
                break;
            }
            cur = next;
            seen.push(unsafe { (*cur).state });
        }
        queue.current.store(cur, Ordering::Release);

        assert_eq!(seen, vec![VChangeState::Play, VChangeState::Stop]);

        // A later publish reclaims the consumed nodes.
        queue.publish(VChangeState::Pause, Some(0), None, 7);
        let free_len = queue.inner.lock().free.len();
        assert!(free_len >= 1, "consumed nodes should be recycled");
    }

    #[test]
    fn test_play_change_starts_voice() {
        let mut ctx = Context::new(16, 2);
        ctx.voices.push(Voice::new());
        ctx.voices[0].shared.source_id.store(42, Ordering::Relaxed);
        ctx.shared.events.set_enabled(EVT_SOURCE_STATE);

        ctx.shared.vchange.publish(VChangeState::Play, Some(0), None, 42);
        ctx.process_voice_changes();

        assert_eq!(ctx.voices[0].shared.play_state(), PlayState::Playing);
        let evt = ctx.shared.events.pop().expect("play event");
        assert!(format!("{evt:?}").contains("Play"));
    }

    #[test]
    fn test_pause_only_events_on_transition() {
        let mut ctx = Context::new(16, 2);
        ctx.voices.push(Voice::new());
        ctx.shared.events.set_enabled(EVT_SOURCE_STATE);

        // Voice is stopped; pausing it changes nothing and sends nothing.
        ctx.shared.vchange.publish(VChangeState::Pause, Some(0), None, 9);
        ctx.process_voice_changes();
        assert!(ctx.shared.events.pop().is_none());

        ctx.voices[0].shared.set_play_state(PlayState::Playing);
        ctx.shared.vchange.publish(VChangeState::Pause, Some(0), None, 9);
        ctx.process_voice_changes();
        assert_eq!(ctx.voices[0].shared.play_state(), PlayState::Stopping);
        assert!(ctx.shared.events.pop().is_some());
    }

    #[test]
    fn test_reset_always_events() {
        let mut ctx = Context::new(16, 2);
        ctx.shared.events.set_enabled(EVT_SOURCE_STATE);
        ctx.shared.vchange.publish(VChangeState::Reset, None, None, 5);
        ctx.process_voice_changes();
        let evt = ctx.shared.events.pop().expect("reset event fires without a voice");
        assert!(format!("{evt:?}").contains("Reset"));
    }

    #[test]
    fn test_slot_cycles_rejected() {
        let mut ctx = Context::new(16, 2);
        let a = ctx.add_slot(EffectSlot::new(1, false));
        let b = ctx.add_slot(EffectSlot::new(1, false));
        let shared_a = ctx.slots[a].shared.clone();
        let shared_b = ctx.slots[b].shared.clone();

        // Self-loops never reach the mixer.
        let err = ctx.shared.publish_slot_props(
            a,
            &shared_a,
            EffectSlotProps { target: Some(a), ..Default::default() },
        );
        assert!(matches!(err, Err(CoreError::SlotCycle)));

        // A feeds B; closing B back onto A is rejected.
        ctx.shared
            .publish_slot_props(
                a,
                &shared_a,
                EffectSlotProps { target: Some(b), ..Default::default() },
            )
            .expect("chain target accepted");
        let err = ctx.shared.publish_slot_props(
            b,
            &shared_b,
            EffectSlotProps { target: Some(a), ..Default::default() },
        );
        assert!(matches!(err, Err(CoreError::SlotCycle)));

        // Clearing the target stays fine.
        ctx.shared
            .publish_slot_props(b, &shared_b, EffectSlotProps::default())
            .expect("root target accepted");
    }

    #[test]
    fn test_send_index_out_of_range_rejected() {
        let shared = ContextShared::new(8, 1);
        let voice = crate::voice::VoiceShared::new();

        let mut props = VoiceProps::default();
        props.send[1].slot = Some(0);
        let err = shared.publish_voice_props(&voice, props);
        assert!(matches!(err, Err(CoreError::SendIndex(1, 1))));

        // Sends within range publish normally.
        let mut props = VoiceProps::default();
        props.send[0].slot = Some(0);
        shared.publish_voice_props(&voice, props).expect("send 0 accepted");
    }
}
