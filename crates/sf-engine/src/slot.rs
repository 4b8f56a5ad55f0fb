//! Auxiliary effect slots and the effect-state contract
//!
//! Effect implementations live elsewhere; the mixer only drives their
//! `update`/`process` pair. Slots form a forest: a slot either feeds
//! another slot's wet bus or, with no target, the device dry mix. The
//! companion sorted order guarantees producers process before whatever
//! consumes them.

use std::sync::Arc;

use sf_core::{BufferLine, BUFFER_LINE_SIZE};
use sf_spatial::AmbiChanMap;

use crate::lockfree::UpdateSlot;
use crate::props::EffectSlotProps;

/// Where a slot's processed output goes.
pub struct EffectTarget<'a> {
    /// Main output lines (another slot's wet bus, or the device dry bus).
    pub main: &'a mut [BufferLine],
    /// The device's real outputs, present only for root slots.
    pub real_out: Option<&'a mut [BufferLine]>,
}

/// The capability set the mixer drives on an effect.
pub trait EffectState: Send {
    /// Recompute internal parameters after a slot update.
    fn update(&mut self, sample_rate: u32, props: &EffectProps, slot_gain: f32);

    /// Process one block: read the slot's wet input, write the target.
    fn process(&mut self, samples_to_do: usize, input: &[BufferLine], output: &mut EffectTarget);
}

/// Reverb settings the mixer inspects for distance-based send decay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbProps {
    pub room_rolloff_factor: f32,
    pub decay_time: f32,
    pub decay_lf_ratio: f32,
    pub decay_hf_ratio: f32,
    pub decay_hf_limit: bool,
    pub air_absorption_gain_hf: f32,
}

impl Default for ReverbProps {
    fn default() -> Self {
        Self {
            room_rolloff_factor: 0.0,
            decay_time: 1.49,
            decay_lf_ratio: 1.0,
            decay_hf_ratio: 0.83,
            decay_hf_limit: true,
            air_absorption_gain_hf: 0.994,
        }
    }
}

/// Tagged effect parameters. The core only ever looks inside the reverb
/// variant; everything else is opaque payload for the effect state.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EffectProps {
    #[default]
    None,
    Reverb(ReverbProps),
    /// Some other effect the core doesn't introspect.
    Other,
}

/// The slot state shared with control threads.
pub struct SlotShared {
    pub update: UpdateSlot<EffectSlotProps>,
}

impl SlotShared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { update: UpdateSlot::new() })
    }
}

/// A wet mixing bus.
pub struct WetBus {
    pub amap: AmbiChanMap,
    pub buffer: Vec<BufferLine>,
}

impl WetBus {
    pub fn new(order: usize, horizontal_only: bool) -> Self {
        let amap = if horizontal_only {
            AmbiChanMap::full_2d(order)
        } else {
            AmbiChanMap::full_3d(order)
        };
        let buffer = vec![[0.0; BUFFER_LINE_SIZE]; amap.count];
        Self { amap, buffer }
    }
}

/// Mixer-side effect slot state.
pub struct EffectSlot {
    pub shared: Arc<SlotShared>,
    pub gain: f32,
    pub aux_send_auto: bool,
    /// Index of the slot this one feeds; None feeds the dry mix.
    pub target: Option<usize>,
    pub props: EffectProps,

    // Reverb-derived attributes for the wet-path distance laws.
    pub room_rolloff: f32,
    pub decay_time: f32,
    pub decay_lf_ratio: f32,
    pub decay_hf_ratio: f32,
    pub decay_hf_limit: bool,
    pub air_absorption_gain_hf: f32,

    pub wet: WetBus,
    pub state: Option<Box<dyn EffectState>>,
}

impl EffectSlot {
    pub fn new(order: usize, horizontal_only: bool) -> Self {
        Self {
            shared: SlotShared::new(),
            gain: 1.0,
            aux_send_auto: true,
            target: None,
            props: EffectProps::None,
            room_rolloff: 0.0,
            decay_time: 0.0,
            decay_lf_ratio: 0.0,
            decay_hf_ratio: 0.0,
            decay_hf_limit: false,
            air_absorption_gain_hf: 1.0,
            wet: WetBus::new(order, horizontal_only),
            state: None,
        }
    }

    /// Whether the slot currently hosts an effect.
    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }
}

/// Rebuild the processing order: producers first, all untargeted (root)
/// slots last. Orphans that target nothing reachable stay at the front
/// and still process, harmlessly feeding their own unused wet bus.
pub fn sort_slot_order(slots: &[EffectSlot], sorted: &mut Vec<usize>) {
    sorted.clear();

    // Partition so untargeted slots go to the back, preserving the
    // reversed iteration the repeated partitions below expect.
    for idx in (0..slots.len()).rev() {
        if slots[idx].target.is_some() {
            sorted.push(idx);
        }
    }
    let mut split_point = sorted.len();
    for idx in 0..slots.len() {
        if slots[idx].target.is_none() {
            sorted.push(idx);
        }
    }

    // Walk targets from the back: everything directly feeding the current
    // back element moves immediately before it.
    let mut next_target = sorted.len();
    while split_point > 1 {
        if next_target == split_point {
            // Remaining slots target nothing sorted; leave them in front.
            break;
        }
        next_target -= 1;
        let target_idx = sorted[next_target];

        // In-place partition of the prefix: non-feeders first.
        let mut i = 0;
        let mut last = split_point;
        while i < last {
            if slots[sorted[i]].target != Some(target_idx) {
                i += 1;
            } else {
                last -= 1;
                sorted.swap(i, last);
            }
        }
        split_point = i;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot_with_target(target: Option<usize>) -> EffectSlot {
        let mut slot = EffectSlot::new(1, false);
        slot.target = target;
        slot
    }

    fn positions(sorted: &[usize]) -> std::collections::HashMap<usize, usize> {
        sorted.iter().enumerate().map(|(pos, &idx)| (idx, pos)).collect()
    }

    #[test]
    fn test_sort_chain() {
        // 0 -> 1 -> 2 (root).
        let slots = vec![
            slot_with_target(Some(1)),
            slot_with_target(Some(2)),
            slot_with_target(None),
        ];
        let mut sorted = Vec::new();
        sort_slot_order(&slots, &mut sorted);

        let pos = positions(&sorted);
        assert!(pos[&0] < pos[&1]);
        assert!(pos[&1] < pos[&2]);
    }

    #[test]
    fn test_roots_last() {
        let slots = vec![
            slot_with_target(None),
            slot_with_target(Some(0)),
            slot_with_target(None),
            slot_with_target(Some(2)),
        ];
        let mut sorted = Vec::new();
        sort_slot_order(&slots, &mut sorted);

        let pos = positions(&sorted);
        assert!(pos[&1] < pos[&0]);
        assert!(pos[&3] < pos[&2]);
        // Both roots occupy the last two positions.
        assert!(pos[&0] >= 2 && pos[&2] >= 2);
    }

    #[test]
    fn test_sort_diamond() {
        // 0 and 1 both feed 2; 2 feeds root 3.
        let slots = vec![
            slot_with_target(Some(2)),
            slot_with_target(Some(2)),
            slot_with_target(Some(3)),
            slot_with_target(None),
        ];
        let mut sorted = Vec::new();
        sort_slot_order(&slots, &mut sorted);

        let pos = positions(&sorted);
        assert!(pos[&0] < pos[&2]);
        assert!(pos[&1] < pos[&2]);
        assert!(pos[&2] < pos[&3]);
    }
}
