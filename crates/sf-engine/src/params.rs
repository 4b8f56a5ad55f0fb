//! Per-update parameter recomputation
//!
//! Runs on the mixer thread at the top of each block, after pending
//! property objects are swapped in: listener-space transforms, distance
//! and cone attenuation, doppler pitch, air absorption, and finally the
//! panning/filter targets every mix path fades toward.

use sf_core::{
    DistanceModel, FmtChannels, RenderMode, SpatializeMode, Channel, GAIN_MIX_MAX,
    MAX_AMBI_CHANNELS, MAX_OUTPUT_CHANNELS, MAX_PITCH, MAX_SEND_COUNT, MIXER_FRAC_BITS,
    MIXER_FRAC_ONE, REVERB_DECAY_GAIN, SPEED_OF_SOUND_METERS_PER_SEC,
};
use sf_core::channels::InputRemixMap;
use sf_core::INVALID_CHANNEL_INDEX;
use sf_dsp::biquad::{BiquadType, FilterMode};
use sf_spatial::ambidefs::{layout_map, upsampler_for, AmbiChanMap};
use sf_spatial::panning::{
    calc_direction_coeffs, compute_pan_gains, scale_azimuth_front3, scale_azimuth_front3_2,
};
use sf_spatial::rotator::{ambi_rotator, base_rotation, upsample_transform, AmbiRotateMatrix};
use sf_spatial::{HrtfStore, Mat3, Vec3};

use crate::context::{ContextParams, ContextShared};
use crate::events::AsyncEvent;
use crate::props::DirectMode;
use crate::slot::{EffectProps, EffectSlot};
use crate::voice::{DirectOutTarget, GainTriplet, Voice};

/// The device state parameter calculation reads.
pub struct DeviceParams<'a> {
    pub sample_rate: u32,
    pub num_sends: usize,
    pub render_mode: RenderMode,
    pub avg_speaker_dist: f32,
    pub ambi_order: usize,
    pub m2d: bool,
    pub dry_map: &'a AmbiChanMap,
    /// Real-output index per channel name.
    pub channel_index: &'a [u8; MAX_OUTPUT_CHANNELS],
    pub remix_map: &'a [InputRemixMap],
    pub hrtf: Option<&'a HrtfStore>,
    /// The dry bus aliases the real output (no ambisonic decode stage).
    pub dry_is_real: bool,
}

struct ChanPosMap {
    channel: Channel,
    pos: [f32; 3],
}

const SIN30: f32 = 0.5;
const COS30: f32 = 0.866025403785;
const SIN45: f32 = std::f32::consts::FRAC_1_SQRT_2;
const COS45: f32 = std::f32::consts::FRAC_1_SQRT_2;
const SIN110: f32 = 0.939692620786;
const COS110: f32 = -0.342020143326;

const MONO_MAP: [ChanPosMap; 1] =
    [ChanPosMap { channel: Channel::FrontCenter, pos: [0.0, 0.0, -1.0] }];
const REAR_MAP: [ChanPosMap; 2] = [
    ChanPosMap { channel: Channel::BackLeft, pos: [-SIN30, 0.0, COS30] },
    ChanPosMap { channel: Channel::BackRight, pos: [SIN30, 0.0, COS30] },
];
const QUAD_MAP: [ChanPosMap; 4] = [
    ChanPosMap { channel: Channel::FrontLeft, pos: [-SIN45, 0.0, -COS45] },
    ChanPosMap { channel: Channel::FrontRight, pos: [SIN45, 0.0, -COS45] },
    ChanPosMap { channel: Channel::BackLeft, pos: [-SIN45, 0.0, COS45] },
    ChanPosMap { channel: Channel::BackRight, pos: [SIN45, 0.0, COS45] },
];
const X51_MAP: [ChanPosMap; 6] = [
    ChanPosMap { channel: Channel::FrontLeft, pos: [-SIN30, 0.0, -COS30] },
    ChanPosMap { channel: Channel::FrontRight, pos: [SIN30, 0.0, -COS30] },
    ChanPosMap { channel: Channel::FrontCenter, pos: [0.0, 0.0, -1.0] },
    ChanPosMap { channel: Channel::Lfe, pos: [0.0, 0.0, 0.0] },
    ChanPosMap { channel: Channel::SideLeft, pos: [-SIN110, 0.0, -COS110] },
    ChanPosMap { channel: Channel::SideRight, pos: [SIN110, 0.0, -COS110] },
];
const X61_MAP: [ChanPosMap; 7] = [
    ChanPosMap { channel: Channel::FrontLeft, pos: [-SIN30, 0.0, -COS30] },
    ChanPosMap { channel: Channel::FrontRight, pos: [SIN30, 0.0, -COS30] },
    ChanPosMap { channel: Channel::FrontCenter, pos: [0.0, 0.0, -1.0] },
    ChanPosMap { channel: Channel::Lfe, pos: [0.0, 0.0, 0.0] },
    ChanPosMap { channel: Channel::BackCenter, pos: [0.0, 0.0, 1.0] },
    ChanPosMap { channel: Channel::SideLeft, pos: [-1.0, 0.0, 0.0] },
    ChanPosMap { channel: Channel::SideRight, pos: [1.0, 0.0, 0.0] },
];
const X71_MAP: [ChanPosMap; 8] = [
    ChanPosMap { channel: Channel::FrontLeft, pos: [-SIN30, 0.0, -COS30] },
    ChanPosMap { channel: Channel::FrontRight, pos: [SIN30, 0.0, -COS30] },
    ChanPosMap { channel: Channel::FrontCenter, pos: [0.0, 0.0, -1.0] },
    ChanPosMap { channel: Channel::Lfe, pos: [0.0, 0.0, 0.0] },
    ChanPosMap { channel: Channel::BackLeft, pos: [-SIN30, 0.0, COS30] },
    ChanPosMap { channel: Channel::BackRight, pos: [SIN30, 0.0, COS30] },
    ChanPosMap { channel: Channel::SideLeft, pos: [-1.0, 0.0, 0.0] },
    ChanPosMap { channel: Channel::SideRight, pos: [1.0, 0.0, 0.0] },
];

/// Apply a pending listener update. Returns true if one was applied, which
/// forces source updates this block.
pub fn calc_context_params(ctx: &ContextShared, params: &mut ContextParams) -> bool {
    let Some(node) = ctx.update.take() else { return false };
    let props = &node.value;

    params.position = Vec3::from_array(props.position);

    let mut n = Vec3::from_array(props.orient_at);
    n.normalize();
    let mut v = Vec3::from_array(props.orient_up);
    v.normalize();
    let mut u = n.cross(v);
    u.normalize();

    params.matrix = Mat3::from_basis(u, v, n);
    params.velocity = params.matrix.mul_vec(Vec3::from_array(props.velocity));

    params.gain = props.gain * ctx.gain_boost;
    params.meters_per_unit = props.meters_per_unit;
    params.air_absorption_gain_hf = props.air_absorption_gain_hf;

    params.doppler_factor = props.doppler_factor;
    params.speed_of_sound = props.speed_of_sound * props.doppler_velocity;

    params.source_distance_model = props.source_distance_model;
    params.distance_model = props.distance_model;

    ctx.free_context_props.push(node);
    true
}

/// Apply a pending effect-slot update. Returns true if one was applied.
/// A changed target invalidates the sorted slot order.
pub fn calc_effect_slot_params(
    slot_idx: usize,
    slots: &mut [EffectSlot],
    need_sort: &mut bool,
    ctx: &ContextShared,
    sample_rate: u32,
) -> bool {
    let shared = slots[slot_idx].shared.clone();
    let Some(mut node) = shared.update.take() else { return false };
    let slot = &mut slots[slot_idx];
    let props = &mut node.value;

    if slot.target != props.target {
        *need_sort = true;
    }
    slot.gain = props.gain;
    slot.aux_send_auto = props.aux_send_auto;
    slot.target = props.target;
    slot.props = props.props.clone();

    slot.room_rolloff = 0.0;
    slot.decay_time = 0.0;
    slot.decay_lf_ratio = 0.0;
    slot.decay_hf_ratio = 0.0;
    slot.decay_hf_limit = false;
    slot.air_absorption_gain_hf = 1.0;
    if let EffectProps::Reverb(reverb) = &slot.props {
        slot.room_rolloff = reverb.room_rolloff_factor;
        slot.air_absorption_gain_hf = reverb.air_absorption_gain_hf;
        // Without Auxiliary Send Auto, skip the automatic send adjustments
        // based on source distance.
        if slot.aux_send_auto {
            slot.decay_time = reverb.decay_time;
            slot.decay_lf_ratio = reverb.decay_lf_ratio;
            slot.decay_hf_ratio = reverb.decay_hf_ratio;
            slot.decay_hf_limit = reverb.decay_hf_limit;
        }
    }

    if let Some(new_state) = props.state.take() {
        if let Some(old_state) = slot.state.replace(new_state) {
            // The mixer must never free an effect state. Hand it to the
            // control thread; with the queue full, park it back in the
            // retired property object where a later publication path
            // eventually cleans it up.
            if let Err(AsyncEvent::EffectRelease { state }) =
                ctx.events.try_post(AsyncEvent::EffectRelease { state: old_state })
            {
                props.state = Some(state);
            }
        }
    }

    if let Some(state) = slot.state.as_mut() {
        state.update(sample_rate, &slot.props, slot.gain);
    }

    ctx.free_slot_props.push(node);
    true
}

/// Apply a pending voice update (or recompute with existing properties
/// when `force` is set), deriving all mixing parameters.
pub fn calc_source_params(
    voice: &mut Voice,
    ctx: &ContextShared,
    ctx_params: &ContextParams,
    slots: &[EffectSlot],
    dev: &DeviceParams,
    force: bool,
) {
    if let Some(node) = voice.shared.clone().update.take() {
        voice.props = node.value.clone();
        ctx.free_voice_props.push(node);
    } else if !force {
        return;
    }

    let props = &voice.props;
    let ismono3d = voice.fmt_channels == FmtChannels::Mono && !props.panning_enabled;
    let use_direct = props.direct_channels != DirectMode::Off
        && !ismono3d
        && !voice.fmt_channels.is_ambisonic();
    if use_direct
        || props.spatialize_mode == SpatializeMode::Off
        || (props.spatialize_mode == SpatializeMode::Auto && !ismono3d)
    {
        calc_non_attn_source_params(voice, ctx_params, slots, dev);
    } else {
        calc_attn_source_params(voice, ctx_params, slots, dev);
    }
}

fn resolve_send_slots(
    voice: &mut Voice,
    slots: &[EffectSlot],
    num_sends: usize,
) -> [Option<usize>; MAX_SEND_COUNT] {
    let mut send_slots = [None; MAX_SEND_COUNT];
    for i in 0..num_sends {
        let slot = voice.props.send[i].slot.filter(|&idx| {
            idx < slots.len() && slots[idx].is_active()
        });
        send_slots[i] = slot;
        voice.sends[i].slot = slot;
    }
    send_slots
}

fn compute_step(voice: &mut Voice, pitch: f32, sample_rate: u32) {
    let pitch = pitch * voice.frequency as f32 / sample_rate as f32;
    voice.step = if pitch > MAX_PITCH as f32 {
        MAX_PITCH << MIXER_FRAC_BITS
    } else {
        ((pitch * MIXER_FRAC_ONE as f32) as u32).max(1)
    };
    voice.resampler =
        sf_dsp::resample::prepare(voice.props.resampler, voice.step, &mut voice.resample_state);
}

fn calc_non_attn_source_params(
    voice: &mut Voice,
    ctx_params: &ContextParams,
    slots: &[EffectSlot],
    dev: &DeviceParams,
) {
    voice.direct.target = DirectOutTarget::Dry;
    let send_slots = resolve_send_slots(voice, slots, dev.num_sends);

    compute_step(voice, voice.props.pitch, dev.sample_rate);

    let props = &voice.props;
    let min_gain = props.min_gain.min(props.max_gain);
    let src_gain = props.gain.clamp(min_gain, props.max_gain);
    let dry_gain = GainTriplet {
        base: (src_gain * props.direct.gain * ctx_params.gain).min(GAIN_MIX_MAX),
        hf: props.direct.gain_hf,
        lf: props.direct.gain_lf,
    };

    let mut wet_gain = [GainTriplet::default(); MAX_SEND_COUNT];
    for (i, wg) in wet_gain.iter_mut().enumerate().take(dev.num_sends) {
        let send = &props.send[i];
        *wg = GainTriplet {
            base: (src_gain * send.gain * ctx_params.gain).min(GAIN_MIX_MAX),
            hf: send.gain_hf,
            lf: send.gain_lf,
        };
    }

    calc_panning_and_filters(
        voice,
        [0.0, 0.0, -1.0],
        0.0,
        0.0,
        dry_gain,
        &wet_gain,
        &send_slots,
        ctx_params,
        slots,
        dev,
    );
}

fn calc_attn_source_params(
    voice: &mut Voice,
    ctx_params: &ContextParams,
    slots: &[EffectSlot],
    dev: &DeviceParams,
) {
    let num_sends = dev.num_sends;
    voice.direct.target = DirectOutTarget::Dry;
    let send_slots = resolve_send_slots(voice, slots, num_sends);

    let props = voice.props.clone();

    // Room rolloff per send combines the source's and the slot's factors.
    let mut room_rolloff = [0.0f32; MAX_SEND_COUNT];
    for i in 0..num_sends {
        if let Some(si) = send_slots[i] {
            room_rolloff[i] = props.send[i].room_rolloff_factor + slots[si].room_rolloff;
        }
    }

    // Transform the source into listener space.
    let mut position = Vec3::from_array(props.position);
    let mut velocity = Vec3::from_array(props.velocity);
    let mut direction = Vec3::from_array(props.direction);
    if !props.head_relative {
        position = ctx_params.matrix.mul_vec(position - ctx_params.position);
        velocity = ctx_params.matrix.mul_vec(velocity);
        direction = ctx_params.matrix.mul_vec(direction);
    } else {
        // Offset the source velocity to be relative to the listener's.
        velocity += ctx_params.velocity;
    }

    let mut to_source = position;
    let distance = to_source.normalize();
    let directional = direction.normalize() > 0.0;

    let distance_model = if ctx_params.source_distance_model {
        props.distance_model
    } else {
        ctx_params.distance_model
    };

    let atten_distance = match distance_model {
        DistanceModel::InverseClamped
        | DistanceModel::LinearClamped
        | DistanceModel::ExponentClamped => {
            if props.ref_distance > props.max_distance {
                props.ref_distance
            } else {
                distance.clamp(props.ref_distance, props.max_distance)
            }
        }
        _ => distance,
    };

    let mut dry_gain = GainTriplet { base: props.gain, hf: 1.0, lf: 1.0 };
    let mut wet_gain = [GainTriplet { base: props.gain, hf: 1.0, lf: 1.0 }; MAX_SEND_COUNT];

    // Distance attenuation.
    let mut dry_attn_base = 1.0f32;
    match distance_model {
        DistanceModel::Inverse | DistanceModel::InverseClamped => {
            if props.ref_distance > 0.0 {
                let dist = sf_core::lerp(props.ref_distance, atten_distance, props.rolloff_factor);
                if dist > 0.0 {
                    dry_attn_base = props.ref_distance / dist;
                    dry_gain.base *= dry_attn_base;
                }
                for i in 0..num_sends {
                    let dist =
                        sf_core::lerp(props.ref_distance, atten_distance, room_rolloff[i]);
                    if dist > 0.0 {
                        wet_gain[i].base *= props.ref_distance / dist;
                    }
                }
            }
        }
        DistanceModel::Linear | DistanceModel::LinearClamped => {
            if props.max_distance != props.ref_distance {
                let scale = (atten_distance - props.ref_distance)
                    / (props.max_distance - props.ref_distance);
                dry_attn_base = (1.0 - scale * props.rolloff_factor).max(0.0);
                dry_gain.base *= dry_attn_base;
                for i in 0..num_sends {
                    wet_gain[i].base *= (1.0 - scale * room_rolloff[i]).max(0.0);
                }
            }
        }
        DistanceModel::Exponent | DistanceModel::ExponentClamped => {
            if atten_distance > 0.0 && props.ref_distance > 0.0 {
                let dist_ratio = atten_distance / props.ref_distance;
                dry_attn_base = dist_ratio.powf(-props.rolloff_factor);
                dry_gain.base *= dry_attn_base;
                for i in 0..num_sends {
                    wet_gain[i].base *= dist_ratio.powf(-room_rolloff[i]);
                }
            }
        }
        DistanceModel::Disable => {}
    }

    // Directional sound cones.
    let mut wet_cone = 1.0f32;
    let mut wet_cone_hf = 1.0f32;
    if directional && props.inner_angle < 360.0 {
        let angle = (-direction.dot(to_source)).clamp(-1.0, 1.0).acos().to_degrees()
            * 2.0
            * crate::cone_scale();

        let mut cone_gain = 1.0f32;
        let mut cone_hf = 1.0f32;
        if angle >= props.outer_angle {
            cone_gain = props.outer_gain;
            cone_hf = props.outer_gain_hf;
        } else if angle >= props.inner_angle {
            let scale = (angle - props.inner_angle) / (props.outer_angle - props.inner_angle);
            cone_gain = sf_core::lerp(1.0, props.outer_gain, scale);
            cone_hf = sf_core::lerp(1.0, props.outer_gain_hf, scale);
        }

        dry_gain.base *= cone_gain;
        if props.dry_gain_hf_auto {
            dry_gain.hf *= cone_hf;
        }
        if props.wet_gain_auto {
            wet_cone = cone_gain;
        }
        if props.wet_gain_hf_auto {
            wet_cone_hf = cone_hf;
        }
    }

    // Clamp to the gain bounds, then apply the path filters and the final
    // mix limit.
    let min_gain = props.min_gain.min(props.max_gain);
    let max_gain = props.max_gain;

    dry_gain.base = dry_gain.base.clamp(min_gain, max_gain) * props.direct.gain;
    dry_gain.base = (dry_gain.base * ctx_params.gain).min(GAIN_MIX_MAX);
    dry_gain.hf *= props.direct.gain_hf;
    dry_gain.lf = props.direct.gain_lf;

    for i in 0..num_sends {
        let send = &props.send[i];
        let gain = (wet_gain[i].base * wet_cone).clamp(min_gain, max_gain) * send.gain;
        wet_gain[i] = GainTriplet {
            base: (gain * ctx_params.gain).min(GAIN_MIX_MAX),
            hf: send.gain_hf * wet_cone_hf,
            lf: send.gain_lf,
        };
    }

    // Distance-based air absorption and initial send decay.
    if distance > props.ref_distance {
        let distance_units = (distance - props.ref_distance) * props.rolloff_factor;
        let distance_meters = distance_units * ctx_params.meters_per_unit;
        let absorb = distance_meters * props.air_absorption_factor;
        if absorb > f32::EPSILON {
            dry_gain.hf *= ctx_params.air_absorption_gain_hf.powf(absorb);
        }

        // Without Auxiliary Send Filter Gain Auto, the send gains take no
        // extra adjustment.
        if props.wet_gain_auto {
            for i in 0..num_sends {
                let Some(si) = send_slots[i] else { continue };
                let slot = &slots[si];
                if slot.decay_time <= 0.0 {
                    continue;
                }

                if slot.air_absorption_gain_hf < 1.0 && absorb > f32::EPSILON {
                    wet_gain[i].hf *= slot.air_absorption_gain_hf.powf(absorb);
                }

                let decay_distance = slot.decay_time * SPEED_OF_SOUND_METERS_PER_SEC;

                // Apply the initial reverb decay to the wet path from the
                // source distance. Kept as-is for compatibility even
                // though a rolloff derived from the reverb parameters
                // would likely fit better.
                let base_attn = dry_attn_base;
                let fact = distance_meters / decay_distance;
                let gain = REVERB_DECAY_GAIN.powf(fact) * (1.0 - base_attn) + base_attn;
                wet_gain[i].base *= gain;
            }
        }
    }

    // Doppler pitch shift.
    let mut pitch = props.pitch;
    let doppler_factor = props.doppler_factor * ctx_params.doppler_factor;
    if doppler_factor > 0.0 {
        let vss = velocity.dot(to_source) * -doppler_factor;
        let vls = ctx_params.velocity.dot(to_source) * -doppler_factor;

        let speed_of_sound = ctx_params.speed_of_sound;
        if !(vls < speed_of_sound) {
            // Listener moving away at the speed of sound; the waves can't
            // catch up.
            pitch = 0.0;
        } else if !(vss < speed_of_sound) {
            // Source approaching at the speed of sound; waves bunch up to
            // extreme frequencies.
            pitch = f32::INFINITY;
        } else {
            pitch *= (speed_of_sound - vls) / (speed_of_sound - vss);
        }
    }

    compute_step(voice, pitch, dev.sample_rate);

    let spread = if props.radius > distance {
        std::f32::consts::TAU - distance / props.radius * std::f32::consts::PI
    } else if distance > 0.0 {
        (props.radius / distance).asin() * 2.0
    } else {
        0.0
    };

    let (xs, ys, zs) = crate::axis_scales();
    calc_panning_and_filters(
        voice,
        [to_source.x * xs, to_source.y * ys, to_source.z * zs],
        distance,
        spread,
        dry_gain,
        &wet_gain,
        &send_slots,
        ctx_params,
        slots,
        dev,
    );
}

#[allow(clippy::too_many_arguments)]
fn calc_panning_and_filters(
    voice: &mut Voice,
    dir: [f32; 3],
    distance: f32,
    spread: f32,
    dry_gain: GainTriplet,
    wet_gain: &[GainTriplet; MAX_SEND_COUNT],
    send_slots: &[Option<usize>; MAX_SEND_COUNT],
    ctx_params: &ContextParams,
    slots: &[EffectSlot],
    dev: &DeviceParams,
) {
    let [xpos, ypos, zpos] = dir;
    let frequency = dev.sample_rate as f32;
    let num_sends = dev.num_sends;
    let props = voice.props.clone();
    let ismono3d = voice.fmt_channels == FmtChannels::Mono && !props.panning_enabled;

    for chan in voice.chans.iter_mut() {
        chan.dry_params.hrtf.target = Default::default();
        chan.dry_params.target.fill(0.0);
        for send in chan.wet_params.iter_mut().take(num_sends) {
            send.target.fill(0.0);
        }
    }

    // Fixed channel positions for the format; stereo is re-aimed by the
    // voice's pan angles.
    let mut stereo_map = [
        ChanPosMap { channel: Channel::FrontLeft, pos: [-SIN30, 0.0, -COS30] },
        ChanPosMap { channel: Channel::FrontRight, pos: [SIN30, 0.0, -COS30] },
    ];

    let (direct_mode, chans): (DirectMode, &[ChanPosMap]) = match voice.fmt_channels {
        FmtChannels::Mono if !props.panning_enabled => (DirectMode::Off, &MONO_MAP),
        // Mono with panning plays as stereo, each channel a copy of the
        // buffer biased by the pan control.
        FmtChannels::Mono | FmtChannels::Stereo => {
            if props.direct_channels == DirectMode::Off {
                for (map, &a) in stereo_map.iter_mut().zip(props.stereo_pan.iter()) {
                    // StereoPan is counter-clockwise radians.
                    map.pos = [-a.sin(), map.pos[1], -a.cos()];
                }
            }
            (props.direct_channels, &stereo_map)
        }
        FmtChannels::Rear => (props.direct_channels, &REAR_MAP),
        FmtChannels::Quad => (props.direct_channels, &QUAD_MAP),
        FmtChannels::X51 => (props.direct_channels, &X51_MAP),
        FmtChannels::X61 => (props.direct_channels, &X61_MAP),
        FmtChannels::X71 => (props.direct_channels, &X71_MAP),
        _ => (DirectMode::Off, &[]),
    };

    voice.flags.has_hrtf = false;
    voice.flags.has_nfc = false;
    if let Some(crate::voice::VoiceDecoder::Stereo(dec)) = voice.decoder.as_mut() {
        dec.width_control = props.enh_width.min(0.7);
    }

    // Pan biasing for mono-as-stereo and multichannel content.
    let lgain = (1.0 - props.panning).min(1.0);
    let rgain = (1.0 + props.panning).min(1.0);
    let mingain = lgain.min(rgain);
    let select_channel_gain = |chan: Channel| -> f32 {
        use Channel::*;
        match chan {
            FrontLeft | BackLeft | SideLeft | TopFrontLeft | TopBackLeft => lgain,
            FrontRight | BackRight | SideRight | TopFrontRight | TopBackRight => rgain,
            _ => mingain,
        }
    };

    let nfc_scale = crate::nfc_scale();

    if voice.fmt_channels.is_ambisonic() {
        // B-Format and UHJ sources.

        if dev.avg_speaker_dist > 0.0
            && voice.fmt_channels != FmtChannels::Uhj2
            && voice.fmt_channels != FmtChannels::SuperStereo
        {
            if !(distance > f32::EPSILON) {
                // A w0 of 0 is the plane-wave response the filters were
                // built with; reset the possibly re-adjusted W channel.
                voice.chans[0].dry_params.nfc_filter.adjust(0.0);
            } else {
                // Clamp the distance for really close sources to prevent
                // excessive bass.
                let mdist = (distance * nfc_scale).max(dev.avg_speaker_dist / 4.0);
                let w0 = SPEED_OF_SOUND_METERS_PER_SEC / (mdist * frequency);
                voice.chans[0].dry_params.nfc_filter.adjust(w0);
            }
            voice.flags.has_nfc = true;
        }

        // Panning a B-Format scene pans its W channel as a mono sound; the
        // angular spread blends between full coverage and full panning.
        let coverage = if !(distance > f32::EPSILON) {
            1.0
        } else {
            spread * std::f32::consts::FRAC_1_PI * 0.5
        };

        let scales = voice.ambi_scale;
        let mut coeffs = if dev.render_mode != RenderMode::Pairwise {
            calc_direction_coeffs([xpos, ypos, zpos], 0.0)
        } else {
            calc_direction_coeffs(scale_azimuth_front3_2([xpos, ypos, zpos]), 0.0)
        };

        if !(coverage > 0.0) {
            compute_pan_gains(
                dev.dry_map,
                &coeffs,
                dry_gain.base * scales[0],
                &mut voice.chans[0].dry_params.target[..MAX_AMBI_CHANNELS],
            );
            for i in 0..num_sends {
                if let Some(si) = send_slots[i] {
                    compute_pan_gains(
                        &slots[si].wet.amap,
                        &coeffs,
                        wet_gain[i].base * scales[0],
                        &mut voice.chans[0].wet_params[i].target,
                    );
                }
            }
        } else {
            // Local B-Format sources rotate their XYZ channels by the
            // source orientation.
            let mut n = Vec3::from_array(props.orient_at);
            n.normalize();
            let mut v = Vec3::from_array(props.orient_up);
            v.normalize();
            if !props.head_relative {
                n = ctx_params.matrix.mul_vec(n);
                v = ctx_params.matrix.mul_vec(v);
            }
            let mut u = n.cross(v);
            u.normalize();

            let mut shrot = base_rotation(u, v, n);
            ambi_rotator(&mut shrot, dev.ambi_order);

            // Upsample when the device order exceeds the voice's. A 2D
            // voice on a 3D device needs it from second order even at
            // equal orders, since the composition zeroes the
            // height-carrying channels identity would leave stale.
            let two_d = voice.fmt_channels.is_2d_ambisonic();
            let mut mixmatrix: AmbiRotateMatrix = shrot;
            if dev.ambi_order > voice.ambi_order
                || (dev.ambi_order >= 2 && !dev.m2d && two_d)
            {
                let upsampler = upsampler_for(voice.ambi_order, two_d);
                upsample_transform(&mut mixmatrix, upsampler, &shrot, dev.ambi_order);
            }

            let index_map = layout_map(voice.ambi_fuma_layout, two_d);
            let index_map = &index_map[..voice.chans.len().min(index_map.len())];

            // Scale the panned W signal inversely to coverage and by the
            // channel scaling.
            let wscale = (1.0 - coverage) * scales[0];
            for c in coeffs.iter_mut() {
                *c *= wscale;
            }

            for (c, &acn_idx) in index_map.iter().enumerate() {
                let acn = acn_idx as usize;
                let scale = scales[acn] * coverage;

                // Channel 0 combines the coverage-scaled B-Format signal
                // with the directional pan; other channels carry just the
                // scaled B-Format signal.
                for (coeff, &mrow) in coeffs.iter_mut().zip(mixmatrix[acn].iter()) {
                    *coeff = mrow * scale + *coeff;
                }

                compute_pan_gains(
                    dev.dry_map,
                    &coeffs,
                    dry_gain.base,
                    &mut voice.chans[c].dry_params.target[..MAX_AMBI_CHANNELS],
                );
                for i in 0..num_sends {
                    if let Some(si) = send_slots[i] {
                        compute_pan_gains(
                            &slots[si].wet.amap,
                            &coeffs,
                            wet_gain[i].base,
                            &mut voice.chans[c].wet_params[i].target,
                        );
                    }
                }

                coeffs.fill(0.0);
            }
        }
    } else if direct_mode != DirectMode::Off {
        // Direct channels play to matching real outputs, skipping the
        // virtual bus.
        voice.direct.target = DirectOutTarget::RealOut;

        for (c, chan_map) in chans.iter().enumerate() {
            let pangain = select_channel_gain(chan_map.channel);
            let idx = dev.channel_index[chan_map.channel.index()];
            if idx != INVALID_CHANNEL_INDEX {
                voice.chans[c].dry_params.target[idx as usize] = dry_gain.base * pangain;
            } else if direct_mode == DirectMode::RemixMismatch {
                if let Some(remap) =
                    dev.remix_map.iter().find(|m| m.channel == chan_map.channel)
                {
                    for &(target, mix) in remap.targets.iter() {
                        let idx = dev.channel_index[target.index()];
                        if idx != INVALID_CHANNEL_INDEX {
                            voice.chans[c].dry_params.target[idx as usize] =
                                dry_gain.base * pangain * mix;
                        }
                    }
                }
            }
        }

        // Sends still pan normally; they mix to B-Format.
        for (c, chan_map) in chans.iter().enumerate() {
            if chan_map.channel == Channel::Lfe {
                continue;
            }
            let pangain = select_channel_gain(chan_map.channel);
            let coeffs = calc_direction_coeffs(chan_map.pos, 0.0);
            for i in 0..num_sends {
                if let Some(si) = send_slots[i] {
                    compute_pan_gains(
                        &slots[si].wet.amap,
                        &coeffs,
                        wet_gain[i].base * pangain,
                        &mut voice.chans[c].wet_params[i].target,
                    );
                }
            }
        }

        combine_mono_as_stereo(voice, num_sends, send_slots);
    } else if dev.render_mode == RenderMode::Hrtf {
        // Full binaural rendering to the real outputs.
        voice.direct.target = DirectOutTarget::RealOut;

        if let Some(hrtf) = dev.hrtf {
            if distance > f32::EPSILON {
                if ismono3d {
                    let src_ev = ypos.clamp(-1.0, 1.0).asin();
                    let src_az = xpos.atan2(-zpos);

                    let chan = &mut voice.chans[0];
                    hrtf.get_coeffs(
                        src_ev,
                        src_az,
                        distance * nfc_scale,
                        spread,
                        &mut chan.dry_params.hrtf.target.coeffs,
                        &mut chan.dry_params.hrtf.target.delays,
                    );
                    chan.dry_params.hrtf.target.gain = dry_gain.base;

                    let coeffs = calc_direction_coeffs([xpos, ypos, zpos], spread);
                    for i in 0..num_sends {
                        if let Some(si) = send_slots[i] {
                            compute_pan_gains(
                                &slots[si].wet.amap,
                                &coeffs,
                                wet_gain[i].base,
                                &mut voice.chans[0].wet_params[i].target,
                            );
                        }
                    }
                } else {
                    for (c, chan_map) in chans.iter().enumerate() {
                        if chan_map.channel == Channel::Lfe {
                            continue;
                        }
                        let pangain = select_channel_gain(chan_map.channel);

                        // Warp the channel position toward the source as
                        // the spread shrinks; full spread leaves each
                        // channel in place.
                        let a = 1.0 - std::f32::consts::FRAC_1_PI * 0.5 * spread;
                        let mut pos = [
                            sf_core::lerp(chan_map.pos[0], xpos, a),
                            sf_core::lerp(chan_map.pos[1], ypos, a),
                            sf_core::lerp(chan_map.pos[2], zpos, a),
                        ];
                        let len =
                            (pos[0] * pos[0] + pos[1] * pos[1] + pos[2] * pos[2]).sqrt();
                        if len < 1.0 && len > 0.0 {
                            for p in pos.iter_mut() {
                                *p /= len;
                            }
                        }

                        let ev = pos[1].clamp(-1.0, 1.0).asin();
                        let az = pos[0].atan2(-pos[2]);

                        let chan = &mut voice.chans[c];
                        hrtf.get_coeffs(
                            ev,
                            az,
                            distance * nfc_scale,
                            0.0,
                            &mut chan.dry_params.hrtf.target.coeffs,
                            &mut chan.dry_params.hrtf.target.delays,
                        );
                        chan.dry_params.hrtf.target.gain = dry_gain.base * pangain;

                        let coeffs = calc_direction_coeffs(pos, 0.0);
                        for i in 0..num_sends {
                            if let Some(si) = send_slots[i] {
                                compute_pan_gains(
                                    &slots[si].wet.amap,
                                    &coeffs,
                                    wet_gain[i].base * pangain,
                                    &mut voice.chans[c].wet_params[i].target,
                                );
                            }
                        }
                    }
                }
            } else {
                // With no distance, spread only matters for mono sources;
                // everything else is full-spread "virtual speakers".
                let spread = spread * (ismono3d as u32 as f32);

                for (c, chan_map) in chans.iter().enumerate() {
                    if chan_map.channel == Channel::Lfe {
                        continue;
                    }
                    let pangain = select_channel_gain(chan_map.channel);

                    let ev = chan_map.pos[1].asin();
                    let az = chan_map.pos[0].atan2(-chan_map.pos[2]);

                    let chan = &mut voice.chans[c];
                    hrtf.get_coeffs(
                        ev,
                        az,
                        f32::INFINITY,
                        spread,
                        &mut chan.dry_params.hrtf.target.coeffs,
                        &mut chan.dry_params.hrtf.target.delays,
                    );
                    chan.dry_params.hrtf.target.gain = dry_gain.base * pangain;

                    let coeffs = calc_direction_coeffs(chan_map.pos, spread);
                    for i in 0..num_sends {
                        if let Some(si) = send_slots[i] {
                            compute_pan_gains(
                                &slots[si].wet.amap,
                                &coeffs,
                                wet_gain[i].base * pangain,
                                &mut voice.chans[c].wet_params[i].target,
                            );
                        }
                    }
                }
            }
        }

        voice.duplicate_mono =
            voice.fmt_channels == FmtChannels::Mono && props.panning_enabled;
        voice.flags.has_hrtf = true;
    } else {
        // Non-HRTF rendering: normal panning to the dry bus.

        if distance > f32::EPSILON {
            if dev.avg_speaker_dist > 0.0 {
                let mdist = (distance * nfc_scale).max(dev.avg_speaker_dist / 4.0);
                let w0 = SPEED_OF_SOUND_METERS_PER_SEC / (mdist * frequency);
                for chan in voice.chans.iter_mut() {
                    chan.dry_params.nfc_filter.adjust(w0);
                }
                voice.flags.has_nfc = true;
            }

            if ismono3d {
                let coeffs = if dev.render_mode != RenderMode::Pairwise {
                    calc_direction_coeffs([xpos, ypos, zpos], spread)
                } else {
                    calc_direction_coeffs(scale_azimuth_front3_2([xpos, ypos, zpos]), spread)
                };

                compute_pan_gains(
                    dev.dry_map,
                    &coeffs,
                    dry_gain.base,
                    &mut voice.chans[0].dry_params.target[..MAX_AMBI_CHANNELS],
                );
                for i in 0..num_sends {
                    if let Some(si) = send_slots[i] {
                        compute_pan_gains(
                            &slots[si].wet.amap,
                            &coeffs,
                            wet_gain[i].base,
                            &mut voice.chans[0].wet_params[i].target,
                        );
                    }
                }
            } else {
                for (c, chan_map) in chans.iter().enumerate() {
                    let pangain = select_channel_gain(chan_map.channel);

                    if chan_map.channel == Channel::Lfe {
                        if dev.dry_is_real {
                            let idx = dev.channel_index[chan_map.channel.index()];
                            if idx != INVALID_CHANNEL_INDEX {
                                voice.chans[c].dry_params.target[idx as usize] =
                                    dry_gain.base * pangain;
                            }
                        }
                        continue;
                    }

                    let a = 1.0 - std::f32::consts::FRAC_1_PI * 0.5 * spread;
                    let mut pos = [
                        sf_core::lerp(chan_map.pos[0], xpos, a),
                        sf_core::lerp(chan_map.pos[1], ypos, a),
                        sf_core::lerp(chan_map.pos[2], zpos, a),
                    ];
                    let len = (pos[0] * pos[0] + pos[1] * pos[1] + pos[2] * pos[2]).sqrt();
                    if len < 1.0 && len > 0.0 {
                        for p in pos.iter_mut() {
                            *p /= len;
                        }
                    }

                    if dev.render_mode == RenderMode::Pairwise {
                        pos = scale_azimuth_front3(pos);
                    }
                    let coeffs = calc_direction_coeffs(pos, 0.0);

                    compute_pan_gains(
                        dev.dry_map,
                        &coeffs,
                        dry_gain.base * pangain,
                        &mut voice.chans[c].dry_params.target[..MAX_AMBI_CHANNELS],
                    );
                    for i in 0..num_sends {
                        if let Some(si) = send_slots[i] {
                            compute_pan_gains(
                                &slots[si].wet.amap,
                                &coeffs,
                                wet_gain[i].base * pangain,
                                &mut voice.chans[c].wet_params[i].target,
                            );
                        }
                    }
                }
            }
        } else {
            if dev.avg_speaker_dist > 0.0 {
                // Zero distance simulates a plane wave: w0 of 0.
                for chan in voice.chans.iter_mut() {
                    chan.dry_params.nfc_filter.adjust(0.0);
                }
                voice.flags.has_nfc = true;
            }

            let spread = spread * (ismono3d as u32 as f32);
            for (c, chan_map) in chans.iter().enumerate() {
                let pangain = select_channel_gain(chan_map.channel);

                if chan_map.channel == Channel::Lfe {
                    if dev.dry_is_real {
                        let idx = dev.channel_index[chan_map.channel.index()];
                        if idx != INVALID_CHANNEL_INDEX {
                            voice.chans[c].dry_params.target[idx as usize] =
                                dry_gain.base * pangain;
                        }
                    }
                    continue;
                }

                let pos = if dev.render_mode == RenderMode::Pairwise {
                    scale_azimuth_front3(chan_map.pos)
                } else {
                    chan_map.pos
                };
                let coeffs = calc_direction_coeffs(pos, spread);

                compute_pan_gains(
                    dev.dry_map,
                    &coeffs,
                    dry_gain.base * pangain,
                    &mut voice.chans[c].dry_params.target[..MAX_AMBI_CHANNELS],
                );
                for i in 0..num_sends {
                    if let Some(si) = send_slots[i] {
                        compute_pan_gains(
                            &slots[si].wet.amap,
                            &coeffs,
                            wet_gain[i].base * pangain,
                            &mut voice.chans[c].wet_params[i].target,
                        );
                    }
                }
            }
        }

        combine_mono_as_stereo(voice, num_sends, send_slots);
    }

    // Shelf filters: the "low pass" is a high shelf applying the HF gain,
    // the "high pass" a low shelf applying the LF gain. Parameters are
    // computed once and copied across channels.
    {
        let hf_norm = props.direct.hf_reference / frequency;
        let lf_norm = props.direct.lf_reference / frequency;

        voice.direct.filter_mode = FilterMode {
            low_pass: dry_gain.hf != 1.0,
            high_pass: dry_gain.lf != 1.0,
        };

        let (first, rest) = voice.chans.split_at_mut(1);
        let lowpass = &mut first[0].dry_params.low_pass;
        let highpass = &mut first[0].dry_params.high_pass;
        lowpass.set_params_from_slope(BiquadType::HighShelf, hf_norm, dry_gain.hf, 1.0);
        highpass.set_params_from_slope(BiquadType::LowShelf, lf_norm, dry_gain.lf, 1.0);
        for chan in rest.iter_mut().take(chans.len().saturating_sub(1)) {
            chan.dry_params.low_pass.copy_params_from(lowpass);
            chan.dry_params.high_pass.copy_params_from(highpass);
        }
    }
    for i in 0..num_sends {
        let hf_norm = props.send[i].hf_reference / frequency;
        let lf_norm = props.send[i].lf_reference / frequency;

        voice.sends[i].filter_mode = FilterMode {
            low_pass: wet_gain[i].hf != 1.0,
            high_pass: wet_gain[i].lf != 1.0,
        };

        let (first, rest) = voice.chans.split_at_mut(1);
        let lowpass = &mut first[0].wet_params[i].low_pass;
        let highpass = &mut first[0].wet_params[i].high_pass;
        lowpass.set_params_from_slope(BiquadType::HighShelf, hf_norm, wet_gain[i].hf, 1.0);
        highpass.set_params_from_slope(BiquadType::LowShelf, lf_norm, wet_gain[i].lf, 1.0);
        for chan in rest.iter_mut() {
            chan.wet_params[i].low_pass.copy_params_from(lowpass);
            chan.wet_params[i].high_pass.copy_params_from(highpass);
        }
    }
}

/// With non-HRTF output, mono-as-stereo folds both channels' pan rows into
/// channel 0 and mixes a single channel.
fn combine_mono_as_stereo(
    voice: &mut Voice,
    num_sends: usize,
    send_slots: &[Option<usize>; MAX_SEND_COUNT],
) {
    voice.duplicate_mono = false;
    if !(voice.fmt_channels == FmtChannels::Mono && voice.props.panning_enabled) {
        return;
    }

    let (c0, c1) = voice.chans.split_at_mut(1);
    for i in 0..MAX_OUTPUT_CHANNELS {
        c0[0].dry_params.target[i] += c1[0].dry_params.target[i];
    }
    for send in 0..num_sends {
        if send_slots[send].is_none() {
            continue;
        }
        for i in 0..MAX_AMBI_CHANNELS {
            c0[0].wet_params[send].target[i] += c1[0].wet_params[send].target[i];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextParams, ContextShared};
    use crate::device::VoicePrepareInfo;
    use crate::voice::Voice;
    use sf_core::{UhjQuality, INVALID_CHANNEL_INDEX};

    fn prepare_info() -> VoicePrepareInfo {
        VoicePrepareInfo {
            sample_rate: 48000,
            ambi_order: 1,
            m2d: false,
            uhj_quality: UhjQuality::Iir,
            has_uhj_encoder: false,
            nfc_filter: sf_dsp::NfcFilter::default(),
            xover_freq: 400.0,
        }
    }

    fn make_voice() -> Voice {
        let mut voice = Voice::new();
        voice.frequency = 48000;
        voice.prepare(&prepare_info());
        voice.props.panning_enabled = false;
        voice
    }

    fn run_calc(voice: &mut Voice, ctx_params: &ContextParams) {
        let shared = ContextShared::new(16, 0);
        let dry_map = AmbiChanMap::full_3d(1);
        let channel_index = [INVALID_CHANNEL_INDEX; MAX_OUTPUT_CHANNELS];
        let dev = DeviceParams {
            sample_rate: 48000,
            num_sends: 0,
            render_mode: RenderMode::Normal,
            avg_speaker_dist: 0.0,
            ambi_order: 1,
            m2d: false,
            dry_map: &dry_map,
            channel_index: &channel_index,
            remix_map: &[],
            hrtf: None,
            dry_is_real: false,
        };
        calc_source_params(voice, &shared, ctx_params, &[], &dev, true);
    }

    #[test]
    fn test_distance_models_unity_at_ref_distance() {
        // At distance == refDistance every model leaves the gain alone.
        let ctx_params = ContextParams { source_distance_model: true, ..Default::default() };

        let baseline = {
            let mut voice = make_voice();
            voice.props.distance_model = DistanceModel::Disable;
            voice.props.position = [0.0, 0.0, -2.0];
            voice.props.ref_distance = 2.0;
            voice.props.rolloff_factor = 1.7;
            run_calc(&mut voice, &ctx_params);
            voice.chans[0].dry_params.target[0]
        };
        assert!(baseline > 0.0);

        for model in [
            DistanceModel::Inverse,
            DistanceModel::InverseClamped,
            DistanceModel::Linear,
            DistanceModel::LinearClamped,
            DistanceModel::Exponent,
            DistanceModel::ExponentClamped,
        ] {
            let mut voice = make_voice();
            voice.props.distance_model = model;
            voice.props.position = [0.0, 0.0, -2.0];
            voice.props.ref_distance = 2.0;
            voice.props.max_distance = 100.0;
            voice.props.rolloff_factor = 1.7;
            run_calc(&mut voice, &ctx_params);
            let gain = voice.chans[0].dry_params.target[0];
            assert!(
                (gain - baseline).abs() < 1e-6,
                "{model:?} attenuated at ref distance: {gain} vs {baseline}"
            );
        }
    }

    #[test]
    fn test_doppler_shift_symmetry() {
        // Swapping source and listener velocities along the line between
        // them inverts the pitch factor.
        let va = 40.0f32;
        let vb = -25.0f32;

        let step_with = |src_vz: f32, listener_vz: f32| -> u32 {
            let mut ctx_params = ContextParams::default();
            ctx_params.velocity = sf_spatial::Vec3::new(0.0, 0.0, listener_vz);
            let mut voice = make_voice();
            voice.props.position = [0.0, 0.0, -10.0];
            voice.props.velocity = [0.0, 0.0, src_vz];
            run_calc(&mut voice, &ctx_params);
            voice.step
        };

        let forward = step_with(va, vb) as f64;
        let swapped = step_with(vb, va) as f64;
        let product = forward * swapped;
        let unity = (MIXER_FRAC_ONE as f64) * (MIXER_FRAC_ONE as f64);
        assert!(
            (product - unity).abs() < unity * 0.01,
            "shift factors should invert: {forward} * {swapped} != {unity}"
        );
    }

    #[test]
    fn test_cone_outer_gain_applies() {
        let ctx_params = ContextParams::default();
        let mut voice = make_voice();
        // Source ahead, facing away from the listener: fully outside the
        // cone.
        voice.props.position = [0.0, 0.0, -5.0];
        voice.props.direction = [0.0, 0.0, -1.0];
        voice.props.inner_angle = 30.0;
        voice.props.outer_angle = 90.0;
        voice.props.outer_gain = 0.25;
        voice.props.ref_distance = 5.0;
        run_calc(&mut voice, &ctx_params);
        let attenuated = voice.chans[0].dry_params.target[0];

        voice.props.direction = [0.0, 0.0, 1.0]; // facing the listener
        run_calc(&mut voice, &ctx_params);
        let facing = voice.chans[0].dry_params.target[0];

        assert!(
            (attenuated - facing * 0.25).abs() < facing * 0.01,
            "outer cone gain: {attenuated} vs {facing}"
        );
    }
}
