//! Per-source voice state and the voice mixing pipeline
//!
//! `Voice::mix` runs once per voice per block: load source samples
//! (static, streamed, or callback-fed), resample to the device rate in
//! work-buffer sized chunks, optionally decode UHJ/SuperStereo and apply
//! ambisonic shelf scaling, then filter and mix each channel into the dry
//! bus (plain, NFC-filtered, or HRTF-convolved) and into each active send.

use std::sync::atomic::{fence, AtomicBool, AtomicI32, AtomicPtr, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use sf_core::{
    BufferLine, FmtChannels, FmtType, HistoryLine, MAX_AMBI_CHANNELS, MAX_AMBI_ORDER,
    MAX_OUTPUT_CHANNELS, MAX_RESAMPLER_EDGE, MAX_RESAMPLER_PADDING, MAX_SEND_COUNT,
    MIXER_FRAC_BITS, MIXER_FRAC_MASK, MIXER_FRAC_ONE,
};
use sf_dsp::biquad::{Biquad, DualBiquad, FilterMode};
use sf_dsp::{InterpState, NfcFilter, ResamplerFunc, UhjAmbiDecoder, UhjStereoDecoder};
use sf_spatial::hrtf::{mix_hrtf, mix_hrtf_blend, HrtfFilter, MixHrtfFilter, HRTF_HISTORY_LENGTH};

use crate::buffer::{load_samples, VoiceBufferItem};
use crate::context::ContextShared;
use crate::device::{HrtfMixState, MixerScratch};
use crate::events::{AsyncEvent, AsyncSrcState, EVT_BUFFER_COMPLETE, EVT_SOURCE_STATE};
use crate::lockfree::UpdateSlot;
use crate::mix::mix_samples;
use crate::props::VoiceProps;
use crate::slot::EffectSlot;

/// Play state a voice moves through; `Pending` voices are queued but not
/// yet started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlayState {
    Stopped = 0,
    Playing = 1,
    Stopping = 2,
    Pending = 3,
}

impl PlayState {
    pub fn from_u8(v: u8) -> PlayState {
        match v {
            1 => PlayState::Playing,
            2 => PlayState::Stopping,
            3 => PlayState::Pending,
            _ => PlayState::Stopped,
        }
    }
}

/// Voice state shared with control threads.
pub struct VoiceShared {
    pub update: UpdateSlot<VoiceProps>,
    pub play_state: AtomicU8,
    pub source_id: AtomicU32,
    pub position: AtomicI32,
    pub position_frac: AtomicU32,
    pub current_buffer: AtomicPtr<VoiceBufferItem>,
    pub loop_buffer: AtomicPtr<VoiceBufferItem>,
    pub pending_change: AtomicBool,
}

impl VoiceShared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            update: UpdateSlot::new(),
            play_state: AtomicU8::new(PlayState::Stopped as u8),
            source_id: AtomicU32::new(0),
            position: AtomicI32::new(0),
            position_frac: AtomicU32::new(0),
            current_buffer: AtomicPtr::new(std::ptr::null_mut()),
            loop_buffer: AtomicPtr::new(std::ptr::null_mut()),
            pending_change: AtomicBool::new(false),
        })
    }

    pub fn play_state(&self) -> PlayState {
        PlayState::from_u8(self.play_state.load(Ordering::Acquire))
    }

    pub fn set_play_state(&self, state: PlayState) {
        self.play_state.store(state as u8, Ordering::Release);
    }
}

/// Status flags of a voice.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoiceFlags {
    pub is_fading: bool,
    pub has_hrtf: bool,
    pub has_nfc: bool,
    pub is_ambisonic: bool,
    pub is_static: bool,
    pub is_callback: bool,
    pub callback_stopped: bool,
}

/// HRTF state of one voice channel's dry path.
pub struct HrtfChanParams {
    pub old: HrtfFilter,
    pub target: HrtfFilter,
    pub history: [f32; HRTF_HISTORY_LENGTH],
}

impl Default for HrtfChanParams {
    fn default() -> Self {
        Self {
            old: HrtfFilter::default(),
            target: HrtfFilter::default(),
            history: [0.0; HRTF_HISTORY_LENGTH],
        }
    }
}

/// Dry-path mixing parameters of one voice channel.
pub struct DirectChanParams {
    pub low_pass: Biquad,
    pub high_pass: Biquad,
    pub nfc_filter: NfcFilter,
    pub hrtf: HrtfChanParams,
    pub current: [f32; MAX_OUTPUT_CHANNELS],
    pub target: [f32; MAX_OUTPUT_CHANNELS],
}

impl Default for DirectChanParams {
    fn default() -> Self {
        Self {
            low_pass: Biquad::new(),
            high_pass: Biquad::new(),
            nfc_filter: NfcFilter::default(),
            hrtf: HrtfChanParams::default(),
            current: [0.0; MAX_OUTPUT_CHANNELS],
            target: [0.0; MAX_OUTPUT_CHANNELS],
        }
    }
}

/// Send-path mixing parameters of one voice channel.
pub struct SendChanParams {
    pub low_pass: Biquad,
    pub high_pass: Biquad,
    pub current: [f32; MAX_AMBI_CHANNELS],
    pub target: [f32; MAX_AMBI_CHANNELS],
}

impl Default for SendChanParams {
    fn default() -> Self {
        Self {
            low_pass: Biquad::new(),
            high_pass: Biquad::new(),
            current: [0.0; MAX_AMBI_CHANNELS],
            target: [0.0; MAX_AMBI_CHANNELS],
        }
    }
}

/// All mixing state of one voice channel.
pub struct ChannelData {
    pub prev_samples: HistoryLine,
    pub ambi_hf_scale: f32,
    pub ambi_lf_scale: f32,
    pub ambi_splitter: sf_dsp::BandSplitter,
    pub dry_params: DirectChanParams,
    pub wet_params: [SendChanParams; MAX_SEND_COUNT],
}

impl Default for ChannelData {
    fn default() -> Self {
        Self {
            prev_samples: [0.0; MAX_RESAMPLER_PADDING],
            ambi_hf_scale: 1.0,
            ambi_lf_scale: 1.0,
            ambi_splitter: sf_dsp::BandSplitter::default(),
            dry_params: DirectChanParams::default(),
            wet_params: Default::default(),
        }
    }
}

/// Where the direct path mixes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectOutTarget {
    #[default]
    Dry,
    RealOut,
}

/// Direct-path routing of the whole voice.
#[derive(Default)]
pub struct DirectOut {
    pub target: DirectOutTarget,
    pub filter_mode: FilterMode,
}

/// Send-path routing of the whole voice.
#[derive(Default, Clone, Copy)]
pub struct SendOut {
    pub slot: Option<usize>,
    pub filter_mode: FilterMode,
}

/// Voice decoders for UHJ-family formats.
pub enum VoiceDecoder {
    Ambi(UhjAmbiDecoder),
    Stereo(UhjStereoDecoder),
}

/// Everything the mixer needs from the device while voices mix.
pub struct MixEnv<'a> {
    pub dry_buffer: &'a mut [BufferLine],
    pub real_buffer: &'a mut [BufferLine],
    pub slots: &'a mut [EffectSlot],
    pub scratch: &'a mut MixerScratch,
    pub hrtf: Option<&'a mut HrtfMixState>,
    pub num_sends: usize,
    pub sample_rate: u32,
    /// Dry-bus lines per ambisonic order, for the NFC mix path.
    pub nfc_chan_counts: [usize; MAX_AMBI_ORDER + 1],
}

/// A voice: the mixer-side state driving one playing source.
pub struct Voice {
    pub shared: Arc<VoiceShared>,
    pub props: VoiceProps,

    /// Fixed-point step in 1.12; zero means "not ready to mix".
    pub step: u32,
    pub resampler: ResamplerFunc,
    pub resample_state: InterpState,

    pub fmt_channels: FmtChannels,
    pub fmt_type: FmtType,
    /// Source sample rate.
    pub frequency: u32,
    /// Interleaved channels in the source data.
    pub frame_step: usize,

    pub samples_per_block: usize,
    pub bytes_per_block: usize,
    pub num_callback_blocks: usize,
    pub callback_block_base: usize,

    pub ambi_order: usize,
    pub ambi_fuma_layout: bool,
    pub ambi_scale: &'static sf_spatial::ambidefs::AmbiCoeffs,

    pub flags: VoiceFlags,
    pub direct: DirectOut,
    pub sends: [SendOut; MAX_SEND_COUNT],
    pub chans: Vec<ChannelData>,

    pub decoder: Option<VoiceDecoder>,
    pub decoder_padding: usize,
    pub duplicate_mono: bool,

    /// Absolute device time the voice should begin at, nanoseconds.
    pub start_time_ns: u64,
}

fn null_resampler(_: &mut InterpState, _: &[f32], _: u32, _: u32, _: &mut [f32]) {}

impl Voice {
    pub fn new() -> Self {
        Self {
            shared: VoiceShared::new(),
            props: VoiceProps::default(),
            step: 0,
            resampler: null_resampler,
            resample_state: InterpState::None,
            fmt_channels: FmtChannels::Mono,
            fmt_type: FmtType::F32,
            frequency: 44100,
            frame_step: 1,
            samples_per_block: 1,
            bytes_per_block: 4,
            num_callback_blocks: 0,
            callback_block_base: 0,
            ambi_order: 0,
            ambi_fuma_layout: false,
            ambi_scale: &sf_spatial::ambidefs::FROM_N3D,
            flags: VoiceFlags::default(),
            direct: DirectOut::default(),
            sends: [SendOut::default(); MAX_SEND_COUNT],
            chans: Vec::new(),
            decoder: None,
            decoder_padding: 0,
            duplicate_mono: false,
            start_time_ns: 0,
        }
    }

    /// Set up mixing channels for the configured format. Called by the
    /// control layer (under the mix lock) before the voice starts.
    pub fn prepare(&mut self, dev: &crate::device::VoicePrepareInfo) {
        let mut num_channels = match self.fmt_channels {
            FmtChannels::Uhj2 | FmtChannels::SuperStereo => 3,
            fmt => fmt.count(self.ambi_order.min(dev.ambi_order)),
        };
        if num_channels > sf_core::MIXER_CHANNELS_MAX {
            log::error!(
                "unexpected channel count: {num_channels} (limit {}, {:?} order {})",
                sf_core::MIXER_CHANNELS_MAX,
                self.fmt_channels,
                self.ambi_order
            );
            num_channels = sf_core::MIXER_CHANNELS_MAX;
        }
        if self.chans.capacity() > 2 && num_channels < self.chans.capacity() {
            self.chans = Vec::new();
        }
        // Keep at least two channels so mono panning can toggle without
        // reallocation.
        self.chans.clear();
        self.chans.resize_with(num_channels.max(2), ChannelData::default);

        self.decoder = None;
        self.decoder_padding = 0;
        if self.fmt_channels == FmtChannels::SuperStereo {
            let dec = UhjStereoDecoder::new(dev.uhj_quality);
            self.decoder_padding = dec.input_padding();
            self.decoder = Some(VoiceDecoder::Stereo(dec));
        } else if self.fmt_channels.is_uhj() {
            let dec = UhjAmbiDecoder::new(dev.uhj_quality);
            self.decoder_padding = dec.input_padding();
            self.decoder = Some(VoiceDecoder::Ambi(dec));
        }

        // The mixer skips this voice until an update assigns a real step.
        self.step = 0;

        for chan in self.chans.iter_mut() {
            chan.prev_samples = [0.0; MAX_RESAMPLER_PADDING];
        }

        let splitter = sf_dsp::BandSplitter::new(dev.xover_freq / dev.sample_rate as f32);
        if self.fmt_channels == FmtChannels::Uhj2 && !dev.has_uhj_encoder {
            // 2-channel UHJ without UHJ output gets the quad-decode shelf
            // compensation baked into its LF scales.
            const W_LF_SCALE: f32 = 0.661;
            const XY_LF_SCALE: f32 = 1.293;
            for chan in self.chans.iter_mut() {
                chan.ambi_hf_scale = 1.0;
                chan.ambi_lf_scale = 1.0;
                chan.ambi_splitter = splitter;
                chan.dry_params = DirectChanParams::default();
                chan.dry_params.nfc_filter = dev.nfc_filter;
            }
            self.chans[0].ambi_lf_scale = W_LF_SCALE;
            self.chans[1].ambi_lf_scale = XY_LF_SCALE;
            self.chans[2].ambi_lf_scale = XY_LF_SCALE;
            self.flags.is_ambisonic = true;
        } else if self.ambi_order > 0 && dev.ambi_order > self.ambi_order {
            let orders: &[u8] = if self.fmt_channels.is_2d_ambisonic() {
                &sf_spatial::ambidefs::ORDER_FROM_2D_CHANNEL
            } else {
                &sf_spatial::ambidefs::ORDER_FROM_CHANNEL
            };
            let scales =
                sf_spatial::ambidefs::hf_order_scales(self.ambi_order, dev.ambi_order, dev.m2d);

            for (chan, &ord) in self.chans.iter_mut().zip(orders.iter()) {
                chan.ambi_hf_scale = scales[ord as usize];
                chan.ambi_lf_scale = 1.0;
                chan.ambi_splitter = splitter;
                chan.dry_params = DirectChanParams::default();
                chan.dry_params.nfc_filter = dev.nfc_filter;
            }
            self.flags.is_ambisonic = true;
        } else {
            for chan in self.chans.iter_mut() {
                chan.dry_params = DirectChanParams::default();
                chan.dry_params.nfc_filter = dev.nfc_filter;
            }
            self.flags.is_ambisonic = false;
        }
    }

    /// Mix one block. `vstate` was loaded by the caller; `Stopped` and
    /// `Pending` voices never get here.
    pub fn mix(
        &mut self,
        vstate: PlayState,
        ctx: &ContextShared,
        device_time_ns: u64,
        samples_to_do: usize,
        env: &mut MixEnv,
    ) {
        let num_sends = env.num_sends;

        let mut data_pos_int = self.shared.position.load(Ordering::Relaxed);
        let mut data_pos_frac = self.shared.position_frac.load(Ordering::Relaxed);
        let mut buffer_item = self.shared.current_buffer.load(Ordering::Relaxed);
        let mut loop_item = self.shared.loop_buffer.load(Ordering::Relaxed);
        let increment = self.step;

        if increment < 1 {
            // Can't mix; if we were told to stop, finish the transition.
            if vstate == PlayState::Stopping {
                self.shared.set_play_state(PlayState::Stopped);
            }
            return;
        }

        // A static voice past its loop end stops looping. Loop regions
        // are validated when buffers are set up; one that slipped through
        // malformed disables looping instead of wrapping on it.
        if self.flags.is_static && !loop_item.is_null() && !buffer_item.is_null() {
            // SAFETY: queued items stay alive while any voice references
            // them (control-layer invariant).
            let item = unsafe { &*buffer_item };
            if item.loop_end <= item.loop_start || data_pos_int >= item.loop_end as i32 {
                loop_item = std::ptr::null_mut();
            }
        }

        let mut out_pos = 0usize;
        if self.start_time_ns > device_time_ns {
            if vstate == PlayState::Stopping {
                self.shared.set_play_state(PlayState::Stopped);
                return;
            }
            let diff_ns = self.start_time_ns - device_time_ns;
            if diff_ns >= 1_000_000_000 {
                return;
            }
            // Sample position in this block where output should begin.
            out_pos = ((diff_ns as u128 * env.sample_rate as u128 + 500_000_000)
                / 1_000_000_000) as usize;
            if out_pos >= samples_to_do {
                return;
            }
        }

        let samples_to_mix = samples_to_do - out_pos;
        let samples_to_load = samples_to_mix + self.decoder_padding;

        let mixing_channels = if self.fmt_channels == FmtChannels::Mono && !self.duplicate_mono {
            1
        } else {
            self.chans.len()
        };
        let real_channels = match self.fmt_channels {
            FmtChannels::Mono => 1,
            FmtChannels::Uhj2 | FmtChannels::SuperStereo => 2,
            _ => mixing_channels,
        };

        let MixerScratch { sample_data, resample_data, filtered_data, extra_data } =
            &mut *env.scratch;

        let channel_step = (samples_to_load + 3) & !3;
        let mut chan_bufs: Vec<&mut [f32]> = sample_data
            .chunks_mut(channel_step)
            .take(mixing_channels)
            .collect();

        let res_size = resample_data.len();
        let src_size_max = res_size - MAX_RESAMPLER_EDGE;

        for chan in 0..real_channels.min(chan_bufs.len()) {
            resample_data[..MAX_RESAMPLER_PADDING]
                .copy_from_slice(&self.chans[chan].prev_samples);

            let mut int_pos = data_pos_int;
            let mut frac_pos = data_pos_frac;
            let mut samples_loaded = 0usize;

            while samples_loaded < samples_to_load {
                // Size this chunk so the needed source fits the work
                // buffer, keeping dst a multiple of 4 if another chunk
                // follows.
                let (dst_buffer_size, src_buffer_size) = {
                    let want = samples_to_load - samples_loaded;
                    let ext = (increment <= MIXER_FRAC_ONE) as u64;
                    let mut data_size =
                        ((want as u64 - ext) * increment as u64 + frac_pos as u64)
                            >> MIXER_FRAC_BITS;
                    data_size += ext + MAX_RESAMPLER_EDGE as u64;

                    if data_size as usize <= src_size_max {
                        (want, data_size as usize)
                    } else {
                        let fit = (((src_size_max - MAX_RESAMPLER_EDGE) as u64)
                            << MIXER_FRAC_BITS)
                            .saturating_sub(frac_pos as u64)
                            / increment as u64;
                        let dst = if (fit as usize) < want {
                            fit as usize & !3
                        } else {
                            want
                        };
                        (dst, src_size_max)
                    }
                };

                let mut src_sample_delay = 0usize;
                let mut output_silent = false;
                if int_pos < 0 {
                    // Delayed data: that many source samples are silence.
                    src_sample_delay = (-int_pos) as usize;
                    if src_sample_delay >= src_buffer_size {
                        chan_bufs[chan][samples_loaded..samples_loaded + dst_buffer_size]
                            .fill(0.0);
                        resample_data
                            [MAX_RESAMPLER_EDGE..MAX_RESAMPLER_EDGE + src_buffer_size]
                            .fill(0.0);
                        output_silent = true;
                    } else {
                        resample_data
                            [MAX_RESAMPLER_EDGE..MAX_RESAMPLER_EDGE + src_sample_delay]
                            .fill(0.0);
                    }
                }

                if !output_silent {
                    let load_region = &mut resample_data[MAX_RESAMPLER_EDGE + src_sample_delay
                        ..MAX_RESAMPLER_EDGE + src_buffer_size];

                    if buffer_item.is_null() {
                        // Voice ended prematurely: extend with whatever
                        // edge sample is closest to zero, to fade out
                        // inaudibly.
                        let avail = src_buffer_size.min(MAX_RESAMPLER_EDGE);
                        let tofill = src_buffer_size.max(MAX_RESAMPLER_EDGE);
                        let region =
                            &mut resample_data[MAX_RESAMPLER_EDGE..MAX_RESAMPLER_EDGE + tofill];
                        let mut min_idx = 0usize;
                        for (i, &s) in region[..avail].iter().enumerate() {
                            if s.abs() < region[min_idx].abs() {
                                min_idx = i;
                            }
                        }
                        let fill_val = region[min_idx];
                        for s in region[min_idx + 1..].iter_mut() {
                            *s = fill_val;
                        }
                    } else if self.flags.is_static {
                        // SAFETY: see above; items outlive voice refs.
                        let item = unsafe { &*buffer_item };
                        let loop_ref =
                            if loop_item.is_null() { None } else { Some(unsafe { &*loop_item }) };
                        load_buffer_static(
                            item,
                            loop_ref,
                            int_pos.max(0) as usize,
                            chan,
                            self.frame_step,
                            load_region,
                        );
                    } else if self.flags.is_callback {
                        // SAFETY: callback voices give the mixer exclusive
                        // access to the (single) item while active.
                        let item = unsafe { &mut *buffer_item };
                        let uint_pos = int_pos.max(0) as usize;
                        let callback_base = self.callback_block_base * self.samples_per_block;
                        let buffer_offset = uint_pos - callback_base;
                        let need_samples =
                            buffer_offset + src_buffer_size - src_sample_delay;
                        let need_blocks =
                            (need_samples + self.samples_per_block - 1) / self.samples_per_block;
                        if !self.flags.callback_stopped && need_blocks > self.num_callback_blocks
                        {
                            let byte_offset = self.num_callback_blocks * self.bytes_per_block;
                            let need_bytes =
                                (need_blocks - self.num_callback_blocks) * self.bytes_per_block;
                            if let Some(callback) = item.callback.as_mut() {
                                let bytes = item.samples.as_bytes_mut();
                                let end = (byte_offset + need_bytes).min(bytes.len());
                                if byte_offset < end {
                                    let got = callback(&mut bytes[byte_offset..end]);
                                    if got < 0 {
                                        self.flags.callback_stopped = true;
                                    } else if (got as usize) < need_bytes {
                                        self.flags.callback_stopped = true;
                                        self.num_callback_blocks +=
                                            got as usize / self.bytes_per_block;
                                    } else {
                                        self.num_callback_blocks = need_blocks;
                                    }
                                } else {
                                    self.flags.callback_stopped = true;
                                }
                            } else {
                                self.flags.callback_stopped = true;
                            }
                        }
                        let num_samples = self.num_callback_blocks * self.samples_per_block;
                        load_buffer_callback(
                            item,
                            buffer_offset,
                            num_samples,
                            chan,
                            self.frame_step,
                            load_region,
                        );
                    } else {
                        // SAFETY: see above.
                        let item = unsafe { &*buffer_item };
                        load_buffer_queue(
                            item,
                            loop_item,
                            int_pos.max(0) as usize,
                            chan,
                            self.frame_step,
                            load_region,
                        );
                    }

                    // Matching rate with no phase offset is a plain copy.
                    let dst = &mut chan_bufs[chan][samples_loaded..samples_loaded + dst_buffer_size];
                    if increment == MIXER_FRAC_ONE && frac_pos == 0 {
                        dst.copy_from_slice(
                            &resample_data
                                [MAX_RESAMPLER_EDGE..MAX_RESAMPLER_EDGE + dst_buffer_size],
                        );
                    } else {
                        (self.resampler)(
                            &mut self.resample_state,
                            resample_data,
                            frac_pos,
                            increment,
                            dst,
                        );
                    }

                    // Snapshot history at the mix boundary (not at the
                    // decoder-padding end) for the next block.
                    if vstate == PlayState::Playing {
                        let load_end = samples_loaded + dst_buffer_size;
                        if samples_to_mix > samples_loaded && samples_to_mix <= load_end {
                            let dst_offset = samples_to_mix - samples_loaded;
                            let src_offset = ((dst_offset as u64 * increment as u64
                                + frac_pos as u64)
                                >> MIXER_FRAC_BITS) as usize;
                            self.chans[chan].prev_samples.copy_from_slice(
                                &resample_data[src_offset..src_offset + MAX_RESAMPLER_PADDING],
                            );
                        }
                    }
                }

                samples_loaded += dst_buffer_size;
                if samples_loaded < samples_to_load {
                    frac_pos += dst_buffer_size as u32 * increment;
                    let src_offset = (frac_pos >> MIXER_FRAC_BITS) as usize;
                    frac_pos &= MIXER_FRAC_MASK;
                    int_pos += src_offset as i32;

                    // Slide the consumed source down to reuse the buffer.
                    resample_data.copy_within(src_offset..src_offset + MAX_RESAMPLER_PADDING, 0);
                }
            }
        }

        // Zero any mixing channels with no stored data (the decoder fills
        // the UHJ-derived third channel from these).
        for buf in chan_bufs.iter_mut().skip(real_channels) {
            buf[..samples_to_load].fill(0.0);
        }

        if let Some(decoder) = &mut self.decoder {
            match decoder {
                VoiceDecoder::Ambi(dec) => dec.decode(&mut chan_bufs, samples_to_mix),
                VoiceDecoder::Stereo(dec) => {
                    dec.width_control = self.props.enh_width.min(0.7);
                    dec.decode(&mut chan_bufs, samples_to_mix)
                }
            }
        }

        if self.flags.is_ambisonic {
            for (chan, buf) in self.chans.iter_mut().zip(chan_bufs.iter_mut()) {
                chan.ambi_splitter.process_scale(
                    &mut buf[..samples_to_mix],
                    chan.ambi_hf_scale,
                    chan.ambi_lf_scale,
                );
            }
        }

        let counter =
            if self.flags.is_fading { samples_to_mix.min(64) } else { 0 };
        if counter == 0 {
            // No fading; commit the targets directly.
            for chan in self.chans.iter_mut() {
                if self.flags.has_hrtf {
                    chan.dry_params.hrtf.old = chan.dry_params.hrtf.target.clone();
                } else {
                    chan.dry_params.current = chan.dry_params.target;
                }
                for send in 0..num_sends {
                    if self.sends[send].slot.is_none() {
                        continue;
                    }
                    let parms = &mut chan.wet_params[send];
                    parms.current = parms.target;
                }
            }
        }

        // Read-only views of the mixed source channels; mono panning
        // duplicates channel 0.
        let sample_views: Vec<&[f32]> = if self.duplicate_mono {
            let v0: &[f32] = &chan_bufs[0][..samples_to_mix];
            vec![v0, v0]
        } else {
            chan_bufs.iter().map(|b| &b[..samples_to_mix]).collect()
        };

        const SILENT_TARGET: [f32; MAX_OUTPUT_CHANNELS] = [0.0; MAX_OUTPUT_CHANNELS];

        for (chan_idx, &samples) in sample_views.iter().enumerate() {
            if chan_idx >= self.chans.len() {
                break;
            }
            let chan = &mut self.chans[chan_idx];

            // Direct path.
            {
                let parms = &mut chan.dry_params;
                let filtered = do_filters(
                    &mut parms.low_pass,
                    &mut parms.high_pass,
                    &mut filtered_data[..],
                    samples,
                    self.direct.filter_mode,
                );

                if self.flags.has_hrtf {
                    if let Some(hrtf) = env.hrtf.as_deref_mut() {
                        let target_gain = parms.hrtf.target.gain
                            * ((vstate == PlayState::Playing) as u32 as f32);
                        do_hrtf_mix(
                            filtered,
                            parms,
                            target_gain,
                            counter,
                            out_pos,
                            vstate == PlayState::Playing,
                            hrtf,
                            extra_data,
                        );
                    }
                } else {
                    let target: [f32; MAX_OUTPUT_CHANNELS] = if vstate == PlayState::Playing {
                        parms.target
                    } else {
                        SILENT_TARGET
                    };
                    let out_bufs: &mut [BufferLine] = match self.direct.target {
                        DirectOutTarget::Dry => &mut *env.dry_buffer,
                        DirectOutTarget::RealOut => &mut *env.real_buffer,
                    };
                    if self.flags.has_nfc {
                        do_nfc_mix(
                            filtered,
                            out_bufs,
                            parms,
                            &target,
                            counter,
                            out_pos,
                            &env.nfc_chan_counts,
                            extra_data,
                        );
                    } else {
                        mix_samples(
                            filtered,
                            out_bufs,
                            &mut parms.current,
                            &target,
                            counter,
                            out_pos,
                        );
                    }
                }
            }

            // Send paths.
            for send in 0..num_sends {
                let Some(slot_idx) = self.sends[send].slot else { continue };
                let filter_mode = self.sends[send].filter_mode;
                let parms = &mut chan.wet_params[send];

                let filtered = do_filters(
                    &mut parms.low_pass,
                    &mut parms.high_pass,
                    &mut filtered_data[..],
                    samples,
                    filter_mode,
                );

                let silent = [0.0f32; MAX_AMBI_CHANNELS];
                let target: &[f32] =
                    if vstate == PlayState::Playing { &parms.target } else { &silent };
                mix_samples(
                    filtered,
                    &mut env.slots[slot_idx].wet.buffer,
                    &mut parms.current,
                    target,
                    counter,
                    out_pos,
                );
            }
        }

        self.flags.is_fading = true;

        if vstate == PlayState::Stopping {
            self.shared.set_play_state(PlayState::Stopped);
            return;
        }

        // Advance the source position.
        data_pos_frac += increment * samples_to_mix as u32;
        data_pos_int += (data_pos_frac >> MIXER_FRAC_BITS) as i32;
        data_pos_frac &= MIXER_FRAC_MASK;

        let mut buffers_done = 0u32;
        if !buffer_item.is_null() && data_pos_int > 0 {
            if self.flags.is_static {
                // SAFETY: see above.
                let item = unsafe { &*buffer_item };
                if !loop_item.is_null() {
                    let loop_start = item.loop_start;
                    let loop_end = item.loop_end;
                    if data_pos_int as usize >= loop_end {
                        debug_assert!(loop_end > loop_start);
                        data_pos_int = (((data_pos_int as usize - loop_start)
                            % (loop_end - loop_start))
                            + loop_start) as i32;
                    }
                } else if data_pos_int as usize >= item.sample_len {
                    buffer_item = std::ptr::null_mut();
                }
            } else if self.flags.is_callback {
                let current_block = data_pos_int as usize / self.samples_per_block;
                let blocks_done = current_block - self.callback_block_base;
                if blocks_done < self.num_callback_blocks {
                    // SAFETY: exclusive mixer access while active.
                    let item = unsafe { &mut *buffer_item };
                    let byte_offset = blocks_done * self.bytes_per_block;
                    let byte_end = self.num_callback_blocks * self.bytes_per_block;
                    let bytes = item.samples.as_bytes_mut();
                    bytes.copy_within(byte_offset..byte_end, 0);
                    self.num_callback_blocks -= blocks_done;
                    self.callback_block_base += blocks_done;
                } else {
                    buffer_item = std::ptr::null_mut();
                    self.num_callback_blocks = 0;
                    self.callback_block_base += blocks_done;
                }
            } else {
                // Streaming: consume queue entries the position crossed.
                loop {
                    // SAFETY: see above.
                    let item = unsafe { &*buffer_item };
                    if item.sample_len > data_pos_int as usize {
                        break;
                    }
                    data_pos_int -= item.sample_len as i32;

                    buffers_done += 1;
                    buffer_item = item.next.load(Ordering::Relaxed);
                    if buffer_item.is_null() {
                        buffer_item = loop_item;
                    }
                    if buffer_item.is_null() {
                        break;
                    }
                }
            }
        }

        // Capture the ID before any stop clears it.
        let source_id = self.shared.source_id.load(Ordering::Relaxed);

        self.shared.position.store(data_pos_int, Ordering::Relaxed);
        self.shared.position_frac.store(data_pos_frac, Ordering::Relaxed);
        self.shared.current_buffer.store(buffer_item, Ordering::Relaxed);
        if buffer_item.is_null() {
            self.shared.loop_buffer.store(std::ptr::null_mut(), Ordering::Relaxed);
            self.shared.source_id.store(0, Ordering::Relaxed);
        }
        fence(Ordering::Release);

        let enabled = ctx.events.enabled();
        if buffers_done > 0 && (enabled & EVT_BUFFER_COMPLETE) != 0 {
            ctx.events.post(AsyncEvent::BufferComplete { id: source_id, count: buffers_done });
        }

        if buffer_item.is_null() {
            // Ran dry: fade out next block, then stop.
            self.shared.set_play_state(PlayState::Stopping);
            if (enabled & EVT_SOURCE_STATE) != 0 {
                ctx.events
                    .post(AsyncEvent::SourceState { id: source_id, state: AsyncSrcState::Stop });
            }
        }
    }
}

impl Default for Voice {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Buffer loading ─────────────────────────────────────────────────────

fn load_buffer_static(
    item: &VoiceBufferItem,
    loop_item: Option<&VoiceBufferItem>,
    data_pos: usize,
    src_chan: usize,
    src_step: usize,
    mut out: &mut [f32],
) {
    if loop_item.is_none() {
        let mut last_sample = 0.0f32;
        if item.sample_len > data_pos {
            let remaining = out.len().min(item.sample_len - data_pos);
            load_samples(
                &mut out[..remaining],
                &item.samples,
                src_chan,
                data_pos,
                src_step,
                item.block_align,
            );
            last_sample = out[remaining - 1];
            out = &mut out[remaining..];
        }
        out.fill(last_sample);
    } else {
        let loop_start = item.loop_start;
        let loop_end = item.loop_end;
        debug_assert!(loop_end > loop_start);

        let int_pos = if data_pos < loop_end {
            data_pos
        } else {
            ((data_pos - loop_start) % (loop_end - loop_start)) + loop_start
        };

        // Rest of this loop iteration, then whole-loop repeats.
        let remaining = out.len().min(loop_end - int_pos);
        load_samples(
            &mut out[..remaining],
            &item.samples,
            src_chan,
            int_pos,
            src_step,
            item.block_align,
        );
        out = &mut out[remaining..];

        let loop_size = loop_end - loop_start;
        while !out.is_empty() {
            let to_fill = out.len().min(loop_size);
            load_samples(
                &mut out[..to_fill],
                &item.samples,
                src_chan,
                loop_start,
                src_step,
                item.block_align,
            );
            out = &mut out[to_fill..];
        }
    }
}

fn load_buffer_callback(
    item: &VoiceBufferItem,
    buffer_offset: usize,
    num_samples: usize,
    src_chan: usize,
    src_step: usize,
    mut out: &mut [f32],
) {
    let mut last_sample = 0.0f32;
    if num_samples > buffer_offset {
        let remaining = out.len().min(num_samples - buffer_offset);
        load_samples(
            &mut out[..remaining],
            &item.samples,
            src_chan,
            buffer_offset,
            src_step,
            item.block_align,
        );
        last_sample = out[remaining - 1];
        out = &mut out[remaining..];
    }
    out.fill(last_sample);
}

fn load_buffer_queue(
    item: &VoiceBufferItem,
    loop_item: *mut VoiceBufferItem,
    mut data_pos: usize,
    src_chan: usize,
    src_step: usize,
    mut out: &mut [f32],
) {
    let mut last_sample = 0.0f32;
    let mut cur: *const VoiceBufferItem = item;

    // Crawl the queue to fill the work buffer.
    while !cur.is_null() && !out.is_empty() {
        // SAFETY: queued items outlive voice references.
        let buf = unsafe { &*cur };
        if data_pos >= buf.sample_len {
            data_pos -= buf.sample_len;
            cur = buf.next.load(Ordering::Acquire);
            if cur.is_null() {
                cur = loop_item;
            }
            continue;
        }

        let remaining = out.len().min(buf.sample_len - data_pos);
        load_samples(
            &mut out[..remaining],
            &buf.samples,
            src_chan,
            data_pos,
            src_step,
            buf.block_align,
        );
        last_sample = out[remaining - 1];
        out = &mut out[remaining..];
        if out.is_empty() {
            break;
        }

        data_pos = 0;
        cur = buf.next.load(Ordering::Acquire);
        if cur.is_null() {
            cur = loop_item;
        }
    }
    out.fill(last_sample);
}

// ─── Filtering and specialized mixes ────────────────────────────────────

/// Run the active shelf filters, returning the slice to mix from.
fn do_filters<'a>(
    low_pass: &mut Biquad,
    high_pass: &mut Biquad,
    dst: &'a mut [f32],
    src: &'a [f32],
    mode: FilterMode,
) -> &'a [f32] {
    match (mode.low_pass, mode.high_pass) {
        (false, false) => {
            low_pass.clear();
            high_pass.clear();
            src
        }
        (true, false) => {
            high_pass.clear();
            low_pass.process(src, dst);
            &dst[..src.len()]
        }
        (false, true) => {
            low_pass.clear();
            high_pass.process(src, dst);
            &dst[..src.len()]
        }
        (true, true) => {
            DualBiquad { first: low_pass, second: high_pass }.process(src, dst);
            &dst[..src.len()]
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn do_hrtf_mix(
    samples: &[f32],
    parms: &mut DirectChanParams,
    target_gain: f32,
    counter: usize,
    out_pos: usize,
    is_playing: bool,
    hrtf: &mut HrtfMixState,
    extra_data: &mut [f32],
) {
    let ir_size = hrtf.ir_size;
    let todo = samples.len();

    // History followed by this block's input.
    let hrtf_samples = &mut extra_data[..HRTF_HISTORY_LENGTH + todo];
    hrtf_samples[..HRTF_HISTORY_LENGTH].copy_from_slice(&parms.hrtf.history);
    hrtf_samples[HRTF_HISTORY_LENGTH..].copy_from_slice(samples);
    if is_playing {
        // The tail of the buffer becomes next block's history.
        let keep = &hrtf_samples[todo..todo + HRTF_HISTORY_LENGTH];
        parms.hrtf.history.copy_from_slice(keep);
    }

    let mut out_pos = out_pos;
    let mut fademix = 0usize;
    if counter > 0 && out_pos == 0 {
        // First pass of a fade: blend from the old IR to the new one.
        fademix = todo.min(counter);

        let gain = if counter > fademix {
            let a = fademix as f32 / counter as f32;
            parms.hrtf.old.gain + (target_gain - parms.hrtf.old.gain) * a
        } else {
            target_gain
        };

        let hrtfparams = MixHrtfFilter {
            coeffs: &parms.hrtf.target.coeffs,
            delays: parms.hrtf.target.delays,
            gain: 0.0,
            gain_step: gain / fademix as f32,
        };
        mix_hrtf_blend(
            hrtf_samples,
            &mut hrtf.accum[out_pos..],
            ir_size,
            &parms.hrtf.old,
            &hrtfparams,
            fademix,
        );

        parms.hrtf.old = parms.hrtf.target.clone();
        parms.hrtf.old.gain = gain;
        out_pos += fademix;
    }

    if fademix < todo {
        let remaining = todo - fademix;
        let gain = if counter > todo {
            let a = remaining as f32 / (counter - fademix) as f32;
            parms.hrtf.old.gain + (target_gain - parms.hrtf.old.gain) * a
        } else {
            target_gain
        };

        let hrtfparams = MixHrtfFilter {
            coeffs: &parms.hrtf.target.coeffs,
            delays: parms.hrtf.target.delays,
            gain: parms.hrtf.old.gain,
            gain_step: (gain - parms.hrtf.old.gain) / remaining as f32,
        };
        mix_hrtf(
            &hrtf_samples[fademix..],
            &mut hrtf.accum[out_pos..],
            ir_size,
            &hrtfparams,
            remaining,
        );
        parms.hrtf.old.gain = gain;
    }
}

#[allow(clippy::too_many_arguments)]
fn do_nfc_mix(
    samples: &[f32],
    out_bufs: &mut [BufferLine],
    parms: &mut DirectChanParams,
    target: &[f32],
    counter: usize,
    out_pos: usize,
    chan_counts: &[usize; MAX_AMBI_ORDER + 1],
    extra_data: &mut [f32],
) {
    // W (order 0) mixes unfiltered.
    mix_samples(
        samples,
        &mut out_bufs[..1],
        &mut parms.current[..1],
        &target[..1],
        counter,
        out_pos,
    );

    let nfc_samples = &mut extra_data[..samples.len()];
    let mut offset = 1usize;
    for order in 1..=MAX_AMBI_ORDER {
        let chan_count = chan_counts[order];
        if chan_count == 0 {
            break;
        }
        parms.nfc_filter.process_order(order, samples, nfc_samples);
        mix_samples(
            nfc_samples,
            &mut out_bufs[offset..offset + chan_count],
            &mut parms.current[offset..],
            &target[offset..],
            counter,
            out_pos,
        );
        offset += chan_count;
    }
}

/// Gain triplet carried through parameter calculation.
#[derive(Debug, Clone, Copy)]
pub struct GainTriplet {
    pub base: f32,
    pub hf: f32,
    pub lf: f32,
}

impl Default for GainTriplet {
    fn default() -> Self {
        Self { base: 1.0, hf: 1.0, lf: 1.0 }
    }
}
