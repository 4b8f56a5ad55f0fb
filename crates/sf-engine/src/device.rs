//! The mixing device: owns the buses and drives `render_samples`
//!
//! Each inner iteration renders up to one bus line of frames: clear the
//! dry mix, take the mix lock, run every context (updates, voices,
//! effects), advance the clock, then post-process the ambisonic dry mix
//! to the real outputs, limit, distance-compensate, dither, and convert.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use sf_core::format::{
    sample_conv_i16, sample_conv_i32, sample_conv_i8, sample_conv_u16, sample_conv_u32,
    sample_conv_u8,
};
use sf_core::{
    BufferLine, Channel, CoreError, DevFmtType, DeviceChannels, DeviceConfig, RenderMode,
    StereoEncoding, UhjQuality, BUFFER_LINE_SIZE, INVALID_CHANNEL_INDEX, MAX_AMBI_ORDER,
    MAX_OUTPUT_CHANNELS, MIXER_CHANNELS_MAX, SPEED_OF_SOUND_METERS_PER_SEC,
};
use sf_dsp::{Bs2b, Bs2bPreset, NfcFilter, UhjEncoder};
use sf_spatial::hrtf::{mix_direct_hrtf, HrtfChannelState, HRIR_LENGTH, HRTF_ACCUM_LENGTH};
use sf_spatial::{AmbiChanMap, BFormatDec, HrtfStore};

use crate::context::{Context, ContextShared};
use crate::error::EngineError;
use crate::events::AsyncEvent;
use crate::params::DeviceParams;
use crate::voice::{PlayState, VoiceShared};

/// Crossover for dual-band ambisonic processing, Hz.
const XOVER_FREQ: f32 = 400.0;

/// Scratch buffers the voice pipeline works through. One set per device;
/// only the mixer thread touches them.
pub struct MixerScratch {
    /// Per-channel deinterleaved, resampled voice samples.
    pub sample_data: Vec<f32>,
    /// Resampler work line: history edge plus one bus line.
    pub resample_data: Vec<f32>,
    /// Filtered samples staging.
    pub filtered_data: [f32; BUFFER_LINE_SIZE],
    /// HRTF input assembly and NFC band staging.
    pub extra_data: Vec<f32>,
}

impl MixerScratch {
    fn new() -> Self {
        // Room for the largest decoder padding on every mixing channel.
        const MAX_DECODER_PADDING: usize = 256;
        Self {
            sample_data: vec![
                0.0;
                MIXER_CHANNELS_MAX * (BUFFER_LINE_SIZE + MAX_DECODER_PADDING + 4)
            ],
            resample_data: vec![0.0; BUFFER_LINE_SIZE + sf_core::MAX_RESAMPLER_PADDING],
            filtered_data: [0.0; BUFFER_LINE_SIZE],
            extra_data: vec![
                0.0;
                sf_spatial::HRTF_HISTORY_LENGTH + BUFFER_LINE_SIZE
            ],
        }
    }
}

/// Device-side HRTF rendering state.
pub struct HrtfMixState {
    pub ir_size: usize,
    pub accum: Vec<[f32; 2]>,
    pub channels: Vec<HrtfChannelState>,
}

impl HrtfMixState {
    /// Build the per-dry-channel decode IRs from virtual speaker
    /// responses.
    fn build(store: &HrtfStore, dry_channels: usize, xover_norm: f32) -> Self {
        // Cube corners plus axis points give adequate coverage for the
        // orders mixed here.
        const P: f32 = 0.577350269;
        let speakers: [[f32; 3]; 14] = [
            [-P, P, -P],
            [P, P, -P],
            [-P, P, P],
            [P, P, P],
            [-P, -P, -P],
            [P, -P, -P],
            [-P, -P, P],
            [P, -P, P],
            [0.0, 0.0, -1.0],
            [0.0, 0.0, 1.0],
            [-1.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, -1.0, 0.0],
        ];

        let mut channels = Vec::with_capacity(dry_channels);
        for _ in 0..dry_channels {
            let mut state = HrtfChannelState::new();
            state.splitter = sf_dsp::BandSplitter::new(xover_norm);
            channels.push(state);
        }

        let norm = 1.0 / speakers.len() as f32;
        let mut coeffs = [[0.0f32; 2]; HRIR_LENGTH];
        let mut delays = [0u32; 2];
        for dir in speakers.iter() {
            let ev = dir[1].clamp(-1.0, 1.0).asin();
            let az = dir[0].atan2(-dir[2]);
            store.get_coeffs(ev, az, f32::INFINITY, 0.0, &mut coeffs, &mut delays);

            let enc = sf_spatial::ambidefs::sh_coeffs(-dir[2], -dir[0], dir[1]);
            for (acn, chan) in channels.iter_mut().enumerate() {
                let gain = enc[acn] * norm;
                if gain.abs() < 1e-6 {
                    continue;
                }
                for (j, c) in coeffs.iter().enumerate() {
                    let lj = j + delays[0] as usize;
                    if lj < HRIR_LENGTH {
                        chan.coeffs[lj][0] += c[0] * gain;
                    }
                    let rj = j + delays[1] as usize;
                    if rj < HRIR_LENGTH {
                        chan.coeffs[rj][1] += c[1] * gain;
                    }
                }
            }
        }

        // Baked-in delays lengthen the responses to the full IR window.
        Self {
            ir_size: HRIR_LENGTH,
            accum: vec![[0.0; 2]; HRTF_ACCUM_LENGTH],
            channels,
        }
    }
}

/// Limits the real-output amplitude after post-processing.
pub trait Limiter: Send {
    fn process(&mut self, samples_to_do: usize, buffers: &mut [BufferLine]);
}

/// A plain peak limiter with exponential release; enough to keep dither
/// headroom honest without a full mastering chain.
pub struct GainLimiter {
    threshold: f32,
    gain: f32,
    release: f32,
}

impl GainLimiter {
    pub fn new(threshold: f32, sample_rate: u32) -> Self {
        Self {
            threshold,
            gain: 1.0,
            release: 1.0 - (-1.0 / (0.2 * sample_rate as f32)).exp(),
        }
    }
}

impl Limiter for GainLimiter {
    fn process(&mut self, samples_to_do: usize, buffers: &mut [BufferLine]) {
        for i in 0..samples_to_do {
            let mut peak = 0.0f32;
            for buf in buffers.iter() {
                peak = peak.max(buf[i].abs());
            }
            let needed = if peak * self.gain > self.threshold {
                self.threshold / peak
            } else {
                1.0
            };
            if needed < self.gain {
                self.gain = needed;
            } else {
                self.gain += (needed - self.gain) * self.release;
            }
            for buf in buffers.iter_mut() {
                buf[i] *= self.gain;
            }
        }
    }
}

/// Per-channel delay/gain compensation for mismatched speaker distances.
pub struct DistanceComp {
    channels: Vec<DistanceCompChan>,
}

struct DistanceCompChan {
    gain: f32,
    buffer: Vec<f32>,
    pos: usize,
}

impl DistanceComp {
    /// One entry per real output channel: (delay_samples, gain).
    pub fn new(entries: &[(usize, f32)]) -> Self {
        let channels = entries
            .iter()
            .map(|&(delay, gain)| DistanceCompChan {
                gain,
                buffer: vec![0.0; delay],
                pos: 0,
            })
            .collect();
        Self { channels }
    }

    fn apply(&mut self, buffers: &mut [BufferLine], samples_to_do: usize) {
        for (chan, buf) in self.channels.iter_mut().zip(buffers.iter_mut()) {
            if chan.buffer.is_empty() {
                for s in buf[..samples_to_do].iter_mut() {
                    *s *= chan.gain;
                }
                continue;
            }
            let len = chan.buffer.len();
            for s in buf[..samples_to_do].iter_mut() {
                let delayed = chan.buffer[chan.pos];
                chan.buffer[chan.pos] = *s;
                *s = delayed * chan.gain;
                chan.pos += 1;
                if chan.pos == len {
                    chan.pos = 0;
                }
            }
        }
    }
}

/// What finalizes the dry mix into the real output.
enum PostProcess {
    /// Dry bus is the output (raw ambisonic devices).
    None,
    AmbiDec,
    AmbiDecStablized { lidx: usize, ridx: usize, cidx: usize },
    Hrtf { lidx: usize, ridx: usize },
    Uhj { lidx: usize, ridx: usize },
    Bs2b { lidx: usize, ridx: usize },
}

/// Typed output buffers for sample conversion.
pub enum OutputBuffer<'a> {
    I8(&'a mut [i8]),
    U8(&'a mut [u8]),
    I16(&'a mut [i16]),
    U16(&'a mut [u16]),
    I32(&'a mut [i32]),
    U32(&'a mut [u32]),
    F32(&'a mut [f32]),
}

struct MixParams {
    amap: AmbiChanMap,
    buffer: Vec<BufferLine>,
}

struct RealOut {
    buffer: Vec<BufferLine>,
    channel_index: [u8; MAX_OUTPUT_CHANNELS],
    remix_map: Vec<sf_core::InputRemixMap>,
}

/// Per-voice device info needed by `Voice::prepare`.
pub struct VoicePrepareInfo {
    pub sample_rate: u32,
    pub ambi_order: usize,
    pub m2d: bool,
    pub uhj_quality: UhjQuality,
    pub has_uhj_encoder: bool,
    pub nfc_filter: NfcFilter,
    pub xover_freq: f32,
}

/// The output device and top-level mix driver.
pub struct Device {
    sample_rate: u32,
    fmt_type: DevFmtType,
    channels: DeviceChannels,
    ambi_order: usize,
    m2d: bool,
    render_mode: RenderMode,
    num_aux_sends: usize,
    uhj_quality: UhjQuality,

    dry: MixParams,
    real: RealOut,
    nfc_chan_counts: [usize; MAX_AMBI_ORDER + 1],
    avg_speaker_dist: f32,
    nfc_filter: NfcFilter,

    hrtf_store: Option<Arc<HrtfStore>>,
    hrtf_state: Option<HrtfMixState>,
    uhj_encoder: Option<UhjEncoder>,
    bs2b: Option<Bs2b>,
    ambi_decoder: Option<BFormatDec>,
    post_process: PostProcess,
    pub limiter: Option<Box<dyn Limiter>>,
    pub channel_delays: Option<DistanceComp>,

    dither_depth: f32,
    dither_seed: u32,

    contexts: Vec<Context>,
    mix_lock: RwLock<()>,

    samples_done: AtomicU32,
    clock_base_sec: AtomicU64,
    connected: AtomicBool,

    scratch: MixerScratch,
}

impl Device {
    pub fn new(config: DeviceConfig) -> Result<Self, EngineError> {
        if config.sample_rate == 0 {
            return Err(EngineError::SampleRate(config.sample_rate));
        }
        if config.ambi_order > MAX_AMBI_ORDER {
            return Err(CoreError::AmbiOrder(config.ambi_order).into());
        }

        let ambi_order = config.ambi_order.max(1);
        let m2d = config.horizontal_only;
        let dry_map = if m2d {
            AmbiChanMap::full_2d(ambi_order)
        } else {
            AmbiChanMap::full_3d(ambi_order)
        };

        // Dry lines per ambisonic order, for NFC processing.
        let mut nfc_chan_counts = [0usize; MAX_AMBI_ORDER + 1];
        for i in 0..dry_map.count {
            let acn = dry_map.index[i] as usize;
            let order = sf_spatial::ambidefs::ORDER_FROM_CHANNEL[acn] as usize;
            nfc_chan_counts[order] += 1;
        }

        let real_channels = config.channels.count(ambi_order);
        let mut channel_index = [INVALID_CHANNEL_INDEX; MAX_OUTPUT_CHANNELS];
        for (i, name) in config.channels.names().iter().enumerate() {
            channel_index[name.index()] = i as u8;
        }

        let dry_is_real = config.channels == DeviceChannels::Ambi3D;

        let mut device = Self {
            sample_rate: config.sample_rate,
            fmt_type: config.sample_type,
            channels: config.channels,
            ambi_order,
            m2d,
            render_mode: config.render_mode,
            num_aux_sends: config.num_aux_sends.min(sf_core::MAX_SEND_COUNT),
            uhj_quality: config.uhj_quality,
            dry: MixParams {
                amap: dry_map,
                buffer: Vec::new(),
            },
            real: RealOut {
                buffer: vec![[0.0; BUFFER_LINE_SIZE]; if dry_is_real { 0 } else { real_channels }],
                channel_index,
                remix_map: default_remix_map(),
            },
            nfc_chan_counts,
            avg_speaker_dist: config.avg_speaker_dist,
            nfc_filter: NfcFilter::default(),
            hrtf_store: None,
            hrtf_state: None,
            uhj_encoder: None,
            bs2b: None,
            ambi_decoder: None,
            post_process: PostProcess::None,
            limiter: None,
            channel_delays: None,
            dither_depth: if config.dither_depth_bits > 0 {
                (1u32 << (config.dither_depth_bits - 1)) as f32
            } else {
                0.0
            },
            dither_seed: 22222,
            contexts: Vec::new(),
            mix_lock: RwLock::new(()),
            samples_done: AtomicU32::new(0),
            clock_base_sec: AtomicU64::new(0),
            connected: AtomicBool::new(true),
            scratch: MixerScratch::new(),
        };
        device.dry.buffer = vec![[0.0; BUFFER_LINE_SIZE]; device.dry.amap.count];

        if device.avg_speaker_dist > 0.0 {
            let w1 = SPEED_OF_SOUND_METERS_PER_SEC
                / (device.avg_speaker_dist * device.sample_rate as f32);
            device.nfc_filter = NfcFilter::new(w1);
        }

        device.setup_post_process(&config);
        Ok(device)
    }

    fn setup_post_process(&mut self, config: &DeviceConfig) {
        if self.channels == DeviceChannels::Ambi3D {
            self.post_process = PostProcess::None;
            return;
        }

        let names = self.channels.names();
        let idx_of = |chan: Channel| names.iter().position(|&c| c == chan);

        // Binaural rendering needs a stereo output pair.
        let want_hrtf = config.render_mode == RenderMode::Hrtf
            || config.stereo_encoding == StereoEncoding::Hrtf;
        if want_hrtf && self.channels != DeviceChannels::Stereo {
            log::warn!("HRTF requires stereo output; falling back to normal rendering");
            self.render_mode = RenderMode::Normal;
        }
        if want_hrtf && self.channels == DeviceChannels::Stereo {
            let store = Arc::new(HrtfStore::synthetic(self.sample_rate));
            let state = HrtfMixState::build(
                &store,
                self.dry.amap.count,
                XOVER_FREQ / self.sample_rate as f32,
            );
            self.hrtf_store = Some(store);
            self.hrtf_state = Some(state);
            self.render_mode = RenderMode::Hrtf;
            self.post_process = PostProcess::Hrtf {
                lidx: idx_of(Channel::FrontLeft).unwrap_or(0),
                ridx: idx_of(Channel::FrontRight).unwrap_or(1),
            };
            return;
        }

        // Speaker decode for everything else.
        let directions: Vec<[f32; 3]> = names
            .iter()
            .filter(|&&c| c != Channel::Lfe)
            .map(speaker_direction)
            .collect();
        // Decoder rows must align with output lines; LFE rows decode to
        // silence and receive direct-channel content only.
        let mut rows = vec![[0.0f32; sf_core::MAX_AMBI_CHANNELS]; names.len()];
        let dec = BFormatDec::for_speakers(&directions, self.ambi_order);
        {
            let mut di = 0usize;
            for (i, &name) in names.iter().enumerate() {
                if name == Channel::Lfe {
                    continue;
                }
                rows[i] = dec_matrix_row(&dec, di);
                di += 1;
            }
        }
        self.ambi_decoder = Some(BFormatDec::new(
            rows,
            sf_core::ambi_channels_from_order(self.ambi_order),
        ));

        match (self.channels, config.stereo_encoding) {
            (DeviceChannels::Stereo, StereoEncoding::Uhj) => {
                self.uhj_encoder = Some(UhjEncoder::new());
                self.post_process = PostProcess::Uhj {
                    lidx: idx_of(Channel::FrontLeft).unwrap_or(0),
                    ridx: idx_of(Channel::FrontRight).unwrap_or(1),
                };
            }
            (DeviceChannels::Stereo, StereoEncoding::Crossfeed) => {
                self.bs2b =
                    Some(Bs2b::new(Bs2bPreset::Default, self.sample_rate, BUFFER_LINE_SIZE));
                self.post_process = PostProcess::Bs2b {
                    lidx: idx_of(Channel::FrontLeft).unwrap_or(0),
                    ridx: idx_of(Channel::FrontRight).unwrap_or(1),
                };
            }
            _ => {
                if let (Some(lidx), Some(ridx), Some(cidx)) = (
                    idx_of(Channel::FrontLeft),
                    idx_of(Channel::FrontRight),
                    idx_of(Channel::FrontCenter),
                ) {
                    self.post_process = PostProcess::AmbiDecStablized { lidx, ridx, cidx };
                } else {
                    self.post_process = PostProcess::AmbiDec;
                }
            }
        }
    }

    // ─── Control-layer surface ──────────────────────────────────────────

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sample_type(&self) -> DevFmtType {
        self.fmt_type
    }

    pub fn num_aux_sends(&self) -> usize {
        self.num_aux_sends
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Current device clock in nanoseconds.
    pub fn clock_time_ns(&self) -> u64 {
        let secs = self.clock_base_sec.load(Ordering::Relaxed);
        let samples = self.samples_done.load(Ordering::Relaxed) as u64;
        secs * 1_000_000_000 + samples * 1_000_000_000 / self.sample_rate as u64
    }

    /// Prepare-info snapshot for configuring voices.
    pub fn voice_prepare_info(&self) -> VoicePrepareInfo {
        VoicePrepareInfo {
            sample_rate: self.sample_rate,
            ambi_order: self.ambi_order,
            m2d: self.m2d,
            uhj_quality: self.uhj_quality,
            has_uhj_encoder: self.uhj_encoder.is_some(),
            nfc_filter: self.nfc_filter,
            xover_freq: XOVER_FREQ,
        }
    }

    /// Create a context; returns its index. Takes the mix lock.
    pub fn create_context(&mut self, event_capacity: usize) -> usize {
        let _guard = self.mix_lock.write();
        self.contexts.push(Context::new(event_capacity, self.num_aux_sends));
        self.contexts.len() - 1
    }

    pub fn context_shared(&self, ctx: usize) -> Arc<ContextShared> {
        self.contexts[ctx].shared.clone()
    }

    /// Mutate a context under the mix lock (control-layer setup calls).
    pub fn with_context<R>(&mut self, ctx: usize, f: impl FnOnce(&mut Context, &VoicePrepareInfo) -> R) -> R {
        let info = self.voice_prepare_info();
        let _guard = self.mix_lock.write();
        f(&mut self.contexts[ctx], &info)
    }

    pub fn voice_shared(&self, ctx: usize, voice: usize) -> Arc<VoiceShared> {
        self.contexts[ctx].voices[voice].shared.clone()
    }

    // ─── Render driver ──────────────────────────────────────────────────

    /// Render one inner iteration of up to a bus line of frames into the
    /// real output lines. Returns the frame count produced.
    fn render_samples_once(&mut self, num_samples: usize) -> usize {
        let samples_to_do = num_samples.min(BUFFER_LINE_SIZE);

        // Clear the main mixing buffers.
        for line in self.dry.buffer.iter_mut() {
            line.fill(0.0);
        }
        for line in self.real.buffer.iter_mut() {
            line.fill(0.0);
        }

        {
            let _mix_guard = self.mix_lock.write();

            let curtime = self.clock_time_ns();
            let dry_is_real = self.real.buffer.is_empty();

            // Split device state so contexts can borrow the pieces
            // disjointly.
            let dev_params = DeviceParams {
                sample_rate: self.sample_rate,
                num_sends: self.num_aux_sends,
                render_mode: self.render_mode,
                avg_speaker_dist: self.avg_speaker_dist,
                ambi_order: self.ambi_order,
                m2d: self.m2d,
                dry_map: &self.dry.amap,
                channel_index: &self.real.channel_index,
                remix_map: &self.real.remix_map,
                hrtf: self.hrtf_store.as_deref(),
                dry_is_real,
            };

            let dry_buffer = &mut self.dry.buffer;
            let real_buffer = &mut self.real.buffer;
            let scratch = &mut self.scratch;
            let mut hrtf_state = self.hrtf_state.as_mut();
            let nfc_counts = self.nfc_chan_counts;

            for ctx in self.contexts.iter_mut() {
                ctx.process(
                    &dev_params,
                    &mut dry_buffer[..],
                    &mut real_buffer[..],
                    &mut *scratch,
                    hrtf_state.as_deref_mut(),
                    nfc_counts,
                    curtime,
                    samples_to_do,
                );
            }

            // Fold whole seconds into the clock base so the sample count
            // never overflows its conversion.
            let samples_done =
                self.samples_done.load(Ordering::Relaxed) + samples_to_do as u32;
            let clock_base = self.clock_base_sec.load(Ordering::Relaxed)
                + (samples_done / self.sample_rate) as u64;
            self.samples_done.store(samples_done % self.sample_rate, Ordering::Relaxed);
            self.clock_base_sec.store(clock_base, Ordering::Relaxed);
        }

        self.apply_post_process(samples_to_do);

        let out_lines: &mut Vec<BufferLine> = if self.real.buffer.is_empty() {
            &mut self.dry.buffer
        } else {
            &mut self.real.buffer
        };

        if let Some(limiter) = self.limiter.as_mut() {
            limiter.process(samples_to_do, out_lines);
        }

        if let Some(delays) = self.channel_delays.as_mut() {
            delays.apply(out_lines, samples_to_do);
        }

        // Dither to the quantization depth. The RNG is a cheap LCG whose
        // pair of draws gives triangular-distributed noise.
        if self.dither_depth > 0.0 {
            let quant_scale = self.dither_depth;
            let inv_scale = 1.0 / quant_scale;
            const INV_RANGE: f64 = 1.0 / u32::MAX as f64;
            let mut seed = self.dither_seed;
            for line in out_lines.iter_mut() {
                for s in line[..samples_to_do].iter_mut() {
                    let mut val = *s * quant_scale;
                    seed = seed.wrapping_mul(96314165).wrapping_add(907633515);
                    let rng0 = seed;
                    seed = seed.wrapping_mul(96314165).wrapping_add(907633515);
                    let rng1 = seed;
                    val += (rng0 as f64 * INV_RANGE - rng1 as f64 * INV_RANGE) as f32;
                    *s = val.round() * inv_scale;
                }
            }
            self.dither_seed = seed;
        }

        samples_to_do
    }

    fn apply_post_process(&mut self, samples_to_do: usize) {
        match self.post_process {
            PostProcess::None => {}
            PostProcess::AmbiDec => {
                if let Some(dec) = self.ambi_decoder.as_mut() {
                    dec.process(&mut self.real.buffer, &self.dry.buffer, samples_to_do);
                }
            }
            PostProcess::AmbiDecStablized { lidx, ridx, cidx } => {
                if let Some(dec) = self.ambi_decoder.as_mut() {
                    dec.process_stablize(
                        &mut self.real.buffer,
                        &self.dry.buffer,
                        lidx,
                        ridx,
                        cidx,
                        samples_to_do,
                    );
                }
            }
            PostProcess::Hrtf { lidx, ridx } => {
                if let Some(state) = self.hrtf_state.as_mut() {
                    let (left, right) = stereo_pair(&mut self.real.buffer, lidx, ridx);
                    mix_direct_hrtf(
                        left,
                        right,
                        &self.dry.buffer,
                        &mut state.accum,
                        &mut self.scratch.filtered_data,
                        &mut state.channels,
                        state.ir_size,
                        samples_to_do,
                    );
                }
            }
            PostProcess::Uhj { lidx, ridx } => {
                if let Some(enc) = self.uhj_encoder.as_mut() {
                    // Dry lines are ACN ordered; X sits at line 2 for a
                    // horizontal mix, line 3 otherwise.
                    let x_line = if self.m2d { 2 } else { 3 };
                    let (left, right) = stereo_pair(&mut self.real.buffer, lidx, ridx);
                    enc.encode(
                        left,
                        right,
                        &self.dry.buffer[0],
                        &self.dry.buffer[x_line],
                        &self.dry.buffer[1],
                        samples_to_do,
                    );
                }
            }
            PostProcess::Bs2b { lidx, ridx } => {
                if let (Some(bs2b), Some(dec)) =
                    (self.bs2b.as_mut(), self.ambi_decoder.as_mut())
                {
                    // Keep the direct (real-out routed) stereo signal out
                    // of the crossfeed.
                    {
                        let (left, right) = stereo_pair(&mut self.real.buffer, lidx, ridx);
                        bs2b.storage[0][..samples_to_do].copy_from_slice(&left[..samples_to_do]);
                        bs2b.storage[1][..samples_to_do]
                            .copy_from_slice(&right[..samples_to_do]);
                        left[..samples_to_do].fill(0.0);
                        right[..samples_to_do].fill(0.0);
                    }

                    dec.process(&mut self.real.buffer, &self.dry.buffer, samples_to_do);

                    let (left, right) = stereo_pair(&mut self.real.buffer, lidx, ridx);
                    bs2b.cross_feed(&mut left[..samples_to_do], &mut right[..samples_to_do]);

                    for (l, &d) in left[..samples_to_do].iter_mut().zip(bs2b.storage[0].iter()) {
                        *l += d;
                    }
                    for (r, &d) in right[..samples_to_do].iter_mut().zip(bs2b.storage[1].iter()) {
                        *r += d;
                    }
                }
            }
        }
    }

    /// Render interleaved output. `frame_step` is the stride in samples
    /// between frames (at least the channel count; extras are zeroed).
    pub fn render_samples(&mut self, out: &mut OutputBuffer, frames: usize, frame_step: usize) {
        debug_assert!(frame_step > 0);
        let mut total = 0usize;
        while total < frames {
            let done = self.render_samples_once(frames - total);
            self.write_interleaved(out, total, done, frame_step);
            total += done;
        }
    }

    /// Render planar output, one buffer per channel.
    pub fn render_samples_planar(&mut self, outs: &mut [OutputBuffer], frames: usize) {
        let mut total = 0usize;
        while total < frames {
            let done = self.render_samples_once(frames - total);
            self.write_planar(outs, total, done);
            total += done;
        }
    }

    fn write_interleaved(
        &mut self,
        out: &mut OutputBuffer,
        offset: usize,
        todo: usize,
        frame_step: usize,
    ) {
        macro_rules! write_fmt {
            ($dst:expr, $conv:expr) => {{
                let lines = if self.real.buffer.is_empty() {
                    &self.dry.buffer
                } else {
                    &self.real.buffer
                };
                let dst = &mut $dst[offset * frame_step..(offset + todo) * frame_step];
                if frame_step > lines.len() {
                    for s in dst.iter_mut() {
                        *s = $conv(0.0);
                    }
                }
                for (c, line) in lines.iter().enumerate() {
                    for (i, &s) in line[..todo].iter().enumerate() {
                        dst[i * frame_step + c] = $conv(s);
                    }
                }
            }};
        }
        match out {
            OutputBuffer::I8(dst) => write_fmt!(dst, sample_conv_i8),
            OutputBuffer::U8(dst) => write_fmt!(dst, sample_conv_u8),
            OutputBuffer::I16(dst) => write_fmt!(dst, sample_conv_i16),
            OutputBuffer::U16(dst) => write_fmt!(dst, sample_conv_u16),
            OutputBuffer::I32(dst) => write_fmt!(dst, sample_conv_i32),
            OutputBuffer::U32(dst) => write_fmt!(dst, sample_conv_u32),
            OutputBuffer::F32(dst) => write_fmt!(dst, |s| s),
        }
    }

    fn write_planar(&mut self, outs: &mut [OutputBuffer], offset: usize, todo: usize) {
        let lines = if self.real.buffer.is_empty() {
            &self.dry.buffer
        } else {
            &self.real.buffer
        };
        for (line, out) in lines.iter().zip(outs.iter_mut()) {
            match out {
                OutputBuffer::I8(dst) => {
                    for (d, &s) in dst[offset..offset + todo].iter_mut().zip(line.iter()) {
                        *d = sample_conv_i8(s);
                    }
                }
                OutputBuffer::U8(dst) => {
                    for (d, &s) in dst[offset..offset + todo].iter_mut().zip(line.iter()) {
                        *d = sample_conv_u8(s);
                    }
                }
                OutputBuffer::I16(dst) => {
                    for (d, &s) in dst[offset..offset + todo].iter_mut().zip(line.iter()) {
                        *d = sample_conv_i16(s);
                    }
                }
                OutputBuffer::U16(dst) => {
                    for (d, &s) in dst[offset..offset + todo].iter_mut().zip(line.iter()) {
                        *d = sample_conv_u16(s);
                    }
                }
                OutputBuffer::I32(dst) => {
                    for (d, &s) in dst[offset..offset + todo].iter_mut().zip(line.iter()) {
                        *d = sample_conv_i32(s);
                    }
                }
                OutputBuffer::U32(dst) => {
                    for (d, &s) in dst[offset..offset + todo].iter_mut().zip(line.iter()) {
                        *d = sample_conv_u32(s);
                    }
                }
                OutputBuffer::F32(dst) => {
                    dst[offset..offset + todo].copy_from_slice(&line[..todo]);
                }
            }
        }
    }

    /// The backend signaled a dead connection: flag it, tell every
    /// context once, and (per context policy) stop all voices. Subsequent
    /// renders still produce silence.
    pub fn do_disconnect(&mut self, msg: &str) {
        let _guard = self.mix_lock.write();

        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        for ctx in self.contexts.iter_mut() {
            if ctx
                .shared
                .events
                .post(AsyncEvent::Disconnect { msg: msg.to_owned() })
            {
                ctx.shared.events.signal();
            }
            ctx.shared.connected.store(false, Ordering::Release);

            if !ctx.shared.stop_voices_on_disconnect.load(Ordering::Acquire) {
                ctx.process_voice_changes();
                continue;
            }
            for voice in ctx.voices.iter() {
                voice.shared.current_buffer.store(std::ptr::null_mut(), Ordering::Relaxed);
                voice.shared.loop_buffer.store(std::ptr::null_mut(), Ordering::Relaxed);
                voice.shared.source_id.store(0, Ordering::Relaxed);
                voice.shared.set_play_state(PlayState::Stopped);
            }
        }
    }
}

fn stereo_pair(
    buffers: &mut [BufferLine],
    lidx: usize,
    ridx: usize,
) -> (&mut BufferLine, &mut BufferLine) {
    debug_assert!(lidx < ridx);
    let (left, right) = buffers.split_at_mut(ridx);
    (&mut left[lidx], &mut right[0])
}

/// Listener-frame positions of named speakers.
fn speaker_direction(chan: &Channel) -> [f32; 3] {
    const SIN30: f32 = 0.5;
    const COS30: f32 = 0.866025403785;
    const SIN45: f32 = std::f32::consts::FRAC_1_SQRT_2;
    const SIN110: f32 = 0.939692620786;
    const COS110: f32 = -0.342020143326;
    match *chan {
        Channel::FrontLeft => [-SIN30, 0.0, -COS30],
        Channel::FrontRight => [SIN30, 0.0, -COS30],
        Channel::FrontCenter => [0.0, 0.0, -1.0],
        Channel::BackLeft => [-SIN45, 0.0, SIN45],
        Channel::BackRight => [SIN45, 0.0, SIN45],
        Channel::BackCenter => [0.0, 0.0, 1.0],
        Channel::SideLeft => [-SIN110, 0.0, -COS110],
        Channel::SideRight => [SIN110, 0.0, -COS110],
        _ => [0.0, 0.0, -1.0],
    }
}

fn dec_matrix_row(dec: &BFormatDec, row: usize) -> [f32; sf_core::MAX_AMBI_CHANNELS] {
    dec.row(row)
}

/// Default remix routes for inputs the output layout lacks.
fn default_remix_map() -> Vec<sf_core::InputRemixMap> {
    use Channel::*;
    vec![
        sf_core::InputRemixMap {
            channel: BackCenter,
            targets: vec![(BackLeft, 0.5), (BackRight, 0.5), (SideLeft, 0.5), (SideRight, 0.5)],
        },
        sf_core::InputRemixMap {
            channel: SideLeft,
            targets: vec![(BackLeft, 1.0), (FrontLeft, 0.5)],
        },
        sf_core::InputRemixMap {
            channel: SideRight,
            targets: vec![(BackRight, 1.0), (FrontRight, 0.5)],
        },
        sf_core::InputRemixMap {
            channel: BackLeft,
            targets: vec![(SideLeft, 1.0), (FrontLeft, 0.5)],
        },
        sf_core::InputRemixMap {
            channel: BackRight,
            targets: vec![(SideRight, 1.0), (FrontRight, 0.5)],
        },
    ]
}
