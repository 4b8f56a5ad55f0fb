//! HRIR storage and HRTF convolution mixers
//!
//! The store keeps impulse-response pairs over elevation/azimuth grids,
//! optionally across several measurement distances (fields ordered far to
//! near). Voices look up a coefficient/delay pair per direction; the mix
//! kernels convolve into a shared stereo accumulator which the device
//! drains after all voices have mixed.
//!
//! Dataset files are loaded elsewhere; this store is constructed from
//! in-memory data (see [`HrtfStore::new`] and the synthetic test set).

use sf_core::{BufferLine, BUFFER_LINE_SIZE};
use sf_dsp::BandSplitter;

/// Taps of one impulse response.
pub const HRIR_LENGTH: usize = 32;
/// Input history kept ahead of each HRTF mix; bounds the delay range.
pub const HRTF_HISTORY_LENGTH: usize = 64;
/// Stereo accumulator length for one mix pass.
pub const HRTF_ACCUM_LENGTH: usize = BUFFER_LINE_SIZE + HRIR_LENGTH;

/// One direction's response: coefficient pairs plus integer delays.
#[derive(Debug, Clone)]
pub struct HrirEntry {
    pub coeffs: [[f32; 2]; HRIR_LENGTH],
    pub delays: [u32; 2],
}

impl Default for HrirEntry {
    fn default() -> Self {
        Self { coeffs: [[0.0; 2]; HRIR_LENGTH], delays: [0; 2] }
    }
}

/// Responses over one measurement distance.
#[derive(Debug, Clone)]
pub struct HrtfField {
    /// Measurement distance in meters.
    pub distance: f32,
    /// Azimuth counts per elevation row, bottom (-90) to top (+90).
    pub azimuth_counts: Vec<usize>,
    /// Row-major HRIR entries.
    pub entries: Vec<HrirEntry>,
}

/// Per-direction filter state targeted by a voice's dry path.
#[derive(Debug, Clone, Default)]
pub struct HrtfFilter {
    pub coeffs: [[f32; 2]; HRIR_LENGTH],
    pub delays: [u32; 2],
    pub gain: f32,
}

/// Stepped-gain filter parameters for one mix pass.
pub struct MixHrtfFilter<'a> {
    pub coeffs: &'a [[f32; 2]; HRIR_LENGTH],
    pub delays: [u32; 2],
    pub gain: f32,
    pub gain_step: f32,
}

/// The HRIR dataset.
pub struct HrtfStore {
    sample_rate: u32,
    ir_size: usize,
    /// Fields sorted far to near.
    fields: Vec<HrtfField>,
}

impl HrtfStore {
    /// Build a store from raw fields. Fields must be sorted far to near
    /// and hold at least one entry each.
    pub fn new(
        sample_rate: u32,
        ir_size: usize,
        fields: Vec<HrtfField>,
    ) -> Result<Self, crate::SpatialError> {
        if ir_size > HRIR_LENGTH {
            return Err(crate::SpatialError::HrtfIrLength(ir_size));
        }
        if fields.iter().any(|f| f.entries.is_empty()) || fields.is_empty() {
            return Err(crate::SpatialError::HrtfEmptyField);
        }
        if fields.windows(2).any(|w| w[0].distance < w[1].distance) {
            return Err(crate::SpatialError::HrtfFieldOrder);
        }
        Ok(Self::from_parts(sample_rate, ir_size, fields))
    }

    fn from_parts(sample_rate: u32, ir_size: usize, fields: Vec<HrtfField>) -> Self {
        Self { sample_rate, ir_size, fields }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn ir_size(&self) -> usize {
        self.ir_size
    }

    /// A small synthetic dataset: spherical-head ITD and a shadowing
    /// low-pass baked into short IRs. Good enough for tests and as a
    /// fallback when no measured set is available.
    pub fn synthetic(sample_rate: u32) -> Self {
        const EV_COUNT: usize = 7;
        let mut azimuth_counts = Vec::with_capacity(EV_COUNT);
        let mut entries = Vec::new();

        let head_radius = 0.09f32;
        let speed = sf_core::SPEED_OF_SOUND_METERS_PER_SEC;

        for ei in 0..EV_COUNT {
            let elev = -90.0f32 + 180.0 * ei as f32 / (EV_COUNT - 1) as f32;
            let az_count = match ei {
                0 | 6 => 1,
                1 | 5 => 8,
                _ => 16,
            };
            azimuth_counts.push(az_count);

            for ai in 0..az_count {
                let az = std::f32::consts::TAU * ai as f32 / az_count as f32;
                let (sin_az, cos_az) = az.sin_cos();
                let cos_ev = (elev.to_radians()).cos();

                // Lateral offset drives both delay and shadowing; the
                // near ear gets the short delay. Negative lateral is
                // left.
                let lateral = sin_az * cos_ev;
                let itd = head_radius / speed * sample_rate as f32;
                let ldelay = (itd * (1.0 + lateral).max(0.0)).round() as u32;
                let rdelay = (itd * (1.0 - lateral).max(0.0)).round() as u32;

                let lgain = (0.5 * (1.0 - lateral) + 0.5).min(1.0);
                let rgain = (0.5 * (1.0 + lateral) + 0.5).min(1.0);
                // Mild front-back cue.
                let front = (-cos_az).max(0.0) * 0.25 + 0.75;

                let mut entry = HrirEntry::default();
                entry.delays = [ldelay.min(31), rdelay.min(31)];
                entry.coeffs[0] = [lgain * front, rgain * front];
                entry.coeffs[1] = [lgain * front * 0.25, rgain * front * 0.25];
                entries.push(entry);
            }
        }

        let field = HrtfField { distance: 1.4, azimuth_counts, entries };
        Self::from_parts(sample_rate, 8, vec![field])
    }

    fn field_for_distance(&self, distance: f32) -> &HrtfField {
        // Fields are far to near; pick the nearest field whose distance
        // still covers the source.
        let mut chosen = &self.fields[0];
        for field in &self.fields[1..] {
            if field.distance >= distance {
                chosen = field;
            } else {
                break;
            }
        }
        chosen
    }

    fn entry_at(field: &HrtfField, elevation: f32, azimuth: f32) -> &HrirEntry {
        let ev_count = field.azimuth_counts.len();
        let ev_idx = (((elevation / std::f32::consts::PI + 0.5) * (ev_count - 1) as f32)
            .round() as isize)
            .clamp(0, ev_count as isize - 1) as usize;

        let az_count = field.azimuth_counts[ev_idx];
        let mut az = azimuth;
        if az < 0.0 {
            az += std::f32::consts::TAU;
        }
        let az_idx = ((az / std::f32::consts::TAU * az_count as f32).round() as usize) % az_count;

        let row_base: usize = field.azimuth_counts[..ev_idx].iter().sum();
        &field.entries[row_base + az_idx]
    }

    /// Look up the response for a direction. `spread` blends the response
    /// toward the field's diffuse average, widening the perceived source.
    pub fn get_coeffs(
        &self,
        elevation: f32,
        azimuth: f32,
        distance: f32,
        spread: f32,
        coeffs: &mut [[f32; 2]; HRIR_LENGTH],
        delays: &mut [u32; 2],
    ) {
        let field = self.field_for_distance(distance);
        let entry = Self::entry_at(field, elevation, azimuth);

        let coverage = (spread * std::f32::consts::FRAC_1_PI * 0.5).clamp(0.0, 1.0);
        if coverage <= 0.0 {
            *coeffs = entry.coeffs;
            *delays = entry.delays;
            return;
        }

        // Average over the field approximates a fully diffuse source.
        let inv_n = 1.0 / field.entries.len() as f32;
        let mut avg = [[0.0f32; 2]; HRIR_LENGTH];
        for e in &field.entries {
            for (a, c) in avg.iter_mut().zip(e.coeffs.iter()) {
                a[0] += c[0] * inv_n;
                a[1] += c[1] * inv_n;
            }
        }

        for ((out, &dir), &dif) in coeffs.iter_mut().zip(entry.coeffs.iter()).zip(avg.iter()) {
            out[0] = dir[0] + (dif[0] - dir[0]) * coverage;
            out[1] = dir[1] + (dif[1] - dir[1]) * coverage;
        }
        *delays = [
            (entry.delays[0] as f32 * (1.0 - coverage)) as u32,
            (entry.delays[1] as f32 * (1.0 - coverage)) as u32,
        ];
    }
}

// ─── Mix kernels ────────────────────────────────────────────────────────

/// Convolve `todo` input samples into the accumulator with a stepped gain.
/// `in_samples` carries `HRTF_HISTORY_LENGTH` history samples first.
pub fn mix_hrtf(
    in_samples: &[f32],
    accum: &mut [[f32; 2]],
    ir_size: usize,
    filter: &MixHrtfFilter,
    todo: usize,
) {
    let ldelay = HRTF_HISTORY_LENGTH - filter.delays[0] as usize;
    let rdelay = HRTF_HISTORY_LENGTH - filter.delays[1] as usize;

    let mut gain = filter.gain;
    for i in 0..todo {
        gain += filter.gain_step;
        let left = in_samples[ldelay + i] * gain;
        let right = in_samples[rdelay + i] * gain;
        for (j, c) in filter.coeffs[..ir_size].iter().enumerate() {
            accum[i + j][0] += c[0] * left;
            accum[i + j][1] += c[1] * right;
        }
    }
}

/// Crossfade from an old response to a new one over `todo` samples: the
/// old IR fades out while the new fades in, both convolving the same
/// input.
pub fn mix_hrtf_blend(
    in_samples: &[f32],
    accum: &mut [[f32; 2]],
    ir_size: usize,
    old: &HrtfFilter,
    new: &MixHrtfFilter,
    todo: usize,
) {
    let old_ldelay = HRTF_HISTORY_LENGTH - old.delays[0] as usize;
    let old_rdelay = HRTF_HISTORY_LENGTH - old.delays[1] as usize;
    let new_ldelay = HRTF_HISTORY_LENGTH - new.delays[0] as usize;
    let new_rdelay = HRTF_HISTORY_LENGTH - new.delays[1] as usize;

    let old_step = old.gain / todo as f32;
    let mut old_gain = old.gain;
    let mut new_gain = new.gain;

    for i in 0..todo {
        old_gain -= old_step;
        new_gain += new.gain_step;

        let ol = in_samples[old_ldelay + i] * old_gain;
        let or = in_samples[old_rdelay + i] * old_gain;
        let nl = in_samples[new_ldelay + i] * new_gain;
        let nr = in_samples[new_rdelay + i] * new_gain;

        for j in 0..ir_size {
            accum[i + j][0] += old.coeffs[j][0] * ol + new.coeffs[j][0] * nl;
            accum[i + j][1] += old.coeffs[j][1] * or + new.coeffs[j][1] * nr;
        }
    }
}

/// Per-dry-channel state for the direct (non-voice) HRTF decode.
#[derive(Debug, Clone)]
pub struct HrtfChannelState {
    pub splitter: BandSplitter,
    pub hf_scale: f32,
    pub coeffs: [[f32; 2]; HRIR_LENGTH],
}

impl HrtfChannelState {
    pub fn new() -> Self {
        Self {
            splitter: BandSplitter::default(),
            hf_scale: 1.0,
            coeffs: [[0.0; 2]; HRIR_LENGTH],
        }
    }
}

impl Default for HrtfChannelState {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode the ambisonic dry mix binaurally: each dry channel convolves
/// through its decode IR into the accumulator, which then drains into the
/// left/right outputs and shifts for the next block.
#[allow(clippy::too_many_arguments)]
pub fn mix_direct_hrtf(
    left_out: &mut BufferLine,
    right_out: &mut BufferLine,
    in_samples: &[BufferLine],
    accum: &mut [[f32; 2]],
    temp: &mut [f32; BUFFER_LINE_SIZE],
    chan_states: &mut [HrtfChannelState],
    ir_size: usize,
    todo: usize,
) {
    for (input, state) in in_samples.iter().zip(chan_states.iter_mut()) {
        temp[..todo].copy_from_slice(&input[..todo]);
        state.splitter.process_scale(&mut temp[..todo], state.hf_scale, 1.0);

        for i in 0..todo {
            let insample = temp[i];
            for (j, c) in state.coeffs[..ir_size].iter().enumerate() {
                accum[i + j][0] += c[0] * insample;
                accum[i + j][1] += c[1] * insample;
            }
        }
    }

    for i in 0..todo {
        left_out[i] += accum[i][0];
        right_out[i] += accum[i][1];
    }

    // Shift the convolution tail to the front for the next block.
    accum.copy_within(todo..todo + ir_size, 0);
    for a in accum[ir_size..].iter_mut() {
        *a = [0.0; 2];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_lookup_lateralizes() {
        let store = HrtfStore::synthetic(48000);
        let mut coeffs = [[0.0f32; 2]; HRIR_LENGTH];
        let mut delays = [0u32; 2];

        // Hard left source: left ear louder and earlier.
        store.get_coeffs(0.0, -std::f32::consts::FRAC_PI_2, 1.0, 0.0, &mut coeffs, &mut delays);
        assert!(coeffs[0][0] > coeffs[0][1], "{:?}", coeffs[0]);
        assert!(delays[0] <= delays[1], "{delays:?}");
    }

    #[test]
    fn test_mix_hrtf_accumulates_impulse() {
        let mut in_samples = vec![0.0f32; HRTF_HISTORY_LENGTH + 64];
        in_samples[HRTF_HISTORY_LENGTH] = 1.0;
        let mut accum = vec![[0.0f32; 2]; 64 + HRIR_LENGTH];

        let mut coeffs = [[0.0f32; 2]; HRIR_LENGTH];
        coeffs[0] = [0.5, 0.25];
        let filter = MixHrtfFilter { coeffs: &coeffs, delays: [0, 0], gain: 1.0, gain_step: 0.0 };
        mix_hrtf(&in_samples, &mut accum, 4, &filter, 64);

        assert!((accum[0][0] - 0.5).abs() < 1e-6);
        assert!((accum[0][1] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_blend_crossfades_gains() {
        let in_samples = vec![1.0f32; HRTF_HISTORY_LENGTH + 64];
        let mut accum = vec![[0.0f32; 2]; 64 + HRIR_LENGTH];

        let mut old = HrtfFilter::default();
        old.coeffs[0] = [1.0, 1.0];
        old.gain = 1.0;
        let mut newc = [[0.0f32; 2]; HRIR_LENGTH];
        newc[0] = [1.0, 1.0];
        let new =
            MixHrtfFilter { coeffs: &newc, delays: [0, 0], gain: 0.0, gain_step: 1.0 / 64.0 };

        mix_hrtf_blend(&in_samples, &mut accum, 1, &old, &new, 64);
        // Old fades out as new fades in: the sum stays near unity.
        assert!((accum[32][0] - 1.0).abs() < 0.05, "mid-fade sum {}", accum[32][0]);
    }

    #[test]
    fn test_direct_mix_drains_accumulator() {
        let mut left = [0.0f32; BUFFER_LINE_SIZE];
        let mut right = [0.0f32; BUFFER_LINE_SIZE];
        let mut dry = vec![[0.0f32; BUFFER_LINE_SIZE]; 1];
        dry[0][0] = 1.0;
        let mut accum = vec![[0.0f32; 2]; HRTF_ACCUM_LENGTH];
        let mut temp = [0.0f32; BUFFER_LINE_SIZE];
        let mut states = vec![HrtfChannelState::new()];
        states[0].coeffs[0] = [0.7, 0.7];

        mix_direct_hrtf(
            &mut left,
            &mut right,
            &dry,
            &mut accum,
            &mut temp,
            &mut states,
            4,
            128,
        );
        let peak = left.iter().fold(0.0f32, |m, &v| m.max(v.abs()));
        assert!(peak > 0.1, "direct HRTF mix produced no output");
    }
}
