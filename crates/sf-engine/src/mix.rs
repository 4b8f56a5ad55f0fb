//! The gain-stepped accumulate kernel
//!
//! Every voice-to-bus path runs through here: per output line, apply the
//! current gain, linearly stepping toward the target over the fade
//! counter, and accumulate. Gains at or below the silence threshold skip
//! the line entirely once any fade has finished.

use sf_core::{BufferLine, GAIN_SILENCE_THRESHOLD};

/// Mix `input` into `out_bufs[..]` starting at `out_pos`, stepping each
/// line's gain from `current` toward `target` over `counter` samples.
/// `current` is updated with the reached gains.
pub fn mix_samples(
    input: &[f32],
    out_bufs: &mut [BufferLine],
    current: &mut [f32],
    target: &[f32],
    counter: usize,
    out_pos: usize,
) {
    for ((out, cur), &tgt) in out_bufs.iter_mut().zip(current.iter_mut()).zip(target.iter()) {
        let mut gain = *cur;
        let fade = input.len().min(counter);

        let mut pos = 0;
        if fade > 0 && (gain - tgt).abs() > f32::EPSILON {
            let step = (tgt - gain) / counter as f32;
            while pos < fade {
                gain += step;
                out[out_pos + pos] += input[pos] * gain;
                pos += 1;
            }
            if counter == fade {
                gain = tgt;
            }
        } else if fade > 0 {
            gain = tgt;
        }
        *cur = gain;

        if gain.abs() > GAIN_SILENCE_THRESHOLD {
            for (o, &s) in out[out_pos + pos..out_pos + input.len()]
                .iter_mut()
                .zip(input[pos..].iter())
            {
                *o += s * gain;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_core::BUFFER_LINE_SIZE;

    #[test]
    fn test_steady_gain_accumulates() {
        let input = vec![1.0f32; 64];
        let mut out = vec![[0.0f32; BUFFER_LINE_SIZE]; 1];
        let mut current = [0.5f32];
        let target = [0.5f32];
        mix_samples(&input, &mut out, &mut current, &target, 0, 0);
        assert!((out[0][0] - 0.5).abs() < 1e-6);
        assert!((out[0][63] - 0.5).abs() < 1e-6);
        assert_eq!(out[0][64], 0.0);
    }

    #[test]
    fn test_fade_reaches_target_at_counter() {
        let input = vec![1.0f32; 128];
        let mut out = vec![[0.0f32; BUFFER_LINE_SIZE]; 1];
        let mut current = [0.0f32];
        let target = [1.0f32];
        mix_samples(&input, &mut out, &mut current, &target, 64, 0);

        // Linear ramp over the fade...
        assert!(out[0][0] < 0.05);
        assert!((out[0][31] - 0.5).abs() < 0.02);
        // ...then exactly the target.
        assert!((out[0][64] - 1.0).abs() < 1e-6);
        assert_eq!(current[0], 1.0);
    }

    #[test]
    fn test_silent_gain_skips() {
        let input = vec![1.0f32; 32];
        let mut out = vec![[0.0f32; BUFFER_LINE_SIZE]; 1];
        let mut current = [0.0f32];
        let target = [0.0f32];
        mix_samples(&input, &mut out, &mut current, &target, 0, 0);
        assert!(out[0].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_out_pos_offset() {
        let input = vec![1.0f32; 16];
        let mut out = vec![[0.0f32; BUFFER_LINE_SIZE]; 1];
        let mut current = [1.0f32];
        let target = [1.0f32];
        mix_samples(&input, &mut out, &mut current, &target, 0, 100);
        assert_eq!(out[0][99], 0.0);
        assert!((out[0][100] - 1.0).abs() < 1e-6);
        assert!((out[0][115] - 1.0).abs() < 1e-6);
        assert_eq!(out[0][116], 0.0);
    }
}
