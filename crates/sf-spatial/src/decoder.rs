//! B-Format to speaker-feed decoding

use sf_core::{BufferLine, MAX_AMBI_CHANNELS};
use sf_dsp::BandSplitter;

use crate::ambidefs::{sh_coeffs, ORDER_FROM_CHANNEL};

/// Per-order decode weights approximating max-rE weighting, which trades
/// a little level for better localization off-center.
const MAX_RE_WEIGHTS: [[f32; 5]; 5] = [
    [1.0, 0.0, 0.0, 0.0, 0.0],
    [1.0, 0.577, 0.0, 0.0, 0.0],
    [1.0, 0.775, 0.400, 0.0, 0.0],
    [1.0, 0.861, 0.612, 0.305, 0.0],
    [1.0, 0.906, 0.732, 0.501, 0.276],
];

/// Matrix decoder from the ambisonic dry bus to real output channels,
/// optionally dual-band (separate shelf-scaled HF matrix).
pub struct BFormatDec {
    /// Rows per output channel over the input ACNs.
    matrix: Vec<[f32; MAX_AMBI_CHANNELS]>,
    /// HF matrix + per-input splitters for dual-band decoding.
    dual_band: Option<DualBand>,
    num_inputs: usize,
}

struct DualBand {
    hf_matrix: Vec<[f32; MAX_AMBI_CHANNELS]>,
    splitters: Vec<BandSplitter>,
    hf_samples: Vec<f32>,
    lf_samples: Vec<f32>,
}

impl BFormatDec {
    /// Single-band decoder from explicit rows.
    pub fn new(matrix: Vec<[f32; MAX_AMBI_CHANNELS]>, num_inputs: usize) -> Self {
        Self { matrix, dual_band: None, num_inputs }
    }

    /// Dual-band decoder: `lf_matrix` below the crossover, `hf_matrix`
    /// above.
    pub fn new_dual_band(
        lf_matrix: Vec<[f32; MAX_AMBI_CHANNELS]>,
        hf_matrix: Vec<[f32; MAX_AMBI_CHANNELS]>,
        num_inputs: usize,
        xover_norm: f32,
        line_size: usize,
    ) -> Self {
        let splitters = vec![BandSplitter::new(xover_norm); num_inputs];
        Self {
            matrix: lf_matrix,
            dual_band: Some(DualBand {
                hf_matrix,
                splitters,
                hf_samples: vec![0.0; line_size],
                lf_samples: vec![0.0; line_size],
            }),
            num_inputs,
        }
    }

    /// Projection decoder for a speaker layout: each output row encodes
    /// its speaker direction (listener frame) with max-rE order weights.
    pub fn for_speakers(directions: &[[f32; 3]], order: usize) -> Self {
        let num_inputs = sf_core::ambi_channels_from_order(order);
        let weights = &MAX_RE_WEIGHTS[order];
        let norm = 1.0 / directions.len() as f32;

        let matrix = directions
            .iter()
            .map(|dir| {
                // Listener frame to ambisonic frame.
                let coeffs = sh_coeffs(-dir[2], -dir[0], dir[1]);
                let mut row = [0.0f32; MAX_AMBI_CHANNELS];
                for (acn, r) in row.iter_mut().enumerate().take(num_inputs) {
                    let l = ORDER_FROM_CHANNEL[acn] as usize;
                    *r = coeffs[acn] * weights[l] * norm;
                }
                row
            })
            .collect();

        Self { matrix, dual_band: None, num_inputs }
    }

    pub fn num_outputs(&self) -> usize {
        self.matrix.len()
    }

    /// The low-band (or only) matrix row for an output channel.
    pub fn row(&self, output: usize) -> [f32; MAX_AMBI_CHANNELS] {
        self.matrix[output]
    }

    /// Decode `todo` samples of the dry bus into the output lines,
    /// accumulating (outputs may already carry direct-channel content).
    pub fn process(&mut self, output: &mut [BufferLine], input: &[BufferLine], todo: usize) {
        match &mut self.dual_band {
            None => {
                for (row, out) in self.matrix.iter().zip(output.iter_mut()) {
                    for (acn, &gain) in row.iter().enumerate().take(self.num_inputs) {
                        if gain.abs() < 1e-10 {
                            continue;
                        }
                        let src = &input[acn];
                        for (o, &s) in out[..todo].iter_mut().zip(src[..todo].iter()) {
                            *o += s * gain;
                        }
                    }
                }
            }
            Some(db) => {
                for acn in 0..self.num_inputs {
                    db.splitters[acn].process(
                        &input[acn][..todo],
                        &mut db.hf_samples[..todo],
                        &mut db.lf_samples[..todo],
                    );
                    for (oi, out) in output.iter_mut().enumerate() {
                        let lf_gain = self.matrix[oi][acn];
                        let hf_gain = db.hf_matrix[oi][acn];
                        if lf_gain.abs() < 1e-10 && hf_gain.abs() < 1e-10 {
                            continue;
                        }
                        for i in 0..todo {
                            out[i] += db.lf_samples[i] * lf_gain + db.hf_samples[i] * hf_gain;
                        }
                    }
                }
            }
        }
    }

    /// Decode with front-image stabilization: the correlated part of the
    /// front left/right pair is partially redistributed into the center
    /// channel, keeping the phantom center stable against listener
    /// position.
    pub fn process_stablize(
        &mut self,
        output: &mut [BufferLine],
        input: &[BufferLine],
        lidx: usize,
        ridx: usize,
        cidx: usize,
        todo: usize,
    ) {
        self.process(output, input, todo);

        const STABLIZE: f32 = 0.5;
        for i in 0..todo {
            let l = output[lidx][i];
            let r = output[ridx][i];
            let mid = (l + r) * 0.5 * STABLIZE;
            output[lidx][i] = l - mid * 0.5;
            output[ridx][i] = r - mid * 0.5;
            output[cidx][i] += mid;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_core::BUFFER_LINE_SIZE;

    fn stereo_dec() -> BFormatDec {
        let dirs = [[-0.5, 0.0, -0.866025], [0.5, 0.0, -0.866025]];
        BFormatDec::for_speakers(&dirs, 1)
    }

    #[test]
    fn test_center_decodes_equally() {
        let mut dec = stereo_dec();
        let mut dry = vec![[0.0f32; BUFFER_LINE_SIZE]; 4];
        // Encode a front source.
        let coeffs = crate::panning::calc_direction_coeffs([0.0, 0.0, -1.0], 0.0);
        for (acn, line) in dry.iter_mut().enumerate() {
            line[0] = coeffs[acn];
        }
        let mut out = vec![[0.0f32; BUFFER_LINE_SIZE]; 2];
        dec.process(&mut out, &dry, 16);
        assert!((out[0][0] - out[1][0]).abs() < 1e-5, "{} vs {}", out[0][0], out[1][0]);
        assert!(out[0][0] > 0.0);
    }

    #[test]
    fn test_left_decodes_left() {
        let mut dec = stereo_dec();
        let mut dry = vec![[0.0f32; BUFFER_LINE_SIZE]; 4];
        let coeffs = crate::panning::calc_direction_coeffs([-1.0, 0.0, 0.0], 0.0);
        for (acn, line) in dry.iter_mut().enumerate() {
            line[0] = coeffs[acn];
        }
        let mut out = vec![[0.0f32; BUFFER_LINE_SIZE]; 2];
        dec.process(&mut out, &dry, 4);
        assert!(out[0][0] > out[1][0], "left {} right {}", out[0][0], out[1][0]);
    }

    #[test]
    fn test_stablize_feeds_center() {
        let dirs = [
            [-0.5, 0.0, -0.866025],
            [0.5, 0.0, -0.866025],
            [0.0, 0.0, -1.0],
        ];
        let mut dec = BFormatDec::for_speakers(&dirs, 1);
        let mut dry = vec![[0.0f32; BUFFER_LINE_SIZE]; 4];
        let coeffs = crate::panning::calc_direction_coeffs([0.0, 0.0, -1.0], 0.0);
        for (acn, line) in dry.iter_mut().enumerate() {
            for s in line.iter_mut().take(8) {
                *s = coeffs[acn];
            }
        }
        let mut out = vec![[0.0f32; BUFFER_LINE_SIZE]; 3];
        dec.process_stablize(&mut out, &dry, 0, 1, 2, 8);
        assert!(out[2][0] > 0.0, "center got nothing");
    }
}
