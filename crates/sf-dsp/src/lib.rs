//! sf-dsp: per-stream DSP for the Soundfield engine
//!
//! Everything here processes one voice channel or one bus line at a time
//! with persistent filter state:
//! - `biquad` - RBJ biquads and the shelf-from-slope filters the voice
//!   pipeline uses for its HF/LF gains
//! - `nfc` - near-field compensation filter bank (1st..4th order)
//! - `splitter` - crossover band splitter for ambisonic HF order scaling
//! - `resample` - point/linear/cubic/bsinc resampler kernels
//! - `uhj` - UHJ stereo-compatible encode and decode
//! - `bs2b` - Bauer stereo-to-binaural crossfeed

pub mod biquad;
pub mod bs2b;
pub mod nfc;
pub mod resample;
pub mod splitter;
pub mod uhj;

pub use biquad::{Biquad, BiquadType, FilterMode};
pub use bs2b::{Bs2b, Bs2bPreset};
pub use nfc::NfcFilter;
pub use resample::{InterpState, Resampler, ResamplerFunc};
pub use splitter::BandSplitter;
pub use uhj::{UhjAmbiDecoder, UhjEncoder, UhjStereoDecoder};
