use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sf_dsp::biquad::{Biquad, BiquadType};

fn bench_biquad(c: &mut Criterion) {
    let mut filter = Biquad::new();
    filter.set_params_from_slope(BiquadType::HighShelf, 5000.0 / 48000.0, 0.5, 1.0);

    let src: Vec<f32> = (0..1024).map(|i| (i as f32 * 0.013).sin()).collect();
    let mut dst = vec![0.0f32; 1024];

    c.bench_function("biquad_block_1024", |b| {
        b.iter(|| {
            filter.process(black_box(&src), &mut dst);
            black_box(&dst);
        })
    });
}

fn bench_shelf_update(c: &mut Criterion) {
    let mut filter = Biquad::new();
    c.bench_function("shelf_param_update", |b| {
        b.iter(|| {
            filter.set_params_from_slope(
                BiquadType::LowShelf,
                black_box(250.0 / 48000.0),
                black_box(0.7),
                1.0,
            );
        })
    });
}

criterion_group!(benches, bench_biquad, bench_shelf_update);
criterion_main!(benches);
