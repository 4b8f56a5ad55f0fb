//! End-to-end rendering scenarios driven through the control surface.

use std::sync::{Arc, Mutex};

use sf_core::{DeviceConfig, FmtChannels, FmtType, SampleData, SpatializeMode};
use sf_engine::events::EVT_SOURCE_STATE;
use sf_engine::{
    AsyncEvent, AsyncSrcState, Device, EffectProps, EffectSlot, EffectState, EffectTarget,
    OutputBuffer, PlayState, VChangeState, Voice, VoiceBufferItem, VoiceProps,
};

fn stereo_device() -> Device {
    Device::new(DeviceConfig::default()).expect("default device opens")
}

/// Set up one mono float voice on a fresh context, returning the context
/// index. The caller owns the buffer item.
fn setup_mono_voice(
    device: &mut Device,
    item: &mut VoiceBufferItem,
    frequency: u32,
    looping: bool,
) -> usize {
    let ctx = device.create_context(64);
    device.with_context(ctx, |c, info| {
        let mut voice = Voice::new();
        voice.fmt_channels = FmtChannels::Mono;
        voice.fmt_type = FmtType::F32;
        voice.frequency = frequency;
        voice.frame_step = 1;
        voice.flags.is_static = true;
        voice.prepare(info);
        c.voices.push(voice);
    });

    let shared = device.voice_shared(ctx, 0);
    shared.current_buffer.store(item as *mut _, std::sync::atomic::Ordering::Relaxed);
    if looping {
        shared.loop_buffer.store(item as *mut _, std::sync::atomic::Ordering::Relaxed);
    }
    shared.position.store(0, std::sync::atomic::Ordering::Relaxed);
    shared.position_frac.store(0, std::sync::atomic::Ordering::Relaxed);
    shared.source_id.store(1, std::sync::atomic::Ordering::Relaxed);
    ctx
}

fn front_3d_props() -> VoiceProps {
    VoiceProps {
        position: [0.0, 0.0, -1.0],
        panning_enabled: false,
        spatialize_mode: SpatializeMode::Auto,
        ..Default::default()
    }
}

#[test]
fn test_silence_through() {
    // No voices, no effects: a full render of exact zeros.
    let mut device = stereo_device();
    let _ctx = device.create_context(16);

    let mut out = vec![0.1f32; 1024 * 2];
    device.render_samples(&mut OutputBuffer::F32(&mut out), 1024, 2);

    assert_eq!(out.len(), 2048);
    assert!(out.iter().all(|&s| s == 0.0), "expected silence");
}

#[test]
fn test_static_mono_loop_impulse_period() {
    // A unit impulse in a 1024-sample loop at 22050 Hz should recur every
    // 48000/22050*1024 output samples on a 48 kHz device.
    let mut device = stereo_device();

    let mut samples = vec![0.0f32; 1024];
    samples[0] = 1.0;
    let mut item = VoiceBufferItem::new(SampleData::F32(samples), 1024);
    item.set_loop(0, 1024).expect("valid loop region");

    let ctx = setup_mono_voice(&mut device, &mut item, 22050, true);
    let shared = device.context_shared(ctx);
    shared
        .publish_voice_props(&device.voice_shared(ctx, 0), front_3d_props())
        .expect("props accepted");
    shared.vchange.publish(VChangeState::Play, Some(0), None, 1);

    let frames = 12000usize;
    let mut out = vec![0.0f32; frames * 2];
    device.render_samples(&mut OutputBuffer::F32(&mut out), frames, 2);

    // Find impulse peaks in the left channel.
    let left: Vec<f32> = out.iter().step_by(2).copied().collect();
    let peak = left.iter().fold(0.0f32, |m, &v| m.max(v.abs()));
    assert!(peak > 0.05, "no signal rendered, peak {peak}");

    // The linear resampler can split an impulse across two output
    // samples, so detect at well under half the global peak.
    let mut peaks = Vec::new();
    for (i, &s) in left.iter().enumerate() {
        if s.abs() > peak * 0.35 && peaks.last().map_or(true, |&p: &usize| i > p + 16) {
            peaks.push(i);
        }
    }
    assert!(peaks.len() >= 3, "expected several impulse repeats, got {peaks:?}");

    let expect_period = 48000.0 / 22050.0 * 1024.0;
    for pair in peaks.windows(2) {
        let period = (pair[1] - pair[0]) as f32;
        assert!(
            (period - expect_period).abs() <= 2.0,
            "impulse period {period}, expected ~{expect_period}"
        );
    }
}

#[test]
fn test_inverse_distance_attenuation_halves_gain() {
    // refDist=1, rolloff=1, distance=2: the dry base gain halves.
    let mut device = stereo_device();

    let samples = vec![0.5f32; 256];
    let mut item = VoiceBufferItem::new(SampleData::F32(samples), 256);
    let ctx = setup_mono_voice(&mut device, &mut item, 48000, true);

    let shared = device.context_shared(ctx);
    let voice_shared = device.voice_shared(ctx, 0);
    shared.vchange.publish(VChangeState::Play, Some(0), None, 1);

    let gain_at = |device: &mut Device, dist: f32| -> f32 {
        let mut props = front_3d_props();
        props.position = [0.0, 0.0, -dist];
        shared.publish_voice_props(&voice_shared, props).expect("props accepted");
        let mut out = vec![0.0f32; 64 * 2];
        device.render_samples(&mut OutputBuffer::F32(&mut out), 64, 2);
        // The W-channel target gain scales directly with the attenuated
        // base gain.
        device.with_context(ctx, |c, _| c.voices[0].chans[0].dry_params.target[0])
    };

    let near = gain_at(&mut device, 1.0);
    let far = gain_at(&mut device, 2.0);
    assert!(near > 0.0);
    assert!(
        (far - near * 0.5).abs() < near * 0.01,
        "expected half gain: near {near}, far {far}"
    );
}

#[test]
fn test_doppler_extreme_clamps_step() {
    // Listener receding at the speed of sound: pitch collapses and the
    // step clamps to its minimum.
    let mut device = stereo_device();

    let samples = vec![0.5f32; 256];
    let mut item = VoiceBufferItem::new(SampleData::F32(samples), 256);
    let ctx = setup_mono_voice(&mut device, &mut item, 48000, true);

    let shared = device.context_shared(ctx);
    shared.vchange.publish(VChangeState::Play, Some(0), None, 1);

    let mut ctx_props = sf_engine::ContextProps::default();
    // Listener moving away along the line to the source (source is at
    // -Z, so away is +Z).
    ctx_props.velocity = [0.0, 0.0, ctx_props.speed_of_sound];
    shared.publish_context_props(ctx_props);
    shared
        .publish_voice_props(&device.voice_shared(ctx, 0), front_3d_props())
        .expect("props accepted");

    let mut out = vec![0.0f32; 64 * 2];
    device.render_samples(&mut OutputBuffer::F32(&mut out), 64, 2);

    let step = device.with_context(ctx, |c, _| c.voices[0].step);
    assert_eq!(step, 1, "doppler-collapsed pitch clamps to the minimum step");
}

struct RecordingEffect {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
    inject: f32,
}

impl EffectState for RecordingEffect {
    fn update(&mut self, _sample_rate: u32, _props: &EffectProps, _slot_gain: f32) {}

    fn process(&mut self, samples_to_do: usize, input: &[sf_core::BufferLine], output: &mut EffectTarget) {
        self.log.lock().unwrap().push(self.name);
        // Pass input through, plus a marker DC offset.
        for (out, inp) in output.main.iter_mut().zip(input.iter()) {
            for i in 0..samples_to_do {
                out[i] += inp[i] + self.inject;
            }
        }
    }
}

#[test]
fn test_effect_slot_chain_order() {
    // Slot A targets slot B; the sorted order must run A before B, and
    // B must see A's fresh output.
    let mut device = stereo_device();
    let ctx = device.create_context(16);
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    device.with_context(ctx, |c, _| {
        c.add_slot(EffectSlot::new(1, false)); // A = 0
        c.add_slot(EffectSlot::new(1, false)); // B = 1
    });

    let shared = device.context_shared(ctx);
    let slot_a = device.with_context(ctx, |c, _| c.slots[0].shared.clone());
    let slot_b = device.with_context(ctx, |c, _| c.slots[1].shared.clone());

    shared
        .publish_slot_props(
            0,
            &slot_a,
            sf_engine::EffectSlotProps {
                target: Some(1),
                state: Some(Box::new(RecordingEffect {
                    name: "A",
                    log: log.clone(),
                    inject: 0.25,
                })),
                ..Default::default()
            },
        )
        .expect("acyclic target accepted");
    shared
        .publish_slot_props(
            1,
            &slot_b,
            sf_engine::EffectSlotProps {
                target: None,
                state: Some(Box::new(RecordingEffect {
                    name: "B",
                    log: log.clone(),
                    inject: 0.0,
                })),
                ..Default::default()
            },
        )
        .expect("root slot accepted");

    let mut out = vec![0.0f32; 128 * 2];
    device.render_samples(&mut OutputBuffer::F32(&mut out), 128, 2);

    let order = log.lock().unwrap().clone();
    assert_eq!(&order[..2], &["A", "B"], "producer must run before consumer");

    // A injected DC into B's wet bus; B forwarded it to the dry mix, so
    // the decoded output is non-zero.
    let peak = out.iter().fold(0.0f32, |m, &v| m.max(v.abs()));
    assert!(peak > 0.0, "chained effect output never reached the mix");
}

#[test]
fn test_crossfade_reaches_target() {
    // Changing the gain between blocks fades over 64 samples, landing
    // exactly on the target.
    let mut device = stereo_device();

    let samples = vec![1.0f32; 4096];
    let mut item = VoiceBufferItem::new(SampleData::F32(samples), 4096);
    let ctx = setup_mono_voice(&mut device, &mut item, 48000, true);

    let shared = device.context_shared(ctx);
    let voice_shared = device.voice_shared(ctx, 0);
    shared.vchange.publish(VChangeState::Play, Some(0), None, 1);

    let mut props = front_3d_props();
    props.gain = 1.0;
    shared.publish_voice_props(&voice_shared, props.clone()).expect("props accepted");
    let mut out = vec![0.0f32; 256 * 2];
    device.render_samples(&mut OutputBuffer::F32(&mut out), 256, 2);

    props.gain = 0.25;
    shared.publish_voice_props(&voice_shared, props).expect("props accepted");
    device.render_samples(&mut OutputBuffer::F32(&mut out), 256, 2);

    // After a full block the fade has finished: current == target.
    device.with_context(ctx, |c, _| {
        let chan = &c.voices[0].chans[0];
        for (cur, tgt) in chan.dry_params.current.iter().zip(chan.dry_params.target.iter()) {
            assert!((cur - tgt).abs() < 1e-6, "fade did not land: {cur} vs {tgt}");
        }
    });
}

#[test]
fn test_exhaustion_emits_stop_event() {
    // A non-looping buffer running dry transitions to Stopping and posts
    // exactly one stop event.
    let mut device = stereo_device();

    let samples = vec![0.5f32; 100];
    let mut item = VoiceBufferItem::new(SampleData::F32(samples), 100);
    let ctx = setup_mono_voice(&mut device, &mut item, 48000, false);

    let shared = device.context_shared(ctx);
    shared.events.set_enabled(EVT_SOURCE_STATE);
    shared
        .publish_voice_props(&device.voice_shared(ctx, 0), front_3d_props())
        .expect("props accepted");
    shared.vchange.publish(VChangeState::Play, Some(0), None, 1);

    let mut out = vec![0.0f32; 1024 * 2];
    device.render_samples(&mut OutputBuffer::F32(&mut out), 1024, 2);

    let voice_shared = device.voice_shared(ctx, 0);
    assert_eq!(voice_shared.play_state(), PlayState::Stopping);

    let mut stop_events = 0;
    let mut play_events = 0;
    shared.events.drain(|evt| match evt {
        AsyncEvent::SourceState { state: AsyncSrcState::Stop, .. } => stop_events += 1,
        AsyncEvent::SourceState { state: AsyncSrcState::Play, .. } => play_events += 1,
        _ => {}
    });
    assert_eq!(stop_events, 1, "exactly one stop event");
    assert_eq!(play_events, 1, "the play change also evented");

    // The following block fades out and finishes the stop.
    device.render_samples(&mut OutputBuffer::F32(&mut out), 1024, 2);
    assert_eq!(voice_shared.play_state(), PlayState::Stopped);
}

#[test]
fn test_streaming_queue_buffer_complete_events() {
    use sf_engine::events::EVT_BUFFER_COMPLETE;

    let mut device = stereo_device();

    let mut item_b = Box::new(VoiceBufferItem::new(SampleData::F32(vec![0.25; 300]), 300));
    let mut item_a = Box::new(VoiceBufferItem::new(SampleData::F32(vec![0.5; 200]), 200));
    item_a
        .next
        .store(&mut *item_b as *mut _, std::sync::atomic::Ordering::Release);

    let ctx = device.create_context(64);
    device.with_context(ctx, |c, info| {
        let mut voice = Voice::new();
        voice.fmt_channels = FmtChannels::Mono;
        voice.fmt_type = FmtType::F32;
        voice.frequency = 48000;
        voice.frame_step = 1;
        // Streaming voice: not static, not callback.
        voice.prepare(info);
        c.voices.push(voice);
    });

    let shared = device.context_shared(ctx);
    shared.events.set_enabled(EVT_BUFFER_COMPLETE);
    let voice_shared = device.voice_shared(ctx, 0);
    voice_shared
        .current_buffer
        .store(&mut *item_a as *mut _, std::sync::atomic::Ordering::Relaxed);
    voice_shared.source_id.store(3, std::sync::atomic::Ordering::Relaxed);
    shared.publish_voice_props(&voice_shared, front_3d_props()).expect("props accepted");
    shared.vchange.publish(VChangeState::Play, Some(0), None, 3);

    // 600 frames covers both buffers (200 + 300) and runs dry.
    let mut out = vec![0.0f32; 600 * 2];
    device.render_samples(&mut OutputBuffer::F32(&mut out), 600, 2);

    let mut completed = 0u32;
    shared.events.drain(|evt| {
        if let AsyncEvent::BufferComplete { id, count } = evt {
            assert_eq!(id, 3);
            completed += count;
        }
    });
    assert_eq!(completed, 2, "both queued buffers completed");
}

#[test]
fn test_dither_is_deterministic() {
    let render_once = || {
        let mut cfg = DeviceConfig::default();
        cfg.dither_depth_bits = 8;
        let mut device = Device::new(cfg).unwrap();

        let samples: Vec<f32> = (0..512).map(|i| (i as f32 * 0.01).sin() * 0.25).collect();
        let mut item = VoiceBufferItem::new(SampleData::F32(samples), 512);
        let ctx = setup_mono_voice(&mut device, &mut item, 48000, true);
        let shared = device.context_shared(ctx);
        shared
            .publish_voice_props(&device.voice_shared(ctx, 0), front_3d_props())
            .expect("props accepted");
        shared.vchange.publish(VChangeState::Play, Some(0), None, 1);

        let mut out = vec![0.0f32; 2048 * 2];
        device.render_samples(&mut OutputBuffer::F32(&mut out), 2048, 2);
        out
    };

    let a = render_once();
    let b = render_once();
    assert_eq!(a, b, "same seed and input must dither identically");
}

#[test]
fn test_disconnect_posts_event_and_silences() {
    use sf_engine::events::EVT_DISCONNECT;

    let mut device = stereo_device();
    let samples = vec![0.5f32; 256];
    let mut item = VoiceBufferItem::new(SampleData::F32(samples), 256);
    let ctx = setup_mono_voice(&mut device, &mut item, 48000, true);
    let shared = device.context_shared(ctx);
    shared.events.set_enabled(EVT_DISCONNECT);
    shared
        .publish_voice_props(&device.voice_shared(ctx, 0), front_3d_props())
        .expect("props accepted");
    shared.vchange.publish(VChangeState::Play, Some(0), None, 1);

    let mut out = vec![0.0f32; 256 * 2];
    device.render_samples(&mut OutputBuffer::F32(&mut out), 256, 2);

    device.do_disconnect("backend went away");
    assert!(!device.is_connected());
    // Idempotent: a second call posts nothing extra.
    device.do_disconnect("again");

    let mut disconnects = 0;
    shared.events.drain(|evt| {
        if matches!(evt, AsyncEvent::Disconnect { .. }) {
            disconnects += 1;
        }
    });
    assert_eq!(disconnects, 1);

    assert_eq!(device.voice_shared(ctx, 0).play_state(), PlayState::Stopped);
}
