mod common;

use common::{FRAME_TICKS, TestCore, state_of};
use warp_emu_core::config::{ConfigError, HostConfig};
use warp_emu_core::hardware::Button;
use warp_emu_core::host::Host;
use warp_emu_core::rewind::SeekError;

/// One 1/8 s pump at 800 ticks/s is exactly one 100-tick frame; both values
/// are exactly representable, so pumps never round a frame away.
const PUMP: f64 = 0.125;

fn test_config() -> HostConfig {
    HostConfig {
        frames_per_base_state: 3,
        buffer_capacity_bytes: 1 << 20,
        max_update_seconds: 0.25,
        ticks_per_second: 800,
        rewind_factor: 1.5,
    }
}

/// Pump `host` through `frames` one-frame advances, returning the final
/// wall-clock time. The caller has already anchored the clock at `start`.
fn pump_frames(host: &mut Host<TestCore>, start: f64, frames: u32) -> f64 {
    let mut now = start;
    for _ in 0..frames {
        now += PUMP;
        let events = host.advance(now);
        assert_eq!(events.frames, 1);
    }
    now
}

#[test]
fn construction_rejects_bad_config() {
    let config = HostConfig {
        frames_per_base_state: 0,
        ..test_config()
    };
    assert!(matches!(
        Host::new(TestCore::new(), config),
        Err(ConfigError::ZeroFramesPerBaseState)
    ));

    let config = HostConfig {
        buffer_capacity_bytes: 4,
        ..test_config()
    };
    assert!(matches!(
        Host::new(TestCore::new(), config),
        Err(ConfigError::CapacityTooSmall { .. })
    ));
}

#[test]
fn advance_reports_frames_and_audio() {
    let mut host = Host::new(TestCore::new(), test_config()).expect("host");
    let events = host.advance(0.0);
    assert_eq!(events, Default::default(), "the first pump only anchors");

    let mut frames = 0;
    let mut audio_buffers = 0;
    let mut now = 0.0;
    for _ in 0..7 {
        now += PUMP;
        let events = host.advance(now);
        frames += events.frames;
        audio_buffers += events.audio_buffers;
    }
    assert_eq!(host.ticks(), 700);
    assert_eq!(frames, 7);
    // Audio buffers fill every 350 ticks: at 350 and 700.
    assert_eq!(audio_buffers, 2);
    assert_eq!(host.oldest_tick(), Some(FRAME_TICKS));
    assert_eq!(host.newest_tick(), Some(700));
}

#[test]
fn stalls_are_clamped_to_the_update_budget() {
    let config = HostConfig {
        max_update_seconds: 5.0 / 60.0,
        ..test_config()
    };
    let mut host = Host::new(TestCore::new(), config).expect("host");
    host.advance(0.0);
    // A one-minute stall costs at most the ~83 ms budget (66 ticks at
    // 800/s), not 48k ticks.
    host.advance(60.0);
    assert_eq!(host.ticks(), 66);
}

#[test]
fn identical_input_schedules_produce_identical_states() {
    let run = || {
        let mut host = Host::new(TestCore::new(), test_config()).expect("host");
        host.advance(0.0);
        let mut now = 0.0;
        for frame in 1..=20u32 {
            if frame == 5 {
                host.set_button(Button::A, true);
            }
            if frame == 11 {
                host.set_button(Button::A, false);
                host.set_button(Button::Start, true);
            }
            now += PUMP;
            host.advance(now);
        }
        state_of(host.core())
    };
    assert_eq!(run(), run());
}

#[test]
fn rewind_then_resume_continues_from_the_past() {
    let mut host = Host::new(TestCore::new(), test_config()).expect("host");
    host.advance(0.0);
    let now = pump_frames(&mut host, 0.0, 4);
    host.set_button(Button::A, true);
    let now = pump_frames(&mut host, now, 6);
    host.set_button(Button::A, false);
    assert_eq!(host.ticks(), 1000);
    assert!(host.joypad_log().len() > 1, "the press was recorded");

    host.begin_rewind();
    assert!(host.is_rewinding());
    host.rewind_to_ticks(400).expect("in-range rewind");
    assert_eq!(host.ticks(), 400);
    host.end_rewind();
    assert!(!host.is_rewinding());

    // History newer than the resume point is gone, on both sides: the press
    // was sampled at tick 500 and belongs to the abandoned future.
    assert_eq!(host.newest_tick(), Some(400));
    assert_eq!(host.joypad_log().len(), 1);

    // Forward progress resumes from 400, not 1000: the next pump re-anchors
    // the wall clock, the one after runs a single frame.
    let events = host.advance(now + PUMP);
    assert_eq!(events.frames, 0);
    assert_eq!(host.ticks(), 400);
    let events = host.advance(now + 2.0 * PUMP);
    assert_eq!(events.frames, 1);
    assert_eq!(host.ticks(), 500);
    assert_eq!(host.newest_tick(), Some(500));
}

#[test]
fn rewind_targets_are_clamped_to_retained_bounds() {
    let mut host = Host::new(TestCore::new(), test_config()).expect("host");
    host.advance(0.0);
    pump_frames(&mut host, 0.0, 6);

    host.begin_rewind();
    // Below the oldest retained tick: behaves as a seek to the oldest.
    host.rewind_to_ticks(0).expect("clamped rewind");
    assert_eq!(Some(host.ticks()), host.oldest_tick());
    // Beyond the newest: behaves as a seek to the newest.
    host.rewind_to_ticks(u64::MAX).expect("clamped rewind");
    assert_eq!(Some(host.ticks()), host.newest_tick());
    host.end_rewind();
}

#[test]
fn misused_transitions_are_harmless_no_ops() {
    let mut host = Host::new(TestCore::new(), test_config()).expect("host");
    host.advance(0.0);
    pump_frames(&mut host, 0.0, 4);

    // Rewind calls while idle are refused without side effects.
    assert!(matches!(
        host.rewind_to_ticks(200),
        Err(SeekError::NotSeeking)
    ));
    host.end_rewind();
    assert_eq!(host.ticks(), 400);

    host.begin_rewind();
    // A second begin is ignored; the session keeps working.
    host.begin_rewind();
    assert!(host.is_rewinding());
    host.rewind_to_ticks(200).expect("still seekable");
    assert_eq!(host.ticks(), 200);

    // Forward scheduling is paused while rewinding.
    let before = state_of(host.core());
    let events = host.advance(10.0);
    assert_eq!(events, Default::default());
    assert_eq!(state_of(host.core()), before);

    host.end_rewind();
    host.end_rewind();
    assert_eq!(host.ticks(), 200);
}

#[test]
fn auto_rewind_steps_backwards_until_released() {
    let mut host = Host::new(TestCore::new(), test_config()).expect("host");
    host.advance(0.0);
    let now = pump_frames(&mut host, 0.0, 20);
    assert_eq!(host.ticks(), 2000);

    host.set_auto_rewind(true);
    assert!(host.is_rewinding());

    // First pump anchors the rewind clock; the following ones step backward
    // by rewind_factor * elapsed * ticks_per_second. The 1/64 s period is
    // exactly representable, so each step is exactly 18 ticks (18.75
    // truncated).
    host.advance(now + PUMP);
    assert_eq!(host.ticks(), 2000);
    let mut then = now + PUMP;
    for _ in 0..3 {
        then += 0.015625;
        let events = host.advance(then);
        assert_eq!(events.frames, 1, "each backward step requests a redraw");
    }
    assert_eq!(host.ticks(), 2000 - 3 * 18);

    // Releasing resumes live play from the rewound position.
    host.set_auto_rewind(false);
    assert!(!host.is_rewinding());
    let resumed = host.ticks();
    host.advance(then + PUMP);
    host.advance(then + 2.0 * PUMP);
    assert_eq!(host.ticks(), resumed + 100);
}

#[test]
fn auto_rewind_saturates_at_the_oldest_tick() {
    let mut host = Host::new(TestCore::new(), test_config()).expect("host");
    host.advance(0.0);
    pump_frames(&mut host, 0.0, 4);

    host.set_auto_rewind(true);
    host.advance(100.0);
    // A huge elapsed period is clamped, and the target saturates at the
    // oldest retained tick instead of erroring.
    for step in 1..=40 {
        host.advance(100.0 + f64::from(step));
    }
    assert_eq!(Some(host.ticks()), host.oldest_tick());
    host.set_auto_rewind(false);
}

#[test]
fn ext_ram_flag_and_bridge_round_trip() {
    let mut host = Host::new(TestCore::new(), test_config()).expect("host");
    host.advance(0.0);
    let events = host.advance(PUMP);
    assert!(!events.ext_ram_written);

    // Pressing A makes the stub write battery RAM during its next frame.
    host.set_button(Button::A, true);
    let events = host.advance(2.0 * PUMP);
    assert!(events.ext_ram_written);
    // The flag clears once reported.
    host.set_button(Button::A, false);
    let events = host.advance(3.0 * PUMP);
    assert!(!events.ext_ram_written);

    let saved = host.ext_ram();
    assert!(saved.iter().any(|&byte| byte != 0));
    host.load_ext_ram(&saved).expect("round trip");
    assert!(host.load_ext_ram(&[0u8; 3]).is_err());
}

#[test]
fn rewound_session_replays_recorded_input_not_live_input() {
    let mut host = Host::new(TestCore::new(), test_config()).expect("host");
    host.advance(0.0);
    host.set_button(Button::A, true);
    pump_frames(&mut host, 0.0, 8);
    host.set_button(Button::A, false);
    let live_state = state_of(host.core());

    host.begin_rewind();
    // Mash buttons while rewinding: replay must ignore the live state and
    // feed the recorded log instead.
    host.set_button(Button::Start, true);
    host.rewind_to_ticks(300).expect("in-range rewind");
    host.rewind_to_ticks(800).expect("in-range rewind");
    assert_eq!(
        state_of(host.core()),
        live_state,
        "replaying back to the newest tick reproduces the live state"
    );
    host.end_rewind();
    host.set_button(Button::Start, false);
}
