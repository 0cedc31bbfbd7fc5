use log::warn;

use crate::config::{ConfigError, HostConfig};
use crate::hardware::{Button, HardwareCore, StateError, Tick};
use crate::joypad::{JoypadLog, JoypadPlayback, JoypadRecorder};
use crate::rewind::{RewindStats, SeekError, SeekHandle, SnapshotStore};
use crate::scheduler::Scheduler;

/// Summary of notable events observed during one [`Host::advance`] call.
///
/// The rendering and audio collaborators react to the counters and read the
/// core's shared frame/audio buffers directly; the persistence collaborator
/// checkpoints battery RAM when `ext_ram_written` is set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AdvanceEvents {
    /// Video frames completed during this advance.
    pub frames: u32,
    /// Audio buffers filled during this advance.
    pub audio_buffers: u32,
    /// External (battery) RAM was written since the previous advance.
    pub ext_ram_written: bool,
}

/// An owned emulation session: the hardware core plus the scheduling, input
/// recording, and rewind machinery around it.
///
/// All operations run synchronously on the caller's thread, driven by an
/// external periodic pump (typically a display-refresh callback invoking
/// [`Host::advance`]). Exactly one of forward scheduling and seek replay
/// mutates the core at a time, enforced by the idle/rewinding state machine
/// rather than by locking.
pub struct Host<H: HardwareCore> {
    core: H,
    config: HostConfig,
    scheduler: Scheduler,
    recorder: JoypadRecorder,
    playback: JoypadPlayback,
    store: SnapshotStore,
    /// `Some` while rewinding; holds the store's seek token.
    seek: Option<SeekHandle>,
    auto_rewind: bool,
    last_rewind_pump_seconds: Option<f64>,
}

impl<H: HardwareCore> Host<H> {
    /// Build a session around `core`. Fails fast on an invalid configuration
    /// or a rewind arena too small for even one snapshot; no session state
    /// exists after a rejected construction.
    pub fn new(core: H, config: HostConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let store = SnapshotStore::new(
            &core,
            config.frames_per_base_state,
            config.buffer_capacity_bytes,
        )?;
        Ok(Self {
            scheduler: Scheduler::new(config.ticks_per_second, config.max_update_seconds),
            recorder: JoypadRecorder::new(),
            playback: JoypadPlayback::default(),
            store,
            seek: None,
            auto_rewind: false,
            last_rewind_pump_seconds: None,
            core,
            config,
        })
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn core(&self) -> &H {
        &self.core
    }

    pub fn ticks(&self) -> Tick {
        self.core.ticks()
    }

    pub fn is_rewinding(&self) -> bool {
        self.seek.is_some()
    }

    /// Oldest reconstructable tick, for UI slider bounds. `None` before the
    /// first completed frame.
    pub fn oldest_tick(&self) -> Option<Tick> {
        self.store.oldest_tick()
    }

    /// Newest tick covered by recorded history.
    pub fn newest_tick(&self) -> Option<Tick> {
        self.store.newest_tick()
    }

    pub fn rewind_stats(&self) -> RewindStats {
        self.store.stats()
    }

    pub fn joypad_log(&self) -> &JoypadLog {
        self.recorder.log()
    }

    /// Update the live state of one joypad button. During rewind the live
    /// state is still tracked but the core is fed from the recorded log, so
    /// no transition is lost by entering or leaving rewind mode.
    pub fn set_button(&mut self, button: Button, pressed: bool) {
        self.recorder.set_button(button, pressed);
    }

    /// Drive one host-frame's worth of emulation at wall-clock time
    /// `now_seconds` (monotonic). While rewinding, forward scheduling is
    /// paused: the call is a no-op unless auto-rewind is engaged, in which
    /// case it performs one backward policy step instead.
    pub fn advance(&mut self, now_seconds: f64) -> AdvanceEvents {
        if self.is_rewinding() {
            if self.auto_rewind {
                return self.auto_rewind_pump(now_seconds);
            }
            warn!("advance while rewinding; ignored");
            return AdvanceEvents::default();
        }

        let target = self.scheduler.target_tick(now_seconds, self.core.ticks());
        let events = self.run_until(target);
        self.scheduler.commit(self.core.ticks(), target);
        events
    }

    /// Drain the core's event loop up to `target`, recording each completed
    /// frame into the rewind buffer.
    fn run_until(&mut self, target: Tick) -> AdvanceEvents {
        let mut summary = AdvanceEvents::default();
        loop {
            let events = self.core.run_until(target, &mut self.recorder);
            if events.new_frame() {
                summary.frames += 1;
                let buttons = self.recorder.buttons();
                self.store.append(&self.core, buttons);
            }
            if events.audio_buffer_full() {
                summary.audio_buffers += 1;
            }
            if events.until_ticks() {
                break;
            }
        }
        summary.ext_ram_written = self.core.ext_ram_updated();
        summary
    }

    /// Enter rewind mode: forward scheduling stops consuming wall-clock and
    /// subsequent seeks replay recorded input. Calling while already
    /// rewinding is a logged no-op.
    pub fn begin_rewind(&mut self) {
        if self.is_rewinding() {
            warn!("begin_rewind while already rewinding; ignored");
            return;
        }
        self.seek = self.store.begin_seek();
        self.last_rewind_pump_seconds = None;
    }

    /// Seek to `target`, clamped to the retained `[oldest, newest]` range.
    /// On success the core sits at exactly the clamped tick and the caller
    /// should redraw from the core's frame buffer. A failed seek moves
    /// nothing.
    pub fn rewind_to_ticks(&mut self, target: Tick) -> Result<(), SeekError> {
        let Some(handle) = self.seek else {
            warn!("rewind_to_ticks while idle; ignored");
            return Err(SeekError::NotSeeking);
        };
        let (Some(oldest), Some(newest)) = (self.store.oldest_tick(), self.store.newest_tick())
        else {
            return Err(SeekError::OutOfRange {
                requested: target,
                oldest: None,
                newest: None,
            });
        };
        let clamped = target.clamp(oldest, newest);
        self.store.seek_to(
            handle,
            &mut self.core,
            self.recorder.log(),
            &mut self.playback,
            clamped,
        )
    }

    /// Leave rewind mode and resume live play from the current tick.
    /// Recorded history newer than the resume point is dropped on both the
    /// snapshot and joypad sides — the timeline diverges here — and the
    /// scheduler's wall-clock anchor and leftover-tick carry are reset, since
    /// both are meaningless after a discontinuous jump.
    pub fn end_rewind(&mut self) {
        let Some(handle) = self.seek.take() else {
            warn!("end_rewind while idle; ignored");
            return;
        };
        let resume_tick = self.core.ticks();
        self.store.end_seek(handle, resume_tick);
        self.recorder.log_mut().truncate_to(resume_tick);
        self.scheduler.reset();
        self.auto_rewind = false;
        self.last_rewind_pump_seconds = None;
    }

    /// Engage or release continuous ("hold-to-rewind") mode. Engaging enters
    /// rewind mode; releasing resumes live play. While engaged, each
    /// [`Host::advance`] pump steps backward by
    /// `rewind_factor * elapsed * ticks_per_second`, clamped to the oldest
    /// retained tick.
    pub fn set_auto_rewind(&mut self, enabled: bool) {
        if enabled == self.auto_rewind {
            return;
        }
        if enabled {
            if !self.is_rewinding() {
                self.begin_rewind();
            }
            self.auto_rewind = true;
            self.last_rewind_pump_seconds = None;
        } else {
            self.auto_rewind = false;
            if self.is_rewinding() {
                self.end_rewind();
            }
        }
    }

    fn auto_rewind_pump(&mut self, now_seconds: f64) -> AdvanceEvents {
        let last = self.last_rewind_pump_seconds.unwrap_or(now_seconds);
        self.last_rewind_pump_seconds = Some(now_seconds);
        let period = (now_seconds - last).clamp(0.0, self.config.max_update_seconds);
        let delta =
            (self.config.rewind_factor * period * self.config.ticks_per_second as f64) as u64;

        let Some(oldest) = self.store.oldest_tick() else {
            return AdvanceEvents::default();
        };
        let target = self.core.ticks().saturating_sub(delta).max(oldest);
        let mut events = AdvanceEvents::default();
        if target < self.core.ticks() && self.rewind_to_ticks(target).is_ok() {
            // One redraw per backward step.
            events.frames = 1;
        }
        events
    }

    /// Copy out battery RAM for the persistence collaborator.
    pub fn ext_ram(&self) -> Vec<u8> {
        self.core.write_ext_ram()
    }

    /// Load persisted battery RAM into the core.
    pub fn load_ext_ram(&mut self, data: &[u8]) -> Result<(), StateError> {
        self.core.read_ext_ram(data)
    }
}
