use log::debug;

use crate::hardware::{Button, JoypadButtons, JoypadSource, Tick};

/// One recorded transition: the packed button state as of `tick`.
#[derive(Clone, Copy, Debug)]
struct JoypadEntry {
    tick: Tick,
    buttons: u8,
}

/// Append-only log of joypad transitions, ordered by tick.
///
/// Seeded with a released-state entry at tick 0 so every lookup resolves.
/// Entries are recorded at the ticks the core actually samples input, which
/// is what makes replay from the log bit-exact.
pub struct JoypadLog {
    entries: Vec<JoypadEntry>,
}

impl JoypadLog {
    pub fn new() -> Self {
        Self {
            entries: vec![JoypadEntry {
                tick: 0,
                buttons: 0,
            }],
        }
    }

    /// Number of recorded transitions, including the tick-0 seed entry.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Record `buttons` at `tick` only if it differs from the latest state.
    pub fn append_if_new(&mut self, buttons: JoypadButtons, tick: Tick) {
        let packed = buttons.pack();
        // The log is never empty, so index 0 is always valid.
        let last = self.entries[self.entries.len() - 1];
        if last.buttons == packed {
            return;
        }
        debug_assert!(tick >= last.tick, "joypad transitions must be appended in tick order");
        self.entries.push(JoypadEntry {
            tick,
            buttons: packed,
        });
    }

    /// Index of the latest entry at or before `tick`.
    fn find_index(&self, tick: Tick) -> usize {
        self.entries
            .partition_point(|entry| entry.tick <= tick)
            .saturating_sub(1)
    }

    /// Button state in effect at `tick`.
    pub fn state_at(&self, tick: Tick) -> JoypadButtons {
        JoypadButtons::unpack(self.entries[self.find_index(tick)].buttons)
    }

    /// Drop every transition recorded after `tick`. The seed entry is always
    /// retained.
    pub fn truncate_to(&mut self, tick: Tick) {
        let keep = self.entries.partition_point(|entry| entry.tick <= tick).max(1);
        if keep < self.entries.len() {
            debug!(
                "dropping {} joypad transitions newer than tick {tick}",
                self.entries.len() - keep
            );
            self.entries.truncate(keep);
        }
    }

    /// Approximate memory held by the log, for stats displays.
    pub fn used_bytes(&self) -> usize {
        self.entries.len() * std::mem::size_of::<JoypadEntry>()
    }
}

impl Default for JoypadLog {
    fn default() -> Self {
        Self::new()
    }
}

/// The live joypad source: the current button state as set by the frontend,
/// plus the transition log it records into.
///
/// Transitions become part of history only when the core samples them
/// ([`JoypadSource::state_at`]); a press-and-release between two samples is
/// invisible to the machine and therefore never recorded.
pub struct JoypadRecorder {
    log: JoypadLog,
    buttons: JoypadButtons,
}

impl JoypadRecorder {
    pub fn new() -> Self {
        Self {
            log: JoypadLog::new(),
            buttons: JoypadButtons::default(),
        }
    }

    /// Update the live state of one button. Idempotent if unchanged.
    pub fn set_button(&mut self, button: Button, pressed: bool) {
        self.buttons.set(button, pressed);
    }

    /// The most recently set live state.
    pub fn buttons(&self) -> JoypadButtons {
        self.buttons
    }

    pub fn log(&self) -> &JoypadLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut JoypadLog {
        &mut self.log
    }
}

impl Default for JoypadRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl JoypadSource for JoypadRecorder {
    fn state_at(&mut self, tick: Tick) -> JoypadButtons {
        self.log.append_if_new(self.buttons, tick);
        self.buttons
    }
}

/// Replay cursor over a [`JoypadLog`].
///
/// Held separately from the log so the cursor can advance while the log stays
/// immutably borrowed by the replay loop. Forward sampling is O(1) amortized;
/// a backward jump re-finds the position by binary search.
#[derive(Clone, Copy, Debug, Default)]
pub struct JoypadPlayback {
    current: usize,
}

impl JoypadPlayback {
    /// Point the cursor at the entry in effect at `tick`.
    pub fn reposition(&mut self, log: &JoypadLog, tick: Tick) {
        self.current = log.find_index(tick);
    }

    /// Recorded button state in effect at `tick`, advancing the cursor.
    pub fn state_at(&mut self, log: &JoypadLog, tick: Tick) -> JoypadButtons {
        // A stale cursor (log truncated, or jumped backwards) re-finds.
        if self.current >= log.entries.len() || log.entries[self.current].tick > tick {
            self.reposition(log, tick);
        }
        while self.current + 1 < log.entries.len() && log.entries[self.current + 1].tick <= tick {
            self.current += 1;
        }
        JoypadButtons::unpack(log.entries[self.current].buttons)
    }
}

/// Adapter binding a playback cursor to its log as a [`JoypadSource`].
pub struct PlaybackSource<'a> {
    pub log: &'a JoypadLog,
    pub playback: &'a mut JoypadPlayback,
}

impl JoypadSource for PlaybackSource<'_> {
    fn state_at(&mut self, tick: Tick) -> JoypadButtons {
        self.playback.state_at(self.log, tick)
    }
}
