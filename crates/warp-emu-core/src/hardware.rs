use std::fmt;

/// Monotonically increasing count of hardware clock cycles since power-on.
///
/// All ordering and seeking in this crate is defined over this domain. The
/// counter never resets except on a full session restart.
pub type Tick = u64;

/// Bitmask of notable events observed during a single stepping call.
///
/// Multiple flags may be set in one result. When [`EventSet::until_ticks`] is
/// absent the core stopped early on a buffer event and the caller must step
/// again to keep advancing toward the target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventSet(u32);

impl EventSet {
    /// One video frame was completed.
    pub const NEW_FRAME: EventSet = EventSet(0x1);
    /// An audio chunk is ready for consumption.
    pub const AUDIO_BUFFER_FULL: EventSet = EventSet(0x2);
    /// The requested tick target was reached.
    pub const UNTIL_TICKS: EventSet = EventSet(0x4);

    pub const fn empty() -> Self {
        EventSet(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: EventSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: EventSet) {
        self.0 |= other.0;
    }

    pub const fn new_frame(self) -> bool {
        self.contains(Self::NEW_FRAME)
    }

    pub const fn audio_buffer_full(self) -> bool {
        self.contains(Self::AUDIO_BUFFER_FULL)
    }

    pub const fn until_ticks(self) -> bool {
        self.contains(Self::UNTIL_TICKS)
    }
}

impl std::ops::BitOr for EventSet {
    type Output = EventSet;

    fn bitor(self, rhs: EventSet) -> EventSet {
        EventSet(self.0 | rhs.0)
    }
}

/// One joypad button.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Button {
    Down,
    Up,
    Left,
    Right,
    Start,
    Select,
    B,
    A,
}

/// Instantaneous joypad state, one flag per button.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JoypadButtons {
    pub down: bool,
    pub up: bool,
    pub left: bool,
    pub right: bool,
    pub start: bool,
    pub select: bool,
    pub b: bool,
    pub a: bool,
}

impl JoypadButtons {
    /// Pack into one byte, bit 7 down to bit 0:
    /// down/up/left/right/start/select/B/A.
    pub fn pack(self) -> u8 {
        (u8::from(self.down) << 7)
            | (u8::from(self.up) << 6)
            | (u8::from(self.left) << 5)
            | (u8::from(self.right) << 4)
            | (u8::from(self.start) << 3)
            | (u8::from(self.select) << 2)
            | (u8::from(self.b) << 1)
            | u8::from(self.a)
    }

    pub fn unpack(packed: u8) -> Self {
        Self {
            down: packed & 0x80 != 0,
            up: packed & 0x40 != 0,
            left: packed & 0x20 != 0,
            right: packed & 0x10 != 0,
            start: packed & 0x08 != 0,
            select: packed & 0x04 != 0,
            b: packed & 0x02 != 0,
            a: packed & 0x01 != 0,
        }
    }

    pub fn set(&mut self, button: Button, pressed: bool) {
        match button {
            Button::Down => self.down = pressed,
            Button::Up => self.up = pressed,
            Button::Left => self.left = pressed,
            Button::Right => self.right = pressed,
            Button::Start => self.start = pressed,
            Button::Select => self.select = pressed,
            Button::B => self.b = pressed,
            Button::A => self.a = pressed,
        }
    }
}

/// Strategy supplying joypad state to the core at the tick it samples input.
///
/// During normal play the live recorder is passed in; during rewind replay a
/// cursor over the recorded log is substituted instead. Swapping sources is a
/// caller decision per stepping call, so no recorded transition can be lost
/// by the switch itself.
pub trait JoypadSource {
    fn state_at(&mut self, tick: Tick) -> JoypadButtons;
}

/// Failure to restore machine state from a serialized blob.
///
/// Machine integrity cannot be partially trusted after a failed restore, so
/// callers treat this as a hard stop of the session rather than attempting
/// recovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateError {
    /// The blob is malformed or from an incompatible core.
    Corrupt(&'static str),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::Corrupt(what) => write!(f, "corrupt machine state: {what}"),
        }
    }
}

impl std::error::Error for StateError {}

/// The wrapped hardware-emulation core, treated as an opaque capability.
///
/// The host never interprets the core's internals; it only needs forward
/// stepping with event reporting, whole-state serialization, and the
/// external-RAM bridge. The contract the rewind machinery relies on:
/// restoring a state written by [`HardwareCore::write_state`] and stepping
/// forward with identical joypad input reproduces bit-identical state.
pub trait HardwareCore {
    /// Advance until `target` ticks or until a notable event, whichever comes
    /// first, sampling `joypad` whenever input is read. The returned set
    /// contains [`EventSet::UNTIL_TICKS`] once `target` has been reached.
    fn run_until(&mut self, target: Tick, joypad: &mut dyn JoypadSource) -> EventSet;

    /// Current value of the cycle counter.
    fn ticks(&self) -> Tick;

    /// Serialize the entire machine state into `out`, replacing its contents.
    /// The blob is opaque and self-describing; only
    /// [`HardwareCore::read_state`] interprets it.
    fn write_state(&self, out: &mut Vec<u8>);

    /// Restore the machine to a previously serialized state. After a
    /// successful restore, [`HardwareCore::ticks`] equals the tick the state
    /// was written at.
    fn read_state(&mut self, state: &[u8]) -> Result<(), StateError>;

    /// Whether external (battery-backed) RAM was written since the last call.
    /// Reading the flag clears it.
    fn ext_ram_updated(&mut self) -> bool;

    /// Load external RAM contents, e.g. from persisted battery saves.
    fn read_ext_ram(&mut self, data: &[u8]) -> Result<(), StateError>;

    /// Copy out external RAM contents for persistence.
    fn write_ext_ram(&self) -> Vec<u8>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_set_flags_combine() {
        let mut events = EventSet::empty();
        assert!(events.is_empty());
        events.insert(EventSet::NEW_FRAME);
        events.insert(EventSet::UNTIL_TICKS);
        assert!(events.new_frame());
        assert!(events.until_ticks());
        assert!(!events.audio_buffer_full());

        let combined = EventSet::NEW_FRAME | EventSet::AUDIO_BUFFER_FULL;
        assert!(combined.contains(EventSet::NEW_FRAME));
        assert!(!combined.contains(EventSet::UNTIL_TICKS));
    }

    #[test]
    fn buttons_pack_unpack_round_trip() {
        let mut buttons = JoypadButtons::default();
        assert_eq!(buttons.pack(), 0);

        buttons.set(Button::A, true);
        buttons.set(Button::Down, true);
        buttons.set(Button::Select, true);
        let packed = buttons.pack();
        assert_eq!(packed, 0x85);
        assert_eq!(JoypadButtons::unpack(packed), buttons);

        buttons.set(Button::A, false);
        assert_eq!(buttons.pack(), 0x84);
    }
}
