use std::collections::VecDeque;
use std::fmt;

use log::{debug, warn};

use crate::config::ConfigError;
use crate::hardware::{HardwareCore, JoypadButtons, StateError, Tick};
use crate::joypad::{JoypadLog, JoypadPlayback, PlaybackSource};

/// Append `value` as a little-endian base-128 varint.
fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Read a varint at `*pos`, advancing it. `None` on a truncated or oversized
/// encoding.
fn read_varint(data: &[u8], pos: &mut usize) -> Option<u64> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *data.get(*pos)?;
        *pos += 1;
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
}

/// RLE-compress `src` into `out`. Literal bytes pass through; a run is
/// written as its first two bytes followed by a varint of the remaining
/// count. The scheme never interprets the payload, so opaque snapshot blobs
/// stay opaque.
fn encode_rle(src: &[u8], out: &mut Vec<u8>) {
    let mut iter = src.iter().copied();
    let Some(mut last) = iter.next() else {
        return;
    };
    out.push(last);
    while let Some(next) = iter.next() {
        let mut literal = next;
        if next == last {
            let mut count: u64 = 0;
            let mut run_reached_end = true;
            for byte in iter.by_ref() {
                if byte != last {
                    literal = byte;
                    run_reached_end = false;
                    break;
                }
                count += 1;
            }
            out.push(last);
            write_varint(count, out);
            if run_reached_end {
                return;
            }
        }
        out.push(literal);
        last = literal;
    }
}

/// Inverse of [`encode_rle`]. `None` if the stream is truncated.
fn decode_rle(src: &[u8], out: &mut Vec<u8>) -> Option<()> {
    let mut pos = 0;
    let Some(&first) = src.first() else {
        return Some(());
    };
    pos += 1;
    let mut last = first;
    out.push(first);
    while pos < src.len() {
        let next = src[pos];
        pos += 1;
        if next == last {
            let count = read_varint(src, &mut pos)? + 1;
            for _ in 0..count {
                out.push(last);
            }
        } else {
            out.push(next);
            last = next;
        }
    }
    Some(())
}

/// One base snapshot plus the frame records replay-dependent on it: the unit
/// of FIFO eviction.
struct SnapshotGroup {
    base_tick: Tick,
    /// RLE-compressed opaque core state at `base_tick`.
    base: Vec<u8>,
    /// Encoded frame records: varint tick delta from the previous record,
    /// then the packed joypad byte sampled for that frame.
    records: Vec<u8>,
    /// Tick of the newest record, or `base_tick` when there is none.
    newest_tick: Tick,
    record_count: usize,
}

impl SnapshotGroup {
    fn bytes(&self) -> usize {
        self.base.len() + self.records.len()
    }

    /// Returns the encoded size of the appended record.
    fn push_record(&mut self, tick: Tick, buttons: u8) -> usize {
        let before = self.records.len();
        write_varint(tick - self.newest_tick, &mut self.records);
        self.records.push(buttons);
        self.newest_tick = tick;
        self.record_count += 1;
        self.records.len() - before
    }

    /// Drop records newer than `tick`; returns the bytes removed.
    fn truncate_records(&mut self, tick: Tick) -> usize {
        let mut pos = 0;
        let mut reached = self.base_tick;
        let mut count = 0;
        let mut keep_end = 0;
        while pos < self.records.len() {
            let Some(delta) = read_varint(&self.records, &mut pos) else {
                break;
            };
            if pos >= self.records.len() {
                break;
            }
            pos += 1; // packed buttons byte
            let record_tick = reached + delta;
            if record_tick > tick {
                break;
            }
            reached = record_tick;
            count += 1;
            keep_end = pos;
        }
        let removed = self.records.len() - keep_end;
        self.records.truncate(keep_end);
        self.newest_tick = reached;
        self.record_count = count;
        removed
    }
}

/// Usage accounting for the rewind buffer, for UI meters and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RewindStats {
    /// Retained base snapshots (== retained groups).
    pub base_count: usize,
    /// Retained frame records across all groups.
    pub record_count: usize,
    /// Encoded bytes held by base snapshots.
    pub base_bytes: usize,
    /// Encoded bytes held by frame records.
    pub record_bytes: usize,
    /// Total encoded bytes retained; never exceeds `capacity_bytes`.
    pub used_bytes: usize,
    pub capacity_bytes: usize,
    /// Cumulative uncompressed snapshot bytes ever captured, for gauging the
    /// compression ratio.
    pub uncompressed_bytes: u64,
}

/// Token returned by [`SnapshotStore::begin_seek`]; stale tokens are refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeekHandle {
    generation: u64,
}

/// A failed or refused seek. The store and the core are left exactly as they
/// were.
#[derive(Debug)]
pub enum SeekError {
    /// Requested tick is outside the retained history; the caller is
    /// expected to clamp to `[oldest_tick, newest_tick]` first.
    OutOfRange {
        requested: Tick,
        oldest: Option<Tick>,
        newest: Option<Tick>,
    },
    /// No seek is active, or the handle is stale.
    NotSeeking,
    /// Restoring the snapshot failed; session integrity is gone and the
    /// emulation must halt.
    State(StateError),
}

impl fmt::Display for SeekError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeekError::OutOfRange {
                requested,
                oldest,
                newest,
            } => write!(
                f,
                "tick {requested} is outside retained history ({oldest:?}..{newest:?})"
            ),
            SeekError::NotSeeking => write!(f, "no active seek"),
            SeekError::State(err) => write!(f, "snapshot restore failed: {err}"),
        }
    }
}

impl std::error::Error for SeekError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SeekError::State(err) => Some(err),
            _ => None,
        }
    }
}

/// Byte-budgeted, time-ordered history of machine states: periodic full
/// snapshots interleaved with per-frame records, supporting forward-only
/// live appends and backward seeks by restore-then-replay.
///
/// Every seek pays a replay cost of up to `frames_per_base_state - 1` frames
/// of forward simulation, because the core only steps forward; this is the
/// dominant runtime expense while rewinding, and the cadence parameter is
/// the knob that trades it against history density.
///
/// Eviction is strictly FIFO by tick order and atomic per group, so every
/// retained frame record always has a reachable preceding snapshot.
pub struct SnapshotStore {
    groups: VecDeque<SnapshotGroup>,
    capacity_bytes: usize,
    frames_per_base: u32,
    /// Appends remaining until the next base capture; 0 forces a base.
    frames_until_base: u32,
    used_bytes: usize,
    base_bytes: usize,
    record_bytes: usize,
    uncompressed_bytes: u64,
    seeking: bool,
    generation: u64,
    /// Reused serialize/decompress buffers, to keep appends allocation-light.
    scratch: Vec<u8>,
    decode_buf: Vec<u8>,
}

impl SnapshotStore {
    /// Create an empty store. Probes the core's serialized state once to
    /// fail fast when `buffer_capacity_bytes` cannot hold even one snapshot.
    pub fn new<H: HardwareCore>(
        core: &H,
        frames_per_base_state: u32,
        buffer_capacity_bytes: usize,
    ) -> Result<Self, ConfigError> {
        if frames_per_base_state == 0 {
            return Err(ConfigError::ZeroFramesPerBaseState);
        }
        if buffer_capacity_bytes == 0 {
            return Err(ConfigError::ZeroBufferCapacity);
        }

        let mut scratch = Vec::new();
        core.write_state(&mut scratch);
        let mut probe = Vec::with_capacity(scratch.len());
        encode_rle(&scratch, &mut probe);
        if probe.len() > buffer_capacity_bytes {
            return Err(ConfigError::CapacityTooSmall {
                needed: probe.len(),
                capacity: buffer_capacity_bytes,
            });
        }

        Ok(Self {
            groups: VecDeque::new(),
            capacity_bytes: buffer_capacity_bytes,
            frames_per_base: frames_per_base_state,
            frames_until_base: 0,
            used_bytes: 0,
            base_bytes: 0,
            record_bytes: 0,
            uncompressed_bytes: 0,
            seeking: false,
            generation: 0,
            scratch,
            decode_buf: Vec::new(),
        })
    }

    /// Record one completed video frame. Every
    /// `frames_per_base_state`-th call captures a full snapshot; the calls in
    /// between append a frame record carrying the frame's tick and sampled
    /// joypad byte. A full arena evicts whole groups from the oldest end;
    /// appending never fails.
    pub fn append<H: HardwareCore>(&mut self, core: &H, buttons: JoypadButtons) {
        if self.seeking {
            warn!("rewind buffer append while seeking; ignored");
            return;
        }
        let tick = core.ticks();
        debug_assert!(
            self.newest_tick().is_none_or(|newest| tick > newest),
            "appends must arrive in strictly increasing tick order"
        );

        if self.frames_until_base == 0 {
            self.append_base(core, tick);
            self.frames_until_base = self.frames_per_base - 1;
        } else {
            self.frames_until_base -= 1;
            // A group always starts with a base, so the back exists here.
            if let Some(group) = self.groups.back_mut() {
                let added = group.push_record(tick, buttons.pack());
                self.used_bytes += added;
                self.record_bytes += added;
            }
        }
        self.evict_over_capacity();
    }

    fn append_base<H: HardwareCore>(&mut self, core: &H, tick: Tick) {
        core.write_state(&mut self.scratch);
        self.uncompressed_bytes += self.scratch.len() as u64;
        let mut base = Vec::with_capacity(self.scratch.len() / 4);
        encode_rle(&self.scratch, &mut base);
        let added = base.len();
        self.groups.push_back(SnapshotGroup {
            base_tick: tick,
            base,
            records: Vec::new(),
            newest_tick: tick,
            record_count: 0,
        });
        self.used_bytes += added;
        self.base_bytes += added;
    }

    fn remove_group_bytes(&mut self, group: &SnapshotGroup) {
        self.used_bytes -= group.bytes();
        self.base_bytes -= group.base.len();
        self.record_bytes -= group.records.len();
    }

    fn evict_over_capacity(&mut self) {
        while self.used_bytes > self.capacity_bytes && self.groups.len() > 1 {
            if let Some(group) = self.groups.pop_front() {
                self.remove_group_bytes(&group);
                debug!(
                    "evicted snapshot group at tick {} ({} bytes, {} records)",
                    group.base_tick,
                    group.bytes(),
                    group.record_count
                );
            }
        }
        if self.used_bytes > self.capacity_bytes {
            warn!(
                "a single snapshot group ({} bytes) exceeds the rewind buffer capacity ({} bytes)",
                self.used_bytes, self.capacity_bytes
            );
        }
    }

    /// Oldest tick reconstructable from retained history. `None` until the
    /// first append.
    pub fn oldest_tick(&self) -> Option<Tick> {
        self.groups.front().map(|group| group.base_tick)
    }

    /// Newest tick covered by retained history.
    pub fn newest_tick(&self) -> Option<Tick> {
        self.groups.back().map(|group| group.newest_tick)
    }

    pub fn is_seeking(&self) -> bool {
        self.seeking
    }

    /// Enter seeking mode. While seeking, appends are refused and eviction is
    /// paused. Returns `None` (and changes nothing) if a seek is already
    /// active.
    pub fn begin_seek(&mut self) -> Option<SeekHandle> {
        if self.seeking {
            warn!("begin_seek while a seek is already active; ignored");
            return None;
        }
        self.seeking = true;
        self.generation += 1;
        Some(SeekHandle {
            generation: self.generation,
        })
    }

    /// Restore the machine to exactly `target`: binary-search the latest
    /// snapshot at or before it, deserialize, then replay forward feeding
    /// joypad state from `log` until `target` is reached.
    ///
    /// An out-of-range `target` returns an error and leaves both the store
    /// and the core untouched.
    pub fn seek_to<H: HardwareCore>(
        &mut self,
        handle: SeekHandle,
        core: &mut H,
        log: &JoypadLog,
        playback: &mut JoypadPlayback,
        target: Tick,
    ) -> Result<(), SeekError> {
        if !self.seeking || handle.generation != self.generation {
            warn!("seek_to without an active seek; ignored");
            return Err(SeekError::NotSeeking);
        }
        let (Some(oldest), Some(newest)) = (self.oldest_tick(), self.newest_tick()) else {
            return Err(SeekError::OutOfRange {
                requested: target,
                oldest: None,
                newest: None,
            });
        };
        if target < oldest || target > newest {
            return Err(SeekError::OutOfRange {
                requested: target,
                oldest: Some(oldest),
                newest: Some(newest),
            });
        }

        // Latest group whose base is at or before the target.
        let index = self
            .groups
            .partition_point(|group| group.base_tick <= target)
            .saturating_sub(1);
        debug!(
            "seek to tick {target}: restoring base at tick {}",
            self.groups[index].base_tick
        );

        let mut state = std::mem::take(&mut self.decode_buf);
        state.clear();
        let decoded = decode_rle(&self.groups[index].base, &mut state).is_some();
        self.decode_buf = state;
        if !decoded {
            return Err(SeekError::State(StateError::Corrupt("rewind arena")));
        }
        core.read_state(&self.decode_buf).map_err(SeekError::State)?;
        debug_assert_eq!(core.ticks(), self.groups[index].base_tick);

        // Replay forward to exactly the target, dropping frame/audio events;
        // the caller renders once after the seek lands.
        playback.reposition(log, core.ticks());
        let mut source = PlaybackSource { log, playback };
        while core.ticks() < target {
            let events = core.run_until(target, &mut source);
            if events.until_ticks() {
                break;
            }
        }
        Ok(())
    }

    /// Leave seeking mode, resuming from `resume_tick`. History newer than
    /// the resume point is dropped — the timeline diverges there, and the
    /// strictly-increasing append order must hold for what follows.
    pub fn end_seek(&mut self, handle: SeekHandle, resume_tick: Tick) {
        if !self.seeking || handle.generation != self.generation {
            warn!("end_seek without an active seek; ignored");
            return;
        }
        self.seeking = false;
        self.truncate_to(resume_tick);
    }

    fn truncate_to(&mut self, tick: Tick) {
        while self.groups.len() > 1
            && self.groups.back().is_some_and(|group| group.base_tick > tick)
        {
            if let Some(group) = self.groups.pop_back() {
                self.remove_group_bytes(&group);
            }
        }
        if let Some(group) = self.groups.back_mut() {
            if group.newest_tick > tick {
                let removed = group.truncate_records(tick.max(group.base_tick));
                self.used_bytes -= removed;
                self.record_bytes -= removed;
            }
        }
        // The next append opens a fresh group, so the resumed timeline is
        // replayable from its first frame.
        self.frames_until_base = 0;
    }

    pub fn stats(&self) -> RewindStats {
        RewindStats {
            base_count: self.groups.len(),
            record_count: self.groups.iter().map(|group| group.record_count).sum(),
            base_bytes: self.base_bytes,
            record_bytes: self.record_bytes,
            used_bytes: self.used_bytes,
            capacity_bytes: self.capacity_bytes,
            uncompressed_bytes: self.uncompressed_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_round_trip() {
        let values = [0u64, 1, 0x7f, 0x80, 0x3fff, 0x4000, 123_456_789, u64::MAX];
        for &value in &values {
            let mut encoded = Vec::new();
            write_varint(value, &mut encoded);
            let mut pos = 0;
            assert_eq!(read_varint(&encoded, &mut pos), Some(value));
            assert_eq!(pos, encoded.len());
        }
    }

    #[test]
    fn varint_rejects_truncated_input() {
        let mut pos = 0;
        assert_eq!(read_varint(&[0x80], &mut pos), None);
    }

    fn rle_round_trip(src: &[u8]) -> Vec<u8> {
        let mut encoded = Vec::new();
        encode_rle(src, &mut encoded);
        let mut decoded = Vec::new();
        assert!(decode_rle(&encoded, &mut decoded).is_some());
        assert_eq!(decoded, src);
        encoded
    }

    #[test]
    fn rle_round_trips() {
        rle_round_trip(&[]);
        rle_round_trip(&[7]);
        rle_round_trip(&[1, 2, 3, 4]);
        rle_round_trip(&[5, 5]);
        rle_round_trip(&[5, 5, 5, 5, 5, 9]);
        rle_round_trip(&[9, 5, 5, 5]);
        rle_round_trip(&[0; 1000]);
        rle_round_trip(&[1, 1, 2, 2, 3, 3]);
    }

    #[test]
    fn rle_compresses_runs() {
        // A zero-heavy blob, like real machine state, shrinks drastically.
        let encoded = rle_round_trip(&[0; 4096]);
        assert!(encoded.len() <= 4, "got {} bytes", encoded.len());
    }

    #[test]
    fn group_record_stream_truncates_mid_stream() {
        let mut group = SnapshotGroup {
            base_tick: 100,
            base: Vec::new(),
            records: Vec::new(),
            newest_tick: 100,
            record_count: 0,
        };
        group.push_record(200, 0x01);
        group.push_record(300, 0x02);
        group.push_record(400, 0x03);
        assert_eq!(group.newest_tick, 400);

        let removed = group.truncate_records(250);
        assert!(removed > 0);
        assert_eq!(group.newest_tick, 200);
        assert_eq!(group.record_count, 1);

        // Truncating at the base tick empties the stream.
        group.truncate_records(100);
        assert_eq!(group.newest_tick, 100);
        assert_eq!(group.record_count, 0);
        assert!(group.records.is_empty());
    }
}
