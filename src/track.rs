// src/track.rs

use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

pub const NUM_TRACKS: usize = 4;

/// Maximum recorded length per track, in samples. This is a raw sample
/// count, not scaled by the sample rate, so the maximum loop duration
/// shrinks as the rate goes up (~21 minutes at 48 kHz, ~5 at 192 kHz).
pub const MAX_LOOP_SAMPLES: usize = 1024 * 1000 * 60;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Stop = 0,
    Rec = 1,
    Play = 2,
    Dub = 3,
    QueueRec = 4,
    QueueStop = 5,
    QueuePlay = 6,
}

impl From<u8> for Status {
    fn from(val: u8) -> Self {
        match val {
            0 => Status::Stop,
            1 => Status::Rec,
            2 => Status::Play,
            3 => Status::Dub,
            4 => Status::QueueRec,
            5 => Status::QueueStop,
            6 => Status::QueuePlay,
            _ => Status::Stop, // Default fallback
        }
    }
}

fn pack(old: Status, current: Status) -> u16 {
    ((old as u16) << 8) | current as u16
}

fn unpack(pair: u16) -> (Status, Status) {
    (Status::from((pair & 0xFF) as u8), Status::from((pair >> 8) as u8))
}

/// Track state shared between the control, sync, and audio threads.
///
/// The current and previous status live in one atomic word (previous in
/// the high byte) so a status write and its old-status snapshot can never
/// be observed half-applied. Every status change goes through
/// `fetch_update` on the pair; the previous status is snapshotted as a
/// side effect of each write.
pub struct TrackShared {
    status_pair: AtomicU16,
    idx: AtomicUsize,
    len: AtomicUsize,
    fixed_beats: AtomicU32,
    fixed_beats_post: AtomicU8,
}

impl TrackShared {
    pub fn new() -> Self {
        Self {
            status_pair: AtomicU16::new(pack(Status::Stop, Status::Stop)),
            idx: AtomicUsize::new(0),
            len: AtomicUsize::new(0),
            fixed_beats: AtomicU32::new(0),
            fixed_beats_post: AtomicU8::new(Status::Dub as u8),
        }
    }

    pub fn status(&self) -> Status {
        unpack(self.status_pair.load(Ordering::Acquire)).0
    }

    /// Loads (current, previous) as one consistent pair.
    pub fn status_pair(&self) -> (Status, Status) {
        unpack(self.status_pair.load(Ordering::Acquire))
    }

    /// Unconditional status write. Returns the status it replaced.
    pub fn set_status(&self, next: Status) -> Status {
        let prev = match self
            .status_pair
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pair| {
                Some(pack(unpack(pair).0, next))
            }) {
            Ok(pair) | Err(pair) => pair,
        };
        unpack(prev).0
    }

    /// Conditional transition: applies `to` only while the current status
    /// is still `from`. Returns whether the write landed.
    pub fn transition(&self, from: Status, to: Status) -> bool {
        self.status_pair
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pair| {
                let (current, _) = unpack(pair);
                if current == from {
                    Some(pack(current, to))
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// Read-modify-write transition decided by `decide` against the
    /// current status, applied atomically. Returns the (from, to) pair if
    /// a transition was applied.
    pub fn update_status<F>(&self, mut decide: F) -> Option<(Status, Status)>
    where
        F: FnMut(Status) -> Option<Status>,
    {
        let mut applied = None;
        let _ = self
            .status_pair
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pair| {
                let (current, _) = unpack(pair);
                match decide(current) {
                    Some(next) => {
                        applied = Some((current, next));
                        Some(pack(current, next))
                    }
                    None => {
                        applied = None;
                        None
                    }
                }
            });
        applied
    }

    pub fn idx(&self) -> usize {
        self.idx.load(Ordering::Acquire)
    }

    pub fn set_idx(&self, idx: usize) {
        self.idx.store(idx, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn set_len(&self, len: usize) {
        self.len.store(len, Ordering::Release);
    }

    pub fn fixed_beats(&self) -> u32 {
        self.fixed_beats.load(Ordering::Acquire)
    }

    pub fn set_fixed_beats(&self, beats: u32) {
        self.fixed_beats.store(beats, Ordering::Release);
    }

    pub fn fixed_beats_post(&self) -> Status {
        self.fixed_beats_post.load(Ordering::Acquire).into()
    }

    pub fn set_fixed_beats_post(&self, status: Status) {
        self.fixed_beats_post.store(status as u8, Ordering::Release);
    }
}

impl Default for TrackShared {
    fn default() -> Self {
        Self::new()
    }
}

/// One loop track. The sample buffer itself is owned by the buffer engine
/// on the audio thread; this is the identity plus the shared state every
/// thread coordinates through.
pub struct Track {
    pub id: usize,
    pub time_signature: [u32; 2],
    pub shared: Arc<TrackShared>,
}

impl Track {
    pub fn new(id: usize, time_signature: [u32; 2]) -> Self {
        Self {
            id,
            time_signature,
            shared: Arc::new(TrackShared::new()),
        }
    }

    /// Samples per beat, derived from the recorded length and the
    /// numerator of the time signature.
    pub fn beat_len(&self) -> f64 {
        self.shared.len() as f64 / self.time_signature[0] as f64
    }
}
