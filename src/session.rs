// src/session.rs

use crate::track::{Track, NUM_TRACKS};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Synchronization granularity. Only `None` and `Bar` are implemented;
/// the remaining variants are recognized in the settings file but
/// rejected before the engine starts.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    None,
    Bar,
    HalfBar,
    Beat,
    HalfBeat,
    QuarterBeat,
}

impl SyncMode {
    pub fn ensure_supported(self) -> Result<Self> {
        match self {
            SyncMode::None | SyncMode::Bar => Ok(self),
            other => bail!("sync mode {:?} is declared but not implemented", other),
        }
    }
}

/// Whole-session state, created once at startup and shared by every
/// concurrent unit for the lifetime of the process. Mutable state lives
/// in the per-track atomics; everything here is fixed after construction.
pub struct Session {
    pub sample_rate: u32,
    pub in_channels: u16,
    pub sync: SyncMode,
    pub tracks: Vec<Track>,
}

impl Session {
    pub fn new(sample_rate: u32, in_channels: u16, sync: SyncMode) -> Self {
        let tracks = (0..NUM_TRACKS).map(|id| Track::new(id, [4, 4])).collect();
        Self {
            sample_rate,
            in_channels,
            sync,
            tracks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::Status;

    #[test]
    fn session_starts_with_four_stopped_tracks() {
        let session = Session::new(48_000, 2, SyncMode::Bar);
        assert_eq!(session.tracks.len(), NUM_TRACKS);
        for (id, track) in session.tracks.iter().enumerate() {
            assert_eq!(track.id, id);
            assert_eq!(track.shared.status(), Status::Stop);
            assert_eq!(track.shared.len(), 0);
        }
    }

    #[test]
    fn unimplemented_sync_modes_are_rejected() {
        assert!(SyncMode::None.ensure_supported().is_ok());
        assert!(SyncMode::Bar.ensure_supported().is_ok());
        assert!(SyncMode::HalfBar.ensure_supported().is_err());
        assert!(SyncMode::Beat.ensure_supported().is_err());
        assert!(SyncMode::HalfBeat.ensure_supported().is_err());
        assert!(SyncMode::QuarterBeat.ensure_supported().is_err());
    }
}
