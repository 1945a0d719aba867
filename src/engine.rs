// src/engine.rs

use crate::session::Session;
use crate::track::{Status, TrackShared};
use std::sync::Arc;

/// Real-time record/playback engine. Owns every sample buffer; both
/// entry points run back-to-back on the output stream's callback thread,
/// so buffer contents, lengths, and cursor advancement have a single
/// writer. The rest of the system only sees the published atomics.
///
/// Neither routine allocates or blocks once the engine is constructed.
pub struct BufferEngine {
    tracks: Vec<Arc<TrackShared>>,
    buffers: Vec<Box<[f32]>>,
    capacity: usize,
    monitor: Vec<f32>,
}

impl BufferEngine {
    pub fn new(session: &Session, capacity: usize, block_size: usize) -> Self {
        let tracks: Vec<Arc<TrackShared>> =
            session.tracks.iter().map(|t| t.shared.clone()).collect();
        let buffers = tracks
            .iter()
            .map(|_| vec![0.0; capacity].into_boxed_slice())
            .collect();
        Self {
            tracks,
            buffers,
            capacity,
            monitor: vec![0.0; block_size],
        }
    }

    /// One block of mono input. Copies the live feed into the monitor
    /// buffer, appends to any recording track (clamped at capacity), and
    /// overdubs circularly onto any dubbing track.
    pub fn on_capture_block(&mut self, input: &[f32]) {
        let n = input.len();
        if self.monitor.len() < n {
            // Only hit if the device delivers a larger block than it
            // was configured for.
            self.monitor.resize(n, 0.0);
        }
        self.monitor[..n].copy_from_slice(input);

        for (i, shared) in self.tracks.iter().enumerate() {
            let (status, old) = shared.status_pair();
            let recording = status == Status::Rec
                || (status == Status::QueuePlay && old == Status::Rec)
                || (status == Status::QueueStop && old == Status::Rec);

            if recording {
                let len = shared.len();
                let take = n.min(self.capacity.saturating_sub(len));
                self.buffers[i][len..len + take].copy_from_slice(&input[..take]);
                shared.set_len(len + take);
                if len + take >= self.capacity {
                    // Out of room: recording stops silently at max length.
                    shared.set_status(Status::Play);
                }
            } else if status == Status::Dub {
                let len = shared.len();
                if len == 0 {
                    continue;
                }
                // Circular overdub over the recorded region, starting at
                // the playback cursor. The cursor is advanced by render,
                // never here, and dub never grows the loop.
                let mut pos = shared.idx().min(len - 1);
                let buf = &mut self.buffers[i];
                for &sample in input {
                    buf[pos] += sample;
                    pos += 1;
                    if pos == len {
                        pos = 0;
                    }
                }
            }
        }
    }

    /// Produces one block of mono output: the monitor passthrough plus
    /// every audible track, summed without limiting.
    pub fn on_render_block(&mut self, out: &mut [f32]) {
        let n = out.len();
        if self.monitor.len() < n {
            self.monitor.resize(n, 0.0);
        }
        out.copy_from_slice(&self.monitor[..n]);

        for (i, shared) in self.tracks.iter().enumerate() {
            let (status, old) = shared.status_pair();
            let audible = status == Status::Play
                || status == Status::Dub
                || (status == Status::QueueStop && old == Status::Play);
            if !audible {
                continue;
            }
            let len = shared.len();
            if len == 0 {
                continue;
            }

            let idx = shared.idx().min(len - 1);
            let take = n.min(len - idx);
            for (dst, src) in out[..take].iter_mut().zip(&self.buffers[i][idx..idx + take]) {
                *dst += *src;
            }

            let mut next = idx + take;
            if next >= len {
                next = 0;
            }
            // If the sync engine stopped this track mid-block its cursor
            // reset wins; otherwise publish the advanced cursor.
            if shared.status() != Status::Stop {
                shared.set_idx(next);
            }
        }
    }
}
