// src/sync.rs

use crate::session::{Session, SyncMode};
use crate::track::{Status, NUM_TRACKS};
use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const PASS_INTERVAL: Duration = Duration::from_micros(500);

/// Condition a queued transition waits on, snapshotted when the track is
/// armed. Evaluated against current track state by `is_met`, so it can be
/// inspected and tested in isolation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// No timing reference exists; fires on the next pass.
    Immediate,
    /// Fires once the target track's cursor has wrapped past its own
    /// length since arming, i.e. at the next bar boundary.
    BarWrap { target: usize, start_idx: usize },
}

impl Trigger {
    pub fn is_met(&self, session: &Session) -> bool {
        match *self {
            Trigger::Immediate => true,
            Trigger::BarWrap { target, start_idx } => {
                session.tracks[target].shared.idx() < start_idx
            }
        }
    }
}

/// Resolves queued track transitions at timing boundaries of the sync
/// chain head. Runs as its own thread, one pass over all tracks per
/// cycle; all cross-thread reads and writes go through the track atomics,
/// while the chain, the recorded counter, and armed triggers are private
/// to this engine.
pub struct SyncEngine {
    session: Arc<Session>,
    sync_chain: Vec<usize>,
    /// Counts tracks that have ever entered Rec. Deliberately never
    /// decremented: it answers "has a master lineage ever existed", not
    /// "how many tracks are recording now". Master election depends on
    /// this staying monotonic.
    loops_recorded: usize,
    armed: [Option<Trigger>; NUM_TRACKS],
}

impl SyncEngine {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            sync_chain: Vec::new(),
            loops_recorded: 0,
            armed: [None; NUM_TRACKS],
        }
    }

    pub fn run(mut self, shutdown: Arc<AtomicBool>) {
        info!("sync engine started ({:?})", self.session.sync);
        while !shutdown.load(Ordering::Relaxed) {
            self.pass();
            thread::sleep(PASS_INTERVAL);
        }
        info!("sync engine stopped");
    }

    /// One scheduling cycle. In-memory only; cannot fail.
    pub fn pass(&mut self) {
        if self.session.sync == SyncMode::None {
            return;
        }

        if self.loops_recorded == 0 {
            // No timing reference exists yet, so the first recording
            // starts the moment it is requested.
            for track in &self.session.tracks {
                if track.shared.transition(Status::QueueRec, Status::Rec) {
                    info!("sync: first recording starts on track {}", track.id);
                    self.loops_recorded += 1;
                }
            }
            return;
        }

        for id in 0..self.session.tracks.len() {
            let shared = self.session.tracks[id].shared.clone();
            let status = shared.status();

            if shared.len() > 0 {
                match status {
                    Status::QueuePlay => {
                        let fire = self.loops_recorded == 1 || self.trigger_met(id);
                        if fire && shared.transition(Status::QueuePlay, Status::Play) {
                            self.armed[id] = None;
                            self.sync_chain.push(id);
                            info!("sync: track {} playing, chain {:?}", id, self.sync_chain);
                        }
                    }
                    Status::QueueStop => {
                        let fire = self.loops_recorded == 1 || self.trigger_met(id);
                        if fire && shared.transition(Status::QueueStop, Status::Stop) {
                            self.armed[id] = None;
                            // Status flips before the cursor reset so the
                            // render side stops touching idx first.
                            shared.set_idx(0);
                            self.retire(id);
                            info!("sync: track {} stopped, chain {:?}", id, self.sync_chain);
                        }
                    }
                    Status::Rec => self.check_fixed_beats(id),
                    _ => {}
                }
            } else if status == Status::QueueRec
                && self.trigger_met(id)
                && shared.transition(Status::QueueRec, Status::Rec)
            {
                self.armed[id] = None;
                self.loops_recorded += 1;
                info!("sync: recording triggered on track {}", id);
            }
        }
    }

    /// Arms the track on first sight and reports whether its trigger has
    /// fired. Arming and firing never happen on the same pass.
    fn trigger_met(&mut self, id: usize) -> bool {
        match self.armed[id] {
            None => {
                let trigger = match self.sync_chain.first() {
                    None => Trigger::Immediate,
                    Some(&head) => Trigger::BarWrap {
                        target: head,
                        start_idx: self.session.tracks[head].shared.idx(),
                    },
                };
                info!("sync: track {} armed on {:?}", id, trigger);
                self.armed[id] = Some(trigger);
                false
            }
            Some(trigger) => trigger.is_met(&self.session),
        }
    }

    /// Removes a stopped track from the chain; if it was the head, the
    /// next element inherits timing leadership.
    fn retire(&mut self, id: usize) {
        if self.sync_chain.first() == Some(&id) && self.sync_chain.len() > 1 {
            info!("sync: leadership passes to track {}", self.sync_chain[1]);
        }
        self.sync_chain.retain(|&chained| chained != id);
    }

    /// A fixed-length recording transitions out of Rec on its own once it
    /// has captured its quota of master-loop beats.
    fn check_fixed_beats(&mut self, id: usize) {
        let shared = &self.session.tracks[id].shared;
        let beats = shared.fixed_beats();
        if beats == 0 {
            return;
        }
        let Some(&head) = self.sync_chain.first() else {
            return;
        };
        let quota = self.session.tracks[head].beat_len() * beats as f64;
        if quota > 0.0 && shared.len() as f64 >= quota {
            let post = shared.fixed_beats_post();
            if shared.transition(Status::Rec, post) {
                info!(
                    "sync: track {} reached {} beats, switching to {:?}",
                    id, beats, post
                );
            }
        }
    }

    #[cfg(test)]
    pub fn sync_chain(&self) -> &[usize] {
        &self.sync_chain
    }

    #[cfg(test)]
    pub fn loops_recorded(&self) -> usize {
        self.loops_recorded
    }

    #[cfg(test)]
    pub fn armed(&self, id: usize) -> Option<Trigger> {
        self.armed[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> SyncEngine {
        SyncEngine::new(Arc::new(Session::new(48_000, 2, SyncMode::Bar)))
    }

    /// Drives track 0 through the first-recording path and into Play as
    /// the elected master with a loop of `len` samples.
    fn with_master(engine: &mut SyncEngine, len: usize) {
        let shared = engine.session.tracks[0].shared.clone();
        shared.set_status(Status::QueueRec);
        engine.pass();
        assert_eq!(shared.status(), Status::Rec);

        shared.set_len(len);
        shared.set_status(Status::QueuePlay);
        engine.pass();
        assert_eq!(shared.status(), Status::Play);
        assert_eq!(engine.sync_chain(), &[0]);
    }

    #[test]
    fn first_queued_recording_starts_immediately() {
        let mut engine = engine();
        let shared = engine.session.tracks[2].shared.clone();
        shared.set_status(Status::QueueRec);

        engine.pass();
        assert_eq!(shared.status(), Status::Rec);
        assert_eq!(engine.loops_recorded(), 1);
        assert_eq!(engine.armed(2), None);
    }

    #[test]
    fn sync_none_leaves_queued_states_alone() {
        let mut engine = SyncEngine::new(Arc::new(Session::new(48_000, 2, SyncMode::None)));
        let shared = engine.session.tracks[0].shared.clone();
        shared.set_status(Status::QueueRec);
        engine.pass();
        assert_eq!(shared.status(), Status::QueueRec);
    }

    #[test]
    fn single_recorded_track_is_elected_master_on_play() {
        let mut engine = engine();
        with_master(&mut engine, 1000);
        assert_eq!(engine.loops_recorded(), 1);
    }

    #[test]
    fn second_recording_arms_then_fires_without_a_chain() {
        let mut engine = engine();
        let shared = engine.session.tracks[0].shared.clone();
        shared.set_status(Status::QueueRec);
        engine.pass();

        // Master recorded but not yet playing: chain is empty, so the
        // second recording arms an immediate trigger and fires next pass.
        let other = engine.session.tracks[1].shared.clone();
        other.set_status(Status::QueueRec);
        engine.pass();
        assert_eq!(other.status(), Status::QueueRec);
        assert_eq!(engine.armed(1), Some(Trigger::Immediate));

        engine.pass();
        assert_eq!(other.status(), Status::Rec);
        assert_eq!(engine.loops_recorded(), 2);
        assert_eq!(engine.armed(1), None);
    }

    #[test]
    fn queued_play_fires_on_master_bar_wrap() {
        let mut engine = engine();
        with_master(&mut engine, 1000);

        // Second track records so a trigger is required from here on.
        let second = engine.session.tracks[1].shared.clone();
        second.set_status(Status::QueueRec);
        engine.session.tracks[0].shared.set_idx(300);
        engine.pass(); // arms on the master at idx 300
        engine.session.tracks[0].shared.set_idx(5);
        engine.pass(); // master wrapped: recording fires

        // Re-arm cleanly: master playing at idx 600.
        engine.session.tracks[0].shared.set_idx(600);
        second.set_len(1000);
        second.set_status(Status::QueuePlay);

        engine.pass();
        assert_eq!(second.status(), Status::QueuePlay);
        assert_eq!(
            engine.armed(1),
            Some(Trigger::BarWrap {
                target: 0,
                start_idx: 600
            })
        );

        // Master advances but has not wrapped.
        engine.session.tracks[0].shared.set_idx(900);
        engine.pass();
        assert_eq!(second.status(), Status::QueuePlay);

        // Master wraps: idx drops below the armed snapshot.
        engine.session.tracks[0].shared.set_idx(40);
        engine.pass();
        assert_eq!(second.status(), Status::Play);
        assert_eq!(engine.sync_chain(), &[0, 1]);
        assert_eq!(engine.armed(1), None);
    }

    #[test]
    fn queued_stop_resets_cursor_and_hands_off_leadership() {
        let mut engine = engine();
        with_master(&mut engine, 1000);

        let second = engine.session.tracks[1].shared.clone();
        second.set_status(Status::QueueRec);
        engine.session.tracks[0].shared.set_idx(300);
        engine.pass(); // arm
        engine.session.tracks[0].shared.set_idx(5);
        engine.pass(); // fire
        second.set_len(800);
        second.set_status(Status::QueuePlay);
        engine.session.tracks[0].shared.set_idx(500);
        engine.pass(); // arm
        engine.session.tracks[0].shared.set_idx(10);
        engine.pass(); // fire
        assert_eq!(engine.sync_chain(), &[0, 1]);

        // Stop the head; leadership must pass to track 1.
        let head = engine.session.tracks[0].shared.clone();
        head.set_idx(700);
        head.set_status(Status::QueueStop);
        engine.session.tracks[0].shared.set_idx(700);
        engine.pass(); // arm on own wraparound
        engine.session.tracks[0].shared.set_idx(20);
        engine.pass(); // fire

        assert_eq!(head.status(), Status::Stop);
        assert_eq!(head.idx(), 0);
        assert_eq!(engine.sync_chain(), &[1]);
    }

    #[test]
    fn trigger_fires_at_most_once_per_arm() {
        let mut engine = engine();
        with_master(&mut engine, 1000);
        let second = engine.session.tracks[1].shared.clone();
        second.set_status(Status::QueueRec);
        engine.session.tracks[0].shared.set_idx(500);
        engine.pass(); // arm at 500
        engine.session.tracks[0].shared.set_idx(100);
        engine.pass(); // fire
        assert_eq!(second.status(), Status::Rec);
        assert_eq!(engine.armed(1), None);

        // Still below the old snapshot, but nothing is armed: no effect.
        engine.pass();
        assert_eq!(second.status(), Status::Rec);
    }

    #[test]
    fn loops_recorded_is_never_decremented() {
        let mut engine = engine();
        with_master(&mut engine, 1000);
        assert_eq!(engine.loops_recorded(), 1);

        // Master stops entirely; the counter must stay put so a later
        // queued play on another track still resolves as non-first.
        let head = engine.session.tracks[0].shared.clone();
        head.set_status(Status::QueueStop);
        engine.pass();
        assert_eq!(head.status(), Status::Stop);
        assert_eq!(engine.loops_recorded(), 1);
        assert_eq!(engine.sync_chain(), &[] as &[usize]);
    }

    #[test]
    fn fixed_beats_recording_switches_to_dub_at_quota() {
        let mut engine = engine();
        with_master(&mut engine, 1000); // beat_len = 250

        let third = engine.session.tracks[2].shared.clone();
        third.set_fixed_beats(2);
        third.set_status(Status::Rec);
        engine.loops_recorded += 1;

        third.set_len(499);
        engine.pass();
        assert_eq!(third.status(), Status::Rec);

        third.set_len(500);
        engine.pass();
        assert_eq!(third.status_pair(), (Status::Dub, Status::Rec));
    }

    /// End-to-end flow through the controller, buffer engine, and sync
    /// engine: a first loop is recorded and elected master, a second
    /// joins on the master's bar boundary, then stops on the next one.
    #[test]
    fn second_track_joins_and_leaves_on_bar_boundaries() {
        use crate::controller::{ControlEvent, ControlKind, Controller};
        use crate::engine::BufferEngine;

        const BLOCK: usize = 16;
        let session = Arc::new(Session::new(48_000, 2, SyncMode::Bar));
        let controller = Controller::new(session.clone());
        let mut sync = SyncEngine::new(session.clone());
        let mut audio = BufferEngine::new(&session, 64, BLOCK);

        let toggle = |track| ControlEvent {
            track,
            kind: ControlKind::Toggle,
        };
        let input = [0.5f32; BLOCK];
        let mut out = [0.0f32; BLOCK];

        // Record track 0: first recording starts without a trigger.
        controller.handle(toggle(0));
        assert_eq!(session.tracks[0].shared.status(), Status::QueueRec);
        sync.pass();
        assert_eq!(session.tracks[0].shared.status(), Status::Rec);
        audio.on_capture_block(&input);
        audio.on_capture_block(&input);

        // Toggle to play: capture keeps running until the queue resolves.
        controller.handle(toggle(0));
        audio.on_capture_block(&input);
        assert_eq!(session.tracks[0].shared.len(), 48);
        sync.pass();
        assert_eq!(session.tracks[0].shared.status(), Status::Play);
        assert_eq!(sync.sync_chain(), &[0]);

        audio.on_render_block(&mut out); // master idx -> 16

        // Track 1 queues a recording; it arms against the master.
        controller.handle(toggle(1));
        sync.pass();
        assert_eq!(
            sync.armed(1),
            Some(Trigger::BarWrap {
                target: 0,
                start_idx: 16
            })
        );
        audio.on_render_block(&mut out); // idx 32
        sync.pass();
        assert_eq!(session.tracks[1].shared.status(), Status::QueueRec);
        audio.on_render_block(&mut out); // idx 48 -> wraps to 0
        sync.pass();
        assert_eq!(session.tracks[1].shared.status(), Status::Rec);
        assert_eq!(sync.loops_recorded(), 2);

        audio.on_capture_block(&input); // track 1 records one block
        audio.on_render_block(&mut out); // master idx -> 16
        controller.handle(toggle(1));
        sync.pass(); // arm play at master idx 16
        audio.on_render_block(&mut out);
        audio.on_render_block(&mut out); // master wraps again
        sync.pass();
        assert_eq!(session.tracks[1].shared.status(), Status::Play);
        assert_eq!(sync.sync_chain(), &[0, 1]);

        // Stop track 1 on the next boundary.
        audio.on_render_block(&mut out); // master idx -> 16, track1 also plays
        controller.handle(ControlEvent {
            track: 1,
            kind: ControlKind::Stop,
        });
        sync.pass(); // arm stop
        audio.on_render_block(&mut out);
        audio.on_render_block(&mut out); // master wraps
        sync.pass();
        assert_eq!(session.tracks[1].shared.status(), Status::Stop);
        assert_eq!(session.tracks[1].shared.idx(), 0);
        assert_eq!(sync.sync_chain(), &[0]);
    }

    #[test]
    fn fixed_beats_honors_configured_post_status() {
        let mut engine = engine();
        with_master(&mut engine, 1000);

        let third = engine.session.tracks[2].shared.clone();
        third.set_fixed_beats(1);
        third.set_fixed_beats_post(Status::Play);
        third.set_status(Status::Rec);
        third.set_len(250);
        engine.pass();
        assert_eq!(third.status(), Status::Play);
    }
}
