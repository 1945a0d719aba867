// src/controller.rs

use crate::session::{Session, SyncMode};
use crate::track::Status;
use log::info;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlKind {
    Toggle,
    Stop,
    /// Raw 0-127 controller value; scaled to beats on application.
    SetFixedBeats(u8),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlEvent {
    pub track: usize,
    pub kind: ControlKind,
}

/// Applies abstract control events to track state, synchronously on the
/// caller's thread. When a sync mode is active, status-button presses land
/// in a queued state for the sync engine to resolve; otherwise they take
/// effect directly.
pub struct Controller {
    session: Arc<Session>,
}

impl Controller {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn handle(&self, event: ControlEvent) {
        let Some(track) = self.session.tracks.get(event.track) else {
            return;
        };
        let shared = &track.shared;
        let queued = self.session.sync != SyncMode::None;

        match event.kind {
            ControlKind::Toggle => {
                let len = shared.len();
                let applied = shared.update_status(|current| match current {
                    Status::Stop if len == 0 => {
                        Some(if queued { Status::QueueRec } else { Status::Rec })
                    }
                    Status::Stop | Status::Rec => {
                        Some(if queued { Status::QueuePlay } else { Status::Play })
                    }
                    Status::Play => Some(Status::Dub),
                    Status::Dub => Some(Status::Play),
                    // A press while a transition is already queued is dropped.
                    _ => None,
                });
                if let Some((from, to)) = applied {
                    info!("track {}: {:?} -> {:?}", event.track, from, to);
                }
            }
            ControlKind::Stop => {
                let to = if queued { Status::QueueStop } else { Status::Stop };
                let from = shared.set_status(to);
                info!("track {}: {:?} -> {:?}", event.track, from, to);
            }
            ControlKind::SetFixedBeats(value) => {
                let beats = (value as u32).div_ceil(4);
                if beats != shared.fixed_beats() {
                    info!("track {}: fixed beats set to {}", event.track, beats);
                    shared.set_fixed_beats(beats);
                }
            }
        }
    }
}
