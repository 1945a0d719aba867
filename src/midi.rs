// src/midi.rs

use crate::controller::{ControlEvent, ControlKind, Controller};
use anyhow::{anyhow, Result};
use log::info;
use midir::{Ignore, MidiInput, MidiInputConnection, MidiInputPort};

const APP_NAME: &str = "ostinato";

/// MIDI channel the pad controller sends loop buttons on.
const PAD_CHANNEL: u8 = 9;
/// Notes mapped to per-track status (toggle) buttons, tracks 0-3.
const TOGGLE_NOTE_BASE: u8 = 40;
/// Notes mapped to per-track stop buttons, tracks 0-3.
const STOP_NOTE_BASE: u8 = 36;
/// CCs mapped to per-track fixed-beats encoders, tracks 0-3.
const FIXED_BEATS_CC_BASE: u8 = 21;

pub fn get_midi_ports() -> Result<Vec<(String, MidiInputPort)>> {
    let midi_in = MidiInput::new(APP_NAME)?;
    let ports = midi_in.ports();
    let mut result = Vec::with_capacity(ports.len());
    for port in ports.iter() {
        let name = midi_in.port_name(port)?;
        result.push((name, port.clone()));
    }
    Ok(result)
}

/// Static control map: raw MIDI bytes to an abstract control event.
/// Anything unmapped is dropped here, before it reaches the core.
fn map_message(message: &[u8]) -> Option<ControlEvent> {
    if message.len() < 3 {
        return None;
    }
    let status = message[0] & 0xF0;
    let channel = message[0] & 0x0F;

    match status {
        0x90 if channel == PAD_CHANNEL && message[2] > 0 => {
            let note = message[1];
            if (TOGGLE_NOTE_BASE..TOGGLE_NOTE_BASE + 4).contains(&note) {
                Some(ControlEvent {
                    track: (note - TOGGLE_NOTE_BASE) as usize,
                    kind: ControlKind::Toggle,
                })
            } else if (STOP_NOTE_BASE..STOP_NOTE_BASE + 4).contains(&note) {
                Some(ControlEvent {
                    track: (note - STOP_NOTE_BASE) as usize,
                    kind: ControlKind::Stop,
                })
            } else {
                None
            }
        }
        0xB0 => {
            let cc = message[1];
            if (FIXED_BEATS_CC_BASE..FIXED_BEATS_CC_BASE + 4).contains(&cc) {
                Some(ControlEvent {
                    track: (cc - FIXED_BEATS_CC_BASE) as usize,
                    kind: ControlKind::SetFixedBeats(message[2]),
                })
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Opens the control surface connection. Mapped events are applied to
/// the controller synchronously on midir's callback thread; the
/// connection stays open until the returned handle is closed.
pub fn connect_control(
    controller: Controller,
    port: &MidiInputPort,
    port_name: &str,
) -> Result<MidiInputConnection<()>> {
    let mut midi_in = MidiInput::new(APP_NAME)?;
    midi_in.ignore(Ignore::None);
    info!("opening MIDI connection to: {}", port_name);

    let conn = midi_in
        .connect(
            port,
            &format!("ostinato-midi-in-{}", port_name),
            move |_stamp, message, _| {
                if let Some(event) = map_message(message) {
                    controller.handle(event);
                }
            },
            (),
        )
        .map_err(|e| anyhow!("failed to connect MIDI input: {}", e))?;
    Ok(conn)
}
