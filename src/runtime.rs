// src/runtime.rs

use crate::audio_io;
use crate::controller::Controller;
use crate::engine::BufferEngine;
use crate::midi;
use crate::session::Session;
use crate::settings::{AppSettings, FixedBeatsPost};
use crate::sync::SyncEngine;
use crate::track::Status;
use anyhow::Result;
use log::{error, info, warn};
use ringbuf::HeapRb;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

/// Slack between the input and output callbacks, in blocks.
const INPUT_RING_BLOCKS: usize = 8;

/// Wires up and runs the four concurrent units: the capture driver
/// (input stream), the render driver (output stream, which owns the
/// buffer engine), the sync engine thread, and the MIDI control source.
/// Returns only after all of them have stopped and the audio device has
/// been released.
pub fn run(settings: &AppSettings) -> Result<()> {
    let sync = settings.sync.ensure_supported()?;
    let shutdown = Arc::new(AtomicBool::new(false));

    let duplex = audio_io::resolve_duplex(
        settings.host_name.as_deref(),
        settings.input_device.as_deref(),
        settings.output_device.as_deref(),
        settings.sample_rate,
        settings.buffer_size,
    )?;
    let block_size = duplex.block_size();

    let session = Arc::new(Session::new(
        duplex.sample_rate(),
        duplex.input_config.channels,
        sync,
    ));
    info!(
        "session: {} Hz, {} input channels, sync {:?}",
        session.sample_rate, session.in_channels, session.sync
    );
    let post = match settings.fixed_beats_post {
        FixedBeatsPost::Dub => Status::Dub,
        FixedBeatsPost::Play => Status::Play,
    };
    for track in &session.tracks {
        track.shared.set_fixed_beats_post(post);
    }

    let ring = HeapRb::<f32>::new(block_size * INPUT_RING_BLOCKS);
    let (producer, consumer) = ring.split();

    let engine = BufferEngine::new(&session, settings.max_loop_samples, block_size);
    let (input_stream, output_stream) =
        audio_io::build_streams(&duplex, producer, consumer, engine, shutdown.clone())?;

    let controller = Controller::new(session.clone());
    let midi_connection = connect_midi(controller, settings.midi_port_name.as_deref());

    let sync_engine = SyncEngine::new(session);
    let sync_handle = {
        let shutdown = shutdown.clone();
        thread::spawn(move || sync_engine.run(shutdown))
    };

    info!("running; press enter to stop");
    wait_for_exit(&shutdown);
    shutdown.store(true, Ordering::Relaxed);

    // Release the device before joining anything else.
    drop(input_stream);
    drop(output_stream);
    if let Some(connection) = midi_connection {
        connection.close();
    }
    if sync_handle.join().is_err() {
        error!("sync engine thread panicked");
    }
    info!("all units stopped");
    Ok(())
}

/// The control surface is optional: without one the looper still runs
/// as a monitor, it just cannot be driven.
fn connect_midi(
    controller: Controller,
    port_name: Option<&str>,
) -> Option<midir::MidiInputConnection<()>> {
    let ports = match midi::get_midi_ports() {
        Ok(ports) => ports,
        Err(e) => {
            warn!("MIDI unavailable: {}", e);
            return None;
        }
    };
    let selected = match port_name {
        Some(wanted) => ports.into_iter().find(|(name, _)| name == wanted),
        None => ports.into_iter().next(),
    };
    let Some((name, port)) = selected else {
        warn!("no MIDI input port found; running without control");
        return None;
    };
    match midi::connect_control(controller, &port, &name) {
        Ok(connection) => Some(connection),
        Err(e) => {
            warn!("MIDI connection failed: {}", e);
            None
        }
    }
}

/// Blocks until either stdin delivers a line (or EOF) or some unit has
/// raised the shutdown flag.
fn wait_for_exit(shutdown: &AtomicBool) {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().lock().read_line(&mut line);
        let _ = tx.send(());
    });
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(()) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}
