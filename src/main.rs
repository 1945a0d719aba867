mod audio_io;
mod controller;
mod engine;
mod midi;
mod runtime;
mod session;
mod settings;
mod sync;
mod track;

use anyhow::anyhow;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None => {
            let settings = settings::load_settings();
            runtime::run(&settings)
        }
        Some("devices") => audio_io::list_devices(),
        Some("midi-ports") => {
            for (name, _port) in midi::get_midi_ports()? {
                println!("{}", name);
            }
            Ok(())
        }
        Some(other) => Err(anyhow!(
            "unknown utility '{}' (expected 'devices' or 'midi-ports')",
            other
        )),
    }
}
