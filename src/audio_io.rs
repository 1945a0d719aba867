// src/audio_io.rs

use crate::engine::BufferEngine;
use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, FromSample, Sample, SampleFormat, Stream, StreamConfig};
use log::{error, info};
use ringbuf::{HeapConsumer, HeapProducer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Fallback block size when the device will not commit to a fixed one.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// Resolved device pair and stream configs, negotiated before the
/// session is built so track state can be created at the real rate.
pub struct DuplexConfig {
    pub input_device: Device,
    pub output_device: Device,
    pub input_config: StreamConfig,
    pub output_config: StreamConfig,
    pub sample_format: SampleFormat,
}

impl DuplexConfig {
    pub fn sample_rate(&self) -> u32 {
        self.output_config.sample_rate.0
    }

    pub fn block_size(&self) -> usize {
        match self.output_config.buffer_size {
            BufferSize::Fixed(size) => size as usize,
            BufferSize::Default => DEFAULT_BLOCK_SIZE as usize,
        }
    }
}

pub fn resolve_duplex(
    host_name: Option<&str>,
    input_device_name: Option<&str>,
    output_device_name: Option<&str>,
    requested_sample_rate: Option<u32>,
    requested_buffer_size: Option<u32>,
) -> Result<DuplexConfig> {
    let host = match host_name {
        Some(name) => {
            let id = cpal::available_hosts()
                .into_iter()
                .find(|id| id.name().eq_ignore_ascii_case(name))
                .ok_or_else(|| anyhow::anyhow!("Audio host not found: {}", name))?;
            cpal::host_from_id(id)?
        }
        None => cpal::default_host(),
    };

    let input_device = if let Some(name) = input_device_name {
        host.input_devices()?
            .find(|d| d.name().ok().as_deref() == Some(name))
            .ok_or_else(|| anyhow::anyhow!("Input device not found: {}", name))?
    } else {
        host.default_input_device()
            .ok_or_else(|| anyhow::anyhow!("No default input device"))?
    };
    let output_device = if let Some(name) = output_device_name {
        host.output_devices()?
            .find(|d| d.name().ok().as_deref() == Some(name))
            .ok_or_else(|| anyhow::anyhow!("Output device not found: {}", name))?
    } else {
        host.default_output_device()
            .ok_or_else(|| anyhow::anyhow!("No default output device"))?
    };
    info!("using input device: {}", input_device.name()?);
    info!("using output device: {}", output_device.name()?);

    let default_input_config = input_device.default_input_config()?;
    let default_output_config = output_device.default_output_config()?;
    let sample_format = default_output_config.sample_format();

    let mut input_config: StreamConfig = default_input_config.into();
    let mut output_config: StreamConfig = default_output_config.into();
    if let Some(sr) = requested_sample_rate {
        input_config.sample_rate = cpal::SampleRate(sr);
        output_config.sample_rate = cpal::SampleRate(sr);
    }
    let buffer_size = requested_buffer_size.unwrap_or(DEFAULT_BLOCK_SIZE);
    input_config.buffer_size = BufferSize::Fixed(buffer_size);
    output_config.buffer_size = BufferSize::Fixed(buffer_size);

    Ok(DuplexConfig {
        input_device,
        output_device,
        input_config,
        output_config,
        sample_format,
    })
}

/// Builds and starts both streams. The input callback only downmixes to
/// mono and feeds the ring; the output callback pops one block, runs the
/// engine's capture and render routines back-to-back, and fans the mono
/// result out across the output channels. A stream fault raises the
/// shutdown flag so the remaining units wind down instead of running
/// without audio.
pub fn build_streams(
    duplex: &DuplexConfig,
    producer: HeapProducer<f32>,
    consumer: HeapConsumer<f32>,
    engine: BufferEngine,
    shutdown: Arc<AtomicBool>,
) -> Result<(Stream, Stream)> {
    fn run<T>(
        duplex: &DuplexConfig,
        producer: HeapProducer<f32>,
        consumer: HeapConsumer<f32>,
        engine: BufferEngine,
        shutdown: Arc<AtomicBool>,
    ) -> Result<(Stream, Stream)>
    where
        T: Sample + cpal::SizedSample + FromSample<f32>,
        f32: FromSample<T>,
    {
        let input_stream = build_input_stream::<T>(
            &duplex.input_device,
            &duplex.input_config,
            producer,
            shutdown.clone(),
        )?;
        let output_stream = build_output_stream::<T>(
            &duplex.output_device,
            &duplex.output_config,
            consumer,
            engine,
            shutdown,
        )?;
        input_stream.play()?;
        output_stream.play()?;
        Ok((input_stream, output_stream))
    }

    let streams = match duplex.sample_format {
        SampleFormat::F32 => run::<f32>(duplex, producer, consumer, engine, shutdown)?,
        SampleFormat::I16 => run::<i16>(duplex, producer, consumer, engine, shutdown)?,
        SampleFormat::U16 => run::<u16>(duplex, producer, consumer, engine, shutdown)?,
        format => return Err(anyhow::anyhow!("Unsupported sample format {}", format)),
    };

    info!(
        "streams running at {} Hz, block size {}",
        duplex.sample_rate(),
        duplex.block_size()
    );
    Ok(streams)
}

fn stream_err_fn(name: &'static str, shutdown: Arc<AtomicBool>) -> impl FnMut(cpal::StreamError) {
    move |err| {
        error!("{} stream error: {}", name, err);
        shutdown.store(true, Ordering::Relaxed);
    }
}

fn build_input_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut producer: HeapProducer<f32>,
    shutdown: Arc<AtomicBool>,
) -> Result<Stream>
where
    T: Sample + cpal::SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            for frame in data.chunks(channels) {
                let mono = frame.iter().map(|s| f32::from_sample(*s)).sum::<f32>();
                // ring full means the output side has stalled; drop the sample
                let _ = producer.push(mono);
            }
        },
        stream_err_fn("input", shutdown),
        None,
    )?;
    Ok(stream)
}

fn build_output_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut consumer: HeapConsumer<f32>,
    mut engine: BufferEngine,
    shutdown: Arc<AtomicBool>,
) -> Result<Stream>
where
    T: Sample + cpal::SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let block = match config.buffer_size {
        BufferSize::Fixed(size) => size as usize,
        BufferSize::Default => DEFAULT_BLOCK_SIZE as usize,
    };
    let mut capture_block: Vec<f32> = vec![0.0; block];
    let mut render_block: Vec<f32> = vec![0.0; block];

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels;
            if capture_block.len() < frames {
                capture_block.resize(frames, 0.0);
                render_block.resize(frames, 0.0);
            }

            // Whatever input has arrived since the last block; the
            // remainder is silence rather than a stall.
            let got = consumer.pop_slice(&mut capture_block[..frames]);
            capture_block[got..frames].fill(0.0);

            engine.on_capture_block(&capture_block[..frames]);
            render_block[..frames].fill(0.0);
            engine.on_render_block(&mut render_block[..frames]);

            for (frame, &sample) in data.chunks_mut(channels).zip(render_block.iter()) {
                let value = T::from_sample(sample);
                for out in frame.iter_mut() {
                    *out = value;
                }
            }
        },
        stream_err_fn("output", shutdown),
        None,
    )?;
    Ok(stream)
}

/// Prints every host and its devices, for picking names to put in the
/// settings file.
pub fn list_devices() -> Result<()> {
    for host_id in cpal::available_hosts() {
        println!("host: {}", host_id.name());
        let host = cpal::host_from_id(host_id)?;
        for device in host.input_devices()? {
            println!("  in:  {}", device.name()?);
        }
        for device in host.output_devices()? {
            println!("  out: {}", device.name()?);
        }
    }
    Ok(())
}
