use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use log::{info, warn, error};
use once_cell::sync::OnceCell;
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use super::clock::{AudioClock, SourceTracker};
use super::resample::AudioResampler;

// ~4s at 48kHz; the scheduler never runs more than the look-ahead window ahead
const RINGBUF_SIZE: usize = 48000 * 4;

static SHARED: OnceCell<Arc<DeviceClock>> = OnceCell::new();

enum DeviceCommand {
    Resume,
    Suspend,
}

/// Write side of the output ring, in device frames.
struct Writer {
    producer: HeapProducer<f32>,
    position: u64,
    pushed: u64,
    resampler: Option<AudioResampler>,
}

/// The default output device, driven as a clock.
///
/// One instance per process: `shared()` opens it on first use and hands out the
/// same handle afterwards, so sessions never re-acquire the device. The cpal
/// stream lives on its own thread; time is the number of frames the stream
/// callback has rendered.
pub struct DeviceClock {
    sample_rate: u32,
    rendered: Arc<AtomicU64>,
    discard_to: Arc<AtomicU64>,
    writer: Mutex<Writer>,
    sources: SourceTracker,
    control: Sender<DeviceCommand>,
}

impl DeviceClock {
    /// Opens the default output device, or returns the already-open one.
    pub fn shared() -> Result<Arc<DeviceClock>> {
        SHARED
            .get_or_try_init(|| Self::open().map(Arc::new))
            .map(Arc::clone)
    }

    fn open() -> Result<Self> {
        let ring = HeapRb::<f32>::new(RINGBUF_SIZE);
        let (producer, consumer) = ring.split();

        let rendered = Arc::new(AtomicU64::new(0));
        let discard_to = Arc::new(AtomicU64::new(0));
        let (control_tx, control_rx) = crossbeam_channel::unbounded::<DeviceCommand>();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<u32>>(1);

        let rendered_cb = rendered.clone();
        let discard_cb = discard_to.clone();
        // cpal streams are not Send on every host, so one thread owns it for life
        thread::spawn(move || {
            let (stream, sample_rate) = match open_stream(consumer, rendered_cb, discard_cb) {
                Ok(opened) => opened,
                Err(e) => {
                    ready_tx.send(Err(e)).ok();
                    return;
                }
            };
            ready_tx.send(Ok(sample_rate)).ok();

            while let Ok(cmd) = control_rx.recv() {
                let result = match cmd {
                    DeviceCommand::Resume => stream.play().map_err(anyhow::Error::from),
                    DeviceCommand::Suspend => stream.pause().map_err(anyhow::Error::from),
                };
                if let Err(e) = result {
                    error!("Output stream control failed: {}", e);
                }
            }
            info!("Output stream closed.");
        });

        let sample_rate = ready_rx
            .recv()
            .context("Audio output thread exited before opening the device")??;

        Ok(Self {
            sample_rate,
            rendered,
            discard_to,
            writer: Mutex::new(Writer { producer, position: 0, pushed: 0, resampler: None }),
            sources: SourceTracker::default(),
            control: control_tx,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn rendered_frames(&self) -> u64 {
        self.rendered.load(Ordering::Acquire)
    }

    fn to_device_rate(&self, writer: &mut Writer, samples: &[f32], sample_rate: u32) -> Vec<f32> {
        if sample_rate == self.sample_rate || sample_rate == 0 {
            return samples.to_vec();
        }
        if writer.resampler.as_ref().map(|r| r.source_rate()) != Some(sample_rate) {
            match AudioResampler::new(sample_rate, self.sample_rate, (sample_rate / 100) as usize) {
                Ok(r) => writer.resampler = Some(r),
                Err(e) => {
                    error!("Failed to build resampler {}Hz -> {}Hz: {}", sample_rate, self.sample_rate, e);
                    return samples.to_vec();
                }
            }
        }
        match writer.resampler.as_mut().map(|r| r.resample(samples)) {
            Some(Ok(resampled)) => resampled,
            Some(Err(e)) => {
                error!("Resampling failed: {}", e);
                Vec::new()
            }
            None => samples.to_vec(),
        }
    }
}

impl AudioClock for DeviceClock {
    fn now(&self) -> f64 {
        self.rendered_frames() as f64 / self.sample_rate as f64
    }

    fn schedule(&self, samples: &[f32], sample_rate: u32, at: f64) -> f64 {
        let Ok(mut writer) = self.writer.lock() else {
            return self.now();
        };
        let sample_rate = if sample_rate == 0 { self.sample_rate } else { sample_rate };

        // After an underrun the ring is empty and the callback has moved past us
        let write_from = writer.position.max(self.rendered_frames());
        let start_frame = start_frame(at, self.sample_rate, write_from);

        let silence = (start_frame - write_from) as usize;
        let padded = writer.producer.push_iter(&mut std::iter::repeat(0.0).take(silence));
        let device_samples = self.to_device_rate(&mut writer, samples, sample_rate);
        let pushed = writer.producer.push_slice(&device_samples);
        if pushed < device_samples.len() || padded < silence {
            warn!("Output ring full, dropped {} samples", device_samples.len() - pushed + silence - padded);
        }
        writer.position = start_frame + timeline_frames(samples.len(), sample_rate, self.sample_rate);
        writer.pushed += (padded + pushed) as u64;

        let start = start_frame as f64 / self.sample_rate as f64;
        self.sources.add(start + samples.len() as f64 / sample_rate as f64);
        start
    }

    fn stop_all(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            self.discard_to.store(writer.pushed, Ordering::Release);
            writer.position = self.rendered_frames();
            if let Some(r) = writer.resampler.as_mut() {
                r.reset();
            }
        }
        self.sources.clear();
    }

    fn active_sources(&self) -> usize {
        self.sources.active(self.now())
    }

    fn resume(&self) {
        self.control.send(DeviceCommand::Resume).ok();
    }

    fn suspend(&self) {
        self.control.send(DeviceCommand::Suspend).ok();
    }
}

/// Device frame a source scheduled for `at` starts on; never before what has
/// already been written.
fn start_frame(at: f64, device_rate: u32, write_from: u64) -> u64 {
    ((at.max(0.0) * device_rate as f64).round() as u64).max(write_from)
}

/// Device frames a source covers on the timeline. The resampler may still be
/// holding its tail; that comes out ahead of the next source.
fn timeline_frames(samples: usize, sample_rate: u32, device_rate: u32) -> u64 {
    (samples as f64 * device_rate as f64 / sample_rate as f64).round() as u64
}

fn open_stream(
    consumer: HeapConsumer<f32>,
    rendered: Arc<AtomicU64>,
    discard_to: Arc<AtomicU64>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();

    let device = host.default_output_device()
        .context("No output device found")?;

    info!("Output device: {}", device.name().unwrap_or("Unknown".to_string()));

    let config = device.default_output_config()
        .context("Failed to get default output config")?;

    info!("Default config: Channels={}, SampleRate={}", config.channels(), config.sample_rate().0);

    let err_fn = |err| error!("an error occurred on stream: {}", err);

    let channels = config.channels() as usize;
    let sample_rate = config.sample_rate().0;
    let mut reader = RingReader { consumer, consumed: 0, discard_to, rendered };
    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &config.into(),
            move |data: &mut [f32], _: &_| reader.read_f32(data, channels),
            err_fn,
            None,
        )?,
        cpal::SampleFormat::I16 => device.build_output_stream(
            &config.into(),
            move |data: &mut [i16], _: &_| reader.read_i16(data, channels),
            err_fn,
            None,
        )?,
        cpal::SampleFormat::U16 => device.build_output_stream(
            &config.into(),
            move |data: &mut [u16], _: &_| reader.read_u16(data, channels),
            err_fn,
            None,
        )?,
        sample_format => anyhow::bail!("Unsupported sample format '{:?}'", sample_format),
    };

    stream.play()?;
    Ok((stream, sample_rate))
}

/// Callback side of the output ring.
struct RingReader {
    consumer: HeapConsumer<f32>,
    consumed: u64,
    discard_to: Arc<AtomicU64>,
    rendered: Arc<AtomicU64>,
}

impl RingReader {
    /// Skips samples that were queued before the last `stop_all`.
    fn discard_stale(&mut self) {
        let target = self.discard_to.load(Ordering::Acquire);
        if self.consumed < target {
            let stale = ((target - self.consumed) as usize).min(self.consumer.len());
            self.consumed += self.consumer.skip(stale) as u64;
        }
    }

    fn next(&mut self) -> f32 {
        match self.consumer.pop() {
            Some(s) => {
                self.consumed += 1;
                s
            }
            None => 0.0,
        }
    }

    fn read_f32(&mut self, output: &mut [f32], channels: usize) {
        self.discard_stale();
        let mut frames = 0;
        for frame in output.chunks_mut(channels) {
            let sample = self.next();
            frame.iter_mut().for_each(|s| *s = sample);
            frames += 1;
        }
        self.rendered.fetch_add(frames, Ordering::Release);
    }

    fn read_i16(&mut self, output: &mut [i16], channels: usize) {
        self.discard_stale();
        let mut frames = 0;
        for frame in output.chunks_mut(channels) {
            // f32 to i16, mirror of the / 32768 decode
            let sample = (self.next() * 32767.0) as i16;
            frame.iter_mut().for_each(|s| *s = sample);
            frames += 1;
        }
        self.rendered.fetch_add(frames, Ordering::Release);
    }

    fn read_u16(&mut self, output: &mut [u16], channels: usize) {
        self.discard_stale();
        let mut frames = 0;
        for frame in output.chunks_mut(channels) {
            // f32 to u16 (-1.0 -> 0, 1.0 -> 65535)
            let sample = (self.next() * 32767.0 + 32768.0) as u16;
            frame.iter_mut().for_each(|s| *s = sample);
            frames += 1;
        }
        self.rendered.fetch_add(frames, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_back_to_back_sources_need_no_padding() {
        // 40ms at 22050Hz is not a whole number of 10ms resampler chunks
        let mut position = 0;
        let mut at = 0.0;
        for _ in 0..25 {
            let start = start_frame(at, 48000, position);
            assert_eq!(start, position);
            position = start + timeline_frames(882, 22050, 48000);
            at = start as f64 / 48000.0 + 882.0 / 22050.0;
        }
        assert_eq!(position, 25 * 1920);
    }

    #[test]
    fn test_late_source_starts_at_write_position() {
        assert_eq!(start_frame(0.0, 48000, 500), 500);
        assert_eq!(start_frame(1.0, 48000, 500), 48000);
    }
}
