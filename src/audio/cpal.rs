// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    collections::VecDeque,
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{error, info, warn};

use crate::{
    audio::{
        CaptureComplete, Device as AudioDevice, DeviceError, PlaybackComplete, QUEUE_DEPTH,
    },
    clips::CAPTURE_RATE,
    config,
};

/// Priority for the stream-owning threads. The data callbacks themselves run
/// on threads cpal owns.
const STREAM_THREAD_PRIORITY: u8 = 70;

/// How often the stream-owning threads check for shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// A buffer-queue device on top of a cpal output and input stream. The
/// streams are owned by dedicated threads since they cannot move between
/// threads; completion callbacks are invoked from a separate dispatch thread
/// so the data callbacks never run engine code.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The maximum number of output channels the device supports.
    max_channels: u16,
    /// Controls how long to wait before playback of a buffer starts.
    playback_delay: Duration,
    shared: Arc<Shared>,
    output_thread: Mutex<Option<thread::JoinHandle<()>>>,
    input_thread: Mutex<Option<thread::JoinHandle<()>>>,
    dispatch_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

/// State shared with the stream data callbacks and the dispatch thread.
struct Shared {
    playback: Mutex<PlaybackState>,
    capture: Mutex<Option<PendingCapture>>,
    playback_complete: Mutex<Option<PlaybackComplete>>,
    capture_complete: Mutex<Option<CaptureComplete>>,
    /// Linear gain as f32 bits, applied in the output callback.
    gain_bits: AtomicU32,
    recording: AtomicBool,
    shut_down: AtomicBool,
    completion_tx: crossbeam_channel::Sender<Completion>,
    completion_rx: crossbeam_channel::Receiver<Completion>,
}

struct PlaybackState {
    /// Buffers waiting to be consumed, oldest first.
    queue: VecDeque<Arc<[i16]>>,
    /// Position within the front buffer.
    pos: usize,
}

struct PendingCapture {
    samples: Vec<i16>,
    frames: usize,
}

enum Completion {
    Playback,
    Capture(Vec<i16>),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

impl Shared {
    fn new() -> Shared {
        let (completion_tx, completion_rx) = crossbeam_channel::unbounded();
        Shared {
            playback: Mutex::new(PlaybackState {
                queue: VecDeque::new(),
                pos: 0,
            }),
            capture: Mutex::new(None),
            playback_complete: Mutex::new(None),
            capture_complete: Mutex::new(None),
            gain_bits: AtomicU32::new(1.0f32.to_bits()),
            recording: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            completion_tx,
            completion_rx,
        }
    }

    /// Pulls the next playback sample, advancing through the queued buffers.
    /// A consumed buffer is popped before its completion is signalled so a
    /// re-enqueue from the callback finds queue space.
    fn next_sample(&self, playback: &mut PlaybackState) -> Option<i16> {
        loop {
            let buffer = playback.queue.front()?;
            if playback.pos < buffer.len() {
                let sample = buffer[playback.pos];
                playback.pos += 1;
                return Some(sample);
            }

            playback.queue.pop_front();
            playback.pos = 0;
            let _ = self.completion_tx.send(Completion::Playback);
        }
    }

    /// Appends captured frames to the pending buffer, signalling completion
    /// once the requested length has been reached.
    fn push_captured(&self, samples: impl Iterator<Item = i16>) {
        if !self.recording.load(Ordering::Relaxed) {
            return;
        }

        let mut capture = self.capture.lock();
        let pending = match capture.as_mut() {
            Some(pending) => pending,
            None => return,
        };

        pending.samples.extend(samples);
        if pending.samples.len() >= pending.frames {
            let mut pending = capture.take().expect("pending capture vanished");
            pending.samples.truncate(pending.frames);
            let _ = self.completion_tx.send(Completion::Capture(pending.samples));
        }
    }

    fn gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }
}

/// Fills an f32 output slice from the playback queue, zero-filling once the
/// queue is drained.
fn fill_output_f32(shared: &Shared, data: &mut [f32]) {
    let gain = shared.gain();
    let mut playback = shared.playback.lock();
    for slot in data.iter_mut() {
        *slot = match shared.next_sample(&mut playback) {
            Some(sample) => sample as f32 / 32_768.0 * gain,
            None => 0.0,
        };
    }
}

/// Fills an i16 output slice from the playback queue.
fn fill_output_i16(shared: &Shared, data: &mut [i16]) {
    let gain = shared.gain();
    let mut playback = shared.playback.lock();
    for slot in data.iter_mut() {
        *slot = match shared.next_sample(&mut playback) {
            Some(sample) => (sample as f32 * gain).clamp(-32_768.0, 32_767.0) as i16,
            None => 0,
        };
    }
}

fn raise_stream_thread_priority() {
    let priority = match ThreadPriorityValue::try_from(STREAM_THREAD_PRIORITY) {
        Ok(priority) => priority,
        Err(_) => return,
    };
    if set_current_thread_priority(ThreadPriority::Crossplatform(priority)).is_err() {
        warn!("Unable to raise the stream thread priority.");
    }
}

impl Device {
    /// Lists cpal devices and produces the Device trait.
    pub fn list() -> Result<Vec<Box<dyn AudioDevice>>, Box<dyn Error>> {
        Ok(Device::list_cpal_devices()?
            .into_iter()
            .map(|(device, _)| {
                let device: Box<dyn AudioDevice> = Box::new(device);
                device
            })
            .collect())
    }

    /// Lists cpal devices. The returned devices are inert: no streams have
    /// been opened. The underlying cpal device rides along for [Device::get].
    fn list_cpal_devices() -> Result<Vec<(Device, cpal::Device)>, Box<dyn Error>> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        let mut devices: Vec<(Device, cpal::Device)> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let mut max_channels = 0;

                let output_configs = device.supported_output_configs();
                if let Err(_e) = output_configs {
                    continue;
                }

                for output_config in device.supported_output_configs()? {
                    if max_channels < output_config.channels() {
                        max_channels = output_config.channels();
                    }
                }

                if max_channels > 0 {
                    devices.push((
                        Device {
                            name: device.name()?,
                            host_id,
                            max_channels,
                            playback_delay: Duration::ZERO,
                            shared: Arc::new(Shared::new()),
                            output_thread: Mutex::new(None),
                            input_thread: Mutex::new(None),
                            dispatch_thread: Mutex::new(None),
                        },
                        device,
                    ))
                }
            }
        }

        devices.sort_by_key(|(device, _)| device.name.to_string());
        Ok(devices)
    }

    /// Gets the given cpal device and opens its streams.
    pub fn get(config: config::audio::Audio) -> Result<Device, Box<dyn Error>> {
        let name = config.device();
        match Device::list_cpal_devices()?
            .into_iter()
            .find(|(device, _)| device.name.trim() == name)
        {
            Some((mut device, cpal_device)) => {
                device.playback_delay = config.playback_delay()?;
                device.start_streams(cpal_device, &config);
                Ok(device)
            }
            None => Err(format!("no device found with name {}", name).into()),
        }
    }

    fn start_streams(&self, cpal_device: cpal::Device, config: &config::audio::Audio) {
        let stream_rate = config.stream_rate();
        let buffer_size = match config.buffer_size() {
            Some(frames) => cpal::BufferSize::Fixed(frames),
            None => cpal::BufferSize::Default,
        };

        // The output stream: owned by its thread, pulling from the playback
        // queue until shutdown.
        let output_thread = {
            let shared = Arc::clone(&self.shared);
            let device_name = self.name.clone();
            let cpal_device = cpal_device.clone();
            thread::spawn(move || {
                raise_stream_thread_priority();

                let stream_config = cpal::StreamConfig {
                    channels: 1,
                    sample_rate: stream_rate,
                    buffer_size,
                };

                let sample_format = match cpal_device.default_output_config() {
                    Ok(supported) => supported.sample_format(),
                    Err(e) => {
                        error!(err = %e, device = device_name, "Unable to query output config.");
                        return;
                    }
                };

                let stream_result = match sample_format {
                    cpal::SampleFormat::I16 => {
                        let shared = Arc::clone(&shared);
                        cpal_device.build_output_stream(
                            &stream_config,
                            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                                fill_output_i16(&shared, data);
                            },
                            |err| error!("cpal output stream error: {}", err),
                            None,
                        )
                    }
                    _ => {
                        let shared = Arc::clone(&shared);
                        cpal_device.build_output_stream(
                            &stream_config,
                            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                                fill_output_f32(&shared, data);
                            },
                            |err| error!("cpal output stream error: {}", err),
                            None,
                        )
                    }
                };

                let stream = match stream_result {
                    Ok(stream) => stream,
                    Err(e) => {
                        error!(err = %e, device = device_name, "Unable to open output stream.");
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    error!(err = %e, device = device_name, "Unable to start output stream.");
                    return;
                }
                info!(device = device_name, rate = stream_rate, "Output stream started.");

                while !shared.shut_down.load(Ordering::Relaxed) {
                    thread::sleep(SHUTDOWN_POLL);
                }
            })
        };

        // The input stream: always open, but samples are only collected while
        // recording with a pending capture buffer.
        let input_thread = {
            let shared = Arc::clone(&self.shared);
            let device_name = self.name.clone();
            thread::spawn(move || {
                let stream_config = cpal::StreamConfig {
                    channels: 1,
                    sample_rate: CAPTURE_RATE,
                    buffer_size: cpal::BufferSize::Default,
                };

                let sample_format = match cpal_device.default_input_config() {
                    Ok(supported) => supported.sample_format(),
                    Err(e) => {
                        error!(err = %e, device = device_name, "Unable to query input config.");
                        return;
                    }
                };

                let stream_result = match sample_format {
                    cpal::SampleFormat::I16 => {
                        let shared = Arc::clone(&shared);
                        cpal_device.build_input_stream(
                            &stream_config,
                            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                                shared.push_captured(data.iter().copied());
                            },
                            |err| error!("cpal input stream error: {}", err),
                            None,
                        )
                    }
                    _ => {
                        let shared = Arc::clone(&shared);
                        cpal_device.build_input_stream(
                            &stream_config,
                            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                                shared.push_captured(
                                    data.iter()
                                        .map(|s| (s.clamp(-1.0, 1.0) * 32_767.0) as i16),
                                );
                            },
                            |err| error!("cpal input stream error: {}", err),
                            None,
                        )
                    }
                };

                let stream = match stream_result {
                    Ok(stream) => stream,
                    Err(e) => {
                        error!(err = %e, device = device_name, "Unable to open input stream.");
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    error!(err = %e, device = device_name, "Unable to start input stream.");
                    return;
                }
                info!(device = device_name, rate = CAPTURE_RATE, "Input stream started.");

                while !shared.shut_down.load(Ordering::Relaxed) {
                    thread::sleep(SHUTDOWN_POLL);
                }
            })
        };

        // The dispatch thread: hands completions to the registered callbacks
        // off the data-callback threads.
        let dispatch_thread = {
            let shared = Arc::clone(&self.shared);
            thread::spawn(move || loop {
                match shared.completion_rx.recv_timeout(SHUTDOWN_POLL) {
                    Ok(Completion::Playback) => {
                        if let Some(callback) = shared.playback_complete.lock().as_ref() {
                            callback();
                        }
                    }
                    Ok(Completion::Capture(samples)) => {
                        if let Some(callback) = shared.capture_complete.lock().as_ref() {
                            callback(samples);
                        }
                    }
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        if shared.shut_down.load(Ordering::Relaxed) {
                            return;
                        }
                    }
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
                }
            })
        };

        *self.output_thread.lock() = Some(output_thread);
        *self.input_thread.lock() = Some(input_thread);
        *self.dispatch_thread.lock() = Some(dispatch_thread);
    }
}

impl AudioDevice for Device {
    fn enqueue_playback(&self, buffer: Arc<[i16]>) -> Result<(), DeviceError> {
        if self.shared.shut_down.load(Ordering::Relaxed) {
            return Err(DeviceError::ShutDown);
        }

        // The delay applies to the start of a playback session, not to the
        // refills that follow it.
        let starting = self.shared.playback.lock().queue.is_empty();
        if starting && !self.playback_delay.is_zero() {
            spin_sleep::sleep(self.playback_delay);
        }

        let mut playback = self.shared.playback.lock();
        if playback.queue.len() >= QUEUE_DEPTH {
            return Err(DeviceError::QueueFull);
        }
        playback.queue.push_back(buffer);
        Ok(())
    }

    fn enqueue_capture(&self, frames: usize) -> Result<(), DeviceError> {
        if self.shared.shut_down.load(Ordering::Relaxed) {
            return Err(DeviceError::ShutDown);
        }

        let mut capture = self.shared.capture.lock();
        if capture.is_some() {
            return Err(DeviceError::QueueFull);
        }
        *capture = Some(PendingCapture {
            samples: Vec::with_capacity(frames),
            frames,
        });
        Ok(())
    }

    fn register_playback_complete(&self, callback: PlaybackComplete) {
        *self.shared.playback_complete.lock() = Some(callback);
    }

    fn register_capture_complete(&self, callback: CaptureComplete) {
        *self.shared.capture_complete.lock() = Some(callback);
    }

    fn set_recording(&self, recording: bool) -> Result<(), DeviceError> {
        if self.shared.shut_down.load(Ordering::Relaxed) {
            return Err(DeviceError::ShutDown);
        }
        self.shared.recording.store(recording, Ordering::Relaxed);
        Ok(())
    }

    fn clear_capture(&self) {
        *self.shared.capture.lock() = None;
    }

    fn set_volume(&self, millibels: i32) {
        let gain = 10f32.powf(millibels as f32 / 2_000.0);
        self.shared.gain_bits.store(gain.to_bits(), Ordering::Relaxed);
    }

    fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.recording.store(false, Ordering::Relaxed);

        {
            let mut playback = self.shared.playback.lock();
            playback.queue.clear();
            playback.pos = 0;
        }
        *self.shared.capture.lock() = None;

        for handle in [
            self.output_thread.lock().take(),
            self.input_thread.lock().take(),
            self.dispatch_thread.lock().take(),
        ]
        .into_iter()
        .flatten()
        {
            let _ = handle.join();
        }
        info!(device = self.name, "Device shut down.");
    }

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<super::mock::Device>, Box<dyn Error>> {
        Err("not a mock".into())
    }
}
