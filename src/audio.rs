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
use std::any::Any;
use std::{error::Error, fmt, sync::Arc};

use crate::config;

pub mod cpal;
pub mod mock;

/// The number of buffers the device-side playback queue will hold. An enqueue
/// beyond this depth is rejected, which the engine surfaces to the caller.
pub const QUEUE_DEPTH: usize = 2;

/// Errors reported by an audio device.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device buffer queue is full")]
    QueueFull,

    #[error("device has been shut down")]
    ShutDown,

    #[error("device stream error: {0}")]
    Stream(String),
}

/// Invoked by the device once per successfully consumed playback buffer.
/// Never invoked concurrently with itself.
pub type PlaybackComplete = Box<dyn Fn() + Send + Sync>;

/// Invoked by the device once when an enqueued capture buffer has filled,
/// delivering the captured samples.
pub type CaptureComplete = Box<dyn Fn(Vec<i16>) + Send + Sync>;

/// A buffer-queue audio device: the caller submits fixed buffers for playback
/// or capture and receives an asynchronous completion signal per buffer, on a
/// thread owned by the device.
pub trait Device: Any + fmt::Display + Send + Sync {
    /// Submits a mono 16-bit buffer for playback.
    fn enqueue_playback(&self, buffer: Arc<[i16]>) -> Result<(), DeviceError>;

    /// Submits one empty capture buffer of the given size in frames.
    fn enqueue_capture(&self, frames: usize) -> Result<(), DeviceError>;

    /// Registers the playback completion callback. Called once at setup.
    fn register_playback_complete(&self, callback: PlaybackComplete);

    /// Registers the capture completion callback. Called once at setup.
    fn register_capture_complete(&self, callback: CaptureComplete);

    /// Starts or stops the capture side of the device.
    fn set_recording(&self, recording: bool) -> Result<(), DeviceError>;

    /// Drops any pending device-side capture buffers.
    fn clear_capture(&self);

    /// Sets the playback volume in millibels (0 = unity gain).
    fn set_volume(&self, millibels: i32);

    /// Stops the device and releases its resources. Idempotent.
    fn shutdown(&self);

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<mock::Device>, Box<dyn Error>>;
}

/// Lists devices known to cpal.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, Box<dyn Error>> {
    cpal::Device::list()
}

/// Gets a device with the given name.
pub fn get_device(config: Option<config::audio::Audio>) -> Result<Arc<dyn Device>, Box<dyn Error>> {
    let config = match config {
        Some(config) => config,
        None => return Err("there must be an audio device specified".into()),
    };

    let device = config.device();
    if device.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(device)));
    };

    Ok(Arc::new(cpal::Device::get(config)?))
}
