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
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use crate::audio::{CaptureComplete, DeviceError, PlaybackComplete, QUEUE_DEPTH};

/// A mock device. Doesn't actually play anything: tests drive the completion
/// callbacks by hand through [Device::complete_playback] and
/// [Device::finish_capture].
pub struct Device {
    name: String,
    state: Mutex<State>,
    playback_complete: Mutex<Option<PlaybackComplete>>,
    capture_complete: Mutex<Option<CaptureComplete>>,
    playback_enqueues: AtomicUsize,
    capture_enqueues: AtomicUsize,
    recording: AtomicBool,
    shut_down: AtomicBool,
}

struct State {
    playback_queue: VecDeque<Arc<[i16]>>,
    pending_capture: Option<usize>,
    reject_playback: bool,
    reject_capture: bool,
    volume_millibels: i32,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            state: Mutex::new(State {
                playback_queue: VecDeque::new(),
                pending_capture: None,
                reject_playback: false,
                reject_capture: false,
                volume_millibels: 0,
            }),
            playback_complete: Mutex::new(None),
            capture_complete: Mutex::new(None),
            playback_enqueues: AtomicUsize::new(0),
            capture_enqueues: AtomicUsize::new(0),
            recording: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Simulates the device consuming the oldest queued playback buffer and
    /// firing the completion callback. Returns false if the queue was empty.
    #[cfg(test)]
    pub fn complete_playback(&self) -> bool {
        // Pop before invoking the callback so a re-enqueue finds queue space,
        // and drop the state lock so the callback can touch the device.
        let popped = self.state.lock().playback_queue.pop_front();
        if popped.is_none() {
            return false;
        }

        if let Some(callback) = self.playback_complete.lock().as_ref() {
            callback();
        }
        true
    }

    /// Simulates the capture buffer filling with the given sample value and
    /// fires the capture completion callback. Returns false if no capture
    /// buffer was pending.
    #[cfg(test)]
    pub fn finish_capture(&self, fill: i16) -> bool {
        let frames = match self.state.lock().pending_capture.take() {
            Some(frames) => frames,
            None => return false,
        };

        if let Some(callback) = self.capture_complete.lock().as_ref() {
            callback(vec![fill; frames]);
        }
        true
    }

    /// Makes the next playback enqueue fail, mimicking a device that reports
    /// an insufficient buffer.
    #[cfg(test)]
    pub fn reject_next_playback(&self) {
        self.state.lock().reject_playback = true;
    }

    /// Makes the next capture enqueue fail.
    #[cfg(test)]
    pub fn reject_next_capture(&self) {
        self.state.lock().reject_capture = true;
    }

    /// Total number of accepted playback enqueues.
    #[cfg(test)]
    pub fn playback_enqueues(&self) -> usize {
        self.playback_enqueues.load(Ordering::Relaxed)
    }

    /// Total number of accepted capture enqueues.
    #[cfg(test)]
    pub fn capture_enqueues(&self) -> usize {
        self.capture_enqueues.load(Ordering::Relaxed)
    }

    /// The number of playback buffers currently queued on the device.
    #[cfg(test)]
    pub fn queued_playback(&self) -> usize {
        self.state.lock().playback_queue.len()
    }

    /// A copy of the oldest queued playback buffer, if any.
    #[cfg(test)]
    pub fn queued_front(&self) -> Option<Arc<[i16]>> {
        self.state.lock().playback_queue.front().cloned()
    }

    #[cfg(test)]
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub fn volume_millibels(&self) -> i32 {
        self.state.lock().volume_millibels
    }
}

impl crate::audio::Device for Device {
    fn enqueue_playback(&self, buffer: Arc<[i16]>) -> Result<(), DeviceError> {
        if self.shut_down.load(Ordering::Relaxed) {
            return Err(DeviceError::ShutDown);
        }

        let mut state = self.state.lock();
        if state.reject_playback {
            state.reject_playback = false;
            return Err(DeviceError::Stream("injected rejection".to_string()));
        }
        if state.playback_queue.len() >= QUEUE_DEPTH {
            return Err(DeviceError::QueueFull);
        }

        state.playback_queue.push_back(buffer);
        self.playback_enqueues.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn enqueue_capture(&self, frames: usize) -> Result<(), DeviceError> {
        if self.shut_down.load(Ordering::Relaxed) {
            return Err(DeviceError::ShutDown);
        }

        let mut state = self.state.lock();
        if state.reject_capture {
            state.reject_capture = false;
            return Err(DeviceError::Stream("injected rejection".to_string()));
        }
        if state.pending_capture.is_some() {
            return Err(DeviceError::QueueFull);
        }

        state.pending_capture = Some(frames);
        self.capture_enqueues.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn register_playback_complete(&self, callback: PlaybackComplete) {
        *self.playback_complete.lock() = Some(callback);
    }

    fn register_capture_complete(&self, callback: CaptureComplete) {
        *self.capture_complete.lock() = Some(callback);
    }

    fn set_recording(&self, recording: bool) -> Result<(), DeviceError> {
        if self.shut_down.load(Ordering::Relaxed) {
            return Err(DeviceError::ShutDown);
        }
        self.recording.store(recording, Ordering::Relaxed);
        Ok(())
    }

    fn clear_capture(&self) {
        self.state.lock().pending_capture = None;
    }

    fn set_volume(&self, millibels: i32) {
        self.state.lock().volume_millibels = millibels;
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Relaxed);
        self.recording.store(false, Ordering::Relaxed);
        let mut state = self.state.lock();
        state.playback_queue.clear();
        state.pending_capture = None;
    }

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<Device>, Box<dyn Error>> {
        Err("mock devices are handed out as Arc by the tests themselves".into())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::audio::Device as AudioDevice;

    use super::*;

    #[test]
    fn test_queue_depth_enforced() {
        let device = Device::get("mock");
        let buffer: Arc<[i16]> = vec![1i16, 2, 3].into();

        assert!(device.enqueue_playback(buffer.clone()).is_ok());
        assert!(device.enqueue_playback(buffer.clone()).is_ok());
        assert!(matches!(
            device.enqueue_playback(buffer),
            Err(DeviceError::QueueFull)
        ));
        assert_eq!(2, device.queued_playback());
    }

    #[test]
    fn test_complete_playback_fires_callback() {
        let device = Device::get("mock");
        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        {
            let fired = fired.clone();
            device.register_playback_complete(Box::new(move || {
                fired.fetch_add(1, Ordering::Relaxed);
            }));
        }

        assert!(!device.complete_playback());

        let buffer: Arc<[i16]> = vec![0i16; 4].into();
        device.enqueue_playback(buffer).unwrap();
        assert!(device.complete_playback());
        assert_eq!(1, fired.load(Ordering::Relaxed));
        assert_eq!(0, device.queued_playback());
    }

    #[test]
    fn test_finish_capture_delivers_samples() {
        let device = Device::get("mock");
        let delivered = Arc::new(Mutex::new(Vec::new()));
        {
            let delivered = delivered.clone();
            device.register_capture_complete(Box::new(move |samples| {
                *delivered.lock() = samples;
            }));
        }

        device.enqueue_capture(16).unwrap();
        assert!(device.finish_capture(7));
        assert_eq!(vec![7i16; 16], *delivered.lock());
        assert!(!device.finish_capture(7));
    }

    #[test]
    fn test_shutdown_rejects_further_work() {
        let device = Device::get("mock");
        device.shutdown();

        let buffer: Arc<[i16]> = vec![0i16; 4].into();
        assert!(matches!(
            device.enqueue_playback(buffer),
            Err(DeviceError::ShutDown)
        ));
        assert!(matches!(
            device.enqueue_capture(8),
            Err(DeviceError::ShutDown)
        ));
        assert!(device.set_recording(true).is_err());
    }
}
