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
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};

use parking_lot::Mutex;
use tracing::{debug, info, span, warn, Level};

use crate::{
    audio,
    clips::{CaptureBuffer, ClipId, ClipStore, CAPTURE_RATE, NATIVE_RATE},
    resample,
};

pub mod lock;

pub use lock::EngineLock;

/// The buffer-queue engine: drives a single playback output and a single
/// capture input through the device's buffer-queue protocol, with playback
/// and recording sessions serialized by one non-blocking lock.
///
/// The engine owns all session state; the device invokes the completion
/// callbacks registered at construction on its own threads, and those
/// callbacks only touch state behind the engine's locks.
pub struct Engine {
    device: Arc<dyn audio::Device>,
    shared: Arc<Shared>,
}

struct Shared {
    /// Serializes playback-start and record-start. Held from session start
    /// until the session's completion callback fires.
    lock: EngineLock,
    playback: Mutex<Playback>,
    capture: Mutex<CaptureBuffer>,
    clips: ClipStore,
    /// The configured output rate: 0 means rate matching is disabled and
    /// playback happens on the native 8 kHz path.
    output_rate: u32,
    capture_frames: usize,
    shut_down: AtomicBool,
}

struct Playback {
    /// The buffer being played, re-enqueued by the completion callback while
    /// repeats remain. At most one resampled buffer is live at a time; it is
    /// dropped when this slot clears.
    active: Option<Arc<[i16]>>,
    /// Remaining repeats. Decremented once per completed buffer; may go
    /// negative when completions race a cleared slot.
    remaining: i32,
}

impl Engine {
    /// Creates a new engine on the given device and registers the completion
    /// callbacks. The output rate and capture length are fixed for the life
    /// of the engine.
    pub fn new(device: Arc<dyn audio::Device>, output_rate: u32, capture_frames: usize) -> Engine {
        let shared = Arc::new(Shared {
            lock: EngineLock::new(),
            playback: Mutex::new(Playback {
                active: None,
                remaining: 0,
            }),
            capture: Mutex::new(CaptureBuffer::new(capture_frames)),
            clips: ClipStore::new(),
            output_rate,
            capture_frames,
            shut_down: AtomicBool::new(false),
        });

        // The callbacks hold the device weakly: the engine keeps the strong
        // reference, and a callback arriving during teardown becomes a no-op.
        {
            let shared = Arc::clone(&shared);
            let device_weak: Weak<dyn audio::Device> = Arc::downgrade(&device);
            device.register_playback_complete(Box::new(move || {
                if let Some(device) = device_weak.upgrade() {
                    on_playback_complete(&shared, device.as_ref());
                }
            }));
        }
        {
            let shared = Arc::clone(&shared);
            let device_weak: Weak<dyn audio::Device> = Arc::downgrade(&device);
            device.register_capture_complete(Box::new(move |samples| {
                if let Some(device) = device_weak.upgrade() {
                    on_capture_complete(&shared, device.as_ref(), samples);
                }
            }));
        }

        Engine { device, shared }
    }

    /// Selects a clip and starts playing it the given number of times.
    /// Returns false if the engine is busy with another session or the device
    /// rejected the buffer; the caller is expected to retry later.
    pub fn select_clip(&self, clip: ClipId, count: i32) -> bool {
        let span = span!(Level::INFO, "select clip");
        let _enter = span.enter();

        if self.shared.shut_down.load(Ordering::Relaxed) {
            warn!(clip = %clip, "Engine is shut down, rejecting clip selection.");
            return false;
        }

        let guard = match self.shared.lock.try_session() {
            Some(guard) => guard,
            None => {
                debug!(clip = %clip, "Engine busy, rejecting clip selection.");
                return false;
            }
        };

        let resolved = self.resolve(clip);

        let mut playback = self.shared.playback.lock();
        playback.remaining = count;

        let buffer = match resolved {
            Some(buffer) if !buffer.is_empty() => buffer,
            _ => {
                // Nothing to play: no session starts and the guard releases
                // the lock on the way out.
                playback.active = None;
                return true;
            }
        };

        playback.active = Some(Arc::clone(&buffer));
        match self.device.enqueue_playback(buffer) {
            Ok(()) => {
                let samples = playback.active.as_ref().map(|b| b.len()).unwrap_or(0);
                info!(clip = %clip, count, samples, "Playback started.");
                guard.commit();
                true
            }
            Err(e) => {
                warn!(clip = %clip, err = %e, "Device rejected playback buffer.");
                playback.active = None;
                playback.remaining = 0;
                false
            }
        }
    }

    /// Resolves a clip id to the buffer to enqueue, up-sampling to the
    /// configured output rate when possible and falling back to the clip's
    /// native buffer when not.
    fn resolve(&self, clip: ClipId) -> Option<Arc<[i16]>> {
        if let Some(samples) = self.shared.clips.fixed(clip) {
            return Some(
                match resample::upsample(samples, NATIVE_RATE, self.shared.output_rate) {
                    Some(upsampled) => upsampled.into(),
                    None => Arc::clone(samples),
                },
            );
        }

        match clip {
            ClipId::Captured => {
                let mut capture = self.shared.capture.lock();
                match resample::upsample(
                    capture.valid_samples(),
                    CAPTURE_RATE,
                    self.shared.output_rate,
                ) {
                    Some(upsampled) => Some(upsampled.into()),
                    None => {
                        // We record at 16 kHz but the native playback path runs
                        // at 8 kHz, so apply the primitive down-sample. This
                        // halves the stored recording in place each time.
                        capture.decimate();
                        Some(capture.valid_samples().into())
                    }
                }
            }
            _ => None,
        }
    }

    /// Starts a one-shot, fixed-duration recording session. Silently no-ops
    /// when the engine is busy; the recording finishes when the capture
    /// buffer fills and the capture completion callback fires.
    pub fn start_capture(&self) {
        let span = span!(Level::INFO, "start capture");
        let _enter = span.enter();

        if self.shared.shut_down.load(Ordering::Relaxed) {
            warn!("Engine is shut down, ignoring capture request.");
            return;
        }

        let guard = match self.shared.lock.try_session() {
            Some(guard) => guard,
            None => {
                debug!("Engine busy, ignoring capture request.");
                return;
            }
        };

        // In case a capture was already in flight, stop it and drop any
        // device-side buffers before arming a fresh one.
        if let Err(e) = self.device.set_recording(false) {
            warn!(err = %e, "Unable to stop the capture device.");
            return;
        }
        self.device.clear_capture();

        // The buffer is not valid for playback until the capture completes.
        self.shared.capture.lock().reset();

        if let Err(e) = self.device.enqueue_capture(self.shared.capture_frames) {
            warn!(err = %e, "Device rejected the capture buffer.");
            return;
        }
        if let Err(e) = self.device.set_recording(true) {
            warn!(err = %e, "Unable to start the capture device.");
            return;
        }

        info!(frames = self.shared.capture_frames, "Recording started.");
        guard.commit();
    }

    /// Sets the playback volume in millibels.
    pub fn set_volume(&self, millibels: i32) {
        self.device.set_volume(millibels);
    }

    /// True when no playback or recording session holds the engine.
    pub fn is_idle(&self) -> bool {
        !self.shared.lock.is_held()
    }

    /// A snapshot of the valid captured samples.
    pub fn captured(&self) -> Vec<i16> {
        self.shared.capture.lock().valid_samples().to_vec()
    }

    /// Shuts the engine down, stopping the device and releasing every held
    /// resource. Idempotent; any in-flight session is abandoned.
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.device.shutdown();

        let mut playback = self.shared.playback.lock();
        playback.active = None;
        playback.remaining = 0;
        drop(playback);

        self.shared.lock.force_release();
        info!("Engine shut down.");
    }
}

/// Invoked by the device once per consumed playback buffer: decrements the
/// repeat counter and either re-submits the same buffer or ends the session,
/// dropping any resampled buffer and releasing the engine lock.
fn on_playback_complete(shared: &Shared, device: &dyn audio::Device) {
    let mut playback = shared.playback.lock();
    playback.remaining -= 1;

    if playback.remaining > 0 {
        if let Some(buffer) = playback.active.clone() {
            if !buffer.is_empty() {
                match device.enqueue_playback(buffer) {
                    Ok(()) => return,
                    Err(e) => {
                        warn!(err = %e, "Device rejected the refill buffer.");
                    }
                }
            }
        }
    }

    // End of the session: clear the active slot (releasing any resampled
    // buffer) and free the engine for the next request.
    playback.active = None;
    drop(playback);
    shared.lock.release();
}

/// Invoked by the device when the one-shot capture buffer has filled. There
/// is deliberately no re-enqueue here: capture is fixed-duration, not
/// streaming.
fn on_capture_complete(shared: &Shared, device: &dyn audio::Device, samples: Vec<i16>) {
    match device.set_recording(false) {
        Ok(()) => {
            let mut capture = shared.capture.lock();
            capture.fill(samples);
            info!(frames = capture.valid(), "Capture complete.");
        }
        Err(e) => {
            // Leave the valid length untouched if the device would not stop.
            warn!(err = %e, "Unable to stop the capture device.");
        }
    }
    shared.lock.release();
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, thread};

    use crate::{
        audio::{self, mock},
        clips::{ClipId, ClipStore, DEFAULT_CAPTURE_FRAMES},
        test::test::eventually,
    };

    use super::Engine;

    fn mock_engine(output_rate: u32) -> (Engine, Arc<mock::Device>) {
        let device = Arc::new(mock::Device::get("mock"));
        let engine = Engine::new(
            Arc::clone(&device) as Arc<dyn audio::Device>,
            output_rate,
            DEFAULT_CAPTURE_FRAMES,
        );
        (engine, device)
    }

    #[test]
    fn test_sawtooth_three_repeats_native_rate() {
        let (engine, device) = mock_engine(0);

        assert!(engine.select_clip(ClipId::Sawtooth, 3));
        assert!(!engine.is_idle());
        assert_eq!(1, device.playback_enqueues());
        assert_eq!(8_000, device.queued_front().unwrap().len());

        // First and second completions re-enqueue the same buffer.
        assert!(device.complete_playback());
        assert_eq!(2, device.playback_enqueues());
        assert!(device.complete_playback());
        assert_eq!(3, device.playback_enqueues());
        assert!(!engine.is_idle());

        // The third completion ends the session and frees the lock.
        assert!(device.complete_playback());
        assert_eq!(3, device.playback_enqueues());
        assert!(engine.is_idle());
    }

    #[test]
    fn test_hello_upsampled_on_fast_path() {
        let (engine, device) = mock_engine(16_000);
        let hello_len = ClipStore::new().fixed(ClipId::Hello).unwrap().len();

        assert!(engine.select_clip(ClipId::Hello, 1));
        assert_eq!(1, device.playback_enqueues());
        assert_eq!(2 * hello_len, device.queued_front().unwrap().len());

        assert!(device.complete_playback());
        assert!(engine.is_idle());
    }

    #[test]
    fn test_non_multiple_rate_falls_back_to_native() {
        let (engine, device) = mock_engine(44_100);
        let hello_len = ClipStore::new().fixed(ClipId::Hello).unwrap().len();

        assert!(engine.select_clip(ClipId::Hello, 1));
        assert_eq!(hello_len, device.queued_front().unwrap().len());

        device.complete_playback();
        assert!(engine.is_idle());
    }

    #[test]
    fn test_second_selection_rejected_while_playing() {
        let (engine, device) = mock_engine(0);

        assert!(engine.select_clip(ClipId::Sawtooth, 2));
        assert!(!engine.select_clip(ClipId::Hello, 1));

        // The first session's buffer is untouched by the rejection.
        assert_eq!(1, device.playback_enqueues());
        assert_eq!(8_000, device.queued_front().unwrap().len());

        device.complete_playback();
        device.complete_playback();
        assert!(engine.is_idle());
        assert!(engine.select_clip(ClipId::Hello, 1));
    }

    #[test]
    fn test_device_rejection_releases_lock() {
        let (engine, device) = mock_engine(0);

        device.reject_next_playback();
        assert!(!engine.select_clip(ClipId::Sawtooth, 1));
        assert!(engine.is_idle());
        assert_eq!(0, device.playback_enqueues());

        // The engine self-heals: the next request goes through.
        assert!(engine.select_clip(ClipId::Sawtooth, 1));
        assert_eq!(1, device.playback_enqueues());
    }

    #[test]
    fn test_refill_rejection_releases_lock() {
        let (engine, device) = mock_engine(0);

        assert!(engine.select_clip(ClipId::Sawtooth, 3));
        device.reject_next_playback();
        assert!(device.complete_playback());

        // The failed re-enqueue ends the session rather than leaking the lock.
        assert!(engine.is_idle());
        assert_eq!(1, device.playback_enqueues());
    }

    #[test]
    fn test_select_none_leaves_engine_idle() {
        let (engine, device) = mock_engine(0);

        assert!(engine.select_clip(ClipId::None, 5));
        assert!(engine.is_idle());
        assert_eq!(0, device.playback_enqueues());
        assert!(engine.select_clip(ClipId::Sawtooth, 1));
    }

    #[test]
    fn test_capture_session() {
        let (engine, device) = mock_engine(0);

        engine.start_capture();
        assert!(!engine.is_idle());
        assert!(device.is_recording());
        assert_eq!(1, device.capture_enqueues());
        assert!(engine.captured().is_empty());

        // A second capture request while one is active is ignored.
        engine.start_capture();
        assert_eq!(1, device.capture_enqueues());

        assert!(device.finish_capture(7));
        assert!(!device.is_recording());
        assert!(engine.is_idle());
        assert_eq!(DEFAULT_CAPTURE_FRAMES, engine.captured().len());
        assert!(engine.captured().iter().all(|&s| s == 7));
    }

    #[test]
    fn test_capture_rejected_while_playing() {
        let (engine, device) = mock_engine(0);

        assert!(engine.select_clip(ClipId::Sawtooth, 1));
        engine.start_capture();
        assert_eq!(0, device.capture_enqueues());
        assert!(!device.is_recording());

        device.complete_playback();
        assert!(engine.is_idle());
    }

    #[test]
    fn test_capture_enqueue_failure_releases_lock() {
        let (engine, device) = mock_engine(0);

        device.reject_next_capture();
        engine.start_capture();
        assert!(engine.is_idle());
        assert!(!device.is_recording());

        engine.start_capture();
        assert_eq!(1, device.capture_enqueues());
    }

    #[test]
    fn test_captured_playback_decimates_on_native_path() {
        let (engine, device) = mock_engine(0);

        engine.start_capture();
        device.finish_capture(3);
        assert_eq!(DEFAULT_CAPTURE_FRAMES, engine.captured().len());

        assert!(engine.select_clip(ClipId::Captured, 1));
        assert_eq!(DEFAULT_CAPTURE_FRAMES / 2, device.queued_front().unwrap().len());
        // The stored recording was halved in place.
        assert_eq!(DEFAULT_CAPTURE_FRAMES / 2, engine.captured().len());

        device.complete_playback();
        assert!(engine.is_idle());
    }

    #[test]
    fn test_captured_playback_upsampled_on_fast_path() {
        let (engine, device) = mock_engine(32_000);

        engine.start_capture();
        device.finish_capture(3);

        assert!(engine.select_clip(ClipId::Captured, 1));
        assert_eq!(
            2 * DEFAULT_CAPTURE_FRAMES,
            device.queued_front().unwrap().len()
        );
        // The fast path copies rather than mutating the recording.
        assert_eq!(DEFAULT_CAPTURE_FRAMES, engine.captured().len());
    }

    #[test]
    fn test_empty_capture_selection_is_a_no_op() {
        let (engine, device) = mock_engine(0);

        assert!(engine.select_clip(ClipId::Captured, 1));
        assert!(engine.is_idle());
        assert_eq!(0, device.playback_enqueues());
    }

    #[test]
    fn test_completions_from_device_thread() {
        let (engine, device) = mock_engine(0);

        assert!(engine.select_clip(ClipId::Sawtooth, 4));

        let join = {
            let device = Arc::clone(&device);
            thread::spawn(move || while device.complete_playback() {})
        };

        assert!(join.join().is_ok());
        eventually(|| engine.is_idle(), "Engine never returned to idle");
        assert_eq!(4, device.playback_enqueues());
    }

    #[test]
    fn test_shutdown_is_idempotent_and_final() {
        let (engine, device) = mock_engine(0);

        assert!(engine.select_clip(ClipId::Sawtooth, 2));
        engine.shutdown();
        engine.shutdown();

        assert!(engine.is_idle());
        assert_eq!(0, device.queued_playback());
        assert!(!engine.select_clip(ClipId::Sawtooth, 1));
        engine.start_capture();
        assert_eq!(0, device.capture_enqueues());
    }
}
