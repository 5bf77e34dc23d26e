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
use std::{fmt, str::FromStr, sync::Arc};

use crate::resample;

/// The native rate of the fixed clips: 8 kHz mono, 16-bit signed.
pub const NATIVE_RATE: u32 = 8_000;

/// The capture rate: 16 kHz mono, 16-bit signed.
pub const CAPTURE_RATE: u32 = 16_000;

/// Five seconds of audio at the capture rate.
pub const DEFAULT_CAPTURE_FRAMES: usize = CAPTURE_RATE as usize * 5;

const SAWTOOTH_FRAMES: usize = 8_000;
const SAWTOOTH_PERIOD: i32 = 100;
const SAWTOOTH_STEP: i32 = 660;

// Pre-recorded clips, 8 kHz mono 16-bit signed little endian.
static HELLO_PCM: &[u8] = include_bytes!("../assets/hello.pcm");
static ANDROID_PCM: &[u8] = include_bytes!("../assets/android.pcm");

/// Identifies one of the playable clips.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClipId {
    /// No clip. Selecting this leaves the engine idle.
    None,
    /// The embedded "hello" clip.
    Hello,
    /// The embedded greeting clip.
    AndroidGreeting,
    /// The synthesized sawtooth clip.
    Sawtooth,
    /// The most recently captured audio.
    Captured,
}

impl FromStr for ClipId {
    type Err = String;

    fn from_str(s: &str) -> Result<ClipId, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(ClipId::None),
            "hello" => Ok(ClipId::Hello),
            "android" => Ok(ClipId::AndroidGreeting),
            "sawtooth" => Ok(ClipId::Sawtooth),
            "captured" => Ok(ClipId::Captured),
            other => Err(format!("unknown clip {}", other)),
        }
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClipId::None => write!(f, "none"),
            ClipId::Hello => write!(f, "hello"),
            ClipId::AndroidGreeting => write!(f, "android"),
            ClipId::Sawtooth => write!(f, "sawtooth"),
            ClipId::Captured => write!(f, "captured"),
        }
    }
}

/// Owns the immutable, process-lifetime clips. The captured clip lives in a
/// separate [CaptureBuffer] since it is rewritten by every recording session.
pub struct ClipStore {
    hello: Arc<[i16]>,
    android_greeting: Arc<[i16]>,
    sawtooth: Arc<[i16]>,
}

impl ClipStore {
    pub fn new() -> ClipStore {
        ClipStore {
            hello: decode_pcm(HELLO_PCM),
            android_greeting: decode_pcm(ANDROID_PCM),
            sawtooth: synthesize_sawtooth(),
        }
    }

    /// Returns the fixed clip for the given id, or None for clips that are
    /// not process-lifetime (none/captured).
    pub fn fixed(&self, clip: ClipId) -> Option<&Arc<[i16]>> {
        match clip {
            ClipId::Hello => Some(&self.hello),
            ClipId::AndroidGreeting => Some(&self.android_greeting),
            ClipId::Sawtooth => Some(&self.sawtooth),
            ClipId::None | ClipId::Captured => None,
        }
    }
}

/// Decodes raw little-endian 16-bit PCM into samples.
fn decode_pcm(bytes: &[u8]) -> Arc<[i16]> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Synthesizes the mono sawtooth clip: a descending ramp with a period of 100
/// samples spanning the full 16-bit range. The arithmetic is done in i32 and
/// truncated so the first sample of each period wraps to -32768, exactly as
/// the clip has always sounded.
fn synthesize_sawtooth() -> Arc<[i16]> {
    (0..SAWTOOTH_FRAMES)
        .map(|i| (32768 - (i as i32 % SAWTOOTH_PERIOD) * SAWTOOTH_STEP) as i16)
        .collect()
}

/// The fixed-capacity capture buffer. The valid length is tracked separately
/// from the capacity: it is zero while a recording session is in flight and
/// finalized to the full capacity when the capture completes.
pub struct CaptureBuffer {
    samples: Vec<i16>,
    valid: usize,
    capacity: usize,
}

impl CaptureBuffer {
    pub fn new(capacity: usize) -> CaptureBuffer {
        CaptureBuffer {
            samples: vec![0; capacity],
            valid: 0,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn valid(&self) -> usize {
        self.valid
    }

    /// The recorded region of the buffer.
    pub fn valid_samples(&self) -> &[i16] {
        &self.samples[..self.valid]
    }

    /// Marks the buffer as empty at the start of a recording session.
    pub fn reset(&mut self) {
        self.valid = 0;
    }

    /// Stores a completed capture. The valid length is finalized to the full
    /// capacity; a short delivery is padded with silence to keep the
    /// fixed-duration invariant.
    pub fn fill(&mut self, mut samples: Vec<i16>) {
        samples.resize(self.capacity, 0);
        self.samples = samples;
        self.valid = self.capacity;
    }

    /// Applies the primitive 2:1 down-sample to the recorded region, halving
    /// the valid length in place. Each call halves the recording again.
    pub fn decimate(&mut self) {
        self.valid = resample::decimate_in_place(&mut self.samples, self.valid);
    }
}
