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
use std::{error::Error, time::Duration};

use duration_string::DurationString;
use serde::Deserialize;

use crate::clips::{CAPTURE_RATE, DEFAULT_CAPTURE_FRAMES, NATIVE_RATE};

const DEFAULT_AUDIO_PLAYBACK_DELAY: Duration = Duration::ZERO;

/// A YAML representation of the audio configuration.
#[derive(Deserialize, Clone)]
pub struct Audio {
    /// The audio device.
    device: String,

    /// Controls how long to wait before playback of a buffer starts.
    playback_delay: Option<String>,

    /// Output sample rate in Hz. When set, clips whose rate divides evenly
    /// into it are up-sampled before playback; when unset, playback stays on
    /// the native 8 kHz path.
    sample_rate: Option<u32>,

    /// Stream buffer size in frames. When unset, the backend default is used.
    buffer_size: Option<u32>,

    /// How long a recording session captures for (default: 5s).
    capture_length: Option<String>,
}

impl Audio {
    /// New will create a new Audio configuration.
    pub fn new(device: &str, sample_rate: Option<u32>) -> Audio {
        Audio {
            device: device.to_string(),
            playback_delay: None,
            sample_rate,
            buffer_size: None,
            capture_length: None,
        }
    }

    /// Returns the device from the configuration.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Returns the playback delay from the configuration.
    pub fn playback_delay(&self) -> Result<Duration, Box<dyn Error>> {
        match &self.playback_delay {
            Some(playback_delay) => Ok(DurationString::from_string(playback_delay.clone())?.into()),
            None => Ok(DEFAULT_AUDIO_PLAYBACK_DELAY),
        }
    }

    /// Returns the output rate used for rate-matching decisions. Zero means
    /// rate matching is disabled.
    pub fn output_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(0)
    }

    /// Returns the rate the output stream is opened at: the configured rate,
    /// or the native clip rate when none is configured.
    pub fn stream_rate(&self) -> u32 {
        match self.sample_rate {
            Some(rate) if rate > 0 => rate,
            _ => NATIVE_RATE,
        }
    }

    /// Returns the stream buffer size in frames, if configured.
    pub fn buffer_size(&self) -> Option<u32> {
        self.buffer_size
    }

    /// Returns the capture length in frames at the capture rate.
    pub fn capture_frames(&self) -> Result<usize, Box<dyn Error>> {
        match &self.capture_length {
            Some(capture_length) => {
                let duration: Duration =
                    DurationString::from_string(capture_length.clone())?.into();
                let frames = (duration.as_secs_f64() * CAPTURE_RATE as f64) as usize;
                if frames == 0 {
                    return Err("capture_length must be at least one frame".into());
                }
                Ok(frames)
            }
            None => Ok(DEFAULT_CAPTURE_FRAMES),
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let audio = Audio::new("mock-device", None);

        assert_eq!("mock-device", audio.device());
        assert_eq!(Duration::ZERO, audio.playback_delay()?);
        assert_eq!(0, audio.output_rate());
        assert_eq!(NATIVE_RATE, audio.stream_rate());
        assert_eq!(None, audio.buffer_size());
        assert_eq!(DEFAULT_CAPTURE_FRAMES, audio.capture_frames()?);
        Ok(())
    }

    #[test]
    fn test_parsed_configuration() -> Result<(), Box<dyn std::error::Error>> {
        let audio: Audio = serde_yml::from_str(
            r"
            device: UltraLite-mk5
            playback_delay: 250ms
            sample_rate: 48000
            buffer_size: 256
            capture_length: 2s
            ",
        )?;

        assert_eq!("UltraLite-mk5", audio.device());
        assert_eq!(Duration::from_millis(250), audio.playback_delay()?);
        assert_eq!(48_000, audio.output_rate());
        assert_eq!(48_000, audio.stream_rate());
        assert_eq!(Some(256), audio.buffer_size());
        assert_eq!(2 * CAPTURE_RATE as usize, audio.capture_frames()?);
        Ok(())
    }

    #[test]
    fn test_invalid_durations_are_errors() -> Result<(), Box<dyn std::error::Error>> {
        let audio: Audio = serde_yml::from_str(
            r"
            device: mock-device
            playback_delay: wibble
            capture_length: 0s
            ",
        )?;

        assert!(audio.playback_delay().is_err());
        assert!(audio.capture_frames().is_err());
        Ok(())
    }
}
