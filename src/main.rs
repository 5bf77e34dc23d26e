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
mod audio;
mod clips;
mod config;
mod controller;
mod engine;
mod resample;
#[cfg(test)]
mod test;

use clap::{crate_version, Parser, Subcommand};
use clips::{ClipId, CAPTURE_RATE, DEFAULT_CAPTURE_FRAMES};
use config::audio::Audio;
use config::init_engine_and_controller;
use engine::Engine;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const SYSTEMD_SERVICE: &str = r#"
[Unit]
Description=buffer queue audio engine

[Service]
Type=simple
Restart=on-failure
EnvironmentFile=-/etc/default/clipdeck
ExecStart=/usr/local/bin/clipdeck start "$CLIPDECK_CONFIG"
ExecReload=/bin/kill -HUP $MAINPID

[Install]
WantedBy=multi-user.target
Alias=clipdeck.service
"#;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A buffer queue audio engine."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Plays a clip through the audio interface.
    Play {
        /// The device name to play through.
        device_name: String,
        /// The name of the clip to play (hello, android, sawtooth).
        clip: String,
        /// The number of times to play the clip.
        #[arg(short, long, default_value_t = 1)]
        count: i32,
        /// The output sample rate. When set, clips are up-sampled to it where
        /// possible; when unset, playback stays on the native 8 kHz path.
        #[arg(short, long)]
        sample_rate: Option<u32>,
    },
    /// Records a fixed-length clip from the audio interface.
    Record {
        /// The device name to record from.
        device_name: String,
        /// Write the recorded clip to the given WAV file.
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Play the recorded clip back after recording.
        #[arg(short, long)]
        play_back: bool,
    },
    /// Start will start the engine and its interactive controller.
    Start {
        /// The path to the engine config.
        config_path: String,
    },
    /// Prints a systemd service definition to stdout.
    Systemd {},
}

/// Polls until the engine has no active session.
fn wait_for_idle(engine: &Engine) {
    while !engine.is_idle() {
        thread::sleep(Duration::from_millis(10));
    }
}

/// Writes mono 16-bit samples to a WAV file at the capture rate.
fn write_wav(path: &Path, samples: &[i16]) -> Result<(), Box<dyn Error>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: CAPTURE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    for sample in samples {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Play {
            device_name,
            clip,
            count,
            sample_rate,
        } => {
            let clip = ClipId::from_str(&clip)?;
            let device = audio::get_device(Some(Audio::new(&device_name, sample_rate)))?;
            let engine = Arc::new(Engine::new(
                device,
                sample_rate.unwrap_or(0),
                DEFAULT_CAPTURE_FRAMES,
            ));

            if !engine.select_clip(clip, count) {
                return Err(format!("unable to play clip {}", clip).into());
            }
            wait_for_idle(&engine);
            engine.shutdown();
        }
        Commands::Record {
            device_name,
            out,
            play_back,
        } => {
            let device = audio::get_device(Some(Audio::new(&device_name, None)))?;
            let engine = Arc::new(Engine::new(device, 0, DEFAULT_CAPTURE_FRAMES));

            engine.start_capture();
            if engine.is_idle() {
                return Err("unable to start recording".into());
            }
            println!("Recording...");
            wait_for_idle(&engine);

            if let Some(out) = out {
                write_wav(&out, &engine.captured())?;
                println!("Wrote {}.", out.display());
            }

            if play_back {
                println!("Playing back...");
                if !engine.select_clip(ClipId::Captured, 1) {
                    return Err("unable to play back the recording".into());
                }
                wait_for_idle(&engine);
            }
            engine.shutdown();
        }
        Commands::Start { config_path } => {
            init_engine_and_controller(&PathBuf::from(config_path))?
                .join()
                .await?;
        }
        Commands::Systemd {} => {
            println!("{}", SYSTEMD_SERVICE)
        }
    }

    Ok(())
}

#[cfg(test)]
mod main_test {
    use super::write_wav;

    #[test]
    fn test_write_wav_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("capture.wav");
        let samples: Vec<i16> = vec![0, 100, -100, 32_767, -32_768];

        write_wav(&path, &samples)?;

        let mut reader = hound::WavReader::open(&path)?;
        assert_eq!(1, reader.spec().channels);
        assert_eq!(super::CAPTURE_RATE, reader.spec().sample_rate);
        let read: Vec<i16> = reader.samples::<i16>().collect::<Result<_, _>>()?;
        assert_eq!(samples, read);
        Ok(())
    }
}
