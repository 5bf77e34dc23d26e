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
use std::error::Error;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::{controller, engine::Engine};

pub mod audio;

/// A YAML representation of the engine configuration.
#[derive(Deserialize, Clone)]
pub struct Config {
    /// The audio device configuration.
    pub audio: Option<audio::Audio>,
}

/// Parses the engine configuration from a YAML file.
pub fn parse_config(file: &Path) -> Result<Config, Box<dyn Error>> {
    let config: Config = serde_yml::from_str(&fs::read_to_string(file)?)?;
    Ok(config)
}

/// Initializes the engine and controller from the given config file and
/// returns the controller. The controller owns the engine, which can be
/// waited on until it exits. Realistically, the controller is not expected
/// to exit.
pub fn init_engine_and_controller(
    config_path: &Path,
) -> Result<controller::Controller, Box<dyn Error>> {
    let config = parse_config(config_path)?;

    let output_rate = config
        .audio
        .as_ref()
        .map(|audio| audio.output_rate())
        .unwrap_or(0);
    let capture_frames = config
        .audio
        .as_ref()
        .map(|audio| audio.capture_frames())
        .transpose()?
        .unwrap_or(crate::clips::DEFAULT_CAPTURE_FRAMES);

    let device = crate::audio::get_device(config.audio)?;
    let engine = Arc::new(Engine::new(device, output_rate, capture_frames));
    let controller =
        controller::Controller::new(engine, Arc::new(controller::keyboard::Driver::new()))?;
    Ok(controller)
}
