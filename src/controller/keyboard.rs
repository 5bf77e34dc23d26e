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
use std::io;
use std::str::FromStr;

use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{info, span, warn, Level};

use crate::clips::ClipId;

use super::Event;

const PLAY: &str = "play";
const RECORD: &str = "record";
const VOLUME: &str = "volume";

/// A controller that controls an engine using the keyboard.
pub struct Driver {}

impl Driver {
    pub fn new() -> Driver {
        Driver {}
    }

    fn monitor_io<R, W>(
        events_tx: &Sender<Event>,
        mut reader: R,
        mut writer: W,
    ) -> Result<(), io::Error>
    where
        R: io::BufRead,
        W: io::Write,
    {
        write!(
            writer,
            "Command ({} <clip> [count], {}, {} <millibels>): ",
            PLAY, RECORD, VOLUME,
        )?;
        writer.flush()?;
        let mut input: String = String::default();
        reader.read_line(&mut input)?;

        match parse_command(&input) {
            Some(event) => events_tx
                .blocking_send(event)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?,
            None => {
                warn!(input = input, "Unrecognized input");
            }
        }
        Ok(())
    }
}

/// Parses a command line into an event. Returns None for anything
/// unrecognized, including a play count that isn't a number.
fn parse_command(input: &str) -> Option<Event> {
    let mut words = input.split_whitespace();

    match words.next()?.to_lowercase().as_str() {
        PLAY => {
            let clip = ClipId::from_str(words.next()?).ok()?;
            let count = match words.next() {
                Some(count) => count.parse::<i32>().ok()?,
                None => 1,
            };
            Some(Event::Play(clip, count))
        }
        RECORD => Some(Event::Record),
        VOLUME => {
            let millibels = words.next()?.parse::<i32>().ok()?;
            Some(Event::Volume(millibels))
        }
        _ => None,
    }
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "keyboard driver");
            let _enter = span.enter();

            info!("Keyboard driver started.");

            loop {
                Self::monitor_io(&events_tx, io::stdin().lock(), io::stdout())?;
            }
        })
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, BufReader, BufWriter};

    use tokio::sync::mpsc;

    use crate::{clips::ClipId, controller::Event};

    use super::Driver;

    fn get_event(input: &str) -> Result<Option<Event>, io::Error> {
        let (sender, mut receiver) = mpsc::channel::<Event>(1);

        let reader_bytes = input.as_bytes();
        let reader = BufReader::new(reader_bytes);

        let writer_bytes: Vec<u8> = vec![0; 255];
        let writer = BufWriter::new(writer_bytes);
        Driver::monitor_io(&sender, reader, writer)?;

        // Force the sender to close.
        drop(sender);
        Ok(receiver.blocking_recv())
    }

    #[test]
    fn test_keyboard_events() -> Result<(), io::Error> {
        assert_eq!(
            Event::Play(ClipId::Hello, 1),
            get_event("play hello")?.unwrap()
        );
        assert_eq!(
            Event::Play(ClipId::Sawtooth, 3),
            get_event("play sawtooth 3")?.unwrap()
        );
        assert_eq!(
            Event::Play(ClipId::Captured, 1),
            get_event("PLAY captured")?.unwrap()
        );
        assert_eq!(Event::Record, get_event("record")?.unwrap());
        assert_eq!(Event::Volume(-600), get_event("volume -600")?.unwrap());

        assert_eq!(None, get_event("unrecognized")?);
        assert_eq!(None, get_event("play")?);
        assert_eq!(None, get_event("play wibble")?);
        assert_eq!(None, get_event("play hello lots")?);
        assert_eq!(None, get_event("volume loud")?);
        Ok(())
    }
}
