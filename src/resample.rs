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

/// Up-samples a clip to the given output rate by nearest-neighbor repetition.
///
/// Only integer up-sampling is supported: returns None when no output rate is
/// configured (rate of 0, the native playback path) or when the output rate is
/// not an exact multiple of the source rate. The caller is expected to fall
/// back to the unmodified source buffer in that case.
pub fn upsample(src: &[i16], native_rate: u32, output_rate: u32) -> Option<Vec<i16>> {
    if output_rate == 0 {
        // Rate matching is disabled, playback happens at the clip's native rate.
        return None;
    }
    if native_rate == 0 || output_rate % native_rate != 0 {
        return None;
    }

    let factor = (output_rate / native_rate) as usize;
    let mut out = Vec::with_capacity(src.len() * factor);
    for &sample in src {
        for _ in 0..factor {
            out.push(sample);
        }
    }
    Some(out)
}

/// A primitive 2:1 down-sample: keeps every other sample and halves the valid
/// length. This deliberately does no low-pass filtering so that the output
/// stays bit-for-bit identical to the original capture-to-playback path.
///
/// Returns the new valid length.
pub fn decimate_in_place(samples: &mut [i16], valid: usize) -> usize {
    let new_valid = valid / 2;
    for i in 0..new_valid {
        samples[i] = samples[i * 2];
    }
    new_valid
}
