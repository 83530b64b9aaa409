//! Detection of new-turn markers in generated bytes.

use crate::chat::STOP_SEQUENCES;

/// Byte used for token ids that do not map to a single byte. It never
/// appears in UTF-8 text, so it cannot complete a marker.
const NON_BYTE: u8 = 0xff;

pub fn token_byte(id: u32) -> u8 {
    u8::try_from(id).unwrap_or(NON_BYTE)
}

/// Earliest offset at which any stop sequence starts.
pub fn find_stop(generated: &[u8]) -> Option<usize> {
    STOP_SEQUENCES
        .iter()
        .filter_map(|marker| {
            generated
                .windows(marker.len())
                .position(|window| window == *marker)
        })
        .min()
}

/// Length of the longest suffix of `generated` that is a proper prefix of a
/// stop sequence. Those trailing bytes may still turn into a marker.
pub fn open_prefix_len(generated: &[u8]) -> usize {
    STOP_SEQUENCES
        .iter()
        .map(|marker| {
            let longest = (marker.len() - 1).min(generated.len());
            (1..=longest)
                .rev()
                .find(|&n| generated.ends_with(&marker[..n]))
                .unwrap_or(0)
        })
        .max()
        .unwrap_or(0)
}
