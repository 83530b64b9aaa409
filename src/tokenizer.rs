//! Byte-level codec: every token id is one byte of UTF-8 text.

pub const VOCAB_SIZE: usize = 256;

pub fn encode(text: &str) -> Vec<u32> {
    text.bytes().map(u32::from).collect()
}

/// Ids outside the byte range are skipped.
pub fn to_bytes(ids: &[u32]) -> Vec<u8> {
    ids.iter().filter_map(|&id| u8::try_from(id).ok()).collect()
}

pub fn decode(ids: &[u32]) -> String {
    String::from_utf8_lossy(&to_bytes(ids)).into_owned()
}

pub fn decode_one(id: u32) -> String {
    decode(&[id])
}

/// Printable ASCII passes through, everything else renders as `\xNN`.
pub fn token_display(id: u32) -> String {
    match u8::try_from(id) {
        Ok(byte @ 32..=126) => char::from(byte).to_string(),
        Ok(byte) => format!("\\x{byte:02x}"),
        Err(_) => format!("<{id}>"),
    }
}
