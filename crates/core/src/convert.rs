//! Bulk conversions between word arrays and byte arrays.
//!
//! Three formats are supported: packed (two words per nine bytes), 8-bit
//! (one word per four bytes, using quarter-words), and 6-bit (one word per
//! six bytes, using sixth-words). Each has a forward and a reversed
//! direction; reversed transfers see the byte stream in reverse medium
//! order, as produced by backward tape motion.
//!
//! All conversions return `(non_integral, count)`: whether the final
//! element was only partially produced, and how many elements were written.

use crate::word::Word36;

/// Serializes a `u32` big-endian into the first four bytes of `buffer`.
pub fn serialize_u32_be(value: u32, buffer: &mut [u8]) {
    buffer[..4].copy_from_slice(&value.to_be_bytes());
}

/// Deserializes a big-endian `u32` from the first four bytes of `buffer`.
#[must_use]
pub fn deserialize_u32_be(buffer: &[u8]) -> u32 {
    u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]])
}

/// Serializes a `u64` big-endian into the first eight bytes of `buffer`.
pub fn serialize_u64_be(value: u64, buffer: &mut [u8]) {
    buffer[..8].copy_from_slice(&value.to_be_bytes());
}

/// Deserializes a big-endian `u64` from the first eight bytes of `buffer`.
#[must_use]
pub fn deserialize_u64_be(buffer: &[u8]) -> u64 {
    u64::from_be_bytes([
        buffer[0], buffer[1], buffer[2], buffer[3], buffer[4], buffer[5], buffer[6], buffer[7],
    ])
}

/// Number of bytes produced by a packed conversion of `words` words.
#[must_use]
pub const fn packed_byte_count(words: usize) -> usize {
    (words / 2) * 9 + (words % 2) * 5
}

/// Converts words to packed bytes: each word pair becomes nine bytes.
/// An odd final word produces five bytes with a zero low nibble and a
/// non-integral indication.
pub fn words_to_bytes_packed(source: &[Word36], destination: &mut [u8]) -> (bool, usize) {
    let mut non_integral = false;
    let mut count = 0usize;
    let mut sx = 0usize;
    let mut dx = 0usize;
    while sx < source.len() {
        let w = source[sx].w();
        destination[dx] = (w >> 28) as u8;
        destination[dx + 1] = (w >> 20) as u8;
        destination[dx + 2] = (w >> 12) as u8;
        destination[dx + 3] = (w >> 4) as u8;
        if sx + 1 == source.len() {
            destination[dx + 4] = ((w << 4) & 0xF0) as u8;
            count += 5;
            non_integral = true;
            break;
        }
        let w2 = source[sx + 1].w();
        destination[dx + 4] = (((w << 4) & 0xF0) | ((w2 >> 32) & 0x0F)) as u8;
        destination[dx + 5] = (w2 >> 24) as u8;
        destination[dx + 6] = (w2 >> 16) as u8;
        destination[dx + 7] = (w2 >> 8) as u8;
        destination[dx + 8] = w2 as u8;
        sx += 2;
        dx += 9;
        count += 9;
    }
    (non_integral, count)
}

/// Converts packed bytes back to words. Every nine bytes become two words;
/// a trailing partial group leaves the final word partially assembled.
pub fn bytes_to_words_packed(source: &[u8], destination: &mut [Word36]) -> (bool, usize) {
    let mut non_integral = false;
    let mut count = 0usize;
    let mut dx = 0usize;
    for (sy, &byte) in source.iter().enumerate() {
        let b = u64::from(byte);
        match sy % 9 {
            0 => {
                destination[dx] = Word36::new(b << 28);
                non_integral = true;
                count += 1;
            }
            1 => destination[dx] = Word36::new(destination[dx].w() | (b << 20)),
            2 => destination[dx] = Word36::new(destination[dx].w() | (b << 12)),
            3 => destination[dx] = Word36::new(destination[dx].w() | (b << 4)),
            4 => {
                destination[dx] = Word36::new(destination[dx].w() | (b >> 4));
                dx += 1;
                destination[dx] = Word36::new((b & 0x0F) << 32);
                count += 1;
            }
            5 => destination[dx] = Word36::new(destination[dx].w() | (b << 24)),
            6 => destination[dx] = Word36::new(destination[dx].w() | (b << 16)),
            7 => destination[dx] = Word36::new(destination[dx].w() | (b << 8)),
            _ => {
                destination[dx] = Word36::new(destination[dx].w() | b);
                dx += 1;
                non_integral = false;
            }
        }
    }
    (non_integral, count)
}

/// Converts words to bytes using quarter-words: one word per four bytes.
/// Each byte carries the low eight bits of its quarter-word; the ninth bit
/// is dropped.
pub fn words_to_bytes_8bit(source: &[Word36], destination: &mut [u8]) -> (bool, usize) {
    let mut dx = 0usize;
    for word in source {
        destination[dx] = word.q1() as u8;
        destination[dx + 1] = word.q2() as u8;
        destination[dx + 2] = word.q3() as u8;
        destination[dx + 3] = word.q4() as u8;
        dx += 4;
    }
    (false, dx)
}

/// Converts bytes to words using quarter-words: four bytes per word.
pub fn bytes_to_words_8bit(source: &[u8], destination: &mut [Word36]) -> (bool, usize) {
    let mut non_integral = false;
    let mut count = 0usize;
    let mut dx = 0usize;
    for (sy, &byte) in source.iter().enumerate() {
        let b = u64::from(byte);
        match sy % 4 {
            0 => {
                let mut w = Word36::default();
                w.set_q1(b);
                destination[dx] = w;
                non_integral = true;
                count += 1;
            }
            1 => {
                let mut w = destination[dx];
                w.set_q2(b);
                destination[dx] = w;
            }
            2 => {
                let mut w = destination[dx];
                w.set_q3(b);
                destination[dx] = w;
            }
            _ => {
                let mut w = destination[dx];
                w.set_q4(b);
                destination[dx] = w;
                dx += 1;
                non_integral = false;
            }
        }
    }
    (non_integral, count)
}

/// Converts words to bytes using sixth-words: one word per six bytes.
pub fn words_to_bytes_6bit(source: &[Word36], destination: &mut [u8]) -> (bool, usize) {
    let mut dx = 0usize;
    for word in source {
        destination[dx] = word.s1() as u8;
        destination[dx + 1] = word.s2() as u8;
        destination[dx + 2] = word.s3() as u8;
        destination[dx + 3] = word.s4() as u8;
        destination[dx + 4] = word.s5() as u8;
        destination[dx + 5] = word.s6() as u8;
        dx += 6;
    }
    (false, dx)
}

/// Converts bytes to words using sixth-words: six bytes per word. Each
/// source byte contributes its low six bits.
pub fn bytes_to_words_6bit(source: &[u8], destination: &mut [Word36]) -> (bool, usize) {
    let mut non_integral = false;
    let mut count = 0usize;
    let mut dx = 0usize;
    for (sy, &byte) in source.iter().enumerate() {
        let b = u64::from(byte);
        match sy % 6 {
            0 => {
                let mut w = Word36::default();
                w.set_s1(b);
                destination[dx] = w;
                non_integral = true;
                count += 1;
            }
            1 => {
                let mut w = destination[dx];
                w.set_s2(b);
                destination[dx] = w;
            }
            2 => {
                let mut w = destination[dx];
                w.set_s3(b);
                destination[dx] = w;
            }
            3 => {
                let mut w = destination[dx];
                w.set_s4(b);
                destination[dx] = w;
            }
            4 => {
                let mut w = destination[dx];
                w.set_s5(b);
                destination[dx] = w;
            }
            _ => {
                let mut w = destination[dx];
                w.set_s6(b);
                destination[dx] = w;
                dx += 1;
                non_integral = false;
            }
        }
    }
    (non_integral, count)
}

/// Reversed-direction packed conversion: the byte stream is produced in
/// reverse medium order.
pub fn words_to_bytes_packed_reversed(source: &[Word36], destination: &mut [u8]) -> (bool, usize) {
    let mut forward = vec![0u8; packed_byte_count(source.len())];
    let (non_integral, count) = words_to_bytes_packed(source, &mut forward);
    forward.reverse();
    destination[..count].copy_from_slice(&forward);
    (non_integral, count)
}

/// Reversed-direction packed reassembly: consumes a byte stream that is in
/// reverse medium order.
pub fn bytes_to_words_packed_reversed(source: &[u8], destination: &mut [Word36]) -> (bool, usize) {
    let mut forward: Vec<u8> = source.to_vec();
    forward.reverse();
    bytes_to_words_packed(&forward, destination)
}

/// Reversed-direction 8-bit conversion.
pub fn words_to_bytes_8bit_reversed(source: &[Word36], destination: &mut [u8]) -> (bool, usize) {
    let mut dx = 0usize;
    for word in source.iter().rev() {
        destination[dx] = word.q4() as u8;
        destination[dx + 1] = word.q3() as u8;
        destination[dx + 2] = word.q2() as u8;
        destination[dx + 3] = word.q1() as u8;
        dx += 4;
    }
    (false, dx)
}

/// Reversed-direction 8-bit reassembly.
pub fn bytes_to_words_8bit_reversed(source: &[u8], destination: &mut [Word36]) -> (bool, usize) {
    let mut forward: Vec<u8> = source.to_vec();
    forward.reverse();
    bytes_to_words_8bit(&forward, destination)
}

/// Reversed-direction 6-bit conversion.
pub fn words_to_bytes_6bit_reversed(source: &[Word36], destination: &mut [u8]) -> (bool, usize) {
    let mut dx = 0usize;
    for word in source.iter().rev() {
        destination[dx] = word.s6() as u8;
        destination[dx + 1] = word.s5() as u8;
        destination[dx + 2] = word.s4() as u8;
        destination[dx + 3] = word.s3() as u8;
        destination[dx + 4] = word.s2() as u8;
        destination[dx + 5] = word.s1() as u8;
        dx += 6;
    }
    (false, dx)
}

/// Reversed-direction 6-bit reassembly.
pub fn bytes_to_words_6bit_reversed(source: &[u8], destination: &mut [Word36]) -> (bool, usize) {
    let mut forward: Vec<u8> = source.to_vec();
    forward.reverse();
    bytes_to_words_6bit(&forward, destination)
}
