//! Fieldata, the 6-bit character encoding native to this architecture, and
//! packing of character strings into words.

use crate::word::Word36;

/// ASCII rendering of each of the 64 Fieldata codepoints.
pub const ASCII_FROM_FIELDATA: [u8; 64] = [
    b'@', b'[', b']', b'#', b'^', b' ', b'A', b'B', //
    b'C', b'D', b'E', b'F', b'G', b'H', b'I', b'J', //
    b'K', b'L', b'M', b'N', b'O', b'P', b'Q', b'R', //
    b'S', b'T', b'U', b'V', b'W', b'X', b'Y', b'Z', //
    b')', b'-', b'+', b'<', b'=', b'>', b'&', b'$', //
    b'*', b'(', b'%', b':', b'?', b'!', b',', b'\\', //
    b'0', b'1', b'2', b'3', b'4', b'5', b'6', b'7', //
    b'8', b'9', b'\'', b';', b'/', b'.', b'"', b'_',
];

/// Fieldata codepoint for each 7-bit ASCII value. Lowercase letters fold to
/// their uppercase equivalents; anything unrepresentable maps to the space
/// code 0o05.
pub const FIELDATA_FROM_ASCII: [u8; 128] = [
    0o05, 0o05, 0o05, 0o05, 0o05, 0o05, 0o05, 0o05, 0o05, 0o05, 0o05, 0o05, 0o05, 0o05, 0o05, 0o05,
    0o05, 0o05, 0o05, 0o05, 0o05, 0o05, 0o05, 0o05, 0o05, 0o05, 0o05, 0o05, 0o05, 0o05, 0o05, 0o05,
    0o05, 0o55, 0o76, 0o03, 0o47, 0o52, 0o46, 0o72, 0o51, 0o40, 0o50, 0o42, 0o56, 0o41, 0o75, 0o74,
    0o60, 0o61, 0o62, 0o63, 0o64, 0o65, 0o66, 0o67, 0o70, 0o71, 0o53, 0o73, 0o43, 0o44, 0o45, 0o54,
    0o00, 0o06, 0o07, 0o10, 0o11, 0o12, 0o13, 0o14, 0o15, 0o16, 0o17, 0o20, 0o21, 0o22, 0o23, 0o24,
    0o25, 0o26, 0o27, 0o30, 0o31, 0o32, 0o33, 0o34, 0o35, 0o36, 0o37, 0o01, 0o57, 0o60, 0o04, 0o77,
    0o00, 0o06, 0o07, 0o10, 0o11, 0o12, 0o13, 0o14, 0o15, 0o16, 0o17, 0o20, 0o21, 0o22, 0o23, 0o24,
    0o25, 0o26, 0o27, 0o30, 0o31, 0o32, 0o33, 0o34, 0o35, 0o36, 0o37, 0o54, 0o57, 0o55, 0o04, 0o77,
];

/// Fieldata code for a single ASCII byte.
#[must_use]
pub fn fieldata_from_ascii(ch: u8) -> u8 {
    FIELDATA_FROM_ASCII[(ch & 0x7F) as usize]
}

/// ASCII byte for a single Fieldata code.
#[must_use]
pub fn ascii_from_fieldata(code: u8) -> u8 {
    ASCII_FROM_FIELDATA[(code & 0o77) as usize]
}

/// Packs up to six characters of `text` into one word as Fieldata,
/// space-padded on the right.
#[must_use]
pub fn word_from_fieldata_str(text: &str) -> Word36 {
    let mut value = 0u64;
    let bytes = text.as_bytes();
    for index in 0..6 {
        let code = if index < bytes.len() {
            fieldata_from_ascii(bytes[index])
        } else {
            0o05
        };
        value = (value << 6) | u64::from(code);
    }
    Word36::new(value)
}

/// Packs up to four characters of `text` into one word as 9-bit ASCII,
/// space-padded on the right.
#[must_use]
pub fn word_from_ascii_str(text: &str) -> Word36 {
    let mut value = 0u64;
    let bytes = text.as_bytes();
    for index in 0..4 {
        let ch = if index < bytes.len() { bytes[index] } else { b' ' };
        value = (value << 9) | u64::from(ch);
    }
    Word36::new(value)
}

/// Renders the six Fieldata characters of a word as ASCII.
#[must_use]
pub fn fieldata_str_from_word(word: Word36) -> String {
    let mut out = String::with_capacity(6);
    for shift in [30u32, 24, 18, 12, 6, 0] {
        out.push(char::from(ascii_from_fieldata(
            ((word.w() >> shift) & 0o77) as u8,
        )));
    }
    out
}

/// Renders the four 9-bit ASCII characters of a word.
#[must_use]
pub fn ascii_str_from_word(word: Word36) -> String {
    let mut out = String::with_capacity(4);
    for shift in [27u32, 18, 9, 0] {
        out.push(char::from(((word.w() >> shift) & 0o177) as u8));
    }
    out
}
