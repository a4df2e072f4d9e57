//! The 36-bit word model: field projections, ones-complement arithmetic,
//! shifts, and partial-word transfers.
//!
//! A word is a 36-bit unsigned value right-justified in a `u64`; bits 36..63
//! are invariant zero. Positive zero is all bits clear, negative zero is all
//! 36 bits set, and both compare equal under value equality.

use std::cmp::Ordering;

/// Mask of the 36 architecturally significant bits.
pub const WORD_MASK: u64 = 0o777777_777777;
/// The sign bit (bit 35 counted from the LSB; bit 0 in MSB-first numbering).
pub const NEGATIVE_BIT: u64 = 0o400000_000000;

/// Positive zero.
pub const POSITIVE_ZERO: u64 = 0;
/// Negative zero (all 36 bits set).
pub const NEGATIVE_ZERO: u64 = WORD_MASK;
/// Positive one.
pub const POSITIVE_ONE: u64 = 1;
/// Negative one (complement of positive one).
pub const NEGATIVE_ONE: u64 = 0o777777_777776;

/// A 36-bit word held in the low bits of a `u64`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Word36(u64);

impl Word36 {
    /// Constructs a word from a raw value, masking to 36 bits.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value & WORD_MASK)
    }

    /// The full 36-bit value.
    #[must_use]
    pub const fn w(self) -> u64 {
        self.0
    }

    /// Upper half-word H1 (18 bits).
    #[must_use]
    pub const fn h1(self) -> u64 {
        (self.0 >> 18) & 0o777777
    }

    /// Lower half-word H2 (18 bits).
    #[must_use]
    pub const fn h2(self) -> u64 {
        self.0 & 0o777777
    }

    /// Quarter-word Q1 (bits 35..27).
    #[must_use]
    pub const fn q1(self) -> u64 {
        (self.0 >> 27) & 0o777
    }

    /// Quarter-word Q2.
    #[must_use]
    pub const fn q2(self) -> u64 {
        (self.0 >> 18) & 0o777
    }

    /// Quarter-word Q3.
    #[must_use]
    pub const fn q3(self) -> u64 {
        (self.0 >> 9) & 0o777
    }

    /// Quarter-word Q4 (low 9 bits).
    #[must_use]
    pub const fn q4(self) -> u64 {
        self.0 & 0o777
    }

    /// Sixth-word S1 (high 6 bits).
    #[must_use]
    pub const fn s1(self) -> u64 {
        (self.0 >> 30) & 0o77
    }

    /// Sixth-word S2.
    #[must_use]
    pub const fn s2(self) -> u64 {
        (self.0 >> 24) & 0o77
    }

    /// Sixth-word S3.
    #[must_use]
    pub const fn s3(self) -> u64 {
        (self.0 >> 18) & 0o77
    }

    /// Sixth-word S4.
    #[must_use]
    pub const fn s4(self) -> u64 {
        (self.0 >> 12) & 0o77
    }

    /// Sixth-word S5.
    #[must_use]
    pub const fn s5(self) -> u64 {
        (self.0 >> 6) & 0o77
    }

    /// Sixth-word S6 (low 6 bits).
    #[must_use]
    pub const fn s6(self) -> u64 {
        self.0 & 0o77
    }

    /// Third-word T1 (high 12 bits).
    #[must_use]
    pub const fn t1(self) -> u64 {
        (self.0 >> 24) & 0o7777
    }

    /// Third-word T2.
    #[must_use]
    pub const fn t2(self) -> u64 {
        (self.0 >> 12) & 0o7777
    }

    /// Third-word T3 (low 12 bits).
    #[must_use]
    pub const fn t3(self) -> u64 {
        self.0 & 0o7777
    }

    /// H1 sign-extended to 36 bits.
    #[must_use]
    pub const fn xh1(self) -> u64 {
        sign_extend_18(self.h1())
    }

    /// H2 sign-extended to 36 bits.
    #[must_use]
    pub const fn xh2(self) -> u64 {
        sign_extend_18(self.h2())
    }

    /// T1 sign-extended to 36 bits.
    #[must_use]
    pub const fn xt1(self) -> u64 {
        sign_extend_12(self.t1())
    }

    /// T2 sign-extended to 36 bits.
    #[must_use]
    pub const fn xt2(self) -> u64 {
        sign_extend_12(self.t2())
    }

    /// T3 sign-extended to 36 bits.
    #[must_use]
    pub const fn xt3(self) -> u64 {
        sign_extend_12(self.t3())
    }

    /// Replaces the full word.
    pub fn set_w(&mut self, value: u64) {
        self.0 = value & WORD_MASK;
    }

    /// Replaces H1, preserving H2.
    pub fn set_h1(&mut self, value: u64) {
        self.0 = (self.0 & 0o777777) | ((value & 0o777777) << 18);
    }

    /// Replaces H2, preserving H1.
    pub fn set_h2(&mut self, value: u64) {
        self.0 = (self.0 & 0o777777_000000) | (value & 0o777777);
    }

    /// Replaces Q1.
    pub fn set_q1(&mut self, value: u64) {
        self.0 = (self.0 & 0o000777_777777) | ((value & 0o777) << 27);
    }

    /// Replaces Q2.
    pub fn set_q2(&mut self, value: u64) {
        self.0 = (self.0 & 0o777000_777777) | ((value & 0o777) << 18);
    }

    /// Replaces Q3.
    pub fn set_q3(&mut self, value: u64) {
        self.0 = (self.0 & 0o777777_000777) | ((value & 0o777) << 9);
    }

    /// Replaces Q4.
    pub fn set_q4(&mut self, value: u64) {
        self.0 = (self.0 & 0o777777_777000) | (value & 0o777);
    }

    /// Replaces S1.
    pub fn set_s1(&mut self, value: u64) {
        self.0 = (self.0 & 0o007777_777777) | ((value & 0o77) << 30);
    }

    /// Replaces S2.
    pub fn set_s2(&mut self, value: u64) {
        self.0 = (self.0 & 0o770077_777777) | ((value & 0o77) << 24);
    }

    /// Replaces S3.
    pub fn set_s3(&mut self, value: u64) {
        self.0 = (self.0 & 0o777700_777777) | ((value & 0o77) << 18);
    }

    /// Replaces S4.
    pub fn set_s4(&mut self, value: u64) {
        self.0 = (self.0 & 0o777777_007777) | ((value & 0o77) << 12);
    }

    /// Replaces S5.
    pub fn set_s5(&mut self, value: u64) {
        self.0 = (self.0 & 0o777777_770077) | ((value & 0o77) << 6);
    }

    /// Replaces S6.
    pub fn set_s6(&mut self, value: u64) {
        self.0 = (self.0 & 0o777777_777700) | (value & 0o77);
    }

    /// Replaces T1.
    pub fn set_t1(&mut self, value: u64) {
        self.0 = (self.0 & 0o000077_777777) | ((value & 0o7777) << 24);
    }

    /// Replaces T2.
    pub fn set_t2(&mut self, value: u64) {
        self.0 = (self.0 & 0o777700_007777) | ((value & 0o7777) << 12);
    }

    /// Replaces T3.
    pub fn set_t3(&mut self, value: u64) {
        self.0 = (self.0 & 0o777777_770000) | (value & 0o7777);
    }

    /// True when the sign bit is set.
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 & NEGATIVE_BIT != 0
    }

    /// True when the sign bit is clear.
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 & NEGATIVE_BIT == 0
    }

    /// True for either encoding of zero.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == POSITIVE_ZERO || self.0 == NEGATIVE_ZERO
    }

    /// Value equality under two-value (plus-or-minus zero) semantics.
    #[must_use]
    pub fn eq_value(self, other: Self) -> bool {
        self.0 == other.0 || (self.is_zero() && other.is_zero())
    }
}

impl From<u64> for Word36 {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl From<Word36> for u64 {
    fn from(word: Word36) -> Self {
        word.0
    }
}

/// Sign-extends an 18-bit value to 36 bits.
#[must_use]
pub const fn sign_extend_18(value: u64) -> u64 {
    if value & 0o400000 != 0 {
        value | 0o777777_000000
    } else {
        value & 0o777777
    }
}

/// Sign-extends a 12-bit value to 36 bits.
#[must_use]
pub const fn sign_extend_12(value: u64) -> u64 {
    if value & 0o4000 != 0 {
        value | 0o777777_770000
    } else {
        value & 0o7777
    }
}

/// Sign-extends a 24-bit value to 36 bits.
#[must_use]
pub const fn sign_extend_24(value: u64) -> u64 {
    if value & 0o40_000000 != 0 {
        value | 0o777740_000000
    } else {
        value & 0o77_777777
    }
}

/// True when the sign bit of a raw 36-bit value is set.
#[must_use]
pub const fn is_negative(value: u64) -> bool {
    value & NEGATIVE_BIT != 0
}

/// Ones-complement negation: bitwise complement masked to 36 bits.
#[must_use]
pub const fn negate(value: u64) -> u64 {
    value ^ WORD_MASK
}

/// Absolute value under ones-complement encoding.
#[must_use]
pub const fn magnitude(value: u64) -> u64 {
    if is_negative(value) {
        negate(value)
    } else {
        value
    }
}

/// Converts a 36-bit ones-complement encoding to a native signed value.
#[must_use]
pub const fn to_native(value: u64) -> i64 {
    if is_negative(value) {
        -(negate(value) as i64)
    } else {
        value as i64
    }
}

/// Converts a native signed value to its 36-bit ones-complement encoding.
/// Values outside the representable range wrap through the mask.
#[must_use]
pub const fn from_native(value: i64) -> u64 {
    if value < 0 {
        negate(value.unsigned_abs() & WORD_MASK)
    } else {
        (value as u64) & WORD_MASK
    }
}

/// Ones-complement addition with end-around carry: a carry out of bit 35
/// adds back into bit 0. A sum of a value and its negation is negative
/// zero, not positive zero.
#[must_use]
pub const fn add_ones(a: u64, b: u64) -> u64 {
    let sum = (a & WORD_MASK) + (b & WORD_MASK);
    ((sum & WORD_MASK) + (sum >> 36)) & WORD_MASK
}

/// Alias used by address arithmetic, where operands are signed modifiers
/// already encoded in ones-complement form.
#[must_use]
pub const fn add_simple(a: u64, b: u64) -> u64 {
    add_ones(a, b)
}

/// Two-value comparison. Equal encodings compare equal; when the native
/// values tie (the two zeros), the negative encoding orders first.
#[must_use]
pub fn compare(a: u64, b: u64) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    match to_native(a).cmp(&to_native(b)) {
        Ordering::Equal => {
            // Same native value but different encodings: only the two zeros.
            if a == NEGATIVE_ZERO {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        other => other,
    }
}

/// Number of set bits in the 36-bit value.
#[must_use]
pub const fn count_bits(value: u64) -> u32 {
    (value & WORD_MASK).count_ones()
}

/// Logical left shift; counts of 36 or more produce zero.
#[must_use]
pub const fn left_shift_logical(value: u64, count: u32) -> u64 {
    if count >= 36 {
        0
    } else {
        (value << count) & WORD_MASK
    }
}

/// Logical right shift; counts of 36 or more produce zero.
#[must_use]
pub const fn right_shift_logical(value: u64, count: u32) -> u64 {
    if count >= 36 {
        0
    } else {
        (value & WORD_MASK) >> count
    }
}

/// Circular left shift, modulo 36.
#[must_use]
pub const fn left_shift_circular(value: u64, count: u32) -> u64 {
    let count = count % 36;
    if count == 0 {
        value & WORD_MASK
    } else {
        (((value << count) & WORD_MASK) | ((value & WORD_MASK) >> (36 - count))) & WORD_MASK
    }
}

/// Circular right shift, modulo 36.
#[must_use]
pub const fn right_shift_circular(value: u64, count: u32) -> u64 {
    left_shift_circular(value, 36 - (count % 36))
}

/// Algebraic right shift: replicates bit 35 into vacated positions.
#[must_use]
pub const fn right_shift_algebraic(value: u64, count: u32) -> u64 {
    if count >= 36 {
        if is_negative(value) {
            NEGATIVE_ZERO
        } else {
            0
        }
    } else if is_negative(value) {
        ((value & WORD_MASK) >> count) | (WORD_MASK & !(WORD_MASK >> count))
    } else {
        (value & WORD_MASK) >> count
    }
}

const DOUBLE_MASK: u128 = (1u128 << 72) - 1;
const DOUBLE_NEGATIVE_BIT: u128 = 1u128 << 71;

const fn double_combine(high: u64, low: u64) -> u128 {
    (((high & WORD_MASK) as u128) << 36) | ((low & WORD_MASK) as u128)
}

const fn double_split(value: u128) -> (u64, u64) {
    (
        ((value >> 36) as u64) & WORD_MASK,
        (value as u64) & WORD_MASK,
    )
}

/// Logical left shift over a 72-bit double word (high, low).
#[must_use]
pub const fn double_left_shift_logical(high: u64, low: u64, count: u32) -> (u64, u64) {
    if count >= 72 {
        (0, 0)
    } else {
        double_split((double_combine(high, low) << count) & DOUBLE_MASK)
    }
}

/// Logical right shift over a 72-bit double word.
#[must_use]
pub const fn double_right_shift_logical(high: u64, low: u64, count: u32) -> (u64, u64) {
    if count >= 72 {
        (0, 0)
    } else {
        double_split(double_combine(high, low) >> count)
    }
}

/// Circular left shift over a 72-bit double word, modulo 72.
#[must_use]
pub const fn double_left_shift_circular(high: u64, low: u64, count: u32) -> (u64, u64) {
    let count = count % 72;
    if count == 0 {
        (high & WORD_MASK, low & WORD_MASK)
    } else {
        let v = double_combine(high, low);
        double_split(((v << count) & DOUBLE_MASK) | (v >> (72 - count)))
    }
}

/// Circular right shift over a 72-bit double word, modulo 72.
#[must_use]
pub const fn double_right_shift_circular(high: u64, low: u64, count: u32) -> (u64, u64) {
    double_left_shift_circular(high, low, 72 - (count % 72))
}

/// Algebraic right shift over a 72-bit double word: replicates bit 71.
#[must_use]
pub const fn double_right_shift_algebraic(high: u64, low: u64, count: u32) -> (u64, u64) {
    let v = double_combine(high, low);
    let negative = v & DOUBLE_NEGATIVE_BIT != 0;
    if count >= 72 {
        if negative {
            (NEGATIVE_ZERO, NEGATIVE_ZERO)
        } else {
            (0, 0)
        }
    } else if negative {
        double_split((v >> count) | (DOUBLE_MASK & !(DOUBLE_MASK >> count)))
    } else {
        double_split(v >> count)
    }
}

// j-field codes shared by the partial-word transfer table and the decoder.

/// j-field designating the full word.
pub const J_W: u64 = 0;
/// j-field designating immediate (unsigned) addressing.
pub const J_U: u64 = 0o16;
/// j-field designating immediate (sign-extended) addressing.
pub const J_XU: u64 = 0o17;

/// Extracts the partial word selected by the j-field from `value`.
/// The mapping for j in 4..=7 depends on quarter-word mode.
#[must_use]
pub fn extract_partial_word(value: u64, j_field: u64, quarter_word_mode: bool) -> u64 {
    let w = Word36::new(value);
    match j_field {
        0o0 => w.w(),
        0o1 => w.h2(),
        0o2 => w.h1(),
        0o3 => w.xh2(),
        0o4 => {
            if quarter_word_mode {
                w.q2()
            } else {
                w.xh1()
            }
        }
        0o5 => {
            if quarter_word_mode {
                w.q4()
            } else {
                w.xt3()
            }
        }
        0o6 => {
            if quarter_word_mode {
                w.q3()
            } else {
                w.xt2()
            }
        }
        0o7 => {
            if quarter_word_mode {
                w.q1()
            } else {
                w.xt1()
            }
        }
        0o10 => w.s6(),
        0o11 => w.s5(),
        0o12 => w.s4(),
        0o13 => w.s3(),
        0o14 => w.s2(),
        0o15 => w.s1(),
        _ => w.w(),
    }
}

/// Injects `new_value` into the partial word of `original` selected by the
/// j-field, preserving the complementary bits.
#[must_use]
pub fn inject_partial_word(original: u64, new_value: u64, j_field: u64, quarter_word_mode: bool) -> u64 {
    let mut w = Word36::new(original);
    match j_field {
        0o0 => w.set_w(new_value),
        0o1 => w.set_h2(new_value),
        0o2 => w.set_h1(new_value),
        0o3 => w.set_h2(new_value),
        0o4 => {
            if quarter_word_mode {
                w.set_q2(new_value);
            } else {
                w.set_h1(new_value);
            }
        }
        0o5 => {
            if quarter_word_mode {
                w.set_q4(new_value);
            } else {
                w.set_t3(new_value);
            }
        }
        0o6 => {
            if quarter_word_mode {
                w.set_q3(new_value);
            } else {
                w.set_t2(new_value);
            }
        }
        0o7 => {
            if quarter_word_mode {
                w.set_q1(new_value);
            } else {
                w.set_t1(new_value);
            }
        }
        0o10 => w.set_s6(new_value),
        0o11 => w.set_s5(new_value),
        0o12 => w.set_s4(new_value),
        0o13 => w.set_s3(new_value),
        0o14 => w.set_s2(new_value),
        0o15 => w.set_s1(new_value),
        _ => w.set_w(new_value),
    }
    w.w()
}
