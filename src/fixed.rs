//! Fixed-point numeric codec.
//!
//! Every tensor element and gradient is stored as a signed integer encoding
//! `real * 2^FRAC_BITS`. Two formats are provided:
//!
//! - [`Q8`]: Q7.8 in an `i16`, for targets without an FPU.
//! - [`Q16`]: Q15.16 in an `i32`, for desktop use.
//!
//! Arithmetic never traps. Each primitive returns the saturated result
//! together with an overflow flag, mirroring `i32::overflowing_add`, so the
//! caller decides whether overflow is an error.

use std::fmt;

use bytemuck::{Pod, Zeroable};

/// A fixed-point scalar with `FRAC_BITS` fractional bits.
pub trait Fixed:
    Pod + Zeroable + PartialEq + PartialOrd + Default + fmt::Debug + fmt::Display + 'static
{
    /// Underlying integer representation.
    type Raw: Copy + fmt::Debug + fmt::Display + PartialOrd;

    /// Number of fractional bits `F`.
    const FRAC_BITS: u32;
    const ZERO: Self;
    const ONE: Self;
    const MIN: Self;
    const MAX: Self;

    fn from_raw(raw: Self::Raw) -> Self;
    fn to_raw(self) -> Self::Raw;

    /// Encodes `real` as `round(real * 2^F)`, saturating at the format bounds.
    ///
    /// The flag is set when `real` was out of range or not a number
    /// (`NaN` encodes to zero).
    fn overflowing_encode_f64(real: f64) -> (Self, bool);

    /// Exact decode: every raw value of both formats fits an `f64` mantissa,
    /// so `overflowing_encode_f64(x.decode_f64()) == (x, false)`.
    fn decode_f64(self) -> f64;

    /// [`Fixed::overflowing_encode_f64`] for `f32` input.
    #[inline]
    fn overflowing_encode(real: f32) -> (Self, bool) {
        Self::overflowing_encode_f64(f64::from(real))
    }

    /// Decodes into an `f32`. Exact for [`Q8`]; for [`Q16`] magnitudes above
    /// 256 lose their lowest bits, so internal arithmetic uses
    /// [`Fixed::decode_f64`].
    #[allow(clippy::cast_possible_truncation)]
    #[inline]
    fn decode(self) -> f32 {
        self.decode_f64() as f32
    }

    fn overflowing_add(self, rhs: Self) -> (Self, bool);
    fn overflowing_sub(self, rhs: Self) -> (Self, bool);
    fn overflowing_neg(self) -> (Self, bool);

    /// `(a * b) >> F` with round-half-up.
    fn overflowing_mul(self, rhs: Self) -> (Self, bool);

    /// `(a << F) / b`, truncating toward zero.
    ///
    /// A zero divisor yields zero without raising the flag.
    fn overflowing_div(self, rhs: Self) -> (Self, bool);

    /// Sum of products accumulated in a wide register and rounded once.
    fn overflowing_dot(pairs: impl IntoIterator<Item = (Self, Self)>) -> (Self, bool);

    /// Saturating encode.
    #[inline]
    fn encode(real: f32) -> Self {
        Self::overflowing_encode(real).0
    }

    /// Smallest representable step, `2^-F`.
    #[inline]
    fn resolution() -> f32 {
        1.0 / (1u64 << Self::FRAC_BITS) as f32
    }
}

macro_rules! fixed_point {
    ($(#[$meta:meta])* $name:ident, $raw:ty, $wide:ty, $acc:ty, $frac:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
        #[repr(transparent)]
        pub struct $name($raw);

        impl $name {
            const SCALE: f64 = (1u64 << $frac) as f64;
            const HALF: $acc = 1 << ($frac - 1);

            #[allow(clippy::cast_possible_truncation)]
            fn clamp_acc(value: $acc) -> (Self, bool) {
                if value > <$raw>::MAX as $acc {
                    ($name(<$raw>::MAX), true)
                } else if value < <$raw>::MIN as $acc {
                    ($name(<$raw>::MIN), true)
                } else {
                    ($name(value as $raw), false)
                }
            }
        }

        impl Fixed for $name {
            type Raw = $raw;

            const FRAC_BITS: u32 = $frac;
            const ZERO: Self = $name(0);
            const ONE: Self = $name(1 << $frac);
            const MIN: Self = $name(<$raw>::MIN);
            const MAX: Self = $name(<$raw>::MAX);

            #[inline]
            fn from_raw(raw: $raw) -> Self {
                $name(raw)
            }

            #[inline]
            fn to_raw(self) -> $raw {
                self.0
            }

            #[allow(clippy::cast_possible_truncation)]
            fn overflowing_encode_f64(real: f64) -> (Self, bool) {
                if real.is_nan() {
                    return (Self::ZERO, true);
                }
                let scaled = (real * Self::SCALE).round();
                if scaled > f64::from(<$raw>::MAX) {
                    (Self::MAX, true)
                } else if scaled < f64::from(<$raw>::MIN) {
                    (Self::MIN, true)
                } else {
                    // in range after the checks above
                    ($name(scaled as $raw), false)
                }
            }

            #[inline]
            fn decode_f64(self) -> f64 {
                f64::from(self.0) / Self::SCALE
            }

            #[inline]
            fn overflowing_add(self, rhs: Self) -> (Self, bool) {
                match self.0.checked_add(rhs.0) {
                    Some(v) => ($name(v), false),
                    None => ($name(self.0.saturating_add(rhs.0)), true),
                }
            }

            #[inline]
            fn overflowing_sub(self, rhs: Self) -> (Self, bool) {
                match self.0.checked_sub(rhs.0) {
                    Some(v) => ($name(v), false),
                    None => ($name(self.0.saturating_sub(rhs.0)), true),
                }
            }

            #[inline]
            fn overflowing_neg(self) -> (Self, bool) {
                match self.0.checked_neg() {
                    Some(v) => ($name(v), false),
                    None => (Self::MAX, true),
                }
            }

            #[inline]
            fn overflowing_mul(self, rhs: Self) -> (Self, bool) {
                let wide = <$acc>::from(self.0) * <$acc>::from(rhs.0);
                Self::clamp_acc((wide + Self::HALF) >> $frac)
            }

            #[inline]
            fn overflowing_div(self, rhs: Self) -> (Self, bool) {
                if rhs.0 == 0 {
                    return (Self::ZERO, false);
                }
                let num = <$acc>::from(<$wide>::from(self.0)) << $frac;
                Self::clamp_acc(num / <$acc>::from(rhs.0))
            }

            fn overflowing_dot(pairs: impl IntoIterator<Item = (Self, Self)>) -> (Self, bool) {
                let mut acc: $acc = 0;
                let mut overflowed = false;
                for (a, b) in pairs {
                    let product = <$acc>::from(a.0) * <$acc>::from(b.0);
                    acc = match acc.checked_add(product) {
                        Some(v) => v,
                        None => {
                            overflowed = true;
                            acc.saturating_add(product)
                        }
                    };
                }
                let (value, clamped) = Self::clamp_acc(acc.saturating_add(Self::HALF) >> $frac);
                (value, overflowed || clamped)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({} = {})", stringify!($name), self.0, self.decode_f64())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.decode_f64(), f)
            }
        }
    };
}

fixed_point!(
    /// Q7.8: 8 fractional bits in an `i16`, range `[-128, 128)`.
    Q8, i16, i32, i64, 8
);

fixed_point!(
    /// Q15.16: 16 fractional bits in an `i32`, range `[-32768, 32768)`.
    Q16, i32, i64, i128, 16
);
