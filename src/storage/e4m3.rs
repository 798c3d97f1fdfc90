use super::ScalarStorage;
use std::sync::OnceLock;

/// Largest finite magnitude representable (exponent bits 1111, mantissa 110).
const MAX_FINITE: f32 = 448.0;

/// `round(value >> shift)` with round-half-to-even, computed on the integer
/// bit pattern so encoding never goes through an intermediate `f32` rounding
/// step of its own.
fn round_shift_rne(value: u32, shift: u32) -> u32 {
    if shift == 0 {
        return value;
    }
    if shift >= 32 {
        return 0;
    }
    let half = 1u32 << (shift - 1);
    let mask = (1u32 << shift) - 1;
    let lower = value & mask;
    let upper = value >> shift;
    if lower > half || (lower == half && (upper & 1) == 1) {
        upper + 1
    } else {
        upper
    }
}

fn encode_one(x: f32) -> u8 {
    if x.is_nan() {
        return 0x7F;
    }
    let sign = if x.is_sign_negative() { 0x80u8 } else { 0 };
    let ax = x.abs().min(MAX_FINITE);
    if ax == 0.0 {
        return sign;
    }

    let bits = ax.to_bits();
    let f32_exp = ((bits >> 23) & 0xFF) as i32 - 127;
    let f32_mantissa = bits & 0x007F_FFFF;
    let sig24 = f32_mantissa | (1 << 23);

    if f32_exp >= -6 {
        // Normal range: 4-bit significand 1.mmm lives in bits [20, 23] of sig24.
        let mut sig = round_shift_rne(sig24, 20);
        let mut biased_exp = f32_exp + 7;
        if sig == 16 {
            sig = 8;
            biased_exp += 1;
        }
        if biased_exp >= 15 {
            // Clamped input guarantees this lands exactly on 448 (mantissa 6),
            // never on the mantissa-7 NaN pattern.
            biased_exp = 15;
            sig = sig.min(14);
        }
        let mantissa = (sig - 8) as u8;
        sign | ((biased_exp as u8) << 3) | mantissa
    } else {
        // Subnormal range: value = (m / 8) * 2^-6.
        let shift = (14 - f32_exp) as u32;
        let mut m = round_shift_rne(sig24, shift);
        if m > 7 {
            // Rounded up into the smallest normal.
            m = 0;
            return sign | (1 << 3);
        }
        sign | (m as u8)
    }
}

fn build_decode_table() -> [f32; 256] {
    let mut table = [0f32; 256];
    for (byte, slot) in table.iter_mut().enumerate() {
        let byte = byte as u8;
        let sign = (byte & 0x80) != 0;
        let exp = (byte >> 3) & 0x0F;
        let mantissa = (byte & 0x07) as f32;
        let magnitude = if exp == 0 {
            (mantissa / 8.0) * 2f32.powi(-6)
        } else if exp == 0x0F && byte & 0x07 == 0x07 {
            f32::NAN
        } else {
            (1.0 + mantissa / 8.0) * 2f32.powi(exp as i32 - 7)
        };
        *slot = if sign { -magnitude } else { magnitude };
    }
    table
}

fn decode_table() -> &'static [f32; 256] {
    static TABLE: OnceLock<[f32; 256]> = OnceLock::new();
    TABLE.get_or_init(build_decode_table)
}

/// 8-bit float: 1 sign bit, 4-bit exponent (bias 7), 3-bit mantissa. No
/// infinities; a single NaN pattern (`0x7F`/`0xFF`); subnormals below 2^-6.
/// Range is roughly ±448. Encoding rounds to nearest-even and saturates
/// out-of-range finite inputs; decoding is an exact 256-entry lookup.
pub struct E4M3;

impl ScalarStorage for E4M3 {
    fn element_size(&self) -> usize {
        1
    }

    fn encode(&self, v: &[f32], out: &mut Vec<u8>) {
        out.reserve(v.len());
        out.extend(v.iter().map(|&x| encode_one(x)));
    }

    fn decode(&self, bytes: &[u8], out: &mut Vec<f32>) {
        let table = decode_table();
        out.reserve(bytes.len());
        out.extend(bytes.iter().map(|&b| table[b as usize]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(x: f32) -> f32 {
        let byte = encode_one(x);
        decode_table()[byte as usize]
    }

    #[test]
    fn encodes_zero_and_small_values() {
        assert_eq!(round_trip(0.0), 0.0);
        assert_eq!(round_trip(-0.0), -0.0);
    }

    #[test]
    fn encodes_one_exactly() {
        assert_eq!(round_trip(1.0), 1.0);
        assert_eq!(round_trip(-1.0), -1.0);
    }

    #[test]
    fn saturates_above_max_finite() {
        assert_eq!(round_trip(1000.0), MAX_FINITE);
        assert_eq!(round_trip(-1000.0), -MAX_FINITE);
        assert_eq!(round_trip(448.0), MAX_FINITE);
    }

    #[test]
    fn nan_round_trips_to_nan() {
        assert!(round_trip(f32::NAN).is_nan());
    }

    #[test]
    fn subnormal_values_decode_to_small_magnitudes() {
        let tiny = round_trip(0.001);
        assert!(tiny >= 0.0 && tiny < 0.01);
    }

    #[test]
    fn relative_error_bounded_for_mid_range_values() {
        for x in [2.0f32, 3.5, 10.0, 64.0, 100.0, 200.0] {
            let y = round_trip(x);
            let rel_err = (x - y).abs() / x;
            assert!(rel_err < 0.07, "x={x} y={y} rel_err={rel_err}");
        }
    }

    #[test]
    fn decode_table_has_exactly_one_nan_magnitude() {
        let table = decode_table();
        let nan_count = table.iter().filter(|v| v.is_nan()).count();
        assert_eq!(nan_count, 2); // 0x7F and 0xFF
    }
}
