use super::ScalarStorage;

const SCALE: f32 = 127.0;

/// Fixed-scale signed-byte quantization: `x -> clamp(round(x * 127), -127, 127)`.
/// Values outside `[-1, 1]` saturate rather than wrap, so a caller passing an
/// un-normalized vector loses precision but not direction.
pub struct I8Scaled;

impl ScalarStorage for I8Scaled {
    fn element_size(&self) -> usize {
        1
    }

    fn encode(&self, v: &[f32], out: &mut Vec<u8>) {
        out.reserve(v.len());
        for &x in v {
            let scaled = (x * SCALE).round().clamp(-127.0, 127.0);
            out.push(scaled as i8 as u8);
        }
    }

    fn decode(&self, bytes: &[u8], out: &mut Vec<f32>) {
        out.reserve(bytes.len());
        for &b in bytes {
            out.push((b as i8) as f32 / SCALE);
        }
    }
}
