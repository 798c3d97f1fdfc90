use super::ScalarStorage;

/// Bit-identical round trip: the stored payload *is* the `f32` bytes.
pub struct F32Backend;

impl ScalarStorage for F32Backend {
    fn element_size(&self) -> usize {
        4
    }

    fn encode(&self, v: &[f32], out: &mut Vec<u8>) {
        out.reserve(v.len() * 4);
        for &x in v {
            out.extend_from_slice(&x.to_le_bytes());
        }
    }

    fn decode(&self, bytes: &[u8], out: &mut Vec<f32>) {
        out.reserve(bytes.len() / 4);
        for chunk in bytes.chunks_exact(4) {
            out.push(f32::from_le_bytes(chunk.try_into().unwrap()));
        }
    }
}
