//! Stable binary serializer (component F, §6).
//!
//! The wire format is little-endian, magic `"VOY1"`, a fixed header
//! followed by one fixed-size record per node (in internal-id order) and a
//! trailing CRC-32 over everything before it. The public entry points
//! (`save`/`load`) work against the abstract [`ByteSink`]/[`ByteSource`]
//! traits so a host-language file adapter can plug in without the core
//! touching `std::fs` directly; [`IoByteSink`]/[`IoByteSource`] are the
//! in-process convenience adapters over any `Read`/`Write` + `Seek` type.
use crate::distance::Space;
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::hnsw::Engine;
use crate::storage::Storage;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

const MAGIC: &[u8; 4] = b"VOY1";
const FORMAT_VERSION: u32 = 1;

/// Abstract read source: `read` mirrors [`std::io::Read::read`], plus
/// position tracking so host-language adapters without a native `Seek` can
/// still report whether they support it.
pub trait ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn tell(&mut self) -> io::Result<u64>;
    fn seek(&mut self, offset: u64) -> io::Result<()>;
    fn seekable(&self) -> bool;
}

/// Abstract write sink, the mirror image of [`ByteSource`].
pub trait ByteSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn tell(&mut self) -> io::Result<u64>;
    fn seek(&mut self, offset: u64) -> io::Result<()>;
    fn seekable(&self) -> bool;
}

/// In-process [`ByteSource`] over any `Read + Seek`, e.g. `std::fs::File` or
/// `std::io::Cursor<Vec<u8>>`.
pub struct IoByteSource<R>(R);

impl<R> IoByteSource<R> {
    pub fn new(inner: R) -> Self {
        Self(inner)
    }
}

impl<R: Read + Seek> ByteSource for IoByteSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
    fn tell(&mut self) -> io::Result<u64> {
        self.0.stream_position()
    }
    fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.0.seek(SeekFrom::Start(offset)).map(|_| ())
    }
    fn seekable(&self) -> bool {
        true
    }
}

/// In-process [`ByteSink`] over any `Write + Seek`.
pub struct IoByteSink<W>(W);

impl<W> IoByteSink<W> {
    pub fn new(inner: W) -> Self {
        Self(inner)
    }

    pub fn into_inner(self) -> W {
        self.0
    }
}

impl<W: Write + Seek> ByteSink for IoByteSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }
    fn tell(&mut self) -> io::Result<u64> {
        self.0.stream_position()
    }
    fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.0.seek(SeekFrom::Start(offset)).map(|_| ())
    }
    fn seekable(&self) -> bool {
        true
    }
}

fn read_all<S: ByteSource + ?Sized>(source: &mut S) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 64 * 1024];
    loop {
        let n = source.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
    }
    Ok(out)
}

fn write_all<S: ByteSink + ?Sized>(sink: &mut S, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        let n = sink.write(buf)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "sink accepted 0 bytes"));
        }
        buf = &buf[n..];
    }
    Ok(())
}

#[tracing::instrument(skip_all)]
pub(crate) fn save(engine: &Engine, sink: &mut impl ByteSink) -> Result<()> {
    let body = encode_body(engine);
    let crc = crc32fast::hash(&body);
    let mut framed = body;
    framed.extend_from_slice(&crc.to_le_bytes());
    write_all(sink, &framed)?;
    Ok(())
}

fn encode_body(engine: &Engine) -> Vec<u8> {
    let graph = engine.graph();
    let m = engine.m();
    let n = graph.len();

    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.push(engine.space().tag());
    buf.push(graph.storage().tag());
    buf.extend_from_slice(&(graph.dim() as u32).to_le_bytes());
    buf.extend_from_slice(&(m as u64).to_le_bytes());
    buf.extend_from_slice(&(engine.ef_construction() as u64).to_le_bytes());
    buf.extend_from_slice(&(graph.max_elements() as u64).to_le_bytes());
    buf.extend_from_slice(&(n as u64).to_le_bytes());
    let entry = engine.entry_point().map(|id| id as u64).unwrap_or(u64::MAX);
    buf.extend_from_slice(&entry.to_le_bytes());
    buf.extend_from_slice(&engine.max_level().to_le_bytes());
    buf.extend_from_slice(&engine.rng_state().to_le_bytes());

    for id in 0..n {
        let node = graph.node(id);
        buf.extend_from_slice(&node.level().to_le_bytes());
        buf.extend_from_slice(&node.label().to_le_bytes());
        buf.push(node.is_deleted() as u8);

        let layer0 = node.neighbors_at(0);
        buf.extend_from_slice(&(layer0.len() as u16).to_le_bytes());
        for i in 0..2 * m {
            buf.extend_from_slice(&layer0.get(i).copied().unwrap_or(0).to_le_bytes());
        }
        for layer in 1..=node.level() {
            let neighbors = node.neighbors_at(layer);
            buf.extend_from_slice(&(neighbors.len() as u16).to_le_bytes());
            for i in 0..m {
                buf.extend_from_slice(&neighbors.get(i).copied().unwrap_or(0).to_le_bytes());
            }
        }

        buf.extend_from_slice(&node.vector_payload());
    }

    buf
}

#[tracing::instrument(skip_all)]
pub(crate) fn load(source: &mut impl ByteSource) -> Result<Engine> {
    let bytes = read_all(source)?;
    parse(&bytes)
}

struct Reader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(bytes),
        }
    }

    fn bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.cursor
            .read_exact(&mut buf)
            .map_err(|_| Error::FormatError("unexpected end of file".to_string()))?;
        Ok(buf)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.bytes(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.bytes(8)?.try_into().unwrap()))
    }
}

fn parse(bytes: &[u8]) -> Result<Engine> {
    if bytes.len() < 4 {
        return Err(Error::FormatError("file too small to contain a header".to_string()));
    }
    let (body, trailer) = bytes.split_at(bytes.len() - 4);
    let stored_crc = u32::from_le_bytes(trailer.try_into().unwrap());
    let computed_crc = crc32fast::hash(body);
    if stored_crc != computed_crc {
        return Err(Error::FormatError("CRC-32 mismatch".to_string()));
    }

    let mut r = Reader::new(body);
    let magic = r.bytes(4)?;
    if magic.as_slice() != MAGIC.as_slice() {
        return Err(Error::FormatError("bad magic bytes".to_string()));
    }
    let version = r.u32()?;
    if version != FORMAT_VERSION {
        return Err(Error::FormatError(format!("unsupported format version {version}")));
    }
    let space = Space::from_tag(r.u8()?).ok_or_else(|| Error::FormatError("bad space tag".to_string()))?;
    let storage =
        Storage::from_tag(r.u8()?).ok_or_else(|| Error::FormatError("bad storage tag".to_string()))?;
    let dim = r.u32()? as usize;
    if dim == 0 {
        return Err(Error::FormatError("dimension is zero".to_string()));
    }
    let m = r.u64()? as usize;
    if m == 0 {
        return Err(Error::FormatError("M is zero".to_string()));
    }
    let ef_construction = r.u64()? as usize;
    let max_elements_raw = r.u64()?;
    let n_raw = r.u64()?;
    let entry_raw = r.u64()?;
    let max_level = r.u32()?;
    let rng_state = r.u64()?;

    if n_raw > u32::MAX as u64 {
        return Err(Error::FormatError("node count exceeds supported range".to_string()));
    }
    let n = n_raw as u32;
    if entry_raw != u64::MAX && entry_raw >= n as u64 {
        return Err(Error::FormatError("entry point out of range".to_string()));
    }
    let max_elements = (max_elements_raw.max(n_raw)).min(u32::MAX as u64) as u32;

    let graph = Graph::new(dim, storage, max_elements);
    let element_size = storage.element_size();

    for id in 0..n {
        let level = r.u32()?;
        let label = r.u64()?;
        let deleted = r.u8()? != 0;

        let mut layers: Vec<Vec<u32>> = Vec::with_capacity(level as usize + 1);
        let count0 = r.u16()? as usize;
        let mut layer0 = Vec::with_capacity(2 * m);
        for _ in 0..2 * m {
            layer0.push(r.u32()?);
        }
        layer0.truncate(count0.min(2 * m));
        for &neighbor in &layer0 {
            if neighbor >= n {
                return Err(Error::FormatError("neighbor id out of range".to_string()));
            }
        }
        layers.push(layer0);

        for _ in 1..=level {
            let count = r.u16()? as usize;
            let mut layer = Vec::with_capacity(m);
            for _ in 0..m {
                layer.push(r.u32()?);
            }
            layer.truncate(count.min(m));
            for &neighbor in &layer {
                if neighbor >= n {
                    return Err(Error::FormatError("neighbor id out of range".to_string()));
                }
            }
            layers.push(layer);
        }

        let payload = r.bytes(dim * element_size)?;
        let allocated = graph.allocate(level, label, payload);
        debug_assert_eq!(allocated, id);
        if deleted {
            graph.node(allocated).set_deleted(true);
        }
        for (layer_idx, neighbors) in layers.into_iter().enumerate() {
            graph.node(allocated).set_neighbors_at(layer_idx as u32, neighbors);
        }
    }

    let entry_point = if entry_raw == u64::MAX {
        None
    } else {
        Some(entry_raw as u32)
    };
    // ef_default isn't part of the wire format (it's mutable, ambient
    // runtime state); restore the same "unset" sentinel a fresh `Config`
    // build starts with (lib.rs), so a loaded index falls back to `k` on
    // query exactly as the index that was saved did.
    let ef_default = 0;
    Ok(Engine::from_parts(
        graph,
        space,
        m,
        ef_construction,
        ef_default,
        rng_state,
        entry_point,
        max_level,
    ))
}
