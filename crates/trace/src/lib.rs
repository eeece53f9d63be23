//! Binary tracing for the PTIDES scheduling kernel.
//!
//! The scheduler, the event store and the safe-to-process oracle report what
//! they do as small binary *records*. A record carries a sequence number, a
//! record type (see [`records`]), an optional timestamp and a payload built
//! with [`RecordBuilder`]. The [`Tracer`] frames records and hands the bytes to
//! a [`TraceBackend`]; components only ever see a [`TraceHook`] closure, so
//! tracing stays optional everywhere.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;

mod record;

pub mod records;

pub use record::{
    Field, RecordBuilder, RecordReader, FMT_F64, FMT_I32, FMT_I64, FMT_TAG, FMT_U32, FMT_U8,
};

/// Maximum payload length for a single record (excluding header/checksum).
const DEFAULT_MAX_RECORD_LEN: usize = 96;

/// Largest payload the 16-bit length field can describe.
const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Start-of-frame marker.
const FRAME_START: u8 = 0xA5;

/// Configuration for the tracer.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    /// Payload limit in bytes. Values above `u16::MAX` are capped, the frame
    /// length field being 16 bits wide.
    pub max_record_len: usize,
    pub include_timestamp: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            max_record_len: DEFAULT_MAX_RECORD_LEN,
            include_timestamp: true,
        }
    }
}

/// A single trace record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    pub seq: u16,
    pub record_type: u8,
    pub timestamp: Option<Duration>,
    pub payload: Vec<u8>,
}

/// Errors that can occur while emitting trace data.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),
    #[error("backend error: {0}")]
    Backend(#[from] io::Error),
}

/// Backend trait that consumes framed bytes.
pub trait TraceBackend: Send + Sync {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TraceError>;
}

/// Backend that writes frames to any `Write` implementation.
pub struct WriterBackend<W: Write + Send + 'static> {
    writer: Arc<Mutex<W>>,
}

impl<W: Write + Send + 'static> WriterBackend<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }
}

impl<W: Write + Send + 'static> TraceBackend for WriterBackend<W> {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TraceError> {
        let mut guard = self.writer.lock();
        guard.write_all(frame).map_err(TraceError::from)
    }
}

/// Backend that keeps every frame in memory.
///
/// Cloning the backend shares the underlying buffer, which lets tests keep a
/// handle while the tracer owns another.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().clone()
    }

    /// Decodes every captured frame.
    pub fn records(&self) -> Result<Vec<TraceRecord>, TraceError> {
        self.frames.lock().iter().map(|f| decode_frame(f)).collect()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }
}

impl TraceBackend for MemoryBackend {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TraceError> {
        self.frames.lock().push(frame.to_vec());
        Ok(())
    }
}

/// Record framer.
///
/// Frame layout: `START | seq:u16 | type:u8 | flags:u8 | [micros:u64] |
/// len:u16 | payload | checksum:u8`, integers little-endian. The checksum is
/// the bitwise complement of the wrapping byte sum of everything between the
/// start marker and the checksum.
pub struct Tracer<B: TraceBackend> {
    backend: B,
    cfg: TraceConfig,
    seq: u16,
    epoch: Instant,
}

#[derive(Clone)]
pub struct TracerHandle<B: TraceBackend> {
    inner: Arc<Mutex<Tracer<B>>>,
}

impl<B: TraceBackend> Tracer<B> {
    pub fn new(cfg: TraceConfig, backend: B) -> Self {
        Self {
            backend,
            cfg,
            seq: 0,
            epoch: Instant::now(),
        }
    }

    pub fn into_handle(self) -> TracerHandle<B> {
        TracerHandle {
            inner: Arc::new(Mutex::new(self)),
        }
    }

    pub fn record(
        &mut self,
        record_type: u8,
        payload: &[u8],
        with_timestamp: bool,
    ) -> Result<TraceRecord, TraceError> {
        let limit = self.cfg.max_record_len.min(MAX_FRAME_PAYLOAD);
        if payload.len() > limit {
            return Err(TraceError::PayloadTooLarge(payload.len()));
        }

        let timestamp = if self.cfg.include_timestamp && with_timestamp {
            Some(self.epoch.elapsed())
        } else {
            None
        };

        self.seq = self.seq.wrapping_add(1);
        log::trace!("trace record type={record_type} len={}", payload.len());
        let record = TraceRecord {
            seq: self.seq,
            record_type,
            timestamp,
            payload: payload.to_vec(),
        };

        let frame = encode_frame(&record);
        self.backend.write_frame(&frame)?;
        Ok(record)
    }
}

impl<B: TraceBackend + 'static> TracerHandle<B> {
    pub fn emit(&self, record_type: u8, payload: &[u8]) -> Result<TraceRecord, TraceError> {
        self.inner.lock().record(record_type, payload, false)
    }

    pub fn emit_with_timestamp(
        &self,
        record_type: u8,
        payload: &[u8],
    ) -> Result<TraceRecord, TraceError> {
        self.inner.lock().record(record_type, payload, true)
    }

    pub fn hook(&self) -> TraceHook {
        let inner = Arc::clone(&self.inner);
        Arc::new(move |record_type, payload, with_timestamp| {
            inner
                .lock()
                .record(record_type, payload, with_timestamp)
                .map(|_| ())
        })
    }
}

pub type TraceHook = Arc<dyn Fn(u8, &[u8], bool) -> Result<(), TraceError> + Send + Sync>;

/// Encodes a record into a frame.
pub fn encode_frame(record: &TraceRecord) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(record.payload.len() + 16);
    bytes.push(FRAME_START);
    bytes.extend_from_slice(&record.seq.to_le_bytes());
    bytes.push(record.record_type);
    match record.timestamp {
        Some(ts) => {
            bytes.push(1);
            bytes.extend_from_slice(&(ts.as_micros() as u64).to_le_bytes());
        }
        None => bytes.push(0),
    }
    bytes.extend_from_slice(&(record.payload.len() as u16).to_le_bytes());
    bytes.extend_from_slice(&record.payload);

    let sum = bytes[1..].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    bytes.push(!sum);
    bytes
}

/// Decodes a single frame produced by [`encode_frame`].
pub fn decode_frame(frame: &[u8]) -> Result<TraceRecord, TraceError> {
    let (&start, rest) = frame
        .split_first()
        .ok_or(TraceError::MalformedFrame("empty frame"))?;
    if start != FRAME_START {
        return Err(TraceError::MalformedFrame("missing start marker"));
    }
    let (&checksum, body) = rest
        .split_last()
        .ok_or(TraceError::MalformedFrame("truncated frame"))?;
    let sum = body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if !sum != checksum {
        return Err(TraceError::MalformedFrame("checksum mismatch"));
    }

    let take = |pos: usize, len: usize| -> Result<&[u8], TraceError> {
        body.get(pos..pos + len)
            .ok_or(TraceError::MalformedFrame("truncated frame"))
    };

    let mut pos = 0;
    let seq = u16::from_le_bytes([take(pos, 2)?[0], take(pos, 2)?[1]]);
    pos += 2;
    let record_type = take(pos, 1)?[0];
    pos += 1;
    let flags = take(pos, 1)?[0];
    pos += 1;
    let timestamp = if flags & 1 != 0 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(take(pos, 8)?);
        pos += 8;
        Some(Duration::from_micros(u64::from_le_bytes(raw)))
    } else {
        None
    };
    let len_bytes = take(pos, 2)?;
    let len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
    pos += 2;
    let payload = take(pos, len)?.to_vec();
    if pos + len != body.len() {
        return Err(TraceError::MalformedFrame("trailing bytes"));
    }

    Ok(TraceRecord {
        seq,
        record_type,
        timestamp,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_captures_decodable_frames() {
        let backend = MemoryBackend::new();
        let tracer = Tracer::new(TraceConfig::default(), backend.clone()).into_handle();

        tracer.emit(records::sched::NEXT, &[1, 2, 3]).unwrap();
        tracer
            .emit_with_timestamp(records::sched::IDLE, &[9])
            .unwrap();

        let decoded = backend.records().unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].seq, 1);
        assert_eq!(decoded[0].record_type, records::sched::NEXT);
        assert_eq!(decoded[0].payload, vec![1, 2, 3]);
        assert!(decoded[0].timestamp.is_none());
        assert_eq!(decoded[1].seq, 2);
        assert!(decoded[1].timestamp.is_some());
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let cfg = TraceConfig {
            max_record_len: 4,
            include_timestamp: false,
        };
        let mut tracer = Tracer::new(cfg, MemoryBackend::new());
        let err = tracer.record(1, &[0; 5], false).unwrap_err();
        assert!(matches!(err, TraceError::PayloadTooLarge(5)));
    }

    #[test]
    fn record_limit_is_capped_by_the_length_field() {
        let cfg = TraceConfig {
            max_record_len: 1 << 20,
            include_timestamp: false,
        };
        let mut tracer = Tracer::new(cfg, MemoryBackend::new());
        let err = tracer.record(1, &vec![0; MAX_FRAME_PAYLOAD + 1], false).unwrap_err();
        assert!(matches!(err, TraceError::PayloadTooLarge(len) if len == MAX_FRAME_PAYLOAD + 1));
        assert!(tracer.record(1, &vec![0; MAX_FRAME_PAYLOAD], false).is_ok());
    }

    /// Writer whose bytes stay readable after the backend takes ownership.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writer_backend_streams_frames() {
        let buf = SharedBuf::default();
        let mut tracer = Tracer::new(TraceConfig::default(), WriterBackend::new(buf.clone()));
        let first = tracer.record(records::queue::INSERT, &[1], false).unwrap();
        let second = tracer.record(records::queue::TAKE, &[2, 3], false).unwrap();

        let bytes = buf.0.lock().clone();
        let split = encode_frame(&first).len();
        assert_eq!(decode_frame(&bytes[..split]).unwrap(), first);
        assert_eq!(decode_frame(&bytes[split..]).unwrap(), second);
    }

    #[test]
    fn corrupted_frame_fails_checksum() {
        let record = TraceRecord {
            seq: 7,
            record_type: records::queue::INSERT,
            timestamp: None,
            payload: vec![0xAA, 0xBB],
        };
        let mut frame = encode_frame(&record);
        assert_eq!(decode_frame(&frame).unwrap(), record);

        let last_payload = frame.len() - 2;
        frame[last_payload] ^= 0xFF;
        assert!(matches!(
            decode_frame(&frame),
            Err(TraceError::MalformedFrame("checksum mismatch"))
        ));
    }

    #[test]
    fn hook_forwards_to_tracer() {
        let backend = MemoryBackend::new();
        let hook = Tracer::new(TraceConfig::default(), backend.clone())
            .into_handle()
            .hook();

        hook(records::safe::SAFE, &[4], false).unwrap();
        hook(records::safe::BLOCKED, &[5], true).unwrap();

        let types: Vec<u8> = backend
            .records()
            .unwrap()
            .into_iter()
            .map(|r| r.record_type)
            .collect();
        assert_eq!(types, vec![records::safe::SAFE, records::safe::BLOCKED]);
    }
}
