//! Counter log framing.
//!
//! ```text
//! +-------+---------+------+-------------+-----------------+-------+
//! | magic | version | kind | payload len | payload (CBOR)  | crc32 |
//! |  4 B  |  u16 LE | u8   |   u32 LE    | CounterRecord   | u32 LE|
//! +-------+---------+------+-------------+-----------------+-------+
//! ```
//!
//! The CRC covers everything before it.

use crate::error::{CoreError, CoreResult};
use crate::types::CounterRecord;

/// Magic bytes opening every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"ACTR";

/// Current frame format version.
pub const FRAME_VERSION: u16 = 1;

/// Bytes before the payload.
pub const HEADER_LEN: usize = 4 + 2 + 1 + 4;

/// Bytes after the payload.
pub const TRAILER_LEN: usize = 4;

/// What a frame records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// A counter row was created.
    Insert = 1,
    /// A counter row took a new value.
    Set = 2,
}

impl FrameKind {
    /// Parses a kind byte.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Insert),
            2 => Some(Self::Set),
            _ => None,
        }
    }
}

/// Encodes one frame.
///
/// # Errors
///
/// Returns [`CoreError::LogCorruption`] if the record cannot be serialized.
pub fn encode_frame(kind: FrameKind, record: &CounterRecord) -> CoreResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(record, &mut payload)
        .map_err(|e| CoreError::log_corruption(0, format!("cannot encode {}: {e}", record.key)))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::log_corruption(0, "counter record larger than 4 GiB"))?;

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&FRAME_VERSION.to_le_bytes());
    frame.push(kind as u8);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    let crc = compute_crc32(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// A decoded frame and where it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Offset of the frame's first byte.
    pub offset: u64,
    /// Frame kind.
    pub kind: FrameKind,
    /// Decoded record.
    pub record: CounterRecord,
}

/// Outcome of scanning a whole log.
#[derive(Debug, Clone, Default)]
pub struct Scan {
    /// Complete frames, in log order.
    pub frames: Vec<Frame>,
    /// Length of the prefix made of complete frames.
    pub valid_len: u64,
    /// Bytes after `valid_len` belonging to an unfinished frame.
    pub torn_bytes: u64,
}

/// Decodes every frame in `bytes`.
///
/// A trailing frame cut short by a crash ends the scan and is reported in
/// [`Scan::torn_bytes`].
///
/// # Errors
///
/// Returns [`CoreError::LogCorruption`] for a complete frame with a bad
/// magic, version, kind or payload, and [`CoreError::ChecksumMismatch`] when
/// its CRC does not match.
pub fn scan_frames(bytes: &[u8]) -> CoreResult<Scan> {
    let mut scan = Scan::default();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let offset = pos as u64;
        let rest = &bytes[pos..];
        if rest.len() < HEADER_LEN {
            break;
        }
        if rest[0..4] != FRAME_MAGIC {
            return Err(CoreError::log_corruption(offset, "bad frame magic"));
        }
        let version = u16::from_le_bytes([rest[4], rest[5]]);
        if version != FRAME_VERSION {
            return Err(CoreError::log_corruption(
                offset,
                format!("unsupported frame version {version}"),
            ));
        }
        let kind = FrameKind::from_byte(rest[6]).ok_or_else(|| {
            CoreError::log_corruption(offset, format!("unknown frame kind {}", rest[6]))
        })?;
        let len = u32::from_le_bytes([rest[7], rest[8], rest[9], rest[10]]) as usize;
        let total = HEADER_LEN + len + TRAILER_LEN;
        if rest.len() < total {
            break;
        }

        let body_end = HEADER_LEN + len;
        let stored = u32::from_le_bytes([
            rest[body_end],
            rest[body_end + 1],
            rest[body_end + 2],
            rest[body_end + 3],
        ]);
        let computed = compute_crc32(&rest[..body_end]);
        if stored != computed {
            return Err(CoreError::ChecksumMismatch {
                offset,
                expected: stored,
                actual: computed,
            });
        }

        let record: CounterRecord = ciborium::from_reader(&rest[HEADER_LEN..body_end])
            .map_err(|e| CoreError::log_corruption(offset, format!("bad payload: {e}")))?;
        scan.frames.push(Frame {
            offset,
            kind,
            record,
        });
        pos += total;
    }

    scan.valid_len = pos as u64;
    scan.torn_bytes = (bytes.len() - pos) as u64;
    Ok(scan)
}

/// CRC-32 (IEEE).
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}
