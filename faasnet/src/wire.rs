//! Frame format for datagrams.
//!
//! Frame format: `[length:4][checksum:4][sequence:8][payload:N]`
//!
//! - **length**: Total frame size including header (little-endian u32)
//! - **checksum**: CRC32C of (sequence + payload)
//! - **sequence**: Per-sender monotonically increasing counter (little-endian u64)
//! - **payload**: One encoded protocol message
//!
//! The sequence number is for tracing only. Receivers never deduplicate or
//! reorder on it.

/// Header size: 4 (length) + 4 (checksum) + 8 (sequence) = 16 bytes.
pub const HEADER_SIZE: usize = 16;

/// Largest frame that fits in a single UDP datagram over IPv4.
pub const MAX_FRAME_SIZE: usize = 65_507;

/// Wire format error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Not enough data to parse the frame.
    #[error("insufficient data: need {needed} bytes, have {have}")]
    InsufficientData {
        /// Minimum bytes required to parse.
        needed: usize,
        /// Actual bytes available.
        have: usize,
    },

    /// Checksum verification failed; the frame was corrupted in flight.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum carried in the header.
        expected: u32,
        /// Checksum computed over the received bytes.
        actual: u32,
    },

    /// Frame exceeds the datagram limit.
    #[error("frame too large: {size} bytes (max {MAX_FRAME_SIZE})")]
    FrameTooLarge {
        /// Total frame size in bytes.
        size: usize,
    },

    /// Length field disagrees with the datagram.
    #[error("invalid frame length {length} for a {actual} byte datagram")]
    InvalidLength {
        /// Length from the header.
        length: u32,
        /// Bytes actually received.
        actual: usize,
    },
}

fn compute_checksum(sequence: u64, payload: &[u8]) -> u32 {
    let crc = crc32c::crc32c(&sequence.to_le_bytes());
    crc32c::crc32c_append(crc, payload)
}

/// Wrap `payload` in a frame tagged with `sequence`.
///
/// # Errors
///
/// Returns `FrameTooLarge` if the frame would not fit in one datagram.
///
/// # Examples
///
/// ```
/// use faasnet::wire::{deserialize_frame, serialize_frame};
///
/// let frame = serialize_frame(7, b"n;sum;").expect("serialize");
/// let (sequence, payload) = deserialize_frame(&frame).expect("deserialize");
/// assert_eq!(sequence, 7);
/// assert_eq!(payload, b"n;sum;");
/// ```
pub fn serialize_frame(sequence: u64, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let size = HEADER_SIZE + payload.len();
    if size > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge { size });
    }

    let mut frame = Vec::with_capacity(size);
    frame.extend_from_slice(&(size as u32).to_le_bytes());
    frame.extend_from_slice(&compute_checksum(sequence, payload).to_le_bytes());
    frame.extend_from_slice(&sequence.to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Validate a frame and return its sequence number and payload.
///
/// # Errors
///
/// - `InsufficientData`: shorter than the header
/// - `InvalidLength`: length field disagrees with the datagram size
/// - `ChecksumMismatch`: the frame was corrupted
pub fn deserialize_frame(data: &[u8]) -> Result<(u64, &[u8]), WireError> {
    if data.len() < HEADER_SIZE {
        return Err(WireError::InsufficientData {
            needed: HEADER_SIZE,
            have: data.len(),
        });
    }

    let length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if length as usize != data.len() {
        return Err(WireError::InvalidLength {
            length,
            actual: data.len(),
        });
    }

    let expected = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    let sequence = u64::from_le_bytes([
        data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
    ]);
    let payload = &data[HEADER_SIZE..];

    let actual = compute_checksum(sequence, payload);
    if actual != expected {
        return Err(WireError::ChecksumMismatch { expected, actual });
    }

    Ok((sequence, payload))
}
