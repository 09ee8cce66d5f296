//! H.264 bitstream utilities
//!
//! The wire delivers one encoded access unit per binary message. Decoders
//! want Annex B (start-code delimited) input; senders occasionally ship AVCC
//! (length-prefixed) units instead, so payloads are normalized on the way in.
//! NAL inspection exists for trace logging only.

use std::borrow::Cow;

/// Annex B start code (4-byte form).
const ANNEX_B_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// AVCC length prefix size used when normalizing (the common 4-byte form).
const AVCC_LENGTH_SIZE: usize = 4;

/// NAL unit categories worth telling apart in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    NonIdrSlice,
    IdrSlice,
    Sei,
    Sps,
    Pps,
    Other(u8),
}

impl NalUnitType {
    pub fn from_header(header_byte: u8) -> Self {
        match header_byte & 0x1F {
            1 => Self::NonIdrSlice,
            5 => Self::IdrSlice,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            other => Self::Other(other),
        }
    }

    /// IDR slices start a decodable stream on their own.
    pub fn is_keyframe(&self) -> bool {
        matches!(self, Self::IdrSlice)
    }
}

/// True if the payload already carries Annex B start codes.
pub fn is_annexb(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }
    (data[0] == 0 && data[1] == 0 && data[2] == 0 && data[3] == 1)
        || (data[0] == 0 && data[1] == 0 && data[2] == 1)
}

/// Normalize a payload to Annex B, converting AVCC length prefixes if needed.
///
/// Annex B input is passed through without copying. Input that parses as
/// neither is returned unchanged; the decoder gets to reject it.
pub fn ensure_annexb(data: &[u8]) -> Cow<'_, [u8]> {
    if is_annexb(data) || data.len() < AVCC_LENGTH_SIZE {
        return Cow::Borrowed(data);
    }

    let mut result = Vec::with_capacity(data.len() + 16);
    let mut offset = 0;
    while offset + AVCC_LENGTH_SIZE <= data.len() {
        let nal_len = u32::from_be_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        offset += AVCC_LENGTH_SIZE;

        if nal_len == 0 || offset + nal_len > data.len() {
            // Not a plausible AVCC unit after all.
            return Cow::Borrowed(data);
        }

        result.extend_from_slice(&ANNEX_B_START_CODE);
        result.extend_from_slice(&data[offset..offset + nal_len]);
        offset += nal_len;
    }

    if offset != data.len() {
        return Cow::Borrowed(data);
    }
    Cow::Owned(result)
}

/// Split an Annex B payload into its NAL units (without start codes).
pub fn split_annexb(data: &[u8]) -> Vec<&[u8]> {
    let mut units = Vec::new();
    let mut pos = 0;

    while pos + 3 <= data.len() {
        let start = match find_start_code(&data[pos..]) {
            Some((offset, len)) => pos + offset + len,
            None => break,
        };
        let end = match find_start_code(&data[start..]) {
            Some((offset, _)) => start + offset,
            None => data.len(),
        };
        if end > start {
            units.push(&data[start..end]);
        }
        pos = end;
    }

    units
}

/// True if any NAL unit in the Annex B payload is an IDR slice.
pub fn contains_keyframe(data: &[u8]) -> bool {
    split_annexb(data)
        .iter()
        .filter_map(|nal| nal.first())
        .any(|&header| NalUnitType::from_header(header).is_keyframe())
}

fn find_start_code(data: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if i + 4 <= data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_annexb() {
        assert!(is_annexb(&[0x00, 0x00, 0x00, 0x01, 0x67]));
        assert!(is_annexb(&[0x00, 0x00, 0x01, 0x67]));
        assert!(!is_annexb(&[0x00, 0x00, 0x00, 0x05, 0x67])); // AVCC
        assert!(!is_annexb(&[0x00, 0x00]));
    }

    #[test]
    fn test_ensure_annexb_converts_avcc() {
        // length=5, NAL data = [0x65, 0x42, 0x00, 0x1e, 0x9a]
        let avcc = vec![0x00, 0x00, 0x00, 0x05, 0x65, 0x42, 0x00, 0x1e, 0x9a];
        let annexb = ensure_annexb(&avcc);
        assert_eq!(&annexb[0..4], &[0x00, 0x00, 0x00, 0x01]);
        assert_eq!(&annexb[4..], &[0x65, 0x42, 0x00, 0x1e, 0x9a]);
    }

    #[test]
    fn test_ensure_annexb_passes_through() {
        let annexb = vec![0x00, 0x00, 0x00, 0x01, 0x65, 0x88];
        match ensure_annexb(&annexb) {
            Cow::Borrowed(b) => assert_eq!(b, annexb.as_slice()),
            Cow::Owned(_) => panic!("annexb input should not be copied"),
        }
    }

    #[test]
    fn test_ensure_annexb_rejects_garbage() {
        // Length prefix runs past the end of the buffer.
        let bad = vec![0x00, 0x00, 0x10, 0x00, 0x65];
        match ensure_annexb(&bad) {
            Cow::Borrowed(b) => assert_eq!(b, bad.as_slice()),
            Cow::Owned(_) => panic!("implausible AVCC should pass through"),
        }
    }

    #[test]
    fn test_split_and_classify() {
        let payload = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, // SPS
            0x00, 0x00, 0x01, 0x68, 0xce, // PPS (3-byte start code)
            0x00, 0x00, 0x00, 0x01, 0x65, 0x88, // IDR
        ];
        let units = split_annexb(&payload);
        assert_eq!(units.len(), 3);
        assert_eq!(NalUnitType::from_header(units[0][0]), NalUnitType::Sps);
        assert_eq!(NalUnitType::from_header(units[1][0]), NalUnitType::Pps);
        assert_eq!(NalUnitType::from_header(units[2][0]), NalUnitType::IdrSlice);
        assert!(contains_keyframe(&payload));
    }

    #[test]
    fn test_no_keyframe_in_p_slice() {
        let payload = [0x00, 0x00, 0x00, 0x01, 0x41, 0x9a];
        assert!(!contains_keyframe(&payload));
    }
}
