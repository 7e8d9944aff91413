//! Duration estimation for MPEG audio streams.
//!
//! Reads only the leading region of the file: the ID3v2 header, the first
//! frame header and, when present, the Xing/Info frame count. Files without a
//! VBR header are treated as constant bitrate.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::MetadataError;

const SCAN_WINDOW: usize = 64 * 1024;
const ID3V2_HEADER_LEN: u64 = 10;
const ID3V1_LEN: u64 = 128;

const MPEG1_L3_KBPS: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const MPEG2_L3_KBPS: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];
const MPEG1_RATES: [u32; 3] = [44100, 48000, 32000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

/// A decoded Layer III frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub padding: bool,
    pub mono: bool,
}

impl FrameHeader {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] & 0xE0 != 0xE0 {
            return None;
        }
        let version = match (bytes[1] >> 3) & 0x03 {
            0 => MpegVersion::Mpeg25,
            2 => MpegVersion::Mpeg2,
            3 => MpegVersion::Mpeg1,
            _ => return None,
        };
        // layer III only
        if (bytes[1] >> 1) & 0x03 != 1 {
            return None;
        }
        let bitrate_index = usize::from(bytes[2] >> 4);
        if bitrate_index == 0 || bitrate_index >= 15 {
            return None;
        }
        let rate_index = usize::from((bytes[2] >> 2) & 0x03);
        if rate_index >= 3 {
            return None;
        }
        let (bitrate_kbps, sample_rate) = match version {
            MpegVersion::Mpeg1 => (MPEG1_L3_KBPS[bitrate_index], MPEG1_RATES[rate_index]),
            MpegVersion::Mpeg2 => (MPEG2_L3_KBPS[bitrate_index], MPEG1_RATES[rate_index] / 2),
            MpegVersion::Mpeg25 => (MPEG2_L3_KBPS[bitrate_index], MPEG1_RATES[rate_index] / 4),
        };

        Some(Self {
            version,
            bitrate_kbps,
            sample_rate,
            padding: (bytes[2] >> 1) & 0x01 == 1,
            mono: bytes[3] >> 6 == 3,
        })
    }

    pub fn samples_per_frame(&self) -> u32 {
        match self.version {
            MpegVersion::Mpeg1 => 1152,
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => 576,
        }
    }

    pub fn frame_len(&self) -> usize {
        let bytes = self.samples_per_frame() / 8 * self.bitrate_kbps * 1000 / self.sample_rate;
        bytes as usize + usize::from(self.padding)
    }

    fn side_info_len(&self) -> usize {
        match (self.version, self.mono) {
            (MpegVersion::Mpeg1, false) => 32,
            (MpegVersion::Mpeg1, true) => 17,
            (_, false) => 17,
            (_, true) => 9,
        }
    }

    /// Frame count from a Xing/Info header inside this frame, if any.
    fn vbr_frames(&self, frame: &[u8]) -> Option<u32> {
        let at = 4 + self.side_info_len();
        let marker = frame.get(at..at + 4)?;
        if marker != b"Xing" && marker != b"Info" {
            return None;
        }
        let flags = read_u32_be(frame.get(at + 4..at + 8)?);
        if flags & 0x01 == 0 {
            return None;
        }
        let frames = read_u32_be(frame.get(at + 8..at + 12)?);
        if frames == 0 {
            None
        } else {
            Some(frames)
        }
    }
}

/// Estimated playing time in seconds.
pub fn estimate_duration(path: &Path) -> Result<f64, MetadataError> {
    let mut file = File::open(path)?;
    let total_len = file.metadata()?.len();
    estimate_from_reader(&mut file, total_len)
}

pub fn estimate_from_reader<R: Read + Seek>(
    reader: &mut R,
    total_len: u64,
) -> Result<f64, MetadataError> {
    let audio_start = id3v2_len(reader)?;
    let audio_end = total_len.saturating_sub(id3v1_len(reader, total_len)?);
    if audio_start >= audio_end {
        return Err(MetadataError::Estimate("no audio after tags".to_string()));
    }

    reader.seek(SeekFrom::Start(audio_start))?;
    let window = (audio_end - audio_start).min(SCAN_WINDOW as u64) as usize;
    let mut buf = vec![0u8; window];
    reader.read_exact(&mut buf)?;

    let (offset, header) = find_first_frame(&buf)
        .ok_or_else(|| MetadataError::Estimate("no frame sync found".to_string()))?;

    let first_frame = &buf[offset..buf.len().min(offset + header.frame_len())];
    if let Some(frames) = header.vbr_frames(first_frame) {
        let samples = u64::from(frames) * u64::from(header.samples_per_frame());
        return Ok(samples as f64 / f64::from(header.sample_rate));
    }

    let audio_bytes = audio_end - audio_start - offset as u64;
    Ok(audio_bytes as f64 * 8.0 / (f64::from(header.bitrate_kbps) * 1000.0))
}

fn id3v2_len<R: Read + Seek>(reader: &mut R) -> Result<u64, MetadataError> {
    reader.seek(SeekFrom::Start(0))?;
    let mut header = [0u8; ID3V2_HEADER_LEN as usize];
    if reader.read_exact(&mut header).is_err() || &header[..3] != b"ID3" {
        return Ok(0);
    }
    let size = header[6..10]
        .iter()
        .fold(0u64, |acc, byte| (acc << 7) | u64::from(byte & 0x7F));
    let footer = if header[5] & 0x10 != 0 {
        ID3V2_HEADER_LEN
    } else {
        0
    };
    Ok(ID3V2_HEADER_LEN + size + footer)
}

fn id3v1_len<R: Read + Seek>(reader: &mut R, total_len: u64) -> Result<u64, MetadataError> {
    if total_len < ID3V1_LEN {
        return Ok(0);
    }
    reader.seek(SeekFrom::Start(total_len - ID3V1_LEN))?;
    let mut marker = [0u8; 3];
    reader.read_exact(&mut marker)?;
    Ok(if &marker == b"TAG" { ID3V1_LEN } else { 0 })
}

/// First offset holding a frame header that is followed by another valid
/// header (or by the end of the scan window).
fn find_first_frame(buf: &[u8]) -> Option<(usize, FrameHeader)> {
    let mut pos = 0;
    while pos + 4 <= buf.len() {
        if let Some(header) = FrameHeader::parse(&buf[pos..]) {
            let next = pos + header.frame_len();
            let confirmed = match buf.get(next..next + 4) {
                Some(bytes) => FrameHeader::parse(bytes).is_some(),
                None => true,
            };
            if confirmed {
                return Some((pos, header));
            }
        }
        pos += 1;
    }
    None
}

fn read_u32_be(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
