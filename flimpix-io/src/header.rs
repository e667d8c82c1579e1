//! PTU and PT3 container header parsing.
//!
//! Both containers carry the same logical configuration: image dimensions,
//! marker codes, TCSPC resolution and the record count. The PTU format is a
//! self-describing tagged header; PT3 is a fixed binary layout with an
//! appended imaging header. Everything read is also rendered into a textual
//! metadata blob for display alongside the images.

use crate::{Error, Result};
use flimpix_core::{normalize_markers, AcquisitionConfig, Error as CoreError, RecordFormat};
use flimpix_tttr::record_format_from_code;
use std::fmt::Write as _;

/// PTU magic identifier, first 8 bytes of the file.
pub const PTU_MAGIC: &[u8] = b"PQTTTR";
/// PT3 magic identifier, start of the 16-byte ident field.
pub const PT3_MAGIC: &[u8] = b"PicoHarp 300";

/// Parsed container header.
#[derive(Debug, Clone)]
pub struct FileHeader {
    /// Configuration consumed by both decode passes.
    pub config: AcquisitionConfig,
    /// Human-readable rendering of every header field, for display.
    pub info: String,
    /// Byte offset of the first 32-bit record.
    pub data_offset: usize,
}

/// Bounds-checked little-endian reader over the header bytes.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(Error::TruncatedHeader)?;
        let slice = self.data.get(self.pos..end).ok_or(Error::TruncatedHeader)?;
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Fixed-width ASCII field, trimmed of NUL padding and whitespace.
    fn ascii(&mut self, n: usize) -> Result<String> {
        let bytes = self.take(n)?;
        Ok(String::from_utf8_lossy(bytes)
            .trim_matches(['\0', ' ', '\r', '\n'])
            .to_string())
    }

    fn i32(&mut self) -> Result<i32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().map_err(|_| Error::TruncatedHeader)?;
        Ok(i32::from_le_bytes(bytes))
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().map_err(|_| Error::TruncatedHeader)?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn i64(&mut self) -> Result<i64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().map_err(|_| Error::TruncatedHeader)?;
        Ok(i64::from_le_bytes(bytes))
    }

    fn f32(&mut self) -> Result<f32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().map_err(|_| Error::TruncatedHeader)?;
        Ok(f32::from_le_bytes(bytes))
    }

    fn f64(&mut self) -> Result<f64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().map_err(|_| Error::TruncatedHeader)?;
        Ok(f64::from_le_bytes(bytes))
    }
}

/// PTU tag type codes.
mod tag_type {
    pub const EMPTY8: u32 = 0xFFFF_0008;
    pub const BOOL8: u32 = 0x0000_0008;
    pub const INT8: u32 = 0x1000_0008;
    pub const BITSET64: u32 = 0x1100_0008;
    pub const COLOR8: u32 = 0x1200_0008;
    pub const FLOAT8: u32 = 0x2000_0008;
    pub const TDATETIME: u32 = 0x2100_0008;
    pub const FLOAT8_ARRAY: u32 = 0x2001_FFFF;
    pub const ANSI_STRING: u32 = 0x4001_FFFF;
    pub const WIDE_STRING: u32 = 0x4002_FFFF;
    pub const BINARY_BLOB: u32 = 0xFFFF_FFFF;
}

/// One decoded PTU tag value.
enum TagValue {
    Empty,
    Int(i64),
    Float(f64),
    Text(String),
    Skipped(&'static str, i64),
}

fn read_tag_value(cursor: &mut Cursor<'_>, name: &str, type_code: u32) -> Result<TagValue> {
    use tag_type::{
        ANSI_STRING, BINARY_BLOB, BITSET64, BOOL8, COLOR8, EMPTY8, FLOAT8, FLOAT8_ARRAY, INT8,
        TDATETIME, WIDE_STRING,
    };
    match type_code {
        EMPTY8 => {
            cursor.skip(8)?;
            Ok(TagValue::Empty)
        }
        BOOL8 | INT8 | BITSET64 | COLOR8 => Ok(TagValue::Int(cursor.i64()?)),
        FLOAT8 | TDATETIME => Ok(TagValue::Float(cursor.f64()?)),
        ANSI_STRING | WIDE_STRING => {
            let len = usize::try_from(cursor.i64()?).map_err(|_| Error::TruncatedHeader)?;
            let bytes = cursor.take(len)?;
            Ok(TagValue::Text(
                String::from_utf8_lossy(bytes)
                    .trim_matches(['\0', ' '])
                    .to_string(),
            ))
        }
        FLOAT8_ARRAY => {
            let len = usize::try_from(cursor.i64()?).map_err(|_| Error::TruncatedHeader)?;
            cursor.skip(len)?;
            Ok(TagValue::Skipped("float array", (len / 8) as i64))
        }
        BINARY_BLOB => {
            let len = usize::try_from(cursor.i64()?).map_err(|_| Error::TruncatedHeader)?;
            cursor.skip(len)?;
            Ok(TagValue::Skipped("binary blob", len as i64))
        }
        other => Err(Error::UnknownTagType {
            name: name.to_string(),
            type_code: other,
        }),
    }
}

/// Parses a tagged PTU header and returns the configuration, the metadata
/// blob and the offset of the data section.
///
/// # Errors
/// Fails on a wrong magic identifier, a truncated or unparseable header, an
/// unsupported record type, or when the imaging tags (`ImgHdr_PixX/PixY`)
/// are absent, which means the file carries no scan geometry.
pub fn parse_ptu_header(data: &[u8]) -> Result<FileHeader> {
    let mut cursor = Cursor::new(data);

    let ident = cursor.ascii(8)?;
    if ident.as_bytes() != PTU_MAGIC {
        return Err(Error::InvalidMagic(ident));
    }
    let version = cursor.ascii(8)?;

    let mut info = String::new();
    let _ = writeln!(info, "Ident: {ident}");
    let _ = writeln!(info, "Tag version: {version}");

    let mut record_format: Option<RecordFormat> = None;
    let mut width: i64 = 0;
    let mut height: i64 = 0;
    let mut pixel_size_um: f64 = 0.0;
    let mut resolution_ns: f64 = 0.0;
    let mut record_count: i64 = 0;
    let mut line_start: i64 = 0;
    let mut line_stop: i64 = 0;
    let mut frame: i64 = 0;

    loop {
        let name = cursor.ascii(32)?;
        let index = cursor.i32()?;
        let type_code = cursor.u32()?;
        let value = read_tag_value(&mut cursor, &name, type_code)?;

        match index {
            idx if idx > -1 => {
                let _ = write!(info, "{name}({idx}): ");
            }
            _ => {
                let _ = write!(info, "{name}: ");
            }
        }
        match &value {
            TagValue::Empty => info.push_str("<empty>\n"),
            TagValue::Int(v) => {
                let _ = writeln!(info, "{v}");
            }
            TagValue::Float(v) => {
                let _ = writeln!(info, "{v}");
            }
            TagValue::Text(v) => {
                let _ = writeln!(info, "{v}");
            }
            TagValue::Skipped(kind, n) => {
                let _ = writeln!(info, "<{kind}, {n} entries>");
            }
        }

        match (name.as_str(), &value) {
            ("Header_End", _) => break,
            ("ImgHdr_PixX", TagValue::Int(v)) => width = *v,
            ("ImgHdr_PixY", TagValue::Int(v)) => height = *v,
            ("ImgHdr_PixResol", TagValue::Float(v)) => pixel_size_um = *v,
            ("ImgHdr_LineStart", TagValue::Int(v)) => line_start = *v,
            ("ImgHdr_LineStop", TagValue::Int(v)) => line_stop = *v,
            ("ImgHdr_Frame", TagValue::Int(v)) => frame = *v,
            ("MeasDesc_Resolution", TagValue::Float(v)) => resolution_ns = *v * 1e9,
            ("TTResult_NumberOfRecords", TagValue::Int(v)) => record_count = *v,
            ("TTResultFormat_TTTRRecType", TagValue::Int(v)) => {
                record_format = Some(record_format_from_code(*v)?);
            }
            _ => {}
        }
    }

    let record_format = record_format
        .map_or_else(|| record_format_from_code(0), Ok)
        .map_err(Error::Record)?;
    if width <= 0 || height <= 0 {
        return Err(CoreError::MissingImagingHeader.into());
    }

    let (line_start_marker, line_stop_marker, frame_marker) =
        normalize_markers(record_format, line_start, line_stop, frame);

    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let config = AcquisitionConfig {
        record_format,
        width: width as usize,
        height: height as usize,
        pixel_size_um,
        time_resolution_ns: resolution_ns as f32,
        line_start_marker,
        line_stop_marker,
        frame_marker,
        record_count: record_count.max(0) as usize,
    };

    Ok(FileHeader {
        config,
        info,
        data_offset: cursor.pos,
    })
}

/// Parses a legacy fixed-layout PT3 header.
///
/// The layout is a sequence of fixed-width fields; only the ones feeding the
/// configuration or worth showing to the user are kept, the rest is skipped
/// by size. The imaging header length comes last and determines the data
/// offset.
///
/// # Errors
/// Fails on a wrong magic identifier, a format version other than 2.0, a
/// truncated header, or a zero-length imaging header (not a FLIM file).
pub fn parse_pt3_header(data: &[u8]) -> Result<FileHeader> {
    let mut cursor = Cursor::new(data);
    let mut info = String::new();

    let ident = cursor.ascii(16)?;
    if !ident.as_bytes().starts_with(PT3_MAGIC) {
        return Err(Error::InvalidMagic(ident));
    }
    let version = cursor.ascii(6)?;
    if version != "2.0" {
        return Err(Error::UnsupportedVersion(version));
    }
    let creator = cursor.ascii(18)?;
    let creator_version = cursor.ascii(12)?;
    let file_time = cursor.ascii(18)?;
    cursor.skip(2)?;
    let comment = cursor.ascii(256)?;
    let _ = writeln!(info, "Ident: {ident}");
    let _ = writeln!(info, "Format version: {version}");
    let _ = writeln!(info, "Creator: {creator} {creator_version}");
    let _ = writeln!(info, "File time: {file_time}");
    let _ = writeln!(info, "Comment: {comment}");

    // Curves, bits per record, routing channels, boards, active curve,
    // measurement mode, sub-mode, range, offset.
    cursor.skip(9 * 4)?;
    let acquisition_time_ms = cursor.i32()?;
    let _ = writeln!(info, "Acquisition time (ms): {acquisition_time_ms}");
    // Stop conditions and display parameters.
    cursor.skip(6 * 4)?;
    cursor.skip(108)?;
    // Repeat parameters and script name.
    cursor.skip(4 * 4)?;
    cursor.skip(20)?;

    let hardware = cursor.ascii(16)?;
    let hardware_version = cursor.ascii(8)?;
    let _ = writeln!(info, "Hardware: {hardware} {hardware_version}");
    // Serial, sync divider, CFD settings.
    cursor.skip(6 * 4)?;
    let resolution_ns = cursor.f32()?;
    let _ = writeln!(info, "Resolution (ns): {resolution_ns}");
    // Router settings.
    cursor.skip(104)?;

    // External devices and reserved words.
    cursor.skip(3 * 4)?;
    let count_rate_0 = cursor.i32()?;
    let count_rate_1 = cursor.i32()?;
    let _ = writeln!(info, "Count rates (Hz): {count_rate_0} / {count_rate_1}");
    // Stop-after and stop reason.
    cursor.skip(2 * 4)?;
    let record_count = cursor.i32()?;
    let _ = writeln!(info, "Records: {record_count}");
    let imaging_header_len = cursor.i32()?;
    let _ = writeln!(info, "Imaging header size (words): {imaging_header_len}");

    // A PT3 file without an imaging header is a point measurement, not an
    // image.
    if imaging_header_len < 8 {
        return Err(CoreError::MissingImagingHeader.into());
    }
    let imaging_header_len = imaging_header_len as usize;

    // Dimensions and imaging ident.
    cursor.skip(2 * 4)?;
    let frame = cursor.i32()?;
    let line_start = cursor.i32()?;
    let line_stop = cursor.i32()?;
    let _ = writeln!(
        info,
        "Markers: frame {frame}, line start {line_start}, line stop {line_stop}"
    );
    // Scan pattern byte and padding.
    cursor.skip(4)?;
    let width = cursor.i32()?;
    let height = cursor.i32()?;
    let _ = writeln!(info, "Image size (px): {width} x {height}");
    cursor.skip((imaging_header_len - 8) * 4)?;

    let record_format = RecordFormat::PicoHarpT3;
    let (line_start_marker, line_stop_marker, frame_marker) = normalize_markers(
        record_format,
        i64::from(line_start),
        i64::from(line_stop),
        i64::from(frame),
    );

    #[allow(clippy::cast_sign_loss)]
    let config = AcquisitionConfig {
        record_format,
        width: width.max(0) as usize,
        height: height.max(0) as usize,
        // PT3 carries no pixel size.
        pixel_size_um: 0.0,
        time_resolution_ns: resolution_ns,
        line_start_marker,
        line_stop_marker,
        frame_marker,
        record_count: record_count.max(0) as usize,
    };

    Ok(FileHeader {
        config,
        info,
        data_offset: cursor.pos,
    })
}

/// Parses whichever container the magic identifier announces.
///
/// # Errors
/// `Error::InvalidMagic` when the file starts with neither identifier, plus
/// whatever the matching parser reports.
pub fn parse_header(data: &[u8]) -> Result<FileHeader> {
    if data.starts_with(PTU_MAGIC) {
        parse_ptu_header(data)
    } else if data.starts_with(PT3_MAGIC) {
        parse_pt3_header(data)
    } else {
        let head = data.get(..8).unwrap_or(data);
        Err(Error::InvalidMagic(
            String::from_utf8_lossy(head).trim_matches('\0').to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_tag_header(buf: &mut Vec<u8>, name: &str, index: i32, type_code: u32) {
        let mut field = [0u8; 32];
        field[..name.len()].copy_from_slice(name.as_bytes());
        buf.extend_from_slice(&field);
        buf.extend_from_slice(&index.to_le_bytes());
        buf.extend_from_slice(&type_code.to_le_bytes());
    }

    fn push_int_tag(buf: &mut Vec<u8>, name: &str, value: i64) {
        push_tag_header(buf, name, -1, tag_type::INT8);
        buf.extend_from_slice(&value.to_le_bytes());
    }

    fn push_float_tag(buf: &mut Vec<u8>, name: &str, value: f64) {
        push_tag_header(buf, name, -1, tag_type::FLOAT8);
        buf.extend_from_slice(&value.to_le_bytes());
    }

    fn push_string_tag(buf: &mut Vec<u8>, name: &str, value: &str) {
        push_tag_header(buf, name, -1, tag_type::ANSI_STRING);
        buf.extend_from_slice(&(value.len() as i64).to_le_bytes());
        buf.extend_from_slice(value.as_bytes());
    }

    fn push_end(buf: &mut Vec<u8>) {
        push_tag_header(buf, "Header_End", -1, tag_type::EMPTY8);
        buf.extend_from_slice(&[0u8; 8]);
    }

    fn ptu_preamble() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"PQTTTR\0\0");
        buf.extend_from_slice(b"1.0.00\0\0");
        buf
    }

    fn minimal_ptu() -> Vec<u8> {
        let mut buf = ptu_preamble();
        push_string_tag(&mut buf, "File_Comment", "synthetic test file");
        push_int_tag(&mut buf, "TTResultFormat_TTTRRecType", 0x0001_0303);
        push_int_tag(&mut buf, "TTResult_NumberOfRecords", 1000);
        push_float_tag(&mut buf, "MeasDesc_Resolution", 16e-12);
        push_int_tag(&mut buf, "ImgHdr_PixX", 256);
        push_int_tag(&mut buf, "ImgHdr_PixY", 128);
        push_float_tag(&mut buf, "ImgHdr_PixResol", 0.4);
        push_int_tag(&mut buf, "ImgHdr_LineStart", 1);
        push_int_tag(&mut buf, "ImgHdr_LineStop", 2);
        push_int_tag(&mut buf, "ImgHdr_Frame", 3);
        push_end(&mut buf);
        buf
    }

    #[test]
    fn test_ptu_header_fields() {
        let buf = minimal_ptu();
        let header = parse_ptu_header(&buf).unwrap();
        assert_eq!(header.data_offset, buf.len());

        let config = &header.config;
        assert_eq!(config.record_format, RecordFormat::PicoHarpT3);
        assert_eq!((config.width, config.height), (256, 128));
        assert!((config.pixel_size_um - 0.4).abs() < 1e-12);
        // 16 ps per bin.
        assert!((config.time_resolution_ns - 0.016).abs() < 1e-6);
        assert_eq!(config.record_count, 1000);
        assert_eq!(config.line_start_marker, 1);
        assert_eq!(config.line_stop_marker, 2);
        // Frame code 3 is clamped to 4 on PicoHarp files.
        assert_eq!(config.frame_marker, Some(4));

        assert!(header.info.contains("synthetic test file"));
    }

    #[test]
    fn test_ptu_wrong_magic() {
        let err = parse_ptu_header(b"NOTPQTTRxxxxxxxx").unwrap_err();
        assert!(matches!(err, Error::InvalidMagic(_)));
    }

    #[test]
    fn test_ptu_t2_rejected() {
        let mut buf = ptu_preamble();
        push_int_tag(&mut buf, "TTResultFormat_TTTRRecType", 0x0001_0203);
        push_end(&mut buf);
        let err = parse_ptu_header(&buf).unwrap_err();
        assert!(matches!(
            err,
            Error::Record(flimpix_tttr::Error::T2ModeUnsupported(_))
        ));
    }

    #[test]
    fn test_ptu_missing_imaging_tags() {
        let mut buf = ptu_preamble();
        push_int_tag(&mut buf, "TTResultFormat_TTTRRecType", 0x0001_0303);
        push_end(&mut buf);
        let err = parse_ptu_header(&buf).unwrap_err();
        assert!(matches!(err, Error::Core(CoreError::MissingImagingHeader)));
    }

    #[test]
    fn test_ptu_truncated() {
        let mut buf = minimal_ptu();
        buf.truncate(buf.len() - 20);
        let err = parse_ptu_header(&buf).unwrap_err();
        assert!(matches!(err, Error::TruncatedHeader));
    }

    #[test]
    fn test_ptu_unknown_tag_type() {
        let mut buf = ptu_preamble();
        push_tag_header(&mut buf, "Mystery_Tag", -1, 0x3000_0008);
        buf.extend_from_slice(&[0u8; 8]);
        push_end(&mut buf);
        let err = parse_ptu_header(&buf).unwrap_err();
        assert!(matches!(err, Error::UnknownTagType { .. }));
    }

    fn ascii_field(text: &str, len: usize) -> Vec<u8> {
        let mut field = vec![0u8; len];
        field[..text.len()].copy_from_slice(text.as_bytes());
        field
    }

    /// Builds a minimal PT3 header with an 8-word imaging header.
    fn minimal_pt3() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&ascii_field("PicoHarp 300", 16));
        buf.extend_from_slice(&ascii_field("2.0", 6));
        buf.extend_from_slice(&ascii_field("PT3 test", 18)); // creator
        buf.extend_from_slice(&ascii_field("1.0", 12));
        buf.extend_from_slice(&ascii_field("today", 18));
        buf.extend_from_slice(&[0u8; 2]);
        buf.extend_from_slice(&ascii_field("a comment", 256));
        buf.extend_from_slice(&[0u8; 9 * 4]);
        buf.extend_from_slice(&5000i32.to_le_bytes()); // acquisition time
        buf.extend_from_slice(&[0u8; 6 * 4 + 108 + 4 * 4 + 20]);
        buf.extend_from_slice(&ascii_field("PicoHarp 300", 16));
        buf.extend_from_slice(&ascii_field("2.0", 8));
        buf.extend_from_slice(&[0u8; 6 * 4]);
        buf.extend_from_slice(&0.064f32.to_le_bytes()); // resolution
        buf.extend_from_slice(&[0u8; 104 + 3 * 4]);
        buf.extend_from_slice(&12345i32.to_le_bytes()); // count rate 0
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 2 * 4]);
        buf.extend_from_slice(&777i32.to_le_bytes()); // records
        buf.extend_from_slice(&8i32.to_le_bytes()); // imaging header words
        buf.extend_from_slice(&[0u8; 2 * 4]); // dimensions, ident
        buf.extend_from_slice(&3i32.to_le_bytes()); // frame marker
        buf.extend_from_slice(&1i32.to_le_bytes()); // line start
        buf.extend_from_slice(&2i32.to_le_bytes()); // line stop
        buf.extend_from_slice(&[0u8; 4]); // pattern + padding
        buf.extend_from_slice(&64i32.to_le_bytes()); // width
        buf.extend_from_slice(&32i32.to_le_bytes()); // height
        buf
    }

    #[test]
    fn test_pt3_header_fields() {
        let buf = minimal_pt3();
        let header = parse_pt3_header(&buf).unwrap();
        assert_eq!(header.data_offset, 728 + 8 * 4);
        assert_eq!(header.data_offset, buf.len());

        let config = &header.config;
        assert_eq!(config.record_format, RecordFormat::PicoHarpT3);
        assert_eq!((config.width, config.height), (64, 32));
        assert!((config.time_resolution_ns - 0.064).abs() < 1e-6);
        assert_eq!(config.record_count, 777);
        assert_eq!(config.frame_marker, Some(4));
        assert!(header.info.contains("a comment"));
        assert!(header.info.contains("Records: 777"));
    }

    #[test]
    fn test_pt3_wrong_version() {
        let mut buf = minimal_pt3();
        buf[16..19].copy_from_slice(b"3.0");
        let err = parse_pt3_header(&buf).unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion(_)));
    }

    #[test]
    fn test_pt3_no_imaging_header() {
        let mut buf = minimal_pt3();
        buf.truncate(728);
        buf[724..728].copy_from_slice(&0i32.to_le_bytes());
        let err = parse_pt3_header(&buf).unwrap_err();
        assert!(matches!(err, Error::Core(CoreError::MissingImagingHeader)));
    }

    #[test]
    fn test_sniff_dispatch() {
        assert!(parse_header(&minimal_ptu()).is_ok());
        assert!(parse_header(&minimal_pt3()).is_ok());
        let err = parse_header(b"GARBAGE_FILE____").unwrap_err();
        assert!(matches!(err, Error::InvalidMagic(_)));
    }
}
