//! Capability constraints for link negotiation.
//!
//! Every port carries a [`Caps`] describing the data formats it accepts.
//! Linking two ports requires their caps to intersect; the intersection is
//! stored on the link as the negotiated constraint. A `capsfilter` stage can
//! be inserted purely to pin such a constraint.
//!
//! Caps can also be written as strings, in the conventional
//! `media/type, key=value` form:
//!
//! ```text
//! video/x-raw(memory:NVMM), format=NV12, width=1920, height=1080
//! video/x-h264
//! application/x-rtp, payload=96, clock-rate=90000, encoding-name=H264
//! ```

use crate::error::{Error, Result};
use winnow::Parser;
use winnow::ascii::{digit1, multispace0};
use winnow::combinator::{opt, repeat};
use winnow::error::ContextError;
use winnow::token::take_while;

type WResult<T> = std::result::Result<T, ContextError>;

/// A single constrained value used inside caps.
///
/// Each field of a caps structure can be fixed, a range, a list of
/// alternatives (ordered by preference), or unconstrained.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CapsValue<T> {
    /// Exact value (fully constrained).
    Fixed(T),
    /// Range of acceptable values (inclusive).
    Range {
        /// Minimum acceptable value.
        min: T,
        /// Maximum acceptable value.
        max: T,
    },
    /// List of acceptable values (first is preferred).
    List(Vec<T>),
    /// Any value accepted (unconstrained).
    #[default]
    Any,
}

impl<T: Clone + Ord> CapsValue<T> {
    /// Check if a value is accepted by this constraint.
    pub fn accepts(&self, value: &T) -> bool {
        match self {
            Self::Fixed(v) => v == value,
            Self::Range { min, max } => value >= min && value <= max,
            Self::List(values) => values.contains(value),
            Self::Any => true,
        }
    }

    /// Intersect two constraints, finding common values.
    ///
    /// Returns `None` if there is no overlap.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let result = match (self, other) {
            (Self::Any, other) => other.clone(),
            (this, Self::Any) => this.clone(),

            (Self::Fixed(a), Self::Fixed(b)) => {
                if a == b {
                    Self::Fixed(a.clone())
                } else {
                    return None;
                }
            }

            (Self::Fixed(v), constraint) | (constraint, Self::Fixed(v)) => {
                if constraint.accepts(v) {
                    Self::Fixed(v.clone())
                } else {
                    return None;
                }
            }

            (
                Self::Range {
                    min: amin,
                    max: amax,
                },
                Self::Range {
                    min: bmin,
                    max: bmax,
                },
            ) => {
                let min = amin.max(bmin).clone();
                let max = amax.min(bmax).clone();
                if min > max {
                    return None;
                }
                Self::Range { min, max }
            }

            (Self::List(values), range @ Self::Range { .. })
            | (range @ Self::Range { .. }, Self::List(values)) => {
                let common: Vec<T> = values
                    .iter()
                    .filter(|v| range.accepts(v))
                    .cloned()
                    .collect();
                Self::List(common)
            }

            (Self::List(a), Self::List(b)) => {
                let common: Vec<T> = a.iter().filter(|v| b.contains(v)).cloned().collect();
                Self::List(common)
            }
        };

        // Normalize degenerate lists.
        match result {
            Self::List(values) if values.is_empty() => None,
            Self::List(mut values) if values.len() == 1 => Some(Self::Fixed(values.remove(0))),
            other => Some(other),
        }
    }

    /// Fixate to a single concrete value, if constrained enough.
    ///
    /// Ranges fixate to their minimum, lists to their preferred (first)
    /// entry, `Any` to nothing.
    pub fn fixate(&self) -> Option<T> {
        match self {
            Self::Fixed(v) => Some(v.clone()),
            Self::Range { min, .. } => Some(min.clone()),
            Self::List(values) => values.first().cloned(),
            Self::Any => None,
        }
    }

    /// Check if fully fixed.
    pub fn is_fixed(&self) -> bool {
        matches!(self, Self::Fixed(_))
    }
}

/// Raw pixel layouts understood by the built-in stage descriptors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PixelFormat {
    /// Planar YUV 4:2:0.
    I420,
    /// Semi-planar YUV 4:2:0 (common on hardware decoders).
    Nv12,
    /// Packed 24-bit RGB.
    Rgb24,
    /// Packed 32-bit RGBA.
    Rgba,
}

/// Where raw frames live.
///
/// Hardware pipelines keep frames in device-local surfaces; linking a
/// device-surface output to a host-memory input is a caps mismatch, not a
/// silent copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemoryKind {
    /// Host (system) memory.
    Host,
    /// Device-local surface memory (GPU/ISP).
    Device,
}

/// Compressed video codecs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    /// H.264 / AVC.
    H264,
    /// H.265 / HEVC.
    H265,
}

/// Compressed audio codecs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AudioCodec {
    /// AAC.
    Aac,
    /// Opus.
    Opus,
}

/// RTP stream format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RtpFormat {
    /// RTP payload type (0-127).
    pub payload_type: u8,
    /// Clock rate in Hz.
    pub clock_rate: u32,
    /// Codec carried in the payload.
    pub encoding: VideoCodec,
}

impl RtpFormat {
    /// Create a new RTP format.
    pub const fn new(payload_type: u8, clock_rate: u32, encoding: VideoCodec) -> Self {
        Self {
            payload_type,
            clock_rate,
            encoding,
        }
    }

    /// H.264 video over RTP (dynamic payload type 96).
    pub const H264: Self = Self::new(96, 90000, VideoCodec::H264);

    /// H.265 video over RTP (dynamic payload type 97).
    pub const H265: Self = Self::new(97, 90000, VideoCodec::H265);
}

/// Raw video caps with per-field constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoCaps {
    /// Pixel format constraint.
    pub pixel_format: CapsValue<PixelFormat>,
    /// Width constraint.
    pub width: CapsValue<u32>,
    /// Height constraint.
    pub height: CapsValue<u32>,
    /// Memory placement constraint.
    pub memory: CapsValue<MemoryKind>,
}

impl VideoCaps {
    /// Caps accepting any raw video.
    pub fn any() -> Self {
        Self {
            pixel_format: CapsValue::Any,
            width: CapsValue::Any,
            height: CapsValue::Any,
            memory: CapsValue::Any,
        }
    }

    /// Caps for a fixed pixel format, any size.
    pub fn with_format(pixel_format: PixelFormat) -> Self {
        Self {
            pixel_format: CapsValue::Fixed(pixel_format),
            ..Self::any()
        }
    }

    /// Pin the frame size.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = CapsValue::Fixed(width);
        self.height = CapsValue::Fixed(height);
        self
    }

    /// Pin the memory placement.
    pub fn with_memory(mut self, memory: MemoryKind) -> Self {
        self.memory = CapsValue::Fixed(memory);
        self
    }

    /// Intersect with another raw-video caps.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        Some(Self {
            pixel_format: self.pixel_format.intersect(&other.pixel_format)?,
            width: self.width.intersect(&other.width)?,
            height: self.height.intersect(&other.height)?,
            memory: self.memory.intersect(&other.memory)?,
        })
    }

    /// Check if every field is fixed.
    pub fn is_fixed(&self) -> bool {
        self.pixel_format.is_fixed()
            && self.width.is_fixed()
            && self.height.is_fixed()
            && self.memory.is_fixed()
    }
}

impl Default for VideoCaps {
    fn default() -> Self {
        Self::any()
    }
}

/// The capability constraint attached to a port or link.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Caps {
    /// Raw video with constraints.
    VideoRaw(VideoCaps),
    /// Encoded video.
    Video(VideoCodec),
    /// Encoded audio.
    Audio(AudioCodec),
    /// RTP stream.
    Rtp(RtpFormat),
    /// QuickTime/MP4 container data.
    Quicktime,
    /// Untyped bytes.
    Bytes,
    /// Any format.
    #[default]
    Any,
}

impl Caps {
    /// Intersect with another caps.
    ///
    /// `Any` absorbs anything; `Bytes` unifies with any byte-oriented format
    /// (a byte source can feed a container parser).
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Any, other) => Some(other.clone()),
            (this, Self::Any) => Some(this.clone()),

            (Self::VideoRaw(a), Self::VideoRaw(b)) => Some(Self::VideoRaw(a.intersect(b)?)),
            (Self::Video(a), Self::Video(b)) if a == b => Some(Self::Video(*a)),
            (Self::Audio(a), Self::Audio(b)) if a == b => Some(Self::Audio(*a)),
            (Self::Rtp(a), Self::Rtp(b)) if a == b => Some(Self::Rtp(*a)),
            (Self::Quicktime, Self::Quicktime) => Some(Self::Quicktime),
            (Self::Bytes, Self::Bytes) => Some(Self::Bytes),
            (Self::Bytes, other) | (other, Self::Bytes) => Some(other.clone()),

            _ => None,
        }
    }

    /// Check whether the two caps have a non-empty intersection.
    pub fn compatible(&self, other: &Self) -> bool {
        self.intersect(other).is_some()
    }

    /// Check if this is a video format (raw or encoded).
    pub fn is_video(&self) -> bool {
        matches!(self, Self::VideoRaw(_) | Self::Video(_))
    }
}

impl std::fmt::Display for Caps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VideoRaw(_) => write!(f, "video/x-raw"),
            Self::Video(VideoCodec::H264) => write!(f, "video/x-h264"),
            Self::Video(VideoCodec::H265) => write!(f, "video/x-h265"),
            Self::Audio(AudioCodec::Aac) => write!(f, "audio/mpeg"),
            Self::Audio(AudioCodec::Opus) => write!(f, "audio/x-opus"),
            Self::Rtp(_) => write!(f, "application/x-rtp"),
            Self::Quicktime => write!(f, "video/quicktime"),
            Self::Bytes => write!(f, "application/octet-stream"),
            Self::Any => write!(f, "ANY"),
        }
    }
}

/// Parse a caps string.
///
/// # Example
///
/// ```rust
/// use millrace::caps::{Caps, parse};
///
/// let caps = parse("video/x-raw, format=NV12, width=1920, height=1080").unwrap();
/// assert!(matches!(caps, Caps::VideoRaw(_)));
/// ```
pub fn parse(input: &str) -> Result<Caps> {
    caps_string
        .parse(input.trim())
        .map_err(|e| Error::MalformedCaps(format!("{e}")))
}

/// A parsed `key=value` field.
struct CapsField {
    key: String,
    value: FieldValue,
}

enum FieldValue {
    Integer(u32),
    Ident(String),
}

/// Parse a complete caps string: media type, memory qualifier, fields.
fn caps_string(input: &mut &str) -> WResult<Caps> {
    let _ = multispace0.parse_next(input)?;

    if opt("ANY").parse_next(input)?.is_some() {
        return Ok(Caps::Any);
    }

    let media: String = media_type.parse_next(input)?;
    let memory = opt(memory_qualifier).parse_next(input)?;
    let fields: Vec<CapsField> = repeat(0.., field).parse_next(input)?;
    let _ = multispace0.parse_next(input)?;

    assemble(&media, memory, &fields).ok_or_else(ContextError::new)
}

/// Parse a `type/subtype` media type.
fn media_type(input: &mut &str) -> WResult<String> {
    let main = identifier.parse_next(input)?;
    let _ = '/'.parse_next(input)?;
    let sub = identifier.parse_next(input)?;
    Ok(format!("{main}/{sub}"))
}

/// Parse a `(memory:KIND)` qualifier.
fn memory_qualifier(input: &mut &str) -> WResult<MemoryKind> {
    let _ = '('.parse_next(input)?;
    let _ = "memory:".parse_next(input)?;
    let kind = identifier.parse_next(input)?;
    let _ = ')'.parse_next(input)?;
    match kind.as_str() {
        "NVMM" | "DMABuf" => Ok(MemoryKind::Device),
        "SystemMemory" => Ok(MemoryKind::Host),
        _ => Err(ContextError::new()),
    }
}

/// Parse a `, key=value` field.
fn field(input: &mut &str) -> WResult<CapsField> {
    let _ = multispace0.parse_next(input)?;
    let _ = ','.parse_next(input)?;
    let _ = multispace0.parse_next(input)?;
    let key = identifier.parse_next(input)?;
    let _ = '='.parse_next(input)?;
    let value = field_value.parse_next(input)?;
    Ok(CapsField { key, value })
}

fn field_value(input: &mut &str) -> WResult<FieldValue> {
    if let Some(digits) = opt(digit1::<_, ContextError>).parse_next(input)? {
        let n: u32 = digits.parse().map_err(|_| ContextError::new())?;
        return Ok(FieldValue::Integer(n));
    }
    identifier.parse_next(input).map(FieldValue::Ident)
}

/// Identifiers cover media-type segments, field keys and enum-ish values.
fn identifier(input: &mut &str) -> WResult<String> {
    take_while(1.., |c: char| c.is_alphanumeric() || "-_.".contains(c))
        .parse_next(input)
        .map(|s: &str| s.to_string())
}

/// Build the `Caps` value out of the parsed pieces.
fn assemble(media: &str, memory: Option<MemoryKind>, fields: &[CapsField]) -> Option<Caps> {
    match media {
        "video/x-raw" => {
            let mut caps = VideoCaps::any();
            if let Some(kind) = memory {
                caps.memory = CapsValue::Fixed(kind);
            }
            for f in fields {
                match (f.key.as_str(), &f.value) {
                    ("format", FieldValue::Ident(name)) => {
                        caps.pixel_format = CapsValue::Fixed(pixel_format_from_name(name)?);
                    }
                    ("width", FieldValue::Integer(w)) => caps.width = CapsValue::Fixed(*w),
                    ("height", FieldValue::Integer(h)) => caps.height = CapsValue::Fixed(*h),
                    _ => return None,
                }
            }
            Some(Caps::VideoRaw(caps))
        }
        "video/x-h264" => Some(Caps::Video(VideoCodec::H264)),
        "video/x-h265" => Some(Caps::Video(VideoCodec::H265)),
        "video/quicktime" => Some(Caps::Quicktime),
        "audio/mpeg" => Some(Caps::Audio(AudioCodec::Aac)),
        "audio/x-opus" => Some(Caps::Audio(AudioCodec::Opus)),
        "application/x-rtp" => {
            let mut format = RtpFormat::H264;
            for f in fields {
                match (f.key.as_str(), &f.value) {
                    ("payload", FieldValue::Integer(pt)) => {
                        format.payload_type = u8::try_from(*pt).ok()?;
                    }
                    ("clock-rate", FieldValue::Integer(rate)) => format.clock_rate = *rate,
                    ("encoding-name", FieldValue::Ident(name)) => {
                        format.encoding = match name.as_str() {
                            "H264" => VideoCodec::H264,
                            "H265" => VideoCodec::H265,
                            _ => return None,
                        };
                    }
                    _ => return None,
                }
            }
            Some(Caps::Rtp(format))
        }
        "application/octet-stream" => Some(Caps::Bytes),
        _ => None,
    }
}

fn pixel_format_from_name(name: &str) -> Option<PixelFormat> {
    match name {
        "I420" => Some(PixelFormat::I420),
        "NV12" => Some(PixelFormat::Nv12),
        "RGB" => Some(PixelFormat::Rgb24),
        "RGBA" => Some(PixelFormat::Rgba),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caps_value_intersect_fixed() {
        let a = CapsValue::Fixed(1920u32);
        let b = CapsValue::Fixed(1920u32);
        assert_eq!(a.intersect(&b), Some(CapsValue::Fixed(1920)));

        let c = CapsValue::Fixed(1280u32);
        assert_eq!(a.intersect(&c), None);
    }

    #[test]
    fn test_caps_value_intersect_range() {
        let a = CapsValue::Range { min: 0u32, max: 100 };
        let b = CapsValue::Range { min: 50u32, max: 200 };
        assert_eq!(a.intersect(&b), Some(CapsValue::Range { min: 50, max: 100 }));

        let c = CapsValue::Range {
            min: 150u32,
            max: 200,
        };
        assert_eq!(a.intersect(&c), None);
    }

    #[test]
    fn test_caps_value_intersect_list() {
        let a = CapsValue::List(vec![PixelFormat::I420, PixelFormat::Nv12]);
        let b = CapsValue::List(vec![PixelFormat::Nv12, PixelFormat::Rgba]);
        // Single survivor normalizes to Fixed.
        assert_eq!(a.intersect(&b), Some(CapsValue::Fixed(PixelFormat::Nv12)));

        let c = CapsValue::List(vec![PixelFormat::Rgb24]);
        assert_eq!(a.intersect(&c), None);
    }

    #[test]
    fn test_caps_value_any_absorbs() {
        let any: CapsValue<u32> = CapsValue::Any;
        let fixed = CapsValue::Fixed(42u32);
        assert_eq!(any.intersect(&fixed), Some(CapsValue::Fixed(42)));
        assert_eq!(fixed.intersect(&any), Some(CapsValue::Fixed(42)));
    }

    #[test]
    fn test_video_caps_intersect() {
        let producer = VideoCaps::with_format(PixelFormat::Nv12).with_size(1920, 1080);
        let consumer = VideoCaps::any();
        let common = producer.intersect(&consumer).unwrap();
        assert_eq!(common.pixel_format, CapsValue::Fixed(PixelFormat::Nv12));
        assert_eq!(common.width, CapsValue::Fixed(1920));
    }

    #[test]
    fn test_caps_intersect_codecs() {
        assert!(
            Caps::Video(VideoCodec::H264)
                .intersect(&Caps::Video(VideoCodec::H264))
                .is_some()
        );
        assert!(
            Caps::Video(VideoCodec::H264)
                .intersect(&Caps::Video(VideoCodec::H265))
                .is_none()
        );
        assert!(
            Caps::Video(VideoCodec::H264)
                .intersect(&Caps::Audio(AudioCodec::Aac))
                .is_none()
        );
    }

    #[test]
    fn test_caps_bytes_unifies() {
        // A byte source can feed a container parser.
        assert_eq!(
            Caps::Bytes.intersect(&Caps::Quicktime),
            Some(Caps::Quicktime)
        );
    }

    #[test]
    fn test_parse_raw_video() {
        let caps = parse("video/x-raw, format=NV12, width=1920, height=1080").unwrap();
        let Caps::VideoRaw(v) = caps else {
            panic!("expected raw video caps");
        };
        assert_eq!(v.pixel_format, CapsValue::Fixed(PixelFormat::Nv12));
        assert_eq!(v.width, CapsValue::Fixed(1920));
        assert_eq!(v.height, CapsValue::Fixed(1080));
        assert_eq!(v.memory, CapsValue::Any);
    }

    #[test]
    fn test_parse_device_memory() {
        let caps = parse("video/x-raw(memory:NVMM), format=NV12, width=1920, height=1080").unwrap();
        let Caps::VideoRaw(v) = caps else {
            panic!("expected raw video caps");
        };
        assert_eq!(v.memory, CapsValue::Fixed(MemoryKind::Device));
    }

    #[test]
    fn test_parse_encoded_and_rtp() {
        assert_eq!(parse("video/x-h264").unwrap(), Caps::Video(VideoCodec::H264));

        let caps = parse("application/x-rtp, payload=96, clock-rate=90000, encoding-name=H264")
            .unwrap();
        assert_eq!(caps, Caps::Rtp(RtpFormat::H264));
    }

    #[test]
    fn test_parse_any() {
        assert_eq!(parse("ANY").unwrap(), Caps::Any);
    }

    #[test]
    fn test_parse_malformed() {
        assert!(parse("").is_err());
        assert!(parse("video/x-raw, format=FOO").is_err());
        assert!(parse("sandwich/club").is_err());
        assert!(parse("video/x-raw, width=abc").is_err());
    }
}
