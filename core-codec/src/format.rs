//! # Media Format Map
//!
//! Generic key/value description of a stream, exchanged with codec engines at
//! configure time and reported back through `get_output_format`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Keys consumed by the codec core.
pub mod keys {
    /// Number of audio channels (int, mandatory for configure).
    pub const CHANNEL_COUNT: &str = "channel_count";
    /// Sample rate in Hz (int, mandatory for configure).
    pub const SAMPLE_RATE: &str = "sample_rate";
    /// Target or source bitrate in bits per second (long).
    pub const BITRATE: &str = "bitrate";
    /// PCM sample layout produced by decoders (string, `s16le` or `f32le`).
    pub const AUDIO_SAMPLE_FORMAT: &str = "audio_sample_format";
    /// Largest input buffer the client will submit, in bytes (int).
    pub const MAX_INPUT_SIZE: &str = "max_input_size";
    /// Out-of-band codec configuration (buffer), e.g. FLAC STREAMINFO.
    pub const CODEC_CONFIG: &str = "codec_config";
    /// MIME type of the stream (string).
    pub const MIME: &str = "mime";
}

/// A single value in a [`Format`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FormatValue {
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
    Buffer(Bytes),
}

impl fmt::Display for FormatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatValue::Int(v) => write!(f, "{}", v),
            FormatValue::Long(v) => write!(f, "{}", v),
            FormatValue::Double(v) => write!(f, "{}", v),
            FormatValue::String(v) => write!(f, "{}", v),
            FormatValue::Buffer(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// Typed key/value map describing a media stream.
///
/// Accessors are strict about types: `get_int` on a key stored as a string
/// returns `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Format {
    entries: BTreeMap<String, FormatValue>,
}

impl Format {
    pub fn new() -> Self {
        Self::default()
    }

    /// Audio format with the two mandatory configure keys set.
    pub fn audio(channel_count: i32, sample_rate: i32) -> Self {
        let mut format = Self::new();
        format.put_int(keys::CHANNEL_COUNT, channel_count);
        format.put_int(keys::SAMPLE_RATE, sample_rate);
        format
    }

    pub fn put_int(&mut self, key: impl Into<String>, value: i32) -> &mut Self {
        self.entries.insert(key.into(), FormatValue::Int(value));
        self
    }

    pub fn put_long(&mut self, key: impl Into<String>, value: i64) -> &mut Self {
        self.entries.insert(key.into(), FormatValue::Long(value));
        self
    }

    pub fn put_double(&mut self, key: impl Into<String>, value: f64) -> &mut Self {
        self.entries.insert(key.into(), FormatValue::Double(value));
        self
    }

    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries
            .insert(key.into(), FormatValue::String(value.into()));
        self
    }

    pub fn put_buffer(&mut self, key: impl Into<String>, value: impl Into<Bytes>) -> &mut Self {
        self.entries
            .insert(key.into(), FormatValue::Buffer(value.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&FormatValue> {
        self.entries.get(key)
    }

    pub fn get_int(&self, key: &str) -> Option<i32> {
        match self.entries.get(key) {
            Some(FormatValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Long value; int entries are widened.
    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.entries.get(key) {
            Some(FormatValue::Long(v)) => Some(*v),
            Some(FormatValue::Int(v)) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        match self.entries.get(key) {
            Some(FormatValue::Double(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(FormatValue::String(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn get_buffer(&self, key: &str) -> Option<&Bytes> {
        match self.entries.get(key) {
            Some(FormatValue::Buffer(v)) => Some(v),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<FormatValue> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormatValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copy every entry of `other` into `self`, overwriting existing keys.
    pub fn merge(&mut self, other: &Format) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }
}

/// PCM sample layout named by [`keys::AUDIO_SAMPLE_FORMAT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SampleFormat {
    U8,
    #[default]
    S16Le,
    S24Le,
    S32Le,
    F32Le,
}

impl SampleFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "u8" => Some(SampleFormat::U8),
            "s16le" => Some(SampleFormat::S16Le),
            "s24le" => Some(SampleFormat::S24Le),
            "s32le" => Some(SampleFormat::S32Le),
            "f32le" => Some(SampleFormat::F32Le),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S16Le => "s16le",
            SampleFormat::S24Le => "s24le",
            SampleFormat::S32Le => "s32le",
            SampleFormat::F32Le => "f32le",
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16Le => 2,
            SampleFormat::S24Le => 3,
            SampleFormat::S32Le | SampleFormat::F32Le => 4,
        }
    }

    /// Sample layout of `format`, [`SampleFormat::S16Le`] when unset.
    ///
    /// Returns `None` if the key holds something unrecognised.
    pub fn from_format(format: &Format) -> Option<Self> {
        match format.get(keys::AUDIO_SAMPLE_FORMAT) {
            None => Some(SampleFormat::default()),
            Some(FormatValue::String(name)) => Self::parse(name),
            Some(_) => None,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors() {
        let mut format = Format::audio(2, 44100);
        format
            .put_long(keys::BITRATE, 128_000)
            .put_string(keys::AUDIO_SAMPLE_FORMAT, "s16le")
            .put_buffer(keys::CODEC_CONFIG, Bytes::from_static(&[1, 2, 3]));

        assert_eq!(format.get_int(keys::CHANNEL_COUNT), Some(2));
        assert_eq!(format.get_int(keys::SAMPLE_RATE), Some(44100));
        assert_eq!(format.get_long(keys::BITRATE), Some(128_000));
        assert_eq!(format.get_long(keys::SAMPLE_RATE), Some(44100));
        assert_eq!(format.get_string(keys::AUDIO_SAMPLE_FORMAT), Some("s16le"));
        assert_eq!(format.get_buffer(keys::CODEC_CONFIG).map(|b| b.len()), Some(3));

        // Wrong type is not coerced
        assert_eq!(format.get_int(keys::AUDIO_SAMPLE_FORMAT), None);
        assert_eq!(format.get_string(keys::CHANNEL_COUNT), None);
    }

    #[test]
    fn merge_overwrites() {
        let mut base = Format::audio(1, 8000);
        let mut update = Format::new();
        update.put_int(keys::SAMPLE_RATE, 16000);

        base.merge(&update);
        assert_eq!(base.get_int(keys::SAMPLE_RATE), Some(16000));
        assert_eq!(base.get_int(keys::CHANNEL_COUNT), Some(1));
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn display_is_sorted() {
        let format = Format::audio(2, 48000);
        assert_eq!(format.to_string(), "{channel_count=2, sample_rate=48000}");
    }

    #[test]
    fn sample_format_lookup() {
        let mut format = Format::audio(2, 48000);
        assert_eq!(SampleFormat::from_format(&format), Some(SampleFormat::S16Le));

        format.put_string(keys::AUDIO_SAMPLE_FORMAT, "F32LE");
        assert_eq!(SampleFormat::from_format(&format), Some(SampleFormat::F32Le));
        assert_eq!(SampleFormat::F32Le.bytes_per_sample(), 4);

        format.put_int(keys::AUDIO_SAMPLE_FORMAT, 1);
        assert_eq!(SampleFormat::from_format(&format), None);
    }

    #[test]
    fn remove_and_contains() {
        let mut format = Format::audio(2, 48000);
        assert!(format.contains_key(keys::SAMPLE_RATE));
        assert_eq!(
            format.remove(keys::SAMPLE_RATE),
            Some(FormatValue::Int(48000))
        );
        assert!(!format.contains_key(keys::SAMPLE_RATE));
        assert!(!format.is_empty());
    }
}
