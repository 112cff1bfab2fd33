//! # Pipeline configuration
//!
//! A [`PipelineConfigurator`] decides how bytes on the wire become items and back. It is invoked
//! once per channel, before the bridge attaches, and may adjust [`ChannelConfig`] on the way.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{BytesCodec, Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::io::ChannelConfig;

use crate::prelude::*;

/// Configures codec and options of new channels.
pub trait PipelineConfigurator: Send + Sync + 'static {
    /// Inbound item.
    type Read: Send + 'static;
    /// Outbound item.
    type Write: Send + 'static;
    /// Codec translating between bytes and items.
    type Codec: Decoder<Item = Self::Read, Error = Error>
        + Encoder<Self::Write, Error = Error>
        + Send
        + 'static;

    /// Adjusts `config` and creates a codec for a single channel.
    fn configure(&self, config: &mut ChannelConfig) -> Self::Codec;
}

/// Newline-delimited UTF-8 text.
#[derive(Clone, Debug, Default)]
pub struct Lines {
    auto_read: bool,
    eager_input: bool,
    max_length: Option<usize>,
}

impl Lines {
    /// Creates configurator with default channel options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables automatic reads.
    pub fn auto_read(mut self, auto_read: bool) -> Self {
        self.auto_read = auto_read;
        self
    }

    /// Registers input subscriber before connection is emitted.
    pub fn eager_input(mut self, eager_input: bool) -> Self {
        self.eager_input = eager_input;
        self
    }

    /// Limits the length of a single line. Longer lines fail with [`Error::Codec`].
    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }
}

impl PipelineConfigurator for Lines {
    type Read = String;
    type Write = String;
    type Codec = LineCodec;

    fn configure(&self, config: &mut ChannelConfig) -> LineCodec {
        config.set_auto_read(self.auto_read);
        config.set_eager_input(self.eager_input);

        let inner = match self.max_length {
            Some(max_length) => LinesCodec::new_with_max_length(max_length),
            None => LinesCodec::new(),
        };
        LineCodec { inner }
    }
}

/// Codec created by [`Lines`].
#[derive(Debug)]
pub struct LineCodec {
    inner: LinesCodec,
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        self.inner.decode(src).map_err(line_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        self.inner.decode_eof(src).map_err(line_error)
    }
}

impl Encoder<String> for LineCodec {
    type Error = Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.inner.encode(item, dst).map_err(line_error)
    }
}

fn line_error(err: LinesCodecError) -> Error {
    match err {
        LinesCodecError::Io(err) => Error::from(err),
        err => Error::Codec(err.to_string()),
    }
}

/// Raw byte chunks as they arrive from the socket.
#[derive(Clone, Debug, Default)]
pub struct Raw {
    auto_read: bool,
    eager_input: bool,
}

impl Raw {
    /// Creates configurator with default channel options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables automatic reads.
    pub fn auto_read(mut self, auto_read: bool) -> Self {
        self.auto_read = auto_read;
        self
    }

    /// Registers input subscriber before connection is emitted.
    pub fn eager_input(mut self, eager_input: bool) -> Self {
        self.eager_input = eager_input;
        self
    }
}

impl PipelineConfigurator for Raw {
    type Read = BytesMut;
    type Write = Bytes;
    type Codec = RawCodec;

    fn configure(&self, config: &mut ChannelConfig) -> RawCodec {
        config.set_auto_read(self.auto_read);
        config.set_eager_input(self.eager_input);
        RawCodec::default()
    }
}

/// Codec created by [`Raw`].
#[derive(Debug, Default)]
pub struct RawCodec {
    inner: BytesCodec,
}

impl Decoder for RawCodec {
    type Item = BytesMut;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>> {
        Ok(self.inner.decode(src)?)
    }
}

impl Encoder<Bytes> for RawCodec {
    type Error = Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        Ok(self.inner.encode(item, dst)?)
    }
}

#[cfg(test)]
mod pipeline_tests {
    use super::*;

    #[test]
    fn lines_configure_channel() {
        let mut config = ChannelConfig::default();
        Lines::new()
            .auto_read(true)
            .eager_input(true)
            .configure(&mut config);

        assert!(config.auto_read());
        assert!(config.eager_input());
    }

    #[test]
    fn line_codec_reports_oversized_lines() {
        let mut codec = Lines::new()
            .max_length(4)
            .configure(&mut ChannelConfig::default());
        let mut buf = BytesMut::from("abc\nabcdefgh\n");

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "abc");
        assert!(matches!(codec.decode(&mut buf), Err(Error::Codec(_))));
    }

    #[test]
    fn line_codec_flushes_partial_line_at_eof() {
        let mut codec = Lines::new().configure(&mut ChannelConfig::default());
        let mut buf = BytesMut::from("tail");

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(codec.decode_eof(&mut buf).unwrap().unwrap(), "tail");
    }

    #[test]
    fn raw_codec_passes_bytes_through() {
        let mut codec = Raw::new().configure(&mut ChannelConfig::default());
        let mut dst = BytesMut::new();
        codec.encode(Bytes::from_static(b"ping"), &mut dst).unwrap();

        assert_eq!(codec.decode(&mut dst).unwrap().unwrap(), "ping".as_bytes());
    }
}
