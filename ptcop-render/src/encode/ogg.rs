use std::{
    io::Write,
    num::{NonZeroU32, NonZeroU8},
};

use anyhow::Context;
use ptcop::Quality;
use vorbis_rs::{VorbisEncoder, VorbisEncoderBuilder};

use super::Encoder;

/// Ogg Vorbis at the encoder's default quality.
pub struct OggEncoder<W: Write> {
    encoder: VorbisEncoder<W>,
    // one buffer per channel, vorbis wants planar floats
    planar: Vec<Vec<f32>>,
}

impl<W: Write> OggEncoder<W> {
    pub fn new(quality: Quality, sink: W) -> anyhow::Result<Self> {
        let sample_rate =
            NonZeroU32::new(quality.sample_rate).context("sample rate must not be 0")?;
        let channels = u8::try_from(quality.channels)
            .ok()
            .and_then(NonZeroU8::new)
            .context("invalid channel count")?;
        let mut builder = VorbisEncoderBuilder::new(sample_rate, channels, sink)
            .context("error setting up the vorbis encoder")?;
        let encoder = builder
            .build()
            .context("error setting up the vorbis encoder")?;
        Ok(Self {
            encoder,
            planar: vec![Vec::new(); quality.channels as usize],
        })
    }
}

impl<W: Write> Encoder for OggEncoder<W> {
    fn write_block(&mut self, interleaved: &[i16]) -> anyhow::Result<()> {
        let channels = self.planar.len();
        for (ch, plane) in self.planar.iter_mut().enumerate() {
            plane.clear();
            plane.extend(
                interleaved
                    .iter()
                    .skip(ch)
                    .step_by(channels)
                    .map(|s| *s as f32 / 32768.0),
            );
        }
        self.encoder
            .encode_audio_block(&self.planar)
            .context("error encoding vorbis block")
    }

    fn finish(self: Box<Self>) -> anyhow::Result<()> {
        let mut sink = self
            .encoder
            .finish()
            .context("error finishing the vorbis stream")?;
        sink.flush().context("error flushing ogg output")
    }
}
