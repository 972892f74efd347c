use std::io::Write;

use ptcop::Quality;

use crate::args::OutputFormat;

pub mod ogg;
pub mod wav;

pub use ogg::OggEncoder;
pub use wav::WavEncoder;

/// Consumes interleaved 16 bit pcm blocks, writing forward only.
pub trait Encoder {
    fn write_block(&mut self, interleaved: &[i16]) -> anyhow::Result<()>;

    /// flushes everything that is still buffered into the sink
    fn finish(self: Box<Self>) -> anyhow::Result<()>;
}

pub fn new_encoder<'a, W: Write + 'a>(
    format: OutputFormat,
    quality: Quality,
    total_frames: u64,
    sink: W,
) -> anyhow::Result<Box<dyn Encoder + 'a>> {
    Ok(match format {
        OutputFormat::Ogg => Box::new(OggEncoder::new(quality, sink)?),
        OutputFormat::Wav => Box::new(WavEncoder::new(quality, total_frames, sink)?),
    })
}
