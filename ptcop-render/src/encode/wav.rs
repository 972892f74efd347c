use std::io::{Cursor, Write};

use anyhow::{bail, Context};
use binrw::BinWriterExt;
use ptcop::Quality;

use super::Encoder;

#[binrw::binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy)]
pub struct WavHeader {
    pub audio_format: u16,
    pub channel_count: u16,
    pub sampling_rate: u32,
    pub bytes_per_second: u32,
    pub bytes_per_sample: u16,
    pub bits_per_sample: u16,
}

#[binrw::binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy)]
pub struct RiffWavHeader {
    pub magic: [u8; 4],
    pub filesize: u32,
    pub wav: [u8; 4],
    pub fmt: [u8; 4],
    pub fmt_size: u32,
}

#[binrw::binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy)]
pub struct DataHeader {
    pub magic: [u8; 4],
    pub size: u32,
}

const PCM_FORMAT: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;
// everything before the samples, minus the 8 bytes of "RIFF" and the size
const HEADER_REST: u32 = 36;

/// 16 bit pcm wav. The length is known up front, so the header is written first
/// and the sink never has to seek.
pub struct WavEncoder<W: Write> {
    sink: W,
    expected_bytes: u64,
    written_bytes: u64,
    scratch: Vec<u8>,
}

impl<W: Write> WavEncoder<W> {
    pub fn new(quality: Quality, total_frames: u64, mut sink: W) -> anyhow::Result<Self> {
        let bytes_per_sample = quality.channels * BITS_PER_SAMPLE / 8;
        let expected_bytes = total_frames * bytes_per_sample as u64;
        let data_size = match u32::try_from(expected_bytes) {
            Ok(size) if size <= u32::MAX - HEADER_REST => size,
            _ => bail!("{total_frames} frames don't fit into a wav file"),
        };

        let mut header = Cursor::new(Vec::with_capacity(44));
        header.write_le(&RiffWavHeader {
            magic: *b"RIFF",
            filesize: HEADER_REST + data_size,
            wav: *b"WAVE",
            fmt: *b"fmt ",
            fmt_size: 16,
        })?;
        header.write_le(&WavHeader {
            audio_format: PCM_FORMAT,
            channel_count: quality.channels,
            sampling_rate: quality.sample_rate,
            bytes_per_second: quality.sample_rate * bytes_per_sample as u32,
            bytes_per_sample,
            bits_per_sample: BITS_PER_SAMPLE,
        })?;
        header.write_le(&DataHeader {
            magic: *b"data",
            size: data_size,
        })?;
        sink.write_all(header.get_ref())
            .context("error writing wav header")?;
        Ok(Self {
            sink,
            expected_bytes,
            written_bytes: 0,
            scratch: Vec::new(),
        })
    }
}

impl<W: Write> Encoder for WavEncoder<W> {
    fn write_block(&mut self, interleaved: &[i16]) -> anyhow::Result<()> {
        self.scratch.clear();
        for sample in interleaved {
            self.scratch.extend_from_slice(&sample.to_le_bytes());
        }
        self.written_bytes += self.scratch.len() as u64;
        if self.written_bytes > self.expected_bytes {
            bail!(
                "rendered more data than announced in the header ({} > {})",
                self.written_bytes,
                self.expected_bytes
            );
        }
        self.sink
            .write_all(&self.scratch)
            .context("error writing wav samples")
    }

    fn finish(mut self: Box<Self>) -> anyhow::Result<()> {
        if self.written_bytes != self.expected_bytes {
            bail!(
                "rendered {} bytes, but the header announced {}",
                self.written_bytes,
                self.expected_bytes
            );
        }
        self.sink.flush().context("error flushing wav output")
    }
}
