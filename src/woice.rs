use std::f64::consts::TAU;

use crate::{
    error::{PxtnError, PxtnResult},
    structs::{PcmMaterialHeader, PCM_FLAG_LOOP},
};

/// Key of A4 (440 Hz), 256 key steps per semitone.
pub const BASIC_KEY: i32 = 0x4500;
pub const KEY_PER_SEMITONE: f64 = 256.0;
const BASIC_FREQUENCY: f64 = 440.0;

/// Instrument assigned to a unit.
#[derive(Debug, Clone)]
pub enum Woice {
    /// raw pcm as found in the project, converted by [`Woice::build`]
    Pcm {
        header: PcmMaterialHeader,
        data: Vec<u8>,
        built: Option<PcmVoice>,
    },
    /// stand in for materials that are not voiced natively
    Tone,
}

#[derive(Debug, Clone)]
pub struct PcmVoice {
    /// mono, normalized to -1.0..=1.0
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub basic_key: i32,
    pub tuning: f32,
    pub looping: bool,
}

impl Woice {
    pub fn pcm(header: PcmMaterialHeader, data: Vec<u8>) -> Self {
        Self::Pcm {
            header,
            data,
            built: None,
        }
    }

    /// converts the stored pcm into the sample table used for rendering
    pub fn build(&mut self) -> PxtnResult<()> {
        let Self::Pcm {
            header,
            data,
            built,
        } = self
        else {
            return Ok(());
        };
        if header.data_size as usize != data.len() {
            return Err(PxtnError::InvData(format!(
                "pcm data size {} doesn't match header size {}",
                data.len(),
                header.data_size
            )));
        }
        if header.sample_rate == 0 {
            return Err(PxtnError::InvData("pcm sample rate is zero".into()));
        }
        let channels = header.channels as usize;
        let bytes_per_sample = match (header.channels, header.bits_per_sample) {
            (1 | 2, 8) => 1,
            (1 | 2, 16) => 2,
            (channels, bits) => return Err(PxtnError::PcmUnknown { channels, bits }),
        };
        let frame_len = channels * bytes_per_sample;
        let samples = data
            .chunks_exact(frame_len)
            .map(|frame| {
                let sum: f32 = frame
                    .chunks_exact(bytes_per_sample)
                    .map(|s| match s {
                        [b] => (*b as f32 - 128.0) / 128.0,
                        [lo, hi] => i16::from_le_bytes([*lo, *hi]) as f32 / 32768.0,
                        _ => 0.0,
                    })
                    .sum();
                sum / channels as f32
            })
            .collect();
        *built = Some(PcmVoice {
            samples,
            sample_rate: header.sample_rate,
            basic_key: header.basic_key as i32,
            tuning: if header.tuning > 0.0 { header.tuning } else { 1.0 },
            looping: header.voice_flags & PCM_FLAG_LOOP != 0,
        });
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        match self {
            Self::Pcm { built, .. } => built.is_some(),
            Self::Tone => true,
        }
    }

    /// How far the playback position advances per output sample for `key`.
    pub fn phase_step(&self, key: i32, out_rate: u32) -> f64 {
        match self {
            Self::Pcm {
                built: Some(voice), ..
            } => {
                key_ratio(key.saturating_sub(voice.basic_key))
                    * voice.tuning as f64
                    * voice.sample_rate as f64
                    / out_rate as f64
            }
            // one full period per step of 1.0
            _ => BASIC_FREQUENCY * key_ratio(key.saturating_sub(BASIC_KEY)) / out_rate as f64,
        }
    }

    /// Sample at `phase`, `None` once a non looping voice ran out.
    pub fn sample(&self, phase: f64) -> Option<f32> {
        match self {
            Self::Pcm {
                built: Some(voice), ..
            } => {
                let len = voice.samples.len();
                if len == 0 {
                    return None;
                }
                let mut pos = phase;
                if pos >= len as f64 {
                    if !voice.looping {
                        return None;
                    }
                    pos %= len as f64;
                }
                let index = pos as usize;
                let frac = (pos - index as f64) as f32;
                let a = voice.samples[index];
                let b = if index + 1 < len {
                    voice.samples[index + 1]
                } else if voice.looping {
                    voice.samples[0]
                } else {
                    a
                };
                Some(a + (b - a) * frac)
            }
            Self::Pcm { built: None, .. } => None,
            Self::Tone => Some((phase.fract() * TAU).sin() as f32),
        }
    }
}

fn key_ratio(key_offset: i32) -> f64 {
    (key_offset as f64 / (KEY_PER_SEMITONE * 12.0)).exp2()
}
