use std::{
    fmt,
    fs::File,
    io::{self, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use ptcop::{Descriptor, Engine, PxtnError, Quality, RenderPreparation};
use thiserror::Error;

use crate::{
    args::{OutputFormat, RenderSettings, RunConfig},
    encode::new_encoder,
};

pub const CHANNEL_COUNT: u16 = 2;
pub const SAMPLE_RATE: u32 = 44100;
const BLOCK_FRAMES: usize = 4096;

/// The engine call a job was at when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStep {
    Init,
    Quality,
    Bind,
    Read,
    Ready,
    Mute,
    Prepare,
    Render,
}

impl fmt::Display for EngineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "engine initialization",
            Self::Quality => "quality negotiation",
            Self::Bind => "descriptor binding",
            Self::Read => "project read",
            Self::Ready => "tone preparation",
            Self::Mute => "unit mute",
            Self::Prepare => "render preparation",
            Self::Render => "rendering",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Could not access {}: {source}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Could not allocate {size} bytes for the project data")]
    Allocation { size: u64 },
    #[error("{step} failed with code {}: {source}", .source.code())]
    Engine {
        step: EngineStep,
        #[source]
        source: PxtnError,
    },
    #[error("{format} encoding failed: {source:#}")]
    Encode {
        format: OutputFormat,
        #[source]
        source: anyhow::Error,
    },
}

impl DecodeError {
    fn engine(step: EngineStep) -> impl FnOnce(PxtnError) -> Self {
        move |source| Self::Engine { step, source }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeSummary {
    pub bytes_read: usize,
    pub frames: u64,
}

/// Reads the whole file into memory in one go.
pub fn ingest(path: &Path) -> Result<Vec<u8>, DecodeError> {
    let file_error = |source| DecodeError::File {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(file_error)?;
    let meta = file.metadata().map_err(file_error)?;
    if !meta.is_file() {
        return Err(file_error(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        )));
    }
    let size = usize::try_from(meta.len())
        .map_err(|_| DecodeError::Allocation { size: meta.len() })?;
    let mut data = Vec::new();
    data.try_reserve_exact(size)
        .map_err(|_| DecodeError::Allocation { size: meta.len() })?;
    (&mut file)
        .take(meta.len())
        .read_to_end(&mut data)
        .map_err(file_error)?;
    if data.len() < size {
        return Err(file_error(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("read {} of {} bytes", data.len(), size),
        )));
    }
    Ok(data)
}

/// Everything one input file needs, from its bytes to a prepared engine.
pub struct DecodeJob<E: Engine> {
    path: PathBuf,
    data: Vec<u8>,
    engine: E,
    quality: Quality,
}

impl<E: Engine> DecodeJob<E> {
    /// Ingests `path` and drives `engine` up to a prepared render.
    pub fn load(path: &Path, mut engine: E, settings: &RenderSettings) -> Result<Self, DecodeError> {
        let data = ingest(path)?;
        let quality = Quality {
            channels: CHANNEL_COUNT,
            sample_rate: SAMPLE_RATE,
        };

        engine.init().map_err(DecodeError::engine(EngineStep::Init))?;
        engine
            .set_destination_quality(quality.channels, quality.sample_rate)
            .map_err(DecodeError::engine(EngineStep::Quality))?;
        if engine.quality() != Some(quality) {
            return Err(DecodeError::Engine {
                step: EngineStep::Quality,
                source: PxtnError::Param(format!(
                    "engine reports {:?} after negotiating {quality:?}",
                    engine.quality()
                )),
            });
        }

        let mut desc =
            Descriptor::from_memory(&data).map_err(DecodeError::engine(EngineStep::Bind))?;
        engine
            .read(&mut desc)
            .map_err(DecodeError::engine(EngineStep::Read))?;
        engine
            .tones_ready()
            .map_err(DecodeError::engine(EngineStep::Ready))?;

        let unit_count = engine.unit_count();
        for &unit in &settings.mute {
            if unit >= unit_count {
                warn!(
                    "{} has only {unit_count} units, not muting unit {unit}",
                    path.display()
                );
                continue;
            }
            engine
                .set_unit_played(unit, false)
                .map_err(DecodeError::engine(EngineStep::Mute))?;
        }

        engine
            .prepare(&RenderPreparation {
                looping: settings.loops > 0,
                unit_mute: !settings.mute.is_empty(),
                loop_count: settings.loops,
                start_pos_sample: 0,
                master_volume: settings.volume,
            })
            .map_err(DecodeError::engine(EngineStep::Prepare))?;
        engine.release_events();

        Ok(Self {
            path: path.to_path_buf(),
            data,
            engine,
            quality,
        })
    }

    pub fn bytes_read(&self) -> usize {
        self.data.len()
    }

    /// Pulls the whole render through the encoder for `format`.
    /// Returns the number of frames written.
    pub fn encode<W: Write>(&mut self, format: OutputFormat, sink: W) -> Result<u64, DecodeError> {
        let encode_error = |source| DecodeError::Encode { format, source };
        let total_frames = self.engine.total_frames();
        let mut encoder =
            new_encoder(format, self.quality, total_frames, sink).map_err(encode_error)?;

        let channels = self.quality.channels as usize;
        let mut buf = vec![0i16; BLOCK_FRAMES * channels];
        let mut frames = 0u64;
        loop {
            let written = self
                .engine
                .render(&mut buf)
                .map_err(DecodeError::engine(EngineStep::Render))?;
            if written == 0 {
                break;
            }
            encoder.write_block(&buf[..written]).map_err(encode_error)?;
            frames += (written / channels) as u64;
        }
        encoder.finish().map_err(encode_error)?;
        Ok(frames)
    }
}

/// `song.ptcop` becomes `song.ogg` next to it.
pub fn output_path(input: &Path, format: OutputFormat) -> PathBuf {
    input.with_extension(format.extension())
}

/// Runs the whole pipeline for one file. The output file is only created
/// once the engine accepted the project, `stdout` is only written with
/// `--stdout`.
pub fn decode<E: Engine, W: Write>(
    path: &Path,
    config: &RunConfig,
    engine: E,
    stdout: &mut W,
) -> Result<DecodeSummary, DecodeError> {
    let mut job = DecodeJob::load(path, engine, &config.render)?;
    if let Some(title) = job.engine.project_name() {
        debug!("{}: \"{title}\"", path.display());
    }
    let frames = if config.to_stdout {
        job.encode(config.format, stdout)?
    } else {
        let out_path = output_path(path, config.format);
        let file = File::create(&out_path).map_err(|source| DecodeError::File {
            path: out_path.clone(),
            source,
        })?;
        job.encode(config.format, BufWriter::new(file))?
    };

    let name = job
        .path
        .file_name()
        .unwrap_or(job.path.as_os_str())
        .to_string_lossy();
    info!("Rendered {name} ({} bytes read)", job.bytes_read());
    Ok(DecodeSummary {
        bytes_read: job.bytes_read(),
        frames,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{fs, io::Cursor};

    use binrw::BinReaderExt;
    use ptcop::{Descriptor, Engine, PxtnError, PxtnResult, Quality, RenderPreparation};

    use super::{decode, ingest, output_path, DecodeError, DecodeJob, EngineStep};
    use crate::{
        args::{OutputFormat, RenderSettings, RunConfig},
        encode::wav::{DataHeader, RiffWavHeader, WavHeader},
    };

    /// An engine that plays back a fixed number of frames and can be told to
    /// fail at one step.
    #[derive(Debug, Default)]
    pub struct MockEngine {
        pub fail_at: Option<EngineStep>,
        pub frames: u64,
        pub units: usize,
        pub muted: Vec<usize>,
        pub prep: Option<RenderPreparation>,
        pub events_released: bool,
        pub bytes_seen: usize,
        /// accept any quality but keep reporting none
        pub forget_quality: bool,
        quality: Option<Quality>,
        remaining: u64,
    }

    impl MockEngine {
        pub fn playing(frames: u64) -> Self {
            Self {
                frames,
                units: 2,
                ..Default::default()
            }
        }

        pub fn failing(step: EngineStep) -> Self {
            Self {
                fail_at: Some(step),
                ..Self::playing(100)
            }
        }

        fn step(&self, step: EngineStep) -> PxtnResult<()> {
            if self.fail_at == Some(step) {
                Err(PxtnError::Fatal)
            } else {
                Ok(())
            }
        }
    }

    impl Engine for MockEngine {
        fn init(&mut self) -> PxtnResult<()> {
            self.step(EngineStep::Init)
        }

        fn set_destination_quality(&mut self, channels: u16, sample_rate: u32) -> PxtnResult<()> {
            self.step(EngineStep::Quality)?;
            if !self.forget_quality {
                self.quality = Some(Quality {
                    channels,
                    sample_rate,
                });
            }
            Ok(())
        }

        fn read(&mut self, desc: &mut Descriptor<'_>) -> PxtnResult<()> {
            self.step(EngineStep::Read)?;
            self.bytes_seen = desc.size() as usize;
            Ok(())
        }

        fn tones_ready(&mut self) -> PxtnResult<()> {
            self.step(EngineStep::Ready)
        }

        fn unit_count(&self) -> usize {
            self.units
        }

        fn set_unit_played(&mut self, unit: usize, played: bool) -> PxtnResult<()> {
            self.step(EngineStep::Mute)?;
            if !played {
                self.muted.push(unit);
            }
            Ok(())
        }

        fn prepare(&mut self, prep: &RenderPreparation) -> PxtnResult<()> {
            self.step(EngineStep::Prepare)?;
            self.prep = Some(prep.clone());
            self.remaining = self.frames;
            Ok(())
        }

        fn release_events(&mut self) {
            self.events_released = true;
        }

        fn total_frames(&self) -> u64 {
            self.frames
        }

        fn quality(&self) -> Option<Quality> {
            self.quality
        }

        fn project_name(&self) -> Option<&str> {
            None
        }

        fn render(&mut self, buf: &mut [i16]) -> PxtnResult<usize> {
            self.step(EngineStep::Render)?;
            let channels = self.quality.map_or(2, |q| q.channels as usize);
            let frames = ((buf.len() / channels) as u64).min(self.remaining) as usize;
            for (i, sample) in buf[..frames * channels].iter_mut().enumerate() {
                *sample = (i % 100) as i16;
            }
            self.remaining -= frames as u64;
            Ok(frames * channels)
        }
    }

    fn project_file(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, b"PTCOLLAGE-071119 some project bytes").unwrap();
        path
    }

    #[test]
    fn ingest_reads_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = project_file(&dir, "song.ptcop");
        assert_eq!(ingest(&path).unwrap().len(), 35);
    }

    #[test]
    fn ingest_rejects_missing_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ingest(&dir.path().join("nope.ptcop")),
            Err(DecodeError::File { .. })
        ));
        assert!(matches!(ingest(dir.path()), Err(DecodeError::File { .. })));
    }

    #[test]
    fn load_prepares_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = project_file(&dir, "song.ptcop");
        let job = DecodeJob::load(&path, MockEngine::playing(10), &RenderSettings::default())
            .unwrap();
        assert_eq!(job.bytes_read(), 35);
        assert_eq!(job.engine.bytes_seen, 35);
        assert!(job.engine.events_released);
        assert_eq!(job.engine.quality, Some(Quality {
            channels: 2,
            sample_rate: 44100,
        }));
        let prep = job.engine.prep.as_ref().unwrap();
        assert!(prep.looping);
        assert!(!prep.unit_mute);
        assert_eq!(prep.loop_count, 1);
        assert_eq!(prep.start_pos_sample, 0);
        assert_eq!(prep.master_volume, 0.8);
    }

    #[test]
    fn render_settings_reach_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        let path = project_file(&dir, "song.ptcop");
        let settings = RenderSettings {
            loops: 0,
            mute: vec![1, 7],
            volume: 0.5,
        };
        let job = DecodeJob::load(&path, MockEngine::playing(10), &settings).unwrap();
        // unit 7 does not exist and is skipped
        assert_eq!(job.engine.muted, vec![1]);
        let prep = job.engine.prep.as_ref().unwrap();
        assert!(!prep.looping);
        assert!(prep.unit_mute);
        assert_eq!(prep.master_volume, 0.5);
    }

    #[test]
    fn each_engine_step_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let path = project_file(&dir, "song.ptcop");
        let settings = RenderSettings {
            mute: vec![0],
            ..Default::default()
        };
        for step in [
            EngineStep::Init,
            EngineStep::Quality,
            EngineStep::Read,
            EngineStep::Ready,
            EngineStep::Mute,
            EngineStep::Prepare,
        ] {
            match DecodeJob::load(&path, MockEngine::failing(step), &settings) {
                Err(DecodeError::Engine { step: failed, source }) => {
                    assert_eq!(failed, step);
                    assert_eq!(source.code(), 3);
                }
                Err(e) => panic!("unexpected error {e}"),
                Ok(_) => panic!("{step} should have failed"),
            }
        }
    }

    #[test]
    fn empty_file_fails_binding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.ptcop");
        fs::write(&path, b"").unwrap();
        let err = DecodeJob::load(&path, MockEngine::playing(1), &RenderSettings::default())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            DecodeError::Engine {
                step: EngineStep::Bind,
                ..
            }
        ));
    }

    #[test]
    fn prepare_failure_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = project_file(&dir, "song.ptcop");
        let err = DecodeJob::load(
            &path,
            MockEngine::failing(EngineStep::Prepare),
            &RenderSettings::default(),
        )
        .err()
        .unwrap();
        assert!(err.to_string().starts_with("render preparation failed"));
    }

    #[test]
    fn encodes_all_frames_as_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = project_file(&dir, "song.ptcop");
        let frames = 10_000;
        let mut job =
            DecodeJob::load(&path, MockEngine::playing(frames), &RenderSettings::default())
                .unwrap();
        let mut out: Vec<u8> = Vec::new();
        assert_eq!(job.encode(OutputFormat::Wav, &mut out).unwrap(), frames);
        assert_eq!(out.len() as u64, 44 + frames * 4);

        let mut read = Cursor::new(&out);
        let _: RiffWavHeader = read.read_le().unwrap();
        let fmt: WavHeader = read.read_le().unwrap();
        assert_eq!(fmt.channel_count, 2);
        assert_eq!(fmt.sampling_rate, 44100);
        let data: DataHeader = read.read_le().unwrap();
        assert_eq!(data.size as u64, frames * 4);
    }

    #[test]
    fn render_failure_is_an_engine_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = project_file(&dir, "song.ptcop");
        let mut job = DecodeJob::load(
            &path,
            MockEngine::failing(EngineStep::Render),
            &RenderSettings::default(),
        )
        .unwrap();
        assert!(matches!(
            job.encode(OutputFormat::Wav, Vec::<u8>::new()),
            Err(DecodeError::Engine {
                step: EngineStep::Render,
                ..
            })
        ));
    }

    #[test]
    fn output_replaces_extension() {
        assert_eq!(
            output_path("dir/a.ptcop".as_ref(), OutputFormat::Wav),
            std::path::PathBuf::from("dir/a.wav")
        );
        assert_eq!(
            output_path("b.pttune".as_ref(), OutputFormat::Ogg),
            std::path::PathBuf::from("b.ogg")
        );
    }

    #[test]
    fn decode_writes_next_to_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = project_file(&dir, "song.ptcop");
        let config = RunConfig {
            format: OutputFormat::Wav,
            ..Default::default()
        };
        let mut stdout: Vec<u8> = Vec::new();
        let summary = decode(&path, &config, MockEngine::playing(500), &mut stdout).unwrap();
        assert_eq!(summary.bytes_read, 35);
        assert_eq!(summary.frames, 500);
        let written = fs::read(dir.path().join("song.wav")).unwrap();
        assert_eq!(written.len(), 44 + 500 * 4);
        assert!(stdout.is_empty());
    }

    #[test]
    fn stdout_gets_the_stream_instead_of_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = project_file(&dir, "only.ptcop");
        let config = RunConfig {
            to_stdout: true,
            ..Default::default()
        };
        let mut stdout: Vec<u8> = Vec::new();
        let summary = decode(&path, &config, MockEngine::playing(8192), &mut stdout).unwrap();
        assert_eq!(summary.frames, 8192);
        assert_eq!(&stdout[..4], b"OggS");
        assert!(!dir.path().join("only.ogg").exists());
    }

    #[test]
    fn quality_must_stick() {
        let dir = tempfile::tempdir().unwrap();
        let path = project_file(&dir, "song.ptcop");
        let engine = MockEngine {
            forget_quality: true,
            ..MockEngine::playing(10)
        };
        assert!(matches!(
            DecodeJob::load(&path, engine, &RenderSettings::default()),
            Err(DecodeError::Engine {
                step: EngineStep::Quality,
                ..
            })
        ));
    }

    #[test]
    fn no_output_when_engine_refuses() {
        let dir = tempfile::tempdir().unwrap();
        let path = project_file(&dir, "song.ptcop");
        let config = RunConfig::default();
        let mut stdout: Vec<u8> = Vec::new();
        assert!(decode(&path, &config, MockEngine::failing(EngineStep::Read), &mut stdout).is_err());
        assert!(!dir.path().join("song.ogg").exists());
    }
}
