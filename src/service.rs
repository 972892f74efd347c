use binrw::BinReaderExt;
use log::debug;

use crate::{
    descriptor::Descriptor,
    engine::Engine,
    error::{PxtnError, PxtnResult},
    event::{EventKind, EventList},
    structs::{
        Master, PcmMaterialHeader, ProjectHeader, UnitCount, OLD_VERSIONS, PROJECT_V5,
        SKIPPED_TAGS, TAG_ANTI_OPERATION, TAG_COMMENT, TAG_END, TAG_EVENT, TAG_MASTER,
        TAG_MATERIAL_PCM, TAG_NAME, TAG_UNIT_COUNT, TONE_MATERIAL_TAGS, TUNE_V5,
    },
    woice::Woice,
};

pub const VALID_SAMPLE_RATES: [u32; 4] = [11025, 22050, 44100, 48000];

const DEFAULT_KEY: i32 = 0x6000;
const DEFAULT_VELOCITY: i32 = 104;
const DEFAULT_VOLUME: i32 = 104;
const DEFAULT_PAN: i32 = 64;
// keys outside this range are inaudible anyway
const MAX_KEY: i32 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality {
    pub channels: u16,
    pub sample_rate: u32,
}

/// Settings for a render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPreparation {
    /// jump back to the repeat clock when the end is reached
    pub looping: bool,
    /// silence units whose played flag is cleared
    pub unit_mute: bool,
    /// how often playback jumps back, only used with `looping`
    pub loop_count: u32,
    pub start_pos_sample: u64,
    pub master_volume: f32,
}

impl Default for RenderPreparation {
    fn default() -> Self {
        Self {
            looping: true,
            unit_mute: false,
            loop_count: 1,
            start_pos_sample: 0,
            master_volume: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TimedEvent {
    sample: u64,
    unit: usize,
    kind: EventKind,
    value: i32,
    // only meaningful for notes
    length: u64,
}

#[derive(Debug, Clone)]
struct Note {
    end: u64,
    phase: f64,
}

#[derive(Debug, Clone)]
struct UnitState {
    key: i32,
    velocity: i32,
    volume: i32,
    pan: i32,
    woice: usize,
    muted: bool,
    note: Option<Note>,
}

impl UnitState {
    fn new(index: usize, muted: bool) -> Self {
        Self {
            key: DEFAULT_KEY,
            velocity: DEFAULT_VELOCITY,
            volume: DEFAULT_VOLUME,
            pan: DEFAULT_PAN,
            woice: index,
            muted,
            note: None,
        }
    }
}

/// State of a prepared render pass.
#[derive(Debug)]
struct Moo {
    quality: Quality,
    timeline: Vec<TimedEvent>,
    units: Vec<UnitState>,
    cursor: usize,
    pos: u64,
    end: u64,
    repeat: u64,
    loops_left: u32,
    remaining: u64,
    total_frames: u64,
    master_volume: f32,
}

impl Moo {
    fn apply_due_events(&mut self) {
        while let Some(ev) = self.timeline.get(self.cursor).copied() {
            if ev.sample > self.pos {
                break;
            }
            let unit = &mut self.units[ev.unit];
            match ev.kind {
                EventKind::On => {
                    unit.note = Some(Note {
                        end: ev.sample + ev.length,
                        phase: 0.0,
                    })
                }
                EventKind::Key => unit.key = ev.value.clamp(0, MAX_KEY),
                EventKind::Velocity => unit.velocity = ev.value.clamp(0, 128),
                EventKind::Volume => unit.volume = ev.value.clamp(0, 128),
                EventKind::PanVolume => unit.pan = ev.value.clamp(0, 128),
                EventKind::VoiceNo => unit.woice = ev.value.max(0) as usize,
                // tempo changes and the rest don't affect the voices here
                _ => {}
            }
            self.cursor += 1;
        }
    }

    fn jump_to_repeat(&mut self) {
        self.loops_left -= 1;
        self.pos = self.repeat;
        let repeat = self.repeat;
        self.cursor = self.timeline.partition_point(|e| e.sample < repeat);
        for unit in self.units.iter_mut() {
            unit.note = None;
        }
    }

    fn mix(&mut self, woices: &[Woice]) -> (f32, f32) {
        let fallback = Woice::Tone;
        let (mut left, mut right) = (0.0f32, 0.0f32);
        for unit in self.units.iter_mut() {
            let Some(note) = unit.note.as_mut() else {
                continue;
            };
            if self.pos >= note.end {
                unit.note = None;
                continue;
            }
            let woice = woices.get(unit.woice).unwrap_or(&fallback);
            let Some(value) = woice.sample(note.phase) else {
                unit.note = None;
                continue;
            };
            note.phase += woice.phase_step(unit.key, self.quality.sample_rate);
            if unit.muted {
                continue;
            }
            let value = value * unit.velocity as f32 / 128.0 * unit.volume as f32 / 128.0;
            left += value * ((128 - unit.pan) as f32 / 64.0).min(1.0);
            right += value * (unit.pan as f32 / 64.0).min(1.0);
        }
        (left * self.master_volume, right * self.master_volume)
    }

    fn render(&mut self, woices: &[Woice], buf: &mut [i16]) -> usize {
        let channels = self.quality.channels as usize;
        let mut written = 0;
        for frame in buf.chunks_exact_mut(channels) {
            if self.remaining == 0 {
                break;
            }
            if self.pos >= self.end && self.loops_left > 0 {
                self.jump_to_repeat();
            }
            self.apply_due_events();
            let (left, right) = self.mix(woices);
            match frame {
                [mono] => *mono = to_i16((left + right) * 0.5),
                [l, r] => {
                    *l = to_i16(left);
                    *r = to_i16(right);
                }
                _ => unreachable!("channel count is validated when negotiating quality"),
            }
            self.pos += 1;
            self.remaining -= 1;
            written += channels;
        }
        written
    }
}

fn to_i16(value: f32) -> i16 {
    (value.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Native engine for pxtone v5 projects.
#[derive(Debug, Default)]
pub struct Service {
    initialized: bool,
    quality: Option<Quality>,
    master: Master,
    name: Option<String>,
    played: Vec<bool>,
    woices: Vec<Woice>,
    events: Option<EventList>,
    ready: bool,
    moo: Option<Moo>,
}

impl Service {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn master(&self) -> &Master {
        &self.master
    }

    pub fn woice_count(&self) -> usize {
        self.woices.len()
    }

    /// `None` once the event list was released.
    pub fn event_count(&self) -> Option<usize> {
        self.events.as_ref().map(EventList::len)
    }

    fn clear_project(&mut self) {
        self.master = Master::default();
        self.name = None;
        self.played.clear();
        self.woices.clear();
        self.events = None;
        self.ready = false;
        self.moo = None;
    }

    fn read_text(desc: &mut Descriptor<'_>, size: u32) -> PxtnResult<String> {
        let raw = desc.read_bytes(size as usize)?;
        let trimmed = match raw.iter().position(|b| *b == 0) {
            Some(nul) => &raw[..nul],
            None => raw,
        };
        Ok(String::from_utf8_lossy(trimmed).into_owned())
    }

    fn samples_per_clock(&self, sample_rate: u32) -> f64 {
        sample_rate as f64 * 60.0
            / (self.master.beat_tempo as f64 * self.master.beat_clock as f64)
    }
}

impl Engine for Service {
    fn init(&mut self) -> PxtnResult<()> {
        self.clear_project();
        self.quality = None;
        self.initialized = true;
        Ok(())
    }

    fn set_destination_quality(&mut self, channels: u16, sample_rate: u32) -> PxtnResult<()> {
        if !self.initialized {
            return Err(PxtnError::Init);
        }
        if !matches!(channels, 1 | 2) {
            return Err(PxtnError::Param(format!("{channels} channels")));
        }
        if !VALID_SAMPLE_RATES.contains(&sample_rate) {
            return Err(PxtnError::Param(format!("sample rate {sample_rate}Hz")));
        }
        self.quality = Some(Quality {
            channels,
            sample_rate,
        });
        // a prepared pass was computed for the old quality
        self.moo = None;
        Ok(())
    }

    fn read(&mut self, desc: &mut Descriptor<'_>) -> PxtnResult<()> {
        if !self.initialized {
            return Err(PxtnError::Init);
        }
        self.clear_project();

        let header: ProjectHeader = desc.reader().read_le()?;
        let version = &header.version;
        if version != PROJECT_V5 && version != TUNE_V5 {
            let text = String::from_utf8_lossy(version).into_owned();
            return Err(if OLD_VERSIONS.contains(&version) {
                PxtnError::FmtNew(text)
            } else {
                PxtnError::FmtUnknown(text)
            });
        }

        let mut events = None;
        let mut unit_count = None;
        loop {
            let tag: [u8; 8] = desc.reader().read_le()?;
            if &tag == TAG_END {
                break;
            }
            let size: u32 = desc.reader().read_le()?;
            let start = desc.position();
            if size as u64 > desc.remaining() {
                return Err(PxtnError::DescBroken(format!(
                    "block {:?} claims {size} bytes, {} left",
                    String::from_utf8_lossy(&tag),
                    desc.remaining()
                )));
            }
            match &tag {
                TAG_ANTI_OPERATION => return Err(PxtnError::AntiOperation),
                TAG_MASTER => {
                    if size != Master::byte_len() {
                        return Err(PxtnError::InvData(format!("master block of {size} bytes")));
                    }
                    self.master = desc.reader().read_le()?;
                }
                TAG_EVENT => events = Some(EventList::read_block(desc, size)?),
                TAG_UNIT_COUNT => {
                    let count: UnitCount = desc.reader().read_le()?;
                    if count.count < 0 {
                        return Err(PxtnError::InvData(format!("unit count {}", count.count)));
                    }
                    unit_count = Some(count.count as usize);
                }
                TAG_MATERIAL_PCM => {
                    let pcm: PcmMaterialHeader = desc.reader().read_le()?;
                    if pcm.data_size > size.saturating_sub(PcmMaterialHeader::byte_len()) {
                        return Err(PxtnError::DescBroken(format!(
                            "pcm data of {} bytes in a block of {size}",
                            pcm.data_size
                        )));
                    }
                    let data = desc.read_bytes(pcm.data_size as usize)?.to_vec();
                    self.woices.push(Woice::pcm(pcm, data));
                }
                TAG_NAME => self.name = Some(Self::read_text(desc, size)?),
                TAG_COMMENT => {
                    let comment = Self::read_text(desc, size)?;
                    debug!("comment: {comment:?}");
                }
                t if TONE_MATERIAL_TAGS.contains(&t) => {
                    debug!("material {:?} is voiced as a tone", String::from_utf8_lossy(t));
                    self.woices.push(Woice::Tone);
                }
                t if SKIPPED_TAGS.contains(&t) => {
                    debug!("skipping block {:?}", String::from_utf8_lossy(t));
                }
                t => return Err(PxtnError::InvCode(String::from_utf8_lossy(t).into_owned())),
            }
            desc.seek_to(start + size as u64)?;
        }

        let events = events.unwrap_or_default();
        let unit_count = unit_count
            .unwrap_or_else(|| events.max_unit().map_or(0, |unit| unit as usize + 1));
        if let Some(unit) = events.max_unit() {
            if unit as usize >= unit_count {
                return Err(PxtnError::InvData(format!(
                    "event for unit {unit}, but only {unit_count} units"
                )));
            }
        }
        debug!(
            "read project: {unit_count} units, {} woices, {} events",
            self.woices.len(),
            events.len()
        );
        self.played = vec![true; unit_count];
        self.events = Some(events);
        Ok(())
    }

    fn tones_ready(&mut self) -> PxtnResult<()> {
        if self.events.is_none() {
            return Err(PxtnError::Fatal);
        }
        if self.master.beat_clock <= 0 {
            return Err(PxtnError::DenyBeatClock(self.master.beat_clock as i32));
        }
        let tempo = self.master.beat_tempo;
        if !tempo.is_finite() || tempo <= 0.0 {
            return Err(PxtnError::InvData(format!("tempo {tempo}")));
        }
        for woice in self.woices.iter_mut() {
            woice.build()?;
        }
        self.ready = true;
        Ok(())
    }

    fn unit_count(&self) -> usize {
        self.played.len()
    }

    fn set_unit_played(&mut self, unit: usize, played: bool) -> PxtnResult<()> {
        let count = self.played.len();
        let flag = self
            .played
            .get_mut(unit)
            .ok_or_else(|| PxtnError::Param(format!("unit {unit} of {count}")))?;
        *flag = played;
        Ok(())
    }

    fn prepare(&mut self, prep: &RenderPreparation) -> PxtnResult<()> {
        let (Some(quality), Some(events), true) = (self.quality, self.events.as_ref(), self.ready)
        else {
            return Err(PxtnError::MooInit);
        };
        if !prep.master_volume.is_finite() || !(0.0..=1.0).contains(&prep.master_volume) {
            return Err(PxtnError::Param(format!(
                "master volume {}",
                prep.master_volume
            )));
        }
        let spc = self.samples_per_clock(quality.sample_rate);
        let to_sample = |clock: i32| (clock.max(0) as f64 * spc).round() as u64;

        let end_clock = if self.master.last_clock > 0 {
            self.master.last_clock
        } else {
            events.end_clock()
        };
        let end = to_sample(end_clock);
        if prep.start_pos_sample > end {
            return Err(PxtnError::Param(format!(
                "start sample {} is past the end {end}",
                prep.start_pos_sample
            )));
        }
        let repeat = to_sample(self.master.repeat_clock);
        let loops = if prep.looping && repeat < end {
            prep.loop_count
        } else {
            0
        };

        let timeline = events
            .events
            .iter()
            .map(|e| TimedEvent {
                sample: to_sample(e.clock),
                unit: e.unit as usize,
                kind: e.kind,
                value: e.value,
                length: match e.kind {
                    EventKind::On => to_sample(e.value),
                    _ => 0,
                },
            })
            .collect();
        let units = self
            .played
            .iter()
            .enumerate()
            .map(|(idx, played)| UnitState::new(idx, prep.unit_mute && !played))
            .collect();
        let total_frames = (end - prep.start_pos_sample)
            .saturating_add((loops as u64).saturating_mul(end.saturating_sub(repeat)));
        let mut moo = Moo {
            quality,
            timeline,
            units,
            cursor: 0,
            pos: prep.start_pos_sample,
            end,
            repeat,
            loops_left: loops,
            remaining: total_frames,
            total_frames,
            master_volume: prep.master_volume,
        };
        // fast forward the unit state to the start position
        if prep.start_pos_sample > 0 {
            moo.apply_due_events();
        }
        debug!("prepared render: {total_frames} frames, {loops} loops");
        self.moo = Some(moo);
        Ok(())
    }

    fn release_events(&mut self) {
        self.events = None;
    }

    fn total_frames(&self) -> u64 {
        self.moo.as_ref().map_or(0, |moo| moo.total_frames)
    }

    fn quality(&self) -> Option<Quality> {
        self.quality
    }

    fn project_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn render(&mut self, buf: &mut [i16]) -> PxtnResult<usize> {
        let moo = self.moo.as_mut().ok_or(PxtnError::MooInit)?;
        Ok(moo.render(&self.woices, buf))
    }
}
