use std::io::Seek;

use binrw::{binrw, BinReaderExt, BinResult, BinWriterExt};
use log::debug;

use crate::{
    descriptor::Descriptor,
    error::{PxtnError, PxtnResult},
};

/// Upper bound for events in a single project, guards the allocation.
pub const MAX_EVENTS: usize = 0x80000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    On,
    Key,
    PanVolume,
    Velocity,
    Volume,
    Portament,
    BeatClock,
    BeatTempo,
    BeatNum,
    Repeat,
    Last,
    VoiceNo,
    GroupNo,
    Tuning,
    PanTime,
}

impl TryFrom<u8> for EventKind {
    type Error = PxtnError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::On,
            2 => Self::Key,
            3 => Self::PanVolume,
            4 => Self::Velocity,
            5 => Self::Volume,
            6 => Self::Portament,
            7 => Self::BeatClock,
            8 => Self::BeatTempo,
            9 => Self::BeatNum,
            10 => Self::Repeat,
            11 => Self::Last,
            12 => Self::VoiceNo,
            13 => Self::GroupNo,
            14 => Self::Tuning,
            15 => Self::PanTime,
            other => return Err(PxtnError::InvData(format!("unknown event kind {other}"))),
        })
    }
}

/// 7 bits per byte, least significant group first, high bit set means more follow.
#[binrw::parser(reader)]
fn read_varint() -> BinResult<u32> {
    let mut value = 0u32;
    for i in 0..5 {
        let byte: u8 = reader.read_le()?;
        value |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(binrw::Error::AssertFail {
        pos: reader.stream_position()?,
        message: "variable length integer is longer than 5 bytes".into(),
    })
}

#[binrw::writer(writer)]
fn write_varint(value: &u32) -> BinResult<()> {
    let mut rest = *value;
    loop {
        let byte = (rest & 0x7F) as u8;
        rest >>= 7;
        if rest == 0 {
            writer.write_le(&byte)?;
            return Ok(());
        }
        writer.write_le(&(byte | 0x80))?;
    }
}

/// One event as stored in the `Event V5` block, clocks are relative to the
/// previous record.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    #[br(parse_with = read_varint)]
    #[bw(write_with = write_varint)]
    pub delta_clock: u32,
    pub unit_no: u8,
    pub kind: u8,
    #[br(parse_with = read_varint)]
    #[bw(write_with = write_varint)]
    pub value: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub clock: i32,
    pub unit: u8,
    pub kind: EventKind,
    pub value: i32,
}

#[derive(Debug, Default)]
pub struct EventList {
    pub events: Vec<Event>,
}

impl EventList {
    /// reads the block payload, the descriptor must be positioned right after
    /// the block header
    pub fn read_block(desc: &mut Descriptor<'_>, size: u32) -> PxtnResult<Self> {
        let end = desc.position() + size as u64;
        let count: i32 = desc.reader().read_le()?;
        let count = usize::try_from(count)
            .map_err(|_| PxtnError::InvData(format!("negative event count {count}")))?;
        if count > MAX_EVENTS {
            return Err(PxtnError::TooMuchEvent(count));
        }
        let mut events = Vec::new();
        events
            .try_reserve_exact(count)
            .map_err(|_| PxtnError::Memory(count * std::mem::size_of::<Event>()))?;
        let mut clock: i32 = 0;
        for _ in 0..count {
            let record: EventRecord = desc.reader().read_le()?;
            clock = clock
                .checked_add(record.delta_clock as i32)
                .ok_or_else(|| PxtnError::InvData("event clock overflow".into()))?;
            events.push(Event {
                clock,
                unit: record.unit_no,
                kind: EventKind::try_from(record.kind)?,
                value: record.value as i32,
            });
        }
        if desc.position() > end {
            return Err(PxtnError::DescBroken(format!(
                "event block overruns its size by {} bytes",
                desc.position() - end
            )));
        }
        debug!("read {} events", events.len());
        Ok(Self { events })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Last clock touched by any event, including the tail of notes.
    pub fn end_clock(&self) -> i32 {
        self.events
            .iter()
            .map(|e| match e.kind {
                EventKind::On => e.clock.saturating_add(e.value),
                _ => e.clock,
            })
            .max()
            .unwrap_or(0)
    }

    pub fn max_unit(&self) -> Option<u8> {
        self.events.iter().map(|e| e.unit).max()
    }
}
