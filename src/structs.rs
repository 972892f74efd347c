use binrw::binrw;

// note: a project is a fixed header followed by tagged blocks, each block is an
// 8 byte tag, a little endian u32 size and the payload. The end tag has no size.

pub const PROJECT_V5: &[u8; 16] = b"PTCOLLAGE-071119";
pub const TUNE_V5: &[u8; 16] = b"PTTUNE--20071119";

/// Older container revisions, recognized but not readable.
pub const OLD_VERSIONS: [&[u8; 16]; 7] = [
    b"PTCOLLAGE-050227",
    b"PTCOLLAGE-050608",
    b"PTCOLLAGE-060115",
    b"PTCOLLAGE-060930",
    b"PTTUNE--20050608",
    b"PTTUNE--20060115",
    b"PTTUNE--20060930",
];

pub const TAG_END: &[u8; 8] = b"pxtoneND";
pub const TAG_ANTI_OPERATION: &[u8; 8] = b"antiOPER";
pub const TAG_MASTER: &[u8; 8] = b"MasterV5";
pub const TAG_EVENT: &[u8; 8] = b"Event V5";
pub const TAG_UNIT_COUNT: &[u8; 8] = b"num UNIT";
pub const TAG_MATERIAL_PCM: &[u8; 8] = b"matePCM ";
pub const TAG_NAME: &[u8; 8] = b"textNAME";
pub const TAG_COMMENT: &[u8; 8] = b"textCOMM";

/// Materials the engine can't voice natively, they fall back to a tone.
pub const TONE_MATERIAL_TAGS: [&[u8; 8]; 3] = [b"matePTV ", b"matePTN ", b"mateOGGV"];

/// Blocks that are understood but carry nothing the renderer uses.
pub const SKIPPED_TAGS: [&[u8; 8]; 8] = [
    b"effeDELA",
    b"effeOVER",
    b"assiUNIT",
    b"assiWOIC",
    b"pxtnUNIT",
    b"evenMAST",
    b"evenUNIT",
    b"x1x_PROJ",
];

#[binrw]
#[brw(little)]
#[derive(Debug, Default, Clone)]
pub struct ProjectHeader {
    pub version: [u8; 16],
    pub exe_version: u16,
    // always zero
    pub reserved: u16,
}

impl ProjectHeader {
    pub fn byte_len() -> u32 {
        20
    }
}

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq)]
pub struct Master {
    pub beat_clock: i16,
    pub beat_num: i8,
    pub beat_tempo: f32,
    pub repeat_clock: i32,
    pub last_clock: i32,
}

impl Default for Master {
    fn default() -> Self {
        Self {
            beat_clock: 480,
            beat_num: 4,
            beat_tempo: 120.0,
            repeat_clock: 0,
            last_clock: 0,
        }
    }
}

impl Master {
    pub fn byte_len() -> u32 {
        15
    }
}

#[binrw]
#[brw(little)]
#[derive(Debug, Default, Clone)]
pub struct UnitCount {
    pub count: i16,
    pub reserved: i16,
}

impl UnitCount {
    pub fn byte_len() -> u32 {
        4
    }
}

pub const PCM_FLAG_LOOP: u32 = 0x0000_0001;

#[binrw]
#[brw(little)]
#[derive(Debug, Default, Clone)]
pub struct PcmMaterialHeader {
    pub x3x_unit_no: u16,
    pub basic_key: u16,
    pub voice_flags: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub sample_rate: u32,
    pub tuning: f32,
    // the raw pcm data follows directly
    pub data_size: u32,
}

impl PcmMaterialHeader {
    pub fn byte_len() -> u32 {
        24
    }
}
