use std::io::Cursor;

use crate::error::{PxtnError, PxtnResult};

/// Read-only view over a project that is fully held in memory.
pub struct Descriptor<'a> {
    data: &'a [u8],
    cursor: Cursor<&'a [u8]>,
}

impl<'a> Descriptor<'a> {
    pub fn from_memory(data: &'a [u8]) -> PxtnResult<Self> {
        if data.is_empty() {
            return Err(PxtnError::DescBroken("empty memory blob".into()));
        }
        // sizes are stored as 32 bit signed values inside the container
        if data.len() > i32::MAX as usize {
            return Err(PxtnError::DescBroken(format!(
                "memory blob of {} bytes is too large",
                data.len()
            )));
        }
        Ok(Self {
            data,
            cursor: Cursor::new(data),
        })
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    pub fn remaining(&self) -> u64 {
        self.size().saturating_sub(self.position())
    }

    /// The underlying reader, for use with binrw's `read_le`.
    pub fn reader(&mut self) -> &mut Cursor<&'a [u8]> {
        &mut self.cursor
    }

    pub fn seek_to(&mut self, pos: u64) -> PxtnResult<()> {
        if pos > self.size() {
            return Err(PxtnError::DescBroken(format!(
                "seek to {pos} past the end ({})",
                self.size()
            )));
        }
        self.cursor.set_position(pos);
        Ok(())
    }

    pub fn read_bytes(&mut self, count: usize) -> PxtnResult<&'a [u8]> {
        if count as u64 > self.remaining() {
            return Err(PxtnError::DescBroken(format!(
                "wanted {count} bytes at {}, only {} left",
                self.position(),
                self.remaining()
            )));
        }
        let start = self.position() as usize;
        self.cursor.set_position((start + count) as u64);
        Ok(&self.data[start..start + count])
    }
}
