use std::collections::HashMap;

use crate::error::{Result, VmError};
use crate::mem::{Memory, STRING_BASE, STRING_SIZE};

/// Interned string storage backed by the STRING segment.
///
/// Records are appended as `[len u16 LE][bytes]`; ids are dense and fit 16
/// bits. The hash index and the id-to-offset table live host side, the
/// bytes themselves live in the image so REF-free values (STRING tags) stay
/// meaningful across the whole VM.
pub struct Digest {
    len: usize,
    offsets: Vec<usize>,
    index: HashMap<String, u16>,
}

impl Digest {
    pub fn new() -> Self {
        Digest {
            len: 0,
            offsets: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Intern `text`, returning a stable id. Repeat calls with an equal
    /// string return the same id.
    pub fn intern(&mut self, mem: &mut Memory, text: &str) -> Result<u16> {
        if let Some(&id) = self.index.get(text) {
            return Ok(id);
        }
        let bytes = text.as_bytes();
        if bytes.len() > u16::MAX as usize {
            return Err(VmError::range("string literal longer than 64 KiB"));
        }
        let record_len = 2 + bytes.len();
        if self.len + record_len > STRING_SIZE {
            return Err(VmError::range("string digest full"));
        }
        if self.offsets.len() > u16::MAX as usize {
            return Err(VmError::range("string digest id space exhausted"));
        }
        let offset = self.len;
        let addr = STRING_BASE + offset;
        mem.write16(addr, bytes.len() as u16)?;
        mem.slice_mut(addr + 2, bytes.len())?.copy_from_slice(bytes);
        self.len += record_len;

        let id = self.offsets.len() as u16;
        self.offsets.push(offset);
        self.index.insert(text.to_owned(), id);
        Ok(id)
    }

    /// Look up an id minted by [`intern`]. Unknown ids are a range error
    /// (the id came from a corrupted word).
    pub fn get(&self, mem: &Memory, id: u16) -> Result<String> {
        let offset = *self
            .offsets
            .get(id as usize)
            .ok_or_else(|| VmError::range(format!("unknown string id {id}")))?;
        let addr = STRING_BASE + offset;
        let len = mem.read16(addr)? as usize;
        let bytes = mem.slice(addr + 2, len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Id for an already-interned string, without interning.
    pub fn find(&self, text: &str) -> Option<u16> {
        self.index.get(text).copied()
    }

    pub fn count(&self) -> usize {
        self.offsets.len()
    }
}

impl Default for Digest {
    fn default() -> Self {
        Self::new()
    }
}
