use std::fs::File;
use std::path::Path;

use memmap2::{Mmap, MmapOptions};

use crate::core::Result;

/// Read-only snapshot of a file that may still be growing.
///
/// The length is fixed when the file is opened; bytes appended later are not
/// visible through this mapping. Empty files are not mapped at all.
pub(crate) struct MmapFile {
    map: Option<Mmap>,
    len: usize,
}

impl MmapFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        if len == 0 {
            return Ok(Self { map: None, len });
        }
        // SAFETY: the writer only appends to a live data file and replaces a
        // store by renaming a new file over it, so bytes inside the mapped
        // length are never rewritten or truncated while this mapping exists.
        let map = unsafe { MmapOptions::new().len(len).map(&file)? };
        Ok(Self {
            map: Some(map),
            len,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.map {
            Some(map) => map,
            None => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }
}
