//! Self-describing container format: a `\n`-terminated type-name line
//! followed by a binary payload of little-endian primitives and arrays.
//!
//! Mirrors the original format's `saveName`/`checkName` prefix convention,
//! with `byteorder` standing in for the raw `fread`/`fwrite` calls and
//! `memmap2` standing in for the teacher's mmap-backed file reading.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;

use crate::error::{Result, TrackerError};

/// Buffered little-endian binary writer with a leading name line.
pub struct ContainerWriter {
    inner: BufWriter<File>,
}

impl ContainerWriter {
    /// Create `path`, writing `type_name` followed by `\n` before returning.
    pub fn create(path: &Path, type_name: &str) -> Result<Self> {
        let file = File::create(path)?;
        let mut inner = BufWriter::new(file);
        inner.write_all(type_name.as_bytes())?;
        inner.write_all(b"\n")?;
        Ok(Self { inner })
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.inner.write_i32::<LittleEndian>(value)?;
        Ok(())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.inner.write_f32::<LittleEndian>(value)?;
        Ok(())
    }

    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.inner.write_f64::<LittleEndian>(value)?;
        Ok(())
    }

    /// Write `values.len()` as an `i32` header followed by the raw elements.
    pub fn write_f32_vec(&mut self, values: &[f32]) -> Result<()> {
        self.write_i32(values.len() as i32)?;
        for &v in values {
            self.write_f32(v)?;
        }
        Ok(())
    }

    /// Write `values.len()` as an `i32` header followed by the raw elements.
    pub fn write_f64_vec(&mut self, values: &[f64]) -> Result<()> {
        self.write_i32(values.len() as i32)?;
        for &v in values {
            self.write_f64(v)?;
        }
        Ok(())
    }

    /// Write `values.len()` as an `i32` header followed by the raw elements.
    pub fn write_i32_vec(&mut self, values: &[i32]) -> Result<()> {
        self.write_i32(values.len() as i32)?;
        for &v in values {
            self.write_i32(v)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Memory-mapped little-endian binary reader, positioned just past the
/// name line once opened.
pub struct ContainerReader {
    mmap: Mmap,
    pos: usize,
}

impl ContainerReader {
    /// Memory-map `path` and verify its leading name line matches `type_name`.
    pub fn open(path: &Path, type_name: &str) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let newline = mmap
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| TrackerError::BadFormat("missing name line".into()))?;
        let name = std::str::from_utf8(&mmap[..newline])
            .map_err(|_| TrackerError::BadFormat("name line is not valid UTF-8".into()))?;
        if name != type_name {
            return Err(TrackerError::BadFormat(format!(
                "wrong name in file: expected '{type_name}', found '{name}'"
            )));
        }

        Ok(Self {
            mmap,
            pos: newline + 1,
        })
    }

    fn take(&mut self, len: usize) -> Result<&[u8]> {
        if self.pos + len > self.mmap.len() {
            return Err(TrackerError::BadFormat("unexpected end of file".into()));
        }
        let slice = &self.mmap[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let mut slice = self.take(4)?;
        Ok(slice.read_i32::<LittleEndian>()?)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        let mut slice = self.take(4)?;
        Ok(slice.read_f32::<LittleEndian>()?)
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let mut slice = self.take(8)?;
        Ok(slice.read_f64::<LittleEndian>()?)
    }

    pub fn read_f32_vec(&mut self) -> Result<Vec<f32>> {
        let count = self.read_i32()? as usize;
        (0..count).map(|_| self.read_f32()).collect()
    }

    pub fn read_f64_vec(&mut self) -> Result<Vec<f64>> {
        let count = self.read_i32()? as usize;
        (0..count).map(|_| self.read_f64()).collect()
    }

    pub fn read_i32_vec(&mut self) -> Result<Vec<i32>> {
        let count = self.read_i32()? as usize;
        (0..count).map(|_| self.read_i32()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_mixed_payload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("container.bin");

        let mut writer = ContainerWriter::create(&path, "Widget").unwrap();
        writer.write_i32(7).unwrap();
        writer.write_f32_vec(&[1.5, 2.5, 3.5]).unwrap();
        writer.write_f64_vec(&[1.0, -2.0]).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let mut reader = ContainerReader::open(&path, "Widget").unwrap();
        assert_eq!(reader.read_i32().unwrap(), 7);
        assert_eq!(reader.read_f32_vec().unwrap(), vec![1.5, 2.5, 3.5]);
        assert_eq!(reader.read_f64_vec().unwrap(), vec![1.0, -2.0]);
    }

    #[test]
    fn rejects_wrong_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("container.bin");
        let mut writer = ContainerWriter::create(&path, "Widget").unwrap();
        writer.write_i32(1).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let err = ContainerReader::open(&path, "Gadget").unwrap_err();
        assert!(matches!(err, TrackerError::BadFormat(_)));
    }
}
