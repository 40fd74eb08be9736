//! Little-endian, length-prefixed primitives over `std::io`
//!
//! Every length field is a `u32` in little-endian order. The traits are
//! blanket-implemented, so they work the same over `&[u8]`, `Cursor`,
//! `Vec<u8>`, files, and the chunked [`crate::stream`] types.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::IO_BLOCK_SIZE;

/// Upper bound on `-N` suffixes tried when an attachment name is taken.
const MAX_NAME_SUFFIX: u32 = 9999;

pub trait ReadExt: Read {
    /// Fill `buf` as far as the source allows.
    ///
    /// Returns fewer than `buf.len()` bytes only at end of source.
    fn read_up_to(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    /// Read exactly `N` bytes into an array.
    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        if self.read_up_to(&mut buf)? != N {
            return Err(Error::Truncated);
        }
        Ok(buf)
    }

    /// Read exactly `len` bytes.
    ///
    /// The buffer grows with the bytes actually read, so a forged length
    /// prefix in front of a short input costs no more than the input itself.
    fn read_exact_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(len.min(IO_BLOCK_SIZE));
        Read::take(&mut *self, len as u64).read_to_end(&mut buf)?;
        if buf.len() != len {
            return Err(Error::Truncated);
        }
        Ok(buf)
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    fn read_length_prefixed_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u32_le()?;
        self.read_exact_vec(len_to_usize(len)?)
    }

    fn read_length_prefixed_string(&mut self) -> Result<String> {
        Ok(String::from_utf8(self.read_length_prefixed_bytes()?)?)
    }

    /// Read a length-prefixed file name and a length-prefixed body, streaming
    /// the body into a new file under `dest_dir` one block at a time.
    ///
    /// Returns the path of the created file. On error a partially written
    /// file may remain; removing it is up to the caller.
    fn read_length_prefixed_file(
        &mut self,
        dest_dir: &Path,
        names: &mut UniqueNames,
    ) -> Result<PathBuf> {
        let name = self.read_length_prefixed_string()?;
        validate_file_name(&name)?;
        let size = len_to_usize(self.read_u32_le()?)?;

        let (path, mut file) = names.create(dest_dir, &name)?;

        let mut buf = vec![0u8; size.min(IO_BLOCK_SIZE)];
        let mut remaining = size;
        while remaining > 0 {
            let n = remaining.min(buf.len());
            if self.read_up_to(&mut buf[..n])? != n {
                return Err(Error::Truncated);
            }
            file.write_all(&buf[..n])?;
            remaining -= n;
        }
        file.flush()?;

        Ok(path)
    }
}

impl<R: Read + ?Sized> ReadExt for R {}

pub trait WriteExt: Write {
    fn write_u32_le(&mut self, n: u32) -> Result<()> {
        self.write_all(&n.to_le_bytes())?;
        Ok(())
    }

    /// Write `len` as a length prefix, failing if it does not fit in a `u32`.
    fn write_len(&mut self, len: usize) -> Result<()> {
        let n = u32::try_from(len).map_err(|_| Error::LengthOverflow(len as u64))?;
        self.write_u32_le(n)
    }

    fn write_length_prefixed_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.write_len(data.len())?;
        self.write_all(data)?;
        Ok(())
    }

    fn write_length_prefixed_string(&mut self, s: &str) -> Result<()> {
        self.write_length_prefixed_bytes(s.as_bytes())
    }

    /// Write `declared_size` as a length prefix, then stream that many bytes
    /// from the file at `path` one block at a time.
    ///
    /// A source shorter than `declared_size` fails with [`Error::Truncated`].
    fn write_length_prefixed_file(&mut self, path: &Path, declared_size: u64) -> Result<()> {
        let len = u32::try_from(declared_size).map_err(|_| Error::LengthOverflow(declared_size))?;
        let mut file = fs::File::open(path)?;
        self.write_u32_le(len)?;

        let mut remaining = len_to_usize(len)?;
        let mut buf = vec![0u8; remaining.min(IO_BLOCK_SIZE)];
        while remaining > 0 {
            let n = remaining.min(buf.len());
            if file.read_up_to(&mut buf[..n])? != n {
                return Err(Error::Truncated);
            }
            self.write_all(&buf[..n])?;
            remaining -= n;
        }
        Ok(())
    }
}

impl<W: Write + ?Sized> WriteExt for W {}

fn len_to_usize(len: u32) -> Result<usize> {
    usize::try_from(len).map_err(|_| Error::LengthOverflow(u64::from(len)))
}

/// Attachment names come from untrusted input and must be a single plain
/// path component.
fn validate_file_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.chars().any(|c| matches!(c, '/' | '\\' | '\0'));
    if bad {
        return Err(Error::InvalidFileName(name.to_string()));
    }
    Ok(())
}

/// Picks fresh file names inside one destination directory.
///
/// The first file called `name` keeps it; later ones become `stem-1.ext`,
/// `stem-2.ext`, ... The next suffix is remembered per name, so repeated
/// names do not rescan suffixes that are already taken.
#[derive(Debug, Default)]
pub struct UniqueNames {
    next_suffix: HashMap<String, u32>,
}

impl UniqueNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `dir/name`, or `dir/stem-N.ext` if the name is already taken.
    pub fn create(&mut self, dir: &Path, name: &str) -> Result<(PathBuf, fs::File)> {
        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
            _ => (name, None),
        };

        let start = self.next_suffix.get(name).copied().unwrap_or(0);
        for i in start..=MAX_NAME_SUFFIX {
            let candidate = match (i, ext) {
                (0, _) => name.to_string(),
                (i, Some(ext)) => format!("{stem}-{i}.{ext}"),
                (i, None) => format!("{stem}-{i}"),
            };
            let path = dir.join(&candidate);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    self.next_suffix.insert(name.to_string(), i + 1);
                    return Ok((path, file));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        self.next_suffix.insert(name.to_string(), MAX_NAME_SUFFIX + 1);
        Err(Error::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free file name for {name:?} in {}", dir.display()),
        )))
    }

    /// The suffix the next file called `name` will try first.
    #[cfg(test)]
    fn next_suffix(&self, name: &str) -> u32 {
        self.next_suffix.get(name).copied().unwrap_or(0)
    }
}
