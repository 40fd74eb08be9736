//! Chunked AES-256-GCM stream
//!
//! Plaintext is cut into chunks of [`CHUNK_SIZE`] bytes (the last one may be
//! shorter), each sealed independently under the file key with a fresh nonce:
//! ```text
//! [u32 LE: sealed length][sealed chunk: nonce || ciphertext || tag]
//! ...
//! [u32 LE: 0]   terminator
//! ```
//!
//! Both ends hold at most one chunk in memory.

use std::io::{self, Read, Write};

use tracing::trace;

use crate::aead::{open, seal, FileKey};
use crate::error::{Error, Result};
use crate::wire::{ReadExt, WriteExt};
use crate::{CHUNK_SIZE, NONCE_SIZE, TAG_SIZE};

/// Encrypting writer. Call [`StreamWriter::finish`] to emit the terminator.
pub struct StreamWriter<W: Write> {
    inner: W,
    key: FileKey,
    buf: Vec<u8>,
    chunk_size: usize,
    chunks: u64,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(inner: W, key: FileKey) -> Self {
        Self::with_chunk_size(inner, key, CHUNK_SIZE)
    }

    /// Panics if `chunk_size` is zero.
    pub fn with_chunk_size(inner: W, key: FileKey, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        Self {
            inner,
            key,
            buf: Vec::with_capacity(chunk_size),
            chunk_size,
            chunks: 0,
        }
    }

    fn seal_chunk(&mut self) -> Result<()> {
        let sealed = seal(self.key.as_bytes(), &self.buf)?;
        self.inner.write_len(sealed.len())?;
        self.inner.write_all(&sealed)?;
        trace!(chunk = self.chunks, plaintext_len = self.buf.len(), "sealed chunk");
        self.buf.clear();
        self.chunks += 1;
        Ok(())
    }

    /// Seal any buffered remainder, write the terminator, and hand back the
    /// underlying writer.
    pub fn finish(mut self) -> Result<W> {
        if !self.buf.is_empty() {
            self.seal_chunk()?;
        }
        self.inner.write_u32_le(0)?;
        self.inner.flush()?;
        trace!(chunks = self.chunks, "stream finished");
        Ok(self.inner)
    }
}

impl<W: Write> Write for StreamWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < data.len() {
            let room = self.chunk_size - self.buf.len();
            let n = room.min(data.len() - written);
            self.buf.extend_from_slice(&data[written..written + n]);
            written += n;
            if self.buf.len() == self.chunk_size {
                self.seal_chunk()?;
            }
        }
        Ok(written)
    }

    /// Flushes the underlying writer only. A partial chunk stays buffered
    /// until it fills up or the stream is finished.
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Decrypting reader. Yields end-of-stream once the terminator is read.
pub struct StreamReader<R: Read> {
    inner: R,
    key: FileKey,
    buf: Vec<u8>,
    pos: usize,
    max_frame: usize,
    done: bool,
    chunks: u64,
}

impl<R: Read> StreamReader<R> {
    pub fn new(inner: R, key: FileKey) -> Self {
        Self::with_chunk_size(inner, key, CHUNK_SIZE)
    }

    /// Panics if `chunk_size` is zero.
    pub fn with_chunk_size(inner: R, key: FileKey, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        Self {
            inner,
            key,
            buf: Vec::new(),
            pos: 0,
            max_frame: chunk_size + NONCE_SIZE + TAG_SIZE,
            done: false,
            chunks: 0,
        }
    }

    /// Pull and open the next frame. Returns `false` at the terminator.
    fn next_chunk(&mut self) -> Result<bool> {
        let len = self.inner.read_u32_le()?;
        if len == 0 {
            self.done = true;
            trace!(chunks = self.chunks, "stream terminator");
            return Ok(false);
        }
        if u64::from(len) > self.max_frame as u64 {
            return Err(Error::ChunkTooLarge {
                len: len as usize,
                max: self.max_frame,
            });
        }

        let frame = self.inner.read_exact_vec(len as usize)?;
        self.buf = open(self.key.as_bytes(), &frame)?;
        self.pos = 0;
        trace!(chunk = self.chunks, plaintext_len = self.buf.len(), "opened chunk");
        self.chunks += 1;
        Ok(true)
    }

    /// Check that the stream ended exactly where the caller stopped reading,
    /// and hand back the underlying reader positioned after the terminator.
    pub fn finish(mut self) -> Result<R> {
        if self.pos != self.buf.len() {
            return Err(Error::TrailingData);
        }
        if !self.done && self.next_chunk()? {
            return Err(Error::TrailingData);
        }
        Ok(self.inner)
    }
}

impl<R: Read> Read for StreamReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        while self.pos == self.buf.len() {
            if self.done || !self.next_chunk()? {
                return Ok(0);
            }
        }

        let n = (self.buf.len() - self.pos).min(out.len());
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KEY: [u8; 32] = [0x42; 32];

    fn key() -> FileKey {
        FileKey::from_bytes(KEY)
    }

    fn encrypt(data: &[u8], chunk_size: usize) -> Vec<u8> {
        let mut w = StreamWriter::with_chunk_size(Vec::new(), key(), chunk_size);
        w.write_all(data).unwrap();
        w.finish().unwrap()
    }

    fn decrypt(stream: &[u8], chunk_size: usize) -> Result<Vec<u8>> {
        let mut r = StreamReader::with_chunk_size(stream, key(), chunk_size);
        let mut out = Vec::new();
        r.read_to_end(&mut out)?;
        r.finish()?;
        Ok(out)
    }

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 256) as u8).collect()
    }

    #[test]
    fn test_empty_stream_is_just_terminator() {
        let stream = encrypt(b"", 16);
        assert_eq!(stream, [0, 0, 0, 0]);
        assert!(decrypt(&stream, 16).unwrap().is_empty());
    }

    #[test]
    fn test_exactly_one_chunk() {
        let plain = data(16);
        let stream = encrypt(&plain, 16);

        // one full frame, no empty trailing frame
        assert_eq!(stream.len(), 4 + (12 + 16 + 16) + 4);
        assert_eq!(decrypt(&stream, 16).unwrap(), plain);
    }

    #[test]
    fn test_frame_layout_with_remainder() {
        let stream = encrypt(&data(40), 16);

        let mut r = stream.as_slice();
        let mut frames = Vec::new();
        loop {
            let len = r.read_u32_le().unwrap();
            if len == 0 {
                break;
            }
            r.read_exact_vec(len as usize).unwrap();
            frames.push(len);
        }
        assert_eq!(frames, [44, 44, 36]);
        assert!(r.is_empty());
    }

    #[test]
    fn test_roundtrip_chunk_boundaries() {
        for len in [1, 15, 16, 17, 47, 48, 49, 3 * 16 + 7] {
            let plain = data(len);
            assert_eq!(decrypt(&encrypt(&plain, 16), 16).unwrap(), plain, "len {len}");
        }
    }

    #[test]
    fn test_roundtrip_default_chunk_size() {
        let plain = data(3 * CHUNK_SIZE + 1234);
        let mut w = StreamWriter::new(Vec::new(), key());
        w.write_all(&plain).unwrap();
        let stream = w.finish().unwrap();

        let mut r = StreamReader::new(stream.as_slice(), key());
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        r.finish().unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn test_small_writes_accumulate() {
        let plain = data(100);
        let mut w = StreamWriter::with_chunk_size(Vec::new(), key(), 16);
        for byte in &plain {
            w.write_all(std::slice::from_ref(byte)).unwrap();
        }
        let stream = w.finish().unwrap();

        // same framing as one large write; only nonces and ciphertext differ
        assert_eq!(stream.len(), encrypt(&plain, 16).len());
        assert_eq!(decrypt(&stream, 16).unwrap(), plain);
    }

    #[test]
    fn test_tampered_chunk_fails() {
        let stream = encrypt(&data(40), 16);
        // first byte of the second frame's ciphertext
        let idx = 4 + 44 + 4 + 12;
        let mut tampered = stream.clone();
        tampered[idx] ^= 0x80;

        assert!(matches!(
            decrypt(&tampered, 16),
            Err(Error::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let stream = encrypt(&data(10), 16);
        let wrong = FileKey::from_bytes([1; 32]);
        let mut r = StreamReader::with_chunk_size(stream.as_slice(), wrong, 16);
        let mut out = Vec::new();
        let err = Error::from(r.read_to_end(&mut out).unwrap_err());
        assert!(matches!(err, Error::AuthenticationFailed));
        assert!(out.is_empty(), "nothing from a failed chunk may be released");
    }

    #[test]
    fn test_every_truncation_is_truncated() {
        let stream = encrypt(&data(40), 16);
        for cut in 0..stream.len() {
            let result = decrypt(&stream[..cut], 16);
            assert!(
                matches!(result, Err(Error::Truncated)),
                "cut at {cut}: {result:?}"
            );
        }
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut stream = Vec::new();
        stream.write_u32_le(16 + 28 + 1).unwrap();
        stream.extend_from_slice(&[0u8; 64]);

        assert!(matches!(
            decrypt(&stream, 16),
            Err(Error::ChunkTooLarge { len: 45, max: 44 })
        ));
    }

    #[test]
    fn test_hostile_frame_length_rejected_before_allocation() {
        let mut stream = Vec::new();
        stream.write_u32_le(u32::MAX).unwrap();

        assert!(matches!(
            decrypt(&stream, CHUNK_SIZE),
            Err(Error::ChunkTooLarge { .. })
        ));
    }

    #[test]
    fn test_read_past_terminator_is_eof() {
        let stream = encrypt(b"abc", 16);
        let mut r = StreamReader::with_chunk_size(stream.as_slice(), key(), 16);
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(r.read(&mut buf).unwrap(), 0);
        assert_eq!(r.read(&mut buf).unwrap(), 0);
        assert_eq!(out, b"abc");
    }

    #[test]
    fn test_finish_with_unread_plaintext() {
        let stream = encrypt(&data(10), 16);
        let mut r = StreamReader::with_chunk_size(stream.as_slice(), key(), 16);
        let mut buf = [0u8; 5];
        r.read_exact(&mut buf).unwrap();

        assert!(matches!(r.finish(), Err(Error::TrailingData)));
    }

    #[test]
    fn test_finish_with_unread_chunk() {
        let stream = encrypt(&data(8), 4);
        let mut r = StreamReader::with_chunk_size(stream.as_slice(), key(), 4);
        let mut buf = [0u8; 4];
        r.read_exact(&mut buf).unwrap();

        assert!(matches!(r.finish(), Err(Error::TrailingData)));
    }

    #[test]
    fn test_finish_returns_reader_after_terminator() {
        let mut stream = encrypt(b"payload", 16);
        stream.extend_from_slice(b"tail");

        let mut r = StreamReader::with_chunk_size(stream.as_slice(), key(), 16);
        let mut buf = [0u8; 7];
        r.read_exact(&mut buf).unwrap();
        let rest = r.finish().unwrap();

        assert_eq!(&buf, b"payload");
        assert_eq!(rest, b"tail");
    }

    #[test]
    #[should_panic(expected = "chunk size must be non-zero")]
    fn test_zero_chunk_size_panics() {
        let _ = StreamWriter::with_chunk_size(Vec::new(), key(), 0);
    }

    proptest! {
        #[test]
        fn prop_stream_roundtrip(
            plain in proptest::collection::vec(any::<u8>(), 0..2048),
            chunk_size in 1usize..300,
        ) {
            let stream = encrypt(&plain, chunk_size);
            prop_assert_eq!(decrypt(&stream, chunk_size).unwrap(), plain);
        }
    }
}
