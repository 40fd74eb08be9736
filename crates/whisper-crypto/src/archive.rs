//! The Whisper archive container
//!
//! ```text
//! magic              "Whipser/1.0\n" (12 bytes)
//! sender public key  32 bytes
//! recipient count    u32 LE
//! wrap entries       count x (u32 LE length, wrapped file key)
//! payload            chunked stream keyed by the file key:
//!                      title, content         (length-prefixed UTF-8)
//!                      image count, images    (name, body)
//!                      video count, videos    (name, body)
//! ```

use std::collections::HashSet;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aead::FileKey;
use crate::error::{Error, Result};
use crate::keys::{PrivateKey, PublicKey};
use crate::recipient::{Identity, Recipient};
use crate::stream::{StreamReader, StreamWriter};
use crate::wire::{ReadExt, UniqueNames, WriteExt};
use crate::{KEY_SIZE, MAGIC};

/// Largest wrap entry a reader accepts. Well-formed entries are 60 bytes.
pub const MAX_WRAP_SIZE: usize = 1024;

pub const IMAGES_DIR: &str = "images";
pub const VIDEOS_DIR: &str = "videos";

/// A message and its attachments.
///
/// On encode, `recipients` lists who may open the archive and attachments
/// are paths to read from. On decode, `recipients` holds the sender's key and
/// attachments are the paths they were written to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub recipients: Vec<PublicKey>,
    pub title: String,
    pub content: String,
    pub images: Vec<PathBuf>,
    pub videos: Vec<PathBuf>,
}

/// The unencrypted part of an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArchiveHeader {
    pub sender: PublicKey,
    pub recipient_count: u32,
}

pub struct ArchiveWriter<'a, W: Write> {
    inner: W,
    sender: &'a PrivateKey,
    file_key: FileKey,
}

impl<'a, W: Write> ArchiveWriter<'a, W> {
    pub fn new(inner: W, sender: &'a PrivateKey, file_key: FileKey) -> Self {
        Self {
            inner,
            sender,
            file_key,
        }
    }

    /// Encode `message` and return the underlying writer.
    ///
    /// One wrap entry is written per recipient, in order. Nothing is written
    /// when `message.recipients` is empty or lists a key twice.
    pub fn write(self, message: &Message) -> Result<W> {
        let Self {
            mut inner,
            sender,
            file_key,
        } = self;

        if message.recipients.is_empty() {
            return Err(Error::NoRecipients);
        }

        let mut seen = HashSet::new();
        if let Some(repeated) = message.recipients.iter().find(|pk| !seen.insert(**pk)) {
            return Err(Error::DuplicateRecipient(repeated.to_string()));
        }
        let recipients: Vec<Recipient> =
            message.recipients.iter().copied().map(Recipient::new).collect();

        inner.write_all(MAGIC)?;
        inner.write_all(sender.public_key().as_bytes())?;
        inner.write_len(recipients.len())?;
        for recipient in &recipients {
            let wrapped = recipient.wrap(sender, &file_key)?;
            inner.write_length_prefixed_bytes(&wrapped)?;
        }

        let mut stream = StreamWriter::new(inner, file_key);
        stream.write_length_prefixed_string(&message.title)?;
        stream.write_length_prefixed_string(&message.content)?;
        write_attachments(&mut stream, &message.images)?;
        write_attachments(&mut stream, &message.videos)?;
        let inner = stream.finish()?;

        debug!(
            recipients = recipients.len(),
            images = message.images.len(),
            videos = message.videos.len(),
            "archive encoded"
        );
        Ok(inner)
    }
}

fn write_attachments<W: Write>(stream: &mut StreamWriter<W>, paths: &[PathBuf]) -> Result<()> {
    stream.write_len(paths.len())?;
    for path in paths {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidFileName(path.display().to_string()))?;
        let size = fs::metadata(path)?.len();
        stream.write_length_prefixed_string(name)?;
        stream.write_length_prefixed_file(path, size)?;
    }
    Ok(())
}

pub struct ArchiveReader<'a, R: Read> {
    inner: R,
    identity: &'a Identity,
}

impl<'a, R: Read> ArchiveReader<'a, R> {
    pub fn new(inner: R, identity: &'a Identity) -> Self {
        Self { inner, identity }
    }

    /// Decode the archive, writing attachments under `dest_dir/images` and
    /// `dest_dir/videos`.
    ///
    /// Attachment files are created as the payload is read. If this returns
    /// an error, files already written under `dest_dir` are left in place.
    pub fn read(self, dest_dir: &Path) -> Result<Message> {
        let Self {
            mut inner,
            identity,
        } = self;

        let header = read_header(&mut inner)?;
        let file_key = find_file_key(&mut inner, identity, &header)?;

        let mut stream = StreamReader::new(inner, file_key);
        let title = stream.read_length_prefixed_string()?;
        let content = stream.read_length_prefixed_string()?;
        let images = read_attachments(&mut stream, &dest_dir.join(IMAGES_DIR))?;
        let videos = read_attachments(&mut stream, &dest_dir.join(VIDEOS_DIR))?;

        let mut rest = stream.finish()?;
        if rest.read_up_to(&mut [0u8; 1])? != 0 {
            return Err(Error::TrailingData);
        }

        debug!(
            sender = %header.sender,
            images = images.len(),
            videos = videos.len(),
            "archive decoded"
        );
        Ok(Message {
            recipients: vec![header.sender],
            title,
            content,
            images,
            videos,
        })
    }
}

fn read_header<R: Read>(r: &mut R) -> Result<ArchiveHeader> {
    let mut magic = [0u8; MAGIC.len()];
    if r.read_up_to(&mut magic)? != MAGIC.len() || &magic != MAGIC {
        return Err(Error::BadHeader);
    }
    let sender = PublicKey::from_bytes(r.read_array::<KEY_SIZE>()?);
    let recipient_count = r.read_u32_le()?;
    Ok(ArchiveHeader {
        sender,
        recipient_count,
    })
}

/// Try every wrap entry. Exactly one may open.
fn find_file_key<R: Read>(
    r: &mut R,
    identity: &Identity,
    header: &ArchiveHeader,
) -> Result<FileKey> {
    let mut found = None;
    for index in 0..header.recipient_count {
        let len = r.read_u32_le()?;
        if len as usize > MAX_WRAP_SIZE {
            return Err(Error::FormatViolation(format!(
                "wrap entry {index} is {len} bytes (max {MAX_WRAP_SIZE})"
            )));
        }
        let wrapped = r.read_exact_vec(len as usize)?;
        if let Some(key) = identity.unwrap(&header.sender, &wrapped) {
            if found.replace(key).is_some() {
                return Err(Error::DuplicateKeyMatch);
            }
            debug!(entry = index, "wrap entry opened");
        }
    }
    found.ok_or(Error::NotARecipient)
}

fn read_attachments<R: Read>(stream: &mut StreamReader<R>, dir: &Path) -> Result<Vec<PathBuf>> {
    let count = stream.read_u32_le()?;
    if count > 0 {
        fs::create_dir_all(dir)?;
    }
    let mut names = UniqueNames::new();
    let mut paths = Vec::new();
    for _ in 0..count {
        paths.push(stream.read_length_prefixed_file(dir, &mut names)?);
    }
    Ok(paths)
}

/// Encode `message` from `sender` under a fresh file key.
pub fn encode_archive(message: &Message, sender: &PrivateKey) -> Result<Vec<u8>> {
    encode_to_writer(message, sender, Vec::new())
}

pub fn encode_to_writer<W: Write>(message: &Message, sender: &PrivateKey, w: W) -> Result<W> {
    ArchiveWriter::new(w, sender, FileKey::generate()?).write(message)
}

pub fn decode_archive(bytes: &[u8], identity: &Identity, dest_dir: &Path) -> Result<Message> {
    decode_from_reader(bytes, identity, dest_dir)
}

pub fn decode_from_reader<R: Read>(r: R, identity: &Identity, dest_dir: &Path) -> Result<Message> {
    ArchiveReader::new(r, identity).read(dest_dir)
}

/// Read the sender key and recipient count without decrypting anything.
pub fn inspect_header<R: Read>(mut r: R) -> Result<ArchiveHeader> {
    read_header(&mut r)
}

/// Whether `prefix` (the first bytes of a file) starts with the archive magic.
pub fn looks_like_archive(prefix: &[u8]) -> bool {
    prefix.starts_with(MAGIC)
}
