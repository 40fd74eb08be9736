//! End-to-end archive tests: encode with real attachments on disk, decode
//! into fresh directories, and check how damaged input is rejected.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use proptest::prelude::*;
use tempfile::TempDir;
use whisper_crypto::{
    decode_archive, decode_from_reader, encode_archive, encode_to_writer, Error, ErrorCategory,
    Identity, Message, PrivateKey, MAGIC,
};

fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, data).unwrap();
    path
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i.wrapping_mul(13) as u8) ^ seed)
        .collect()
}

/// A small single-recipient archive with one image, plus the recipient.
fn small_archive(src: &Path) -> (Vec<u8>, Identity) {
    let sender = PrivateKey::generate().unwrap();
    let bob = PrivateKey::generate().unwrap();
    let message = Message {
        recipients: vec![bob.public_key()],
        title: "t".into(),
        content: "c".into(),
        images: vec![write_file(src, "a.png", b"png!")],
        videos: vec![],
    };
    (encode_archive(&message, &sender).unwrap(), Identity::new(bob))
}

#[test]
fn roundtrip_for_one_to_five_recipients() {
    let src = TempDir::new().unwrap();
    let image = pattern(10_000, 1);
    let video = pattern(200_000, 2);
    let images = vec![write_file(src.path(), "IMG_0001.jpg", &image)];
    let videos = vec![write_file(src.path(), "clip.mov", &video)];

    for n in 1..=5 {
        let sender = PrivateKey::generate().unwrap();
        let keys: Vec<PrivateKey> = (0..n).map(|_| PrivateKey::generate().unwrap()).collect();
        let message = Message {
            recipients: keys.iter().map(|k| k.public_key()).collect(),
            title: "雪舞❄️&桃子🍑".into(),
            content: "Hello, world!".into(),
            images: images.clone(),
            videos: videos.clone(),
        };
        let bytes = encode_archive(&message, &sender).unwrap();

        for key in keys {
            let dest = TempDir::new().unwrap();
            let decoded = decode_archive(&bytes, &Identity::new(key), dest.path()).unwrap();

            assert_eq!(decoded.recipients, vec![sender.public_key()]);
            assert_eq!(decoded.title, message.title);
            assert_eq!(decoded.content, message.content);
            assert_eq!(decoded.images, vec![dest.path().join("images/IMG_0001.jpg")]);
            assert_eq!(decoded.videos, vec![dest.path().join("videos/clip.mov")]);
            assert_eq!(fs::read(&decoded.images[0]).unwrap(), image);
            assert_eq!(fs::read(&decoded.videos[0]).unwrap(), video);
        }
    }
}

#[test]
fn roundtrip_empty_message() {
    let sender = PrivateKey::generate().unwrap();
    let bob = PrivateKey::generate().unwrap();
    let message = Message {
        recipients: vec![bob.public_key()],
        ..Default::default()
    };

    let bytes = encode_archive(&message, &sender).unwrap();
    let dest = TempDir::new().unwrap();
    let decoded = decode_archive(&bytes, &Identity::new(bob), dest.path()).unwrap();

    assert_eq!(decoded.title, "");
    assert_eq!(decoded.content, "");
    assert!(decoded.images.is_empty());
    assert!(decoded.videos.is_empty());
}

#[test]
fn multi_megabyte_attachment_through_files() {
    let src = TempDir::new().unwrap();
    let body = pattern(5 * (1 << 20) + 777, 9);
    let video = write_file(src.path(), "long.mp4", &body);

    let sender = PrivateKey::generate().unwrap();
    let bob = PrivateKey::generate().unwrap();
    let message = Message {
        recipients: vec![bob.public_key()],
        title: "big".into(),
        videos: vec![video],
        ..Default::default()
    };

    let archive_path = src.path().join("out.bin");
    let file = fs::File::create(&archive_path).unwrap();
    let file = encode_to_writer(&message, &sender, std::io::BufWriter::new(file)).unwrap();
    drop(file);

    let dest = TempDir::new().unwrap();
    let reader = std::io::BufReader::new(fs::File::open(&archive_path).unwrap());
    let decoded = decode_from_reader(reader, &Identity::new(bob), dest.path()).unwrap();

    assert_eq!(decoded.videos.len(), 1);
    assert_eq!(fs::read(&decoded.videos[0]).unwrap(), body);
}

#[test]
fn same_named_attachments_do_not_collide() {
    let src = TempDir::new().unwrap();
    fs::create_dir(src.path().join("a")).unwrap();
    fs::create_dir(src.path().join("b")).unwrap();
    let first = write_file(&src.path().join("a"), "photo.jpg", b"first");
    let second = write_file(&src.path().join("b"), "photo.jpg", b"second");

    let sender = PrivateKey::generate().unwrap();
    let bob = PrivateKey::generate().unwrap();
    let message = Message {
        recipients: vec![bob.public_key()],
        images: vec![first, second],
        ..Default::default()
    };

    let bytes = encode_archive(&message, &sender).unwrap();
    let dest = TempDir::new().unwrap();
    let decoded = decode_archive(&bytes, &Identity::new(bob), dest.path()).unwrap();

    let images = dest.path().join("images");
    assert_eq!(
        decoded.images,
        vec![images.join("photo.jpg"), images.join("photo-1.jpg")]
    );
    assert_eq!(fs::read(&decoded.images[0]).unwrap(), b"first");
    assert_eq!(fs::read(&decoded.images[1]).unwrap(), b"second");
}

#[test]
fn non_recipient_is_rejected() {
    let src = TempDir::new().unwrap();
    let (bytes, _) = small_archive(src.path());

    let eve = Identity::new(PrivateKey::generate().unwrap());
    let dest = TempDir::new().unwrap();
    let err = decode_archive(&bytes, &eve, dest.path()).unwrap_err();

    assert!(matches!(err, Error::NotARecipient));
    assert_eq!(err.category(), ErrorCategory::NotRecipient);
    assert_eq!(fs::read_dir(dest.path()).unwrap().count(), 0);
}

#[test]
fn corrupted_magic_is_bad_header() {
    let src = TempDir::new().unwrap();
    let (bytes, identity) = small_archive(src.path());

    for i in 0..MAGIC.len() {
        let mut damaged = bytes.clone();
        damaged[i] ^= 0x20;
        let dest = TempDir::new().unwrap();
        assert!(
            matches!(
                decode_archive(&damaged, &identity, dest.path()),
                Err(Error::BadHeader)
            ),
            "byte {i}"
        );
    }
}

#[test]
fn any_flipped_byte_is_rejected() {
    let src = TempDir::new().unwrap();
    let (bytes, identity) = small_archive(src.path());
    let dest = TempDir::new().unwrap();

    for i in 0..bytes.len() {
        let mut damaged = bytes.clone();
        damaged[i] ^= 0x01;
        let out = dest.path().join(i.to_string());
        let result = decode_archive(&damaged, &identity, &out);
        assert!(result.is_err(), "flipping byte {i} went unnoticed");
    }
}

#[test]
fn flipped_sender_key_is_not_a_recipient() {
    let src = TempDir::new().unwrap();
    let (mut bytes, identity) = small_archive(src.path());
    bytes[MAGIC.len() + 5] ^= 0x10;

    let dest = TempDir::new().unwrap();
    assert!(matches!(
        decode_archive(&bytes, &identity, dest.path()),
        Err(Error::NotARecipient)
    ));
}

#[test]
fn flipped_payload_byte_is_authentication_failure() {
    let src = TempDir::new().unwrap();
    let (mut bytes, identity) = small_archive(src.path());

    // last byte of the final chunk's tag, just before the terminator
    let idx = bytes.len() - 5;
    bytes[idx] ^= 0x01;

    let dest = TempDir::new().unwrap();
    let err = decode_archive(&bytes, &identity, dest.path()).unwrap_err();
    assert!(matches!(err, Error::AuthenticationFailed));
    assert_eq!(err.category(), ErrorCategory::Crypto);
}

#[test]
fn truncation_is_never_trailing_data() {
    let src = TempDir::new().unwrap();
    let (bytes, identity) = small_archive(src.path());
    let dest = TempDir::new().unwrap();

    for cut in 0..bytes.len() {
        let out = dest.path().join(cut.to_string());
        match decode_archive(&bytes[..cut], &identity, &out) {
            Err(Error::BadHeader) => assert!(cut < MAGIC.len(), "cut {cut}"),
            Err(Error::Truncated) => assert!(cut >= MAGIC.len(), "cut {cut}"),
            other => panic!("cut at {cut}: unexpected {other:?}"),
        }
    }
}

#[test]
fn trailing_bytes_are_rejected() {
    let src = TempDir::new().unwrap();
    let (mut bytes, identity) = small_archive(src.path());
    bytes.push(0);

    let dest = TempDir::new().unwrap();
    let err = decode_archive(&bytes, &identity, dest.path()).unwrap_err();
    assert!(matches!(err, Error::TrailingData));
    assert_eq!(err.category(), ErrorCategory::Format);
}

#[test]
fn streaming_encode_matches_buffered_layout() {
    let sender = PrivateKey::generate().unwrap();
    let bob = PrivateKey::generate().unwrap();
    let message = Message {
        recipients: vec![bob.public_key()],
        title: "same".into(),
        content: "size".into(),
        ..Default::default()
    };

    let buffered = encode_archive(&message, &sender).unwrap();
    let mut streamed = Vec::new();
    encode_to_writer(&message, &sender, &mut streamed)
        .unwrap()
        .flush()
        .unwrap();

    assert_eq!(buffered.len(), streamed.len());
    assert_eq!(buffered[..44], streamed[..44]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_text_roundtrip(title in ".{0,64}", content in ".{0,4096}") {
        let sender = PrivateKey::generate().unwrap();
        let bob = PrivateKey::generate().unwrap();
        let message = Message {
            recipients: vec![bob.public_key()],
            title: title.clone(),
            content: content.clone(),
            ..Default::default()
        };

        let bytes = encode_archive(&message, &sender).unwrap();
        let dest = TempDir::new().unwrap();
        let decoded = decode_archive(&bytes, &Identity::new(bob), dest.path()).unwrap();

        prop_assert_eq!(decoded.title, title);
        prop_assert_eq!(decoded.content, content);
    }
}
