//! Put/fetch through staging against an in-memory bucket.

use std::path::Path;

use cloak_storage::{BlobStore, Bucket};
use cloak_workspace::{fetch_blob, put_file, Scratch};
use opendal::Operator;
use tempfile::TempDir;

fn memory_bucket(password: &str) -> Bucket {
    let op = Operator::new(opendal::services::Memory::default())
        .expect("memory operator")
        .finish();
    Bucket::new(BlobStore::new(op), password)
}

fn write_test_file(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("write test file");
    path
}

fn staged_files(scratch: &Scratch) -> usize {
    let enc = std::fs::read_dir(scratch.encrypted_dir().unwrap()).unwrap().count();
    let dec = std::fs::read_dir(scratch.decrypted_dir().unwrap()).unwrap().count();
    enc + dec
}

#[tokio::test]
async fn put_then_fetch_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let scratch = Scratch::new(tmp.path().join("ws"));
    let bucket = memory_bucket("bucket-password");

    let original = b"minutes of the meeting: nothing was decided.";
    let src = write_test_file(tmp.path(), "minutes.txt", original);

    let blob = put_file(&bucket, &scratch, &src, "minutes.txt")
        .await
        .expect("put should succeed");
    assert_eq!(blob.display_name(), Some("minutes.txt"));
    assert_eq!(blob.info.size as usize, original.len() + 24);

    let listed = bucket.find("minutes.txt").await.unwrap().expect("listed");
    let content = fetch_blob(&bucket, &listed, &scratch)
        .await
        .expect("fetch should succeed");
    assert_eq!(content, original);

    assert_eq!(staged_files(&scratch), 0, "staging must be empty");
}

#[tokio::test]
async fn stored_bytes_are_ciphertext() {
    let tmp = TempDir::new().unwrap();
    let scratch = Scratch::new(tmp.path());
    let bucket = memory_bucket("pw");

    let original = vec![b'A'; 4096];
    let src = write_test_file(tmp.path(), "aaaa.bin", &original);
    let blob = put_file(&bucket, &scratch, &src, "aaaa.bin").await.unwrap();

    let raw = bucket.download(&blob).await.unwrap();
    assert_eq!(&raw[..8], b"Extend__");
    assert!(!raw.windows(64).any(|w| w == &original[..64]));
    assert!(!blob.real_name().contains("aaaa"));
}

#[tokio::test]
async fn each_put_gets_its_own_file_key() {
    let tmp = TempDir::new().unwrap();
    let scratch = Scratch::new(tmp.path());
    let bucket = memory_bucket("pw");
    let src = write_test_file(tmp.path(), "same.txt", b"same");

    let a = put_file(&bucket, &scratch, &src, "one.txt").await.unwrap();
    let b = put_file(&bucket, &scratch, &src, "two.txt").await.unwrap();
    assert_ne!(a.file_key(), b.file_key());
    assert_ne!(bucket.download(&a).await.unwrap(), bucket.download(&b).await.unwrap());
}

#[tokio::test]
async fn invalid_name_is_rejected_before_upload() {
    let tmp = TempDir::new().unwrap();
    let scratch = Scratch::new(tmp.path());
    let bucket = memory_bucket("pw");
    let src = write_test_file(tmp.path(), "x", b"x");

    assert!(put_file(&bucket, &scratch, &src, "what?.txt").await.is_err());
    assert!(bucket.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_put_still_cleans_staging() {
    let tmp = TempDir::new().unwrap();
    let scratch = Scratch::new(tmp.path().join("ws"));
    let bucket = memory_bucket("pw");

    let missing = tmp.path().join("does-not-exist");
    assert!(put_file(&bucket, &scratch, &missing, "ghost.txt").await.is_err());
    assert_eq!(staged_files(&scratch), 0);
}

#[tokio::test]
async fn moved_blob_still_decrypts() {
    let tmp = TempDir::new().unwrap();
    let scratch = Scratch::new(tmp.path());
    let bucket = memory_bucket("pw");
    let src = write_test_file(tmp.path(), "draft", b"v1 contents");

    let blob = put_file(&bucket, &scratch, &src, "draft.md").await.unwrap();
    let moved = bucket.move_to(&blob, "published.md").await.unwrap();

    let content = fetch_blob(&bucket, &moved, &scratch).await.unwrap();
    assert_eq!(content, b"v1 contents");
}
