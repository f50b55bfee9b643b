mod common;

use codeweaver_vector_store::store_dir_for_project_root;
use common::new_test_indexer;
use tempfile::TempDir;

#[tokio::test]
async fn project_indexer_rebuilds_store_when_primary_is_missing() {
    let temp = TempDir::new().expect("tempdir");
    let src_dir = temp.path().join("src");
    tokio::fs::create_dir_all(&src_dir).await.expect("create src");
    tokio::fs::write(
        src_dir.join("lib.rs"),
        r#"
pub fn hello() {
    println!("hello");
}

pub fn world() {
    println!("world");
}
"#,
    )
    .await
    .expect("write file");

    let indexer = new_test_indexer(temp.path()).await;
    let stats = indexer.index_full().await.expect("initial index");
    assert_eq!(stats.files, 1);
    assert!(stats.chunks > 0, "expected at least one chunk from src/lib.rs");

    let primary_path = store_dir_for_project_root(temp.path()).join("primary.json");
    tokio::fs::remove_file(&primary_path).await.expect("delete primary store file");

    let rebuilt = indexer.index_full().await.expect("rebuild after primary loss");
    assert_eq!(rebuilt.files, 1);
    assert!(rebuilt.chunks > 0, "missing chunks after rebuild");
    assert!(tokio::fs::metadata(&primary_path).await.is_ok(), "primary store file not recreated");
}

#[tokio::test]
async fn incremental_index_only_touches_changed_paths() {
    let temp = TempDir::new().expect("tempdir");
    let src_dir = temp.path().join("src");
    tokio::fs::create_dir_all(&src_dir).await.expect("create src");
    let a = src_dir.join("a.rs");
    let b = src_dir.join("b.rs");
    tokio::fs::write(&a, "pub fn a() {}\n").await.expect("write a");
    tokio::fs::write(&b, "pub fn b() {}\n").await.expect("write b");

    let indexer = new_test_indexer(temp.path()).await;
    indexer.index_full().await.expect("initial index");

    tokio::fs::write(&a, "pub fn a() {}\npub fn a2() {}\n").await.expect("update a");
    let stats = indexer
        .index_changed_paths(&[a.clone()])
        .await
        .expect("incremental index");
    assert_eq!(stats.files, 1);
    assert!(stats.errors.is_empty());
}
