use std::sync::Arc;

use docqa_core::{Chunk, Embedder, Error, Meta};
use docqa_embed::HashEmbedder;
use docqa_index::{IndexManager, IndexState, MANIFEST_FILE};

fn embedder(dim: usize) -> Arc<dyn Embedder> {
    Arc::new(HashEmbedder::new(dim))
}

fn chunks(n: usize) -> Vec<Chunk> {
    (0..n)
        .map(|i| {
            let mut meta = Meta::new();
            meta.insert("source".into(), format!("/docs/doc{}.txt", i % 3).into());
            meta.insert("start_index".into(), (i * 100).into());
            Chunk::new(format!("topic{i} alpha{i} shared words about the homestead"), meta)
        })
        .collect()
}

#[tokio::test]
async fn ready_state_transitions() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("index");

    let manager = IndexManager::new(&path, embedder(128));
    assert_eq!(manager.state().await, IndexState::Absent);
    assert!(!manager.is_ready().await);

    manager.create(chunks(5)).await?;
    assert_eq!(manager.state().await, IndexState::InMemory);
    assert!(manager.is_ready().await);

    manager.save().await?;
    assert_eq!(manager.state().await, IndexState::Persisted);
    assert!(path.join(MANIFEST_FILE).is_file());

    let reopened = IndexManager::new(&path, embedder(128));
    assert_eq!(reopened.state().await, IndexState::OnDisk);
    assert!(reopened.is_ready().await);
    assert!(!reopened.is_loaded().await);

    reopened.load().await?;
    assert_eq!(reopened.state().await, IndexState::Persisted);
    assert_eq!(reopened.len().await, 5);

    reopened.add(chunks(2)).await?;
    assert_eq!(reopened.state().await, IndexState::InMemory);
    assert_eq!(reopened.len().await, 7);
    Ok(())
}

#[tokio::test]
async fn precondition_errors() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let manager = IndexManager::new(tmp.path().join("index"), embedder(64));

    let err = manager.create(Vec::new()).await.unwrap_err();
    assert!(matches!(err, Error::EmptyInput(_)), "got {err:?}");

    let err = manager.save().await.unwrap_err();
    assert!(matches!(err, Error::NoIndex), "got {err:?}");

    let err = manager.search("anything", 4).await.unwrap_err();
    assert!(matches!(err, Error::NotInitialized), "got {err:?}");

    assert_eq!(manager.add(Vec::new()).await?, 0);
    assert!(!manager.is_loaded().await);
    Ok(())
}

#[tokio::test]
async fn k_larger_than_index_returns_everything() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let manager = IndexManager::new(tmp.path().join("index"), embedder(128));
    manager.create(chunks(3)).await?;

    let hits = manager.search_with_scores("topic1 alpha1", 10).await?;
    assert_eq!(hits.len(), 3);
    assert!(hits.windows(2).all(|w| w[0].score <= w[1].score));
    assert_eq!(hits[0].chunk.text, chunks(3)[1].text);

    assert!(manager.search("topic1", 0).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn save_load_round_trip_keeps_rankings() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("index");
    let queries = ["topic7 alpha7", "homestead words", "alpha12", "unrelated query"];

    let original = IndexManager::new(&path, embedder(256));
    original.create(chunks(20)).await?;
    let mut before = Vec::new();
    for q in queries {
        before.push(original.search_with_scores(q, 4).await?);
    }
    original.save().await?;

    let restored = IndexManager::new(&path, embedder(256));
    restored.load().await?;
    for (q, expected) in queries.iter().zip(&before) {
        let got = restored.search_with_scores(q, 4).await?;
        assert_eq!(&got, expected, "ranking for {q:?} changed after reload");
    }
    assert_eq!(before[0][0].chunk.text, chunks(20)[7].text);
    assert_eq!(before[0][0].chunk.metadata, chunks(20)[7].metadata);
    Ok(())
}

#[tokio::test]
async fn saving_again_replaces_the_index() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("index");
    let manager = IndexManager::new(&path, embedder(64));
    manager.create(chunks(2)).await?;
    manager.save().await?;
    manager.add(chunks(3)).await?;
    manager.save().await?;

    let manifest = manager.read_manifest().expect("manifest");
    assert_eq!(manifest.chunk_count, 5);
    assert!(!tmp.path().join("index.staging").exists());
    assert!(!tmp.path().join("index.previous").exists());

    let reopened = IndexManager::new(&path, embedder(64));
    reopened.load().await?;
    assert_eq!(reopened.len().await, 5);
    Ok(())
}

#[tokio::test]
async fn missing_or_corrupt_index_fails_to_load() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("index");

    let manager = IndexManager::new(&path, embedder(64));
    let err = manager.load().await.unwrap_err();
    assert!(matches!(err, Error::CorruptOrMissingIndex(_)), "got {err:?}");

    std::fs::create_dir_all(&path)?;
    std::fs::write(path.join(MANIFEST_FILE), "{ not json")?;
    assert!(manager.is_ready().await, "readiness only checks existence");
    let err = manager.load().await.unwrap_err();
    assert!(matches!(err, Error::CorruptOrMissingIndex(_)), "got {err:?}");
    assert!(!manager.is_loaded().await);
    Ok(())
}

#[tokio::test]
async fn manifest_count_mismatch_is_corrupt() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("index");
    let manager = IndexManager::new(&path, embedder(64));
    manager.create(chunks(4)).await?;
    manager.save().await?;

    let mut manifest = manager.read_manifest().expect("manifest");
    manifest.chunk_count = 9;
    manifest.write(&path)?;

    let reopened = IndexManager::new(&path, embedder(64));
    let err = reopened.load().await.unwrap_err();
    assert!(matches!(err, Error::CorruptOrMissingIndex(_)), "got {err:?}");
    Ok(())
}

#[tokio::test]
async fn different_embedder_is_rejected() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("index");
    let manager = IndexManager::new(&path, embedder(64));
    manager.create(chunks(2)).await?;
    manager.save().await?;

    let other = IndexManager::new(&path, embedder(128));
    match other.load().await {
        Err(Error::EmbedderMismatch { stored, current }) => {
            assert_eq!(stored, "hash:xxh64:d64");
            assert_eq!(current, "hash:xxh64:d128");
        }
        other => panic!("expected EmbedderMismatch, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn concurrent_searches_and_adds() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let manager = Arc::new(IndexManager::new(tmp.path().join("index"), embedder(128)));
    manager.create(chunks(10)).await?;

    let mut handles = Vec::new();
    for i in 0..8 {
        let m = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            if i % 4 == 0 {
                m.add(vec![Chunk::new(format!("late chunk {i}"), Meta::new())]).await.map(|_| ())
            } else {
                m.search(&format!("topic{i}"), 3).await.map(|hits| assert_eq!(hits.len(), 3))
            }
        }));
    }
    for h in handles {
        h.await??;
    }
    assert_eq!(manager.len().await, 12);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_on_absent_index_all_land() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let manager = Arc::new(IndexManager::new(tmp.path().join("index"), embedder(64)));
    assert_eq!(manager.state().await, IndexState::Absent);

    let batch = |tag: &str| -> Vec<Chunk> {
        (0..50).map(|i| Chunk::new(format!("{tag} chunk {i} about goats"), Meta::new())).collect()
    };
    let a = tokio::spawn({
        let m = Arc::clone(&manager);
        let chunks = batch("left");
        async move { m.add(chunks).await }
    });
    let b = tokio::spawn({
        let m = Arc::clone(&manager);
        let chunks = batch("right");
        async move { m.add(chunks).await }
    });
    assert_eq!(a.await?? + b.await??, 100);
    assert_eq!(manager.len().await, 100);
    assert_eq!(manager.state().await, IndexState::InMemory);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn searches_proceed_while_saving() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("index");
    let manager = Arc::new(IndexManager::new(&path, embedder(64)));
    manager.add(chunks(30)).await?;

    let saver = tokio::spawn({
        let m = Arc::clone(&manager);
        async move { m.save().await }
    });
    for i in 0..5 {
        let hits = manager.search(&format!("topic{i}"), 2).await?;
        assert_eq!(hits.len(), 2);
    }
    saver.await??;

    assert_eq!(manager.state().await, IndexState::Persisted);
    assert_eq!(manager.read_manifest().expect("manifest").chunk_count, 30);
    assert!(!tmp.path().join("index.staging").exists());
    Ok(())
}
