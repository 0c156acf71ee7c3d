use std::time::Duration;

use renderer_cache::caching::RendererRef;
use renderer_cache::types::RendererParams;

use crate::{TIMEOUT, params, setup_cache};

#[tokio::test(start_paused = true)]
async fn test_idle_entries_are_swept() {
    let (cache, _store, factory) = setup_cache(["t1"]);
    let timeout = cache.config().timeout;
    assert_eq!(timeout, TIMEOUT);

    let renderer = cache.get_renderer(params("t1")).await.unwrap();
    drop(renderer);
    assert_eq!(cache.len(), 1);

    // The first sweep sees the entry idle for exactly the timeout, the second one evicts it.
    tokio::time::sleep(timeout * 2 + Duration::from_secs(1)).await;

    assert!(cache.is_empty());
    assert_eq!(factory.renderer(0).close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_recently_used_entries_survive() {
    let (cache, _store, factory) = setup_cache(["t1"]);

    cache.get_renderer(params("t1")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(50)).await;
    cache.get_renderer(params("t1")).await.unwrap();

    tokio::time::sleep(Duration::from_secs(50)).await;
    assert_eq!(cache.len(), 1);
    assert!(!factory.renderer(0).is_closed());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(cache.is_empty());
    assert!(factory.renderer(0).is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_renderer_in_use_survives_sweep() {
    let (cache, _store, factory) = setup_cache(["t1"]);

    let renderer = cache.get_renderer(params("t1")).await.unwrap();
    tokio::time::sleep(TIMEOUT * 3).await;

    assert!(cache.is_empty());
    assert!(!factory.renderer(0).is_closed());

    // a new request creates a new renderer, while the old one is still being used
    let fresh = cache.get_renderer(params("t1")).await.unwrap();
    assert!(!RendererRef::ptr_eq(&renderer, &fresh));

    drop(renderer);
    assert_eq!(factory.renderer(0).close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_manual_sweep_after_shutdown() {
    let (cache, _store, _factory) = setup_cache(["t1"]);

    cache.shutdown();
    cache.get_renderer(params("t1")).await.unwrap();
    tokio::time::sleep(TIMEOUT * 3).await;
    assert_eq!(cache.len(), 1);

    cache.sweep();
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reset_evicts_all_variants() {
    let (cache, _store, factory) = setup_cache(["abc", "abcd"]);

    let variants = [
        params("abc"),
        RendererParams::for_token("abc").with_format("mvt"),
        params("abc").with_scale_factor(2.0).with_layer("0,1"),
    ];
    for params in &variants {
        cache.get_renderer(params.clone()).await.unwrap();
    }
    let other = cache.get_renderer(params("abcd")).await.unwrap();
    assert_eq!(cache.len(), 4);

    cache.reset(&RendererParams::for_token("abc"));

    assert_eq!(cache.len(), 1);
    assert!(cache.contains_key(other.key().as_str()));
    for id in 0..3 {
        assert!(factory.renderer(id).is_closed());
    }
    assert!(!factory.renderer(other.id).is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_reset_respects_database() {
    let (cache, _store, _factory) = setup_cache(["abc"]);

    let tiles = RendererParams {
        dbname: Some("tiles".into()),
        ..params("abc")
    };
    cache.get_renderer(tiles.clone()).await.unwrap();
    cache.get_renderer(params("abc")).await.unwrap();

    cache.reset(&tiles);

    assert_eq!(cache.len(), 1);
    assert!(cache.contains_key(cache.key(&params("abc")).as_str()));
}

#[tokio::test(start_paused = true)]
async fn test_purge() {
    let (cache, _store, factory) = setup_cache(["t1", "t2"]);

    let held = cache.get_renderer(params("t1")).await.unwrap();
    cache.get_renderer(params("t2")).await.unwrap();

    cache.purge();

    assert!(cache.is_empty());
    assert!(!factory.renderer(held.id).is_closed());
    drop(held);
    assert!(factory.renderer(0).is_closed());
    assert!(factory.renderer(1).is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_del_is_idempotent() {
    let (cache, _store, factory) = setup_cache(["t1"]);

    let renderer = cache.get_renderer(params("t1")).await.unwrap();
    let key = renderer.key().clone();
    drop(renderer);

    cache.del(key.as_str());
    cache.del(key.as_str());
    cache.del("does:not:exist:");

    assert!(cache.is_empty());
    assert_eq!(factory.renderer(0).close_count(), 1);
}
