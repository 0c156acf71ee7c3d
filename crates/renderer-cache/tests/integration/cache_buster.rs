use std::time::Duration;

use renderer_cache::caching::RendererRef;

use crate::{StaticConfigStore, TestFactory, params, setup_cache, setup_cache_with};

#[tokio::test(start_paused = true)]
async fn test_lower_buster_reuses() {
    let (cache, _store, factory) = setup_cache(["t1"]);

    let first = cache
        .get_renderer(params("t1").with_cache_buster(5))
        .await
        .unwrap();
    let second = cache
        .get_renderer(params("t1").with_cache_buster(3))
        .await
        .unwrap();

    assert!(RendererRef::ptr_eq(&first, &second));
    assert_eq!(second.cache_buster().as_number(), Some(5.0));
    assert_eq!(factory.creations(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_buster_reuses() {
    let (cache, _store, factory) = setup_cache(["t1"]);

    let first = cache
        .get_renderer(params("t1").with_cache_buster(5))
        .await
        .unwrap();
    let second = cache.get_renderer(params("t1")).await.unwrap();

    assert!(RendererRef::ptr_eq(&first, &second));
    assert_eq!(factory.creations(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_higher_buster_recreates() {
    let (cache, _store, factory) = setup_cache(["t1"]);

    let old = cache
        .get_renderer(params("t1").with_cache_buster(5))
        .await
        .unwrap();
    let new = cache
        .get_renderer(params("t1").with_cache_buster(7))
        .await
        .unwrap();

    assert!(!RendererRef::ptr_eq(&old, &new));
    assert_eq!(new.cache_buster().as_number(), Some(7.0));
    assert_eq!(factory.creations(), 2);
    assert_eq!(cache.len(), 1);

    // the replaced renderer is closed as soon as it is no longer used
    let old_handle = factory.renderer(old.id);
    assert!(!old_handle.is_closed());
    drop(old);
    assert_eq!(old_handle.close_count(), 1);
    assert!(!factory.renderer(new.id).is_closed());

    let again = cache
        .get_renderer(params("t1").with_cache_buster(7))
        .await
        .unwrap();
    assert!(RendererRef::ptr_eq(&new, &again));
}

#[tokio::test(start_paused = true)]
async fn test_numeric_string_buster() {
    let (cache, _store, factory) = setup_cache(["t1"]);

    let numeric = cache
        .get_renderer(params("t1").with_cache_buster(5))
        .await
        .unwrap();
    let text = cache
        .get_renderer(params("t1").with_cache_buster("5"))
        .await
        .unwrap();
    assert!(RendererRef::ptr_eq(&numeric, &text));

    let older = cache
        .get_renderer(params("t1").with_cache_buster("4.5"))
        .await
        .unwrap();
    assert!(RendererRef::ptr_eq(&numeric, &older));

    let newer = cache
        .get_renderer(params("t1").with_cache_buster("6"))
        .await
        .unwrap();
    assert!(!RendererRef::ptr_eq(&numeric, &newer));
    assert_eq!(factory.creations(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_opaque_busters_only_compare_equality() {
    let (cache, _store, factory) = setup_cache(["t1"]);

    let v1 = cache
        .get_renderer(params("t1").with_cache_buster("v1"))
        .await
        .unwrap();
    let v1_again = cache
        .get_renderer(params("t1").with_cache_buster("v1"))
        .await
        .unwrap();
    assert!(RendererRef::ptr_eq(&v1, &v1_again));

    let v2 = cache
        .get_renderer(params("t1").with_cache_buster("v2"))
        .await
        .unwrap();
    assert!(!RendererRef::ptr_eq(&v1, &v2));

    // going back to an older opaque marker is just another change
    let back = cache
        .get_renderer(params("t1").with_cache_buster("v1"))
        .await
        .unwrap();
    assert!(!RendererRef::ptr_eq(&v2, &back));
    assert_eq!(factory.creations(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_opaque_buster_replaces_numeric() {
    let (cache, _store, factory) = setup_cache(["t1"]);

    let numeric = cache
        .get_renderer(params("t1").with_cache_buster(5))
        .await
        .unwrap();
    let opaque = cache
        .get_renderer(params("t1").with_cache_buster("abc"))
        .await
        .unwrap();

    assert!(!RendererRef::ptr_eq(&numeric, &opaque));
    assert_eq!(factory.creations(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_future_buster_is_clamped() {
    let (cache, _store, _factory) = setup_cache(["t1"]);

    let far_future = 1e15;
    let renderer = cache
        .get_renderer(params("t1").with_cache_buster(far_future))
        .await
        .unwrap();

    let now = chrono::Utc::now().timestamp_millis() as f64;
    let stored = renderer.cache_buster().as_number().unwrap();
    assert!(stored < far_future);
    assert!(stored <= now);
}

#[tokio::test(start_paused = true)]
async fn test_replaced_while_pending() {
    // Deliberate: the map drops its hold on the replaced entry at once instead of keeping it.
    let factory = TestFactory::new().with_latency(Duration::from_millis(100));
    let (cache, _store, factory) =
        setup_cache_with(StaticConfigStore::with_tokens(["t1"]), factory);

    let (old, new) = tokio::join!(
        cache.get_renderer(params("t1").with_cache_buster(1)),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cache.get_renderer(params("t1").with_cache_buster(2)).await
        },
    );

    let old = old.unwrap();
    let new = new.unwrap();
    assert_eq!(old.id, 0);
    assert_eq!(new.id, 1);
    assert_eq!(cache.len(), 1);

    drop(old);
    assert!(factory.renderer(0).is_closed());
    assert!(!factory.renderer(1).is_closed());
}
