use std::time::Duration;

use renderer_cache::caching::{ConfigLoadError, RendererError, RendererRef};

use crate::{StaticConfigStore, TestFactory, params, settle, setup_cache, setup_cache_with};

#[tokio::test(start_paused = true)]
async fn test_runtime_failure_evicts_renderer() {
    let (cache, _store, factory) = setup_cache(["t1"]);

    let renderer = cache.get_renderer(params("t1")).await.unwrap();
    renderer.handle().trigger_failure("connection reset");
    settle().await;

    assert!(cache.is_empty());
    // still in use by the request that got it
    assert!(!renderer.handle().is_closed());

    let fresh = cache.get_renderer(params("t1")).await.unwrap();
    assert_eq!(fresh.id, 1);
    assert_eq!(factory.creations(), 2);

    drop(renderer);
    assert_eq!(factory.renderer(0).close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failure_of_unused_renderer_closes_it() {
    let (cache, _store, factory) = setup_cache(["t1"]);

    cache.get_renderer(params("t1")).await.unwrap();
    factory.renderer(0).trigger_failure("connection reset");
    settle().await;

    assert!(cache.is_empty());
    assert_eq!(factory.renderer(0).close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failure_of_replaced_renderer_keeps_new_one() {
    let (cache, _store, factory) = setup_cache(["t1"]);

    let old = cache
        .get_renderer(params("t1").with_cache_buster(1))
        .await
        .unwrap();
    let new = cache
        .get_renderer(params("t1").with_cache_buster(2))
        .await
        .unwrap();

    old.handle().trigger_failure("connection reset");
    settle().await;

    let current = cache
        .get_renderer(params("t1").with_cache_buster(2))
        .await
        .unwrap();
    assert!(RendererRef::ptr_eq(&new, &current));
    assert_eq!(factory.creations(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failure_after_deletion_is_ignored() {
    let (cache, _store, factory) = setup_cache(["t1"]);

    let renderer = cache.get_renderer(params("t1")).await.unwrap();
    cache.del(renderer.key().as_str());
    drop(renderer);
    assert!(factory.renderer(0).is_closed());

    factory.renderer(0).trigger_failure("connection reset");
    settle().await;
    assert_eq!(factory.renderer(0).close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_config_not_found() {
    let (cache, store, factory) =
        setup_cache_with(StaticConfigStore::default(), TestFactory::new());

    let err = cache.get_renderer(params("t1")).await.unwrap_err();
    assert_eq!(
        err,
        RendererError::ConfigLoad(ConfigLoadError::NotFound("t1".into()))
    );
    assert!(cache.is_empty());
    assert_eq!(factory.creations(), 0);

    // the error is not cached
    store.insert("t1");
    let renderer = cache.get_renderer(params("t1")).await.unwrap();
    assert_eq!(renderer.token, "t1");
    assert_eq!(store.loads(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_config_io_error() {
    let (cache, store, _factory) =
        setup_cache_with(StaticConfigStore::default(), TestFactory::new());
    store.fail("t1", ConfigLoadError::Io("connection refused".into()));

    let err = cache.get_renderer(params("t1")).await.unwrap_err();
    assert!(matches!(err, RendererError::ConfigLoad(ConfigLoadError::Io(_))));
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_config_error_reaches_all_waiters() {
    // Deliberate: joined requests get the load error too, instead of only the first request.
    let store = StaticConfigStore::default().with_latency(Duration::from_millis(100));
    let (cache, store, _factory) = setup_cache_with(store, TestFactory::new());

    let (first, second) = tokio::join!(
        cache.get_renderer(params("t1")),
        cache.get_renderer(params("t1")),
    );

    let expected = RendererError::ConfigLoad(ConfigLoadError::NotFound("t1".into()));
    assert_eq!(first.unwrap_err(), expected);
    assert_eq!(second.unwrap_err(), expected);
    assert_eq!(store.loads(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_creation_error_is_kept() {
    let (cache, _store, factory) = setup_cache(["t1"]);
    factory.fail_token("t1");

    let err = cache.get_renderer(params("t1")).await.unwrap_err();
    let RendererError::Creation(message) = &err else {
        panic!("unexpected error: {err}");
    };
    assert!(message.contains("renderer for t1 is broken"));
    assert_eq!(cache.len(), 1);
    assert_eq!(factory.renderer_count(), 0);

    // later requests get the same error without another attempt
    factory.heal_token("t1");
    let again = cache.get_renderer(params("t1")).await.unwrap_err();
    assert_eq!(again, err);
    assert_eq!(factory.creations(), 1);

    cache.del(cache.key(&params("t1")).as_str());
    let renderer = cache.get_renderer(params("t1")).await.unwrap();
    assert_eq!(renderer.id, 0);
    assert_eq!(factory.creations(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failure_does_not_affect_other_keys() {
    let (cache, _store, factory) = setup_cache(["t1", "t2"]);
    factory.fail_token("t1");

    assert!(cache.get_renderer(params("t1")).await.is_err());
    let renderer = cache.get_renderer(params("t2")).await.unwrap();
    assert_eq!(renderer.token, "t2");
}
