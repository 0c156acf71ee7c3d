use std::fmt;
use std::mem;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::channel::oneshot;
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use super::{CacheBuster, CacheKey, Renderer, RendererError};

/// The outcome delivered to every caller waiting on an entry.
pub type Outcome<R> = Result<RendererRef<R>, RendererError>;

type Waiter<R> = oneshot::Sender<Outcome<R>>;

enum EntryState<R: Renderer> {
    /// Creation is in flight, callers queue up in arrival order.
    Pending(Vec<Waiter<R>>),
    /// The renderer was created. It is taken out once the entry is torn down.
    Ready(Option<Arc<R>>),
    /// Creation failed, every caller gets the same error.
    Failed(RendererError),
}

impl<R: Renderer> EntryState<R> {
    fn name(&self) -> &'static str {
        match self {
            EntryState::Pending(_) => "pending",
            EntryState::Ready(Some(_)) => "ready",
            EntryState::Ready(None) => "closed",
            EntryState::Failed(_) => "failed",
        }
    }
}

/// One cached, or currently being created, renderer.
///
/// An entry is reference counted: the cache holds one reference while the entry is in its map,
/// and every [`RendererRef`] handed out holds another one. The renderer is closed once the last
/// reference is released.
pub struct CacheEntry<R: Renderer> {
    key: CacheKey,
    cache_buster: CacheBuster,
    state: Mutex<EntryState<R>>,
    refs: AtomicUsize,
    last_access: Mutex<Instant>,
    failure_listener: Mutex<Option<AbortHandle>>,
}

impl<R: Renderer> fmt::Debug for CacheEntry<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("cache_buster", &self.cache_buster)
            .field("state", &self.state.lock().name())
            .field("refs", &self.refs.load(Ordering::Relaxed))
            .finish()
    }
}

impl<R: Renderer> CacheEntry<R> {
    /// Creates a new pending entry without any references.
    pub fn new(key: CacheKey, cache_buster: CacheBuster) -> Self {
        Self {
            key,
            cache_buster,
            state: Mutex::new(EntryState::Pending(Vec::new())),
            refs: AtomicUsize::new(0),
            last_access: Mutex::new(Instant::now()),
            failure_listener: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn cache_buster(&self) -> &CacheBuster {
        &self.cache_buster
    }

    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.state.lock(), EntryState::Pending(_))
    }

    /// Adds a reference that is not tied to a [`RendererRef`].
    ///
    /// The cache does this once when inserting the entry into its map, and gives that
    /// reference back with [`release`](Self::release) when evicting it.
    pub fn acquire(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    fn handle(self: &Arc<Self>, renderer: &Arc<R>) -> RendererRef<R> {
        self.acquire();
        RendererRef {
            entry: Arc::clone(self),
            renderer: Arc::clone(renderer),
        }
    }

    /// Registers a caller that wants to use the renderer.
    ///
    /// A ready or failed entry answers right away, a pending one queues the caller until
    /// [`resolve`](Self::resolve) is called.
    pub fn enqueue_waiter(self: &Arc<Self>) -> oneshot::Receiver<Outcome<R>> {
        let (sender, receiver) = oneshot::channel();

        let outcome = {
            let mut state = self.state.lock();
            match &mut *state {
                EntryState::Pending(waiters) => {
                    waiters.push(sender);
                    return receiver;
                }
                EntryState::Ready(Some(renderer)) => {
                    self.touch();
                    Ok(self.handle(renderer))
                }
                // Only reachable for entries that are no longer part of the cache.
                EntryState::Ready(None) => Err(RendererError::Canceled),
                EntryState::Failed(err) => Err(err.clone()),
            }
        };

        sender.send(outcome).ok();
        receiver
    }

    /// Completes the creation of this entry and notifies all waiters in arrival order.
    ///
    /// An entry can only be resolved once. Returns `false` and discards the outcome if it was
    /// already resolved.
    pub fn resolve(self: &Arc<Self>, outcome: Result<R, RendererError>) -> bool {
        let notifications: Vec<_> = {
            let mut state = self.state.lock();
            if !matches!(*state, EntryState::Pending(_)) {
                let current = state.name();
                drop(state);
                tracing::error!(
                    key = %self.key,
                    state = current,
                    "Renderer cache entry was resolved twice"
                );
                if let Ok(renderer) = outcome {
                    renderer.close();
                }
                return false;
            }

            // References for the waiters are acquired while holding the lock, so that a
            // concurrent release can not close the renderer before they got it.
            match outcome {
                Ok(renderer) => {
                    let renderer = Arc::new(renderer);
                    let previous = mem::replace(&mut *state, EntryState::Ready(Some(renderer)));
                    let EntryState::Ready(Some(renderer)) = &*state else {
                        unreachable!("state was just set to ready");
                    };
                    take_waiters(previous)
                        .into_iter()
                        .map(|waiter| (waiter, Ok(self.handle(renderer))))
                        .collect()
                }
                Err(err) => {
                    let previous = mem::replace(&mut *state, EntryState::Failed(err.clone()));
                    take_waiters(previous)
                        .into_iter()
                        .map(|waiter| (waiter, Err(err.clone())))
                        .collect()
                }
            }
        };
        self.touch();

        tracing::trace!(
            key = %self.key,
            waiters = notifications.len(),
            "Resolved renderer cache entry"
        );
        for (waiter, outcome) in notifications {
            // A waiter that went away drops its reference right here.
            waiter.send(outcome).ok();
        }

        // Nobody holds on to this entry anymore, it was evicted while still pending.
        if self.ref_count() == 0 {
            self.teardown();
        }
        true
    }

    /// Gives back one reference, closing the renderer when it was the last one.
    pub fn release(&self) {
        match self
            .refs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |refs| refs.checked_sub(1))
        {
            Ok(1) => self.teardown(),
            Ok(_) => {}
            Err(_) => {
                tracing::error!(key = %self.key, "Renderer cache entry was released too often");
            }
        }
    }

    /// Closes the renderer, if there is one that has not been closed yet.
    fn teardown(&self) {
        let renderer = match &mut *self.state.lock() {
            EntryState::Ready(renderer) => renderer.take(),
            _ => None,
        };
        if let Some(listener) = self.failure_listener.lock().take() {
            listener.abort();
        }
        if let Some(renderer) = renderer {
            tracing::debug!(key = %self.key, "Closing renderer");
            renderer.close();
        }
    }

    /// Attaches the task that watches the ready renderer for failures.
    ///
    /// The task is aborted when the renderer is closed, or right away if that already happened.
    pub fn set_failure_listener(&self, listener: AbortHandle) {
        let state = self.state.lock();
        if matches!(*state, EntryState::Ready(Some(_))) {
            if let Some(previous) = self.failure_listener.lock().replace(listener) {
                previous.abort();
            }
        } else {
            listener.abort();
        }
    }

    /// Marks the entry as used right now.
    pub fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    pub fn time_since_last_access(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_access.lock())
    }
}

fn take_waiters<R: Renderer>(state: EntryState<R>) -> Vec<Waiter<R>> {
    match state {
        EntryState::Pending(waiters) => waiters,
        _ => Vec::new(),
    }
}

/// Resolves a pending entry as canceled if the creation is dropped before completing.
pub struct CreationGuard<R: Renderer> {
    entry: Option<Arc<CacheEntry<R>>>,
}

impl<R: Renderer> CreationGuard<R> {
    pub fn new(entry: Arc<CacheEntry<R>>) -> Self {
        Self { entry: Some(entry) }
    }

    pub fn resolve(mut self, outcome: Result<R, RendererError>) {
        if let Some(entry) = self.entry.take() {
            entry.resolve(outcome);
        }
    }
}

impl<R: Renderer> Drop for CreationGuard<R> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            tracing::warn!(key = %entry.key(), "Renderer creation was dropped before completing");
            entry.resolve(Err(RendererError::Canceled));
        }
    }
}

/// A reference to a cached renderer.
///
/// The renderer stays alive at least as long as this reference. Dropping it releases the
/// reference, cloning it acquires another one.
pub struct RendererRef<R: Renderer> {
    entry: Arc<CacheEntry<R>>,
    renderer: Arc<R>,
}

impl<R: Renderer> RendererRef<R> {
    /// The cache key of the renderer.
    pub fn key(&self) -> &CacheKey {
        self.entry.key()
    }

    /// The cache-buster the renderer was created with.
    pub fn cache_buster(&self) -> &CacheBuster {
        self.entry.cache_buster()
    }

    /// Whether both references point to the same renderer.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.renderer, &other.renderer)
    }
}

impl<R: Renderer> Deref for RendererRef<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.renderer
    }
}

impl<R: Renderer> Clone for RendererRef<R> {
    fn clone(&self) -> Self {
        self.entry.handle(&self.renderer)
    }
}

impl<R: Renderer> Drop for RendererRef<R> {
    fn drop(&mut self) {
        self.entry.release();
    }
}

impl<R: Renderer + fmt::Debug> fmt::Debug for RendererRef<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererRef")
            .field("key", self.key())
            .field("renderer", &self.renderer)
            .finish()
    }
}
