//! Per-key request coordination.
//!
//! Each key (usually a session id) owns one slot that moves through
//! [`Phase::Idle`] -> [`Phase::Debouncing`] -> [`Phase::InFlight`] ->
//! [`Phase::Settled`]. Every new attempt bumps the slot's generation
//! (`req_id`); a task that completes under an older generation is stale and
//! its result is dropped without touching the slot or calling observers.
//!
//! The bookkeeping in [`Fetcher::run`] happens when `run` is called, not when
//! the returned future is first polled, and tasks are spawned onto the
//! current tokio runtime so they make progress even if nobody awaits them.
//! The slot map lock is never held across an `.await` or while an observer
//! runs.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::signature::digest;

type StartFn = Box<dyn FnOnce() + Send>;
type SuccessFn<T> = Box<dyn FnOnce(&T) + Send>;
type ErrorFn<E> = Box<dyn FnOnce(&E) + Send>;
type PanicFn = Box<dyn FnOnce(&str) + Send>;
type SharedResult<T> = Shared<BoxFuture<'static, Option<T>>>;
type Slots<T> = Arc<Mutex<HashMap<String, Slot<T>>>>;

/// When `on_start` fires for a debounced run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartMode {
    /// Immediately, while the debounce timer is still pending.
    Eager,
    /// Only once the task actually begins.
    #[default]
    OnExec,
}

/// Observable state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing has completed and nothing is pending.
    Idle,
    /// A debounce timer is pending.
    Debouncing,
    /// A task is running.
    InFlight,
    /// The last attempt finished (successfully or not).
    Settled,
}

/// One call to [`Fetcher::run`].
pub struct RunRequest<T, E> {
    pub key: String,
    pub signature: String,
    pub debounce: Duration,
    /// Skip the duplicate-signature check.
    pub force: bool,
    pub start_mode: StartMode,
    on_start: Option<StartFn>,
    on_success: Option<SuccessFn<T>>,
    on_error: Option<ErrorFn<E>>,
    on_panic: Option<PanicFn>,
}

impl<T, E> RunRequest<T, E> {
    pub fn new(key: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            signature: signature.into(),
            debounce: Duration::ZERO,
            force: false,
            start_mode: StartMode::default(),
            on_start: None,
            on_success: None,
            on_error: None,
            on_panic: None,
        }
    }

    #[must_use]
    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    #[must_use]
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    #[must_use]
    pub fn start_mode(mut self, mode: StartMode) -> Self {
        self.start_mode = mode;
        self
    }

    #[must_use]
    pub fn on_start(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_start = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_success(mut self, f: impl FnOnce(&T) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_error(mut self, f: impl FnOnce(&E) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Called with the panic message when the current task panics.
    #[must_use]
    pub fn on_panic(mut self, f: impl FnOnce(&str) + Send + 'static) -> Self {
        self.on_panic = Some(Box::new(f));
        self
    }
}

impl<T, E> fmt::Debug for RunRequest<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunRequest")
            .field("key", &self.key)
            .field("signature", &self.signature)
            .field("debounce", &self.debounce)
            .field("force", &self.force)
            .field("start_mode", &self.start_mode)
            .finish_non_exhaustive()
    }
}

struct Observers<T, E> {
    on_start: Option<StartFn>,
    on_success: Option<SuccessFn<T>>,
    on_error: Option<ErrorFn<E>>,
    on_panic: Option<PanicFn>,
}

enum SlotPhase<T> {
    Idle,
    Debouncing {
        timer: JoinHandle<()>,
        resolve: oneshot::Sender<Option<T>>,
    },
    InFlight {
        shared: SharedResult<T>,
    },
    Settled,
}

struct Slot<T> {
    req_id: u64,
    signature: Option<String>,
    phase: SlotPhase<T>,
    last_value: Option<T>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            req_id: 0,
            signature: None,
            phase: SlotPhase::Idle,
            last_value: None,
        }
    }

    fn is_busy(&self) -> bool {
        matches!(
            self.phase,
            SlotPhase::Debouncing { .. } | SlotPhase::InFlight { .. }
        )
    }

    fn rest_phase(&self) -> SlotPhase<T> {
        if self.last_value.is_some() {
            SlotPhase::Settled
        } else {
            SlotPhase::Idle
        }
    }

    /// Stop a pending timer and forget the in-flight handle.
    ///
    /// Returns the resolver of a debounced call, which the caller settles with
    /// `None` once the lock is released.
    fn interrupt(&mut self) -> Option<oneshot::Sender<Option<T>>> {
        let rest = self.rest_phase();
        match std::mem::replace(&mut self.phase, rest) {
            SlotPhase::Debouncing { timer, resolve } => {
                timer.abort();
                Some(resolve)
            }
            SlotPhase::InFlight { .. } | SlotPhase::Idle | SlotPhase::Settled => None,
        }
    }
}

/// Debounced, deduplicated, last-request-wins task runner keyed by string.
///
/// Generations come from one counter shared by all keys, so a slot that is
/// reset and recreated can never reuse the generation of a task still running
/// for its previous incarnation.
pub struct Fetcher<T, E> {
    slots: Slots<T>,
    generations: Arc<AtomicU64>,
    _error: PhantomData<fn(E)>,
}

impl<T, E> Clone for Fetcher<T, E> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
            generations: Arc::clone(&self.generations),
            _error: PhantomData,
        }
    }
}

impl<T, E> Default for Fetcher<T, E> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(0)),
            _error: PhantomData,
        }
    }
}

impl<T, E> fmt::Debug for Fetcher<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys = lock(&self.slots).len();
        f.debug_struct("Fetcher").field("keys", &keys).finish()
    }
}

impl<T, E> Fetcher<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` for `request.key` unless an identical request is already
    /// covered.
    ///
    /// Resolves to `None` when the call is superseded, cancelled, stale or
    /// fails; failures are reported through `on_error`. Must be called from
    /// within a tokio runtime.
    pub fn run<F, Fut>(&self, request: RunRequest<T, E>, task: F) -> BoxFuture<'static, Option<T>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let RunRequest {
            key,
            signature,
            debounce,
            force,
            start_mode,
            on_start,
            on_success,
            on_error,
            on_panic,
        } = request;

        let mut slots = lock(&self.slots);
        let slot = slots.entry(key.clone()).or_insert_with(Slot::new);

        if !force && slot.signature.as_deref() == Some(signature.as_str()) {
            if let SlotPhase::InFlight { shared } = &slot.phase {
                tracing::trace!(key = %key, "joining in-flight lister request");
                return shared.clone().boxed();
            }
            return future::ready(slot.last_value.clone()).boxed();
        }

        let superseded = slot.interrupt();
        let req_id = self.next_generation();
        slot.req_id = req_id;
        tracing::debug!(
            key = %key,
            req_id,
            signature = %digest(&signature),
            debounce_ms = debounce.as_millis() as u64,
            force,
            "scheduling lister request"
        );
        slot.signature = Some(signature);

        if debounce.is_zero() {
            let observers = Observers {
                on_start,
                on_success,
                on_error,
                on_panic,
            };
            let shared = spawn_exec(Arc::clone(&self.slots), key, req_id, task, observers);
            slot.phase = SlotPhase::InFlight {
                shared: shared.clone(),
            };
            drop(slots);
            settle_superseded(superseded);
            return shared.boxed();
        }

        let (eager_start, deferred_start) = match start_mode {
            StartMode::Eager => (on_start, None),
            StartMode::OnExec => (None, on_start),
        };
        let observers = Observers {
            on_start: deferred_start,
            on_success,
            on_error,
            on_panic,
        };
        let (resolve, settled) = oneshot::channel();
        let timer = tokio::spawn(debounce_then_exec(
            Arc::clone(&self.slots),
            key,
            req_id,
            debounce,
            task,
            observers,
        ));
        slot.phase = SlotPhase::Debouncing { timer, resolve };
        drop(slots);

        settle_superseded(superseded);
        if let Some(on_start) = eager_start {
            on_start();
        }
        async move { settled.await.unwrap_or(None) }.boxed()
    }

    /// Invalidate whatever is pending or running for `key`.
    ///
    /// A pending debounced call resolves to `None`; a running task keeps
    /// running but its result is dropped. No-op for unknown keys.
    pub fn cancel(&self, key: &str) {
        let superseded = {
            let mut slots = lock(&self.slots);
            let Some(slot) = slots.get_mut(key) else {
                return;
            };
            if slot.is_busy() {
                // The interrupted request never settled, so its signature must
                // not short-circuit the next identical call.
                slot.signature = None;
            }
            let pending = slot.interrupt();
            slot.req_id = self.next_generation();
            pending
        };
        settle_superseded(superseded);
    }

    /// Cancel `key` and drop all of its state.
    pub fn reset(&self, key: &str) {
        let superseded = {
            let mut slots = lock(&self.slots);
            slots.remove(key).and_then(|mut slot| slot.interrupt())
        };
        settle_superseded(superseded);
    }

    /// Reset every key.
    pub fn clear(&self) {
        let pending: Vec<_> = {
            let mut slots = lock(&self.slots);
            slots
                .drain()
                .filter_map(|(_, mut slot)| slot.interrupt())
                .collect()
        };
        for resolve in pending {
            settle_superseded(Some(resolve));
        }
    }

    pub fn phase(&self, key: &str) -> Phase {
        let slots = lock(&self.slots);
        match slots.get(key).map(|slot| &slot.phase) {
            None | Some(SlotPhase::Idle) => Phase::Idle,
            Some(SlotPhase::Debouncing { .. }) => Phase::Debouncing,
            Some(SlotPhase::InFlight { .. }) => Phase::InFlight,
            Some(SlotPhase::Settled) => Phase::Settled,
        }
    }

    /// Most recent successful result for `key`.
    pub fn last_value(&self, key: &str) -> Option<T> {
        lock(&self.slots)
            .get(key)
            .and_then(|slot| slot.last_value.clone())
    }

    /// Current generation of `key` (0 when unknown). Strictly increases with
    /// every attempt and every cancellation.
    pub fn generation(&self, key: &str) -> u64 {
        lock(&self.slots).get(key).map_or(0, |slot| slot.req_id)
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.slots).contains_key(key)
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }
}

fn lock<T>(slots: &Mutex<HashMap<String, Slot<T>>>) -> MutexGuard<'_, HashMap<String, Slot<T>>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

fn settle_superseded<T>(resolve: Option<oneshot::Sender<Option<T>>>) {
    if let Some(resolve) = resolve {
        let _ = resolve.send(None);
    }
}

async fn debounce_then_exec<T, E, F, Fut>(
    slots: Slots<T>,
    key: String,
    req_id: u64,
    delay: Duration,
    task: F,
    observers: Observers<T, E>,
) where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    tokio::time::sleep(delay).await;

    let (resolve, shared) = {
        let mut guard = lock(&slots);
        let Some(slot) = guard.get_mut(&key) else {
            return;
        };
        if slot.req_id != req_id {
            return;
        }
        let resolve = match std::mem::replace(&mut slot.phase, SlotPhase::Idle) {
            SlotPhase::Debouncing { resolve, .. } => resolve,
            other => {
                slot.phase = other;
                return;
            }
        };
        let shared = spawn_exec(Arc::clone(&slots), key.clone(), req_id, task, observers);
        slot.phase = SlotPhase::InFlight {
            shared: shared.clone(),
        };
        (resolve, shared)
    };

    let value = shared.await;
    let _ = resolve.send(value);
}

fn spawn_exec<T, E, F, Fut>(
    slots: Slots<T>,
    key: String,
    req_id: u64,
    task: F,
    observers: Observers<T, E>,
) -> SharedResult<T>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let Observers {
        on_start,
        on_success,
        on_error,
        on_panic,
    } = observers;

    let handle = tokio::spawn(async move {
        let attempt = async move {
            if let Some(on_start) = on_start {
                on_start();
            }
            task().await
        };
        match AssertUnwindSafe(attempt).catch_unwind().await {
            Ok(outcome) => settle(&slots, &key, req_id, outcome, on_success, on_error),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                abandon(&slots, &key, req_id, &message, on_panic);
                None
            }
        }
    });

    handle
        .map(|joined| joined.unwrap_or(None))
        .boxed()
        .shared()
}

/// Put a slot whose current task panicked back to rest so the same
/// signature can run again.
fn abandon<T>(
    slots: &Mutex<HashMap<String, Slot<T>>>,
    key: &str,
    req_id: u64,
    message: &str,
    on_panic: Option<PanicFn>,
) {
    let mut guard = lock(slots);
    let Some(slot) = guard.get_mut(key) else {
        return;
    };
    if slot.req_id != req_id {
        tracing::trace!(key, req_id, "dropping stale lister panic");
        return;
    }
    slot.signature = None;
    slot.phase = slot.rest_phase();
    drop(guard);
    tracing::error!(key, req_id, panic = message, "lister task panicked");
    if let Some(on_panic) = on_panic {
        on_panic(message);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "task panicked".to_string())
}

fn settle<T: Clone, E>(
    slots: &Mutex<HashMap<String, Slot<T>>>,
    key: &str,
    req_id: u64,
    outcome: Result<T, E>,
    on_success: Option<SuccessFn<T>>,
    on_error: Option<ErrorFn<E>>,
) -> Option<T> {
    let mut guard = lock(slots);
    let Some(slot) = guard.get_mut(key) else {
        return None;
    };
    if slot.req_id != req_id {
        tracing::trace!(key, req_id, current = slot.req_id, "dropping stale lister result");
        return None;
    }

    slot.phase = SlotPhase::Settled;
    match outcome {
        Ok(value) => {
            slot.last_value = Some(value.clone());
            drop(guard);
            if let Some(on_success) = on_success {
                on_success(&value);
            }
            Some(value)
        }
        Err(err) => {
            // Failed attempts leave no value behind for their signature.
            slot.signature = None;
            drop(guard);
            if let Some(on_error) = on_error {
                on_error(&err);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn unknown_key_is_idle() {
        let fetcher: Fetcher<u32, String> = Fetcher::new();
        assert_eq!(fetcher.phase("nope"), Phase::Idle);
        assert_eq!(fetcher.generation("nope"), 0);
        fetcher.cancel("nope");
        fetcher.reset("nope");
    }

    #[tokio::test]
    async fn failure_goes_to_on_error_and_resolves_none() {
        let fetcher: Fetcher<u32, String> = Fetcher::new();
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&errors);
        let result = fetcher
            .run(
                RunRequest::new("k", "sig").on_error(move |err: &String| {
                    assert_eq!(err, "boom");
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
                || async { Err("boom".to_string()) },
            )
            .await;
        assert_eq!(result, None);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.phase("k"), Phase::Settled);
    }

    async fn explode() -> Result<u32, String> {
        panic!("accessor exploded")
    }

    #[tokio::test]
    async fn panicked_task_frees_its_slot() {
        let fetcher: Fetcher<u32, String> = Fetcher::new();
        let panics = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&panics);
        let failed = Arc::clone(&errors);
        let first = fetcher
            .run(
                RunRequest::new("k", "sig")
                    .on_error(move |_: &String| {
                        failed.fetch_add(1, Ordering::SeqCst);
                    })
                    .on_panic(move |message| seen.lock().unwrap().push(message.to_string())),
                explode,
            )
            .await;
        assert_eq!(first, None);
        assert_eq!(fetcher.phase("k"), Phase::Idle);
        assert_eq!(*panics.lock().unwrap(), vec!["accessor exploded".to_string()]);
        assert_eq!(errors.load(Ordering::SeqCst), 0);

        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let retry = fetcher
            .run(RunRequest::new("k", "sig"), move || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(4)
            })
            .await;
        assert_eq!(retry, Some(4));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.phase("k"), Phase::Settled);
    }

    #[tokio::test]
    async fn failed_signature_is_retried() {
        let fetcher: Fetcher<u32, String> = Fetcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let first = Arc::clone(&calls);
        fetcher
            .run(RunRequest::new("k", "sig"), move || async move {
                first.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            })
            .await;
        let second = Arc::clone(&calls);
        let value = fetcher
            .run(RunRequest::new("k", "sig"), move || async move {
                second.fetch_add(1, Ordering::SeqCst);
                Ok(5)
            })
            .await;
        assert_eq!(value, Some(5));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
