//! Push-style subscriptions over record stores and handler status changes.

use std::future::Future;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::store::StoreEvent;

/// A stream of values pushed whenever the watched state changes.
///
/// Dropping the subscription stops the background tasks feeding it.
#[derive(Debug)]
pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    tasks: Vec<JoinHandle<()>>,
}

impl<T> Subscription<T> {
    /// Waits for the next value. Returns `None` once the watched store is gone.
    pub async fn next(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Returns the next value if one is already queued.
    pub fn try_next(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Re-runs `load` whenever a store event passes `filter` or any of `updates` fires, pushing the
/// result to the returned subscription. With `trigger`, the current state is pushed right away.
///
/// `load` returning `None` skips the emission.
pub(crate) fn watch<K, T, F, Fut>(
    mut events: broadcast::Receiver<StoreEvent<K>>,
    updates: Vec<broadcast::Receiver<()>>,
    filter: impl Fn(&K) -> bool + Send + 'static,
    trigger: bool,
    load: F,
) -> Subscription<T>
where
    K: Clone + Send + 'static,
    T: Send + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Option<T>> + Send,
{
    let (sender, receiver) = mpsc::unbounded_channel();
    let (tick_sender, mut ticks) = mpsc::unbounded_channel::<()>();
    let mut tasks = Vec::with_capacity(updates.len() + 1);

    for mut handler_updates in updates {
        let tick_sender = tick_sender.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                match handler_updates.recv().await {
                    Ok(()) | Err(RecvError::Lagged(_)) => {
                        if tick_sender.send(()).is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }
    drop(tick_sender);

    tasks.push(tokio::spawn(async move {
        if trigger {
            if let Some(value) = load().await {
                if sender.send(value).is_err() {
                    return;
                }
            }
        }
        loop {
            let changed = tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => filter(event.key()),
                    // Missed events may have touched anything.
                    Err(RecvError::Lagged(_)) => true,
                    Err(RecvError::Closed) => break,
                },
                Some(()) = ticks.recv() => true,
            };
            if changed {
                if let Some(value) = load().await {
                    if sender.send(value).is_err() {
                        break;
                    }
                }
            }
        }
    }));

    Subscription { receiver, tasks }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::store::{MemoryStore, RecordStore};

    #[tokio::test]
    async fn test_watch_filters_and_triggers() {
        let store: Arc<MemoryStore<String, u32>> = Arc::new(MemoryStore::new());
        store.set("a".to_string(), 1).await.unwrap();

        let reader = store.clone();
        let mut subscription = watch(
            store.subscribe(),
            Vec::new(),
            |key: &String| key == "a",
            true,
            move || {
                let reader = reader.clone();
                async move { reader.get(&"a".to_string()).await.ok().flatten() }
            },
        );
        assert_eq!(subscription.next().await, Some(1));

        store.set("b".to_string(), 5).await.unwrap();
        store.set("a".to_string(), 2).await.unwrap();
        assert_eq!(subscription.next().await, Some(2));
        assert_eq!(subscription.try_next(), None);
    }

    #[tokio::test]
    async fn test_handler_updates_rerun_load() {
        let store: MemoryStore<String, u32> = MemoryStore::new();
        let (updates, _) = broadcast::channel(4);
        let mut subscription = watch(
            store.subscribe(),
            vec![updates.subscribe()],
            |_: &String| true,
            false,
            || async { Some("reloaded") },
        );

        updates.send(()).unwrap();
        let value = tokio::time::timeout(Duration::from_secs(1), subscription.next())
            .await
            .unwrap();
        assert_eq!(value, Some("reloaded"));
    }
}
