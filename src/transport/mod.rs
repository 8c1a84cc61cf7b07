//! Message transport seam and consumer pools.
//!
//! The bus itself is an external collaborator; routers only see the
//! [`MessageBus`] trait. [`MemoryBus`] is the in-process implementation used
//! by the replay command and the tests.
//!
//! A router runs as a [`ConsumerPool`]: `concurrency` independent consumers
//! read the same input channel. With `async_consumer` set, each consumer
//! hands messages to spawned runs bounded by `max_concurrency`, so bursts
//! can exceed the number of consumers. Runs share nothing but the handler.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::core::error::{Result, SyncError};
use crate::core::stage::MessageHandler;
use crate::domain::Message;

/// Topic/queue addressing with at-least-once delivery
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, destination: &str, message: Message) -> Result<()>;

    /// Receiver for a destination; every clone competes for the same messages
    fn consumer(&self, destination: &str) -> flume::Receiver<Message>;
}

type Channel = (flume::Sender<Message>, flume::Receiver<Message>);

/// Unbounded in-process bus keyed by destination name
#[derive(Default)]
pub struct MemoryBus {
    channels: DashMap<String, Channel>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, destination: &str) -> Channel {
        self.channels
            .entry(destination.to_string())
            .or_insert_with(flume::unbounded)
            .clone()
    }

    /// Stop accepting messages for `destination`; consumers finish what is
    /// already queued and then stop
    pub fn close(&self, destination: &str) {
        self.channels.remove(destination);
    }

    /// Take everything currently queued on `destination`
    pub fn drain(&self, destination: &str) -> Vec<Message> {
        self.channel(destination).1.try_iter().collect()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, destination: &str, message: Message) -> Result<()> {
        let (sender, _) = self.channel(destination);
        sender
            .send_async(message)
            .await
            .map_err(|e| SyncError::transient(format!("bus.publish {destination}"), e.to_string()))
    }

    fn consumer(&self, destination: &str) -> flume::Receiver<Message> {
        self.channel(destination).1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub concurrency: usize,
    pub max_concurrency: usize,
    pub async_consumer: bool,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_concurrency: 1,
            async_consumer: false,
        }
    }
}

/// Running consumers of one router
pub struct ConsumerPool {
    name: String,
    workers: Vec<JoinHandle<()>>,
    burst: Option<(Arc<Semaphore>, usize)>,
}

impl ConsumerPool {
    pub fn spawn(
        handler: Arc<dyn MessageHandler>,
        receiver: flume::Receiver<Message>,
        settings: &ConsumerSettings,
    ) -> Self {
        let name = handler.name().to_string();
        let burst = settings.async_consumer.then(|| {
            let permits = settings.max_concurrency.max(1);
            (Arc::new(Semaphore::new(permits)), permits)
        });

        let workers = (0..settings.concurrency.max(1))
            .map(|worker| {
                tokio::spawn(consume(
                    worker,
                    handler.clone(),
                    receiver.clone(),
                    burst.as_ref().map(|(semaphore, _)| semaphore.clone()),
                ))
            })
            .collect();

        info!(
            router = %name,
            consumers = settings.concurrency,
            max_concurrency = settings.max_concurrency,
            async_consumer = settings.async_consumer,
            "Router started"
        );

        Self {
            name,
            workers,
            burst,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until the input closes and every in-flight run has finished
    pub async fn join(self) {
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(router = %self.name, error = %e, "Consumer task ended abnormally");
            }
        }
        if let Some((semaphore, permits)) = self.burst {
            let _ = semaphore.acquire_many(permits as u32).await;
        }
        info!(router = %self.name, "Router stopped");
    }
}

async fn consume(
    worker: usize,
    handler: Arc<dyn MessageHandler>,
    receiver: flume::Receiver<Message>,
    burst: Option<Arc<Semaphore>>,
) {
    while let Ok(message) = receiver.recv_async().await {
        match &burst {
            None => {
                handler.handle(message).await;
            }
            Some(semaphore) => {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                let handler = handler.clone();
                tokio::spawn(async move {
                    handler.handle(message).await;
                    drop(permit);
                });
            }
        }
    }
    debug!(router = handler.name(), worker, "Input closed, consumer stopping");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::core::stage::RunOutcome;

    struct Counting {
        seen: AtomicUsize,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn handle(&self, _message: Message) -> RunOutcome {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.seen.fetch_add(1, Ordering::SeqCst);
            RunOutcome::Completed
        }
    }

    fn counting() -> Arc<Counting> {
        Arc::new(Counting {
            seen: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_memory_bus_delivers_each_message_once() {
        let bus = MemoryBus::new();
        let a = bus.consumer("queue:in");
        let b = bus.consumer("queue:in");

        bus.publish("queue:in", Message::new("1")).await.unwrap();
        bus.publish("queue:in", Message::new("2")).await.unwrap();

        let mut got: Vec<_> = a.try_iter().chain(b.try_iter()).collect();
        got.sort_by(|x, y| x.body.cmp(&y.body));
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].body, "1");
    }

    #[tokio::test]
    async fn test_pool_processes_everything_then_stops() {
        let bus = MemoryBus::new();
        let handler = counting();
        let settings = ConsumerSettings {
            concurrency: 3,
            max_concurrency: 3,
            async_consumer: false,
        };
        let pool = ConsumerPool::spawn(handler.clone(), bus.consumer("queue:in"), &settings);

        for i in 0..9 {
            bus.publish("queue:in", Message::new(i.to_string())).await.unwrap();
        }
        bus.close("queue:in");
        pool.join().await;

        assert_eq!(handler.seen.load(Ordering::SeqCst), 9);
        assert!(handler.peak.load(Ordering::SeqCst) <= 3);
    }

    struct Panicking {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn handle(&self, message: Message) -> RunOutcome {
            if message.body == "boom" {
                panic!("handler crashed");
            }
            self.seen.fetch_add(1, Ordering::SeqCst);
            RunOutcome::Completed
        }
    }

    #[tokio::test]
    async fn test_join_survives_crashed_consumer() {
        let bus = MemoryBus::new();
        let handler = Arc::new(Panicking {
            seen: AtomicUsize::new(0),
        });
        let settings = ConsumerSettings {
            concurrency: 2,
            max_concurrency: 2,
            async_consumer: false,
        };
        let pool = ConsumerPool::spawn(handler.clone(), bus.consumer("queue:in"), &settings);

        bus.publish("queue:in", Message::new("boom")).await.unwrap();
        for i in 0..5 {
            bus.publish("queue:in", Message::new(i.to_string())).await.unwrap();
        }
        bus.close("queue:in");
        pool.join().await;

        // The surviving consumer drains the rest
        assert_eq!(handler.seen.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_async_consumer_bursts_up_to_max() {
        let bus = MemoryBus::new();
        let handler = counting();
        let settings = ConsumerSettings {
            concurrency: 1,
            max_concurrency: 4,
            async_consumer: true,
        };
        let pool = ConsumerPool::spawn(handler.clone(), bus.consumer("queue:in"), &settings);

        for i in 0..12 {
            bus.publish("queue:in", Message::new(i.to_string())).await.unwrap();
        }
        bus.close("queue:in");
        pool.join().await;

        assert_eq!(handler.seen.load(Ordering::SeqCst), 12);
        assert!(handler.peak.load(Ordering::SeqCst) <= 4);
    }
}
