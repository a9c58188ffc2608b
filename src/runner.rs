use crate::{
    lease::{HeldLease, LeaseGuard},
    Message, MessageConsumer, MessageConsumptionError, MessageConsumptionOutcome, Poller,
    RunnerError,
};
use futures::FutureExt;
use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, Mutex, OwnedSemaphorePermit, Semaphore},
    task::JoinSet,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_DELETE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Ceiling on messages held at once, queued or being handled.
    pub max_in_flight: usize,
    /// Number of workers running the consumer in parallel.
    pub concurrency: usize,
    pub handler_timeout: Duration,
    /// Bounds deletes and lease bookkeeping. Deletes get this much time even
    /// after the run was cancelled.
    pub delete_timeout: Duration,
}

impl RunnerConfig {
    pub fn new(max_in_flight: usize, concurrency: usize) -> Self {
        Self {
            max_in_flight,
            concurrency,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
            delete_timeout: DEFAULT_DELETE_TIMEOUT,
        }
    }

    pub fn with_handler_timeout(mut self, handler_timeout: Duration) -> Self {
        self.handler_timeout = handler_timeout;
        self
    }

    pub fn with_delete_timeout(mut self, delete_timeout: Duration) -> Self {
        self.delete_timeout = delete_timeout;
        self
    }

    fn validate(&self) -> Result<(), RunnerError> {
        if self.max_in_flight == 0 {
            return Err(RunnerError::InvalidConfig("max_in_flight must be > 0".to_string()));
        }
        if self.concurrency == 0 {
            return Err(RunnerError::InvalidConfig("concurrency must be > 0".to_string()));
        }
        Ok(())
    }

    // room for the messages held beyond what the workers are busy with; tokio
    // channels need at least one slot, the admission gate still caps the total
    fn queue_capacity(&self) -> usize {
        self.max_in_flight.saturating_sub(self.concurrency).max(1)
    }
}

/// Counting gate over the messages currently held by one run.
#[derive(Clone)]
pub struct AdmissionGate {
    slots: Arc<Semaphore>,
    capacity: usize,
    peak: Arc<AtomicUsize>,
}

/// One message's claim on the [`AdmissionGate`], given back on drop.
#[derive(Debug)]
pub struct AdmissionSlot {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Waits for a free slot.
    pub async fn admit(&self) -> AdmissionSlot {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .unwrap_or_else(|_| unreachable!("admission semaphore is never closed"));
        self.peak.fetch_max(self.held(), Ordering::SeqCst);
        AdmissionSlot { _permit: permit }
    }

    pub fn held(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    /// Most slots ever seen held at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

struct Admitted {
    message: Message,
    slot: AdmissionSlot,
}

type SharedQueue = Arc<Mutex<mpsc::Receiver<Admitted>>>;

/// Competing-consumers worker pool over a [`Poller`].
///
/// One producer pulls messages while fewer than `max_in_flight` are held and
/// hands them to `concurrency` workers through a bounded queue. A message is
/// deleted only after the consumer succeeded on it; anything else leaves it for
/// the queue to redeliver.
///
/// A panicking consumer counts as a failed message; the worker carries on.
pub struct Runner {
    poller: Arc<Poller>,
    consumer: Arc<dyn MessageConsumer>,
    config: RunnerConfig,
    lease: Option<LeaseGuard>,
    gate: AdmissionGate,
}

impl Runner {
    pub fn new(
        poller: Arc<Poller>,
        consumer: Arc<dyn MessageConsumer>,
        config: RunnerConfig,
    ) -> Result<Self, RunnerError> {
        config.validate()?;
        if config.concurrency > config.max_in_flight {
            log::warn!(
                "concurrency ({}) exceeds max_in_flight ({}); only {} workers can ever be busy",
                config.concurrency,
                config.max_in_flight,
                config.max_in_flight
            );
        }
        Ok(Self {
            poller,
            consumer,
            config,
            lease: None,
            gate: AdmissionGate::new(config.max_in_flight),
        })
    }

    /// Skip messages whose lease is held by someone else instead of handling them
    /// twice.
    pub fn with_lease(mut self, lease: LeaseGuard) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// The gate bounding held messages, shared by every run of this runner.
    pub fn admission(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Consumes until `cancel` fires, then lets the workers finish what they hold
    /// and returns [`RunnerError::Cancelled`].
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), RunnerError> {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity());
        let queue: SharedQueue = Arc::new(Mutex::new(rx));

        log::info!(
            "Starting runner with max_in_flight={} concurrency={} lease={}",
            self.config.max_in_flight,
            self.config.concurrency,
            self.lease.is_some()
        );

        let mut workers = JoinSet::new();
        for id in 0..self.config.concurrency {
            let worker = Worker {
                id,
                poller: self.poller.clone(),
                consumer: self.consumer.clone(),
                lease: self.lease.clone(),
                config: self.config,
            };
            workers.spawn(worker.run(queue.clone(), cancel.clone()));
        }
        drop(queue);

        produce(&self.poller, &self.gate, tx, &cancel).await;

        while let Some(res) = workers.join_next().await {
            if let Err(e) = res {
                log::error!("Worker task failed: {e}");
            }
        }

        if cancel.is_cancelled() {
            log::info!("Runner stopped");
            Err(RunnerError::Cancelled)
        } else {
            log::error!("All workers exited before the runner was cancelled");
            Err(RunnerError::WorkersExited)
        }
    }

    /// Like [`Runner::run`], cancelling itself once `limit` has passed.
    pub async fn run_for(&self, limit: Duration) -> Result<(), RunnerError> {
        let cancel = CancellationToken::new();
        let timer = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(limit).await;
                cancel.cancel();
            }
        });

        let res = self.run(cancel).await;
        timer.abort();
        match res {
            Err(RunnerError::Cancelled) => Err(RunnerError::DeadlineExceeded),
            other => other,
        }
    }
}

// Drops `tx` on the way out, which lets the workers drain the queue and stop.
async fn produce(
    poller: &Poller,
    gate: &AdmissionGate,
    tx: mpsc::Sender<Admitted>,
    cancel: &CancellationToken,
) {
    loop {
        let slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            slot = gate.admit() => slot,
        };

        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = poller.receive_one() => received,
        };
        let message = match received {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(e) => {
                log::error!("Failed to receive message: {e}");
                continue;
            }
        };

        let id = message.id().to_string();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::debug!(
                    "Cancelled before message {id} could be queued, leaving it for redelivery"
                );
                break;
            }
            sent = tx.send(Admitted { message, slot }) => {
                if sent.is_err() {
                    log::error!("No workers left to take message {id}");
                    break;
                }
            }
        }
    }
    log::debug!("Producer stopped, {} messages still held", gate.held());
}

struct Worker {
    id: usize,
    poller: Arc<Poller>,
    consumer: Arc<dyn MessageConsumer>,
    lease: Option<LeaseGuard>,
    config: RunnerConfig,
}

impl Worker {
    async fn run(self, queue: SharedQueue, cancel: CancellationToken) {
        log::debug!("Worker {} started", self.id);
        loop {
            let next = queue.lock().await.recv().await;
            let Some(Admitted { message, slot }) = next else {
                break;
            };
            self.process(&message, &cancel).await;
            drop(slot);
        }
        log::debug!("Worker {} stopped", self.id);
    }

    async fn process(&self, message: &Message, cancel: &CancellationToken) {
        let held = match &self.lease {
            Some(guard) => match self.hold_lease(guard, message).await {
                Some(held) => Some(held),
                None => return,
            },
            None => None,
        };

        match self.handle(message, cancel).await {
            Ok(outcome) => self.delete(message, outcome).await,
            Err(e) => log::error!(
                "Worker {} failed to process message {}: {e}",
                self.id,
                message.id()
            ),
        }

        if let (Some(guard), Some(held)) = (&self.lease, held) {
            self.release_lease(guard, held).await;
        }
    }

    // None means: leave the message alone this time around
    async fn hold_lease(&self, guard: &LeaseGuard, message: &Message) -> Option<HeldLease> {
        match timeout(self.config.delete_timeout, guard.try_hold(message)).await {
            Ok(Ok(Some(held))) => Some(held),
            Ok(Ok(None)) => {
                log::debug!(
                    "Worker {}: message {} is leased elsewhere, skipping",
                    self.id,
                    message.id()
                );
                None
            }
            Ok(Err(e)) => {
                log::error!(
                    "Worker {}: could not lease message {}: {e}",
                    self.id,
                    message.id()
                );
                None
            }
            Err(_) => {
                log::warn!(
                    "Worker {}: leasing message {} timed out",
                    self.id,
                    message.id()
                );
                None
            }
        }
    }

    async fn handle(
        &self,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<MessageConsumptionOutcome, MessageConsumptionError> {
        let limit = self.config.handler_timeout;
        let handler_cancel = cancel.child_token();
        let consume = AssertUnwindSafe(self.consumer.consume(message, &handler_cancel));
        match timeout(limit, consume.catch_unwind()).await {
            Ok(Ok(res)) => res,
            Ok(Err(payload)) => Err(MessageConsumptionError::Panicked(panic_message(&*payload))),
            Err(_) => Err(MessageConsumptionError::TimedOut(limit)),
        }
    }

    // deliberately not tied to `cancel`: the message has been handled already
    async fn delete(&self, message: &Message, outcome: MessageConsumptionOutcome) {
        match timeout(self.config.delete_timeout, self.poller.delete(message)).await {
            Ok(Ok(())) => log::debug!(
                "Worker {}: message {} {outcome:?}, deleted",
                self.id,
                message.id()
            ),
            Ok(Err(e)) => log::error!(
                "Worker {} failed to delete message {}: {e}",
                self.id,
                message.id()
            ),
            Err(_) => log::warn!(
                "Worker {}: deleting message {} timed out after {:?}",
                self.id,
                message.id(),
                self.config.delete_timeout
            ),
        }
    }

    async fn release_lease(&self, guard: &LeaseGuard, held: HeldLease) {
        let key = held.key().to_string();
        match timeout(self.config.delete_timeout, guard.release(held)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("Worker {} failed to release lease {key}: {e}", self.id),
            Err(_) => log::warn!("Worker {}: releasing lease {key} timed out", self.id),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
