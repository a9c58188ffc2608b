use crate::{
    DeliveryToken, Message, MessageClientError, MessageConsumer, MessageConsumptionError,
    MessageConsumptionOutcome, MessageSource,
};
use async_trait::async_trait;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;

// stands in for the long poll so an idle runner doesn't spin
const EMPTY_POLL_DELAY: Duration = Duration::from_millis(5);

pub(crate) fn message(n: usize) -> Message {
    Message::new(
        n.to_string(),
        format!("body-{n}"),
        DeliveryToken::new(format!("receipt-{n}")),
    )
}

/// Polls `cond` until it holds, giving up after `timeout`.
pub(crate) async fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

pub(crate) struct MockMessageSource {
    pending: Mutex<VecDeque<Message>>,
    endless: Option<AtomicUsize>,
    receive_err: Option<MessageClientError>,
    fail_deletes: bool,
    deleted: Mutex<Vec<String>>,
    delete_attempts: AtomicUsize,
}

impl MockMessageSource {
    pub(crate) fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            pending: Mutex::new(messages.into()),
            endless: None,
            receive_err: None,
            fail_deletes: false,
            deleted: Mutex::new(Vec::new()),
            delete_attempts: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_messages(n: usize) -> Self {
        Self::from_messages((1..=n).map(message).collect())
    }

    // never runs dry, every receive hands out a fresh message
    pub(crate) fn endless() -> Self {
        Self {
            endless: Some(AtomicUsize::new(1)),
            ..Self::with_messages(0)
        }
    }

    pub(crate) fn failing_receive(err: MessageClientError) -> Self {
        Self {
            receive_err: Some(err),
            ..Self::with_messages(0)
        }
    }

    pub(crate) fn failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub(crate) fn delete_attempts(&self) -> usize {
        self.delete_attempts.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait_for_deleted(&self, n: usize, timeout: Duration) -> bool {
        eventually(timeout, || self.deleted.lock().unwrap().len() >= n).await
    }

    fn next_message(&self) -> Option<Message> {
        if let Some(counter) = &self.endless {
            return Some(message(counter.fetch_add(1, Ordering::SeqCst)));
        }
        self.pending.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl MessageSource for MockMessageSource {
    async fn receive(
        &self,
        max: usize,
        _wait: Duration,
    ) -> Result<Vec<Message>, MessageClientError> {
        assert_eq!(max, 1, "the worker only ever asks for a single message");
        if let Some(err) = &self.receive_err {
            tokio::time::sleep(EMPTY_POLL_DELAY).await;
            return Err(err.clone());
        }

        let Some(msg) = self.next_message() else {
            tokio::time::sleep(EMPTY_POLL_DELAY).await;
            return Ok(Vec::new());
        };
        Ok(vec![msg])
    }

    async fn delete(&self, delivery_token: &DeliveryToken) -> Result<(), MessageClientError> {
        self.delete_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes {
            return Err(MessageClientError::Transient("delete refused".to_string()));
        }
        self.deleted
            .lock()
            .unwrap()
            .push(delivery_token.as_str().to_string());
        Ok(())
    }
}

type ErrFactory = Box<dyn Fn() -> MessageConsumptionError + Send + Sync>;

pub(crate) struct MockMessageConsumer {
    err: Option<ErrFactory>,
    ok: MessageConsumptionOutcome,
    delay: Duration,
    consumed: Mutex<Vec<String>>,
    running: AtomicUsize,
    peak_running: AtomicUsize,
}

impl MockMessageConsumer {
    pub(crate) fn return_err(
        err: impl Fn() -> MessageConsumptionError + Send + Sync + 'static,
    ) -> Self {
        Self {
            err: Some(Box::new(err)),
            ..Self::return_ok(MessageConsumptionOutcome::Succeeded)
        }
    }

    pub(crate) fn return_ok(ok: MessageConsumptionOutcome) -> Self {
        Self {
            err: None,
            ok,
            delay: Duration::ZERO,
            consumed: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn consumed(&self) -> Vec<String> {
        self.consumed.lock().unwrap().clone()
    }

    pub(crate) fn peak_running(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageConsumer for MockMessageConsumer {
    async fn consume(
        &self,
        message: &Message,
        _cancel: &CancellationToken,
    ) -> Result<MessageConsumptionOutcome, MessageConsumptionError> {
        let current = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(current, Ordering::SeqCst);
        self.consumed.lock().unwrap().push(message.id().to_string());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        match &self.err {
            Some(err) => Err(err()),
            None => Ok(self.ok.clone()),
        }
    }
}
