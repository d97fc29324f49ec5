use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventKind {
    Message,
    Unknown,
}

/// One inbound update. Only `Message` events carry text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Event {
    pub(crate) id: i64,
    pub(crate) kind: EventKind,
    pub(crate) chat_id: i64,
    pub(crate) owner: String,
    pub(crate) text: String,
}

impl Event {
    pub(crate) fn message(id: i64, chat_id: i64, owner: &str, text: &str) -> Self {
        Event {
            id,
            kind: EventKind::Message,
            chat_id,
            owner: owner.to_string(),
            text: text.to_string(),
        }
    }

    pub(crate) fn unknown(id: i64) -> Self {
        Event {
            id,
            kind: EventKind::Unknown,
            chat_id: 0,
            owner: String::new(),
            text: String::new(),
        }
    }
}

#[async_trait]
pub(crate) trait EventSource: Send + Sync {
    /// Returns up to `limit` events with ids >= `offset`. May block for the
    /// source's long-poll timeout and may return nothing.
    async fn fetch(&self, offset: i64, limit: usize) -> Result<Vec<Event>>;
}

#[async_trait]
pub(crate) trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    Dispatched(usize),
    Empty,
    FetchFailed,
}

pub(crate) struct Consumer<S, H> {
    source: S,
    handler: H,
    batch_size: usize,
    offset: i64,
    idle_delay: Duration,
    retry_delay: Duration,
}

impl<S, H> Consumer<S, H>
where
    S: EventSource,
    H: EventHandler,
{
    pub(crate) fn new(source: S, handler: H, batch_size: usize) -> Self {
        Consumer {
            source,
            handler,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
            offset: 0,
            idle_delay: Duration::from_millis(DEFAULT_IDLE_DELAY_MS),
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }

    #[cfg(test)]
    pub(crate) fn starting_at(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub(crate) fn with_delays(mut self, idle_delay: Duration, retry_delay: Duration) -> Self {
        self.idle_delay = idle_delay;
        self.retry_delay = retry_delay;
        self
    }

    #[cfg(test)]
    pub(crate) fn offset(&self) -> i64 {
        self.offset
    }

    #[cfg(test)]
    pub(crate) fn source(&self) -> &S {
        &self.source
    }

    #[cfg(test)]
    pub(crate) fn handler(&self) -> &H {
        &self.handler
    }

    pub(crate) async fn start(&mut self) {
        loop {
            match self.poll_once().await {
                PollOutcome::Dispatched(count) => debug!("dispatched {} events", count),
                PollOutcome::Empty => tokio::time::sleep(self.idle_delay).await,
                PollOutcome::FetchFailed => tokio::time::sleep(self.retry_delay).await,
            }
        }
    }

    /// Fetches one batch, hands every event to the handler in id order and
    /// only then moves the offset past the highest id seen.
    pub(crate) async fn poll_once(&mut self) -> PollOutcome {
        let mut events = match self.source.fetch(self.offset, self.batch_size).await {
            Ok(events) => events,
            Err(err) => {
                error!("can't fetch events at offset {}: {:#}", self.offset, err);
                return PollOutcome::FetchFailed;
            }
        };

        if events.is_empty() {
            return PollOutcome::Empty;
        }

        events.sort_by_key(|event| event.id);

        let mut next_offset = self.offset;
        for event in &events {
            if let Err(err) = self.handler.handle(event).await {
                error!("can't handle event {}: {:#}", event.id, err);
            }
            next_offset = next_offset.max(event.id + 1);
        }
        self.offset = next_offset;

        PollOutcome::Dispatched(events.len())
    }
}
