use crate::api::stream::StreamParser;
use crate::api::{ByteStream, RunBackend};
use crate::error::{Result, RunError};
use crate::types::RunEvent;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What a subscription hands to its callback, in arrival order.
#[derive(Debug)]
pub enum StreamUpdate {
    Event(RunEvent),
    /// The feed broke. Nothing further is delivered on this connection.
    Error(RunError),
    /// The server closed the feed.
    Ended,
}

struct Subscription {
    run_id: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns at most one push-event subscription.
///
/// Events are not replayed across connections; after a disconnect the
/// caller rehydrates the run before subscribing again.
pub struct EventStreamClient {
    backend: Arc<dyn RunBackend>,
    active: Option<Subscription>,
}

impl EventStreamClient {
    pub fn new(backend: Arc<dyn RunBackend>) -> Self {
        Self {
            backend,
            active: None,
        }
    }

    /// Run id of the current subscription, including one whose feed has
    /// already ended but has not been disconnected.
    pub fn active_run_id(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.run_id.as_str())
    }

    pub fn is_connected(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }

    pub async fn connect<F>(&mut self, run_id: &str, on_event: F) -> Result<()>
    where
        F: FnMut(StreamUpdate) + Send + 'static,
    {
        self.connect_after(run_id, None, on_event).await
    }

    /// Opens the feed for `run_id`, asking the server to skip events up to
    /// and including `after_sequence` when given.
    pub async fn connect_after<F>(
        &mut self,
        run_id: &str,
        after_sequence: Option<u64>,
        on_event: F,
    ) -> Result<()>
    where
        F: FnMut(StreamUpdate) + Send + 'static,
    {
        if let Some(active) = &self.active {
            return Err(RunError::AlreadySubscribed {
                run_id: active.run_id.clone(),
            });
        }

        let stream = self
            .backend
            .open_event_stream(run_id, after_sequence)
            .await?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(pump_events(
            run_id.to_string(),
            stream,
            cancel.clone(),
            on_event,
        ));
        tracing::info!(run_id, ?after_sequence, "subscribed to run events");

        self.active = Some(Subscription {
            run_id: run_id.to_string(),
            cancel,
            task,
        });
        Ok(())
    }

    /// Cancels the reader and waits for it to exit. No callback runs after
    /// this returns.
    pub async fn disconnect(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.cancel.cancel();
        if let Err(error) = active.task.await {
            if error.is_panic() {
                tracing::error!(run_id = %active.run_id, %error, "event reader panicked");
            }
        }
        tracing::info!(run_id = %active.run_id, "unsubscribed from run events");
    }
}

impl Drop for EventStreamClient {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.cancel.cancel();
        }
    }
}

async fn pump_events<F>(
    run_id: String,
    mut stream: ByteStream,
    cancel: CancellationToken,
    mut on_event: F,
) where
    F: FnMut(StreamUpdate) + Send + 'static,
{
    let mut parser = StreamParser::new();
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                for event in parser.process(&chunk) {
                    if cancel.is_cancelled() {
                        return;
                    }
                    on_event(StreamUpdate::Event(event));
                }
            }
            Some(Err(error)) => {
                tracing::warn!(run_id = %run_id, %error, "run event feed failed");
                on_event(StreamUpdate::Error(error));
                return;
            }
            None => {
                let leftover = parser.flush();
                if !leftover.trim().is_empty() {
                    tracing::debug!(run_id = %run_id, leftover = %leftover, "feed closed mid-frame");
                }
                tracing::debug!(run_id = %run_id, "run event feed ended");
                on_event(StreamUpdate::Ended);
                return;
            }
        }
    }
}
