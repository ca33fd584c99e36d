use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{Stream, StreamExt};
use serde_json::Value;
use shared::protocol::{StreamEvent, StreamOutcome};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::{
    json_stream::{JsonStreamParser, PathSegment},
    pattern::Pattern,
};

/// Drives `source` through the incremental parser, calling `on_match` once
/// per (node, pattern) pair as soon as the node closes. Patterns are tried in
/// declaration order, so one node matching two patterns yields two calls.
///
/// Resolves when the source ends, fails, or `cancel` completes.
pub async fn consume<S, B, E, C, F>(
    source: S,
    patterns: &[Pattern],
    cancel: C,
    mut on_match: F,
) -> StreamOutcome
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: fmt::Display,
    C: Future<Output = ()>,
    F: FnMut(&Pattern, &Value),
{
    let mut parser = JsonStreamParser::new();
    let mut events = 0usize;
    let mut sink = |path: &[PathSegment], node: &Value| {
        for pattern in patterns {
            if pattern.matches(path, node) {
                events += 1;
                on_match(pattern, node);
            }
        }
    };

    tokio::pin!(source);
    tokio::pin!(cancel);
    loop {
        let next = tokio::select! {
            biased;
            () = &mut cancel => None,
            chunk = source.next() => Some(chunk),
        };
        let Some(chunk) = next else {
            drop(sink);
            return StreamOutcome::Cancelled { events };
        };
        match chunk {
            Some(Ok(bytes)) => {
                if let Err(err) = parser.feed(bytes.as_ref(), &mut sink) {
                    drop(sink);
                    return StreamOutcome::Interrupted {
                        events,
                        reason: err.to_string(),
                    };
                }
            }
            Some(Err(err)) => {
                drop(sink);
                return StreamOutcome::Interrupted {
                    events,
                    reason: format!("connection failed: {err}"),
                };
            }
            None => {
                let finished = parser.finish(&mut sink);
                drop(sink);
                return match finished {
                    Ok(()) => StreamOutcome::Completed { events },
                    Err(err) => StreamOutcome::Interrupted {
                        events,
                        reason: err.to_string(),
                    },
                };
            }
        }
    }
}

/// Resolves once `cancel` flips to `true`. If the sending side goes away
/// without cancelling, it never resolves.
pub(crate) async fn cancelled(mut cancel: watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Live view of an open stream.
///
/// Events are forwarded here after they have been dispatched. Dropping the
/// handle detaches from the stream without closing the connection.
pub struct StreamHandle {
    events: UnboundedReceiverStream<StreamEvent>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<StreamOutcome>,
}

impl StreamHandle {
    pub(crate) fn new(
        events: mpsc::UnboundedReceiver<StreamEvent>,
        cancel: watch::Sender<bool>,
        task: JoinHandle<StreamOutcome>,
    ) -> Self {
        Self {
            events: UnboundedReceiverStream::new(events),
            cancel,
            task,
        }
    }

    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.next().await
    }

    /// Closes the connection. The stream reports `Cancelled` unless it had
    /// already finished.
    pub fn cancel(&self) {
        debug!("stream: cancellation requested");
        self.cancel.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the stream to end and returns how it ended.
    pub async fn closed(self) -> StreamOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => StreamOutcome::Interrupted {
                events: 0,
                reason: format!("stream task failed: {err}"),
            },
        }
    }
}

impl Stream for StreamHandle {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("finished", &self.task.is_finished())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "tests/stream_tests.rs"]
mod tests;
