//! Lazy row streams.

use crate::lock::ReadGuard;
use crate::queue::{QueueReceiver, QueueSender, stream_queue};
use sqlmux_core::{Cx, Driver, Error, FormattedQuery, Outcome, Row};
use std::fmt;
use std::future::{Future, poll_fn};
use std::pin::Pin;
use std::task::{Context, Poll};

/// The producing side of a stream: waits for access if needed, runs the
/// statement into the queue, and hands back the read guard to hold until
/// the consumer has seen the terminal event.
type Producer<'a> = Pin<Box<dyn Future<Output = Option<ReadGuard<'a>>> + 'a>>;

/// Rows of one statement, pulled one at a time.
///
/// Nothing happens until the first poll. From then on the stream holds the
/// connection's read lock (when it was opened through `Database`) until the
/// end of rows or an error has been returned, or until it is dropped. A slow
/// consumer therefore holds up writers queued behind it.
///
/// ```rust,ignore
/// let mut rows = db.query_stream(&cx, Sql::new("SELECT * FROM users"));
/// while let Some(row) = rows.next().await? {
///     println!("{}", row.get_named::<String>("name")?);
/// }
/// ```
#[must_use = "streams do nothing unless polled"]
pub struct RowStream<'a> {
    receiver: QueueReceiver<Row>,
    producer: Option<Producer<'a>>,
    guard: Option<ReadGuard<'a>>,
}

impl<'a> RowStream<'a> {
    pub(crate) fn new(receiver: QueueReceiver<Row>, producer: Producer<'a>) -> Self {
        Self {
            receiver,
            producer: Some(producer),
            guard: None,
        }
    }

    /// A stream whose first and only event is `error`.
    pub(crate) fn failed(error: Error) -> Self {
        let (sender, receiver) = stream_queue();
        sender.fail(error);
        Self {
            receiver,
            producer: None,
            guard: None,
        }
    }

    /// Poll for the next row.
    ///
    /// `Ok(None)` marks the end of rows. After the end or an error has been
    /// returned, later polls return it again.
    pub fn poll_next(&mut self, cx: &mut Context<'_>) -> Poll<Result<Option<Row>, Error>> {
        if let Some(producer) = self.producer.as_mut() {
            if let Poll::Ready(guard) = producer.as_mut().poll(cx) {
                self.guard = guard;
                self.producer = None;
            }
        }

        match self.receiver.poll_pop(cx) {
            Poll::Ready(Ok(Some(row))) => Poll::Ready(Ok(Some(row))),
            Poll::Ready(terminal) => {
                self.producer = None;
                if self.guard.take().is_some() {
                    tracing::trace!("row stream released read lock");
                }
                Poll::Ready(terminal)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    /// Wait for the next row. See [`RowStream::poll_next`].
    pub async fn next(&mut self) -> Result<Option<Row>, Error> {
        poll_fn(|cx| self.poll_next(cx)).await
    }

    /// Drain the stream into a vector, stopping at the first error.
    pub async fn try_collect(mut self) -> Result<Vec<Row>, Error> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Rows received from the driver and not yet consumed.
    pub fn buffered(&self) -> usize {
        self.receiver.len()
    }

    /// Whether the stream still holds the connection's read lock.
    pub fn holds_lock(&self) -> bool {
        self.guard.is_some()
    }
}

impl fmt::Debug for RowStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowStream")
            .field("receiver", &self.receiver)
            .field("started", &self.producer.is_none())
            .field("holds_lock", &self.holds_lock())
            .finish()
    }
}

/// Run `query` on `driver`, feeding every row into `sender` and closing it
/// with the outcome.
pub(crate) async fn produce<D: Driver>(
    driver: &D,
    cx: &Cx,
    query: FormattedQuery,
    mut sender: QueueSender<Row>,
) {
    tracing::debug!(sql = %query.text, params = query.params.len(), "streaming query");
    match driver.run(cx, &query.text, &query.params, &mut sender).await {
        Outcome::Ok(_) => sender.finish(),
        Outcome::Err(e) => sender.fail(e),
        Outcome::Cancelled(_) => sender.fail(Error::Cancelled),
        Outcome::Panicked(_) => sender.fail(Error::Custom(
            "driver panicked while streaming rows".to_string(),
        )),
    }
}
