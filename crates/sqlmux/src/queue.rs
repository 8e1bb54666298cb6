//! Push-to-pull bridge for driver row callbacks.
//!
//! A driver delivers rows by calling a sink; consumers want to pull them one
//! at a time. [`stream_queue`] connects the two with an unbounded FIFO and a
//! single terminal event (end of rows or an error).
//!
//! The sender is consumed by [`QueueSender::finish`] and [`QueueSender::fail`],
//! so nothing can be pushed after the terminal event. Dropping the sender
//! without either closes the queue with an error.

use sqlmux_core::{Error, Row, RowSink};
use std::collections::VecDeque;
use std::fmt;
use std::future::poll_fn;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

struct Shared<T> {
    items: VecDeque<T>,
    /// `Ok(())` for a clean end, `Err` for a failure.
    terminal: Option<Result<(), Error>>,
    consumer: Option<Waker>,
    receiver_alive: bool,
}

fn lock<T>(shared: &Mutex<Shared<T>>) -> MutexGuard<'_, Shared<T>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create a connected sender/receiver pair.
pub fn stream_queue<T>() -> (QueueSender<T>, QueueReceiver<T>) {
    let shared = Arc::new(Mutex::new(Shared {
        items: VecDeque::new(),
        terminal: None,
        consumer: None,
        receiver_alive: true,
    }));
    (
        QueueSender {
            shared: Arc::clone(&shared),
        },
        QueueReceiver { shared },
    )
}

/// Producer half.
pub struct QueueSender<T> {
    shared: Arc<Mutex<Shared<T>>>,
}

impl<T> QueueSender<T> {
    /// Append an item and wake the consumer. Never blocks.
    pub fn push(&self, item: T) {
        let waker = {
            let mut shared = lock(&self.shared);
            if !shared.receiver_alive {
                return;
            }
            shared.items.push_back(item);
            shared.consumer.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// End the stream cleanly.
    pub fn finish(self) {
        self.terminate(Ok(()));
    }

    /// End the stream with an error.
    pub fn fail(self, error: Error) {
        self.terminate(Err(error));
    }

    fn terminate(&self, terminal: Result<(), Error>) {
        let waker = {
            let mut shared = lock(&self.shared);
            if shared.terminal.is_some() {
                return;
            }
            shared.terminal = Some(terminal);
            shared.consumer.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T> Drop for QueueSender<T> {
    fn drop(&mut self) {
        self.terminate(Err(Error::Custom(
            "row producer went away before finishing".to_string(),
        )));
    }
}

impl<T> fmt::Debug for QueueSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueSender").finish_non_exhaustive()
    }
}

impl RowSink for QueueSender<Row> {
    fn row(&mut self, row: Row) {
        self.push(row);
    }
}

/// Consumer half.
pub struct QueueReceiver<T> {
    shared: Arc<Mutex<Shared<T>>>,
}

impl<T> QueueReceiver<T> {
    /// Poll for the next event.
    ///
    /// `Ok(Some(item))` is the next item, `Ok(None)` the end of the stream
    /// and `Err` a failure. Once a terminal event has been returned, every
    /// later call returns it again.
    pub fn poll_pop(&self, cx: &mut Context<'_>) -> Poll<Result<Option<T>, Error>> {
        let mut shared = lock(&self.shared);
        if let Some(item) = shared.items.pop_front() {
            return Poll::Ready(Ok(Some(item)));
        }
        if let Some(terminal) = &shared.terminal {
            return Poll::Ready(terminal.clone().map(|()| None));
        }
        shared.consumer = Some(cx.waker().clone());
        Poll::Pending
    }

    /// Wait for the next event. See [`QueueReceiver::poll_pop`].
    pub async fn pop(&self) -> Result<Option<T>, Error> {
        poll_fn(|cx| self.poll_pop(cx)).await
    }

    /// Items buffered and not yet popped.
    pub fn len(&self) -> usize {
        lock(&self.shared).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the producer has ended the stream (items may still be buffered).
    pub fn is_terminated(&self) -> bool {
        lock(&self.shared).terminal.is_some()
    }
}

impl<T> Drop for QueueReceiver<T> {
    fn drop(&mut self) {
        let mut shared = lock(&self.shared);
        shared.receiver_alive = false;
        shared.items.clear();
    }
}

impl<T> fmt::Debug for QueueReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueReceiver")
            .field("buffered", &self.len())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
