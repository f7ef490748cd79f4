//! Single-producer, multi-consumer value stream with one terminal value.
//!
//! The sender appends partial values with [`ValueSender::send`] and finishes
//! with [`ValueSender::close`], which consumes it, so nothing can be sent after
//! the final value. Every reader, including one created after values were
//! sent, observes the full ordered sequence: the initial value, each partial,
//! then exactly one final value.

use futures::stream::Stream;
use tokio::sync::watch;

#[derive(Debug)]
struct Log<T> {
    values: Vec<T>,
    closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem<T> {
    Partial(T),
    Final(T),
}

impl<T> StreamItem<T> {
    pub fn value(&self) -> &T {
        match self {
            StreamItem::Partial(v) | StreamItem::Final(v) => v,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, StreamItem::Final(_))
    }
}

pub struct ValueSender<T> {
    tx: watch::Sender<Log<T>>,
}

#[derive(Clone)]
pub struct ValueReader<T> {
    rx: watch::Receiver<Log<T>>,
}

/// Open a channel whose first observable value is `initial`.
pub fn channel<T>(initial: T) -> (ValueSender<T>, ValueReader<T>)
where
    T: Clone + Send + Sync + 'static,
{
    let (tx, rx) = watch::channel(Log {
        values: vec![initial],
        closed: false,
    });
    (ValueSender { tx }, ValueReader { rx })
}

impl<T> ValueSender<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn send(&self, value: T) {
        self.tx.send_modify(|log| log.values.push(value));
    }

    pub fn close(self, value: T) {
        self.tx.send_modify(|log| {
            log.values.push(value);
            log.closed = true;
        });
    }

    pub fn subscribe(&self) -> ValueReader<T> {
        ValueReader {
            rx: self.tx.subscribe(),
        }
    }
}

impl<T> ValueReader<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Everything observed so far, initial value first.
    pub fn snapshot(&self) -> Vec<T> {
        self.rx.borrow().values.clone()
    }

    /// The most recent value.
    pub fn current(&self) -> T {
        let log = self.rx.borrow();
        log.values[log.values.len() - 1].clone()
    }

    pub fn is_closed(&self) -> bool {
        self.rx.borrow().closed
    }

    /// Wait for the terminal value. `None` if the sender went away without
    /// closing the channel.
    pub async fn final_value(mut self) -> Option<T> {
        loop {
            {
                let log = self.rx.borrow_and_update();
                if log.closed {
                    return log.values.last().cloned();
                }
            }
            if self.rx.changed().await.is_err() {
                return None;
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = StreamItem<T>> + Send + 'static {
        let mut rx = self.rx;
        async_stream::stream! {
            let mut cursor = 0usize;
            loop {
                let (batch, closed) = {
                    let log = rx.borrow_and_update();
                    (log.values[cursor..].to_vec(), log.closed)
                };
                cursor += batch.len();
                let last = batch.len();
                for (i, value) in batch.into_iter().enumerate() {
                    if closed && i + 1 == last {
                        yield StreamItem::Final(value);
                    } else {
                        yield StreamItem::Partial(value);
                    }
                }
                if closed {
                    break;
                }
                // Err means the sender was dropped and every change has been seen.
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_reader_sees_initial_partials_then_final() {
        let (tx, rx) = channel(String::new());
        tx.send("Ana".to_string());
        tx.send("Analysis".to_string());
        tx.close("Analysis complete.".to_string());

        let items: Vec<_> = rx.into_stream().collect().await;
        assert_eq!(
            items,
            vec![
                StreamItem::Partial(String::new()),
                StreamItem::Partial("Ana".to_string()),
                StreamItem::Partial("Analysis".to_string()),
                StreamItem::Final("Analysis complete.".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_exactly_one_final_value() {
        let (tx, rx) = channel(0u32);
        tx.send(1);
        tx.close(2);
        let finals = rx.into_stream().filter(|i| futures::future::ready(i.is_final())).count().await;
        assert_eq!(finals, 1);
    }

    #[tokio::test]
    async fn test_late_reader_replays_history() {
        let (tx, _early) = channel(true);
        tx.send(true);
        let late = tx.subscribe();
        tx.close(false);
        assert_eq!(late.snapshot(), vec![true, true, false]);
        assert!(late.is_closed());
        assert_eq!(late.final_value().await, Some(false));
    }

    #[tokio::test]
    async fn test_concurrent_reader_receives_values_sent_later() {
        let (tx, rx) = channel(0u32);
        let reader = tokio::spawn(async move { rx.into_stream().collect::<Vec<_>>().await });

        for n in 1..=3 {
            tx.send(n);
            tokio::task::yield_now().await;
        }
        tx.close(99);

        let items = reader.await.unwrap();
        let values: Vec<u32> = items.iter().map(|i| *i.value()).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 99]);
        assert!(items.last().unwrap().is_final());
    }

    #[tokio::test]
    async fn test_dropped_sender_ends_without_final() {
        let (tx, rx) = channel("start".to_string());
        tx.send("partial".to_string());
        drop(tx);

        let stream_reader = rx.clone();
        assert_eq!(rx.final_value().await, None);
        let items: Vec<_> = stream_reader.into_stream().collect().await;
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| !i.is_final()));
    }

    #[test]
    fn test_current_tracks_latest_value() {
        let (tx, rx) = channel(1);
        assert_eq!(rx.current(), 1);
        tx.send(5);
        assert_eq!(rx.current(), 5);
        assert!(!rx.is_closed());
    }
}
