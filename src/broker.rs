use tokio::sync::broadcast;

pub const BROADCAST_CAPACITY: usize = 256;

/// Which of the worker's streams a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// One trimmed, non-empty line of worker output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: StreamKind,
    pub text: String,
}

impl OutputLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self { stream: StreamKind::Stdout, text: text.into() }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self { stream: StreamKind::Stderr, text: text.into() }
    }
}

/// Fan-out of worker output lines to all currently attached subscribers.
///
/// Delivery is broadcast, not queue-per-subscriber: a published line goes to
/// every receiver attached at that moment, and receivers attaching later
/// never see it. Per-stream emission order is preserved.
#[derive(Clone)]
pub struct Broker {
    tx: broadcast::Sender<OutputLine>,
}

impl Broker {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, line: OutputLine) {
        // Ignore error - means no receivers
        let _ = self.tx.send(line);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutputLine> {
        self.tx.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<OutputLine> {
        self.tx.clone()
    }

    /// Number of currently attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let broker = Broker::new();
        broker.publish(OutputLine::stdout("hello"));
    }

    #[tokio::test]
    async fn single_subscriber_receives() {
        let broker = Broker::new();
        let mut rx = broker.subscribe();

        broker.publish(OutputLine::stdout("hello"));

        let line = rx.recv().await.expect("should receive line");
        assert_eq!(line, OutputLine::stdout("hello"));
    }

    #[tokio::test]
    async fn two_subscribers_receive_lines_in_emission_order() {
        let broker = Broker::new();
        let mut rx1 = broker.subscribe();
        let mut rx2 = broker.subscribe();

        broker.publish(OutputLine::stdout("first"));
        broker.publish(OutputLine::stderr("second"));

        for rx in [&mut rx1, &mut rx2] {
            assert_eq!(rx.recv().await.unwrap().text, "first");
            let second = rx.recv().await.unwrap();
            assert_eq!(second.text, "second");
            assert_eq!(second.stream, StreamKind::Stderr);
        }
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_lines() {
        let broker = Broker::new();
        broker.publish(OutputLine::stdout("gone"));

        let mut rx = broker.subscribe();
        broker.publish(OutputLine::stdout("seen"));

        assert_eq!(rx.recv().await.unwrap().text, "seen");
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn subscriber_count_tracks_receivers() {
        let broker = Broker::new();
        assert_eq!(broker.subscriber_count(), 0);
        let rx = broker.subscribe();
        assert_eq!(broker.subscriber_count(), 1);
        drop(rx);
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn clone_shares_channel() {
        let broker1 = Broker::new();
        let broker2 = broker1.clone();
        let mut rx = broker1.subscribe();

        broker2.publish(OutputLine::stdout("from clone"));
        assert_eq!(rx.recv().await.unwrap().text, "from clone");
    }
}
