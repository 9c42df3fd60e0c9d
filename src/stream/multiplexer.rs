//! Topic to stream routing.
//!
//! One primary stream carries control traffic and any publish that does not
//! ask for its own stream. Dedicated streams are bound to exactly one topic
//! for the lifetime of the connection, so a receiver can rely on stream
//! identity for per-topic ordering.

use std::collections::HashMap;

use crate::core::StreamId;

/// Routing table for one connection.
#[derive(Debug, Clone)]
pub struct StreamMultiplexer {
    primary: StreamId,
    by_topic: HashMap<String, StreamId>,
    by_stream: HashMap<StreamId, String>,
}

impl StreamMultiplexer {
    /// Create a table around the primary stream opened at connect time.
    pub fn new(primary: StreamId) -> Self {
        Self {
            primary,
            by_topic: HashMap::new(),
            by_stream: HashMap::new(),
        }
    }

    /// The control stream.
    pub fn primary_stream(&self) -> StreamId {
        self.primary
    }

    /// Dedicated stream already bound to `topic`, if any.
    pub fn lookup(&self, topic: &str) -> Option<StreamId> {
        self.by_topic.get(topic).copied()
    }

    /// Stream a publish on `topic` should use.
    ///
    /// With `dedicated == false` this is always the primary stream. Otherwise
    /// the existing binding is returned, or `open` is awaited once to obtain a
    /// new stream which is then bound to `topic`. An error from `open` leaves
    /// the table unchanged.
    pub async fn stream_for_topic<F, Fut, E>(
        &mut self,
        topic: &str,
        dedicated: bool,
        open: F,
    ) -> Result<StreamId, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<StreamId, E>>,
    {
        if !dedicated {
            return Ok(self.primary);
        }
        if let Some(id) = self.lookup(topic) {
            return Ok(id);
        }

        let id = open().await?;
        self.bind(topic, id);
        Ok(id)
    }

    /// Record that `stream` now carries `topic`.
    ///
    /// # Panics
    ///
    /// In debug builds, if the topic is already bound or the stream is the
    /// primary stream or already carries another topic.
    pub fn bind(&mut self, topic: &str, stream: StreamId) {
        debug_assert!(!self.by_topic.contains_key(topic), "topic {topic} already bound");
        debug_assert_ne!(stream, self.primary, "primary stream cannot be dedicated");
        debug_assert!(!self.by_stream.contains_key(&stream), "stream {stream} already bound");

        self.by_topic.insert(topic.to_owned(), stream);
        self.by_stream.insert(stream, topic.to_owned());
    }

    /// Topic bound to a dedicated stream; `None` for the primary stream.
    pub fn topic_for_stream(&self, stream: StreamId) -> Option<&str> {
        self.by_stream.get(&stream).map(String::as_str)
    }

    /// Number of dedicated streams.
    pub fn dedicated_count(&self) -> usize {
        self.by_topic.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::future::ready;

    #[tokio::test]
    async fn test_dedicated_stream_is_stable() {
        let mut mux = StreamMultiplexer::new(0);
        let mut next = 4u64;
        let mut opened = 0;

        let mut ids = Vec::new();
        for topic in ["temp", "temp", "humidity"] {
            let id = mux
                .stream_for_topic(topic, true, || {
                    opened += 1;
                    let id = next;
                    next += 4;
                    ready(Ok::<_, Infallible>(id))
                })
                .await
                .unwrap();
            ids.push(id);
        }

        assert_eq!(ids[0], 4);
        assert_eq!(ids[0], ids[1]);
        assert_ne!(ids[2], ids[0]);
        assert_eq!(opened, 2);
        assert_eq!(mux.dedicated_count(), 2);
    }

    #[tokio::test]
    async fn test_non_dedicated_uses_primary() {
        let mut mux = StreamMultiplexer::new(0);
        mux.stream_for_topic("temp", true, || ready(Ok::<_, Infallible>(8)))
            .await
            .unwrap();

        let id = mux
            .stream_for_topic("temp", false, || ready(Err("opened a stream")))
            .await
            .unwrap();
        assert_eq!(id, mux.primary_stream());
        assert_eq!(mux.lookup("temp"), Some(8));
    }

    #[tokio::test]
    async fn test_open_failure_leaves_table_unchanged() {
        let mut mux = StreamMultiplexer::new(0);
        let result = mux
            .stream_for_topic("temp", true, || ready(Err("stream limit")))
            .await;
        assert_eq!(result, Err("stream limit"));
        assert_eq!(mux.lookup("temp"), None);

        let id = mux
            .stream_for_topic("temp", true, || ready(Ok::<_, &str>(12)))
            .await
            .unwrap();
        assert_eq!(id, 12);
    }

    #[test]
    fn test_reverse_lookup() {
        let mut mux = StreamMultiplexer::new(0);
        mux.bind("device/d1/telemetry/temp", 4);

        assert_eq!(mux.topic_for_stream(4), Some("device/d1/telemetry/temp"));
        assert_eq!(mux.topic_for_stream(0), None);
    }
}
