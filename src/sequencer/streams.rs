use crate::runtime::StreamHandle;
use futures::future::join_all;
use tracing::{debug, warn};

/// Wait-set of concurrently running attach or log streams
#[derive(Default)]
pub struct StreamSet {
    streams: Vec<StreamHandle>,
}

impl StreamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stream: StreamHandle) {
        debug!("Tracking stream for {}", stream.name());
        self.streams.push(stream);
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn cancel_all(&self) {
        for stream in &self.streams {
            stream.cancel();
        }
    }

    /// Block until every stream has ended, returning how many ended in error
    pub async fn wait_all(self) -> usize {
        let waits = self.streams.into_iter().map(|stream| async move {
            let name = stream.name().to_string();
            (name, stream.wait().await)
        });

        let mut failed = 0;
        for (name, result) in join_all(waits).await {
            match result {
                Ok(()) => debug!("Stream for {} ended", name),
                Err(e) => {
                    warn!("Stream for {} ended with error: {}", name, e);
                    failed += 1;
                }
            }
        }
        failed
    }
}
