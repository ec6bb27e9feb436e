// Shared helpers for vantage-core integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use vantage_api::{Connect, Error, Transport, TransportSender};

/// Connector that fails a fixed number of times, then opens in-memory
/// transports for every further attempt.
#[derive(Default)]
pub struct FlakyConnector {
    failures: Mutex<VecDeque<()>>,
    calls: Mutex<Vec<String>>,
    opened: Mutex<Vec<TransportSender>>,
}

impl FlakyConnector {
    pub fn reliable() -> Arc<Self> {
        Self::failing(0)
    }

    pub fn failing(times: usize) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(std::iter::repeat_n((), times).collect()),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn sender(&self, n: usize) -> TransportSender {
        self.opened.lock().unwrap()[n].clone()
    }
}

impl Connect for FlakyConnector {
    fn connect(&self, stream: &str) -> BoxFuture<'static, Result<Transport, Error>> {
        self.calls.lock().unwrap().push(stream.to_owned());
        let result = if self.failures.lock().unwrap().pop_front().is_some() {
            Err(Error::WebSocketConnect("connection refused".into()))
        } else {
            let (tx, transport) = Transport::pair();
            self.opened.lock().unwrap().push(tx);
            Ok(transport)
        };
        Box::pin(async move { result })
    }
}

/// Let spawned tasks run without crossing any pending timer.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
