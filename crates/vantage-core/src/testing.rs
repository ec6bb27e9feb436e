// In-memory connector for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use vantage_api::{Connect, Error, Transport, TransportSender};

use crate::lock;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Step {
    Fail,
    Open,
}

/// Plays back a script of connect outcomes; once exhausted every
/// further connect opens.
#[derive(Default)]
pub(crate) struct ScriptedConnector {
    script: Mutex<VecDeque<Step>>,
    opened: Mutex<Vec<TransportSender>>,
    streams: Mutex<Vec<String>>,
}

impl ScriptedConnector {
    pub(crate) fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        })
    }

    pub(crate) fn calls(&self) -> usize {
        lock(&self.streams).len()
    }

    pub(crate) fn streams(&self) -> Vec<String> {
        lock(&self.streams).clone()
    }

    /// Sender for the `n`th successfully opened transport.
    pub(crate) fn sender(&self, n: usize) -> Option<TransportSender> {
        lock(&self.opened).get(n).cloned()
    }
}

impl Connect for ScriptedConnector {
    fn connect(&self, stream: &str) -> BoxFuture<'static, Result<Transport, Error>> {
        lock(&self.streams).push(stream.to_owned());
        let step = lock(&self.script).pop_front().unwrap_or(Step::Open);
        let result = match step {
            Step::Fail => Err(Error::WebSocketConnect(format!("{stream}: refused"))),
            Step::Open => {
                let (tx, transport) = Transport::pair();
                lock(&self.opened).push(tx);
                Ok(transport)
            }
        };
        Box::pin(async move { result })
    }
}
