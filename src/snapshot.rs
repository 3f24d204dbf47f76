use crate::prelude::*;
use crate::solis::listener::ChannelData;

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// The full set of field values decoded from one telemetry frame.
///
/// Consumers receive it whole: each successful decode replaces the previous
/// snapshot entirely, never merges into it.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Snapshot {
    values: HashMap<String, f64>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.values.iter()
    }
}

/// Holds the latest published snapshot for downstream consumers.
///
/// Sessions publish through the from_listener channel; the store replaces its
/// value under one mutex guard, so concurrent publishers race to last-write-
/// wins but a reader never observes a torn snapshot.
#[derive(Clone)]
pub struct SnapshotStore {
    channels: Channels,
    latest: Arc<Mutex<Option<Snapshot>>>,
    writer: Option<Arc<SnapshotWriter>>,
}

impl SnapshotStore {
    pub fn new(channels: Channels, writer: Option<Arc<SnapshotWriter>>) -> Self {
        Self {
            channels,
            latest: Arc::new(Mutex::new(None)),
            writer,
        }
    }

    /// A full clone of the most recent snapshot, if any frame has decoded yet.
    pub fn latest(&self) -> Option<Snapshot> {
        self.latest.lock().unwrap().clone()
    }

    pub async fn start(&self) -> Result<()> {
        let mut receiver = self.channels.from_listener.subscribe();

        loop {
            match receiver.recv().await {
                Ok(ChannelData::Snapshot(snapshot)) => {
                    debug!("Replacing latest snapshot: {:?}", snapshot);
                    if let Ok(mut latest) = self.latest.lock() {
                        *latest = Some(snapshot.clone());
                    }

                    if let Some(writer) = &self.writer {
                        if let Err(e) = writer.append(&snapshot) {
                            error!("Failed to append snapshot to file: {}", e);
                        }
                    }
                }
                Ok(ChannelData::Shutdown) => break,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Snapshot store lagged, skipped {} messages", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        info!("Snapshot store exiting");
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.from_listener.send(ChannelData::Shutdown);
    }
}
