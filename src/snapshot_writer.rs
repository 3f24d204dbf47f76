use crate::prelude::*;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Appends each published snapshot to a file as one JSON line.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    file: Arc<Mutex<std::fs::File>>,
    path: String,
    snapshots_written: Arc<Mutex<u64>>,
}

impl SnapshotWriter {
    pub fn new(path: &str) -> Result<Self> {
        info!("Opening snapshot file at {}", path);

        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => f,
            Err(e) => {
                error!("Failed to open snapshot file {}: {}", path, e);
                return Err(e.into());
            }
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)) {
                error!("Failed to set permissions on snapshot file {}: {}", path, e);
                return Err(e.into());
            }
        }

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path: path.to_string(),
            snapshots_written: Arc::new(Mutex::new(0)),
        })
    }

    pub fn append(&self, snapshot: &Snapshot) -> Result<()> {
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

        let mut json_data = serde_json::Map::new();
        json_data.insert(
            "utc_timestamp".to_string(),
            serde_json::Value::Number(timestamp.into()),
        );
        json_data.insert("fields".to_string(), serde_json::to_value(snapshot)?);

        let json_string = serde_json::to_string(&serde_json::Value::Object(json_data))?;

        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("Failed to lock snapshot file"))?;
        match writeln!(file, "{}", json_string) {
            Ok(_) => {
                if let Err(e) = file.flush() {
                    error!("Failed to flush snapshot file {}: {}", self.path, e);
                    return Err(e.into());
                }

                let mut written = self
                    .snapshots_written
                    .lock()
                    .map_err(|_| anyhow!("Failed to lock snapshot counter"))?;
                *written += 1;
                debug!("Total snapshots stored in {}: {}", self.path, *written);

                Ok(())
            }
            Err(e) => {
                error!("Failed to write to snapshot file {}: {}", self.path, e);
                Err(e.into())
            }
        }
    }
}
