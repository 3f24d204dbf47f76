pub use std::io::Write;

pub use anyhow::{anyhow, bail, Error, Result};
pub use log::{debug, error, info, trace, warn};
pub use tokio::sync::broadcast;

pub use crate::channels::Channels;
pub use crate::config::{self, Config, ConfigWrapper};
pub use crate::error::{DecodeError, ListenerError};
pub use crate::options::Options;
pub use crate::snapshot::{self, Snapshot};
pub use crate::snapshot_writer::SnapshotWriter;
pub use crate::solis;
