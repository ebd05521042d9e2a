//! Snapshot persistence for evolution runs.
//!
//! Uses bincode for binary serialization and LZ4 for compression, behind a
//! magic/version header. Writes go to a temp file first and are renamed
//! into place, so a crashed run never leaves a torn snapshot. The
//! [`SnapshotWriter`] runs on a background thread, observes only owned
//! snapshot values, and fails closed on IO errors: the write is logged and
//! the run continues.

use crate::evolve::Individual;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Magic bytes for file format identification.
const MAGIC: &[u8; 4] = b"CMBR";

/// Current format version.
const VERSION: u8 = 1;

/// A self-contained resume point: population, history and generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot<G, D> {
    /// Generation the snapshot was taken at.
    pub generation: usize,
    /// The evaluated population.
    pub popn: Vec<Individual<G>>,
    /// Distilled per-generation history.
    pub history: Vec<D>,
}

/// Save a snapshot with compression and an atomic rename.
///
/// # Errors
///
/// Returns an error if serialization or file IO fails.
pub fn save_snapshot<G, D>(snapshot: &Snapshot<G, D>, path: &Path) -> io::Result<()>
where
    G: Serialize,
    D: Serialize,
{
    let encoded = bincode::serialize(snapshot)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let compressed = lz4_flex::compress_prepend_size(&encoded);

    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(MAGIC)?;
        file.write_all(&[VERSION])?;
        file.write_all(&compressed)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

/// Load a snapshot.
///
/// # Errors
///
/// Returns an error if the file is missing, the magic or version is wrong,
/// or decompression/deserialization fails.
pub fn load_snapshot<G, D>(path: &Path) -> io::Result<Snapshot<G, D>>
where
    G: DeserializeOwned,
    D: DeserializeOwned,
{
    let mut file = fs::File::open(path)?;

    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "invalid file magic",
        ));
    }

    let mut version = [0u8; 1];
    file.read_exact(&mut version)?;
    if version[0] != VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported version: {}", version[0]),
        ));
    }

    let mut compressed = Vec::new();
    file.read_to_end(&mut compressed)?;
    let decompressed = lz4_flex::decompress_size_prepended(&compressed)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    bincode::deserialize(&decompressed).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Asynchronous snapshot writer with a minimum write interval.
///
/// Offered snapshots inside the interval are dropped; accepted ones are
/// written on a background thread. Dropping the writer closes the channel
/// and joins the thread, flushing any queued snapshot.
pub struct SnapshotWriter<G, D> {
    tx: Option<mpsc::Sender<Snapshot<G, D>>>,
    handle: Option<JoinHandle<()>>,
    interval: Duration,
    last: Option<Instant>,
}

impl<G, D> SnapshotWriter<G, D>
where
    G: Serialize + Send + 'static,
    D: Serialize + Send + 'static,
{
    /// Spawn the writer thread targeting `path`.
    #[must_use]
    pub fn spawn(path: PathBuf, interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel::<Snapshot<G, D>>();
        let handle = std::thread::spawn(move || {
            for snapshot in rx {
                if let Err(e) = save_snapshot(&snapshot, &path) {
                    eprintln!("warning: snapshot write failed: {e}");
                }
            }
        });
        SnapshotWriter {
            tx: Some(tx),
            handle: Some(handle),
            interval,
            last: None,
        }
    }

    /// Offer a snapshot; accepted when the interval has elapsed since the
    /// last accepted one (the first offer is always accepted).
    pub fn offer(&mut self, snapshot: Snapshot<G, D>) {
        if self.last.is_some_and(|t| t.elapsed() < self.interval) {
            return;
        }
        if let Some(tx) = &self.tx {
            if tx.send(snapshot).is_ok() {
                self.last = Some(Instant::now());
            }
        }
    }
}

impl<G, D> Drop for SnapshotWriter<G, D> {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
