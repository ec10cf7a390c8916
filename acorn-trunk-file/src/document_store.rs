use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;

use acorn_core::root::{Root, RootDescriptor};
use acorn_core::trunk::{BatchBuffer, BatchOptions, PendingWrite};
use acorn_core::{AcornResult, Nut, ShellCodec, Trunk, TrunkCapabilities};

use crate::validate_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogAction {
    /// `Save` is the legacy spelling still found in old logs.
    #[serde(alias = "Save")]
    Stash,
    #[serde(alias = "Delete")]
    Toss,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogRecord {
    #[serde(rename = "Action")]
    action: LogAction,
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Shell", default, skip_serializing_if = "Option::is_none")]
    shell: Option<String>,
    #[serde(rename = "Timestamp", with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
}

type HistoryMap<T> = HashMap<String, Arc<Mutex<Vec<Nut<T>>>>>;

/// Append-log document store: current state and per-id history in memory,
/// rebuilt on startup by replaying a newline-delimited JSON change log.
/// Log appends are buffered and fsynced by the shared batch machinery.
pub struct DocumentStoreTrunk<T> {
    io: ShellCodec<T>,
    current: RwLock<HashMap<String, Nut<T>>>,
    history: RwLock<HistoryMap<T>>,
    buffer: BatchBuffer,
    path: PathBuf,
}

impl<T> DocumentStoreTrunk<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    pub fn open(path: impl AsRef<Path>) -> AcornResult<Self> {
        DocumentStoreTrunk::open_with(path, ShellCodec::json(), BatchOptions::default())
    }

    pub fn open_with(
        path: impl AsRef<Path>,
        io: ShellCodec<T>,
        options: BatchOptions,
    ) -> AcornResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut current: HashMap<String, Nut<T>> = HashMap::new();
        let mut history: HashMap<String, Vec<Nut<T>>> = HashMap::new();
        if path.exists() {
            replay_log(&path, &io, &mut current, &mut history)?;
        }

        let log = Arc::new(Mutex::new(
            OpenOptions::new().create(true).append(true).open(&path)?,
        ));
        let buffer = BatchBuffer::start(options, move |writes| append_records(&log, writes));

        Ok(DocumentStoreTrunk {
            io,
            current: RwLock::new(current),
            history: RwLock::new(
                history
                    .into_iter()
                    .map(|(id, list)| (id, Arc::new(Mutex::new(list))))
                    .collect(),
            ),
            buffer,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn push_history(&self, id: &str, nut: Nut<T>) {
        let slot = {
            let history = self.history.read();
            history.get(id).cloned()
        };
        let slot = match slot {
            Some(slot) => slot,
            None => Arc::clone(
                self.history
                    .write()
                    .entry(id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(Vec::new()))),
            ),
        };
        slot.lock().push(nut);
    }

    fn append_log(&self, action: LogAction, id: &str, shell: Option<String>, nut: Option<&Nut<T>>) {
        let record = LogRecord {
            action,
            id: id.to_string(),
            shell,
            timestamp: OffsetDateTime::now_utc(),
        };
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(err) => {
                warn!(%id, %err, "change log record could not be serialized");
                return;
            }
        };
        self.buffer.push(PendingWrite {
            id: id.to_string(),
            bytes: Bytes::from(line.into_bytes()),
            timestamp: record.timestamp,
            version: nut.map(|n| n.version).unwrap_or(0),
            expires_at: nut.and_then(|n| n.expires_at),
        });
    }
}

fn append_records(log: &Arc<Mutex<File>>, writes: Vec<PendingWrite>) -> AcornResult<()> {
    let mut file = log.lock();
    for write in &writes {
        file.write_all(&write.bytes)?;
        file.write_all(b"\n")?;
    }
    file.sync_all()?;
    Ok(())
}

fn replay_log<T>(
    path: &Path,
    io: &ShellCodec<T>,
    current: &mut HashMap<String, Nut<T>>,
    history: &mut HashMap<String, Vec<Nut<T>>>,
) -> AcornResult<()>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    let content = std::fs::read_to_string(path)?;
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: LogRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(err) => {
                warn!(path = %path.display(), line_no, %err, "skipping malformed change log line");
                continue;
            }
        };
        match record.action {
            LogAction::Stash => {
                let Some(shell) = record.shell else {
                    warn!(path = %path.display(), line_no, "stash record without a shell, skipped");
                    continue;
                };
                let nut = match io.decode_text(&record.id, &shell) {
                    Ok(nut) => nut,
                    Err(err) => {
                        warn!(path = %path.display(), line_no, %err, "undecodable shell in change log, skipped");
                        continue;
                    }
                };
                if let Some(previous) = current.insert(record.id.clone(), nut) {
                    history.entry(record.id).or_default().push(previous);
                }
            }
            LogAction::Toss => {
                if let Some(previous) = current.remove(&record.id) {
                    history.entry(record.id).or_default().push(previous);
                }
            }
        }
    }
    Ok(())
}

impl<T> Trunk<T> for DocumentStoreTrunk<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    fn stash(&self, id: &str, nut: &Nut<T>) -> AcornResult<()> {
        validate_id(id)?;
        // Encoding runs the root pipeline, so a policy denial aborts before
        // any state changes.
        let shell = self.io.encode_text(nut)?;

        let previous = self.current.write().insert(id.to_string(), nut.clone());
        if let Some(previous) = previous {
            self.push_history(id, previous);
        }
        self.append_log(LogAction::Stash, id, Some(shell), Some(nut));
        Ok(())
    }

    fn crack(&self, id: &str) -> AcornResult<Option<Nut<T>>> {
        Ok(self
            .current
            .read()
            .get(id)
            .filter(|nut| !nut.is_expired())
            .cloned())
    }

    fn toss(&self, id: &str) -> AcornResult<()> {
        validate_id(id)?;
        if let Some(previous) = self.current.write().remove(id) {
            self.push_history(id, previous);
        }
        self.append_log(LogAction::Toss, id, None, None);
        Ok(())
    }

    fn crack_all(&self) -> AcornResult<Vec<Nut<T>>> {
        Ok(self
            .current
            .read()
            .values()
            .filter(|nut| !nut.is_expired())
            .cloned()
            .collect())
    }

    fn get_history(&self, id: &str) -> AcornResult<Vec<Nut<T>>> {
        let slot = self.history.read().get(id).cloned();
        Ok(slot.map(|slot| slot.lock().clone()).unwrap_or_default())
    }

    fn roots(&self) -> Vec<RootDescriptor> {
        self.io.roots()
    }

    fn add_root(&self, root: Arc<dyn Root>) {
        self.io.add_root(root);
    }

    fn remove_root(&self, name: &str) -> bool {
        self.io.remove_root(name)
    }

    fn flush(&self) -> AcornResult<()> {
        self.buffer.flush();
        Ok(())
    }

    fn capabilities(&self) -> TrunkCapabilities {
        let mut caps = TrunkCapabilities::durable("document-store");
        caps.supports_history = true;
        caps
    }

    fn dispose(&self) {
        self.buffer.dispose();
    }
}

impl<T> Drop for DocumentStoreTrunk<T> {
    fn drop(&mut self) {
        self.buffer.dispose();
    }
}
