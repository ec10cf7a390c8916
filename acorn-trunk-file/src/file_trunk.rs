use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use acorn_core::root::{Root, RootDescriptor};
use acorn_core::{AcornError, AcornResult, Nut, ShellCodec, Trunk, TrunkCapabilities};

use crate::validate_id;

/// One shell file per document in a per-type directory. Writes are
/// whole-file replaces: temp file, fsync, atomic rename.
pub struct FileTrunk<T> {
    dir: PathBuf,
    io: ShellCodec<T>,
}

impl<T> FileTrunk<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn open(dir: impl AsRef<Path>) -> AcornResult<Self> {
        FileTrunk::open_with_shell(dir, ShellCodec::json())
    }

    pub fn open_with_shell(dir: impl AsRef<Path>, io: ShellCodec<T>) -> AcornResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(FileTrunk { dir, io })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn shell_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn decode_slot(&self, id: &str, slot: &str) -> AcornResult<Option<Nut<T>>> {
        match self.io.decode_text(id, slot) {
            Ok(nut) if nut.is_expired() => Ok(None),
            Ok(nut) => Ok(Some(nut)),
            Err(AcornError::Deserialization(message)) => {
                warn!(%id, %message, "undecodable shell file treated as absent");
                Ok(None)
            }
            Err(AcornError::MissingKey(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl<T> Trunk<T> for FileTrunk<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn stash(&self, id: &str, nut: &Nut<T>) -> AcornResult<()> {
        validate_id(id)?;
        let slot = self.io.encode_text(nut)?;

        let tmp_path = self.dir.join(format!(".{id}.json.tmp"));
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(slot.as_bytes())?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, self.shell_path(id))?;
        Ok(())
    }

    fn crack(&self, id: &str) -> AcornResult<Option<Nut<T>>> {
        validate_id(id)?;
        match fs::read_to_string(self.shell_path(id)) {
            Ok(slot) => self.decode_slot(id, &slot),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn toss(&self, id: &str) -> AcornResult<()> {
        validate_id(id)?;
        match fs::remove_file(self.shell_path(id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn crack_all(&self) -> AcornResult<Vec<Nut<T>>> {
        let mut nuts = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(id) = name.strip_suffix(".json") else {
                continue;
            };
            if id.starts_with('.') {
                continue;
            }
            let slot = fs::read_to_string(&path)?;
            if let Some(nut) = self.decode_slot(id, &slot)? {
                nuts.push(nut);
            }
        }
        Ok(nuts)
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

    fn capabilities(&self) -> TrunkCapabilities {
        TrunkCapabilities::durable("file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acorn_core::root::CompressionRoot;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Acorn {
        name: String,
    }

    fn nut(id: &str, name: &str) -> Nut<Acorn> {
        Nut::new(id, Acorn { name: name.into() }).unwrap()
    }

    #[test]
    fn shells_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let trunk = FileTrunk::open(dir.path()).unwrap();
            trunk.stash("a", &nut("a", "alice")).unwrap();
        }
        let reopened: FileTrunk<Acorn> = FileTrunk::open(dir.path()).unwrap();
        assert_eq!(reopened.crack("a").unwrap().unwrap().payload.name, "alice");
        assert_eq!(reopened.crack_all().unwrap().len(), 1);
    }

    #[test]
    fn stash_replaces_the_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let trunk = FileTrunk::open(dir.path()).unwrap();
        trunk.stash("a", &nut("a", "alice")).unwrap();
        trunk.stash("a", &nut("a", "bob")).unwrap();
        assert_eq!(trunk.crack("a").unwrap().unwrap().payload.name, "bob");
        assert_eq!(trunk.crack_all().unwrap().len(), 1);
    }

    #[test]
    fn rooted_shells_are_base64_on_disk_but_crack_clean() {
        let dir = tempfile::tempdir().unwrap();
        let trunk = FileTrunk::open(dir.path()).unwrap();
        trunk.add_root(Arc::new(CompressionRoot::gzip()));
        trunk.stash("a", &nut("a", "alice")).unwrap();

        let raw = std::fs::read_to_string(dir.path().join("a.json")).unwrap();
        assert!(!raw.contains("alice"));
        assert_eq!(trunk.crack("a").unwrap().unwrap().payload.name, "alice");
    }

    #[test]
    fn corrupted_shell_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let trunk: FileTrunk<Acorn> = FileTrunk::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("broken.json"), "not a shell").unwrap();
        assert!(trunk.crack("broken").unwrap().is_none());
        assert!(trunk.crack_all().unwrap().is_empty());
    }

    #[test]
    fn history_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let trunk: FileTrunk<Acorn> = FileTrunk::open(dir.path()).unwrap();
        assert!(matches!(
            trunk.get_history("a"),
            Err(AcornError::HistoryUnsupported { .. })
        ));
    }
}
