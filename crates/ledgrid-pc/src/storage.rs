//! File-backed key/value store.
//!
//! One file per key under `<root>/<namespace>/`. Writes and erases stage
//! in memory and hit disk on `commit`, matching the flash-backed store on
//! real hardware.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ledgrid_hal::KvStore;

pub struct FileKvStore {
    dir: PathBuf,
    /// Staged operations per key: `Some` writes the blob, `None` erases.
    pending: HashMap<String, Option<Vec<u8>>>,
}

impl FileKvStore {
    pub fn open(root: &Path, namespace: &str) -> io::Result<Self> {
        let dir = root.join(namespace);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            pending: HashMap::new(),
        })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.bin"))
    }
}

impl KvStore for FileKvStore {
    type Error = io::Error;

    fn get_blob_size(&mut self, key: &str) -> Result<Option<usize>, Self::Error> {
        match self.pending.get(key) {
            Some(Some(bytes)) => return Ok(Some(bytes.len())),
            Some(None) => return Ok(None),
            None => {}
        }
        match fs::metadata(self.key_path(key)) {
            Ok(meta) => Ok(Some(meta.len() as usize)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn get_blob(&mut self, key: &str, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let bytes = match self.pending.get(key) {
            Some(Some(bytes)) => bytes.clone(),
            Some(None) => {
                return Err(io::Error::new(io::ErrorKind::NotFound, "key erased"));
            }
            None => fs::read(self.key_path(key))?,
        };
        if buf.len() < bytes.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "buffer too small",
            ));
        }
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    fn set_blob(&mut self, key: &str, bytes: &[u8]) -> Result<(), Self::Error> {
        self.pending.insert(key.to_string(), Some(bytes.to_vec()));
        Ok(())
    }

    fn erase(&mut self, key: &str) -> Result<bool, Self::Error> {
        let existed = match self.pending.get(key) {
            Some(Some(_)) => true,
            Some(None) => false,
            None => self.key_path(key).exists(),
        };
        self.pending.insert(key.to_string(), None);
        Ok(existed)
    }

    fn commit(&mut self) -> Result<(), Self::Error> {
        for (key, op) in std::mem::take(&mut self.pending) {
            let path = self.dir.join(format!("{key}.bin"));
            match op {
                Some(bytes) => {
                    let staging = path.with_extension("tmp");
                    fs::write(&staging, &bytes)?;
                    fs::rename(&staging, &path)?;
                }
                None => match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(err) => return Err(err),
                },
            }
        }
        Ok(())
    }
}
