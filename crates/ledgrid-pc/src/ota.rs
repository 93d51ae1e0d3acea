//! File-backed firmware update sink.
//!
//! Streams the uploaded image into a staging file and promotes it with an
//! atomic rename on `finish`; "reboot" terminates the process so a
//! supervisor can relaunch the new build.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;

use ledgrid_hal::OtaUpdater;

/// Matches the update partition size of the reference hardware.
const DEFAULT_CAPACITY: usize = 4 * 1024 * 1024;

pub struct FileOtaUpdater {
    staging_path: PathBuf,
    image_path: PathBuf,
    capacity: usize,
    staging: Option<File>,
    expected_len: usize,
    written: usize,
}

impl FileOtaUpdater {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            staging_path: dir.join("update.staging"),
            image_path: dir.join("update.bin"),
            capacity: DEFAULT_CAPACITY,
            staging: None,
            expected_len: 0,
            written: 0,
        }
    }
}

impl OtaUpdater for FileOtaUpdater {
    type Error = io::Error;

    fn next_image_capacity(&mut self) -> Option<usize> {
        Some(self.capacity)
    }

    fn begin(&mut self, image_len: usize) -> Result<(), Self::Error> {
        if image_len > self.capacity {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "image exceeds slot capacity",
            ));
        }
        if let Some(parent) = self.staging_path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.staging = Some(File::create(&self.staging_path)?);
        self.expected_len = image_len;
        self.written = 0;
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<(), Self::Error> {
        let Some(file) = self.staging.as_mut() else {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "no update in progress",
            ));
        };
        file.write_all(chunk)?;
        self.written += chunk.len();
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Self::Error> {
        let Some(file) = self.staging.take() else {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "no update in progress",
            ));
        };
        file.sync_all()?;
        if self.written != self.expected_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "image shorter than announced",
            ));
        }
        fs::rename(&self.staging_path, &self.image_path)?;
        log::info!(
            "firmware image staged at {} ({} bytes)",
            self.image_path.display(),
            self.written
        );
        Ok(())
    }

    fn abort(&mut self) {
        if self.staging.take().is_some() {
            let _ = fs::remove_file(&self.staging_path);
        }
    }

    fn mark_running_valid(&mut self) -> Result<(), Self::Error> {
        log::debug!("running image confirmed");
        Ok(())
    }

    fn reboot(&mut self) {
        log::info!("restart requested, exiting for supervisor relaunch");
        std::process::exit(0);
    }
}
