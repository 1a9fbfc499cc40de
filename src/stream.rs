// SPDX-License-Identifier: Apache-2.0

//! Identity of a tailed file.
//!
//! A [`Stream`] is the device + inode pair of the physical file. It stays the
//! same when the file is renamed, which is what lets the registrar follow a
//! file through rotation without losing its resume offset.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;
use std::str::FromStr;

/// Opaque, comparable identity for a physical file being tailed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Stream {
    /// Device ID
    dev: u64,
    /// Inode number
    ino: u64,
}

impl Stream {
    /// Create a Stream from raw device and inode values.
    pub const fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    /// Create a Stream from an open file handle.
    #[cfg(unix)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;

        let metadata = file.metadata()?;
        Ok(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    /// Create a Stream from an open file handle.
    #[cfg(not(unix))]
    pub fn from_file(_file: &File) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "file identity is only available on unix platforms",
        ))
    }

    /// Create a Stream from a path by opening the file.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::from_file(&file)
    }

    pub fn dev(&self) -> u64 {
        self.dev
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    /// Key used for this stream in the persisted snapshot ("dev:ino").
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

impl FromStr for Stream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (dev, ino) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid stream key, expected dev:ino: {}", s))?;
        let dev = dev
            .parse()
            .map_err(|e| format!("invalid device in stream key {}: {}", s, e))?;
        let ino = ino
            .parse()
            .map_err(|e| format!("invalid inode in stream key {}: {}", s, e))?;
        Ok(Self { dev, ino })
    }
}
