//! Mount table and handle-based file access

use ocf_core::error::FsError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// What a guest path prefix is backed by
pub enum MountSource {
    /// A directory on the host filesystem
    HostDir(PathBuf),
    /// An in-memory file table, keyed by path relative to the mount
    Memory(HashMap<String, Vec<u8>>),
}

struct Mount {
    prefix: String,
    source: MountSource,
}

struct OpenFile {
    data: Vec<u8>,
    pos: usize,
}

/// Guest-visible filesystem
///
/// Longest-prefix mount resolution, then either host IO or a table
/// lookup. Open files are fully buffered; RPL images are read once and
/// small enough that streaming buys nothing.
pub struct VirtualFileSystem {
    mounts: RwLock<Vec<Mount>>,
    open_files: RwLock<HashMap<u32, OpenFile>>,
    next_handle: RwLock<u32>,
}

impl VirtualFileSystem {
    pub fn new() -> Self {
        Self {
            mounts: RwLock::new(Vec::new()),
            open_files: RwLock::new(HashMap::new()),
            next_handle: RwLock::new(1),
        }
    }

    /// Mount a source at a guest path prefix such as `/vol/code`
    pub fn mount(&self, prefix: impl Into<String>, source: MountSource) {
        let prefix = prefix.into();
        debug!(prefix, "mounting");
        let mut mounts = self.mounts.write();
        mounts.push(Mount { prefix, source });
        // Longest prefix first so /vol/code wins over /vol
        mounts.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
    }

    /// Add or replace a file in a memory mount
    pub fn add_memory_file(
        &self,
        prefix: &str,
        name: impl Into<String>,
        data: Vec<u8>,
    ) -> Result<(), FsError> {
        let mut mounts = self.mounts.write();
        for mount in mounts.iter_mut() {
            if mount.prefix == prefix {
                if let MountSource::Memory(files) = &mut mount.source {
                    files.insert(name.into(), data);
                    return Ok(());
                }
            }
        }
        Err(FsError::NotFound(prefix.to_string()))
    }

    /// Read an entire file by guest path
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>, FsError> {
        let mounts = self.mounts.read();

        for mount in mounts.iter() {
            let Some(rest) = path.strip_prefix(&mount.prefix) else {
                continue;
            };
            let rest = rest.trim_start_matches('/');

            match &mount.source {
                MountSource::HostDir(dir) => {
                    let host = dir.join(rest);
                    if host.is_file() {
                        return Ok(std::fs::read(host)?);
                    }
                }
                MountSource::Memory(files) => {
                    if let Some(data) = files.get(rest) {
                        return Ok(data.clone());
                    }
                }
            }
        }

        Err(FsError::NotFound(path.to_string()))
    }

    /// Whether a guest path resolves to a file
    pub fn exists(&self, path: &str) -> bool {
        let mounts = self.mounts.read();
        mounts.iter().any(|mount| {
            path.strip_prefix(&mount.prefix)
                .map(|rest| {
                    let rest = rest.trim_start_matches('/');
                    match &mount.source {
                        MountSource::HostDir(dir) => dir.join(rest).is_file(),
                        MountSource::Memory(files) => files.contains_key(rest),
                    }
                })
                .unwrap_or(false)
        })
    }

    /// Open a file and return a handle for sequential reads
    pub fn open_file(&self, path: &str) -> Result<u32, FsError> {
        let data = self.read_file(path)?;

        let mut next = self.next_handle.write();
        let handle = *next;
        *next += 1;

        self.open_files
            .write()
            .insert(handle, OpenFile { data, pos: 0 });
        Ok(handle)
    }

    /// Read up to `buf.len()` bytes, returning the count read
    pub fn read(&self, handle: u32, buf: &mut [u8]) -> Result<usize, FsError> {
        let mut files = self.open_files.write();
        let file = files.get_mut(&handle).ok_or(FsError::InvalidHandle(handle))?;

        let remaining = file.data.len() - file.pos;
        let count = buf.len().min(remaining);
        buf[..count].copy_from_slice(&file.data[file.pos..file.pos + count]);
        file.pos += count;
        Ok(count)
    }

    /// Size of an open file
    pub fn size(&self, handle: u32) -> Result<u64, FsError> {
        let files = self.open_files.read();
        let file = files.get(&handle).ok_or(FsError::InvalidHandle(handle))?;
        Ok(file.data.len() as u64)
    }

    /// Close a handle
    pub fn close(&self, handle: u32) -> Result<(), FsError> {
        self.open_files
            .write()
            .remove(&handle)
            .map(|_| ())
            .ok_or(FsError::InvalidHandle(handle))
    }
}

impl Default for VirtualFileSystem {
    fn default() -> Self {
        Self::new()
    }
}
