/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::{
    fmt::Display,
    fs,
    io::{self, Read},
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};

use md5::{Digest, Md5};

use crate::{
    layout::{LayoutBackend, LayoutError},
    stripe::StripeLayout,
};

/// Checksum stand-in for anything that is not a regular file.
pub const MD5_ZERO: &str = "00000000000000000000000000000000";

/// Checksum read block size, bigger reads are faster on striped storage.
const MD5_BLOCKSIZE: usize = 512 * 1024 * 1024;

const S_IFMT: u32 = 0o170000;
const S_IFSOCK: u32 = 0o140000;
const S_IFLNK: u32 = 0o120000;
const S_IFREG: u32 = 0o100000;
const S_IFBLK: u32 = 0o060000;
const S_IFDIR: u32 = 0o040000;
const S_IFCHR: u32 = 0o020000;
const S_IFIFO: u32 = 0o010000;

/// Second/nanosecond timestamp pair, ordered lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub sec: i64,
    pub nsec: i64,
}

/// Snapshot of one no-follow stat call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatInfo {
    pub mode: u32,
    pub ino: u64,
    pub dev: u64,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: Timestamp,
    pub mtime: Timestamp,
    pub ctime: Timestamp,
}

impl StatInfo {
    fn from_metadata(meta: &fs::Metadata) -> StatInfo {
        StatInfo {
            mode: meta.mode(),
            ino: meta.ino(),
            dev: meta.dev(),
            nlink: meta.nlink(),
            uid: meta.uid(),
            gid: meta.gid(),
            size: meta.size(),
            atime: Timestamp {
                sec: meta.atime(),
                nsec: meta.atime_nsec(),
            },
            mtime: Timestamp {
                sec: meta.mtime(),
                nsec: meta.mtime_nsec(),
            },
            ctime: Timestamp {
                sec: meta.ctime(),
                nsec: meta.ctime_nsec(),
            },
        }
    }

    pub fn is_regular(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    pub fn is_fifo(&self) -> bool {
        self.mode & S_IFMT == S_IFIFO
    }

    pub fn is_socket(&self) -> bool {
        self.mode & S_IFMT == S_IFSOCK
    }

    pub fn is_chardev(&self) -> bool {
        self.mode & S_IFMT == S_IFCHR
    }

    pub fn is_blockdev(&self) -> bool {
        self.mode & S_IFMT == S_IFBLK
    }
}

/// One filesystem path with lazily computed, cached metadata: stat fields,
/// the backend file id, the stripe layout and the content checksum. Nothing
/// is recomputed until [`FileHandle::invalidate`] clears the caches, and a
/// handle never writes to the filesystem.
#[derive(Debug)]
pub struct FileHandle {
    path: PathBuf,
    mountpoint: Option<PathBuf>,
    stat: Option<StatInfo>,
    file_id: Option<String>,
    layout: Option<StripeLayout>,
    md5: Option<String>,
}

impl Display for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl FileHandle {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let path = std::path::absolute(&path).unwrap_or(path);
        Self {
            path,
            mountpoint: None,
            stat: None,
            file_id: None,
            layout: None,
            md5: None,
        }
    }

    /// Like [`FileHandle::new`] with the containing mountpoint already known,
    /// skipping the lookup.
    pub fn with_mountpoint<P: Into<PathBuf>, M: Into<PathBuf>>(path: P, mountpoint: M) -> Self {
        let mut handle = Self::new(path);
        handle.mountpoint = Some(mountpoint.into());
        handle
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn parent(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("/"))
    }

    /// Nearest ancestor that is itself a mount root.
    pub fn mountpoint(&mut self) -> io::Result<&Path> {
        if self.mountpoint.is_none() {
            self.mountpoint = Some(find_mountpoint(&self.path)?);
        }
        Ok(self.mountpoint.as_deref().unwrap_or(Path::new("/")))
    }

    pub fn stat(&mut self) -> io::Result<&StatInfo> {
        if self.stat.is_none() {
            let meta = fs::symlink_metadata(&self.path)?;
            self.stat = Some(StatInfo::from_metadata(&meta));
        }
        Ok(self.stat.as_ref().unwrap_or(&ZERO_STAT))
    }

    /// False only for the benign "no such file or directory" stat failure;
    /// every other stat error propagates.
    pub fn exists(&mut self) -> io::Result<bool> {
        if self.stat.is_some() {
            return Ok(true);
        }
        match self.stat() {
            Ok(_) => Ok(true),
            Err(v) if v.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(v) => Err(v),
        }
    }

    pub fn is_regular(&mut self) -> io::Result<bool> {
        Ok(self.stat()?.is_regular())
    }

    pub fn is_dir(&mut self) -> io::Result<bool> {
        Ok(self.stat()?.is_dir())
    }

    pub fn is_symlink(&mut self) -> io::Result<bool> {
        Ok(self.stat()?.is_symlink())
    }

    /// Opaque identity shared by every hardlink of this file.
    pub fn file_id(&mut self, backend: &dyn LayoutBackend) -> Result<&str, LayoutError> {
        if self.file_id.is_none() {
            self.file_id = Some(backend.path_to_id(&self.path)?);
        }
        Ok(self.file_id.as_deref().unwrap_or_default())
    }

    /// Stripe layout for regular files and directories; other file types
    /// have the null layout without asking the backend.
    pub fn stripe_layout(&mut self, backend: &dyn LayoutBackend) -> Result<&StripeLayout, LayoutError> {
        if self.layout.is_none() {
            let path = self.path.clone();
            let stat = *self.stat().map_err(|v| LayoutError::Stat { path, source: v })?;
            self.layout = if stat.is_regular() || stat.is_dir() {
                Some(backend.get_layout(&self.path)?)
            } else {
                Some(StripeLayout::null())
            };
        }
        Ok(self.layout.as_ref().unwrap_or(&NULL_LAYOUT))
    }

    /// Lowercase hex MD5 of the file content; the 32-zero string for
    /// non-regular files, computed without touching the data.
    pub fn md5(&mut self) -> io::Result<&str> {
        if self.md5.is_none() {
            let stat = *self.stat()?;
            self.md5 = if stat.is_regular() {
                Some(md5_file(&self.path, stat.size)?)
            } else {
                Some(MD5_ZERO.to_owned())
            };
        }
        Ok(self.md5.as_deref().unwrap_or(MD5_ZERO))
    }

    /// Drop every cached field; the next access recomputes. The mountpoint
    /// is kept, it cannot change under a live path.
    pub fn invalidate(&mut self) {
        self.stat = None;
        self.file_id = None;
        self.layout = None;
        self.md5 = None;
    }
}

static ZERO_STAT: StatInfo = StatInfo {
    mode: 0,
    ino: 0,
    dev: 0,
    nlink: 0,
    uid: 0,
    gid: 0,
    size: 0,
    atime: Timestamp { sec: 0, nsec: 0 },
    mtime: Timestamp { sec: 0, nsec: 0 },
    ctime: Timestamp { sec: 0, nsec: 0 },
};

static NULL_LAYOUT: StripeLayout = StripeLayout {
    count: 0,
    size: 0,
    offset: 0,
    pattern: 0,
    generation: 0,
    index: Vec::new(),
};

fn md5_file(path: &Path, size: u64) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Md5::new();
    let chunk = MD5_BLOCKSIZE.min(size.max(1) as usize);
    let mut buf = vec![0u8; chunk];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Walk up from `path` until the parent lives on a different device (or is
/// the same inode, as the root is). Nonexistent leading components are
/// skipped, the answer is the mountpoint the path would live on.
pub fn find_mountpoint(path: &Path) -> io::Result<PathBuf> {
    let mut cur = std::path::absolute(path)?;
    loop {
        match fs::symlink_metadata(&cur) {
            Ok(_) => break,
            Err(v) if v.kind() == io::ErrorKind::NotFound => {
                if !cur.pop() {
                    return Ok(PathBuf::from("/"));
                }
            }
            Err(v) => return Err(v),
        }
    }
    loop {
        let Some(parent) = cur.parent() else {
            return Ok(cur);
        };
        let cur_meta = fs::metadata(&cur)?;
        let parent_meta = fs::metadata(parent)?;
        if cur_meta.dev() != parent_meta.dev() || cur_meta.ino() == parent_meta.ino() {
            return Ok(cur);
        }
        cur = parent.to_path_buf();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_stat_is_memoized_until_invalidate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f1");
        fs::write(&path, b"12345678").unwrap();

        let mut handle = FileHandle::new(&path);
        assert_eq!(handle.stat().unwrap().size, 8);

        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"90").unwrap();
        drop(file);

        assert_eq!(handle.stat().unwrap().size, 8);
        handle.invalidate();
        assert_eq!(handle.stat().unwrap().size, 10);
    }

    #[test]
    fn test_exists() {
        let dir = TempDir::new().unwrap();
        let mut missing = FileHandle::new(dir.path().join("missing"));
        assert!(!missing.exists().unwrap());
        let mut present = FileHandle::new(dir.path());
        assert!(present.exists().unwrap());
    }

    #[test]
    fn test_md5_known_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f1");
        fs::write(&path, b"hello world").unwrap();
        let mut handle = FileHandle::new(&path);
        assert_eq!(handle.md5().unwrap(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn test_md5_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f1");
        fs::write(&path, b"").unwrap();
        let mut handle = FileHandle::new(&path);
        assert_eq!(handle.md5().unwrap(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_md5_of_directory_is_zero() {
        let dir = TempDir::new().unwrap();
        let mut handle = FileHandle::new(dir.path());
        assert_eq!(handle.md5().unwrap(), MD5_ZERO);
    }

    #[test]
    fn test_type_predicates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f1");
        fs::write(&path, b"x").unwrap();
        let mut file = FileHandle::new(&path);
        assert!(file.is_regular().unwrap());
        assert!(!file.is_dir().unwrap());
        let mut d = FileHandle::new(dir.path());
        assert!(d.is_dir().unwrap());
        assert!(!d.is_regular().unwrap());
    }

    #[test]
    fn test_symlink_predicate() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("f1");
        fs::write(&target, b"x").unwrap();
        let link = dir.path().join("l1");
        std::os::unix::fs::symlink(&target, &link).unwrap();
        let mut handle = FileHandle::new(&link);
        assert!(handle.is_symlink().unwrap());
        assert!(!handle.is_regular().unwrap());
        let mut plain = FileHandle::new(&target);
        assert!(!plain.is_symlink().unwrap());
    }

    #[test]
    fn test_socket_predicate_and_zero_md5() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sock");
        let _listener = std::os::unix::net::UnixListener::bind(&path).unwrap();
        let mut handle = FileHandle::new(&path);
        assert!(handle.stat().unwrap().is_socket());
        assert!(!handle.is_regular().unwrap());
        assert_eq!(handle.md5().unwrap(), MD5_ZERO);
    }

    #[test]
    fn test_fifo_predicate_and_zero_md5() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fifo");
        let status = std::process::Command::new("mkfifo")
            .arg(&path)
            .status()
            .unwrap();
        assert!(status.success());
        let mut handle = FileHandle::new(&path);
        assert!(handle.stat().unwrap().is_fifo());
        // the checksum must come from the type convention, opening a fifo
        // with no writer would block forever
        assert_eq!(handle.md5().unwrap(), MD5_ZERO);
    }

    #[test]
    fn test_chardev_predicate() {
        // mknod needs root; /dev/null is the one device node every
        // environment carries
        let mut null = FileHandle::new("/dev/null");
        assert!(null.stat().unwrap().is_chardev());
        assert!(!null.stat().unwrap().is_blockdev());
        assert_eq!(null.md5().unwrap(), MD5_ZERO);
    }

    #[test]
    fn test_predicates_from_mode_bits() {
        let stat = |mode| StatInfo { mode, ..ZERO_STAT };
        assert!(stat(S_IFREG | 0o644).is_regular());
        assert!(stat(S_IFDIR | 0o755).is_dir());
        assert!(stat(S_IFLNK | 0o777).is_symlink());
        assert!(stat(S_IFIFO | 0o644).is_fifo());
        assert!(stat(S_IFSOCK | 0o755).is_socket());
        assert!(stat(S_IFCHR | 0o666).is_chardev());
        assert!(stat(S_IFBLK | 0o660).is_blockdev());
        assert!(!stat(S_IFBLK | 0o660).is_chardev());
        assert!(!stat(S_IFCHR | 0o666).is_regular());
        assert!(!stat(S_IFSOCK | 0o755).is_fifo());
    }

    #[test]
    fn test_mountpoint_is_prefix() {
        let dir = TempDir::new().unwrap();
        let mut handle = FileHandle::new(dir.path().join("deep/missing/leaf"));
        let mountpoint = handle.mountpoint().unwrap().to_path_buf();
        assert!(dir.path().starts_with(&mountpoint));
        assert_eq!(find_mountpoint(Path::new("/")).unwrap(), Path::new("/"));
    }
}
