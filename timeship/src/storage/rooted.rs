//! Traversal-resistant filesystem access rooted at a pinned directory.
//!
//! A [`RootDir`] holds one long-lived descriptor for its root, opened at
//! construction. Every subsequent operation resolves its relative path one
//! component at a time with `openat(2)`, passing `O_NOFOLLOW` for each
//! component, so neither `..` (rejected before resolution), absolute paths
//! (never produced by the locator layer) nor symlinks can carry resolution
//! outside the root. Because the walk happens entirely through descriptors
//! there is no window between a path check and the open that uses it.

use std::ffi::{CStr, CString};
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::Path;

use super::errors::{Result, StorageError};

/// Metadata for one node, from `lstat`-equivalent data.
#[derive(Debug, Clone, Copy)]
pub struct NodeMeta {
    pub is_dir: bool,
    /// True only for regular files; symlinks and special files are neither.
    pub is_file: bool,
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub mtime: i64,
}

impl NodeMeta {
    fn from_stat(st: &libc::stat) -> Self {
        let fmt = st.st_mode & libc::S_IFMT;
        Self {
            is_dir: fmt == libc::S_IFDIR,
            is_file: fmt == libc::S_IFREG,
            size: st.st_size as u64,
            mtime: st.st_mtime,
        }
    }
}

/// One directory entry with its (non-followed) metadata.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub meta: NodeMeta,
}

/// A directory handle confining all relative opens beneath it.
#[derive(Debug)]
pub struct RootDir {
    fd: OwnedFd,
}

impl RootDir {
    /// Pin a root directory. This is the only place an absolute path is
    /// accepted; it happens once, at storage registration.
    pub fn open(path: &Path) -> io::Result<Self> {
        let c_path = CString::new(path.as_os_str().as_encoded_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
        let fd = unsafe {
            libc::open(
                c_path.as_ptr(),
                libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Open a descendant directory as a new root of its own. Used to scope
    /// a gateway to a snapshot's copy of the tree.
    pub fn open_beneath(&self, relpath: &str) -> Result<RootDir> {
        let fd = self.resolve(relpath, true)?;
        Ok(RootDir { fd })
    }

    /// Open a node for reading. The final component is opened `O_NOFOLLOW`
    /// like every other, so a symlink reports as missing.
    pub fn open_file(&self, relpath: &str) -> Result<File> {
        let fd = self.resolve(relpath, false)?;
        Ok(File::from(fd))
    }

    /// Stat without following symlinks on the final component.
    pub fn stat(&self, relpath: &str) -> Result<NodeMeta> {
        if relpath == "." {
            return fstat(&self.fd).map_err(|e| StorageError::from_os(e, relpath));
        }
        let (parent, name) = split_final(relpath)?;
        if name.is_empty() || name == "." || name == ".." {
            return Err(StorageError::InvalidPath(relpath.to_string()));
        }
        let parent_fd = self.resolve(parent, true)?;
        let c_name = component_cstring(name)?;
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::fstatat(
                parent_fd.as_raw_fd(),
                c_name.as_ptr(),
                &mut st,
                libc::AT_SYMLINK_NOFOLLOW,
            )
        };
        if rc < 0 {
            return Err(StorageError::from_os(io::Error::last_os_error(), relpath));
        }
        Ok(NodeMeta::from_stat(&st))
    }

    /// List a directory's entries with per-entry lstat data. Entries that
    /// vanish between readdir and stat are skipped, as are names that are
    /// not valid UTF-8 (they cannot be represented on the wire).
    pub fn read_dir(&self, relpath: &str) -> Result<Vec<DirEntry>> {
        let fd = self.resolve(relpath, true)?;
        let raw = fd.as_raw_fd();
        let dirp = unsafe { libc::fdopendir(raw) };
        if dirp.is_null() {
            return Err(StorageError::from_os(io::Error::last_os_error(), relpath));
        }
        // fdopendir took ownership of the descriptor; closedir releases it.
        std::mem::forget(fd);

        let mut entries = Vec::new();
        loop {
            unsafe { *libc::__errno_location() = 0 };
            let ent = unsafe { libc::readdir(dirp) };
            if ent.is_null() {
                let err = io::Error::last_os_error();
                unsafe { libc::closedir(dirp) };
                if err.raw_os_error().unwrap_or(0) != 0 {
                    return Err(StorageError::from_os(err, relpath));
                }
                break;
            }
            let c_name = unsafe { CStr::from_ptr((*ent).d_name.as_ptr()) };
            let Ok(name) = c_name.to_str() else {
                continue;
            };
            if name == "." || name == ".." {
                continue;
            }
            let mut st: libc::stat = unsafe { std::mem::zeroed() };
            let rc = unsafe {
                libc::fstatat(
                    libc::dirfd(dirp),
                    c_name.as_ptr(),
                    &mut st,
                    libc::AT_SYMLINK_NOFOLLOW,
                )
            };
            if rc < 0 {
                continue;
            }
            entries.push(DirEntry {
                name: name.to_string(),
                meta: NodeMeta::from_stat(&st),
            });
        }
        Ok(entries)
    }

    /// Walk `relpath` component by component from the root descriptor.
    /// `relpath` must already be normalized: `.` names the root itself,
    /// otherwise it is a `/`-joined sequence of plain components.
    fn resolve(&self, relpath: &str, want_dir: bool) -> Result<OwnedFd> {
        if relpath.is_empty() {
            return Err(StorageError::InvalidPath(String::new()));
        }
        if relpath == "." {
            return open_component(self.fd.as_raw_fd(), ".", true)
                .map_err(|e| StorageError::from_os(e, relpath));
        }

        let mut components = relpath.split('/').peekable();
        let mut current: Option<OwnedFd> = None;
        while let Some(component) = components.next() {
            if component.is_empty() || component == "." || component == ".." {
                return Err(StorageError::InvalidPath(relpath.to_string()));
            }
            let is_last = components.peek().is_none();
            let as_dir = !is_last || want_dir;
            let parent = current
                .as_ref()
                .map(|fd| fd.as_raw_fd())
                .unwrap_or(self.fd.as_raw_fd());
            let next = open_component(parent, component, as_dir)
                .map_err(|e| StorageError::from_os(e, relpath))?;
            current = Some(next);
        }
        // The loop ran at least once: relpath has at least one component.
        current.ok_or_else(|| StorageError::InvalidPath(relpath.to_string()))
    }
}

fn open_component(parent: libc::c_int, name: &str, dir: bool) -> io::Result<OwnedFd> {
    let c_name = CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "component contains NUL"))?;
    let mut flags = libc::O_RDONLY | libc::O_NOFOLLOW | libc::O_CLOEXEC;
    if dir {
        flags |= libc::O_DIRECTORY;
    }
    let fd = unsafe { libc::openat(parent, c_name.as_ptr(), flags) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn component_cstring(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| StorageError::InvalidPath(name.to_string()))
}

fn fstat(fd: &OwnedFd) -> io::Result<NodeMeta> {
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::fstat(fd.as_raw_fd(), &mut st) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(NodeMeta::from_stat(&st))
}

/// Split a multi-component path into (parent, final); parent is `.` when
/// the path has a single component.
fn split_final(relpath: &str) -> Result<(&str, &str)> {
    match relpath.rsplit_once('/') {
        Some((parent, name)) if !parent.is_empty() && !name.is_empty() => Ok((parent, name)),
        None => Ok((".", relpath)),
        _ => Err(StorageError::InvalidPath(relpath.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Read;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("docs")).unwrap();
        fs::write(tmp.path().join("docs/note.txt"), b"hello").unwrap();
        fs::write(tmp.path().join("top.txt"), b"top").unwrap();
        tmp
    }

    #[test]
    fn stat_root_and_children() {
        let tmp = tree();
        let root = RootDir::open(tmp.path()).unwrap();

        let meta = root.stat(".").unwrap();
        assert!(meta.is_dir);

        let meta = root.stat("docs/note.txt").unwrap();
        assert!(meta.is_file);
        assert_eq!(meta.size, 5);
    }

    #[test]
    fn open_file_reads_contents() {
        let tmp = tree();
        let root = RootDir::open(tmp.path()).unwrap();
        let mut file = root.open_file("docs/note.txt").unwrap();
        let mut buf = String::new();
        file.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "hello");
    }

    #[test]
    fn read_dir_lists_entries() {
        let tmp = tree();
        let root = RootDir::open(tmp.path()).unwrap();
        let mut names: Vec<_> = root
            .read_dir(".")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["docs", "top.txt"]);
    }

    #[test]
    fn missing_node_is_not_found() {
        let tmp = tree();
        let root = RootDir::open(tmp.path()).unwrap();
        assert!(matches!(
            root.stat("nope.txt"),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            root.open_file("docs/nope"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn parent_segments_never_resolve() {
        let tmp = tree();
        let root = RootDir::open(tmp.path()).unwrap();
        assert!(matches!(
            root.open_file("../outside.txt"),
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            root.stat("docs/../../etc"),
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[test]
    fn symlinks_are_not_followed() {
        let tmp = tree();
        symlink("/etc", tmp.path().join("escape")).unwrap();
        symlink("docs/note.txt", tmp.path().join("alias.txt")).unwrap();
        let root = RootDir::open(tmp.path()).unwrap();

        assert!(matches!(
            root.open_file("escape/passwd"),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            root.open_file("alias.txt"),
            Err(StorageError::NotFound(_))
        ));

        // lstat data: the link itself is neither dir nor regular file.
        let meta = root.stat("escape").unwrap();
        assert!(!meta.is_dir);
        assert!(!meta.is_file);
    }

    #[test]
    fn open_beneath_scopes_a_new_root() {
        let tmp = tree();
        let root = RootDir::open(tmp.path()).unwrap();
        let docs = root.open_beneath("docs").unwrap();
        let meta = docs.stat("note.txt").unwrap();
        assert!(meta.is_file);
        assert!(matches!(
            docs.stat("top.txt"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn arbitrary_inputs_never_escape() {
        let tmp = tree();
        let root = RootDir::open(tmp.path()).unwrap();
        for input in [
            "..",
            "../",
            "../../etc/passwd",
            "docs/..",
            "docs/../..",
            "./../x",
            "a/../../b",
        ] {
            match root.open_file(input) {
                Err(StorageError::InvalidPath(_)) | Err(StorageError::NotFound(_)) => {}
                other => panic!("{input:?} resolved unexpectedly: {other:?}"),
            }
            match root.stat(input) {
                Err(StorageError::InvalidPath(_)) | Err(StorageError::NotFound(_)) => {}
                other => panic!("stat {input:?} resolved unexpectedly: {other:?}"),
            }
        }
    }
}
