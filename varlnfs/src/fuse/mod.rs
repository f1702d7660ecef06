//! FUSE adapter.
//!
//! Translates inode based rfuse3 requests into the path based handlers of
//! [`VarlnFs`]. The root is node 1; every other entry gets its node id from
//! the [`NodeTable`](nodes::NodeTable) the first time its name is looked up
//! or listed, so one name always maps to one id.
//!
//! Only lookup, getattr, readlink and directory listing are served; every
//! other request gets the trait's default ENOSYS.
pub mod mount;
pub mod nodes;

use std::ffi::{OsStr, OsString};
use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use nix::unistd::Pid;
use rfuse3::Result as FuseResult;
use rfuse3::raw::Filesystem;
use rfuse3::raw::Request;
use rfuse3::raw::reply::{
    DirectoryEntry, DirectoryEntryPlus, FileAttr, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEntry, ReplyInit, ReplyOpen, ReplyStatFs,
};
use rfuse3::{FileType as FuseFileType, Timestamp};
use tracing::debug;

use crate::environ::EnvironSource;
use crate::error::VarlnError;
use crate::fs::{EntryAttr, EntryKind, VarlnFs};

pub const ROOT_ID: u64 = 1;

/// Size of the link buffer libfuse's high-level API hands to readlink.
pub const READLINK_CAPACITY: usize = libc::PATH_MAX as usize + 1;

const MAX_WRITE: NonZeroU32 = NonZeroU32::new(128 * 1024).unwrap();

fn entry_path(name: &OsStr) -> PathBuf {
    Path::new("/").join(name)
}

impl<E: EnvironSource> VarlnFs<E> {
    fn path_of(&self, ino: u64) -> Result<PathBuf, VarlnError> {
        if ino == ROOT_ID {
            return Ok(PathBuf::from("/"));
        }
        self.nodes()
            .name_of(ino)
            .map(|name| entry_path(&name))
            .ok_or_else(|| VarlnError::NotFound(format!("node {ino}")))
    }

    /// Attributes of `path` with the node id the kernel should see.
    fn node_attr(&self, path: &Path) -> Result<FileAttr, VarlnError> {
        let attr = self.getattr_path(path)?;
        let ino = match (attr.kind, path.file_name()) {
            (EntryKind::Symlink, Some(name)) => self.nodes().id_of(name),
            _ => ROOT_ID,
        };
        Ok(to_fuse_attr(&attr, ino))
    }
}

impl<E> Filesystem for VarlnFs<E>
where
    E: EnvironSource + Send + Sync + 'static,
{
    type DirEntryStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntry>> + Send + 'a>>
    where
        Self: 'a;

    type DirEntryPlusStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntryPlus>> + Send + 'a>>
    where
        Self: 'a;

    async fn init(&self, _req: Request) -> FuseResult<ReplyInit> {
        Ok(ReplyInit {
            max_write: MAX_WRITE,
        })
    }

    async fn destroy(&self, _req: Request) {}

    async fn lookup(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<ReplyEntry> {
        if parent != ROOT_ID {
            return Err(libc::ENOENT.into());
        }
        let attr = self.node_attr(&entry_path(name))?;
        Ok(ReplyEntry {
            ttl: self.entry_ttl(),
            attr,
            generation: 0,
        })
    }

    async fn getattr(
        &self,
        _req: Request,
        ino: u64,
        _fh: Option<u64>,
        _flags: u32,
    ) -> FuseResult<ReplyAttr> {
        let path = self.path_of(ino)?;
        let attr = self.node_attr(&path)?;
        Ok(ReplyAttr {
            ttl: self.entry_ttl(),
            attr,
        })
    }

    // The caller is whoever issued this request, never this daemon.
    async fn readlink(&self, req: Request, ino: u64) -> FuseResult<ReplyData> {
        let path = self.path_of(ino)?;
        let caller = Pid::from_raw(req.pid as i32);
        debug!("readlink on {} for pid {caller}.", path.display());
        let mut buf = vec![0u8; READLINK_CAPACITY];
        let res = self.readlink_path(&path, caller, &mut buf)?;
        buf.truncate(res.len);
        Ok(ReplyData {
            data: Bytes::from(buf),
        })
    }

    async fn opendir(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        if ino != ROOT_ID {
            return Err(libc::ENOTDIR.into());
        }
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    async fn releasedir(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _flags: u32,
    ) -> FuseResult<()> {
        Ok(())
    }

    // offset is the offset of the last entry the kernel has seen.
    async fn readdir<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: i64,
    ) -> FuseResult<ReplyDirectory<Self::DirEntryStream<'a>>> {
        let path = self.path_of(ino)?;
        let mut all: Vec<DirectoryEntry> = vec![
            DirectoryEntry {
                inode: ROOT_ID,
                kind: FuseFileType::Directory,
                name: OsString::from("."),
                offset: 1,
            },
            DirectoryEntry {
                inode: ROOT_ID,
                kind: FuseFileType::Directory,
                name: OsString::from(".."),
                offset: 2,
            },
        ];
        self.readdir_path(&path, |name, _| {
            let inode = self.nodes().id_of(name);
            if all.try_reserve(1).is_err() {
                return ControlFlow::Break(());
            }
            let offset = all.len() as i64 + 1;
            all.push(DirectoryEntry {
                inode,
                kind: FuseFileType::Symlink,
                name: name.to_os_string(),
                offset,
            });
            ControlFlow::Continue(())
        })?;

        let start = offset.max(0) as usize;
        let slice = if start >= all.len() {
            Vec::new()
        } else {
            all.split_off(start)
        };
        let entries: Self::DirEntryStream<'a> = Box::pin(stream::iter(slice.into_iter().map(Ok)));
        Ok(ReplyDirectory { entries })
    }

    async fn statfs(&self, _req: Request, _ino: u64) -> FuseResult<ReplyStatFs> {
        Ok(ReplyStatFs {
            blocks: 0,
            bfree: 0,
            bavail: 0,
            files: 0,
            ffree: 0,
            bsize: 4096,
            namelen: 255,
            frsize: 4096,
        })
    }

    async fn forget(&self, _req: Request, _inode: u64, _nlookup: u64) {}

    async fn batch_forget(&self, _req: Request, _inodes: &[(u64, u64)]) {}
}

fn to_fuse_attr(attr: &EntryAttr, ino: u64) -> FileAttr {
    let kind = match attr.kind {
        EntryKind::Directory => FuseFileType::Directory,
        EntryKind::Symlink => FuseFileType::Symlink,
    };
    FileAttr {
        ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: Timestamp::from(attr.atime),
        mtime: Timestamp::from(attr.mtime),
        ctime: Timestamp::from(attr.ctime),
        #[cfg(target_os = "macos")]
        crtime: Timestamp::from(attr.ctime),
        kind,
        perm: attr.perm,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: attr.rdev,
        #[cfg(target_os = "macos")]
        flags: 0,
        blksize: attr.blksize,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::io::ErrorKind;

    use futures_util::StreamExt;

    use super::*;
    use crate::environ::ProcEnviron;

    const CALLER: u32 = 4242;

    struct Fixture {
        base: tempfile::TempDir,
        _proc: tempfile::TempDir,
        fs: VarlnFs<ProcEnviron>,
    }

    /// Base directory with `link1` (variant), `static` (fallback only) and a
    /// subdirectory, plus a process table where pid 4242 has MYVAR set.
    fn fixture() -> Fixture {
        let base = tempfile::tempdir().unwrap();
        std::fs::write(base.path().join("link1"), b"/default\nMYVAR\n").unwrap();
        std::fs::write(base.path().join("static"), b"/etc/static").unwrap();
        std::fs::create_dir(base.path().join("sub")).unwrap();

        let proc = tempfile::tempdir().unwrap();
        let pid_dir = proc.path().join(CALLER.to_string());
        std::fs::create_dir(&pid_dir).unwrap();
        std::fs::write(pid_dir.join("environ"), b"USER=alice\0MYVAR=/special\0").unwrap();

        let fs = VarlnFs::with_environ(base.path(), ProcEnviron::new(proc.path()));
        Fixture {
            base,
            _proc: proc,
            fs,
        }
    }

    fn request(pid: u32) -> Request {
        let mut req = Request::default();
        req.pid = pid;
        req
    }

    fn errno(e: rfuse3::Errno) -> Option<i32> {
        let e: std::io::Error = e.into();
        e.raw_os_error()
    }

    #[tokio::test]
    async fn root_attr_is_directory() {
        let fx = fixture();
        let reply = fx.fs.getattr(request(1), ROOT_ID, None, 0).await.unwrap();
        assert_eq!(reply.attr.ino, ROOT_ID);
        assert_eq!(reply.attr.kind, FuseFileType::Directory);
    }

    #[tokio::test]
    async fn lookup_reports_symlink_and_getattr_agrees() {
        let fx = fixture();
        let entry = fx
            .fs
            .lookup(request(1), ROOT_ID, OsStr::new("link1"))
            .await
            .unwrap();
        assert_eq!(entry.attr.kind, FuseFileType::Symlink);
        assert_eq!(entry.attr.perm, 0);
        assert_ne!(entry.attr.ino, ROOT_ID);

        let reply = fx
            .fs
            .getattr(request(1), entry.attr.ino, None, 0)
            .await
            .unwrap();
        assert_eq!(reply.attr.ino, entry.attr.ino);
        assert_eq!(reply.attr.kind, FuseFileType::Symlink);
    }

    #[tokio::test]
    async fn lookup_of_subdirectory_is_enoent() {
        let fx = fixture();
        let err = fx
            .fs
            .lookup(request(1), ROOT_ID, OsStr::new("sub"))
            .await
            .unwrap_err();
        assert_eq!(errno(err), Some(libc::ENOENT));
    }

    #[tokio::test]
    async fn readlink_uses_the_callers_environment() {
        let fx = fixture();
        let entry = fx
            .fs
            .lookup(request(CALLER), ROOT_ID, OsStr::new("link1"))
            .await
            .unwrap();

        let data = fx.fs.readlink(request(CALLER), entry.attr.ino).await.unwrap();
        assert_eq!(&data.data[..], b"/special");

        // A pid without a process entry falls back.
        let data = fx.fs.readlink(request(CALLER + 1), entry.attr.ino).await.unwrap();
        assert_eq!(&data.data[..], b"/default");
    }

    #[tokio::test]
    async fn readlink_of_unknown_node_is_enoent() {
        let fx = fixture();
        let err = fx.fs.readlink(request(CALLER), u64::MAX).await.unwrap_err();
        assert_eq!(errno(err), Some(libc::ENOENT));
    }

    #[tokio::test]
    async fn readdir_lists_flat_entries() {
        let fx = fixture();
        let reply = fx.fs.readdir(request(1), ROOT_ID, 0, 0).await.unwrap();
        let names: HashSet<OsString> = reply
            .entries
            .map(|e| e.unwrap().name)
            .collect::<HashSet<_>>()
            .await;
        let expected: HashSet<OsString> = [".", "..", "link1", "static"]
            .into_iter()
            .map(OsString::from)
            .collect();
        assert_eq!(names, expected);
    }

    #[tokio::test]
    async fn readdir_resumes_after_offset() {
        let fx = fixture();
        let reply = fx.fs.readdir(request(1), ROOT_ID, 0, 2).await.unwrap();
        let entries: Vec<DirectoryEntry> = reply.entries.map(|e| e.unwrap()).collect().await;
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.kind == FuseFileType::Symlink));
        assert_eq!(entries[0].offset, 3);

        let reply = fx.fs.readdir(request(1), ROOT_ID, 0, 4).await.unwrap();
        assert_eq!(reply.entries.count().await, 0);
    }

    #[tokio::test]
    async fn opendir_only_on_root() {
        let fx = fixture();
        assert!(fx.fs.opendir(request(1), ROOT_ID, 0).await.is_ok());
        let entry = fx
            .fs
            .lookup(request(1), ROOT_ID, OsStr::new("static"))
            .await
            .unwrap();
        let err = fx.fs.opendir(request(1), entry.attr.ino, 0).await.unwrap_err();
        assert_eq!(errno(err), Some(libc::ENOTDIR));
    }

    async fn lookup_id(fs: &VarlnFs<ProcEnviron>, name: &str) -> u64 {
        fs.lookup(request(CALLER), ROOT_ID, OsStr::new(name))
            .await
            .unwrap()
            .attr
            .ino
    }

    #[tokio::test]
    async fn entries_sharing_an_inode_keep_their_own_ids() {
        let fx = fixture();
        let base = fx.base.path();
        std::fs::hard_link(base.join("static"), base.join("hard")).unwrap();
        std::os::unix::fs::symlink(base.join("link1"), base.join("alias")).unwrap();

        let ids = [
            lookup_id(&fx.fs, "link1").await,
            lookup_id(&fx.fs, "static").await,
            lookup_id(&fx.fs, "hard").await,
            lookup_id(&fx.fs, "alias").await,
        ];
        let distinct: HashSet<u64> = ids.iter().copied().collect();
        assert_eq!(distinct.len(), ids.len());

        for (id, name) in ids.iter().zip(["link1", "static", "hard", "alias"]) {
            assert_eq!(fx.fs.path_of(*id).unwrap(), entry_path(OsStr::new(name)));
        }

        let data = fx.fs.readlink(request(CALLER), ids[3]).await.unwrap();
        assert_eq!(&data.data[..], b"/special");
    }

    // A link to a device node lives on another filesystem, where its inode
    // number may equal that of a config file in the base directory.
    #[tokio::test]
    async fn links_to_other_filesystems_do_not_shadow_entries() {
        let fx = fixture();
        let base = fx.base.path();
        for name in ["a", "z"] {
            std::os::unix::fs::symlink("/dev/null", base.join(name)).unwrap();
        }

        let a = lookup_id(&fx.fs, "a").await;
        let link1 = lookup_id(&fx.fs, "link1").await;
        let z = lookup_id(&fx.fs, "z").await;
        assert!(a != link1 && link1 != z && a != z);

        let data = fx.fs.readlink(request(CALLER), link1).await.unwrap();
        assert_eq!(&data.data[..], b"/special");
        let reply = fx.fs.getattr(request(CALLER), a, None, 0).await.unwrap();
        assert_eq!(reply.attr.ino, a);
        assert_eq!(reply.attr.kind, FuseFileType::Symlink);
    }

    #[tokio::test]
    async fn listed_ids_match_lookup_ids() {
        let fx = fixture();
        std::os::unix::fs::symlink("/dev/null", fx.base.path().join("dev")).unwrap();
        let reply = fx.fs.readdir(request(1), ROOT_ID, 0, 2).await.unwrap();
        let listed: Vec<DirectoryEntry> = reply.entries.map(|e| e.unwrap()).collect().await;
        assert_eq!(listed.len(), 3);
        for entry in listed {
            let name = entry.name.to_str().unwrap().to_string();
            assert_eq!(lookup_id(&fx.fs, &name).await, entry.inode);
        }
    }

    #[tokio::test]
    async fn entries_removed_from_base_disappear() {
        let fx = fixture();
        let entry = fx
            .fs
            .lookup(request(1), ROOT_ID, OsStr::new("static"))
            .await
            .unwrap();
        std::fs::remove_file(fx.base.path().join("static")).unwrap();
        let err = fx
            .fs
            .getattr(request(1), entry.attr.ino, None, 0)
            .await
            .unwrap_err();
        let io: std::io::Error = err.into();
        assert_eq!(io.kind(), ErrorKind::NotFound);
    }
}
