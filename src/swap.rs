//! Binary swapper, run as an OCI prestart hook.
//!
//! The runtime starts the hook with the container root as working directory.
//! After re-rooting there, two detached mount clones are moved in a fixed
//! order: the original binary onto its backup placeholder first, then the
//! launcher onto the original path. Reversing the moves would hide the
//! original before it is preserved.
//!
//! Requires `open_tree(2)`/`move_mount(2)` (Linux 5.2+).

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::paths;

/// `OPEN_TREE_CLONE` from `linux/mount.h`.
const OPEN_TREE_CLONE: libc::c_uint = 1;
/// `MOVE_MOUNT_F_EMPTY_PATH` from `linux/mount.h`.
const MOVE_MOUNT_F_EMPTY_PATH: libc::c_uint = 0x0000_0004;

#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    #[error("failed to chroot to container root: {0}")]
    Chroot(#[source] io::Error),

    #[error("invalid path '{}'", .0.display())]
    InvalidPath(PathBuf),

    #[error("open_tree failed for '{}': {source}", path.display())]
    OpenTree {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("move_mount of '{}' onto '{}' failed: {source}", from.display(), to.display())]
    MoveMount {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Mount-tree primitives the swap is built from.
pub trait MountTree {
    type Handle;

    /// Detached, movable clone of the mount at `path`.
    fn clone_tree(&self, path: &Path) -> io::Result<Self::Handle>;

    /// Attach `handle` on top of `to`.
    fn move_tree(&self, handle: &Self::Handle, to: &Path) -> io::Result<()>;
}

/// The running kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct Kernel;

impl MountTree for Kernel {
    type Handle = OwnedFd;

    fn clone_tree(&self, path: &Path) -> io::Result<OwnedFd> {
        let path = c_path(path)?;
        // SAFETY: `path` is a valid NUL-terminated string for the duration of
        // the call.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_open_tree,
                libc::AT_FDCWD,
                path.as_ptr(),
                OPEN_TREE_CLONE | libc::O_CLOEXEC as libc::c_uint,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd = libc::c_int::try_from(ret).map_err(|_| io::Error::other("fd out of range"))?;
        // SAFETY: open_tree returned a fresh descriptor that nothing else owns.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    fn move_tree(&self, handle: &OwnedFd, to: &Path) -> io::Result<()> {
        let to = c_path(to)?;
        let empty = c"";
        // SAFETY: both strings are valid for the duration of the call and the
        // descriptor is owned by `handle`.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_move_mount,
                handle.as_raw_fd(),
                empty.as_ptr(),
                libc::AT_FDCWD,
                to.as_ptr(),
                MOVE_MOUNT_F_EMPTY_PATH,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))
}

/// Re-root the process at its working directory (the container root).
pub fn chroot_to_container_root() -> Result<(), SwapError> {
    nix::unistd::chroot(".").map_err(|e| SwapError::Chroot(e.into()))
}

/// Swap the launcher in place of `target`, preserving the original at
/// `backup`.
pub fn swap_binary(target: &Path, backup: &Path) -> Result<(), SwapError> {
    swap_with(&Kernel, Path::new(paths::CONTAINER_SEAL_BINARY), target, backup)
}

/// Same as [`swap_binary`], over any [`MountTree`] and launcher path.
pub fn swap_with<M: MountTree>(
    mounts: &M,
    seal: &Path,
    target: &Path,
    backup: &Path,
) -> Result<(), SwapError> {
    for path in [seal, target, backup] {
        if path.as_os_str().is_empty() || path.as_os_str().as_bytes().contains(&0) {
            return Err(SwapError::InvalidPath(path.to_path_buf()));
        }
    }

    let open = |path: &Path| {
        mounts.clone_tree(path).map_err(|source| SwapError::OpenTree {
            path: path.to_path_buf(),
            source,
        })
    };
    let seal_tree = open(seal)?;
    let target_tree = open(target)?;

    mounts
        .move_tree(&target_tree, backup)
        .map_err(|source| SwapError::MoveMount {
            from: target.to_path_buf(),
            to: backup.to_path_buf(),
            source,
        })?;
    debug!(target = %target.display(), backup = %backup.display(), "original binary moved to backup");

    mounts
        .move_tree(&seal_tree, target)
        .map_err(|source| SwapError::MoveMount {
            from: seal.to_path_buf(),
            to: target.to_path_buf(),
            source,
        })?;
    info!(target = %target.display(), "binary swapped with seal");

    Ok(())
}
