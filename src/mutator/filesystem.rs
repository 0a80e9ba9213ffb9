//! Host-side files backing the adjustment.
//!
//! Bind mount sources must exist before the runtime sees the adjustment, so
//! [`reserve_swapped_binaries`] and [`write_profile`] run before
//! [`super::build_adjustment`] is returned.

use std::fs::{self, DirBuilder, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use super::MutatorError;
use crate::paths::HostLayout;
use crate::profile::ProfileByBinary;

const DIR_MODE: u32 = 0o750;
/// Placeholders end up as the mount point of an executable.
const PLACEHOLDER_MODE: u32 = 0o755;
/// Any user inside the container must be able to read the policy.
const PROFILE_MODE: u32 = 0o644;
const BINARY_MODE: u32 = 0o755;

fn create_dir_all(dir: &Path) -> Result<(), MutatorError> {
    DirBuilder::new()
        .recursive(true)
        .mode(DIR_MODE)
        .create(dir)
        .map_err(MutatorError::io("failed to create directory", dir))
}

fn parent_of(path: &Path) -> Result<&Path, MutatorError> {
    path.parent().ok_or_else(|| MutatorError::Io {
        action: "path has no parent directory",
        path: path.to_path_buf(),
        source: io::Error::from(io::ErrorKind::InvalidInput),
    })
}

/// Create an empty executable placeholder for every binary of the container.
/// Existing placeholders are left as they are.
pub fn reserve_swapped_binaries(
    layout: &HostLayout,
    pod_id: &str,
    container: &str,
    profiles: &ProfileByBinary,
) -> Result<Vec<PathBuf>, MutatorError> {
    let mut reserved = Vec::with_capacity(profiles.len());

    for binary in profiles.keys() {
        let placeholder = layout.swapped_binary_path(pod_id, container, binary);
        debug!(
            pod_id,
            container,
            binary = %binary.display(),
            placeholder = %placeholder.display(),
            "reserving swapped binary path"
        );

        create_dir_all(parent_of(&placeholder)?)?;
        OpenOptions::new()
            .write(true)
            .create(true)
            .mode(PLACEHOLDER_MODE)
            .open(&placeholder)
            .map_err(MutatorError::io("failed to create placeholder", &placeholder))?;
        fs::set_permissions(&placeholder, Permissions::from_mode(PLACEHOLDER_MODE))
            .map_err(MutatorError::io("failed to set permissions of", &placeholder))?;

        reserved.push(placeholder);
    }

    Ok(reserved)
}

/// Write the container's profiles as indented JSON, replacing any previous
/// file.
pub fn write_profile(
    layout: &HostLayout,
    pod_id: &str,
    container: &str,
    profiles: &ProfileByBinary,
) -> Result<PathBuf, MutatorError> {
    let path = layout.profile_path(pod_id, container);
    debug!(pod_id, container, path = %path.display(), "writing landlock profile to host filesystem");

    let mut json = serde_json::to_vec_pretty(profiles).map_err(|source| MutatorError::Encode {
        path: path.clone(),
        source,
    })?;
    json.push(b'\n');

    create_dir_all(parent_of(&path)?)?;
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(PROFILE_MODE)
        .open(&path)
        .map_err(MutatorError::io("failed to create landlock profile file", &path))?;
    file.write_all(&json)
        .map_err(MutatorError::io("failed to write landlock profile file", &path))?;
    fs::set_permissions(&path, Permissions::from_mode(PROFILE_MODE))
        .map_err(MutatorError::io("failed to set permissions of", &path))?;

    Ok(path)
}

/// Delete everything kept for a pod. Already gone is fine.
pub fn remove_pod_dir(layout: &HostLayout, pod_id: &str) -> Result<(), MutatorError> {
    let dir = layout.pod_dir(pod_id);
    match fs::remove_dir_all(&dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(MutatorError::io("failed to remove podlock runtime dir", dir)(e)),
    }
}

fn file_sha256(path: &Path) -> io::Result<Vec<u8>> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_vec())
}

/// Copy `src` to `dst` unless both already have the same SHA-256 digest.
/// Returns whether a copy happened.
pub fn copy_file_if_different(src: &Path, dst: &Path) -> Result<bool, MutatorError> {
    let src_sum = file_sha256(src).map_err(MutatorError::io("failed to hash source file", src))?;
    let dst_sum = match file_sha256(dst) {
        Ok(sum) => Some(sum),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(MutatorError::io("failed to hash destination file", dst)(e)),
    };

    if dst_sum.as_deref() == Some(src_sum.as_slice()) {
        debug!(path = %dst.display(), "destination file is up to date, skipping copy");
        return Ok(false);
    }

    create_dir_all(parent_of(dst)?)?;
    let mut input = fs::File::open(src).map_err(MutatorError::io("failed to open source file", src))?;
    let mut output = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(BINARY_MODE)
        .open(dst)
        .map_err(MutatorError::io("failed to create destination file", dst))?;
    io::copy(&mut input, &mut output).map_err(MutatorError::io("failed to copy file to", dst))?;
    fs::set_permissions(dst, Permissions::from_mode(BINARY_MODE))
        .map_err(MutatorError::io("failed to set permissions of", dst))?;

    debug!(source = %src.display(), destination = %dst.display(), "copied file to destination");
    Ok(true)
}
