//! Discover the shared libraries a binary links against.
//!
//! The dynamic loader of the image does the heavy lifting: it is located
//! through a class-specific glob (`/lib64/ld-*.so.*` or `/lib32/ld-*.so.*`)
//! with `/lib/ld-*.so.*` as the fallback (which also matches musl's
//! `/lib/ld-musl-*.so.1`), then asked to list the libraries of the target.
//!
//! Scripts, non-ELF files and static binaries yield an empty list, never an
//! error.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::elf::{self, ELF_MAGIC, ElfClass};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("could not detect file type for binary '{path}': {source}")]
    FileType {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse ELF binary '{path}': {source}")]
    Elf {
        path: PathBuf,
        #[source]
        source: elf::ElfError,
    },

    #[error("no dynamic loader found (searched {patterns:?})")]
    LoaderNotFound { patterns: Vec<String> },

    #[error("failed to run {loader}: {source}")]
    Spawn {
        loader: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run {loader}: {status}\noutput: {output}")]
    LoaderFailed {
        loader: PathBuf,
        status: std::process::ExitStatus,
        output: String,
    },

    #[error("{loader} did not finish within {timeout:?}")]
    Timeout { loader: PathBuf, timeout: Duration },
}

/// File type, from the first bytes of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Elf,
    Script,
    Unknown,
}

/// Classify `path` by its magic bytes.
pub fn detect_file_type(path: &Path) -> Result<FileType, ResolveError> {
    let wrap = |source| ResolveError::FileType {
        path: path.to_path_buf(),
        source,
    };

    let mut file = std::fs::File::open(path).map_err(wrap)?;
    let mut magic = [0u8; 4];
    let mut filled = 0;
    while filled < magic.len() {
        match file.read(&mut magic[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(wrap(e)),
        }
    }

    Ok(match &magic[..filled] {
        m if m == ELF_MAGIC => FileType::Elf,
        [b'#', b'!', ..] => FileType::Script,
        _ => FileType::Unknown,
    })
}

/// Finds the dynamic loader by probing glob patterns in order.
///
/// `search_root` is prepended to every pattern; it is `/` in production and a
/// scratch directory in tests.
#[derive(Debug, Clone)]
pub struct LoaderLocator {
    search_root: PathBuf,
}

impl Default for LoaderLocator {
    fn default() -> Self {
        Self {
            search_root: PathBuf::from("/"),
        }
    }
}

impl LoaderLocator {
    pub fn with_root(search_root: impl Into<PathBuf>) -> Self {
        Self {
            search_root: search_root.into(),
        }
    }

    /// Patterns probed for a binary of the given class, most specific first.
    pub fn patterns(&self, class: ElfClass) -> Vec<String> {
        let mut patterns = Vec::with_capacity(2);
        match class {
            ElfClass::Elf32 => patterns.push("lib32/ld-*.so.*"),
            ElfClass::Elf64 => patterns.push("lib64/ld-*.so.*"),
            ElfClass::Unknown(value) => {
                info!(class = value, "unknown ELF class, using generic loader pattern");
            }
        }
        patterns.push("lib/ld-*.so.*");

        patterns
            .into_iter()
            .map(|p| self.search_root.join(p).to_string_lossy().into_owned())
            .collect()
    }

    /// First match of the first pattern that matches anything.
    pub fn find(&self, class: ElfClass) -> Result<PathBuf, ResolveError> {
        let patterns = self.patterns(class);
        for pattern in &patterns {
            match glob::glob(pattern) {
                Ok(paths) => {
                    if let Some(found) = paths.filter_map(Result::ok).next() {
                        return Ok(found);
                    }
                }
                Err(e) => warn!(pattern = %pattern, error = %e, "error during globbing"),
            }
        }
        Err(ResolveError::LoaderNotFound { patterns })
    }
}

/// Discover the libraries linked to `binary`, using the system loader.
pub async fn discover_linked_libraries(
    binary: &Path,
    timeout: Duration,
) -> Result<Vec<PathBuf>, ResolveError> {
    discover_with(&LoaderLocator::default(), binary, timeout).await
}

/// Same as [`discover_linked_libraries`] with an explicit loader locator.
pub async fn discover_with(
    locator: &LoaderLocator,
    binary: &Path,
    timeout: Duration,
) -> Result<Vec<PathBuf>, ResolveError> {
    debug!(binary = %binary.display(), "discovering linked libraries");

    match detect_file_type(binary)? {
        FileType::Elf => {}
        FileType::Script => {
            info!(binary = %binary.display(), "binary is a script, skipping linked libraries discovery");
            return Ok(Vec::new());
        }
        FileType::Unknown => {
            info!(binary = %binary.display(), "binary file type is unknown, skipping linked libraries discovery");
            return Ok(Vec::new());
        }
    }

    let info = elf::read_elf(binary).map_err(|source| ResolveError::Elf {
        path: binary.to_path_buf(),
        source,
    })?;
    if info.needed.is_empty() {
        debug!(binary = %binary.display(), "binary is statically linked, no linked libraries found");
        return Ok(Vec::new());
    }
    debug!(binary = %binary.display(), needed = ?info.needed, "imported libraries");

    let loader = locator.find(info.class)?;
    let output = run_loader(&loader, binary, timeout).await?;
    Ok(parse_loader_output(&output))
}

/// Run the loader in list mode and return its combined output.
async fn run_loader(loader: &Path, binary: &Path, timeout: Duration) -> Result<String, ResolveError> {
    let mut cmd = tokio::process::Command::new(loader);
    if is_musl_loader(loader) {
        // musl's loader behaves like ldd when invoked under that name
        cmd.arg0("ldd").arg(binary);
    } else {
        cmd.arg("--list").arg(binary);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(loader = %loader.display(), binary = %binary.display(), "running loader to discover linked libraries");

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| ResolveError::Timeout {
            loader: loader.to_path_buf(),
            timeout,
        })?
        .map_err(|source| ResolveError::Spawn {
            loader: loader.to_path_buf(),
            source,
        })?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        return Err(ResolveError::LoaderFailed {
            loader: loader.to_path_buf(),
            status: output.status,
            output: combined,
        });
    }
    Ok(combined)
}

fn is_musl_loader(loader: &Path) -> bool {
    loader.to_string_lossy().contains("musl")
}

/// Extract absolute library paths from loader output.
///
/// - `libfoo.so.1 => /usr/lib/libfoo.so.1 (0x...)` yields the path after `=>`
/// - `/lib/ld-musl-x86_64.so.1 (0x...)` (the loader itself) yields the path
/// - anything else (`linux-vdso.so.1 (0x...)`, `not found` entries) is skipped
///
/// Duplicates are kept.
pub fn parse_loader_output(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let candidate = match line.find("=>") {
                Some(idx) => line[idx + 2..].split_whitespace().next(),
                None => line.split_whitespace().next(),
            }?;
            candidate.starts_with('/').then(|| PathBuf::from(candidate))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const MUSL_OUTPUT: &str = "
        /lib/ld-musl-x86_64.so.1 (0x7f1c03cbe000)
        libcurl.so.4 => /usr/lib/libcurl.so.4 (0x7f1c03bd0000)
        libz.so.1 => /usr/lib/libz.so.1 (0x7f1c03bb5000)
        libc.musl-x86_64.so.1 => /lib/ld-musl-x86_64.so.1 (0x7f1c03cbe000)
        libssl.so.3 => /usr/lib/libssl.so.3 (0x7f1c03a4e000)
    ";

    const GLIBC_OUTPUT: &str = "
        linux-vdso.so.1 (0x00007f9b4e199000)
        libselinux.so.1 => /lib64/libselinux.so.1 (0x00007f9b4e12b000)
        libacl.so.1 => /lib64/libacl.so.1 (0x00007f9b4e122000)
        libc.so.6 => /lib64/libc.so.6 (0x00007f9b4df1e000)
        /lib64/ld-linux-x86-64.so.2 (0x00007f9b4e19b000)
    ";

    fn paths(list: &[&str]) -> Vec<PathBuf> {
        list.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_parse_musl_output_keeps_duplicates() {
        let mut got = parse_loader_output(MUSL_OUTPUT);
        got.sort();
        let mut want = paths(&[
            "/lib/ld-musl-x86_64.so.1",
            "/usr/lib/libcurl.so.4",
            "/usr/lib/libz.so.1",
            "/lib/ld-musl-x86_64.so.1",
            "/usr/lib/libssl.so.3",
        ]);
        want.sort();
        assert_eq!(got, want);
    }

    #[test]
    fn test_parse_glibc_output_skips_vdso() {
        assert_eq!(
            parse_loader_output(GLIBC_OUTPUT),
            paths(&[
                "/lib64/libselinux.so.1",
                "/lib64/libacl.so.1",
                "/lib64/libc.so.6",
                "/lib64/ld-linux-x86-64.so.2",
            ])
        );
    }

    #[test]
    fn test_parse_single_lines() {
        assert_eq!(
            parse_loader_output("libfoo.so.1 => /usr/lib/libfoo.so.1 (0x7f00)"),
            paths(&["/usr/lib/libfoo.so.1"])
        );
        assert_eq!(
            parse_loader_output("/lib/ld-musl-x86_64.so.1 (0x7f00)"),
            paths(&["/lib/ld-musl-x86_64.so.1"])
        );
        assert!(parse_loader_output("linux-vdso.so.1 (0x7fff)").is_empty());
        assert!(parse_loader_output("libmissing.so => not found").is_empty());
    }

    #[test]
    fn test_detect_file_type() {
        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("script.sh");
        let text = tmp.path().join("README.md");
        let empty = tmp.path().join("empty");
        fs::write(&script, "#!/bin/sh\necho hi\n").unwrap();
        fs::write(&text, "# podlock\n").unwrap();
        fs::write(&empty, "").unwrap();

        let exe = std::env::current_exe().unwrap();
        assert_eq!(detect_file_type(&exe).unwrap(), FileType::Elf);
        assert_eq!(detect_file_type(&script).unwrap(), FileType::Script);
        assert_eq!(detect_file_type(&text).unwrap(), FileType::Unknown);
        assert_eq!(detect_file_type(&empty).unwrap(), FileType::Unknown);
        assert!(detect_file_type(&tmp.path().join("missing")).is_err());
    }

    fn touch(root: &Path, rel: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn test_loader_class_specific_pattern_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let ld32 = touch(tmp.path(), "lib32/ld-linux.so.2");
        let ld64 = touch(tmp.path(), "lib64/ld-linux-x86-64.so.2");
        touch(tmp.path(), "lib/ld-musl-x86_64.so.1");
        let locator = LoaderLocator::with_root(tmp.path());

        assert_eq!(locator.find(ElfClass::Elf32).unwrap(), ld32);
        assert_eq!(locator.find(ElfClass::Elf64).unwrap(), ld64);
    }

    #[test]
    fn test_loader_generic_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        let musl = touch(tmp.path(), "lib/ld-musl-x86_64.so.1");
        let locator = LoaderLocator::with_root(tmp.path());

        assert_eq!(locator.find(ElfClass::Elf32).unwrap(), musl);
        assert_eq!(locator.find(ElfClass::Elf64).unwrap(), musl);
        assert_eq!(locator.find(ElfClass::Unknown(0)).unwrap(), musl);
    }

    #[test]
    fn test_loader_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let locator = LoaderLocator::with_root(tmp.path());

        let err = locator.find(ElfClass::Elf64).unwrap_err();
        assert!(matches!(err, ResolveError::LoaderNotFound { ref patterns } if patterns.len() == 2));
    }

    #[test]
    fn test_musl_loader_detection() {
        assert!(is_musl_loader(Path::new("/lib/ld-musl-x86_64.so.1")));
        assert!(!is_musl_loader(Path::new("/lib64/ld-linux-x86-64.so.2")));
    }

    #[tokio::test]
    async fn test_non_elf_and_scripts_yield_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("script.sh");
        let text = tmp.path().join("notes.txt");
        fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        fs::write(&text, "plain text").unwrap();

        for path in [&script, &text] {
            let libs = discover_linked_libraries(path, Duration::from_secs(5))
                .await
                .unwrap();
            assert!(libs.is_empty());
        }
    }

    #[tokio::test]
    async fn test_static_elf_yields_nothing_without_loader() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = tmp.path().join("static");
        fs::write(&bin, elf::tests::elf64_image(&[])).unwrap();
        // An empty search root proves no loader lookup happens.
        let locator = LoaderLocator::with_root(tmp.path().join("nowhere"));

        let libs = discover_with(&locator, &bin, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(libs.is_empty());
    }

    #[tokio::test]
    async fn test_dynamic_elf_without_loader_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = tmp.path().join("dynamic");
        fs::write(&bin, elf::tests::elf64_image(&["libc.so.6"])).unwrap();
        let locator = LoaderLocator::with_root(tmp.path().join("nowhere"));

        let err = discover_with(&locator, &bin, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::LoaderNotFound { .. }));
    }

    #[tokio::test]
    async fn test_loader_timeout_is_a_resolution_error() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let bin = tmp.path().join("dynamic");
        fs::write(&bin, elf::tests::elf64_image(&["libc.so.6"])).unwrap();
        let loader = touch(tmp.path(), "lib64/ld-slow.so.1");
        fs::write(&loader, "#!/bin/sh\nsleep 30\n").unwrap();
        fs::set_permissions(&loader, fs::Permissions::from_mode(0o755)).unwrap();
        let locator = LoaderLocator::with_root(tmp.path());

        let err = discover_with(&locator, &bin, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_failing_loader_reports_output() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let bin = tmp.path().join("dynamic");
        fs::write(&bin, elf::tests::elf64_image(&["libc.so.6"])).unwrap();
        let loader = touch(tmp.path(), "lib64/ld-broken.so.1");
        fs::write(&loader, "#!/bin/sh\necho \"cannot load $2\" >&2\nexit 3\n").unwrap();
        fs::set_permissions(&loader, fs::Permissions::from_mode(0o755)).unwrap();
        let locator = LoaderLocator::with_root(tmp.path());

        let err = discover_with(&locator, &bin, Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            ResolveError::LoaderFailed { output, .. } => assert!(output.contains("cannot load")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fake_loader_output_is_parsed() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let bin = tmp.path().join("dynamic");
        fs::write(&bin, elf::tests::elf64_image(&["libfoo.so.1"])).unwrap();
        let loader = touch(tmp.path(), "lib64/ld-fake.so.2");
        fs::write(
            &loader,
            "#!/bin/sh\n[ \"$1\" = --list ] || exit 1\necho 'libfoo.so.1 => /usr/lib/libfoo.so.1 (0x7f00)'\necho '/lib64/ld-fake.so.2 (0x7f01)'\n",
        )
        .unwrap();
        fs::set_permissions(&loader, fs::Permissions::from_mode(0o755)).unwrap();
        let locator = LoaderLocator::with_root(tmp.path());

        let libs = discover_with(&locator, &bin, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            libs,
            paths(&["/usr/lib/libfoo.so.1", "/lib64/ld-fake.so.2"])
        );
        assert!(libs.iter().all(|p| p.is_absolute()));
    }
}
