//! Launcher configuration.
//!
//! Everything the launcher needs is gathered once, at startup, into an
//! immutable [`SealConfig`]. The environment is reached only through the
//! lookup function handed to [`SealConfig::from_args_with_env`]; nothing
//! downstream reads variables on its own.
//!
//! Precedence, lowest first: built-in defaults, native-mode flags, `SEAL_*`
//! environment variables.

use std::collections::HashSet;
use std::ffi::OsString;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use tracing::Level;

use super::{
    ADD_LINKED_LIBRARIES_ENV_VAR, LDD_TIMEOUT_ENV_VAR, LOG_FORMAT_ENV_VAR, LOG_LEVEL_ENV_VAR,
    PROFILE_ENV_VAR, SEAL_BINARY_NAME, SealError,
};
use crate::logging::{self, LogFormat};
use crate::paths;
use crate::profile::{Profile, ProfileByBinary};

/// Default deadline for the dynamic loader during library discovery.
pub const DEFAULT_LDD_TIMEOUT: Duration = Duration::from_secs(30);

/// How the launcher was started, decided from its own invocation name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Started as `seal`: flags, `--`, then the binary and its arguments.
    Native,
    /// Started under the name of a swapped binary. `self_path` is the absolute
    /// path the launcher was invoked as, which is also the profile key.
    Wrapper { self_path: PathBuf },
}

impl Invocation {
    /// Classify from `argv[0]`. A bare command name is looked up in
    /// `path_var` the way the caller's exec did; other relative invocation
    /// paths are resolved against `cwd`.
    pub fn classify(argv0: &Path, path_var: Option<&str>, cwd: &Path) -> Invocation {
        if argv0.file_name().is_some_and(|name| name == SEAL_BINARY_NAME) {
            return Invocation::Native;
        }
        // Not on PATH: argv[0] was set by hand, keep it relative to cwd
        let self_path = resolve_binary_path(argv0, path_var, cwd)
            .unwrap_or_else(|_| absolute(argv0, cwd));
        Invocation::Wrapper { self_path }
    }
}

/// Where the profile comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileSource {
    /// JSON map keyed by binary path; the entry for the target is used.
    File(PathBuf),
    /// Built from `--ro`/`--rx`/`--rw`/`--rwx`.
    Inline(Profile),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealConfig {
    pub invocation: Invocation,
    pub profile_source: ProfileSource,
    pub log_level: Level,
    pub log_format: LogFormat,
    /// Absolute path of the protected binary, as policies name it.
    pub binary: PathBuf,
    /// What actually gets exec'd. Differs from `binary` in wrapper mode, where
    /// the original lives under the swapped-binaries tree.
    pub binary_to_run: PathBuf,
    pub binary_args: Vec<OsString>,
    pub add_linked_libraries: bool,
    pub ldd_timeout: Duration,
}

/// Flags accepted in native mode, before the `--` separator.
#[derive(Parser, Debug, Default)]
#[command(
    name = "seal",
    about = "Run a binary inside a Landlock sandbox",
    override_usage = "seal [OPTIONS] -- <BINARY> [ARGS]...",
    after_help = "The -- separator is required; everything after it is the binary to run and its arguments.\n\nExample:\n  seal --ro /etc --rw /tmp -- cp -r /etc/default /tmp/default"
)]
struct NativeArgs {
    /// Read-only paths
    #[arg(long = "ro", value_name = "PATH")]
    read_only: Vec<PathBuf>,

    /// Read-exec paths
    #[arg(long = "rx", value_name = "PATH")]
    read_exec: Vec<PathBuf>,

    /// Read-write paths
    #[arg(long = "rw", value_name = "PATH")]
    read_write: Vec<PathBuf>,

    /// Read-write-exec paths
    #[arg(long = "rwx", value_name = "PATH")]
    read_write_exec: Vec<PathBuf>,

    /// Profile file (JSON map of binary path to profile)
    #[arg(long, value_name = "FILE")]
    profile: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format: json or text
    #[arg(long, default_value = "json")]
    log_format: String,

    /// Add the linked libraries of the target binary to the profile
    #[arg(long)]
    ldd: bool,
}

impl SealConfig {
    /// Build from the real process arguments, environment and working
    /// directory.
    pub fn from_process() -> Result<SealConfig, SealError> {
        let cwd = std::env::current_dir()
            .map_err(|e| SealError::Config(format!("cannot determine working directory: {e}")))?;
        Self::from_args_with_env(std::env::args_os(), |key| std::env::var(key).ok(), &cwd)
    }

    /// Build from an explicit argument vector (including `argv[0]`) and an
    /// environment lookup.
    pub fn from_args_with_env<I, F>(args: I, env: F, cwd: &Path) -> Result<SealConfig, SealError>
    where
        I: IntoIterator<Item = OsString>,
        F: Fn(&str) -> Option<String>,
    {
        let mut args = args.into_iter();
        let argv0 = args
            .next()
            .ok_or_else(|| SealError::Config("missing program name".to_string()))?;
        let rest: Vec<OsString> = args.collect();
        // Empty values count as unset
        let env = |key: &str| env(key).filter(|v| !v.is_empty());

        match Invocation::classify(Path::new(&argv0), env(PATH_ENV_VAR).as_deref(), cwd) {
            Invocation::Native => native_mode(rest, &env, cwd),
            Invocation::Wrapper { self_path } => wrapper_mode(self_path, rest, &env),
        }
    }

    /// Profile for the target binary.
    pub fn build_profile(&self) -> Result<Profile, SealError> {
        match &self.profile_source {
            ProfileSource::Inline(profile) => Ok(profile.clone()),
            ProfileSource::File(path) => load_profile(path, &self.binary),
        }
    }
}

fn wrapper_mode(
    self_path: PathBuf,
    binary_args: Vec<OsString>,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<SealConfig, SealError> {
    let profile_path = env(PROFILE_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(paths::container_profile_path);

    Ok(SealConfig {
        profile_source: ProfileSource::File(profile_path),
        log_level: logging::parse_level(&env(LOG_LEVEL_ENV_VAR).unwrap_or_else(|| "info".into()))?,
        log_format: env(LOG_FORMAT_ENV_VAR).unwrap_or_default().parse()?,
        binary_to_run: paths::swapped_binary_path_in_container(&self_path),
        binary: self_path.clone(),
        binary_args,
        add_linked_libraries: env(ADD_LINKED_LIBRARIES_ENV_VAR).is_some_and(|v| parse_toggle(&v)),
        ldd_timeout: ldd_timeout(env)?,
        invocation: Invocation::Wrapper { self_path },
    })
}

fn native_mode(
    args: Vec<OsString>,
    env: &dyn Fn(&str) -> Option<String>,
    cwd: &Path,
) -> Result<SealConfig, SealError> {
    let (flag_args, command) = match args.iter().position(|a| a == "--") {
        Some(idx) => (&args[..idx], &args[idx + 1..]),
        None => (&args[..], &[][..]),
    };

    let flags = NativeArgs::try_parse_from(
        std::iter::once(OsString::from(SEAL_BINARY_NAME)).chain(flag_args.iter().cloned()),
    )?;

    let profile_path = env(PROFILE_ENV_VAR).map(PathBuf::from).or(flags.profile);
    let log_level = env(LOG_LEVEL_ENV_VAR).unwrap_or(flags.log_level);
    let log_format = env(LOG_FORMAT_ENV_VAR).unwrap_or(flags.log_format);
    let add_linked_libraries = match env(ADD_LINKED_LIBRARIES_ENV_VAR) {
        Some(v) => parse_toggle(&v),
        None => flags.ldd,
    };

    let inline = Profile {
        read_only: dedup(flags.read_only),
        read_write: dedup(flags.read_write),
        read_exec: dedup(flags.read_exec),
        read_write_exec: dedup(flags.read_write_exec),
    };

    let profile_source = match profile_path {
        Some(_) if !inline.is_empty() => {
            return Err(SealError::Config(
                "cannot use --profile together with --ro, --rx, --rw, or --rwx".to_string(),
            ));
        }
        Some(path) => ProfileSource::File(path),
        None => ProfileSource::Inline(inline),
    };

    let Some((binary, binary_args)) = command.split_first() else {
        return Err(SealError::Config(
            "no binary specified to run; use -- to separate flags and binary".to_string(),
        ));
    };
    if binary.is_empty() {
        return Err(SealError::Config("empty binary name".to_string()));
    }

    let binary = resolve_binary_path(Path::new(binary), env(PATH_ENV_VAR).as_deref(), cwd)?;

    Ok(SealConfig {
        invocation: Invocation::Native,
        profile_source,
        log_level: logging::parse_level(&log_level)?,
        log_format: log_format.parse()?,
        binary_to_run: binary.clone(),
        binary,
        binary_args: binary_args.to_vec(),
        add_linked_libraries,
        ldd_timeout: ldd_timeout(env)?,
    })
}

const PATH_ENV_VAR: &str = "PATH";

/// Boolean toggle from the environment. Any value other than `0` or `false`
/// turns it on.
fn parse_toggle(value: &str) -> bool {
    let value = value.trim();
    !(value == "0" || value.eq_ignore_ascii_case("false"))
}

fn ldd_timeout(env: &dyn Fn(&str) -> Option<String>) -> Result<Duration, SealError> {
    match env(LDD_TIMEOUT_ENV_VAR) {
        None => Ok(DEFAULT_LDD_TIMEOUT),
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(SealError::Config(format!(
                "invalid {LDD_TIMEOUT_ENV_VAR} '{raw}': expected a positive number of seconds"
            ))),
        },
    }
}

fn dedup(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    paths.into_iter().filter(|p| seen.insert(p.clone())).collect()
}

fn absolute(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        paths::clean_path(path)
    } else {
        paths::clean_path(&cwd.join(path))
    }
}

/// Resolve the target binary to the absolute path policies use.
///
/// A bare name is looked up in `path_var`; anything else is made absolute
/// against `cwd` and cleaned lexically.
pub fn resolve_binary_path(
    binary: &Path,
    path_var: Option<&str>,
    cwd: &Path,
) -> Result<PathBuf, SealError> {
    let is_bare_name = binary.components().count() == 1
        && matches!(binary.components().next(), Some(std::path::Component::Normal(_)));
    if !is_bare_name {
        return Ok(absolute(binary, cwd));
    }

    path_var
        .into_iter()
        .flat_map(std::env::split_paths)
        .map(|dir| {
            // An empty PATH entry means the working directory
            let dir = if dir.as_os_str().is_empty() { PathBuf::from(".") } else { dir };
            absolute(&dir.join(binary), cwd)
        })
        .find(|candidate| is_executable_file(candidate))
        .ok_or_else(|| {
            SealError::Config(format!(
                "could not find binary in PATH: '{}'",
                binary.display()
            ))
        })
}

fn is_executable_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Read a profile file and pick the entry for `binary`.
pub fn load_profile(path: &Path, binary: &Path) -> Result<Profile, SealError> {
    let data = std::fs::read(path).map_err(|source| SealError::ProfileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let mut profiles: ProfileByBinary =
        serde_json::from_slice(&data).map_err(|source| SealError::ProfileParse {
            path: path.to_path_buf(),
            source,
        })?;

    profiles
        .remove(binary)
        .ok_or_else(|| SealError::ProfileNotFound {
            path: path.to_path_buf(),
            binary: binary.to_path_buf(),
        })
}
