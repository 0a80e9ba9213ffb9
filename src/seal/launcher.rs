//! The launcher pipeline: profile, rules, libraries, seal, exec.

use std::convert::Infallible;
use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;

use tracing::debug;

use super::config::SealConfig;
use super::enforce::{self, Sealed};
use super::rules::{Rule, compile_profile, rules_for_binary};
use super::{SEAL_ENV_PREFIX, SealError, ldd};

/// Seal the current process and exec the target. Only returns on failure.
pub fn run(config: &SealConfig) -> Result<Infallible, SealError> {
    debug!(config = ?config, "starting seal");

    let rules = build_rules(config)?;
    for rule in &rules {
        debug!(rule = %rule, "landlock rule");
    }

    let sealed = enforce::seal(&rules)?;
    let env = sealed_process_env(std::env::vars_os());
    Err(exec(sealed, config, env))
}

/// Every rule the target runs under: the profile's, plus read+execute on
/// the binary and, when enabled, its linked libraries.
pub fn build_rules(config: &SealConfig) -> Result<Vec<Rule>, SealError> {
    let profile = config.build_profile()?;
    let mut rules = compile_profile(&profile);

    let libraries = if config.add_linked_libraries {
        linked_libraries(config)?
    } else {
        Vec::new()
    };
    rules.extend(rules_for_binary(&config.binary_to_run, &libraries));
    Ok(rules)
}

/// Resolve libraries on a throwaway single-threaded runtime. The runtime is
/// gone by the time the restriction is applied.
fn linked_libraries(config: &SealConfig) -> Result<Vec<PathBuf>, SealError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(SealError::Runtime)?;

    let libraries = runtime.block_on(ldd::discover_linked_libraries(
        &config.binary_to_run,
        config.ldd_timeout,
    ))?;
    debug!(libraries = ?libraries, "linked libraries");
    Ok(libraries)
}

/// The environment minus every `SEAL_*` variable.
pub fn sealed_process_env<I>(vars: I) -> Vec<(OsString, OsString)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter(|(key, _)| !key.as_encoded_bytes().starts_with(SEAL_ENV_PREFIX.as_bytes()))
        .collect()
}

/// Replace the process image. `argv[0]` stays the protected binary's path so
/// the target sees the name it was invoked under.
fn exec(_sealed: Sealed, config: &SealConfig, env: Vec<(OsString, OsString)>) -> SealError {
    debug!(
        binary = %config.binary.display(),
        binary_to_run = %config.binary_to_run.display(),
        args = ?config.binary_args,
        "about to start sealed process"
    );

    let source = std::process::Command::new(&config.binary_to_run)
        .arg0(&config.binary)
        .args(&config.binary_args)
        .env_clear()
        .envs(env)
        .exec();

    SealError::Exec {
        binary: config.binary_to_run.clone(),
        source,
    }
}
