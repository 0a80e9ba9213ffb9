//! Landlock enforcement.
//!
//! The restriction is applied once per process and can never be relaxed.
//! [`seal`] is the only way in and hands back a [`Sealed`] token; the exec
//! step takes that token, so nothing can run the target unsealed.

use std::sync::atomic::{AtomicBool, Ordering};

use landlock::{
    ABI, Access, AccessFs, BitFlags, PathBeneath, PathFd, Ruleset, RulesetAttr,
    RulesetCreatedAttr, RulesetStatus,
};
use tracing::{debug, info, warn};

use super::SealError;
use super::rules::Rule;

/// `LANDLOCK_CREATE_RULESET_VERSION` from `linux/landlock.h`.
const LANDLOCK_CREATE_RULESET_VERSION: libc::c_uint = 1 << 0;

static SEALED: AtomicBool = AtomicBool::new(false);

/// Proof that the current process is restricted.
#[derive(Debug)]
pub struct Sealed {
    abi_version: u32,
}

impl Sealed {
    /// Kernel ABI version the restriction was built for.
    pub fn abi_version(&self) -> u32 {
        self.abi_version
    }
}

/// Landlock ABI version reported by the running kernel, 0 when unsupported.
pub fn detect_landlock_version() -> u32 {
    // SAFETY: with a null attribute pointer and size 0 this only queries the
    // ABI version; no memory is read or written.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_landlock_create_ruleset,
            std::ptr::null::<libc::c_void>(),
            0usize,
            LANDLOCK_CREATE_RULESET_VERSION,
        )
    };
    u32::try_from(ret).unwrap_or(0)
}

/// Map a kernel ABI version to the crate's ABI, capped at the highest one the
/// crate knows.
pub fn abi_for_version(version: u32) -> Option<ABI> {
    match version {
        0 => None,
        1 => Some(ABI::V1),
        2 => Some(ABI::V2),
        3 => Some(ABI::V3),
        4 => Some(ABI::V4),
        _ => Some(ABI::V5),
    }
}

/// The part of `access` the ruleset can actually enforce.
fn effective_access(access: BitFlags<AccessFs>, handled: BitFlags<AccessFs>) -> BitFlags<AccessFs> {
    access & handled
}

/// Restrict the current process to `rules`.
///
/// # Panics
///
/// When called a second time in the same process.
pub fn seal(rules: &[Rule]) -> Result<Sealed, SealError> {
    let version = detect_landlock_version();
    let abi = abi_for_version(version).ok_or_else(|| {
        SealError::Enforcement("Landlock is not supported by the running kernel".to_string())
    })?;
    claim_once();
    debug!(abi = version, "building Landlock ruleset");

    let handled = AccessFs::from_all(abi);
    let mut ruleset = Ruleset::default()
        .handle_access(handled)
        .map_err(enforcement)?
        .create()
        .map_err(enforcement)?;

    for rule in rules {
        let access = effective_access(rule.access(), handled);
        if access.is_empty() {
            warn!(rule = %rule, "no access right of this rule is supported by the kernel, skipping");
            continue;
        }
        for path in &rule.paths {
            let fd = PathFd::new(path).map_err(|e| {
                SealError::Enforcement(format!("cannot open '{}': {e}", path.display()))
            })?;
            (&mut ruleset)
                .add_rule(PathBeneath::new(fd, access))
                .map_err(enforcement)?;
        }
    }

    let status = ruleset.restrict_self().map_err(enforcement)?;
    match status.ruleset {
        RulesetStatus::FullyEnforced => {}
        RulesetStatus::PartiallyEnforced => {
            warn!(abi = version, "Landlock ruleset only partially enforced");
        }
        RulesetStatus::NotEnforced => {
            return Err(SealError::Enforcement(
                "Landlock ruleset not enforced by the kernel".to_string(),
            ));
        }
    }
    info!(abi = version, "landlock profile applied");

    Ok(Sealed {
        abi_version: version,
    })
}

fn claim_once() {
    if SEALED.swap(true, Ordering::SeqCst) {
        panic!("Landlock restriction requested twice in one process");
    }
}

fn enforcement(e: impl std::fmt::Display) -> SealError {
    SealError::Enforcement(e.to_string())
}
