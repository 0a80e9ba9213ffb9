use anyhow::Result;

use podlock::config::Config;

#[cfg(target_os = "linux")]
fn landlock_version() -> u32 {
    podlock::seal::detect_landlock_version()
}

#[cfg(not(target_os = "linux"))]
fn landlock_version() -> u32 {
    0
}

fn status_lines(abi: u32, config: &Config) -> Vec<String> {
    let support = if abi == 0 {
        "not supported".to_string()
    } else {
        format!("ABI v{abi}")
    };

    vec![
        "Kernel:".to_string(),
        format!("  Landlock:      {support}"),
        String::new(),
        "Configuration:".to_string(),
        format!("  Runtime dir:   {}", config.runtime.dir.display()),
        format!("  Seal binary:   {}", config.binaries.seal.display()),
        format!("  Swap hook:     {}", config.binaries.swap_oci_hook.display()),
        format!("  Policy dir:    {}", config.policy.dir.display()),
        format!("  Store timeout: {}s", config.policy.timeout_secs),
        format!("  Seal log:      {}", config.seal.log_level),
    ]
}

pub fn run(config: &Config) -> Result<()> {
    for line in status_lines(landlock_version(), config) {
        println!("{line}");
    }
    Ok(())
}
