use anyhow::{Context, Result};
use clap::Args;
use std::io::Read;
use std::path::{Path, PathBuf};

use podlock::config::Config;
use podlock::mutator::{Container, FilePolicyStore, Plugin, PodSandbox};

#[derive(Args, Debug)]
pub struct ContainerArgs {
    /// Pod metadata as JSON ({id, name, namespace, labels}); `-` reads stdin
    #[arg(long, value_name = "FILE")]
    pub pod: PathBuf,

    /// Container name
    #[arg(long)]
    pub container: String,
}

fn read_pod(path: &Path) -> Result<PodSandbox> {
    let data = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read pod from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pod file {}", path.display()))?
    };
    serde_json::from_str(&data).context("Invalid pod JSON")
}

fn plugin(config: &Config) -> Plugin<FilePolicyStore> {
    Plugin::new(
        FilePolicyStore::new(&config.policy.dir),
        config.host_layout(),
        config.seal.log_level.clone(),
        config.policy_timeout(),
    )
}

fn container(args: &ContainerArgs) -> Container {
    Container {
        id: String::new(),
        name: args.container.clone(),
    }
}

/// Prints the adjustment, or `null` when the container is not sandboxed.
pub async fn create(args: ContainerArgs, config: &Config) -> Result<()> {
    let pod = read_pod(&args.pod)?;
    let adjustment = plugin(config)
        .create_container(&pod, &container(&args))
        .await?;

    println!("{}", serde_json::to_string_pretty(&adjustment)?);
    Ok(())
}

pub async fn remove(args: ContainerArgs, config: &Config) -> Result<()> {
    let pod = read_pod(&args.pod)?;
    plugin(config)
        .remove_container(&pod, &container(&args))
        .await?;
    Ok(())
}
