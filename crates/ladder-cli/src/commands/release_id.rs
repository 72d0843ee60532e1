use std::path::Path;

use anyhow::Context;
use ladder_core::{LadderConfig, ReleaseId};

pub fn release_id(branch: &str, artifact: Option<&str>, config: &Path) -> anyhow::Result<()> {
    println!("{}", derive(branch, artifact, config)?);
    Ok(())
}

fn derive(branch: &str, artifact: Option<&str>, config: &Path) -> anyhow::Result<ReleaseId> {
    let artifact = match artifact {
        Some(a) => a.to_string(),
        None => {
            LadderConfig::from_file(config)
                .with_context(|| format!("no --artifact given and {} is unreadable", config.display()))?
                .pipeline
                .artifact
        }
    };
    Ok(ReleaseId::derive(&artifact, branch)?)
}
