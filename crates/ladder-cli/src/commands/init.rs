use std::path::Path;

use ladder_core::LadderConfig;

pub fn init(artifact: &str, path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let config = LadderConfig::scaffold(artifact);
    config.validate()?;
    std::fs::write(path, config.to_toml_string()?)?;
    println!("✓ Generated {}", path.display());
    Ok(())
}
