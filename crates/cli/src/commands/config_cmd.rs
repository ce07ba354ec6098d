//! `loopgate config`: print the effective configuration.

use loopgate_config::LoopgateConfig;

pub fn show(config: &LoopgateConfig, path: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path {
        println!("{}", LoopgateConfig::config_dir().join("config.toml").display());
        return Ok(());
    }
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
