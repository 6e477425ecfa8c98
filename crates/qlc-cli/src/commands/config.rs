//! Configuration loading and management commands

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use config::{ConfigBuilder, Environment, File};

use qlc_core::SimulationConfig;

const CONFIG_FILE: &str = "qlc.toml";

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show {
        /// Print as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
    /// Write a configuration file holding the defaults
    Init {
        /// Destination file
        #[arg(short, long, default_value = CONFIG_FILE)]
        output: PathBuf,
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

/// Effective configuration and the file it was read from, if any
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: SimulationConfig,
    pub source: Option<PathBuf>,
}

pub async fn run(cmd: ConfigCommands, loaded: &LoadedConfig) -> Result<()> {
    match cmd {
        ConfigCommands::Show { json } => show(loaded, json),
        ConfigCommands::Init { output, force } => init(&output, force),
    }
}

/// Defaults, then the config file, then `QLC__SECTION__KEY` variables
pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let source = find_config_file(explicit)?;
    let config = build(source.as_deref())?;
    Ok(LoadedConfig { config, source })
}

fn build(path: Option<&Path>) -> Result<SimulationConfig> {
    let mut builder = ConfigBuilder::<config::builder::DefaultState>::default();

    if let Some(path) = path {
        builder = builder.add_source(File::from(path.to_path_buf()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("QLC")
            .separator("__")
            .try_parsing(true),
    );

    builder
        .build()?
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

/// Check in order: `--config`, `QLC_CONFIG` env, `./qlc.toml`, `~/.config/qlc/qlc.toml`
fn find_config_file(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            bail!("Config file not found: {}", path.display());
        }
        return Ok(Some(path.to_path_buf()));
    }

    if let Ok(path) = std::env::var("QLC_CONFIG") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        return Ok(Some(local));
    }

    if let Some(home) = dirs::home_dir() {
        let user_config = home.join(".config").join("qlc").join(CONFIG_FILE);
        if user_config.exists() {
            return Ok(Some(user_config));
        }
    }

    Ok(None)
}

fn show(loaded: &LoadedConfig, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&loaded.config)?);
        return Ok(());
    }

    println!("Current Configuration");
    println!("=====================\n");
    match &loaded.source {
        Some(path) => println!("Config file: {}\n", path.display()),
        None => println!("No configuration file found. Using defaults.\n"),
    }
    println!("{}", toml::to_string_pretty(&loaded.config)?);

    if let Err(e) = loaded.config.validate() {
        println!("Warning: {e}");
    }
    Ok(())
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        println!("Configuration file already exists: {}", path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    write_defaults(path)?;
    println!("Configuration file created: {}", path.display());
    Ok(())
}

fn write_defaults(path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(&SimulationConfig::default())
        .context("Failed to render default configuration")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use qlc_core::{Algorithm, GridCoordinate};

    #[test]
    fn test_file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qlc.toml");
        std::fs::write(
            &path,
            r#"
[grid]
rows = 4
cols = 6
goals = [{ row = 3, col = 5 }]

[training]
algorithm = "heuristic"
agents = 2
seed = 9

[agent]
epsilon_decay = 0.9
"#,
        )
        .unwrap();

        let config = build(Some(&path)).unwrap();
        assert_eq!(config.grid.rows, 4);
        assert_eq!(config.grid.cols, 6);
        assert_eq!(config.grid.goals, vec![GridCoordinate::new(3, 5)]);
        assert_eq!(config.training.algorithm, Algorithm::Heuristic);
        assert_eq!(config.training.agents, 2);
        assert_eq!(config.training.seed, Some(9));
        assert!((config.agent.epsilon_decay - 0.9).abs() < 1e-6);

        // Untouched sections keep their defaults
        let defaults = SimulationConfig::default();
        assert_eq!(config.rewards, defaults.rewards);
        assert_eq!(config.training.episodes, defaults.training.episodes);
    }

    #[test]
    fn test_init_writes_loadable_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qlc.toml");

        init(&path, false).unwrap();
        let config = build(Some(&path)).unwrap();
        assert_eq!(config, SimulationConfig::default());
    }

    #[test]
    fn test_init_keeps_existing_file_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qlc.toml");
        std::fs::write(&path, "[grid]\nrows = 3\n").unwrap();

        init(&path, false).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[grid]\nrows = 3\n");

        init(&path, true).unwrap();
        assert_eq!(build(Some(&path)).unwrap().grid.rows, 8);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(find_config_file(Some(&missing)).is_err());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qlc.toml");
        std::fs::write(&path, "[training]\nalgorithm = \"sarsa\"\n").unwrap();

        assert!(build(Some(&path)).is_err());
    }
}
