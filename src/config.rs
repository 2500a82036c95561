pub use config::Config;
pub use once_cell::sync::OnceCell;
use std::error::Error;

use serde::Deserialize;

static GLOBAL_CONFIG: OnceCell<Config> = OnceCell::new();

pub fn init_global_config() -> Result<(), Box<dyn Error>> {
    let config = Config::builder()
        .add_source(config::File::with_name("config.toml"))
        .build()?;
    GLOBAL_CONFIG
        .set(config)
        .map_err(|_| "Config already set")?;
    Ok(())
}

pub fn get_global_config() -> &'static Config {
    GLOBAL_CONFIG.get().unwrap_or_else(|| {
        eprintln!("FATAL: Config not initialized - call init_global_config() first");
        std::process::exit(1);
    })
}

/// Load config for standalone binaries/utilities
pub fn load_config() -> Result<Config, Box<dyn Error>> {
    Config::builder()
        .add_source(config::File::with_name("config.toml"))
        .build()
        .map_err(|e| Box::new(e) as Box<dyn Error>)
}

/// The `[reader]` table: everything the core's `Reader` needs to boot,
/// independent of whichever `ChainSource` the caller wires in.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaderSettings {
    pub start_at_block: i64,
    pub only_irreversible: bool,
    pub max_history_length: usize,
    pub prefetch_concurrency: usize,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            start_at_block: 1,
            only_irreversible: false,
            max_history_length: 600,
            prefetch_concurrency: crate::reader::DEFAULT_PREFETCH_CONCURRENCY,
        }
    }
}

/// Get the `[reader]` settings table from a loaded config, falling back to
/// defaults for any field the config file doesn't set.
pub fn get_reader_settings(config: &Config) -> Result<ReaderSettings, Box<dyn Error>> {
    match config.get_table("reader") {
        Ok(_) => config
            .clone()
            .try_deserialize::<ReaderSettingsWrapper>()
            .map(|w| w.reader)
            .map_err(|e| format!("invalid [reader] settings: {}", e).into()),
        Err(_) => Ok(ReaderSettings::default()),
    }
}

#[derive(Debug, Deserialize)]
struct ReaderSettingsWrapper {
    #[serde(default)]
    reader: ReaderSettings,
}
