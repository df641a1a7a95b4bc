use log::warn;
use shared::AppConfig;
use std::path::PathBuf;

pub const CONFIG_FILE_NAME: &str = ".molvista";

fn config_file_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }
    match dirs::home_dir() {
        Some(home) => {
            let in_home = home.join(CONFIG_FILE_NAME);
            if in_home.exists() { in_home } else { local }
        }
        None => local,
    }
}

/// Load the config dotfile, creating it with defaults when missing. Loaded
/// configs are validated and migrated in place; applied fixes are persisted
/// and returned as warnings.
pub fn load_or_default() -> (AppConfig, Vec<String>) {
    let path = config_file_path();
    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str::<AppConfig>(&content) {
            Ok(mut config) => {
                let warnings = config.validate_and_fix();
                if !warnings.is_empty() {
                    if let Err(err) = save_config_to_file(&config) {
                        warn!("migrated config could not be saved: {err}");
                    }
                }
                (config, warnings)
            }
            Err(err) => {
                let warning = format!("failed to parse {}: {err}", path.display());
                warn!("{warning}");
                (AppConfig::default(), vec![warning])
            }
        },
        Err(_) => {
            let mut config = AppConfig::default();
            let _ = config.validate_and_fix();
            if let Err(err) = save_config_to_file(&config) {
                warn!("failed to create default config: {err}");
            }
            (config, Vec::new())
        }
    }
}

pub fn save_config_to_file(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let toml_content = toml::to_string_pretty(config)?;

    let content_with_header = format!(
        "# molvista user configuration\n\
         # Streaming thresholds, timeouts, and viewer preferences\n\
         \n\
         {}",
        toml_content
    );

    std::fs::write(config_file_path(), content_with_header)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn default_config_round_trips_with_header() {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = env::temp_dir().join(format!("molvista_config_test_{suffix}"));
        fs::create_dir_all(&dir).unwrap();
        let previous = env::current_dir().unwrap();
        env::set_current_dir(&dir).unwrap();

        let (config, warnings) = load_or_default();
        assert_eq!(config, AppConfig::default());
        assert!(warnings.is_empty());

        let written = fs::read_to_string(CONFIG_FILE_NAME).unwrap();
        assert!(written.starts_with("# molvista user configuration"));
        let reparsed: AppConfig = toml::from_str(&written).unwrap();
        assert_eq!(reparsed, config);

        env::set_current_dir(previous).unwrap();
        fs::remove_dir_all(&dir).unwrap();
    }
}
