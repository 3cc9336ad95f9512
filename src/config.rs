use config::{Config, ConfigError, Environment, File, FileFormat};
use sonar_cycle::Settings;
use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Load settings from `config/default.toml`, then `SONAR__*` environment
/// overrides (e.g. `SONAR__TIMING__CYCLE_PAUSE_MS=500`). A missing file
/// leaves the built-in defaults in place.
pub fn load_settings() -> Result<Settings, ConfigError> {
    info!("Attempting to load configuration from {}", DEFAULT_CONFIG_PATH);

    let settings = Config::builder()
        .add_source(File::new(DEFAULT_CONFIG_PATH, FileFormat::Toml).required(false))
        .add_source(Environment::with_prefix("SONAR").separator("__").try_parsing(true))
        .build()
        .and_then(|config| config.try_deserialize::<Settings>());

    match settings {
        Ok(settings) => {
            info!("Successfully loaded configuration: {:?}", settings);
            Ok(settings)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
fn settings_from_toml(source: &str) -> Result<Settings, ConfigError> {
    Config::builder()
        .add_source(File::from_str(source, FileFormat::Toml))
        .build()?
        .try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonar_cycle::hal::WallTime;

    #[test]
    fn test_empty_file_gives_defaults() {
        let settings = settings_from_toml("").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_partial_override() {
        let settings = settings_from_toml(
            r#"
            [timing]
            cycle_pause_ms = 250

            [clock]
            start = "08:00:30"
            "#,
        )
        .unwrap();
        assert_eq!(settings.timing.cycle_pause_ms, 250);
        assert_eq!(settings.timing.echo_timeout_ms, 30);
        assert_eq!(settings.clock.start, WallTime::new(8, 0, 30).unwrap());
        assert_eq!(settings.sensors, Settings::default().sensors);
    }

    #[test]
    fn test_sensor_table() {
        let settings = settings_from_toml(
            r#"
            [[sensors]]
            trigger_pin = 2
            echo_pin = 3
            simulated_cm = 75

            [[sensors]]
            trigger_pin = 4
            echo_pin = 5
            "#,
        )
        .unwrap();
        assert_eq!(settings.sensors[0].trigger_pin, 2);
        assert_eq!(settings.sensors[0].simulated_cm, Some(75));
        assert_eq!(settings.sensors[1].echo_pin, 5);
        assert_eq!(settings.sensors[1].simulated_cm, None);
    }

    #[test]
    fn test_bad_clock_is_rejected() {
        let result = settings_from_toml(
            r#"
            [clock]
            start = "25:00:00"
            "#,
        );
        assert!(result.is_err());
    }
}
