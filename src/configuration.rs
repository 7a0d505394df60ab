use config::{Config, ConfigError};
use serde::Deserialize;

#[derive(Deserialize, Debug)]
pub struct Settings {
    pub output_directory: String,
    pub series: Vec<Series>,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_headless")]
    pub headless: bool,
}

#[derive(Deserialize, Debug, PartialEq, Eq)]
pub struct Series {
    pub name: String,
    pub url: String,
}

fn default_workers() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_headless() -> bool {
    true
}

impl Settings {
    pub fn new(config_file: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(config::File::with_name(config_file))
            .build()?;
        builder.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config() {
        let c = Settings::new("manhwas.test.json").unwrap();

        assert_eq!("./test/manhwa", c.output_directory);
        assert_eq!(4, c.workers);
        assert_eq!(3, c.max_retries);
        assert!(c.headless);

        let series1 = Series {
            name: "Solo".into(),
            url: "https://toondex.net/manga/solo".into(),
        };
        let series2 = Series {
            name: "Second Life".into(),
            url: "https://toondex.net/manga/second-life".into(),
        };
        assert_eq!(vec![series1, series2], c.series);
    }

    #[test]
    fn missing_config_fails() {
        assert!(Settings::new("does-not-exist.json").is_err());
    }
}
