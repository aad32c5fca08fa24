//! A thin `figment`-based config loader: a TOML file overlaid with
//! environment variables (`CLOUDAI__` prefix, `__` nesting separator), the
//! same two-source shape the teacher's `golem_common::config::ConfigLoader`
//! uses, generalized to any `Default + Deserialize` config struct.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;

pub struct ConfigLoader<T> {
    pub config_file_name: PathBuf,
    _marker: std::marker::PhantomData<T>,
}

impl<T> ConfigLoader<T>
where
    T: Default + Serialize + DeserializeOwned,
{
    pub fn new(config_file_name: PathBuf) -> Self {
        ConfigLoader {
            config_file_name,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn new_with_examples() -> Self {
        Self::new(PathBuf::from("config/cloudai.toml"))
    }

    /// Loads `T`'s defaults, merges the TOML file if present, then
    /// environment overrides. Never panics on a missing file: an absent
    /// config file is equivalent to defaults-only.
    pub fn load(&self) -> figment::Result<T> {
        Figment::from(Serialized::defaults(T::default()))
            .merge(Toml::file(&self.config_file_name))
            .merge(Env::prefixed("CLOUDAI__").split("__"))
            .extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use test_r::test;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Sample {
        http_port: u16,
        name: String,
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let loader: ConfigLoader<Sample> =
            ConfigLoader::new(PathBuf::from("/nonexistent/cloudai-test.toml"));
        let config = loader.load().unwrap();
        assert_eq!(config, Sample::default());
    }

    #[test]
    fn env_override_beats_default() {
        std::env::set_var("CLOUDAI__HTTP_PORT", "9090");
        let loader: ConfigLoader<Sample> =
            ConfigLoader::new(PathBuf::from("/nonexistent/cloudai-test-2.toml"));
        let config = loader.load().unwrap();
        assert_eq!(config.http_port, 9090);
        std::env::remove_var("CLOUDAI__HTTP_PORT");
    }
}
