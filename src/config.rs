use std::{ffi::OsString, path::{Path, PathBuf}, time::Duration};
use confique::{serde::{self, Deserialize as _}, Config as _};

use crate::{
    driver::DriverConfig,
    log::LogConfig,
    prelude::*,
    scenario::ScenarioConfig,
    thresholds::ThresholdConfig,
};


/// Env variable that can hold the path to the config file.
pub const CONFIG_PATH_ENV: &str = "STAMPEDE_CONFIG_PATH";

/// Locations that are checked, in order, if no path was given explicitly.
const DEFAULT_PATHS: &[&str] = &["stampede.toml", "/etc/stampede/config.toml"];


/// Loads the configuration. If `path` is `None`, the env variable and the
/// default locations are checked. If none of those exist, the built-in
/// defaults are used, which describe the standard voting scenario. Also
/// returns the path of the file that was loaded, if any.
pub fn load(path: Option<&Path>) -> Result<(Config, Option<PathBuf>)> {
    let path = match path {
        Some(p) => Some(p.to_owned()),
        None => find_config_file(std::env::var_os(CONFIG_PATH_ENV), DEFAULT_PATHS),
    };
    load_file(path)
}

fn load_file(path: Option<PathBuf>) -> Result<(Config, Option<PathBuf>)> {
    let mut builder = Config::builder();
    if let Some(path) = &path {
        if !path.exists() {
            bail!("config file '{}' does not exist", path.display());
        }
        builder = builder.file(path);
    }

    let config = builder.load().with_context(|| match &path {
        Some(path) => format!("failed to load configuration from '{}'", path.display()),
        None => "failed to load default configuration".into(),
    })?;
    Ok((config, path))
}

/// The path from the env variable wins, even if that file does not exist.
/// Otherwise the first existing default path is used.
fn find_config_file(from_env: Option<OsString>, defaults: &[&str]) -> Option<PathBuf> {
    if let Some(path) = from_env {
        return Some(path.into());
    }

    defaults.iter().map(PathBuf::from).find(|p| p.exists())
}

pub fn template() -> String {
    let mut options = confique::toml::FormatOptions::default();
    options.general.nested_field_gap = 2;
    confique::toml::template::<Config>(options)
}

#[derive(Debug, confique::Config)]
pub struct Config {
    #[config(nested)]
    pub driver: DriverConfig,

    #[config(nested)]
    pub scenario: ScenarioConfig,

    #[config(nested)]
    pub thresholds: ThresholdConfig,

    #[config(nested)]
    pub log: LogConfig,
}



pub fn validate_unique<T: std::hash::Hash + Eq>(list: &[T]) -> Result<(), &'static str> {
    if <std::collections::HashSet<_>>::from_iter(list).len() != list.len() {
        return Err("duplicate entries");
    }
    Ok(())
}

pub fn validate_not_empty<T>(list: &[T]) -> Result<(), &'static str> {
    if list.is_empty() {
        return Err("must not be empty");
    }
    Ok(())
}


/// Custom format for durations. We allow a couple useful units and required
/// a unit to increase readability of config files.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(D::Error::custom)
}

pub fn parse_duration(s: &str) -> Result<Duration, String> {
    // Allow unit-less zeroes
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let start_unit = s.find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| "no time unit for duration".to_owned())?;
    let (num, unit) = s.split_at(start_unit);
    let num: u32 = num.parse()
        .map_err(|e| format!("invalid integer for duration: {}", e))?;
    let num: u64 = num.into();

    match unit {
        "ms" => Ok(Duration::from_millis(num)),
        "s" => Ok(Duration::from_secs(num)),
        "m" | "min" => Ok(Duration::from_secs(num * 60)),
        "h" => Ok(Duration::from_secs(num * 60 * 60)),
        "d" => Ok(Duration::from_secs(num * 60 * 60 * 24)),
        _ => Err("invalid unit of time for duration".into()),
    }
}
