use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use dotenvy::dotenv;
use keyring::Entry;
use renderiq::transport::{DEFAULT_BASE_URL, DEFAULT_PLATFORM};
use renderiq::{ClientConfig, CredentialStore, RenderiqClient};
use serde::{Deserialize, Serialize};
use url::Url;

pub const KEYRING_SERVICE: &str = "riq-credentials";
pub const KEYRING_API_KEY: &str = "api-key";
pub const KEYRING_ACCESS_TOKEN: &str = "access-token";
pub const KEYRING_REFRESH_TOKEN: &str = "refresh-token";

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    pub base_url: Option<Url>,
    pub platform: Option<String>,
    pub plugin_version: Option<String>,
}

/// Read from `RENDERIQ_*` environment variables.
#[derive(Debug, Deserialize, Default)]
struct ConfigEnv {
    base_url: Option<Url>,
    platform: Option<String>,
    plugin_version: Option<String>,
    api_key: Option<String>,
    access_token: Option<String>,
}

pub struct Config {
    pub base_url: Url,
    pub platform: String,
    pub plugin_version: Option<String>,
    pub access_token: Option<String>,
    pub api_key: Option<String>,
}

impl Config {
    pub fn client(&self) -> Result<RenderiqClient> {
        let credentials =
            CredentialStore::from_parts(self.access_token.clone(), self.api_key.clone())
                .context("No credentials found: set RENDERIQ_API_KEY, run `riq set-api-key` or `riq signin`")?;
        let config = ClientConfig {
            base_url: self.base_url.clone(),
            platform: self.platform.clone(),
            plugin_version: self.plugin_version.clone(),
            ..ClientConfig::default()
        };
        Ok(RenderiqClient::new(config, credentials)?)
    }
}

fn merge_config<F>(base: ConfigFile, override_config: ConfigEnv, stored_secret: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let base_url = match override_config.base_url.or(base.base_url) {
        Some(url) => url,
        None => Url::parse(DEFAULT_BASE_URL)?,
    };
    let platform = override_config
        .platform
        .or(base.platform)
        .unwrap_or_else(|| DEFAULT_PLATFORM.to_string());
    let plugin_version = override_config.plugin_version.or(base.plugin_version);

    // Environment credentials replace stored ones wholesale so a key set for
    // one shell never mixes with a token stored by `riq signin`.
    let (access_token, api_key) =
        if override_config.access_token.is_some() || override_config.api_key.is_some() {
            (override_config.access_token, override_config.api_key)
        } else {
            (
                stored_secret(KEYRING_ACCESS_TOKEN),
                stored_secret(KEYRING_API_KEY),
            )
        };

    Ok(Config {
        base_url,
        platform,
        plugin_version,
        access_token,
        api_key,
    })
}

fn config_file_path() -> Result<PathBuf> {
    let project_dirs = directories::ProjectDirs::from("io", "renderiq", "riq")
        .ok_or(anyhow!("Unable to determine home directory"))?;
    Ok(project_dirs.config_dir().join("config.toml"))
}

pub fn read_config() -> Result<Config> {
    let _ = dotenv();
    let env_config = envy::prefixed("RENDERIQ_")
        .from_env::<ConfigEnv>()
        .unwrap_or_default();

    let file_config = if let Ok(config) = fs::read_to_string(config_file_path()?) {
        toml::from_str(&config).context("Failed to parse riq config file")?
    } else {
        ConfigFile::default()
    };

    merge_config(file_config, env_config, get_secret)
}

pub fn write_config(config: ConfigFile) -> Result<()> {
    let path = config_file_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create config directory")?;
    }
    let contents = toml::to_string_pretty(&config)?;
    fs::write(&path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn get_secret(user: &str) -> Option<String> {
    let entry = Entry::new(KEYRING_SERVICE, user).ok()?;
    let secret = entry.get_secret().ok()?;
    String::from_utf8(secret).ok()
}

pub fn set_secret(user: &str, secret: &str) -> Result<()> {
    let entry = Entry::new(KEYRING_SERVICE, user)?;
    entry.set_secret(secret.as_bytes())?;
    Ok(())
}

pub fn stored_refresh_token() -> Option<String> {
    get_secret(KEYRING_REFRESH_TOKEN)
}

pub fn set_api_key_keyring(api_key: String) -> Result<()> {
    set_secret(KEYRING_API_KEY, &api_key)?;
    println!("API key set for use with riq");
    Ok(())
}
