//! `{{Token}}` replacement for custom scripts
//!
//! Tokens are looked up case-insensitively among the configuration values.
//! Unknown tokens are left in place.

use crate::config::TidemarkConfig;
use anyhow::{anyhow, Result};
use regex::{Captures, Regex};
use std::collections::HashMap;

/// Token names and their values for the given configuration
pub fn token_values(config: &TidemarkConfig) -> HashMap<String, String> {
    let pairs = [
        ("DatabaseName", config.database_name.as_str()),
        ("ServerName", config.server_name.as_str()),
        ("ConnectionString", config.connection_string.as_str()),
        ("AdminConnectionString", config.admin_connection_string.as_str()),
        ("RepositoryPath", config.repository_path.as_str()),
        ("UserName", config.user_name.as_str()),
        ("Provider", config.provider.as_str()),
        ("DataDir", config.data_dir.as_str()),
    ];

    pairs
        .iter()
        .map(|(name, value)| (name.to_lowercase(), value.to_string()))
        .collect()
}

pub fn replace_tokens(text: &str, config: &TidemarkConfig) -> Result<String> {
    let token: Regex = Regex::new(r"\{\{(\w+)\}\}")
        .map_err(|e| anyhow!("Failed to create regex: {}", e))?;
    let values = token_values(config);

    let replaced = token.replace_all(text, |caps: &Captures| {
        match values.get(&caps[1].to_lowercase()) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        }
    });
    Ok(replaced.into_owned())
}
