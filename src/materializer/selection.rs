use thiserror::Error;

use crate::database::db_structs::ConfigSummary;

/// Name searched for when no configuration is given.
pub const DEFAULT_CONFIG_NAME: &str = "Season 3";

#[derive(Debug, Error, PartialEq)]
pub enum SelectionError {
    #[error("no configuration found matching name: {0}")]
    NoMatch(String),
    #[error("{count} configurations match '{name}', use a full --config-hash instead")]
    Ambiguous { name: String, count: usize }
}

/// Finds the single configuration whose name contains `name`, ignoring case.
pub fn find_by_name<'a>(configs: &'a [ConfigSummary], name: &str) -> Result<&'a ConfigSummary, SelectionError> {
    let needle = name.to_lowercase();
    let found: Vec<&ConfigSummary> = configs
        .iter()
        .filter(|c| c.name.to_lowercase().contains(&needle))
        .collect();

    match found.as_slice() {
        [single] => Ok(*single),
        [] => Err(SelectionError::NoMatch(name.to_string())),
        many => Err(SelectionError::Ambiguous {
            name: name.to_string(),
            count: many.len()
        })
    }
}

/// Finds the single configuration whose hash starts with `prefix`.
pub fn find_by_hash_prefix<'a>(
    configs: &'a [ConfigSummary],
    prefix: &str
) -> Result<&'a ConfigSummary, SelectionError> {
    let found: Vec<&ConfigSummary> = configs.iter().filter(|c| c.config_hash.starts_with(prefix)).collect();

    match found.as_slice() {
        [single] => Ok(*single),
        [] => Err(SelectionError::NoMatch(prefix.to_string())),
        many => Err(SelectionError::Ambiguous {
            name: prefix.to_string(),
            count: many.len()
        })
    }
}
