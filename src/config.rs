//! Runtime settings read from built-in defaults, an optional `adhoc.toml` and
//! `ADHOC_*` environment variables, in that order of precedence (last wins).

use ::config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;
use crate::lifecycle::AD_HOC_PREFIX;
use crate::subject::PREVIEW_ROW_LIMIT;

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Settings {
    /// Path of the SQLite database, or `:memory:`.
    pub database: String,
    pub preview_row_limit: usize,
    pub ad_hoc_prefix: String,
    pub log_filter: String,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::load_from("adhoc")
    }

    /// Reads `<file_stem>.toml` (or any other format `config` recognizes) when present.
    pub fn load_from(file_stem: &str) -> Result<Self> {
        let settings = Config::builder()
            .set_default("database", "adhoc.db")?
            .set_default("preview_row_limit", PREVIEW_ROW_LIMIT as u64)?
            .set_default("ad_hoc_prefix", AD_HOC_PREFIX)?
            .set_default("log_filter", "info")?
            .add_source(File::with_name(file_stem).required(false))
            .add_source(Environment::with_prefix("ADHOC"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn in_memory(&self) -> bool {
        self.database == ":memory:"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_a_file() {
        let settings = Settings::load_from("no-such-adhoc-settings").expect("settings");
        assert_eq!(settings.preview_row_limit, 10);
        assert_eq!(settings.ad_hoc_prefix, AD_HOC_PREFIX);
    }
}
