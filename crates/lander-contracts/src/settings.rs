use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const THEME_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub favorite_countries: Vec<String>,
    pub theme_history: Vec<String>,
    pub last_save_path: Option<PathBuf>,
}

/// User settings persisted as JSON in the home directory.
///
/// Read once at startup and rewritten on every mutation. Only the keys a
/// mutation touched are written back over the on-disk object, so two
/// processes editing different keys don't clobber each other.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    settings: Settings,
    dirty_keys: Vec<&'static str>,
}

impl SettingsStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = read_json_object(&path)
            .and_then(|object| serde_json::from_value(Value::Object(object)).ok())
            .unwrap_or_default();
        Self {
            path,
            settings,
            dirty_keys: Vec::new(),
        }
    }

    /// `~/.lander/settings.json`, or `None` when no home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".lander").join("settings.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn add_favorite_country(&mut self, country: &str) -> anyhow::Result<bool> {
        let country = country.trim();
        if country.is_empty()
            || self
                .settings
                .favorite_countries
                .iter()
                .any(|existing| existing.eq_ignore_ascii_case(country))
        {
            return Ok(false);
        }
        self.settings.favorite_countries.push(country.to_string());
        self.mark("favorite_countries");
        self.flush()?;
        Ok(true)
    }

    pub fn remove_favorite_country(&mut self, country: &str) -> anyhow::Result<bool> {
        let before = self.settings.favorite_countries.len();
        self.settings
            .favorite_countries
            .retain(|existing| !existing.eq_ignore_ascii_case(country.trim()));
        if self.settings.favorite_countries.len() == before {
            return Ok(false);
        }
        self.mark("favorite_countries");
        self.flush()?;
        Ok(true)
    }

    /// Moves `theme` to the front of the history, capped at [`THEME_HISTORY_LIMIT`].
    pub fn record_theme(&mut self, theme: &str) -> anyhow::Result<()> {
        let theme = theme.trim();
        if theme.is_empty() {
            return Ok(());
        }
        self.settings
            .theme_history
            .retain(|existing| existing != theme);
        self.settings.theme_history.insert(0, theme.to_string());
        self.settings.theme_history.truncate(THEME_HISTORY_LIMIT);
        self.mark("theme_history");
        self.flush()
    }

    pub fn clear_theme_history(&mut self) -> anyhow::Result<()> {
        self.settings.theme_history.clear();
        self.mark("theme_history");
        self.flush()
    }

    pub fn set_last_save_path(&mut self, path: &Path) -> anyhow::Result<()> {
        if self.settings.last_save_path.as_deref() == Some(path) {
            return Ok(());
        }
        self.settings.last_save_path = Some(path.to_path_buf());
        self.mark("last_save_path");
        self.flush()
    }

    fn mark(&mut self, key: &'static str) {
        if !self.dirty_keys.contains(&key) {
            self.dirty_keys.push(key);
        }
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        if self.dirty_keys.is_empty() {
            return Ok(());
        }
        let current = match serde_json::to_value(&self.settings)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let mut on_disk = read_json_object(&self.path).unwrap_or_default();
        for key in &self.dirty_keys {
            if let Some(value) = current.get(*key) {
                on_disk.insert((*key).to_string(), value.clone());
            }
        }
        write_json_object(&self.path, &on_disk)?;
        if let Ok(merged) = serde_json::from_value(Value::Object(on_disk)) {
            self.settings = merged;
        }
        self.dirty_keys.clear();
        Ok(())
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    Ok(())
}
