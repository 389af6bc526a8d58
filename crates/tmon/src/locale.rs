//! Display language preference and its persisted store.
//!
//! The preference is the only state the client persists. It is stored under
//! the key `i18nextLng`, the same key the web dashboard uses, in
//! `<config_dir>/tmon/locale.json`.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::store::{Persistence, Store};

/// Storage key of the language preference.
pub const LOCALE_KEY: &str = "i18nextLng";

/// Environment variables consulted for the default, in priority order.
const LOCALE_ENV_VARS: [&str; 3] = ["LC_ALL", "LC_MESSAGES", "LANG"];

// ============================================================================
// Locale
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    Zh,
    En,
}

impl Locale {
    /// Fallback when neither storage nor the environment decide.
    pub const FALLBACK: Locale = Locale::Zh;

    pub fn code(&self) -> &'static str {
        match self {
            Self::Zh => "zh",
            Self::En => "en",
        }
    }

    /// Parses a stored language tag (`zh`, `zh-CN`, `en-US`, ...).
    pub fn from_tag(tag: &str) -> Option<Self> {
        let primary = tag
            .split(['-', '_', '.'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match primary.as_str() {
            "zh" => Some(Self::Zh),
            "en" => Some(Self::En),
            _ => None,
        }
    }

    /// Looks up a UI string.
    pub fn text(&self, key: Text) -> &'static str {
        let (zh, en) = key.strings();
        match self {
            Self::Zh => zh,
            Self::En => en,
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_tag(s).ok_or_else(|| format!("unsupported locale '{s}' (expected zh or en)"))
    }
}

/// Locale from the process environment, if any locale variable is set.
pub fn locale_from_env() -> Option<Locale> {
    locale_from_lookup(|key| std::env::var(key).ok())
}

/// First non-empty of `LC_ALL`, `LC_MESSAGES`, `LANG`: `zh*` is Chinese,
/// anything else English.
pub fn locale_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Locale> {
    LOCALE_ENV_VARS
        .iter()
        .filter_map(|key| lookup(key))
        .find(|value| !value.trim().is_empty())
        .map(|value| {
            if value.to_ascii_lowercase().starts_with("zh") {
                Locale::Zh
            } else {
                Locale::En
            }
        })
}

/// Default used when nothing usable is stored.
pub fn default_locale() -> Locale {
    locale_from_env().unwrap_or(Locale::FALLBACK)
}

// ============================================================================
// UI Strings
// ============================================================================

/// Keys of the strings the CLI renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Text {
    TaskTree,
    Id,
    Owner,
    Type,
    State,
    Elapsed,
    Retries,
    StopReason,
    NoTasks,
    History,
    Duration,
    Session,
    Page,
    TotalTasks,
    TotalDuration,
    AverageDuration,
    LastUpdated,
}

impl Text {
    fn strings(&self) -> (&'static str, &'static str) {
        match self {
            Self::TaskTree => ("任务树", "Task Tree"),
            Self::Id => ("ID", "ID"),
            Self::Owner => ("所有者", "Owner"),
            Self::Type => ("类型", "Type"),
            Self::State => ("状态", "State"),
            Self::Elapsed => ("运行时间", "Elapsed"),
            Self::Retries => ("重试", "Retries"),
            Self::StopReason => ("停止原因", "Stop reason"),
            Self::NoTasks => ("暂无任务", "No tasks"),
            Self::History => ("任务历史", "Task History"),
            Self::Duration => ("持续时间", "Duration"),
            Self::Session => ("会话", "Session"),
            Self::Page => ("页", "Page"),
            Self::TotalTasks => ("任务总数", "Total tasks"),
            Self::TotalDuration => ("总时长", "Total duration"),
            Self::AverageDuration => ("平均时长", "Average duration"),
            Self::LastUpdated => ("最后更新", "Last updated"),
        }
    }
}

// ============================================================================
// Persistence
// ============================================================================

/// Stores the locale as `{"i18nextLng": "<code>"}` in a JSON file.
///
/// Other keys in the file are preserved on save.
#[derive(Debug, Clone)]
pub struct FileLocalePersistence {
    path: PathBuf,
}

impl FileLocalePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config_dir>/tmon/locale.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tmon").join("locale.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl Persistence<Locale> for FileLocalePersistence {
    fn load(&self) -> Result<Option<Locale>> {
        let entries = self.read_entries()?;
        let locale = entries
            .get(LOCALE_KEY)
            .and_then(serde_json::Value::as_str)
            .and_then(Locale::from_tag);
        debug!(path = %self.path.display(), ?locale, "Loaded locale preference");
        Ok(locale)
    }

    fn save(&self, value: &Locale) -> Result<()> {
        // A corrupt file is overwritten rather than blocking the write.
        let mut entries = self.read_entries().unwrap_or_default();
        entries.insert(
            LOCALE_KEY.to_string(),
            serde_json::Value::String(value.code().to_string()),
        );

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&entries)?)?;
        Ok(())
    }
}

/// The locale preference store.
pub type LocaleStore = Store<Locale>;

/// Opens the locale store over `persistence`, defaulting from the
/// environment and then to [`Locale::FALLBACK`].
pub fn open_locale_store(persistence: impl Persistence<Locale> + 'static) -> LocaleStore {
    Store::init(persistence, default_locale)
}
