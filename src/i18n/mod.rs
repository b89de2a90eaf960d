//! Dictionary lookup for the site's two display languages.
//!
//! Keys are dotted paths into a nested JSON dictionary (`"hero.title"`,
//! `"palliativeCare.questions.0.answer"`). A key missing from the active
//! language falls back to English, then to the key itself.

use anyhow::{anyhow, Context, Result};
use clap::Args;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

const EN: &str = include_str!("../../locales/en.json");
const ML: &str = include_str!("../../locales/ml.json");

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Locale {
    #[default]
    En,
    Ml,
}

impl Locale {
    pub const ALL: [Locale; 2] = [Locale::En, Locale::Ml];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Ml => "ml",
        }
    }

    /// Name shown in the language switcher, written in the language itself.
    pub const fn display(self) -> &'static str {
        match self {
            Self::En => "English",
            Self::Ml => "മലയാളം",
        }
    }

    pub const fn toggle(self) -> Self {
        match self {
            Self::En => Self::Ml,
            Self::Ml => Self::En,
        }
    }

    /// Accepts region tags such as `en-IN` or `ml_IN`.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.split(['-', '_']).next().unwrap_or("") {
            "en" => Some(Self::En),
            "ml" => Some(Self::Ml),
            _ => None,
        }
    }

    /// Unset or unsupported settings fall back to English.
    pub fn from_setting(value: Option<&str>) -> Self {
        value.and_then(Self::parse).unwrap_or_default()
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Locale {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| anyhow!("Unsupported language: {}", s))
    }
}

#[derive(Debug, Clone)]
pub struct Dictionary {
    root: Value,
}

impl Dictionary {
    pub fn from_json(json: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(json).context("Failed to parse dictionary")?;
        if !root.is_object() {
            return Err(anyhow!("Dictionary root must be a JSON object"));
        }
        Ok(Self { root })
    }

    pub fn builtin(locale: Locale) -> Result<Self> {
        let json = match locale {
            Locale::En => EN,
            Locale::Ml => ML,
        };
        Self::from_json(json).with_context(|| format!("Bundled {} dictionary is invalid", locale))
    }

    pub fn lookup(&self, key: &str) -> Option<&Value> {
        key.split('.').try_fold(&self.root, |node, segment| match node {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.lookup(key).and_then(Value::as_str)
    }
}

pub struct I18n {
    language: Locale,
    active: Dictionary,
    fallback: Dictionary,
}

impl I18n {
    pub fn new(language: Locale) -> Result<Self> {
        Ok(Self {
            language,
            active: Dictionary::builtin(language)?,
            fallback: Dictionary::builtin(Locale::En)?,
        })
    }

    /// Starts in `DEFAULT_LOCALE` when it names a supported language.
    pub fn from_env() -> Result<Self> {
        let setting = std::env::var("DEFAULT_LOCALE").ok();
        Self::new(Locale::from_setting(setting.as_deref()))
    }

    pub fn language(&self) -> Locale {
        self.language
    }

    pub fn set_language(&mut self, language: Locale) -> Result<()> {
        if language != self.language {
            self.active = Dictionary::builtin(language)?;
            self.language = language;
        }
        Ok(())
    }

    pub fn toggle_language(&mut self) -> Result<Locale> {
        self.set_language(self.language.toggle())?;
        Ok(self.language)
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.active
            .lookup(key)
            .or_else(|| self.fallback.lookup(key))
    }

    pub fn t(&self, key: &str) -> String {
        match self.active.text(key).or_else(|| self.fallback.text(key)) {
            Some(text) => text.to_string(),
            None => {
                debug!("Missing {} translation for {}", self.language, key);
                key.to_string()
            }
        }
    }
}

#[derive(Args)]
pub struct TranslateArgs {
    /// Display language (en, ml); defaults to DEFAULT_LOCALE, then en
    #[arg(short, long)]
    pub lang: Option<Locale>,

    /// Dotted dictionary keys
    #[arg(required = true)]
    pub keys: Vec<String>,
}

pub fn run(args: TranslateArgs) -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let i18n = match args.lang {
        Some(lang) => I18n::new(lang)?,
        None => I18n::from_env()?,
    };
    for key in &args.keys {
        match i18n.value(key) {
            Some(Value::String(_)) | None => println!("{}\t{}", key, i18n.t(key)),
            Some(other) => println!("{}\t{}", key, serde_json::to_string(other)?),
        }
    }
    Ok(())
}
