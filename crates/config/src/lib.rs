//! # Configuration
//!
//! Settings are layered, later layers winning:
//!
//! 1. built-in defaults,
//! 2. a TOML file (given explicitly, else `<config dir>/newmonkey/config.toml`
//!    if it exists),
//! 3. `NEWMONKEY_*` environment variables, e.g. `NEWMONKEY_WORKERS=4`,
//! 4. command-line [`Overrides`].
//!
//! ```toml
//! output_dir = "/srv/discord-media"
//! content_types = ["image/*", "video/*"]
//! layout = "grouped"
//! workers = 8
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::BaseDirs;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use newmonkey_export::{ContentTypeFilter, Layout, Options, default_workers};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "NEWMONKEY_";
/// Relative to the working directory.
pub const DEFAULT_OUTPUT_DIR: &str = "newmonkey_output";
/// Selects every content type.
pub const ALL_CONTENT_TYPES: &str = "*/*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache directory; autodetected when unset.
    pub cache_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    /// Replace existing files instead of writing `name-2.ext`.
    pub overwrite: bool,
    /// `type/subtype` patterns to export.
    pub content_types: Vec<String>,
    /// Defaults to the number of available cores.
    pub workers: Option<usize>,
    pub layout: Layout,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: None,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            overwrite: false,
            content_types: vec!["image/*".to_string()],
            workers: None,
            layout: Layout::default(),
        }
    }
}

/// Values given on the command line. Unset fields leave lower layers alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overwrite: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
}

/// Where the configuration file lives unless one is given.
pub fn default_path() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.config_dir().join("newmonkey").join("config.toml"))
}

impl Config {
    /// Merge every layer into a [`Config`].
    ///
    /// An explicit `file` must exist; the default one is optional.
    pub fn load(file: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        match file {
            Some(path) => {
                if !path.is_file() {
                    exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
                }
                tracing::debug!(path = %path.display(), "loading configuration file");
                figment = figment.merge(Toml::file(path));
            },
            None => {
                if let Some(path) = default_path().filter(|path| path.is_file()) {
                    tracing::debug!(path = %path.display(), "loading configuration file");
                    figment = figment.merge(Toml::file(path));
                }
            },
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Serialized::defaults(overrides.clone()))
            .extract()
            .map_err(|err| ErrorKind::Load(err.to_string()).into())
    }

    /// Validate and convert into what the exporter consumes.
    pub fn options(&self) -> Result<Options> {
        let workers = match self.workers {
            None => default_workers(),
            Some(workers) => NonZeroUsize::new(workers)
                .ok_or_else(|| ErrorKind::Invalid("workers must be at least 1".to_string()))?,
        };
        Ok(Options { overwrite: self.overwrite, content_types: self.content_filter()?, workers, layout: self.layout })
    }

    fn content_filter(&self) -> Result<Option<ContentTypeFilter>> {
        if self.content_types.is_empty() {
            exn::bail!(ErrorKind::Invalid("no content types selected".to_string()));
        }
        if self.content_types.iter().any(|pattern| pattern.trim() == ALL_CONTENT_TYPES) {
            return Ok(None);
        }
        ContentTypeFilter::new(&self.content_types).map(Some).map_err(|err| {
            let message = (*err).to_string();
            err.raise(ErrorKind::Invalid(message))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("empty.toml", "")?;
            let config = Config::load(Some(Path::new("empty.toml")), &Overrides::default()).unwrap();
            assert_eq!(config, Config::default());
            let options = config.options().unwrap();
            assert_eq!(options.content_types, Some(ContentTypeFilter::images()));
            assert_eq!(options.layout, Layout::Flat);
            assert!(!options.overwrite);
            Ok(())
        });
    }

    #[test]
    fn test_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "newmonkey.toml",
                r#"
                    output_dir = "from-file"
                    workers = 2
                    layout = "grouped"
                    content_types = ["image/*", "video/mp4"]
                "#,
            )?;
            jail.set_env("NEWMONKEY_WORKERS", 3);
            jail.set_env("NEWMONKEY_OVERWRITE", true);
            let overrides = Overrides { output_dir: Some("from-cli".into()), ..Overrides::default() };
            let config = Config::load(Some(Path::new("newmonkey.toml")), &overrides).unwrap();

            assert_eq!(config.output_dir, PathBuf::from("from-cli"));
            assert_eq!(config.workers, Some(3));
            assert!(config.overwrite);
            assert_eq!(config.layout, Layout::Grouped);
            assert_eq!(config.content_types, vec!["image/*", "video/mp4"]);
            assert_eq!(config.cache_dir, None);
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file() {
        Jail::expect_with(|_| {
            let err = Config::load(Some(Path::new("nope.toml")), &Overrides::default()).unwrap_err();
            assert!(matches!(&*err, ErrorKind::NotFound(_)));
            Ok(())
        });
    }

    #[test]
    fn test_wrong_type() {
        Jail::expect_with(|jail| {
            jail.create_file("bad.toml", "workers = \"many\"")?;
            let err = Config::load(Some(Path::new("bad.toml")), &Overrides::default()).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Load(_)));
            Ok(())
        });
    }

    #[rstest]
    #[case(Config { workers: Some(0), ..Config::default() })]
    #[case(Config { content_types: vec![], ..Config::default() })]
    #[case(Config { content_types: vec!["image".into()], ..Config::default() })]
    #[case(Config { content_types: vec!["*/png".into()], ..Config::default() })]
    fn test_invalid(#[case] config: Config) {
        let err = config.options().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    #[test]
    fn test_everything_selected() {
        let config = Config {
            content_types: vec!["image/*".into(), "*/*".into()],
            workers: Some(5),
            ..Config::default()
        };
        let options = config.options().unwrap();
        assert_eq!(options.content_types, None);
        assert_eq!(options.workers.get(), 5);
    }
}
