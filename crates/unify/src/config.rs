use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{IoContext, Result, UnifyError};
use crate::resources::normalize_path;

pub const CONFIG_FILE_NAME: &str = "unify.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailOn {
    #[default]
    None,
    Warning,
    Error,
}

impl FailOn {
    pub fn promotes_recoverable(self) -> bool {
        !matches!(self, FailOn::None)
    }

    pub fn is_fail_fast(self) -> bool {
        matches!(self, FailOn::Error)
    }
}

/// Immutable build settings, threaded by reference through the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub source: PathBuf,
    pub output: PathBuf,
    pub layouts_dir: PathBuf,
    pub components_dir: PathBuf,
    pub default_layout: PathBuf,
    pub layout_filename: String,
    pub max_depth: usize,
    pub pretty_urls: bool,
    pub minify: bool,
    pub cache: bool,
    pub cache_dir: PathBuf,
    pub fail_on: FailOn,
    pub missing_include_placeholder: bool,
    pub template_variables: bool,
    pub always_copy: Vec<PathBuf>,
    pub copy: Vec<String>,
    pub ignore: Vec<String>,
    pub render: Vec<String>,
    pub clean: bool,
}

pub fn default_max_depth() -> usize {
    10
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("src"),
            output: PathBuf::from("dist"),
            layouts_dir: PathBuf::from(".layouts"),
            components_dir: PathBuf::from(".components"),
            default_layout: PathBuf::from("default.html"),
            layout_filename: "_layout.html".to_string(),
            max_depth: default_max_depth(),
            pretty_urls: false,
            minify: false,
            cache: true,
            cache_dir: PathBuf::from(".unify-cache"),
            fail_on: FailOn::None,
            missing_include_placeholder: true,
            template_variables: true,
            always_copy: Vec::new(),
            copy: Vec::new(),
            ignore: Vec::new(),
            render: Vec::new(),
            clean: false,
        }
    }
}

impl BuildConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path).io_context("reading config", config_path)?;
        toml::from_str(&content).map_err(|error| UnifyError::TomlParse {
            path: config_path.to_path_buf(),
            message: error.to_string(),
        })
    }

    /// Anchors relative `source`, `output` and `cache_dir` at `base_dir` and
    /// checks that the source root exists.
    pub fn resolve(mut self, base_dir: &Path) -> Result<Self> {
        let source = normalize_path(&base_dir.join(&self.source));
        if !source.is_dir() {
            return Err(UnifyError::SourceRootMissing { path: source });
        }
        self.source = source
            .canonicalize()
            .io_context("resolving source directory", &source)?;

        let output = normalize_path(&base_dir.join(&self.output));
        self.output = match output.canonicalize() {
            Ok(canonical) => canonical,
            Err(_) => output,
        };
        self.cache_dir = normalize_path(&base_dir.join(&self.cache_dir));

        if self.output == self.source {
            return Err(UnifyError::InvalidConfig {
                message: "output directory must differ from the source directory".to_string(),
            });
        }
        if self.max_depth == 0 {
            return Err(UnifyError::InvalidConfig {
                message: "max_depth must be at least 1".to_string(),
            });
        }

        Ok(self)
    }

    pub fn source_root(&self) -> &Path {
        &self.source
    }

    pub fn layouts_root(&self) -> PathBuf {
        self.source.join(&self.layouts_dir)
    }

    pub fn default_layout_path(&self) -> PathBuf {
        self.layouts_root().join(&self.default_layout)
    }

    /// Digest of every setting that shapes emitted output. Cached state
    /// recorded under another digest is discarded.
    pub fn fingerprint(&self) -> String {
        let settings = Self {
            cache: true,
            clean: false,
            cache_dir: PathBuf::new(),
            ..self.clone()
        };
        serde_json::to_vec(&settings)
            .map(|bytes| crate::cache::content_hash(&bytes))
            .unwrap_or_default()
    }

    pub fn cache_file(&self) -> PathBuf {
        self.cache_dir.join(crate::cache::CACHE_FILE_NAME)
    }

    pub fn is_always_copy(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.source).unwrap_or(path);
        self.always_copy
            .iter()
            .any(|prefix| relative.starts_with(prefix))
    }

    pub fn relative_to_source<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.source).unwrap_or(path)
    }
}
