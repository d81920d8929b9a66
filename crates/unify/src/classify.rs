use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path, PathBuf};

use crate::config::BuildConfig;
use crate::error::{Result, UnifyError};
use crate::resources::ResourceReader;
use crate::types::is_page_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileAction {
    /// Rendered page.
    Emit,
    /// Static file, copied when referenced or forced.
    Copy,
    /// Source-only file (partials, layouts, components, excluded globs).
    Ignore,
    /// Not a source file at all (output, cache, vcs metadata).
    Skip,
}

const SKIPPED_DIRS: &[&str] = &[".git", "node_modules"];

#[derive(Debug, Clone)]
pub struct FileClassifier {
    source: PathBuf,
    skipped: Vec<PathBuf>,
    render: GlobSet,
    copy: GlobSet,
    ignore: GlobSet,
}

fn compile(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|error| UnifyError::InvalidGlob {
            pattern: pattern.clone(),
            message: error.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|error| UnifyError::InvalidGlob {
        pattern: patterns.join(", "),
        message: error.to_string(),
    })
}

impl FileClassifier {
    pub fn new(config: &BuildConfig) -> Result<Self> {
        Ok(Self {
            source: config.source.clone(),
            skipped: vec![config.output.clone(), config.cache_dir.clone()],
            render: compile(&config.render)?,
            copy: compile(&config.copy)?,
            ignore: compile(&config.ignore)?,
        })
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.source)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    pub fn classify(&self, path: &Path) -> FileAction {
        if self.skipped.iter().any(|dir| path.starts_with(dir)) {
            return FileAction::Skip;
        }

        let relative = self.relative(path);
        if self.render.is_match(&relative) {
            return FileAction::Emit;
        }
        if self.copy.is_match(&relative) {
            return FileAction::Copy;
        }
        if self.ignore.is_match(&relative) {
            return FileAction::Ignore;
        }

        let components: Vec<String> = Path::new(&relative)
            .components()
            .filter_map(|component| match component {
                Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        if components
            .iter()
            .any(|name| SKIPPED_DIRS.contains(&name.as_str()))
        {
            return FileAction::Skip;
        }
        if components
            .iter()
            .any(|name| name.starts_with('_') || name.starts_with('.'))
        {
            return FileAction::Ignore;
        }

        if is_page_path(path) {
            FileAction::Emit
        } else {
            FileAction::Copy
        }
    }

    pub fn is_explicit_copy(&self, path: &Path) -> bool {
        self.copy.is_match(self.relative(path))
    }

    /// Every file under the source root with its action, skipped files left out.
    pub fn walk(&self, resources: &dyn ResourceReader) -> Result<Vec<(PathBuf, FileAction)>> {
        Ok(resources
            .list(&self.source)?
            .into_iter()
            .map(|path| {
                let action = self.classify(&path);
                (path, action)
            })
            .filter(|(_, action)| *action != FileAction::Skip)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::FsResources;
    use std::fs;
    use tempfile::TempDir;

    fn classifier(config: BuildConfig) -> FileClassifier {
        FileClassifier::new(&config).unwrap()
    }

    fn site_config() -> BuildConfig {
        BuildConfig {
            source: PathBuf::from("/site/src"),
            output: PathBuf::from("/site/dist"),
            cache_dir: PathBuf::from("/site/.unify-cache"),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_actions() {
        let classifier = classifier(site_config());
        assert_eq!(classifier.classify(Path::new("/site/src/index.html")), FileAction::Emit);
        assert_eq!(classifier.classify(Path::new("/site/src/blog/post.md")), FileAction::Emit);
        assert_eq!(classifier.classify(Path::new("/site/src/css/site.css")), FileAction::Copy);
        assert_eq!(
            classifier.classify(Path::new("/site/src/.components/nav.html")),
            FileAction::Ignore
        );
        assert_eq!(
            classifier.classify(Path::new("/site/src/blog/_layout.html")),
            FileAction::Ignore
        );
        assert_eq!(
            classifier.classify(Path::new("/site/src/node_modules/x/index.js")),
            FileAction::Skip
        );
    }

    #[test]
    fn test_output_directory_inside_source_is_skipped() {
        let classifier = classifier(BuildConfig {
            source: PathBuf::from("/site"),
            output: PathBuf::from("/site/dist"),
            cache_dir: PathBuf::from("/site/.unify-cache"),
            ..Default::default()
        });
        assert_eq!(classifier.classify(Path::new("/site/dist/index.html")), FileAction::Skip);
        assert_eq!(
            classifier.classify(Path::new("/site/.unify-cache/build-state.json")),
            FileAction::Skip
        );
    }

    #[test]
    fn test_explicit_globs_take_precedence() {
        let classifier = classifier(BuildConfig {
            render: vec!["_drafts/**".to_string()],
            copy: vec!["**/*.txt".to_string(), "raw/*.html".to_string()],
            ignore: vec!["**/*.psd".to_string(), "**/*.txt".to_string()],
            ..site_config()
        });

        assert_eq!(
            classifier.classify(Path::new("/site/src/_drafts/wip.md")),
            FileAction::Emit
        );
        assert_eq!(classifier.classify(Path::new("/site/src/notes.txt")), FileAction::Copy);
        assert_eq!(classifier.classify(Path::new("/site/src/raw/page.html")), FileAction::Copy);
        assert_eq!(classifier.classify(Path::new("/site/src/art/logo.psd")), FileAction::Ignore);
        assert!(classifier.is_explicit_copy(Path::new("/site/src/notes.txt")));
        assert!(!classifier.is_explicit_copy(Path::new("/site/src/index.html")));
    }

    #[test]
    fn test_invalid_glob_is_usage_error() {
        let error = FileClassifier::new(&BuildConfig {
            ignore: vec!["[".to_string()],
            ..site_config()
        })
        .unwrap_err();
        assert!(matches!(error, UnifyError::InvalidGlob { .. }));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_walk_lists_classified_files() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src");
        fs::create_dir_all(source.join(".layouts")).unwrap();
        fs::write(source.join("index.html"), "<h1>Hi</h1>").unwrap();
        fs::write(source.join("logo.png"), [0u8; 4]).unwrap();
        fs::write(source.join(".layouts/default.html"), "<html></html>").unwrap();

        let classifier = classifier(BuildConfig {
            source: source.clone(),
            output: dir.path().join("dist"),
            cache_dir: dir.path().join(".unify-cache"),
            ..Default::default()
        });
        let files = classifier.walk(&FsResources).unwrap();

        assert_eq!(files.len(), 3);
        assert!(files.contains(&(source.join("index.html"), FileAction::Emit)));
        assert!(files.contains(&(source.join("logo.png"), FileAction::Copy)));
        assert!(files.contains(&(source.join(".layouts/default.html"), FileAction::Ignore)));
    }
}
