//! End-to-end builds against real temporary directories.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use unify_ssg::{BuildResult, ErrorKind, SiteBuilder};

struct TestSite {
    dir: TempDir,
}

impl TestSite {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        Self { dir }
    }

    fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join("src").join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn builder(&self) -> SiteBuilder {
        SiteBuilder::new(self.dir.path())
    }

    fn build(&self) -> BuildResult {
        self.builder().build().unwrap()
    }

    fn output(&self, relative: &str) -> PathBuf {
        self.dir.path().join("dist").join(relative)
    }

    fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.output(relative)).unwrap()
    }
}

fn all_files(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut files: Vec<(PathBuf, Vec<u8>)> = walkdir(root)
        .into_iter()
        .map(|path| {
            let content = fs::read(&path).unwrap();
            (path.strip_prefix(root).unwrap().to_path_buf(), content)
        })
        .collect();
    files.sort();
    files
}

fn walkdir(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for entry in fs::read_dir(root).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            found.extend(walkdir(&path));
        } else {
            found.push(path);
        }
    }
    found
}

#[test]
fn test_concrete_include_scenario() {
    let site = TestSite::new();
    site.write(
        "index.html",
        "<!--#include virtual=\"/.components/header.html\" --><p>Welcome</p>",
    );
    site.write(".components/header.html", "<header><!--#include file=\"nav.html\" --></header>");
    site.write(".components/nav.html", "<ul><li><a href=\"/\">Home</a></li></ul>");

    let mut session = site.builder().session().unwrap();
    let result = session.full_build().unwrap();
    assert!(result.is_success());

    let index = site.read("index.html");
    assert!(index.contains("<ul><li><a href=\"/\">Home</a></li></ul>"));
    assert!(!index.contains("<!--#include"));

    let nav = site.dir.path().join("src/.components/nav.html").canonicalize().unwrap();
    let affected = session.graph().affected_pages(&nav);
    let names: Vec<String> = affected
        .iter()
        .map(|page| page.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["index.html"]);
}

#[test]
fn test_include_closure_for_both_syntaxes() {
    let site = TestSite::new();
    site.write(".components/card.html", "<div class=\"card\"><slot></slot></div>");
    site.write(".components/badge.html", "<span>new</span>");
    site.write(
        "index.html",
        "<include src=\"/.components/card.html\"><!--#include virtual=\"/.components/badge.html\" --></include>",
    );

    site.build();
    let index = site.read("index.html");
    assert!(index.contains("<div class=\"card\"><span>new</span></div>"));
    assert!(!index.contains("<include"));
    assert!(!index.contains("#include"));
}

#[test]
fn test_cycle_is_reported_with_chain() {
    let site = TestSite::new();
    site.write("a.html", "<!--#include file=\"b.html\" -->");
    site.write("b.html", "<!--#include file=\"a.html\" -->");

    let result = site.build();
    let cycle = result
        .errors()
        .find(|issue| issue.path == Path::new("a.html"))
        .unwrap();
    assert_eq!(cycle.kind, ErrorKind::CircularDependency);
    assert!(cycle.message.contains("a.html → b.html → a.html"));
}

#[test]
fn test_slot_completeness() {
    let site = TestSite::new();
    site.write(
        ".components/panel.html",
        "<section><h2 data-slot=\"title\">Default title</h2><div data-slot=\"body\">Default body</div></section>",
    );
    site.write(
        "index.html",
        "<include src=\"/.components/panel.html\"><template data-slot=\"title\">Custom</template></include>",
    );

    site.build();
    let index = site.read("index.html");
    assert!(index.contains("<section>Custom<div>Default body</div></section>"));
    assert!(!index.contains("data-slot"));
}

#[test]
fn test_head_merge_determinism() {
    let site = TestSite::new();
    site.write(
        ".layouts/default.html",
        "<!DOCTYPE html><html><head><title>L</title><meta name=\"a\" content=\"1\"></head><body><main><slot></slot></main></body></html>",
    );
    site.write(
        "index.html",
        "<head><title>P</title><meta name=\"a\" content=\"2\"><meta name=\"b\" content=\"3\"></head><p>x</p>",
    );

    site.build();
    let index = site.read("index.html");
    assert_eq!(index.matches("<title>").count(), 1);
    assert!(index.contains("<title>P</title>"));
    assert_eq!(index.matches("name=\"a\"").count(), 1);
    assert!(index.contains("<meta name=\"a\" content=\"2\">"));
    assert!(index.contains("<meta name=\"b\" content=\"3\">"));
}

#[test]
fn test_styles_hoist_only_for_element_includes() {
    let site = TestSite::new();
    site.write(
        ".components/widget.html",
        "<style>.w{}</style><div class=\"w\">W</div><script>widget()</script>",
    );
    site.write(
        "dom.html",
        "<!DOCTYPE html><html><head></head><body><include src=\"/.components/widget.html\"></include><p>end</p></body></html>",
    );
    site.write(
        "ssi.html",
        "<!DOCTYPE html><html><head></head><body><!--#include virtual=\"/.components/widget.html\" --><p>end</p></body></html>",
    );

    site.build();
    let dom = site.read("dom.html");
    assert!(dom.contains("<head><style>.w{}</style></head>"));
    assert!(dom.contains("<p>end</p><script>widget()</script></body>"));

    let ssi = site.read("ssi.html");
    assert!(ssi.contains("<body><style>.w{}</style><div class=\"w\">W</div><script>widget()</script><p>end</p>"));
}

#[test]
fn test_asset_pruning() {
    let site = TestSite::new();
    site.write("index.html", "<link rel=\"stylesheet\" href=\"/css/site.css\"><img src=\"img/used.png\">");
    site.write("css/site.css", "body { background: url(../img/bg.png) } @font-face { src: url(/fonts/a.woff2) format(\"woff2\") }");
    site.write("img/used.png", "used");
    site.write("img/bg.png", "bg");
    site.write("img/orphan.png", "orphan");
    site.write("fonts/a.woff2", "font");
    site.write("downloads/keep.zip", "zip");
    fs::write(
        site.dir.path().join("unify.toml"),
        "always_copy = [\"downloads\"]\n",
    )
    .unwrap();

    site.build();
    assert!(site.output("css/site.css").is_file());
    assert!(site.output("img/used.png").is_file());
    assert!(site.output("img/bg.png").is_file());
    assert!(site.output("fonts/a.woff2").is_file());
    assert!(site.output("downloads/keep.zip").is_file());
    assert!(!site.output("img/orphan.png").exists());
}

#[test]
fn test_idempotent_second_build() {
    let site = TestSite::new();
    site.write(".layouts/default.html", "<html><head></head><body><slot></slot></body></html>");
    site.write("index.html", "<h1>Home</h1><img src=\"/logo.png\">");
    site.write("posts/hello.md", "---\ntitle: Hello\n---\n\nHi there.");
    site.write("logo.png", "logo");

    let first = site.build();
    assert_eq!(first.processed, 2);
    let before = all_files(&site.dir.path().join("dist"));

    let second = site.build();
    assert_eq!(second.processed, 0);
    assert_eq!(second.copied, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(all_files(&site.dir.path().join("dist")), before);
}

#[test]
fn test_pretty_urls_and_markdown_output() {
    let site = TestSite::new();
    site.write("about.md", "# About\n\nText.");
    site.write("index.html", "<p>home</p>");

    site.builder().pretty_urls(true).build().unwrap();
    assert!(site.output("about/index.html").is_file());
    assert!(site.output("index.html").is_file());
    assert!(site.read("about/index.html").contains("<h1>About</h1>"));
}

#[test]
fn test_minified_output() {
    let site = TestSite::new();
    site.write("index.html", "<main>\n    <p>Hello</p>\n    <!-- note -->\n</main>");

    site.builder().minify(true).build().unwrap();
    let index = site.read("index.html");
    assert!(!index.contains("note"));
    assert!(!index.contains("\n    "));
}

#[test]
fn test_missing_include_warns_and_build_succeeds() {
    let site = TestSite::new();
    site.write("index.html", "<!--#include file=\"nope.html\" --><p>x</p>");

    let result = site.build();
    assert!(result.is_success());
    assert_eq!(result.warnings().count(), 1);
    assert!(site.read("index.html").contains("<!-- include not found: nope.html -->"));
}

#[test]
fn test_fail_on_warning_turns_missing_include_into_error() {
    let site = TestSite::new();
    site.write("index.html", "<!--#include file=\"nope.html\" -->");
    site.write("ok.html", "<p>fine</p>");

    let result = site
        .builder()
        .fail_on(unify_ssg::FailOn::Warning)
        .build()
        .unwrap();
    assert!(result.has_errors());
    assert_eq!(result.errors().next().unwrap().kind, ErrorKind::IncludeNotFound);
    assert!(site.output("ok.html").is_file());
}

#[test]
fn test_failed_build_keeps_previous_cache_file() {
    let site = TestSite::new();
    site.write("index.html", "<p>v1</p>");
    assert!(site.build().is_success());
    let cache_file = site.dir.path().join(".unify-cache/build-state.json");
    let before = fs::read(&cache_file).unwrap();

    site.write("a.html", "<!--#include file=\"a.html\" -->");
    site.write("index.html", "<p>v2</p>");
    let result = site.build();

    assert!(result.has_errors());
    assert_eq!(fs::read(&cache_file).unwrap(), before);
}

#[test]
fn test_output_settings_change_invalidates_cache() {
    let site = TestSite::new();
    site.write("about.html", "<p>about</p>");
    site.build();

    let result = site.builder().pretty_urls(true).build().unwrap();
    assert_eq!(result.processed, 1);
    assert_eq!(result.skipped, 0);
    assert!(site.output("about/index.html").is_file());

    let minified = site.builder().pretty_urls(true).minify(true).build().unwrap();
    assert_eq!(minified.processed, 1);
}
