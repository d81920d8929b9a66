use crate::error::{Result, UnifyError};
use crate::types::Frontmatter;
use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use serde_json::{Map, Value};
use std::path::Path;
use syntect::highlighting::ThemeSet;
use syntect::html::highlighted_html_for_string;
use syntect::parsing::SyntaxSet;

const EXCERPT_LENGTH: usize = 200;
const HIGHLIGHT_THEME: &str = "base16-ocean.dark";

#[derive(Debug, Clone, Default)]
pub struct RenderedMarkdown {
    pub html: String,
    pub frontmatter: Frontmatter,
    pub title: Option<String>,
    pub excerpt: Option<String>,
}

pub struct MarkdownRenderer {
    syntax_set: SyntaxSet,
    theme_set: ThemeSet,
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkdownRenderer {
    pub fn new() -> Self {
        Self {
            syntax_set: SyntaxSet::load_defaults_newlines(),
            theme_set: ThemeSet::load_defaults(),
        }
    }

    /// Front matter + body to HTML. Pure: performs no file I/O.
    pub fn render(&self, source: &str, path: &Path) -> Result<RenderedMarkdown> {
        let (frontmatter, body) = extract_frontmatter(source, path)?;
        let (html, heading) = self.render_body(&body);

        let title = frontmatter.get_string("title").or(heading);
        let excerpt = frontmatter
            .get_string("excerpt")
            .or_else(|| frontmatter.get_string("description"))
            .or_else(|| extract_excerpt(&body, EXCERPT_LENGTH));

        Ok(RenderedMarkdown {
            html,
            frontmatter,
            title,
            excerpt,
        })
    }

    fn render_body(&self, content: &str) -> (String, Option<String>) {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_HEADING_ATTRIBUTES);

        let parser = Parser::new_ext(content, options);
        let mut html_output = String::new();
        let mut code_block: Option<Option<String>> = None;
        let mut code_block_content = String::new();
        let mut first_heading: Option<String> = None;
        let mut heading_text: Option<String> = None;

        for event in parser {
            match event {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let language = match kind {
                        CodeBlockKind::Fenced(language) if !language.is_empty() => {
                            Some(language.to_string())
                        }
                        _ => None,
                    };
                    code_block = Some(language);
                    code_block_content.clear();
                }
                Event::End(TagEnd::CodeBlock) => {
                    let language = code_block.take().flatten();
                    html_output.push_str(&self.highlight(&code_block_content, language.as_deref()));
                }
                Event::Text(text) if code_block.is_some() => {
                    code_block_content.push_str(&text);
                }
                Event::Start(Tag::Heading {
                    level: HeadingLevel::H1,
                    ..
                }) if first_heading.is_none() => {
                    heading_text = Some(String::new());
                    push_event(&mut html_output, event);
                }
                Event::End(TagEnd::Heading(HeadingLevel::H1)) if heading_text.is_some() => {
                    first_heading = heading_text.take().map(|text| text.trim().to_string());
                    push_event(&mut html_output, event);
                }
                Event::Text(ref text) | Event::Code(ref text) => {
                    if let Some(heading) = heading_text.as_mut() {
                        heading.push_str(text);
                    }
                    push_event(&mut html_output, event);
                }
                other => push_event(&mut html_output, other),
            }
        }

        (html_output, first_heading.filter(|title| !title.is_empty()))
    }

    fn highlight(&self, code: &str, language: Option<&str>) -> String {
        let Some(language) = language else {
            return format!("<pre><code>{}</code></pre>", escape_html(code));
        };

        let theme = &self.theme_set.themes[HIGHLIGHT_THEME];
        self.syntax_set
            .find_syntax_by_token(language)
            .and_then(|syntax| {
                highlighted_html_for_string(code, &self.syntax_set, syntax, theme).ok()
            })
            .unwrap_or_else(|| {
                format!(
                    "<pre><code class=\"language-{}\">{}</code></pre>",
                    language,
                    escape_html(code)
                )
            })
    }
}

fn push_event(output: &mut String, event: Event<'_>) {
    pulldown_cmark::html::push_html(output, std::iter::once(event));
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn extract_excerpt(content: &str, max_chars: usize) -> Option<String> {
    if content.trim().is_empty() {
        return None;
    }

    let first_paragraph = content
        .split("\n\n")
        .map(|p| p.trim())
        .find(|p| !p.is_empty() && !p.starts_with('#'))?;

    let text: String = first_paragraph
        .chars()
        .filter(|c| !['#', '*', '_', '`', '[', ']', '(', ')'].contains(c))
        .collect();

    let text = text.trim();

    if text.chars().count() <= max_chars {
        Some(text.to_string())
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        let last_space = truncated.rfind(' ').unwrap_or(truncated.len());
        Some(format!("{}...", &truncated[..last_space]))
    }
}

pub fn extract_frontmatter(content: &str, path: &Path) -> Result<(Frontmatter, String)> {
    let content = content.replace("\r\n", "\n");
    let content = content.trim_start();

    if content.starts_with("+++") {
        parse_toml_frontmatter(content, path)
    } else if content.starts_with("---") {
        parse_yaml_frontmatter(content, path)
    } else {
        Ok((Frontmatter::default(), content.to_string()))
    }
}

fn parse_toml_frontmatter(content: &str, path: &Path) -> Result<(Frontmatter, String)> {
    let rest = &content[3..];

    let end_index =
        find_closing_delimiter(rest, "+++").ok_or_else(|| UnifyError::InvalidFrontmatter {
            path: path.to_path_buf(),
        })?;

    let frontmatter_str = &rest[..end_index];
    let body = &rest[end_index + 3..];

    let raw: Map<String, Value> =
        toml::from_str(frontmatter_str).map_err(|error| UnifyError::TomlParse {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?;

    Ok((Frontmatter { raw }, body.trim().to_string()))
}

fn parse_yaml_frontmatter(content: &str, path: &Path) -> Result<(Frontmatter, String)> {
    let rest = &content[3..];

    let end_index =
        find_closing_delimiter(rest, "---").ok_or_else(|| UnifyError::InvalidFrontmatter {
            path: path.to_path_buf(),
        })?;

    let frontmatter_str = &rest[..end_index];
    let body = &rest[end_index + 3..];

    let raw: Option<Map<String, Value>> =
        serde_yml::from_str(frontmatter_str).map_err(|error| UnifyError::YamlParse {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?;

    Ok((
        Frontmatter {
            raw: raw.unwrap_or_default(),
        },
        body.trim().to_string(),
    ))
}

fn find_closing_delimiter(content: &str, delimiter: &str) -> Option<usize> {
    let mut position = 0;

    for line in content.lines() {
        if position > 0 && line.trim() == delimiter {
            return Some(position);
        }
        position += line.len() + 1;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn render(source: &str) -> RenderedMarkdown {
        MarkdownRenderer::new()
            .render(source, Path::new("test.md"))
            .unwrap()
    }

    #[test]
    fn test_render_markdown() {
        let output = render("# Hello\n\nThis is **bold**.");
        assert!(output.html.contains("<h1>"));
        assert!(output.html.contains("<strong>bold</strong>"));
        assert_eq!(output.title.as_deref(), Some("Hello"));
        assert_eq!(output.excerpt.as_deref(), Some("This is bold."));
    }

    #[test]
    fn test_render_markdown_with_code() {
        let output = MarkdownRenderer::new().render_body("```rust\nfn main() {}\n```").0;
        assert!(output.contains("fn"));
        assert!(output.contains("main"));
    }

    #[test]
    fn test_plain_code_block_is_escaped() {
        let output = MarkdownRenderer::new().render_body("```\n<div>\n```").0;
        assert!(output.contains("&lt;div&gt;"));
    }

    #[test]
    fn test_frontmatter_title_wins_over_heading() {
        let output = render("---\ntitle: From Front Matter\nlayout: blog\n---\n\n# Heading\n\nBody");
        assert_eq!(output.title.as_deref(), Some("From Front Matter"));
        assert_eq!(
            output.frontmatter.get_string("layout"),
            Some("blog".to_string())
        );
    }

    #[test]
    fn test_nested_frontmatter_values() {
        let output = render("---\nauthor:\n  name: Ada\ntags: [a, b]\n---\nBody");
        let author: serde_json::Value = output.frontmatter.get("author").unwrap();
        assert_eq!(author["name"], "Ada");
        assert_eq!(output.frontmatter.get::<Vec<String>>("tags").unwrap().len(), 2);
    }

    #[test]
    fn test_extract_excerpt() {
        let content = "This is the first paragraph.\n\nThis is the second.";
        let excerpt = extract_excerpt(content, 100);
        assert_eq!(excerpt, Some("This is the first paragraph.".to_string()));
    }

    #[test]
    fn test_extract_excerpt_truncation() {
        let content = "This is a very long paragraph that should be truncated at some point.";
        let excerpt = extract_excerpt(content, 30);
        assert!(excerpt.unwrap().ends_with("..."));
    }

    #[test]
    fn test_yaml_frontmatter_with_dashes_in_content() {
        let content = "---\ntitle: Test\n---\n\nContent with --- dashes";
        let path = PathBuf::from("test.md");
        let (fm, body) = extract_frontmatter(content, &path).unwrap();
        assert_eq!(fm.get_string("title"), Some("Test".to_string()));
        assert!(body.contains("---"));
    }

    #[test]
    fn test_toml_frontmatter() {
        let content = "+++\ntitle = \"Test\"\n+++\n\nBody content";
        let path = PathBuf::from("test.md");
        let (fm, body) = extract_frontmatter(content, &path).unwrap();
        assert_eq!(fm.get_string("title"), Some("Test".to_string()));
        assert_eq!(body, "Body content");
    }

    #[test]
    fn test_unterminated_frontmatter_is_error() {
        let path = PathBuf::from("broken.md");
        let error = extract_frontmatter("---\ntitle: Test\n\nBody", &path).unwrap_err();
        assert!(matches!(error, UnifyError::InvalidFrontmatter { .. }));
    }
}
