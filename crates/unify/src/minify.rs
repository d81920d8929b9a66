use minify_html::Cfg;

fn config() -> Cfg {
    let mut cfg = Cfg::new();
    cfg.minify_css = true;
    cfg.minify_js = true;
    cfg.keep_closing_tags = true;
    cfg.keep_html_and_head_opening_tags = true;
    cfg
}

/// Collapses whitespace and comments in an emitted page.
pub fn minify_html(html: &str) -> String {
    let minified = minify_html::minify(html.as_bytes(), &config());
    String::from_utf8_lossy(&minified).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minify_drops_comments_and_whitespace() {
        let html = "<!DOCTYPE html>\n<html>\n  <head>\n    <title>T</title>\n  </head>\n  <body>\n    <!-- note -->\n    <p>Hello   world</p>\n  </body>\n</html>\n";
        let minified = minify_html(html);
        assert!(!minified.contains("note"));
        assert!(minified.contains("<title>T</title>"));
        assert!(minified.contains("Hello world"));
        assert!(minified.len() < html.len());
    }

    #[test]
    fn test_minify_keeps_closing_tags() {
        let minified = minify_html("<ul><li>a</li><li>b</li></ul>");
        assert_eq!(minified.matches("</li>").count(), 2);
    }
}
