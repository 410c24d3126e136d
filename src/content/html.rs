use scraper::{ElementRef, Html, Node};

/// Elements whose content never reaches the output.
const SKIPPED: &[&str] = &[
    "script", "style", "noscript", "template", "head", "title", "img", "picture", "svg", "iframe",
    "object", "video", "audio", "canvas",
];

const BLOCKS: &[&str] = &[
    "p",
    "div",
    "section",
    "article",
    "main",
    "header",
    "footer",
    "aside",
    "nav",
    "blockquote",
    "figure",
    "figcaption",
    "table",
    "tr",
    "dl",
    "dt",
    "dd",
    "address",
    "details",
    "summary",
];

/// Render an HTML fragment as plain, markdown-flavoured text.
///
/// Links become `[text](href)`, list items `* item`, headings `# Title`.
/// Images, scripts and styles are dropped, block elements are separated by
/// a blank line, and lines are never wrapped. Returns `None` when nothing
/// but whitespace is left.
///
/// # Example
///
/// ```
/// use rsscast::content::html_to_text;
///
/// let text = html_to_text(r#"<p>Read <a href="https://example.com">this</a></p>"#);
/// assert_eq!(text.as_deref(), Some("Read [this](https://example.com)"));
/// ```
pub fn html_to_text(html: &str) -> Option<String> {
    if html.trim().is_empty() {
        return None;
    }
    let fragment = Html::parse_fragment(html);
    element_to_text(fragment.root_element())
}

/// Render one parsed element (and its descendants) the same way as [`html_to_text`].
pub(crate) fn element_to_text(element: ElementRef<'_>) -> Option<String> {
    let mut renderer = Renderer::default();
    renderer.children(element);
    renderer.finish()
}

#[derive(Default)]
struct Renderer {
    out: String,
    list_depth: usize,
    preformatted: bool,
}

impl Renderer {
    fn children(&mut self, element: ElementRef<'_>) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => self.text(text),
                Node::Element(_) => {
                    if let Some(child) = ElementRef::wrap(child) {
                        self.element(child);
                    }
                }
                _ => {}
            }
        }
    }

    fn element(&mut self, element: ElementRef<'_>) {
        let name = element.value().name();
        if SKIPPED.contains(&name) {
            return;
        }

        match name {
            "br" => self.newline(),
            "hr" => {
                self.blank_line();
                self.out.push_str("* * *");
                self.blank_line();
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = name[1..].parse::<usize>().unwrap_or(1);
                self.blank_line();
                self.out.push_str(&"#".repeat(level));
                self.out.push(' ');
                self.children(element);
                self.blank_line();
            }
            "ul" | "ol" => {
                if self.list_depth == 0 {
                    self.blank_line();
                } else {
                    self.newline();
                }
                self.list_depth += 1;
                self.children(element);
                self.list_depth -= 1;
                if self.list_depth == 0 {
                    self.blank_line();
                }
            }
            "li" => {
                self.newline();
                self.out.push_str(&"  ".repeat(self.list_depth.saturating_sub(1)));
                self.out.push_str("* ");
                self.children(element);
                self.newline();
            }
            "pre" => {
                self.blank_line();
                let was = std::mem::replace(&mut self.preformatted, true);
                self.children(element);
                self.preformatted = was;
                self.blank_line();
            }
            "a" => self.link(element),
            "strong" | "b" => self.wrapped(element, "**"),
            "em" | "i" => self.wrapped(element, "_"),
            "td" | "th" => {
                self.children(element);
                self.out.push(' ');
            }
            _ if BLOCKS.contains(&name) => {
                self.blank_line();
                self.children(element);
                self.blank_line();
            }
            _ => self.children(element),
        }
    }

    fn link(&mut self, element: ElementRef<'_>) {
        let href = element
            .value()
            .attr("href")
            .map(str::trim)
            .filter(|h| !h.is_empty() && !h.starts_with('#') && !h.starts_with("javascript:"));

        let Some(href) = href else {
            self.children(element);
            return;
        };

        let outer = std::mem::take(&mut self.out);
        self.children(element);
        let label = std::mem::replace(&mut self.out, outer);
        let label = label.trim();

        if label.is_empty() {
            return;
        }
        self.out.push('[');
        self.out.push_str(label);
        self.out.push_str("](");
        self.out.push_str(href);
        self.out.push(')');
    }

    fn wrapped(&mut self, element: ElementRef<'_>, marker: &str) {
        let outer = std::mem::take(&mut self.out);
        self.children(element);
        let inner = std::mem::replace(&mut self.out, outer);

        let trimmed = inner.trim();
        if trimmed.is_empty() {
            self.out.push_str(&inner);
            return;
        }
        if inner.starts_with(char::is_whitespace) {
            self.space();
        }
        self.out.push_str(marker);
        self.out.push_str(trimmed);
        self.out.push_str(marker);
        if inner.ends_with(char::is_whitespace) {
            self.space();
        }
    }

    fn text(&mut self, text: &str) {
        if self.preformatted {
            self.out.push_str(text);
            return;
        }
        for c in text.chars() {
            if c.is_whitespace() {
                self.space();
            } else {
                self.out.push(c);
            }
        }
    }

    /// A collapsible space: never at line start, never doubled.
    fn space(&mut self) {
        if !self.out.is_empty() && !self.out.ends_with([' ', '\n']) {
            self.out.push(' ');
        }
    }

    fn newline(&mut self) {
        self.trim_trailing_spaces();
        if !self.out.is_empty() && !self.out.ends_with('\n') {
            self.out.push('\n');
        }
    }

    fn blank_line(&mut self) {
        self.newline();
        if !self.out.is_empty() && !self.out.ends_with("\n\n") {
            self.out.push('\n');
        }
    }

    fn trim_trailing_spaces(&mut self) {
        let len = self.out.trim_end_matches(' ').len();
        self.out.truncate(len);
    }

    fn finish(self) -> Option<String> {
        let mut text = String::with_capacity(self.out.len());
        let mut blank_run = 0;
        for line in self.out.lines().map(str::trim_end) {
            if line.is_empty() {
                blank_run += 1;
                if blank_run > 1 {
                    continue;
                }
            } else {
                blank_run = 0;
            }
            text.push_str(line);
            text.push('\n');
        }

        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn render(html: &str) -> String {
        html_to_text(html).unwrap_or_default()
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(render("Just   some\n text"), "Just some text");
        assert_eq!(render("Fish &amp; chips"), "Fish & chips");
    }

    #[test]
    fn test_paragraphs_separated_by_blank_line() {
        assert_eq!(render("<p>One</p><p>Two</p>"), "One\n\nTwo");
        assert_eq!(render("Line<br>break"), "Line\nbreak");
    }

    #[test]
    fn test_links_keep_target() {
        assert_eq!(
            render(r#"<p>See <a href="https://example.com/a">the notes</a>.</p>"#),
            "See [the notes](https://example.com/a)."
        );
        // Fragment-only and empty links degrade to their text
        assert_eq!(render(r##"<a href="#top">Top</a>"##), "Top");
        assert_eq!(render(r#"<a href="https://example.com"><img src="x.png"></a>"#), "");
    }

    #[test]
    fn test_lists_and_headings() {
        let html = "<h2>Show notes</h2><ul><li>First</li><li>Second<ul><li>Nested</li></ul></li></ul><p>End</p>";
        assert_eq!(
            render(html),
            "## Show notes\n\n* First\n* Second\n  * Nested\n\nEnd"
        );
    }

    #[test]
    fn test_images_scripts_styles_dropped() {
        let html = r#"<style>p{color:red}</style><p>Hi<img src="a.png" alt="pic"></p><script>alert(1)</script>"#;
        assert_eq!(render(html), "Hi");
    }

    #[test]
    fn test_emphasis() {
        assert_eq!(render("<p>A <b>bold</b> and <em>soft</em> word</p>"), "A **bold** and _soft_ word");
    }

    #[test]
    fn test_no_wrapping() {
        let long = "word ".repeat(100);
        let text = render(&format!("<p>{}</p>", long));
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn test_empty_output_is_none() {
        assert_eq!(html_to_text(""), None);
        assert_eq!(html_to_text("   "), None);
        assert_eq!(html_to_text("<p> </p><img src='x.png'>"), None);
    }
}
