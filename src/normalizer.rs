use htmd::HtmlToMarkdown;
use scraper::{Html, Selector};
use tracing::{debug, instrument};

/// The `Normalizer` struct turns rendered HTML into readable, link-preserving Markdown.
/// It removes boilerplate elements matched by CSS selectors before conversion.
pub struct Normalizer {
    /// CSS selectors for elements removed from the document before conversion.
    boilerplate: Vec<Selector>,
    /// The Markdown converter.
    converter: HtmlToMarkdown,
}

impl Default for Normalizer {
    /// Provides a `Normalizer` that strips page headers and footers.
    fn default() -> Self {
        Self::new(["header", "footer"])
    }
}

impl Normalizer {
    /// Creates a new `Normalizer` with the given boilerplate selectors.
    ///
    /// # Arguments
    ///
    /// * `boilerplate_selectors` - CSS selectors of elements to remove. Selectors that
    ///   fail to parse are ignored.
    ///
    /// # Returns
    ///
    /// A new instance of `Normalizer`.
    pub fn new(boilerplate_selectors: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        let boilerplate = boilerplate_selectors
            .into_iter()
            .filter_map(|s| Selector::parse(s.as_ref()).ok())
            .collect();

        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec!["script", "style", "noscript"])
            .build();

        Self {
            boilerplate,
            converter,
        }
    }

    /// Converts HTML into Markdown with boilerplate removed.
    ///
    /// Malformed markup is repaired by the HTML parser rather than rejected. The
    /// output is deterministic for a given input.
    ///
    /// # Arguments
    ///
    /// * `html` - The rendered page source.
    ///
    /// # Returns
    ///
    /// The normalized text.
    #[instrument(skip(self, html), fields(html_length = html.len()))]
    pub fn normalize(&self, html: &str) -> String {
        let cleaned = self.strip_boilerplate(html).html();

        match self.converter.convert(&cleaned) {
            Ok(markdown) => markdown,
            Err(e) => {
                debug!("Markdown conversion failed, falling back to plain text: {}", e);
                Html::parse_document(&cleaned)
                    .root_element()
                    .text()
                    .collect::<Vec<_>>()
                    .join(" ")
            }
        }
    }

    /// Parses the document and detaches every element matched by the boilerplate selectors.
    ///
    /// # Arguments
    ///
    /// * `html` - The HTML string to be parsed.
    ///
    /// # Returns
    ///
    /// The repaired document tree without boilerplate.
    pub fn strip_boilerplate(&self, html: &str) -> Html {
        let mut document = Html::parse_document(html);

        let doomed: Vec<_> = self
            .boilerplate
            .iter()
            .flat_map(|selector| document.select(selector).map(|el| el.id()).collect::<Vec<_>>())
            .collect();

        debug!("Removing {} boilerplate elements", doomed.len());

        for id in doomed {
            if let Some(mut node) = document.tree.get_mut(id) {
                node.detach();
            }
        }

        document
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <!DOCTYPE html>
        <html>
            <head><title>Listings</title><style>.x { color: red; }</style></head>
            <body>
                <header><nav>Site navigation</nav></header>
                <main>
                    <h1>Apartments</h1>
                    <p>Cozy flat for <a href="https://example.com/flat/1">rent</a></p>
                </main>
                <footer>Copyright footer text</footer>
            </body>
        </html>
    "#;

    fn element_count(document: &Html) -> usize {
        document.tree.nodes().filter(|n| n.value().is_element()).count()
    }

    /// Tests that headers and footers are dropped while body content and links survive.
    #[test]
    fn test_removes_header_and_footer() {
        let text = Normalizer::default().normalize(PAGE);

        assert!(text.contains("Apartments"));
        assert!(text.contains("https://example.com/flat/1"));
        assert!(text.contains("rent"));
        assert!(!text.contains("Site navigation"));
        assert!(!text.contains("Copyright footer text"));
        assert!(!text.contains("color: red"));
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let normalizer = Normalizer::default();
        assert_eq!(normalizer.normalize(PAGE), normalizer.normalize(PAGE));
    }

    #[test]
    fn test_stripping_never_grows_the_tree() {
        let normalizer = Normalizer::default();
        let before = element_count(&Html::parse_document(PAGE));
        let after = element_count(&Html::parse_document(&normalizer.strip_boilerplate(PAGE).html()));
        assert!(after < before);

        let plain = "<html><body><p>No boilerplate here</p></body></html>";
        let before = element_count(&Html::parse_document(plain));
        let after = element_count(&normalizer.strip_boilerplate(plain));
        assert_eq!(after, before);
    }

    /// Tests that broken markup is repaired rather than rejected.
    #[test]
    fn test_malformed_html_is_tolerated() {
        let text = Normalizer::default().normalize("<div><p>Unclosed <b>bold<footer>gone</div>");
        assert!(text.contains("Unclosed"));
        assert!(text.contains("bold"));
        assert!(!text.contains("gone"));
    }

    #[test]
    fn test_custom_selectors() {
        let normalizer = Normalizer::new([".ad", "aside"]);
        let text = normalizer.normalize(
            "<body><div class=\"ad\">Buy now</div><aside>Related</aside><p>Article</p></body>",
        );

        assert!(text.contains("Article"));
        assert!(!text.contains("Buy now"));
        assert!(!text.contains("Related"));
    }
}
