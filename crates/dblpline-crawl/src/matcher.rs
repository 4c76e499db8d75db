//! Document link selection on HTML landing pages

use reqwest::Url;
use scraper::{Html, Selector};

/// Anchor-selection rule for a landing page host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMatcher {
    /// arXiv abstract pages link the PDF under `/pdf/<id>`
    Arxiv,
    /// First anchor whose href ends in `.pdf`
    Generic,
}

impl LinkMatcher {
    pub fn for_host(host: &str) -> Self {
        if host == "arxiv.org" || host.ends_with(".arxiv.org") {
            Self::Arxiv
        } else {
            Self::Generic
        }
    }

    fn selector(self) -> &'static str {
        match self {
            Self::Arxiv => "a[href*='/pdf/']",
            Self::Generic => "a[href$='.pdf']",
        }
    }
}

/// Absolute URL of the document linked from `html`, which was served at `page_url`.
///
/// Relative hrefs resolve against the page's origin.
pub fn select_document_link(html: &str, page_url: &Url) -> Option<Url> {
    let host = page_url.host_str()?;
    let matcher = LinkMatcher::for_host(host);
    let selector = Selector::parse(matcher.selector()).ok()?;

    let document = Html::parse_document(html);
    let href = document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .find(|h| !h.is_empty())?;

    let origin = Url::parse(&page_url.origin().ascii_serialization()).ok()?;
    let resolved = origin.join(href).ok()?;
    matches!(resolved.scheme(), "http" | "https").then_some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARXIV_ABS: &str = r#"<html><body>
<a href="/abs/2111.07819v1">v1</a>
<div class="full-text"><ul>
<li><a href="/pdf/2111.07819" class="abs-button download-pdf">Download PDF</a></li>
<li><a href="/format/2111.07819">Other formats</a></li>
</ul></div></body></html>"#;

    const PUBLISHER: &str = r#"<html><body>
<a href="/toc">Contents</a>
<a href="files/paper-42.pdf">PDF</a>
<a href="https://cdn.example.org/other.pdf">Mirror</a>
</body></html>"#;

    #[test]
    fn matcher_by_host() {
        assert_eq!(LinkMatcher::for_host("arxiv.org"), LinkMatcher::Arxiv);
        assert_eq!(LinkMatcher::for_host("export.arxiv.org"), LinkMatcher::Arxiv);
        assert_eq!(LinkMatcher::for_host("aclanthology.org"), LinkMatcher::Generic);
        assert_eq!(LinkMatcher::for_host("notarxiv.org"), LinkMatcher::Generic);
    }

    #[test]
    fn arxiv_pdf_link() {
        let page = Url::parse("https://arxiv.org/abs/2111.07819").unwrap();
        let link = select_document_link(ARXIV_ABS, &page).unwrap();
        assert_eq!(link.as_str(), "https://arxiv.org/pdf/2111.07819");
    }

    #[test]
    fn generic_pdf_link_resolves_against_origin() {
        let page = Url::parse("https://proceedings.example.org/volume/7/paper42.html").unwrap();
        let link = select_document_link(PUBLISHER, &page).unwrap();
        assert_eq!(link.as_str(), "https://proceedings.example.org/files/paper-42.pdf");
    }

    #[test]
    fn origin_keeps_port() {
        let page = Url::parse("http://127.0.0.1:8080/landing").unwrap();
        let link = select_document_link(PUBLISHER, &page).unwrap();
        assert_eq!(link.as_str(), "http://127.0.0.1:8080/files/paper-42.pdf");
    }

    #[test]
    fn no_matching_anchor() {
        let page = Url::parse("https://example.org/").unwrap();
        assert!(select_document_link("<a href='/about'>About</a>", &page).is_none());
        // arXiv rule does not accept generic .pdf anchors
        let arxiv = Url::parse("https://arxiv.org/abs/1").unwrap();
        assert!(select_document_link("<a href='x.pdf'>x</a>", &arxiv).is_none());
    }
}
