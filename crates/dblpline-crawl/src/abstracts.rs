//! Abstract extraction from GROBID output
//!
//! GROBID fills `<abstract>` when it recognises one. When it does not, the
//! abstract is cut out of the body text between a start and an end marker;
//! marker pairs are tried in order and the first pair that matches wins.

use quick_xml::Reader;
use quick_xml::events::Event;

/// Text bounding an abstract: it starts after `start` and stops at `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerPair {
    pub start: &'static str,
    pub end: &'static str,
}

const fn pair(start: &'static str, end: &'static str) -> MarkerPair {
    MarkerPair { start, end }
}

/// Most specific first: numbered section headings, then keyword blocks,
/// then bare "Introduction" headings.
pub const DEFAULT_MARKERS: &[MarkerPair] = &[
    pair("Abstract", "\n\n1 Introduction"),
    pair("Abstract", "\n\n1. Introduction"),
    pair("ABSTRACT", "\n\n1 Introduction"),
    pair("ABSTRACT", "\n\n1. Introduction"),
    pair("ABSTRACT", "\n\n1 INTRODUCTION"),
    pair("ABSTRACT", "\n\n1. INTRODUCTION"),
    pair("Abstract", "Keywords"),
    pair("ABSTRACT", "Keywords"),
    pair("A b s t r a c t", "Keywords"),
    pair("Abstract", "\n\nIntroduction"),
    pair("ABSTRACT", "\n\nINTRODUCTION"),
    pair("Abstract", "Introduction"),
    pair("ABSTRACT", "INTRODUCTION"),
    pair("Abstract", "\n\n1 "),
];

/// Byte range of the abstract in `text`, or `None` if no pair matches.
///
/// The range begins after the start marker (leading whitespace skipped) and
/// ends right before the first end marker that follows it. Pairs yielding an
/// empty range do not match.
pub fn locate_abstract(text: &str, markers: &[MarkerPair]) -> Option<(usize, usize)> {
    markers.iter().find_map(|m| {
        let after_start = text.find(m.start)? + m.start.len();
        let end = after_start + text[after_start..].find(m.end)?;
        let skipped = text[after_start..end].len() - text[after_start..end].trim_start().len();
        let start = after_start + skipped;
        (start < end).then_some((start, end))
    })
}

pub fn extract_abstract<'a>(text: &'a str, markers: &[MarkerPair]) -> Option<&'a str> {
    locate_abstract(text, markers).map(|(start, end)| &text[start..end])
}

/// Abstract of a TEI document, from `<abstract>` or else from the body text.
pub fn tei_abstract(tei: &str) -> Option<String> {
    let (abstract_text, body) = collect_tei_text(tei)?;
    let abstract_text = abstract_text.trim();
    if !abstract_text.is_empty() {
        return Some(abstract_text.to_string());
    }
    extract_abstract(&body, DEFAULT_MARKERS)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Returns the `<abstract>` paragraphs joined by spaces and the body text with
/// blank lines between blocks. `None` on malformed XML.
fn collect_tei_text(tei: &str) -> Option<(String, String)> {
    let mut reader = Reader::from_str(tei);
    let mut abstract_depth = 0usize;
    let mut body_depth = 0usize;
    let mut abstract_parts: Vec<String> = Vec::new();
    let mut body = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"abstract" => abstract_depth += 1,
                b"body" => body_depth += 1,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"abstract" => abstract_depth = abstract_depth.saturating_sub(1),
                b"body" => body_depth = body_depth.saturating_sub(1),
                b"p" | b"head" | b"div" if body_depth > 0 => {
                    if !body.ends_with("\n\n") {
                        body.push_str("\n\n");
                    }
                }
                _ => {}
            },
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map(|t| t.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&e).into_owned());
                if abstract_depth > 0 {
                    let text = text.trim();
                    if !text.is_empty() {
                        abstract_parts.push(text.to_string());
                    }
                } else if body_depth > 0 {
                    body.push_str(&text);
                }
            }
            Ok(Event::CData(e)) if abstract_depth > 0 => {
                abstract_parts.push(String::from_utf8_lossy(&e).trim().to_string());
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                log::debug!("malformed TEI at {}: {e}", reader.buffer_position());
                return None;
            }
            _ => {}
        }
    }

    Some((abstract_parts.join(" "), body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(text: &str) -> Option<&str> {
        extract_abstract(text, DEFAULT_MARKERS)
    }

    #[test]
    fn numbered_introduction() {
        assert_eq!(extract("Abstract\ntext\n\n1 Introduction"), Some("text"));
        assert_eq!(extract("ABSTRACT\ntext\n\n1. Introduction"), Some("text"));
    }

    #[test]
    fn keywords_block() {
        assert_eq!(extract("Abstract text\nKeywords:"), Some("text\n"));
        assert_eq!(extract("A b s t r a c t\ntext\nKeywords :"), Some("text\n"));
    }

    #[test]
    fn unnumbered_introduction() {
        assert_eq!(extract("Abstract\ntext\n\nIntroduction\n\n"), Some("text"));
    }

    #[test]
    fn no_markers() {
        assert_eq!(extract("We propose a method."), None);
        assert_eq!(extract("Abstract but no end"), None);
    }

    #[test]
    fn end_before_start_does_not_match() {
        let markers = [pair("Abstract", "Introduction")];
        assert_eq!(locate_abstract("Introduction\nAbstract\ntext", &markers), None);
    }

    #[test]
    fn first_matching_pair_wins() {
        let text = "Abstract\nshort\n\nIntroduction\nlong\n\n1 Introduction";
        let range = locate_abstract(text, DEFAULT_MARKERS).unwrap();
        assert_eq!(&text[range.0..range.1], "short\n\nIntroduction\nlong");

        let custom = [pair("Abstract", "\n\nIntroduction")];
        assert_eq!(extract_abstract(text, &custom), Some("short"));
    }

    #[test]
    fn tei_abstract_element() {
        let tei = r#"<TEI xmlns="http://www.tei-c.org/ns/1.0"><teiHeader><profileDesc>
<abstract><div><p>We study &amp; measure X.</p><p>Results follow.</p></div></abstract>
</profileDesc></teiHeader><text><body><p>ignored</p></body></text></TEI>"#;
        assert_eq!(
            tei_abstract(tei).as_deref(),
            Some("We study & measure X. Results follow.")
        );
    }

    #[test]
    fn tei_body_fallback() {
        let tei = r#"<TEI><teiHeader/><text><body>
<div><head>Abstract</head><p>Body abstract.</p></div>
<div><head n="1">Introduction</head><p>Intro.</p></div>
</body></text></TEI>"#;
        assert_eq!(tei_abstract(tei).as_deref(), Some("Body abstract."));
    }

    #[test]
    fn tei_without_abstract() {
        assert_eq!(tei_abstract("<TEI><text><body><p>x</p></body></text></TEI>"), None);
        assert_eq!(tei_abstract("<TEI><abstract>"), None);
    }
}
