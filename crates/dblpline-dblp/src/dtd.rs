//! Named character entities declared by the release DTD
//!
//! The dump references Latin-1 entities (`&uuml;`, `&eacute;`) that are only
//! defined in the external `dblp.dtd`, which quick-xml does not load. The
//! table is built from the DTD's `<!ENTITY name "&#NNN;">` lines and used to
//! decode text content.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct EntityTable {
    entities: HashMap<String, String>,
}

impl Default for EntityTable {
    fn default() -> Self {
        let entities = [
            ("amp", "&"),
            ("lt", "<"),
            ("gt", ">"),
            ("quot", "\""),
            ("apos", "'"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self { entities }
    }
}

impl EntityTable {
    /// Predefined XML entities only.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_dtd_file(path: &Path) -> Result<Self> {
        let dtd = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read DTD {}", path.display()))?;
        Ok(Self::from_dtd_str(&dtd))
    }

    /// Collect general entity declarations; parameter entities (`%`) are skipped.
    pub fn from_dtd_str(dtd: &str) -> Self {
        let mut table = Self::default();
        let mut rest = dtd;
        while let Some(pos) = rest.find("<!ENTITY") {
            rest = &rest[pos + "<!ENTITY".len()..];
            if let Some((name, value, tail)) = parse_declaration(rest) {
                let expanded = decode_references(value, &table.entities);
                table.entities.entry(name.to_string()).or_insert(expanded);
                rest = tail;
            }
        }
        table
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entities.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Decode entity and character references in raw (still escaped) text.
    pub fn decode(&self, raw: &str) -> String {
        decode_references(raw, &self.entities)
    }
}

/// `  name  "value">` → (name, value, remainder)
fn parse_declaration(s: &str) -> Option<(&str, &str, &str)> {
    let s = s.trim_start();
    if s.starts_with('%') {
        return None;
    }
    let name_end = s.find(char::is_whitespace)?;
    let name = &s[..name_end];
    let s = s[name_end..].trim_start();
    let quote = s.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let body = &s[1..];
    let value_end = body.find(quote)?;
    Some((name, &body[..value_end], &body[value_end + 1..]))
}

/// Replace `&name;`, `&#NNN;` and `&#xHH;` in `raw`. Unknown or malformed
/// references are copied through unchanged.
fn decode_references(raw: &str, entities: &HashMap<String, String>) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let resolved = after.find(';').and_then(|semi| {
            let name = &after[..semi];
            resolve_reference(name, entities).map(|value| (value, semi))
        });
        match resolved {
            Some((value, semi)) => {
                out.push_str(&value);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn resolve_reference(name: &str, entities: &HashMap<String, String>) -> Option<String> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        return char::from_u32(code).map(String::from);
    }
    if name.is_empty() || name.len() > 32 || name.contains(char::is_whitespace) {
        return None;
    }
    entities.get(name).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DTD: &str = r##"<!-- dblp.dtd -->
<!ENTITY Agrave "&#192;" ><!-- capital A, grave accent -->
<!ENTITY uuml   "&#252;" >
<!ENTITY % titlecontents "#PCDATA|sub|sup|i|tt">
<!ELEMENT dblp (article|inproceedings)*>
<!ENTITY reg '&#174;'>
"##;

    #[test]
    fn parses_entity_declarations() {
        let table = EntityTable::from_dtd_str(DTD);
        assert_eq!(table.get("Agrave"), Some("\u{c0}"));
        assert_eq!(table.get("uuml"), Some("ü"));
        assert_eq!(table.get("reg"), Some("®"));
        assert_eq!(table.get("titlecontents"), None);
    }

    #[test]
    fn decodes_named_and_numeric() {
        let table = EntityTable::from_dtd_str(DTD);
        assert_eq!(table.decode("J&uuml;rgen"), "Jürgen");
        assert_eq!(table.decode("a &amp; b &#x41;&#66;"), "a & b AB");
    }

    #[test]
    fn unknown_entity_kept_verbatim() {
        let table = EntityTable::new();
        assert_eq!(table.decode("M&uuml;ller"), "M&uuml;ller");
        assert_eq!(table.decode("R&D"), "R&D");
    }

    #[test]
    fn predefined_always_present() {
        let table = EntityTable::new();
        assert_eq!(table.decode("&lt;i&gt;"), "<i>");
        assert_eq!(table.len(), 5);
    }
}
