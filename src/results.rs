//! Reading results files back: `# <title>` sections with JSON list data.
//!
//! The output of earlier runs, its `_overwrite` companion and the constants
//! file all share this format.

use crate::error::{Error, Result};
use crate::fragment::FenceTracker;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One `# Title` section of a results file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSection {
    /// Normalized section title
    pub title: String,

    /// Raw text under the heading
    pub body: String,

    /// Body parsed as a JSON array of strings, when it is one
    pub data: Option<Vec<String>>,
}

impl ResultSection {
    /// Creates a section and tries to parse its body as a list.
    #[must_use]
    pub fn new(title: &str, body: impl Into<String>) -> Self {
        let body = body.into();
        let data = parse_list(&body);
        Self {
            title: normalize_title(title).to_string(),
            body,
            data,
        }
    }
}

/// Results previously written to an output file.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    sections: Vec<ResultSection>,
}

impl ResultSet {
    /// Splits results text into sections at level-1 headings.
    ///
    /// `# ` lines inside fenced code blocks belong to the section body.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut sections = Vec::new();
        let mut current: Option<(&str, Vec<&str>)> = None;
        let mut fence = FenceTracker::default();

        for line in text.lines() {
            let heading = if fence.consume(line) { None } else { line.strip_prefix("# ") };
            if let Some(title) = heading {
                if let Some((title, body)) = current.take() {
                    sections.push(ResultSection::new(title, body.join("\n").trim()));
                }
                current = Some((title, Vec::new()));
            } else if let Some((_, body)) = current.as_mut() {
                body.push(line);
            }
        }

        if let Some((title, body)) = current {
            sections.push(ResultSection::new(title, body.join("\n").trim()));
        }

        Self { sections }
    }

    /// Loads a results file and applies its overwrite file on top.
    ///
    /// A missing results file yields an empty set. Sections of the
    /// overwrite file replace same-titled sections, or are appended.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read.
    pub fn load(path: &Path, overwrite_path: Option<&Path>) -> Result<Self> {
        let mut set = read_if_exists(path)?.map_or_else(Self::default, |t| Self::parse(&t));
        debug!("Loaded {} result section(s) from {}", set.len(), path.display());

        let overwrite_path = overwrite_path.map_or_else(|| overwrite_path_for(path), Path::to_path_buf);
        if let Some(text) = read_if_exists(&overwrite_path)? {
            let overrides = Self::parse(&text);
            info!(
                "Applying {} override(s) from {}",
                overrides.len(),
                overwrite_path.display()
            );
            for section in overrides.sections {
                set.upsert(section);
            }
        }

        Ok(set)
    }

    /// Returns true if a section with the given title exists.
    #[must_use]
    pub fn has_fragment(&self, title: &str) -> bool {
        self.find(title).is_some()
    }

    /// Returns the parsed list for a title, or an empty slice.
    #[must_use]
    pub fn get_data(&self, title: &str) -> &[String] {
        self.find(title)
            .and_then(|s| s.data.as_deref())
            .unwrap_or_default()
    }

    /// Looks up a section by normalized title.
    #[must_use]
    pub fn find(&self, title: &str) -> Option<&ResultSection> {
        let wanted = normalize_title(title);
        self.sections.iter().find(|s| s.title == wanted)
    }

    /// Replaces the same-titled section or appends a new one.
    pub fn upsert(&mut self, section: ResultSection) {
        match self.sections.iter_mut().find(|s| s.title == section.title) {
            Some(existing) => *existing = section,
            None => self.sections.push(section),
        }
    }

    /// Number of sections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Returns true if there are no sections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Iterates over the sections in file order.
    pub fn sections(&self) -> impl Iterator<Item = &ResultSection> {
        self.sections.iter()
    }
}

/// Strips whitespace and a leading `# ` heading marker.
#[must_use]
pub fn normalize_title(title: &str) -> &str {
    let title = title.trim();
    title.strip_prefix("# ").map_or(title, str::trim_start)
}

/// `dir/name.ext` becomes `dir/name_overwrite.ext`.
#[must_use]
pub fn overwrite_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_overwrite.{}", ext.to_string_lossy()),
        None => format!("{stem}_overwrite"),
    };
    path.with_file_name(name)
}

fn read_if_exists(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Parses a JSON array of strings, optionally wrapped in a code fence.
fn parse_list(body: &str) -> Option<Vec<String>> {
    let body = body.trim();
    let body = body
        .strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"))
        .map_or(body, |inner| {
            // drop the info string ("json") on the opening fence line
            inner.split_once('\n').map_or(inner, |(_, code)| code)
        });

    serde_json::from_str(body.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    const OUTPUT: &str = "\
# Services > Payment service
[\"PaymentGateway\", \"Invoice\"]
# Services > Mail service
```json
[
    \"Mailer\"
]
```
# Services > Broken
I could not find any classes.
";

    #[test]
    fn test_parse_sections() {
        let set = ResultSet::parse(OUTPUT);

        assert_eq!(set.len(), 3);
        let titles: Vec<_> = set.sections().map(|s| s.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Services > Payment service",
                "Services > Mail service",
                "Services > Broken"
            ]
        );
    }

    #[test]
    fn test_get_data_parses_lists() {
        let set = ResultSet::parse(OUTPUT);

        assert_eq!(
            set.get_data("Services > Payment service"),
            ["PaymentGateway", "Invoice"]
        );
        assert_eq!(set.get_data("Services > Mail service"), ["Mailer"]);
        assert!(set.get_data("Services > Broken").is_empty());
        assert!(set.get_data("Unknown").is_empty());
    }

    #[test]
    fn test_has_fragment_normalizes_title() {
        let set = ResultSet::parse(OUTPUT);

        assert!(set.has_fragment("Services > Payment service"));
        assert!(set.has_fragment("# Services > Payment service"));
        assert!(set.has_fragment("  Services > Payment service  "));
        assert!(!set.has_fragment("Services > Payment"));
    }

    #[test]
    fn test_lines_before_first_heading_are_ignored() {
        let set = ResultSet::parse("stray\n# A\n[]\n");
        assert_eq!(set.len(), 1);
        assert_eq!(set.find("A").unwrap().data, Some(vec![]));
    }

    #[test]
    fn test_fenced_comment_is_not_a_section() {
        let text = "\
# A
```python
# Cart model
class Cart: pass
```
# B
[\"Y\"]
";
        let set = ResultSet::parse(text);

        assert_eq!(set.len(), 2);
        assert!(set.find("A").unwrap().body.contains("# Cart model"));
        assert!(!set.has_fragment("Cart model"));
        assert_eq!(set.get_data("B"), ["Y"]);
    }

    #[test]
    fn test_fenced_list_keeps_its_data() {
        let set = ResultSet::parse("# A\n```json\n[\"Cart\"]\n```\n# B\n[]\n");

        assert_eq!(set.get_data("A"), ["Cart"]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("# Title"), "Title");
        assert_eq!(normalize_title("  Title "), "Title");
        assert_eq!(normalize_title("#Title"), "#Title");
    }

    #[test]
    fn test_overwrite_path_for() {
        assert_eq!(
            overwrite_path_for(Path::new("out/output_classes.md")),
            PathBuf::from("out/output_classes_overwrite.md")
        );
        assert_eq!(
            overwrite_path_for(Path::new("results")),
            PathBuf::from("results_overwrite")
        );
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let temp = assert_fs::TempDir::new().unwrap();
        let set = ResultSet::load(&temp.path().join("missing.md"), None).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_load_applies_overwrite_file() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("out_classes.md").write_str(OUTPUT).unwrap();
        temp.child("out_classes_overwrite.md")
            .write_str("# Services > Broken\n[\"Fixed\"]\n# Services > Extra\n[\"New\"]\n")
            .unwrap();

        let set = ResultSet::load(&temp.path().join("out_classes.md"), None).unwrap();

        assert_eq!(set.len(), 4);
        assert_eq!(set.get_data("Services > Broken"), ["Fixed"]);
        assert_eq!(set.get_data("Services > Extra"), ["New"]);
        assert_eq!(set.get_data("Services > Mail service"), ["Mailer"]);
    }

    #[test]
    fn test_load_with_explicit_overwrite_path() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("a.md").write_str("# X\n[\"one\"]\n").unwrap();
        temp.child("fixes.md").write_str("# X\n[\"two\"]\n").unwrap();

        let set = ResultSet::load(
            &temp.path().join("a.md"),
            Some(&temp.path().join("fixes.md")),
        )
        .unwrap();

        assert_eq!(set.get_data("X"), ["two"]);
    }
}
