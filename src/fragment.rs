//! Splitting a markdown project document into titled fragments.
//!
//! Every ATX heading starts a new [`Fragment`]; its `full_title` is the path
//! of enclosing headings. Headings inside fenced code blocks are body text.

use crate::error::{Error, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, trace};

const TITLE_SEPARATOR: &str = " > ";
const MAX_HEADING_LEVEL: usize = 6;

/// A titled block of text taken from a markdown document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Heading text without the `#` markers
    pub title: String,

    /// Titles of the enclosing headings and this one, joined with `" > "`
    pub full_title: String,

    /// Heading level (number of `#` markers)
    pub level: usize,

    /// Text between this heading and the next one, trimmed
    pub content: String,
}

impl Fragment {
    /// Returns true if the fragment has no body text.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// A project document split into fragments.
///
/// The first fragment describes the project (its title is the project
/// name), the second holds the development stack. Everything after that is
/// a candidate for class listing. A `Project` always holds at least those
/// two fragments; it can only be built through [`Project::parse`] or
/// [`Project::load`].
#[derive(Debug, Clone)]
pub struct Project {
    fragments: Vec<Fragment>,
}

impl Project {
    /// Loads a project from a `.md` path, or from inline markdown text.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the document has
    /// fewer than two headings.
    pub fn load(source: &str) -> Result<Self> {
        if source.ends_with(".md") {
            let path = Path::new(source);
            let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
            debug!("Read {} bytes from {}", text.len(), path.display());
            Self::parse(&text)
        } else {
            Self::parse(source)
        }
    }

    /// Splits markdown text into a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the document has fewer than two fragments.
    pub fn parse(text: &str) -> Result<Self> {
        let fragments = split(text);
        if fragments.len() < 2 {
            return Err(Error::project(format!(
                "expected a project description and a development stack section, found {} heading(s)",
                fragments.len()
            )));
        }
        Ok(Self { fragments })
    }

    /// All fragments in document order.
    #[must_use]
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// Project name, taken from the first heading.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.fragments[0].title
    }

    /// Development stack, taken from the body of the second section.
    #[must_use]
    pub fn dev_stack(&self) -> &str {
        &self.fragments[1].content
    }

    /// Fragments that may be sent for class listing.
    #[must_use]
    pub fn candidates(&self) -> &[Fragment] {
        &self.fragments[2..]
    }
}

/// Splits a markdown document into fragments at heading lines.
///
/// Headings inside fenced code blocks are ignored. Text before the first
/// heading is dropped.
#[must_use]
pub fn split(text: &str) -> Vec<Fragment> {
    let mut fragments = Vec::new();
    // (level, title) of the headings enclosing the current line
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut body: Vec<&str> = Vec::new();
    let mut fence = FenceTracker::default();
    let mut preamble = 0usize;

    for line in text.lines() {
        if fence.consume(line) {
            if stack.is_empty() {
                preamble += 1;
            } else {
                body.push(line);
            }
            continue;
        }

        let Some((level, title)) = parse_heading(line) else {
            if stack.is_empty() {
                preamble += usize::from(!line.trim().is_empty());
            } else {
                body.push(line);
            }
            continue;
        };

        if let Some(fragment) = finish(&stack, &body) {
            fragments.push(fragment);
        }
        body.clear();

        while stack.last().is_some_and(|(l, _)| *l >= level) {
            stack.pop();
        }
        stack.push((level, title.to_string()));
        trace!("Heading level {level}: {title}");
    }

    if let Some(fragment) = finish(&stack, &body) {
        fragments.push(fragment);
    }

    if preamble > 0 {
        debug!("Dropped {preamble} line(s) before the first heading");
    }

    fragments
}

/// Builds the fragment for the innermost open heading, if any.
fn finish(stack: &[(usize, String)], body: &[&str]) -> Option<Fragment> {
    let (level, title) = stack.last()?;
    let full_title = stack
        .iter()
        .map(|(_, t)| t.as_str())
        .collect::<Vec<_>>()
        .join(TITLE_SEPARATOR);

    Some(Fragment {
        title: title.clone(),
        full_title,
        level: *level,
        content: body.join("\n").trim().to_string(),
    })
}

/// Parses an ATX heading line into its level and title.
fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start_matches(' ');
    // more than three spaces of indentation is a code block
    if line.len() - trimmed.len() > 3 {
        return None;
    }

    let level = trimmed.bytes().take_while(|&b| b == b'#').count();
    if level == 0 || level > MAX_HEADING_LEVEL {
        return None;
    }

    let rest = &trimmed[level..];
    if !rest.is_empty() && !rest.starts_with([' ', '\t']) {
        return None;
    }

    // closing sequence: "## Title ##", but not "## C#"
    let title = rest.trim();
    let stripped = title.trim_end_matches('#');
    let title = if stripped.is_empty() || stripped.ends_with([' ', '\t']) {
        stripped.trim_end()
    } else {
        title
    };

    Some((level, title))
}

/// Tracks fenced code blocks while a document is scanned line by line.
///
/// A fence opens with three or more backticks or tildes and closes on a line
/// holding only a run of the same character at least as long.
#[derive(Debug, Default)]
pub(crate) struct FenceTracker {
    open: Option<(char, usize)>,
}

impl FenceTracker {
    /// Feeds the next line. Returns true if the line is part of a fenced
    /// block, delimiters included.
    pub(crate) fn consume(&mut self, line: &str) -> bool {
        let Some((marker, len)) = self.open else {
            self.open = fence_run(line).map(|(c, n, _)| (c, n));
            return self.open.is_some();
        };

        let closes = fence_run(line)
            .is_some_and(|(c, n, rest)| c == marker && n >= len && rest.trim().is_empty());
        if closes {
            self.open = None;
        }
        true
    }

    /// Line that closes the block still open, if any.
    pub(crate) fn closing(&self) -> Option<String> {
        self.open.map(|(marker, len)| marker.to_string().repeat(len))
    }
}

/// Splits a fence line into its marker, run length and trailing text.
fn fence_run(line: &str) -> Option<(char, usize, &str)> {
    let trimmed = line.trim_start();
    let marker = trimmed.chars().next().filter(|c| matches!(c, '`' | '~'))?;
    let len = trimmed.chars().take_while(|&c| c == marker).count();
    (len >= 3).then(|| (marker, len, &trimmed[len..]))
}
