//! Splitting code documents into sections
//!
//! A section starts at a `SECTION <ref> <TITLE>` line or a numbered heading
//! such as `R311.7.3 Riser height and tread depth.` and runs to the next
//! heading. `CHAPTER` lines close the current section. Text outside any
//! heading (a preamble, or a document with no headings at all) becomes a
//! section referenced as [`UNREFERENCED`].

use once_cell::sync::Lazy;
use regex::Regex;

use super::Section;
use crate::models::FetchedDocument;

static SECTION_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^SECTION\s+([A-Z]?\d+(?:\.\d+)*)\s*(.*)$").expect("valid regex"));
static NUMBERED_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z]?\d{3,4}(?:\.\d+)+)\s+(\S.{0,100}\.)$").expect("valid regex"));
static CHAPTER_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^CHAPTER\s+\d+").expect("valid regex"));

/// Section reference for text outside any heading
pub const UNREFERENCED: &str = "Unknown";

struct Open {
    section_ref: String,
    title: Option<String>,
    lines: Vec<String>,
}

impl Open {
    fn unreferenced() -> Self {
        Self {
            section_ref: UNREFERENCED.to_string(),
            title: None,
            lines: Vec::new(),
        }
    }
}

/// Split a fetched document into sections with non-empty bodies
pub fn split_sections(document: &FetchedDocument) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current: Option<Open> = Some(Open::unreferenced());

    let close = |open: Option<Open>, sections: &mut Vec<Section>| {
        if let Some(open) = open {
            let text = open.lines.join("\n").trim().to_string();
            if !text.is_empty() {
                sections.push(Section {
                    section_ref: open.section_ref,
                    title: open.title,
                    text,
                    code_family: document.source.code_family.clone(),
                    edition: document.source.edition.clone(),
                });
            }
        }
    };

    for line in document.text.lines() {
        let trimmed = line.trim();

        if CHAPTER_HEADER.is_match(trimmed) {
            close(current.replace(Open::unreferenced()), &mut sections);
            continue;
        }

        let heading = SECTION_HEADER
            .captures(trimmed)
            .or_else(|| NUMBERED_HEADING.captures(trimmed));
        if let Some(caps) = heading {
            close(current.take(), &mut sections);
            let title = caps
                .get(2)
                .map(|m| m.as_str().trim().trim_end_matches('.').to_string())
                .filter(|t| !t.is_empty());
            current = Some(Open {
                section_ref: caps[1].to_string(),
                title,
                lines: Vec::new(),
            });
            continue;
        }

        if let Some(open) = current.as_mut() {
            open.lines.push(line.to_string());
        }
    }
    close(current.take(), &mut sections);

    sections
}
