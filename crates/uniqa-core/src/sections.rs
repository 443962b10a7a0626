//! Semantic section detection for cleaned document text.
//!
//! Headers are short lines that start with a known topic marker in Uzbek,
//! Russian or English ("Admission", "Qabul", "Поступление", ...). Each
//! header opens a section that runs until the next header. Text before
//! the first header becomes a section titled after the document.
//!
//! When no header is found the text is grouped by paragraphs, and failing
//! that partitioned into equal parts.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::char_len;
use crate::split::TERMINATORS;

/// Topic markers recognised at the start of a header line.
pub const SECTION_MARKERS: &[&str] = &[
    // en
    "about", "introduction", "overview", "programs", "programmes", "bachelor", "master", "phd",
    "faculties", "faculty", "departments", "admission", "requirements", "documents", "deadline",
    "application", "tuition", "fees", "scholarship", "partners", "international", "exchange",
    "contact", "location", "benefits", "opportunities", "dormitory",
    // uz
    "haqida", "kirish", "umumiy", "dasturlar", "bakalavr", "magistratura", "doktorantura",
    "fakultetlar", "kafedralar", "qabul", "talablar", "hujjatlar", "muddat", "ariza",
    "kontrakt", "to'lov", "stipendiya", "hamkorlar", "xalqaro", "almashinuv", "aloqa",
    "manzil", "afzalliklar", "imkoniyatlar", "yotoqxona",
    // ru
    "о нас", "об университете", "введение", "обзор", "программы", "бакалавриат", "магистратура",
    "аспирантура", "факультет", "кафедры", "поступление", "приём", "прием", "требования",
    "документы", "сроки", "заявление", "стоимость", "оплата", "стипенди", "партнер", "партнёр",
    "международн", "обмен", "контакт", "адрес", "преимущества", "возможности", "общежити",
];

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    let markers = SECTION_MARKERS
        .iter()
        .map(|m| regex::escape(m))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)^[#*\-\s]*(?:\d+[.)]\s*)?(?:{markers})\w*(?:\W|$)"))
        .expect("section header regex is valid")
});

const MAX_HEADER_WORDS: usize = 8;
const FALLBACK_PARTS: usize = 3;

/// A titled span of document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub body: String,
}

static NUMBERING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[#*\-\s]*\d+[.)]\s*").expect("numbering regex is valid"));

/// Returns the cleaned header title if `line` looks like a section header.
///
/// Lines that read as prose are rejected and stay in the section body: a
/// trailing sentence terminator, digits outside a leading list number, or
/// text after a colon.
pub fn header_title(line: &str, max_header_chars: usize) -> Option<String> {
    let line = line.trim();
    if line.is_empty()
        || char_len(line) > max_header_chars
        || line.split_whitespace().count() > MAX_HEADER_WORDS
        || !HEADER_RE.is_match(line)
    {
        return None;
    }
    let title = line
        .trim_start_matches(|c: char| c == '#' || c == '*' || c == '-' || c.is_whitespace())
        .trim_end_matches(|c: char| c == ':' || c == '*' || c.is_whitespace());
    if looks_like_prose(title) {
        return None;
    }
    Some(title.to_string())
}

fn looks_like_prose(title: &str) -> bool {
    if title.ends_with(TERMINATORS) {
        return true;
    }
    let unnumbered = NUMBERING_RE.replace(title, "");
    if unnumbered.chars().any(|c| c.is_ascii_digit()) {
        return true;
    }
    unnumbered
        .split_once(':')
        .is_some_and(|(_, rest)| !rest.trim().is_empty())
}

/// Split cleaned text into titled sections.
pub fn detect_sections(
    text: &str,
    document_title: &str,
    max_chars: usize,
    max_header_chars: usize,
    paragraphs_per_group: usize,
) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut current = Section {
        title: document_title.to_string(),
        body: String::new(),
    };
    let mut current_is_header = false;
    let mut headers_found = 0usize;

    for line in text.split('\n') {
        if let Some(title) = header_title(line, max_header_chars) {
            headers_found += 1;
            if current_is_header && current.body.trim().is_empty() {
                // Adjacent headers collapse into one section.
                current.title = format!("{} / {}", current.title, title);
                continue;
            }
            push_section(&mut sections, current);
            current = Section {
                title,
                body: String::new(),
            };
            current_is_header = true;
            continue;
        }
        if !current.body.is_empty() {
            current.body.push('\n');
        }
        current.body.push_str(line);
    }
    push_section(&mut sections, current);

    if headers_found > 0 && !sections.is_empty() {
        return sections;
    }

    fallback_sections(text, document_title, max_chars, paragraphs_per_group)
}

fn push_section(sections: &mut Vec<Section>, mut section: Section) {
    section.body = section.body.trim().to_string();
    if !section.body.is_empty() {
        sections.push(section);
    }
}

fn fallback_sections(
    text: &str,
    document_title: &str,
    max_chars: usize,
    paragraphs_per_group: usize,
) -> Vec<Section> {
    let paragraphs: Vec<&str> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    if paragraphs.len() >= 2 {
        return paragraphs
            .chunks(paragraphs_per_group.max(1))
            .enumerate()
            .map(|(i, group)| Section {
                title: format!("Section {}", i + 1),
                body: group.join("\n\n"),
            })
            .collect();
    }

    let text = text.trim();
    if char_len(text) <= max_chars {
        return vec![Section {
            title: document_title.to_string(),
            body: text.to_string(),
        }];
    }

    equal_parts(text, FALLBACK_PARTS)
        .into_iter()
        .enumerate()
        .map(|(i, body)| Section {
            title: format!("Part {}", i + 1),
            body,
        })
        .collect()
}

/// Partition into `parts` roughly equal spans, cutting only at sentence breaks.
fn equal_parts(text: &str, parts: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let target = chars.len().div_ceil(parts.max(1));
    let mut out = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + target).min(chars.len());
        while end < chars.len() && !(TERMINATORS.contains(&chars[end - 1]) && chars[end].is_whitespace()) {
            end += 1;
        }
        let part: String = chars[start..end].iter().collect();
        let part = part.trim();
        if !part.is_empty() {
            out.push(part.to_string());
        }
        start = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_detection_multilingual() {
        assert_eq!(header_title("## Admission", 80).as_deref(), Some("Admission"));
        assert_eq!(header_title("QABUL:", 80).as_deref(), Some("QABUL"));
        assert_eq!(header_title("Контакты", 80).as_deref(), Some("Контакты"));
        assert_eq!(header_title("2. Faculties", 80).as_deref(), Some("2. Faculties"));
        assert!(header_title("Hello there", 80).is_none());
    }

    #[test]
    fn test_prose_lines_are_not_headers() {
        assert!(header_title("Documents must be notarized before 15 August.", 80).is_none());
        assert!(header_title("Contact the dean's office today!", 80).is_none());
        assert!(header_title("Fees for 2024", 80).is_none());
        assert!(header_title("Admission: open all year", 80).is_none());
        assert!(header_title("Qabul komissiyasi har kuni ishlaydi.", 80).is_none());
        assert_eq!(header_title("3) Documents", 80).as_deref(), Some("3) Documents"));
    }

    #[test]
    fn test_prose_line_stays_in_body() {
        let text = "Admission\nApplications open in June.\nDocuments must be notarized before 15 August.\nThe commission replies within ten days.";
        let sections = detect_sections(text, "Guide", 1500, 80, 3);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].title, "Admission");
        assert!(sections[0].body.contains("Documents must be notarized before 15 August."));
    }

    #[test]
    fn test_long_line_is_not_header() {
        let line = "Admission to the university is open to all graduates of secondary schools and colleges.";
        assert!(header_title(line, 80).is_none());
    }

    #[test]
    fn test_sections_with_preamble() {
        let text = "Welcome text here.\nAdmission\nApply by July.\nContact\nCall us.";
        let sections = detect_sections(text, "Guide", 1500, 80, 3);
        let titles: Vec<&str> = sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Guide", "Admission", "Contact"]);
        assert_eq!(sections[1].body, "Apply by July.");
    }

    #[test]
    fn test_adjacent_headers_merge() {
        let text = "Admission\nRequirements\nPassport copy and diploma.";
        let sections = detect_sections(text, "Guide", 1500, 80, 3);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].title, "Admission / Requirements");
    }

    #[test]
    fn test_paragraph_group_fallback() {
        let text = (1..=7)
            .map(|i| format!("Paragraph {i} text."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let sections = detect_sections(&text, "Doc", 1500, 80, 3);
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].title, "Section 1");
        assert_eq!(sections[2].body, "Paragraph 7 text.");
    }

    #[test]
    fn test_equal_partition_fallback() {
        let text = "Lorem ipsum dolor sit amet. ".repeat(80);
        let sections = detect_sections(&text, "Doc", 1000, 80, 3);
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].title, "Part 1");
    }

    #[test]
    fn test_equal_partition_keeps_single_sentence() {
        let text = format!("{}.", "word ".repeat(300).trim());
        let sections = detect_sections(&text, "Doc", 1000, 80, 3);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].body, text);
    }

    #[test]
    fn test_short_single_paragraph_stays_whole() {
        let sections = detect_sections("Just one short paragraph.", "Doc", 1000, 80, 3);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].title, "Doc");
    }
}
