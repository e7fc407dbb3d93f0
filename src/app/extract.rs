//! Description extraction by text density.
//!
//! Detail pages carry no structured data and their class names churn, so the
//! description is guessed as the longest block container that is long enough
//! and free of boilerplate phrases.

use scraper::{ElementRef, Html, Selector};

use super::error::{FillError, Result};
use super::types::{HeuristicConfig, TieBreak};

const SKIP_TAGS: [&str; 6] = ["script", "style", "noscript", "template", "head", "svg"];

const PARAGRAPH_TAGS: [&str; 22] = [
    "address", "article", "aside", "blockquote", "div", "dl", "fieldset", "figure", "footer",
    "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "main", "nav", "p", "section",
];

const LINE_TAGS: [&str; 9] = ["br", "dd", "dt", "li", "ol", "pre", "table", "tr", "ul"];

pub struct Extractor {
    containers: Selector,
    min_chars: usize,
    denylist: Vec<String>,
    tie_break: TieBreak,
}

impl Extractor {
    pub fn new(config: &HeuristicConfig) -> Result<Self> {
        let containers =
            Selector::parse(&config.container_selector).map_err(|_| FillError::Selector {
                field: "heuristic.container_selector",
                selector: config.container_selector.clone(),
            })?;
        Ok(Self {
            containers,
            min_chars: config.min_chars,
            denylist: config
                .denylist
                .iter()
                .map(|term| term.to_lowercase())
                .filter(|term| !term.is_empty())
                .collect(),
            tie_break: config.tie_break,
        })
    }

    /// Text of the most likely description container, one line per block;
    /// empty when nothing qualifies.
    pub fn extract(&self, html: &str) -> String {
        let doc = Html::parse_document(html);
        self.best_container(&doc)
            .map(block_text)
            .unwrap_or_default()
    }

    fn best_container<'a>(&self, doc: &'a Html) -> Option<ElementRef<'a>> {
        let mut best: Option<(usize, ElementRef<'a>)> = None;

        for el in doc.select(&self.containers) {
            let text = visible_text(el);
            let length = text.chars().count();
            if length < self.min_chars {
                continue;
            }
            let lower = text.to_lowercase();
            if self.denylist.iter().any(|term| lower.contains(term.as_str())) {
                continue;
            }

            let replace = match (best, self.tie_break) {
                (None, _) => true,
                (Some((current, _)), TieBreak::First) => length > current,
                (Some((current, _)), TieBreak::Last) => length >= current,
            };
            if replace {
                best = Some((length, el));
            }
        }

        best.map(|(_, el)| el)
    }
}

fn normalize_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_skipped(el: &ElementRef<'_>) -> bool {
    SKIP_TAGS.contains(&el.value().name())
}

/// Descendant text with whitespace collapsed, as used for scoring.
pub fn visible_text(el: ElementRef<'_>) -> String {
    let mut pieces = Vec::new();
    collect_pieces(el, &mut pieces);
    normalize_text(&pieces.join(" "))
}

fn collect_pieces<'a>(el: ElementRef<'a>, out: &mut Vec<&'a str>) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push(text);
        } else if let Some(child_el) = ElementRef::wrap(child)
            && !is_skipped(&child_el)
        {
            collect_pieces(child_el, out);
        }
    }
}

#[derive(Default)]
struct BlockWriter {
    lines: Vec<String>,
    current: String,
    paragraph: bool,
}

impl BlockWriter {
    fn flush(&mut self) {
        let line = normalize_text(&self.current);
        self.current.clear();
        if line.is_empty() {
            return;
        }
        if self.paragraph && !self.lines.is_empty() {
            self.lines.push(String::new());
        }
        self.paragraph = false;
        self.lines.push(line);
    }

    fn line_break(&mut self) {
        self.flush();
    }

    fn paragraph_break(&mut self) {
        self.flush();
        self.paragraph = true;
    }

    fn finish(mut self) -> String {
        self.flush();
        self.lines.join("\n")
    }
}

/// Serializes `el` with a newline at every line-level block boundary and a
/// blank line at every paragraph-level one.
pub fn block_text(el: ElementRef<'_>) -> String {
    let mut writer = BlockWriter::default();
    write_blocks(el, &mut writer);
    writer.finish()
}

fn write_blocks(el: ElementRef<'_>, writer: &mut BlockWriter) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            writer.current.push_str(text);
            continue;
        }
        let Some(child_el) = ElementRef::wrap(child) else {
            continue;
        };
        if is_skipped(&child_el) {
            continue;
        }

        let name = child_el.value().name();
        if PARAGRAPH_TAGS.contains(&name) {
            writer.paragraph_break();
            write_blocks(child_el, writer);
            writer.paragraph_break();
        } else if LINE_TAGS.contains(&name) {
            writer.line_break();
            write_blocks(child_el, writer);
            writer.line_break();
        } else {
            write_blocks(child_el, writer);
        }
    }
}
