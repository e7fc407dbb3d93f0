//! Snapshot rewriting.
//!
//! Every pass starts from a cleaned document: previously injected description
//! blocks and marked assets are removed first, so running the rewrite again on
//! its own output yields the same bytes. Untouched markup streams through
//! `lol_html` verbatim.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use html_escape::encode_text;
use lol_html::html_content::{ContentType, Element};
use lol_html::{ElementContentHandlers, HtmlRewriter, Settings, element};
use scraper::{Html, Selector};
use tracing::{debug, warn};

use super::assets::Assets;
use super::describe::DescriptionSource;
use super::error::{FillError, Result};
use super::extract::visible_text;
use super::types::{Identifier, RewriteMode, SiteProfile};

const HEADER_SEPARATOR: &str = " · ";

#[derive(Debug, Default)]
pub struct Rewritten {
    pub html: String,
    pub cards_injected: usize,
    pub panel_filled: bool,
    /// Structural misses: cards without a link, no selected card, no panel.
    pub skips: Vec<String>,
}

pub struct Rewriter<'a> {
    profile: &'a SiteProfile,
    mode: RewriteMode,
    assets: Assets,
}

impl<'a> Rewriter<'a> {
    pub fn new(profile: &'a SiteProfile, mode: RewriteMode) -> Self {
        Self {
            profile,
            mode,
            assets: Assets::for_profile(profile),
        }
    }

    pub async fn rewrite<S: DescriptionSource>(
        &self,
        html: &str,
        source: &mut S,
    ) -> Result<Rewritten> {
        let clean = self.cleanup(html)?;
        match self.mode {
            RewriteMode::Inline => self.inline(clean, source).await,
            RewriteMode::Panel => self.panel(clean, source).await,
        }
    }

    /// Drops injected description blocks and marked style/script elements.
    pub fn cleanup(&self, html: &str) -> Result<String> {
        let profile = self.profile;
        stream(
            html,
            vec![
                element!(profile.description_selector(), |el| {
                    el.remove();
                    Ok(())
                }),
                element!(profile.asset_selector("style"), |el| {
                    el.remove();
                    Ok(())
                }),
                element!(profile.asset_selector("script"), |el| {
                    el.remove();
                    Ok(())
                }),
            ],
        )
    }

    async fn inline<S: DescriptionSource>(
        &self,
        clean: String,
        source: &mut S,
    ) -> Result<Rewritten> {
        let mut skips = Vec::new();
        let mut blocks = HashMap::new();
        let mut seen = HashSet::new();

        for (position, link) in card_links(&clean, &self.profile.card_selector)?
            .into_iter()
            .enumerate()
        {
            let Some(id) = link else {
                warn!(card = position + 1, "card without a link, skipping");
                skips.push(format!("card {} has no link", position + 1));
                continue;
            };
            if !seen.insert(id.clone()) {
                continue;
            }
            match source.describe(&id).await? {
                Some(text) => {
                    if let Some(block) = description_block(&self.profile.description_class, &text) {
                        blocks.insert(id, block);
                    }
                }
                None => debug!(%id, "no description, card left as is"),
            }
        }

        let blocks = Arc::new(blocks);
        let open_cards: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let injected = Arc::new(AtomicUsize::new(0));
        let head_seen = Arc::new(AtomicBool::new(false));
        let body_seen = Arc::new(AtomicBool::new(false));

        let card_handler = {
            let open_cards = Arc::clone(&open_cards);
            let blocks = Arc::clone(&blocks);
            let injected = Arc::clone(&injected);
            element!(self.profile.card_selector, move |el: &mut Element<'_, '_>| {
                let Some(handlers) = el.end_tag_handlers() else {
                    return Ok(());
                };
                open_cards
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(None);

                let open_cards = Arc::clone(&open_cards);
                let blocks = Arc::clone(&blocks);
                let injected = Arc::clone(&injected);
                handlers.push(Box::new(move |end| {
                    let href = open_cards
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .pop()
                        .flatten();
                    if let Some(block) = href
                        .as_deref()
                        .and_then(Identifier::from_href)
                        .and_then(|id| blocks.get(&id))
                    {
                        end.before(block, ContentType::Html);
                        injected.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(())
                }));
                Ok(())
            })
        };

        let link_handler = {
            let open_cards = Arc::clone(&open_cards);
            element!("a[href]", move |el| {
                // Only links inside an open card count; the innermost card takes it.
                let mut cards = open_cards.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(slot) = cards.last_mut()
                    && slot.is_none()
                {
                    *slot = el.get_attribute("href");
                }
                Ok(())
            })
        };

        let head_handler = {
            let head_seen = Arc::clone(&head_seen);
            let style = self.assets.style.clone();
            element!("head", move |el| {
                if !head_seen.swap(true, Ordering::Relaxed) {
                    el.append(&style, ContentType::Html);
                }
                Ok(())
            })
        };

        let body_handler = {
            let body_seen = Arc::clone(&body_seen);
            let script = self.assets.script.clone();
            element!("body", move |el| {
                if !body_seen.swap(true, Ordering::Relaxed) {
                    el.append(&script, ContentType::Html);
                }
                Ok(())
            })
        };

        let html = stream(
            &clean,
            vec![card_handler, link_handler, head_handler, body_handler],
        )?;

        if !head_seen.load(Ordering::Relaxed) {
            warn!("document has no <head>, style not injected");
            skips.push("no <head> for the style".to_string());
        }
        if !body_seen.load(Ordering::Relaxed) {
            warn!("document has no <body>, script not injected");
            skips.push("no <body> for the script".to_string());
        }

        Ok(Rewritten {
            html,
            cards_injected: injected.load(Ordering::Relaxed),
            panel_filled: false,
            skips,
        })
    }

    async fn panel<S: DescriptionSource>(
        &self,
        clean: String,
        source: &mut S,
    ) -> Result<Rewritten> {
        let untouched = |clean: String, skip: Option<String>| Rewritten {
            html: clean,
            skips: skip.into_iter().collect(),
            ..Rewritten::default()
        };

        let Some(card) = selected_card(&clean, self.profile)? else {
            warn!("no selected card, document skipped");
            return Ok(untouched(clean, Some("no selected card".to_string())));
        };
        let Some(id) = card.id.clone() else {
            warn!("selected card has no link, document skipped");
            return Ok(untouched(clean, Some("selected card has no link".to_string())));
        };
        let Some(description) = source.describe(&id).await? else {
            debug!(%id, "selected card has no description, panel left as is");
            return Ok(untouched(clean, None));
        };

        let markup = panel_markup(&card, &description);
        let filled = Arc::new(AtomicBool::new(false));
        let html = match panel_shape(&clean, self.profile)? {
            PanelShape::Missing => {
                warn!(panel = %self.profile.panel_selector, "no detail panel, document skipped");
                return Ok(untouched(clean, Some("no detail panel".to_string())));
            }
            PanelShape::WithBody => {
                let open_panels = Arc::new(AtomicUsize::new(0));
                let panel_handler = {
                    let open_panels = Arc::clone(&open_panels);
                    element!(self.profile.panel_selector, move |el: &mut Element<'_, '_>| {
                        let Some(handlers) = el.end_tag_handlers() else {
                            return Ok(());
                        };
                        open_panels.fetch_add(1, Ordering::Relaxed);
                        let open_panels = Arc::clone(&open_panels);
                        handlers.push(Box::new(move |_end| {
                            open_panels.fetch_sub(1, Ordering::Relaxed);
                            Ok(())
                        }));
                        Ok(())
                    })
                };
                let body_handler = {
                    let filled = Arc::clone(&filled);
                    element!(self.profile.panel_body_selector(), move |el| {
                        if open_panels.load(Ordering::Relaxed) > 0
                            && !filled.swap(true, Ordering::Relaxed)
                        {
                            el.set_inner_content(&markup, ContentType::Html);
                        }
                        Ok(())
                    })
                };
                stream(&clean, vec![panel_handler, body_handler])?
            }
            PanelShape::Bare => {
                let filled = Arc::clone(&filled);
                let wrapped = format!(
                    "<div class=\"{}\">{markup}</div>",
                    self.profile.panel_body_class
                );
                stream(
                    &clean,
                    vec![element!(self.profile.panel_selector, move |el| {
                        if !filled.swap(true, Ordering::Relaxed) {
                            el.append(&wrapped, ContentType::Html);
                        }
                        Ok(())
                    })],
                )?
            }
        };

        Ok(Rewritten {
            html,
            cards_injected: 0,
            panel_filled: filled.load(Ordering::Relaxed),
            skips: Vec::new(),
        })
    }
}

fn stream(
    html: &str,
    element_content_handlers: Vec<(Cow<'_, lol_html::Selector>, ElementContentHandlers<'_>)>,
) -> Result<String> {
    let mut output = Vec::with_capacity(html.len() + 1024);
    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers,
            ..Settings::default()
        },
        |chunk: &[u8]| output.extend_from_slice(chunk),
    );
    rewriter.write(html.as_bytes())?;
    rewriter.end()?;
    Ok(String::from_utf8_lossy(&output).into_owned())
}

fn css(field: &'static str, selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|_| FillError::Selector {
        field,
        selector: selector.to_string(),
    })
}

/// Identifier of the first `a[href]` of every card, in document order.
fn card_links(html: &str, card_selector: &str) -> Result<Vec<Option<Identifier>>> {
    let cards = css("card_selector", card_selector)?;
    let anchors = css("card_selector", "a[href]")?;
    let doc = Html::parse_document(html);
    Ok(doc
        .select(&cards)
        .map(|card| {
            card.select(&anchors)
                .next()
                .and_then(|a| a.value().attr("href"))
                .and_then(Identifier::from_href)
        })
        .collect())
}

/// Hidden container with one `<p>` per blank-line separated paragraph.
fn description_block(class: &str, text: &str) -> Option<String> {
    let paragraphs = paragraphs(text);
    if paragraphs.is_empty() {
        return None;
    }
    let mut out = format!("<div class=\"{class}\">");
    for paragraph in paragraphs {
        out.push_str("<p>");
        out.push_str(&encode_text(&paragraph));
        out.push_str("</p>");
    }
    out.push_str("</div>");
    Some(out)
}

fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            if !current.is_empty() {
                out.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current.join("\n"));
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SelectedCard {
    id: Option<Identifier>,
    title: String,
    organization: Option<String>,
    location: Option<String>,
}

fn selected_card(html: &str, profile: &SiteProfile) -> Result<Option<SelectedCard>> {
    let cards = css("card_selector", &profile.card_selector)?;
    let anchors = css("card_selector", "a[href]")?;
    let titles = css("title_selector", &profile.title_selector)?;
    let supporting = css("supporting_selector", &profile.supporting_selector)?;

    let doc = Html::parse_document(html);
    let Some(card) = doc
        .select(&cards)
        .find(|card| card.value().classes().any(|class| class == profile.selected_class))
    else {
        return Ok(None);
    };

    let short_lines = card
        .select(&supporting)
        .map(visible_text)
        .filter(|text| !text.is_empty() && text.chars().count() <= profile.header_line_max_chars)
        .collect::<Vec<_>>();

    Ok(Some(SelectedCard {
        id: card
            .select(&anchors)
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(Identifier::from_href),
        title: card.select(&titles).next().map(visible_text).unwrap_or_default(),
        organization: short_lines.first().cloned(),
        location: if short_lines.len() > 1 {
            short_lines.last().cloned()
        } else {
            None
        },
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PanelShape {
    Missing,
    Bare,
    WithBody,
}

fn panel_shape(html: &str, profile: &SiteProfile) -> Result<PanelShape> {
    let panels = css("panel_selector", &profile.panel_selector)?;
    let body = css("panel_body_class", &profile.panel_body_selector())?;
    let doc = Html::parse_document(html);
    Ok(match doc.select(&panels).next() {
        None => PanelShape::Missing,
        Some(panel) if panel.select(&body).next().is_some() => PanelShape::WithBody,
        Some(_) => PanelShape::Bare,
    })
}

fn panel_markup(card: &SelectedCard, description: &str) -> String {
    let mut out = String::new();
    if !card.title.is_empty() {
        out.push_str(&format!("<h1 class=\"fs22 fwB\">{}</h1>", encode_text(&card.title)));
    }
    let header = [card.organization.as_deref(), card.location.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(HEADER_SEPARATOR);
    if !header.is_empty() {
        out.push_str(&format!("<p class=\"fwB\">{}</p>", encode_text(&header)));
    }
    out.push_str("<hr>");
    for line in description.lines().map(str::trim).filter(|line| !line.is_empty()) {
        out.push_str(&format!("<p>{}</p>", encode_text(line)));
    }
    out
}
