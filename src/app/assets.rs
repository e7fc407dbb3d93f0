use serde_json::json;

use super::types::SiteProfile;

const EXPAND_SCRIPT: &str = r#"
document.addEventListener('DOMContentLoaded', function () {
    const rules = __JOBFILL_RULES__;

    const offers = document.querySelectorAll(rules.card_selector);
    const detailBox = document.querySelector(rules.detail_box_selector);
    if (!detailBox) return;

    const detailContainer = detailBox.querySelector(rules.detail_selector);
    if (!detailContainer) return;

    const escapeHtml = (text) => text
        .replace(/&/g, '&amp;')
        .replace(/</g, '&lt;')
        .replace(/>/g, '&gt;');
    const lower = (list) => list.map(word => word.toLowerCase());
    const headings = lower(rules.heading_keywords);
    const facts = lower(rules.fact_keywords);

    const formatLine = (line) => {
        const low = line.toLowerCase();
        if (headings.some(word => low.startsWith(word))) {
            return `<h3 style="margin:20px 0 10px 0; font-size:18px; font-weight:bold;">${escapeHtml(line)}</h3>`;
        }
        if (/^\s*-\s*/.test(line)) {
            return `<p style="margin:0 0 8px 0;">&bull; ${escapeHtml(line.replace(/^\s*-\s*/, ''))}</p>`;
        }
        if (line.includes('*')) {
            return `<p style="margin:0 0 8px 0;">&bull; ${escapeHtml(line.replace(/\*/g, '').trim())}</p>`;
        }
        if (line.length < rules.fact_max_chars && facts.some(word => low.includes(word))) {
            return `<p style="margin:0 0 10px 0; font-weight:bold;">${escapeHtml(line)}</p>`;
        }
        return `<p style="margin:0 0 12px 0;">${escapeHtml(line)}</p>`;
    };

    offers.forEach(offer => {
        offer.addEventListener('click', () => {
            offers.forEach(o => o.classList.remove(rules.selected_class));
            offer.classList.add(rules.selected_class);

            const descDiv = offer.querySelector('.' + rules.description_class);
            if (!descDiv) return;

            const title = (offer.querySelector(rules.title_selector) || {}).innerText || '';
            const texts = Array.from(offer.querySelectorAll(rules.supporting_selector))
                .filter(p => !descDiv.contains(p))
                .map(p => p.innerText.trim())
                .filter(t => t.length > 0);
            const company = texts.length > 0 ? texts[0] : '';
            const place = texts.length > 1 ? texts[texts.length - 1] : '';

            const lines = Array.from(descDiv.querySelectorAll('p'))
                .flatMap(p => p.textContent.split('\n'))
                .map(line => line.trim())
                .filter(line => line.length > 0);

            detailContainer.classList.remove('hide');
            detailContainer.innerHTML = `
                <div class="box_border" style="padding:20px;">
                    <h1 class="fs22 fwB" style="margin-bottom:5px;">${escapeHtml(title)}</h1>
                    <p class="fwB" style="margin:0;">${escapeHtml(company)}</p>
                    <p style="margin:0 0 15px 0;">${escapeHtml(place)}</p>
                    <div style="font-size:15px; line-height:1.5;">${lines.map(formatLine).join('')}</div>
                </div>`;
        });
    });

    if (offers.length > 0) {
        offers[0].click();
    }
});
"#;

/// Marked `<style>` and `<script>` elements for the inline layout.
pub struct Assets {
    pub style: String,
    pub script: String,
}

impl Assets {
    pub fn for_profile(profile: &SiteProfile) -> Self {
        let marker = &profile.asset_attribute;
        let css = format!(
            ".{} {{\n    display: none !important;\n}}\n\n{} {{\n    display: none !important;\n}}",
            profile.description_class, profile.presentation.loading_selector
        );

        let rules = json!({
            "card_selector": profile.card_selector,
            "selected_class": profile.selected_class,
            "description_class": profile.description_class,
            "title_selector": profile.title_selector,
            "supporting_selector": profile.supporting_selector,
            "detail_box_selector": profile.presentation.detail_box_selector,
            "detail_selector": profile.presentation.detail_selector,
            "heading_keywords": profile.presentation.heading_keywords,
            "fact_keywords": profile.presentation.fact_keywords,
            "fact_max_chars": profile.presentation.fact_max_chars,
        });
        // "</" inside a script body could close the element early.
        let rules = rules.to_string().replace("</", "<\\/");
        let js = EXPAND_SCRIPT.trim().replace("__JOBFILL_RULES__", &rules);

        Self {
            style: format!("<style {marker}=\"1\">{}</style>", css.replace("</", "<\\/")),
            script: format!("<script {marker}=\"1\">{js}</script>"),
        }
    }
}
