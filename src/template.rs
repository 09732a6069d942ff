//! Template expansion for rendered review images.
//!
//! Templates are opaque HTML documents carrying a known placeholder set.
//! Expansion is a single pass over that set; every value that originated
//! from user input is HTML-entity-escaped first.

use crate::config::CompanyConfig;

/// Filled-star glyph repeated `rating` times in `{{STARS}}`.
const STAR_GLYPH: char = '\u{2605}';

/// Ratings at or below this render with the `low-rating` style class.
const LOW_RATING_THRESHOLD: i64 = 3;

/// Inputs for one expansion. All user-controlled strings are escaped inside
/// [`expand`]; callers pass them raw.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub reviewer_name: String,
    pub review_text: String,
    pub rating: i64,
    pub tech_name: Option<String>,
    pub tech_photo_url: Option<String>,
    /// Source tag controlling the platform badge, when known.
    pub source: Option<String>,
    pub brand_color: Option<String>,
    pub logo_url: Option<String>,
    /// Base URL for absolutising relative asset URLs.
    pub base_url: String,
}

/// Expand every placeholder in `template`.
pub fn expand(template: &str, company: &CompanyConfig, ctx: &TemplateContext) -> String {
    let rating = ctx.rating.clamp(0, 5);
    let brand_color = ctx.brand_color.as_deref().unwrap_or(&company.brand_color);
    let logo_url = ctx.logo_url.as_deref().unwrap_or(&company.logo_url);

    let tech_name = ctx.tech_name.as_deref().unwrap_or("");
    let tech_photo_url = ctx.tech_photo_url.as_deref().unwrap_or("");
    let tech_display = if !tech_name.is_empty() && !tech_photo_url.is_empty() {
        "flex"
    } else {
        "none"
    };
    let low_rating_class = if rating <= LOW_RATING_THRESHOLD {
        "low-rating"
    } else {
        ""
    };

    template
        .replace("{{BRAND_COLOR}}", &html_escape(brand_color))
        .replace("{{BRAND_COLOR_DARK}}", &html_escape(&company.brand_color_dark))
        .replace("{{COMPANY_NAME}}", &html_escape(&company.name))
        .replace("{{COMPANY_PHONE}}", &html_escape(&company.phone))
        .replace("{{LOGO_URL}}", &resolve_url(logo_url, &ctx.base_url))
        .replace("{{REVIEWER_NAME}}", &html_escape(&ctx.reviewer_name))
        .replace("{{REVIEW_TEXT}}", &html_escape(&ctx.review_text))
        .replace("{{STARS}}", &star_glyphs(rating))
        .replace(
            "{{TECH_PHOTO_URL}}",
            &resolve_url(&html_escape(tech_photo_url), &ctx.base_url),
        )
        .replace("{{TECH_NAME}}", &html_escape(tech_name))
        .replace("{{TECH_DISPLAY}}", tech_display)
        .replace("{{LOW_RATING_CLASS}}", low_rating_class)
        .replace(
            "{{PLATFORM_BADGE}}",
            &ctx.source.as_deref().map(badge_html).unwrap_or_default(),
        )
}

/// Escape `& < > " '` for embedding in HTML attribute or text positions.
pub fn html_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Filled stars for a clamped rating.
pub fn star_glyphs(rating: i64) -> String {
    std::iter::repeat(STAR_GLYPH)
        .take(rating.clamp(0, 5) as usize)
        .collect()
}

/// Resolve a possibly-relative asset URL against the request base.
pub fn resolve_url(url: &str, base_url: &str) -> String {
    if url.is_empty() || url.starts_with("http://") || url.starts_with("https://") || url.starts_with("data:") {
        return url.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        url.trim_start_matches('/')
    )
}

/// A known review platform with its badge styling.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PlatformBadge {
    pub key: &'static str,
    pub label: &'static str,
    pub color: &'static str,
}

pub const PLATFORM_BADGES: &[PlatformBadge] = &[
    PlatformBadge {
        key: "google",
        label: "Google",
        color: "#4285F4",
    },
    PlatformBadge {
        key: "yelp",
        label: "Yelp",
        color: "#D32323",
    },
    PlatformBadge {
        key: "facebook",
        label: "Facebook",
        color: "#1877F2",
    },
];

pub fn platform_badge(key: &str) -> Option<&'static PlatformBadge> {
    PLATFORM_BADGES.iter().find(|b| b.key == key)
}

/// Badge markup for `{{PLATFORM_BADGE}}`; empty for unknown platforms.
pub fn badge_html(source: &str) -> String {
    match platform_badge(source) {
        Some(badge) => format!(
            r#"<span class="platform-badge" style="background:{}">{}</span>"#,
            badge.color, badge.label
        ),
        None => String::new(),
    }
}
