use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use scraper::{ElementRef, Selector};
use url::Url;

/// Number of text fragments scanned when looking for an email in free text.
const EMAIL_TEXT_FRAGMENT_LIMIT: usize = 500;

const ASSET_EXTENSIONS: [&str; 6] = [".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp"];

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap());
static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\+?1?[\s\-.]?\(?\d{3}\)?[\s\-.]?\d{3}[\s\-.]?\d{4})").unwrap()
});

static AT_BRACKETED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*[\[\(\{]\s*at\s*[\]\)\}]\s*").unwrap());
static DOT_BRACKETED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*[\[\(\{]\s*dot\s*[\]\)\}]\s*").unwrap());
/// A spelled-out address, `name at domain dot tld`. Only matches when the
/// domain has at least one ` dot `, so prose like "visit us at www.x.ca" is left alone.
static WORD_EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([\w.+-]+)(?:\s*@\s*|\s+at\s+)([\w-]+(?:\s+dot\s+[\w-]+)+)").unwrap()
});
static DOT_WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+dot\s+").unwrap());

static MAILTO_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse(r#"a[href^="mailto:"]"#).unwrap());
static TEL_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse(r#"a[href^="tel:"]"#).unwrap());
static DATA_EMAIL: Lazy<Selector> = Lazy::new(|| Selector::parse("[data-email]").unwrap());
static DATA_USER_DOMAIN: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-user][data-domain]").unwrap());

/// Collapses runs of whitespace and trims. Blank input yields `None`.
pub fn clean_text(text: &str) -> Option<String> {
    let cleaned = text.split_whitespace().join(" ");
    match cleaned.is_empty() {
        true => None,
        false => Some(cleaned),
    }
}

/// Canonical phone form: an optional leading `+` followed by digits only.
///
/// A `tel:` scheme and any URI parameters are dropped first. Digits are never
/// added or removed, so `416-555-0100` and `+1 416 555 0100` stay distinct.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let number = match trimmed.get(..4) {
        Some(scheme) if scheme.eq_ignore_ascii_case("tel:") => &trimmed[4..],
        _ => trimmed,
    };
    let number = number.split(['?', ';']).next().unwrap_or_default();
    let number = number.replace("%2B", "+").replace("%2b", "+");

    let mut normalized = String::with_capacity(number.len());
    for ch in number.chars() {
        if ch.is_ascii_digit() {
            normalized.push(ch);
        } else if ch == '+' && normalized.is_empty() {
            normalized.push(ch);
        }
    }

    match normalized.trim_start_matches('+').is_empty() {
        true => None,
        false => Some(normalized),
    }
}

/// Drops a `mailto:` scheme and its query string, if present.
pub fn strip_mailto(value: &str) -> String {
    let trimmed = value.trim();
    match trimmed.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("mailto:") => trimmed[7..]
            .split('?')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string(),
        _ => trimmed.to_string(),
    }
}

/// Rewrites `[at]`, `(dot)` and friends into `@` and `.` everywhere. The bare
/// words ` at ` and ` dot ` are rewritten only inside an address-shaped run.
pub fn deobfuscate_email_text(text: &str) -> String {
    let text = AT_BRACKETED_RE.replace_all(text, "@");
    let text = DOT_BRACKETED_RE.replace_all(&text, ".");
    WORD_EMAIL_RE
        .replace_all(&text, |caps: &Captures| {
            format!("{}@{}", &caps[1], DOT_WORD_RE.replace_all(&caps[2], "."))
        })
        .into_owned()
}

/// First plausible email in `text`, trying the raw text before deobfuscating it.
pub fn find_email_in_text(text: &str) -> Option<String> {
    first_email(text).or_else(|| first_email(&deobfuscate_email_text(text)))
}

/// Turns an extracted email value (possibly a mailto href or obfuscated text)
/// into a bare address.
pub fn normalize_email(value: &str) -> Option<String> {
    find_email_in_text(&strip_mailto(value))
}

fn first_email(text: &str) -> Option<String> {
    EMAIL_RE
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches('.').to_string())
        .find(|email| {
            let lower = email.to_lowercase();
            !ASSET_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
        })
}

/// Looks for an email inside `node`: mailto links, then visible text, then
/// `data-email` / `data-user`+`data-domain` attributes.
pub fn discover_email(node: ElementRef) -> Option<String> {
    let from_mailto = node
        .select(&MAILTO_LINK)
        .filter_map(|link| link.value().attr("href"))
        .find_map(normalize_email);
    if from_mailto.is_some() {
        return from_mailto;
    }

    let text = node.text().take(EMAIL_TEXT_FRAGMENT_LIMIT).join(" ");
    if let Some(email) = find_email_in_text(&text) {
        return Some(email);
    }

    let from_data_email = node
        .select(&DATA_EMAIL)
        .filter_map(|el| el.value().attr("data-email"))
        .find_map(normalize_email);
    if from_data_email.is_some() {
        return from_data_email;
    }

    node.select(&DATA_USER_DOMAIN).find_map(|el| {
        let user = el.value().attr("data-user")?.trim();
        let domain = el.value().attr("data-domain")?.trim();
        normalize_email(&format!("{}@{}", user, domain))
    })
}

/// Looks for a phone inside `node`: `tel:` links first, then a North-American
/// number pattern in the rendered text.
pub fn discover_phone(node: ElementRef) -> Option<String> {
    let from_tel = node
        .select(&TEL_LINK)
        .filter_map(|link| link.value().attr("href"))
        .find_map(normalize_phone);
    if from_tel.is_some() {
        return from_tel;
    }

    let text = node.text().join(" ");
    PHONE_RE
        .find(&text)
        .and_then(|m| normalize_phone(m.as_str()))
}

/// Every `tel:` link under `node`, normalized, in document order.
pub fn tel_links(node: ElementRef) -> Vec<String> {
    node.select(&TEL_LINK)
        .filter_map(|link| link.value().attr("href"))
        .filter_map(normalize_phone)
        .collect()
}

/// Resolves `href` against the page it was found on. Absolute URLs pass
/// through; fragments and `javascript:` pseudo-links resolve to nothing.
pub fn absolute_url(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    if href
        .get(..11)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("javascript:"))
    {
        return None;
    }

    base.join(href).ok().map(String::from)
}

/// True for `http` and `https` URLs, the only ones worth fetching.
pub fn is_web_url(value: &str) -> bool {
    match Url::parse(value) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}
