use scraper::{ElementRef, Selector};
use serde::Deserialize;

use crate::error::ConfigError;

use super::normalizer::clean_text;

/// What an expression reads from the element it matched.
#[derive(Debug, Clone, PartialEq)]
enum Target {
    /// `css::text`
    Text,
    /// `css::attr(name)`
    Attr(String),
    /// Bare `css`: text for text lookups, the default attribute for link lookups.
    Inherit,
}

#[derive(Debug, Clone)]
struct Expression {
    /// `None` when the expression is only a suffix, e.g. `::attr(href)`,
    /// and applies to the node itself.
    css: Option<Selector>,
    target: Target,
}

/// Ordered fallback list of extraction expressions for one logical field.
///
/// Expressions are CSS selectors with an optional `::text` or `::attr(name)`
/// suffix. Earlier expressions take precedence, so specific selectors must be
/// listed before generic catch-alls.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "OneOrMany")]
pub struct SelectorChain {
    raw: Vec<String>,
    expressions: Vec<Expression>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl TryFrom<OneOrMany> for SelectorChain {
    type Error = ConfigError;

    fn try_from(value: OneOrMany) -> Result<Self, Self::Error> {
        match value {
            OneOrMany::One(expression) => SelectorChain::parse([expression]),
            OneOrMany::Many(expressions) => SelectorChain::parse(expressions),
        }
    }
}

impl SelectorChain {
    pub fn parse<I, S>(expressions: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut raw = vec![];
        let mut parsed = vec![];
        for expression in expressions {
            let expression = expression.as_ref().trim();
            if expression.is_empty() {
                continue;
            }
            parsed.push(parse_expression(expression)?);
            raw.push(expression.to_string());
        }

        Ok(SelectorChain {
            raw,
            expressions: parsed,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }

    pub fn expressions(&self) -> &[String] {
        &self.raw
    }

    /// Every element matched by any expression, expression order first, then
    /// document order. Used for item containers.
    pub fn select_all<'a>(&self, node: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        self.expressions
            .iter()
            .flat_map(|expression| matched_elements(node, expression))
            .collect()
    }

    fn first_value(&self, node: ElementRef, default_attr: Option<&str>) -> Option<String> {
        self.expressions.iter().find_map(|expression| {
            matched_elements(node, expression)
                .into_iter()
                .find_map(|element| read_value(element, &expression.target, default_attr))
        })
    }

    fn all_values(&self, node: ElementRef, default_attr: Option<&str>) -> Vec<String> {
        self.expressions
            .iter()
            .flat_map(|expression| {
                matched_elements(node, expression)
                    .into_iter()
                    .filter_map(|element| read_value(element, &expression.target, default_attr))
                    .collect::<Vec<String>>()
            })
            .collect()
    }
}

/// First non-empty, whitespace-normalized value the chain yields on `node`.
/// Bare selectors read the element's text.
pub fn resolve(node: ElementRef, chain: &SelectorChain) -> Option<String> {
    chain.first_value(node, None)
}

/// Like [`resolve`], but bare selectors read the `attr` attribute instead of
/// the text. Explicit `::text` / `::attr(..)` suffixes still win.
pub fn resolve_attr(node: ElementRef, chain: &SelectorChain, attr: &str) -> Option<String> {
    chain.first_value(node, Some(attr))
}

pub fn resolve_href(node: ElementRef, chain: &SelectorChain) -> Option<String> {
    resolve_attr(node, chain, "href")
}

/// Every `href` the chain yields on `node`, in order.
pub fn resolve_all_hrefs(node: ElementRef, chain: &SelectorChain) -> Vec<String> {
    chain.all_values(node, Some("href"))
}

fn parse_expression(raw: &str) -> Result<Expression, ConfigError> {
    let invalid = |reason: &str| ConfigError::Selector {
        selector: raw.to_string(),
        reason: reason.to_string(),
    };

    let (css, target) = if let Some(css) = raw.strip_suffix("::text") {
        (css, Target::Text)
    } else if let Some(index) = raw.rfind("::attr(") {
        let Some(attr) = raw[index + "::attr(".len()..].strip_suffix(')') else {
            return Err(invalid("unterminated ::attr("));
        };
        let attr = attr.trim();
        if attr.is_empty() {
            return Err(invalid("empty attribute name"));
        }
        (&raw[..index], Target::Attr(attr.to_string()))
    } else {
        (raw, Target::Inherit)
    };

    let css = css.trim();
    let css = match css.is_empty() {
        true => None,
        false => Some(Selector::parse(css).map_err(|e| invalid(&e.to_string()))?),
    };

    Ok(Expression { css, target })
}

fn matched_elements<'a>(node: ElementRef<'a>, expression: &Expression) -> Vec<ElementRef<'a>> {
    match &expression.css {
        Some(css) => node.select(css).collect(),
        None => vec![node],
    }
}

fn read_value(element: ElementRef, target: &Target, default_attr: Option<&str>) -> Option<String> {
    let attr = match (target, default_attr) {
        (Target::Attr(name), _) => Some(name.as_str()),
        (Target::Inherit, Some(name)) => Some(name),
        (Target::Text, _) | (Target::Inherit, None) => None,
    };

    match attr {
        Some(name) => element.value().attr(name).and_then(clean_text),
        None => clean_text(&element.text().collect::<Vec<_>>().join(" ")),
    }
}

#[cfg(test)]
mod tests {
    use scraper::Html;

    use super::*;

    const CARD: &str = r#"
        <div class="card">
            <h2 class="title">  Maple   Plumbing </h2>
            <span class="alt">Maple Plumbing Ltd.</span>
            <a class="site" href="/maple">Website</a>
            <p class="empty">   </p>
        </div>"#;

    #[test]
    fn first_matching_expression_wins() {
        let html = Html::parse_fragment(CARD);
        let chain = SelectorChain::parse([".missing", ".title::text", ".alt::text"]).unwrap();

        assert_eq!(
            resolve(html.root_element(), &chain),
            Some("Maple Plumbing".to_string())
        );
    }

    #[test]
    fn empty_matches_fall_through() {
        let html = Html::parse_fragment(CARD);
        let chain = SelectorChain::parse([".empty", ".alt"]).unwrap();

        assert_eq!(
            resolve(html.root_element(), &chain),
            Some("Maple Plumbing Ltd.".to_string())
        );
    }

    #[test]
    fn nothing_matches_yields_none() {
        let html = Html::parse_fragment(CARD);
        let chain = SelectorChain::parse([".nope", "table td"]).unwrap();

        assert_eq!(resolve(html.root_element(), &chain), None);
        assert_eq!(resolve(html.root_element(), &SelectorChain::parse(Vec::<String>::new()).unwrap()), None);
    }

    #[test]
    fn attribute_syntax_reads_attributes() {
        let html = Html::parse_fragment(CARD);
        let explicit = SelectorChain::parse(["a.site::attr(href)"]).unwrap();
        let bare = SelectorChain::parse(["a.site"]).unwrap();

        assert_eq!(resolve(html.root_element(), &explicit), Some("/maple".to_string()));
        assert_eq!(resolve(html.root_element(), &bare), Some("Website".to_string()));
        assert_eq!(resolve_href(html.root_element(), &bare), Some("/maple".to_string()));
    }

    #[test]
    fn suffix_only_expression_targets_node_itself() {
        let html = Html::parse_fragment(r#"<a class="row" href="/x">Row</a>"#);
        let rows = Selector::parse("a.row").unwrap();
        let row = html.select(&rows).next().unwrap();
        let chain = SelectorChain::parse(["::attr(href)"]).unwrap();

        assert_eq!(resolve(row, &chain), Some("/x".to_string()));
    }

    #[test]
    fn all_hrefs_are_collected_in_order() {
        let html = Html::parse_fragment(r#"<a class="d" href="/1">1</a><a class="d" href="/2">2</a><a class="e" href="/3">3</a>"#);
        let chain = SelectorChain::parse(["a.d", "a.e"]).unwrap();

        assert_eq!(resolve_all_hrefs(html.root_element(), &chain), vec!["/1", "/2", "/3"]);
    }

    #[test]
    fn invalid_selectors_are_config_errors() {
        assert!(matches!(
            SelectorChain::parse(["div[[["]),
            Err(ConfigError::Selector { .. })
        ));
        assert!(matches!(
            SelectorChain::parse(["a::attr(href"]),
            Err(ConfigError::Selector { .. })
        ));
    }
}
