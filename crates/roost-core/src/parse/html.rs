//! DOM helpers over `scraper` for server-rendered pages.
//!
//! Lookups walk elements in document order and match classes as whole
//! tokens. Text never includes `<script>` or `<style>` content.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};

use crate::util::normalize_text_option;

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid regex"));

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Parse a full page; malformed markup is repaired rather than rejected
pub fn document(html: &str) -> Html {
    Html::parse_document(html)
}

/// `scope` and every element below it, in document order
pub fn elements<'a>(scope: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    scope.descendants().filter_map(ElementRef::wrap)
}

pub fn has_class(element: &ElementRef<'_>, class: &str) -> bool {
    element.value().classes().any(|token| token == class)
}

/// Elements carrying `class`, including `scope` itself
pub fn with_class<'a>(scope: ElementRef<'a>, class: &'a str) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    elements(scope).filter(move |element| has_class(element, class))
}

pub fn with_id<'a>(scope: ElementRef<'a>, id: &str) -> Option<ElementRef<'a>> {
    elements(scope).find(|element| element.value().id() == Some(id))
}

pub fn with_name<'a>(scope: ElementRef<'a>, name: &'a str) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    elements(scope).filter(move |element| element.value().name() == name)
}

/// Trimmed attribute value, `None` when absent or blank
pub fn attr(element: &ElementRef<'_>, name: &str) -> Option<String> {
    normalize_text_option(element.value().attr(name).map(str::to_string))
}

/// Visible text of an element, cleaned
pub fn element_text(element: ElementRef<'_>) -> Option<String> {
    let pieces: Vec<&str> = element
        .descendants()
        .filter(|node| {
            node.parent()
                .and_then(ElementRef::wrap)
                .is_none_or(|parent| !RAW_TEXT_ELEMENTS.contains(&parent.value().name()))
        })
        .filter_map(|node| node.value().as_text().map(|text| &**text))
        .collect();
    clean_text(&pieces.join(" "))
}

/// Cleaned text of the first element carrying `class` that has any
pub fn text_by_class(scope: ElementRef<'_>, class: &str) -> Option<String> {
    with_class(scope, class).find_map(element_text)
}

/// Cleaned text of every element carrying `class`
pub fn texts_by_class(scope: ElementRef<'_>, class: &str) -> Vec<String> {
    with_class(scope, class).filter_map(element_text).collect()
}

/// Cleaned text of the first element named `name` that has any
pub fn text_by_tag_name(scope: ElementRef<'_>, name: &str) -> Option<String> {
    with_name(scope, name).find_map(element_text)
}

/// Collapse whitespace and drop empty results
pub fn clean_text(text: &str) -> Option<String> {
    normalize_text_option(Some(WHITESPACE_RE.replace_all(text, " ").into_owned()))
}
