//! Week-view schedule pages: appointment stubs and pagination.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};
use url::Url;

use super::html::{document, has_class, text_by_class, with_class, with_name};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::fetch::{PageFetcher, Transport};
use crate::models::ScheduleStub;
use crate::util::pause;

static APPOINTMENT_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/schedule/a/([^/?#]+)(?:/(\d+))?").expect("Invalid regex")
});
static NON_BOARDING_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)(d/c|\bdc\b)",
        r"(?i)(p/g|g/p|\bpg\b)",
        r"\badd\b",
        r"(?i)switch\s+day",
        r"(?i)back\s+to\s+\d+",
        r"(?i)initial\s+eval",
        r"(?i)^busy$",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("Invalid regex"))
    .collect()
});

/// `(external id, timestamp segment)` from an appointment URL
pub fn appointment_id_from_url(url: &str) -> Option<(String, Option<String>)> {
    let captures = APPOINTMENT_PATH_RE.captures(url)?;
    Some((
        captures.get(1)?.as_str().to_string(),
        captures.get(2).map(|m| m.as_str().to_string()),
    ))
}

fn resolve(page_url: &str, href: &str) -> Option<String> {
    match Url::parse(href) {
        Ok(absolute) => Some(absolute.to_string()),
        Err(_) => Url::parse(page_url)
            .and_then(|base| base.join(href))
            .ok()
            .map(|url| url.to_string()),
    }
}

/// Appointment stubs on one schedule page, deduplicated by external id
pub fn parse_schedule_page(html: &str, page_url: &str) -> Vec<ScheduleStub> {
    stubs_in(&document(html), page_url)
}

/// Next-page link, tried against several markup conventions in order
pub fn next_page_url(html: &str, page_url: &str) -> Option<String> {
    next_link_in(&document(html), page_url)
}

fn stubs_in(page: &Html, page_url: &str) -> Vec<ScheduleStub> {
    let mut seen = HashSet::new();
    let mut stubs = Vec::new();

    for anchor in with_name(page.root_element(), "a") {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some((external_id, timestamp)) = appointment_id_from_url(href) else {
            continue;
        };
        if !seen.insert(external_id.clone()) {
            continue;
        }
        let Some(url) = resolve(page_url, href) else {
            continue;
        };

        stubs.push(ScheduleStub {
            external_id,
            url,
            timestamp,
            title: text_by_class(anchor, "day-event-title"),
            time_text: text_by_class(anchor, "day-event-time"),
            pet_name: text_by_class(anchor, "event-pet"),
            client_name: text_by_class(anchor, "event-client"),
        });
    }

    tracing::debug!("Parsed {} appointment links from schedule page", stubs.len());
    stubs
}

fn is_rel_next(element: &ElementRef<'_>) -> bool {
    element
        .value()
        .attr("rel")
        .is_some_and(|rel| rel.split_whitespace().any(|token| token.eq_ignore_ascii_case("next")))
}

fn next_link_in(page: &Html, page_url: &str) -> Option<String> {
    let root = page.root_element();
    let href_of = |element: ElementRef<'_>| element.value().attr("href").map(str::to_string);

    let href = with_name(root, "a")
        .find(is_rel_next)
        .and_then(href_of)
        .or_else(|| with_name(root, "link").find(is_rel_next).and_then(href_of))
        .or_else(|| {
            with_name(root, "a")
                .filter(|anchor| has_class(anchor, "next"))
                .find_map(href_of)
        })
        .or_else(|| {
            with_class(root, "next")
                .find_map(|wrapper| with_name(wrapper, "a").find_map(href_of))
        })?;

    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    resolve(page_url, href)
}

/// Stubs and next link from one fetched page
fn read_page(html: &str, page_url: &str) -> (Vec<ScheduleStub>, Option<String>) {
    let page = document(html);
    (stubs_in(&page, page_url), next_link_in(&page, page_url))
}

/// Whether a stub's title may describe a boarding stay
pub fn is_boarding_candidate(stub: &ScheduleStub) -> bool {
    let title = stub.title.as_deref().unwrap_or_default().trim().to_lowercase();
    !NON_BOARDING_RES.iter().any(|re| re.is_match(&title))
}

/// Fetch a schedule page and follow its pagination.
///
/// Stops at the configured page ceiling or when the next link repeats a
/// page already visited.
pub async fn fetch_schedule<T: Transport>(
    fetcher: &PageFetcher<'_, T>,
    config: &SyncConfig,
    start_url: &str,
) -> Result<Vec<ScheduleStub>> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut stubs = Vec::new();
    let mut current = start_url.to_string();

    while visited.len() < config.max_schedule_pages {
        let html = fetcher.fetch(&current).await?;
        visited.insert(current.clone());

        let (page_stubs, next) = read_page(&html, &current);
        for stub in page_stubs {
            if seen_ids.insert(stub.external_id.clone()) {
                stubs.push(stub);
            }
        }

        match next {
            Some(next) if !visited.contains(&next) => {
                pause(config.request_delay, config.jitter).await;
                current = next;
            }
            Some(_) => {
                tracing::debug!("Pagination repeats a visited page, stopping");
                break;
            }
            None => break,
        }
    }

    tracing::info!(
        "Schedule scan found {} appointments across {} page(s)",
        stubs.len(),
        visited.len()
    );
    Ok(stubs)
}
