use anyhow::{Context, Result};
use log::warn;
use scraper::{Html, Selector};
use url::Url;

/// Site origin used to absolutize relative links.
pub const BASE_URL: &str = "https://toondex.net";

/// Join a possibly-relative href against the site origin. Absolute
/// URLs pass through unchanged.
pub fn absolutize(href: &str) -> Result<String> {
    let base = Url::parse(BASE_URL).context("invalid base url")?;
    let url = base
        .join(href)
        .with_context(|| format!("cannot resolve link {:?}", href))?;
    Ok(url.to_string())
}

/// Extract the chapter links from a series page, oldest first.
///
/// The site lists chapters newest-first inside `#chapters-box`, so
/// the collected list is reversed once into reading order. A missing
/// container is a structural parse error; a container with no links
/// is an empty series.
pub fn resolve_chapters(document: &Html) -> Result<Vec<String>> {
    let container_selector = Selector::parse("div#chapters-box").unwrap();
    let anchor_selector = Selector::parse("a").unwrap();

    let container = document
        .select(&container_selector)
        .next()
        .context("chapter container #chapters-box not found on series page")?;

    let mut links = Vec::new();
    for anchor in container.select(&anchor_selector) {
        if let Some(href) = anchor.value().attr("href") {
            links.push(absolutize(href)?);
        }
    }
    links.reverse();
    Ok(links)
}

/// Extract the cover image URL from a series page.
pub fn cover_url(document: &Html) -> Result<String> {
    let cover_selector = Selector::parse("img.w-96.m-auto").unwrap();
    let img = document
        .select(&cover_selector)
        .next()
        .context("cover image not found on series page")?;
    let src = img
        .value()
        .attr("src")
        .context("cover image has no src attribute")?;
    absolutize(src)
}

/// Extract the page image URLs from a chapter page, in document
/// order. Page images carry an id containing "row"; the source comes
/// from `src` with a `data-src` fallback for lazy-loaded images. An
/// element with neither is logged and skipped without consuming a
/// page number.
pub fn chapter_image_urls(document: &Html) -> Vec<String> {
    let img_selector = Selector::parse("img").unwrap();

    let mut urls = Vec::new();
    for img in document.select(&img_selector) {
        let id = img.value().attr("id").unwrap_or("");
        if !id.contains("row") {
            continue;
        }
        match img
            .value()
            .attr("src")
            .or_else(|| img.value().attr("data-src"))
        {
            Some(src) => urls.push(src.to_string()),
            None => warn!("page image {:?} has no source attribute, skipping", id),
        }
    }
    urls
}
