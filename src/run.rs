use crate::browser::{fetch_page, BrowserSession, RetryPolicy};
use crate::configuration::{Series, Settings};
use crate::download::{page_file_name, ImageDownloader, ImageJob};
use crate::site;
use anyhow::Result;
use log::{error, info};
use resolve_path::PathResolveExt;
use scraper::Html;
use std::fs;
use std::path::Path;

pub async fn run(settings: Settings) -> Result<()> {
    info!("Output Directory: {}", settings.output_directory);
    let base_path = settings.output_directory.resolve().to_path_buf();
    fs::create_dir_all(&base_path)?;

    // One browser session and one HTTP client for the whole run. The
    // browser is released when the session drops, also on early exit.
    let session = BrowserSession::new(settings.headless)?;
    let downloader = ImageDownloader::new(settings.workers, settings.max_retries)?;
    let policy = RetryPolicy::with_max_attempts(settings.max_retries);

    for series in &settings.series {
        info!("Checking series: {}", series.name);
        if let Err(e) = download_series(&session, &downloader, &policy, series, &base_path).await {
            error!("Series {} failed: {:#}, skipping", series.name, e);
            continue;
        }
    }

    info!("Finished!");
    Ok(())
}

async fn download_series(
    session: &BrowserSession,
    downloader: &ImageDownloader,
    policy: &RetryPolicy,
    series: &Series,
    base_path: &Path,
) -> Result<()> {
    let html = fetch_page(session, &series.url, policy).await?;
    let (cover, chapters) = parse_series(&html)?;

    let series_dir = base_path.join(&series.name);
    downloader
        .download(&cover, &series_dir.join("cover.png"))
        .await?;

    // Chapters run strictly one after another; only the pages within
    // a chapter download concurrently. Chapter names go by position,
    // not by whatever title the site shows.
    for (i, chapter_url) in chapters.iter().enumerate() {
        let chapter_name = format!("Chapter {}", i + 1);
        if let Err(e) =
            download_chapter(session, downloader, policy, chapter_url, &series_dir, &chapter_name)
                .await
        {
            error!(
                "Error downloading {} of {}: {:#}, skipping",
                chapter_name, series.name, e
            );
            continue;
        }
    }

    Ok(())
}

async fn download_chapter(
    session: &BrowserSession,
    downloader: &ImageDownloader,
    policy: &RetryPolicy,
    url: &str,
    series_dir: &Path,
    chapter_name: &str,
) -> Result<()> {
    info!("Downloading {} into {}", chapter_name, series_dir.display());

    let html = fetch_page(session, url, policy).await?;
    let jobs = chapter_jobs(&html, &series_dir.join(chapter_name));

    downloader.download_all(jobs).await
}

/// Pull the cover URL and chapter list out of a series page in one
/// pass. The parsed document is not `Send`, so it must not outlive
/// this function and cross an await.
fn parse_series(html: &str) -> Result<(String, Vec<String>)> {
    let document = Html::parse_document(html);
    Ok((
        site::cover_url(&document)?,
        site::resolve_chapters(&document)?,
    ))
}

/// Turn a chapter page into download jobs; same `Send` constraint as
/// [`parse_series`].
fn chapter_jobs(html: &str, chapter_dir: &Path) -> Vec<ImageJob> {
    let document = Html::parse_document(html);
    build_page_jobs(site::chapter_image_urls(&document), chapter_dir)
}

/// Assign destination paths by strict discovery order, 1-indexed.
fn build_page_jobs(urls: Vec<String>, chapter_dir: &Path) -> Vec<ImageJob> {
    urls.into_iter()
        .enumerate()
        .map(|(i, url)| ImageJob {
            url,
            path: chapter_dir.join(page_file_name(i + 1)),
        })
        .collect()
}
