use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use common::{Error, NewsEvent, Result};

const DEFAULT_URL: &str = "https://www.investing.com/economic-calendar/";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Provider of economic-calendar events for one month.
#[async_trait]
pub trait CalendarSource: Send + Sync {
    async fn month_events(&self, currencies: &[String]) -> Result<Vec<NewsEvent>>;
}

/// Scrapes the Investing.com economic calendar.
///
/// The page renders event times in a fixed zone (Central Europe by default);
/// rows carry a `data-event-datetime` attribute that we localize there and
/// convert to UTC.
pub struct InvestingCalendar {
    http: reqwest::Client,
    url: String,
    page_zone: Tz,
}

impl InvestingCalendar {
    pub fn new(page_zone: Tz) -> Self {
        Self {
            http: reqwest::Client::builder()
                .use_rustls_tls()
                .timeout(std::time::Duration::from_secs(15))
                .build()
                .expect("Failed to build HTTP client"),
            url: DEFAULT_URL.to_string(),
            page_zone,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    async fn fetch_page(&self) -> Result<String> {
        let max_attempts = 3;
        let mut last_error = None;
        for attempt in 1..=max_attempts {
            let result = self
                .http
                .get(&self.url)
                .header("User-Agent", USER_AGENT)
                .header("Accept", "text/html,application/xhtml+xml")
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => {
                    return response
                        .text()
                        .await
                        .map_err(|e| Error::NewsSource(e.to_string()));
                }
                Ok(response) => {
                    last_error = Some(format!("HTTP {}", response.status()));
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                }
            }
            if attempt < max_attempts {
                warn!(attempt, "Calendar fetch failed, retrying");
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            }
        }
        Err(Error::NewsSource(
            last_error.unwrap_or_else(|| "no response".into()),
        ))
    }
}

#[async_trait]
impl CalendarSource for InvestingCalendar {
    async fn month_events(&self, currencies: &[String]) -> Result<Vec<NewsEvent>> {
        let html = self.fetch_page().await?;
        Ok(parse_calendar(&html, self.page_zone, currencies))
    }
}

/// Parse calendar HTML into event records, keeping only the given
/// currencies. Rows that cannot be timestamped are dropped.
pub fn parse_calendar(html: &str, page_zone: Tz, currencies: &[String]) -> Vec<NewsEvent> {
    let document = Html::parse_document(html);
    let row_selector = Selector::parse("tr.js-event-item").expect("static selector");
    let cell_selector = Selector::parse("td").expect("static selector");

    let mut events = Vec::new();
    for row in document.select(&row_selector) {
        let Some(time) = row
            .value()
            .attr("data-event-datetime")
            .and_then(|raw| parse_event_time(raw, page_zone))
        else {
            debug!("calendar row without parseable datetime, skipping");
            continue;
        };

        let cells: Vec<ElementRef> = row.select(&cell_selector).collect();
        if cells.len() < 4 {
            continue;
        }

        let currency = extract_currency(cell_text(&cells[1]));
        if !currencies.iter().any(|c| c.eq_ignore_ascii_case(&currency)) {
            continue;
        }

        let impact_text = cell_text(&cells[2]);
        let is_holiday = impact_text.to_lowercase().contains("holiday");
        let impact = count_impact_stars(&cells[2], &impact_text);

        let title = cell_text(&cells[3]);
        let actual = cells.get(4).map(cell_text).filter(|s| !s.is_empty());
        let forecast = cells.get(5).map(cell_text).filter(|s| !s.is_empty());
        let previous = cells.get(6).map(cell_text).filter(|s| !s.is_empty());

        events.push(NewsEvent {
            time,
            currency,
            title,
            impact,
            is_holiday,
            actual,
            forecast,
            previous,
        });
    }

    events.sort_by_key(|e| e.time);
    events
}

fn parse_event_time(raw: &str, page_zone: Tz) -> Option<chrono::DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), "%Y/%m/%d %H:%M:%S").ok()?;
    page_zone
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

fn cell_text(cell: &ElementRef) -> String {
    cell.text().collect::<String>().trim().to_string()
}

/// A 2–3 letter all-caps token in the currency cell.
fn extract_currency(text: String) -> String {
    text.split_whitespace()
        .find(|token| {
            (2..=3).contains(&token.len()) && token.chars().all(|c| c.is_ascii_uppercase())
        })
        .unwrap_or("")
        .to_string()
}

/// Count filled impact stars. The site has shuffled its icon class names
/// over time, so accept anything that looks like a filled star and fall
/// back to inferring the level from the cell text.
fn count_impact_stars(cell: &ElementRef, text: &str) -> u8 {
    let icon_selector = Selector::parse("i, span").expect("static selector");

    let filled = cell
        .select(&icon_selector)
        .filter(|icon| {
            let class = icon.value().attr("class").unwrap_or("").to_lowercase();
            let title = icon.value().attr("title").unwrap_or("").to_lowercase();
            class.contains("full") || class.contains("bullish") || title.contains("star")
        })
        .count();
    if filled > 0 {
        return filled.min(3) as u8;
    }

    let lower = text.to_lowercase();
    if lower.contains("high") {
        3
    } else if lower.contains("medium") {
        2
    } else if lower.contains("low") {
        1
    } else if let Some(digit) = lower.chars().find(|c| c.is_ascii_digit()) {
        (digit.to_digit(10).unwrap_or(0) as u8).min(3)
    } else {
        0
    }
}
