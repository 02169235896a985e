//! Price table extraction for a single card page.
//!
//! Page layout (`table#price_data`, older pages `table.info_box`):
//!
//! ```text
//! <thead><tr><th>Ungraded</th><th>Grade 7</th> ... <th>PSA 10</th></tr></thead>
//! <tbody><tr><td><span class="price">$12.34</span></td> ... </tr></tbody>
//! ```
//!
//! Header *i* pairs with cell *i*; surplus headers or cells are ignored.

use crate::models::{ErrorKind, Prices, ScrapeError};
use crate::scraper::cleaner::{looks_like_price, normalise_condition};
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use thiserror::Error;

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

static PRICE_TABLE: LazyLock<Selector> = LazyLock::new(|| selector("table#price_data"));
static INFO_BOX_TABLE: LazyLock<Selector> = LazyLock::new(|| selector("table.info_box"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("title"));
static THEAD: LazyLock<Selector> = LazyLock::new(|| selector("thead"));
static TBODY: LazyLock<Selector> = LazyLock::new(|| selector("tbody"));
static TR: LazyLock<Selector> = LazyLock::new(|| selector("tr"));
static TH: LazyLock<Selector> = LazyLock::new(|| selector("th"));
static TD: LazyLock<Selector> = LazyLock::new(|| selector("td"));
static PRICE_SPAN: LazyLock<Selector> = LazyLock::new(|| selector("span.price"));

const NOT_FOUND_MARKER: &str = "404";

/// Why a page yielded no prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PageError {
    #[error("Card not found on pricing site (404 page)")]
    NotFound,
    #[error("Price table not found on page (tried id=price_data and class=info_box)")]
    MissingTable,
    #[error("Table header not found in price table")]
    MissingHeader,
    #[error("Header row not found in price table")]
    MissingHeaderRow,
    #[error("Table body not found in price table")]
    MissingBody,
    #[error("Price row not found in table body")]
    MissingBodyRow,
    #[error("No price cells found in price row")]
    MissingCells,
    #[error("Found price table but no valid prices (all dashes or empty)")]
    NoPrices,
}

impl PageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PageError::NotFound => ErrorKind::NotFound,
            PageError::NoPrices => ErrorKind::NoPricesAvailable,
            _ => ErrorKind::ParsingFailed,
        }
    }
}

impl From<PageError> for ScrapeError {
    fn from(e: PageError) -> Self {
        ScrapeError::new(e.kind(), e.to_string())
    }
}

/// Trimmed text of all descendant text nodes, joined without separators.
fn element_text(el: &ElementRef<'_>) -> String {
    el.text().map(str::trim).collect()
}

fn is_not_found_page(doc: &Html) -> bool {
    doc.select(&TITLE)
        .next()
        .is_some_and(|t| t.text().collect::<String>().contains(NOT_FOUND_MARKER))
}

/// Extract `condition → price` from one card page.
pub fn parse_price_page(html: &str) -> Result<Prices, PageError> {
    let doc = Html::parse_document(html);

    let table = match doc.select(&PRICE_TABLE).next() {
        Some(t) => t,
        None => {
            // Missing cards are served as a 200 with a 404 title
            if is_not_found_page(&doc) {
                return Err(PageError::NotFound);
            }
            doc.select(&INFO_BOX_TABLE)
                .next()
                .ok_or(PageError::MissingTable)?
        }
    };

    let thead = table.select(&THEAD).next().ok_or(PageError::MissingHeader)?;
    let header_row = thead.select(&TR).next().ok_or(PageError::MissingHeaderRow)?;
    let headers: Vec<String> = header_row.select(&TH).map(|th| element_text(&th)).collect();

    let tbody = table.select(&TBODY).next().ok_or(PageError::MissingBody)?;
    let price_row = tbody.select(&TR).next().ok_or(PageError::MissingBodyRow)?;
    let cells: Vec<ElementRef<'_>> = price_row.select(&TD).collect();
    if cells.is_empty() {
        return Err(PageError::MissingCells);
    }

    let mut prices = Prices::new();
    for (header, cell) in headers.iter().zip(&cells) {
        let Some(span) = cell.select(&PRICE_SPAN).next() else {
            continue;
        };
        let value = element_text(&span);
        if looks_like_price(&value) {
            prices.insert(normalise_condition(header), value);
        }
    }

    if prices.is_empty() {
        return Err(PageError::NoPrices);
    }
    Ok(prices)
}
