//! CSV review import.
//!
//! Parses an uploaded CSV document into review records. A header row is
//! required; recognised columns are `reviewer_name`, `rating`,
//! `review_text`, `review_date`, `source`, `tech_name`, and
//! `tech_photo_url`. Standard quoting with doubled-quote escapes applies.
//! Rows without a source column fall back to the `import` tag.

use crate::error::ApiError;
use crate::models::{Review, ReviewDraft};
use crate::source_generic::{parse_date, sanitize_source_tag};

const FALLBACK_SOURCE: &str = "import";

pub fn parse_csv(bytes: &[u8]) -> Result<Vec<Review>, ApiError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|err| ApiError::validation("csv", format!("Invalid CSV header row: {err}")))?
        .clone();
    let column = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));

    let reviewer_name = column("reviewer_name");
    let rating = column("rating");
    let review_text = column("review_text");
    let review_date = column("review_date");
    let source = column("source");
    let tech_name = column("tech_name");
    let tech_photo_url = column("tech_photo_url");

    if reviewer_name.is_none() && rating.is_none() && review_text.is_none() {
        return Err(ApiError::validation(
            "csv",
            "Header row must include at least one of: reviewer_name, rating, review_text",
        ));
    }

    let cell = |record: &csv::StringRecord, index: Option<usize>| -> Option<String> {
        index
            .and_then(|i| record.get(i))
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let mut reviews = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|err| {
            ApiError::validation("csv", format!("Invalid CSV on data row {}: {err}", line + 1))
        })?;

        let source_tag = cell(&record, source)
            .map(|s| sanitize_source_tag(&s))
            .unwrap_or_else(|| FALLBACK_SOURCE.to_string());

        reviews.push(
            ReviewDraft {
                source: source_tag,
                reviewer_name: cell(&record, reviewer_name),
                rating: cell(&record, rating).and_then(|v| v.parse().ok()),
                review_text: cell(&record, review_text),
                review_date: cell(&record, review_date).as_deref().and_then(parse_date),
                tech_name: cell(&record, tech_name),
                tech_photo_url: cell(&record, tech_photo_url),
                ..Default::default()
            }
            .normalize(),
        );
    }

    if reviews.is_empty() {
        return Err(ApiError::validation("csv", "No data rows found"));
    }
    Ok(reviews)
}
