//! Caption parsing
//!
//! Channel posts describe a video with a free-text caption such as:
//!
//! ```text
//! Title: Movie Name
//! Year: 2024
//! Genre: Action, Thriller
//! Rating: 8.5
//! Description: Movie description here...
//! ```
//!
//! Keys are matched case-insensitively. Once a `Description` line is seen,
//! every following line belongs to the description, colon or not.

use crate::catalog::{UNCATEGORIZED, UNKNOWN_RATING, UNKNOWN_YEAR, UNTITLED};

const NO_DESCRIPTION: &str = "No description available";

/// Media facts available next to the caption.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaMeta {
    /// Seconds
    pub duration: u32,
    pub file_name: Option<String>,
}

/// Catalog fields recovered from a caption.
///
/// Identifier and file fields are merged in by the catalog source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCaption {
    pub title: String,
    pub year: String,
    pub genre: Vec<String>,
    pub rating: String,
    pub description: String,
    pub duration: u32,
}

impl ParsedCaption {
    fn blank(duration: u32) -> Self {
        Self {
            title: UNTITLED.to_string(),
            year: UNKNOWN_YEAR.to_string(),
            genre: vec![UNCATEGORIZED.to_string()],
            rating: UNKNOWN_RATING.to_string(),
            description: String::new(),
            duration,
        }
    }
}

/// Parse a caption into catalog fields.
///
/// `media` is `None` for posts without a video. A post with neither text nor
/// video yields `None`.
#[must_use]
pub fn parse_caption(text: Option<&str>, media: Option<&MediaMeta>) -> Option<ParsedCaption> {
    let text = text.map(str::trim).filter(|t| !t.is_empty());

    let Some(text) = text else {
        let media = media?;
        let mut parsed = ParsedCaption::blank(media.duration);
        parsed.title = file_title(media);
        parsed.description = NO_DESCRIPTION.to_string();
        return Some(parsed);
    };

    let mut parsed = ParsedCaption::blank(0);
    let mut description: Vec<&str> = Vec::new();
    let mut in_description = false;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if in_description {
            description.push(line);
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            description.push(line);
            continue;
        };
        let value = value.trim();

        match key.trim().to_lowercase().as_str() {
            "title" => parsed.title = value.to_string(),
            "year" => parsed.year = value.to_string(),
            "genre" => parsed.genre = split_genres(value),
            "rating" => parsed.rating = value.to_string(),
            "description" => {
                if !value.is_empty() {
                    description.push(value);
                }
                in_description = true;
            }
            _ => description.push(line),
        }
    }

    parsed.description = description.join(" ");

    if let Some(media) = media {
        parsed.duration = media.duration;
        if parsed.title == UNTITLED {
            parsed.title = file_title(media);
        }
    }

    Some(parsed)
}

fn file_title(media: &MediaMeta) -> String {
    media
        .file_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(UNTITLED)
        .to_string()
}

fn split_genres(value: &str) -> Vec<String> {
    let genres: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(ToString::to_string)
        .collect();

    if genres.is_empty() {
        vec![UNCATEGORIZED.to_string()]
    } else {
        genres
    }
}
