//! Catalog records and read-side helpers.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Genre assigned when a caption names none.
pub const UNCATEGORIZED: &str = "Uncategorized";
/// Year shown when a caption names none.
pub const UNKNOWN_YEAR: &str = "Unknown";
/// Rating shown when a caption names none.
pub const UNKNOWN_RATING: &str = "N/A";
/// Title used when neither caption nor file name provide one.
pub const UNTITLED: &str = "Untitled";

/// One streamable video of the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Id of the channel message carrying the video
    pub message_id: i64,
    pub title: String,
    pub year: String,
    #[serde(default = "default_genre")]
    pub genre: Vec<String>,
    pub rating: String,
    #[serde(default)]
    pub description: String,
    /// Seconds
    #[serde(default, deserialize_with = "null_as_default")]
    pub duration: u32,
    /// Platform file reference used for streaming
    pub file_id: String,
    /// Bytes
    #[serde(default, deserialize_with = "null_as_default")]
    pub file_size: u64,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub added_date: Option<DateTime<Utc>>,
}

fn default_genre() -> Vec<String> {
    vec![UNCATEGORIZED.to_string()]
}

impl CatalogItem {
    /// Whether the item is tagged with `genre` (exact match).
    #[must_use]
    pub fn has_genre(&self, genre: &str) -> bool {
        self.genre.iter().any(|g| g == genre)
    }

    /// Case-insensitive match on title or description.
    ///
    /// `needle` must already be lowercase.
    #[must_use]
    pub fn matches(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self.description.to_lowercase().contains(needle)
    }
}

/// A persisted, timestamped copy of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub last_updated: DateTime<Utc>,
    pub total_movies: usize,
    pub movies: Vec<CatalogItem>,
}

impl CatalogSnapshot {
    /// Snapshot of `movies` taken now.
    #[must_use]
    pub fn new(movies: Vec<CatalogItem>) -> Self {
        Self::taken_at(movies, Utc::now())
    }

    /// Snapshot of `movies` with an explicit timestamp.
    #[must_use]
    pub fn taken_at(movies: Vec<CatalogItem>, last_updated: DateTime<Utc>) -> Self {
        Self {
            last_updated,
            total_movies: movies.len(),
            movies,
        }
    }

    /// An empty snapshot, used when neither the channel nor the disk has data.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.movies.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.movies.len()
    }

    /// Age relative to `now`; negative ages (clock skew) count as zero.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.last_updated).to_std().unwrap_or_default()
    }

    /// Look an item up by message id.
    #[must_use]
    pub fn find(&self, message_id: i64) -> Option<&CatalogItem> {
        self.movies.iter().find(|m| m.message_id == message_id)
    }

    /// Items tagged with `genre`.
    #[must_use]
    pub fn by_genre(&self, genre: &str) -> Vec<&CatalogItem> {
        self.movies.iter().filter(|m| m.has_genre(genre)).collect()
    }

    /// Items whose title or description contains `query`, case-insensitively.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<&CatalogItem> {
        let needle = query.to_lowercase();
        self.movies.iter().filter(|m| m.matches(&needle)).collect()
    }

    /// Items grouped by genre, groups in order of first appearance.
    ///
    /// An item tagged with several genres appears in each group.
    #[must_use]
    pub fn group_by_genre(&self) -> Vec<(&str, Vec<&CatalogItem>)> {
        let mut groups: Vec<(&str, Vec<&CatalogItem>)> = Vec::new();
        for movie in &self.movies {
            for genre in &movie.genre {
                match groups.iter_mut().find(|(name, _)| *name == genre.as_str()) {
                    Some((_, items)) => items.push(movie),
                    None => groups.push((genre.as_str(), vec![movie])),
                }
            }
        }
        groups
    }
}

/// Accepts RFC 3339 and the naive local timestamps older cache files carry.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("bad timestamp: {raw}")))
}

fn deserialize_optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("bad timestamp: {raw}"))),
    }
}

/// Older cache files write `null` for unknown sizes and durations.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Convert seconds to a readable duration, e.g. `2h 15m`.
#[must_use]
pub fn format_duration(seconds: u32) -> String {
    if seconds == 0 {
        return "Unknown".to_string();
    }

    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;

    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

/// Convert a byte count to a readable size, e.g. `1.5 GB`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "Unknown".to_string();
    }

    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, title: &str, genre: &[&str]) -> CatalogItem {
        CatalogItem {
            message_id: id,
            title: title.to_string(),
            year: "2024".to_string(),
            genre: genre.iter().map(ToString::to_string).collect(),
            rating: UNKNOWN_RATING.to_string(),
            description: format!("About {title}"),
            duration: 0,
            file_id: format!("file-{id}"),
            file_size: 0,
            thumbnail: None,
            added_date: None,
        }
    }

    #[test]
    fn test_group_by_genre_keeps_first_appearance_order() {
        let snapshot = CatalogSnapshot::new(vec![
            item(1, "Heat", &["Thriller", "Drama"]),
            item(2, "Alien", &["Sci-Fi", "Thriller"]),
        ]);

        let groups = snapshot.group_by_genre();
        let names: Vec<&str> = groups.iter().map(|(g, _)| *g).collect();
        assert_eq!(names, vec!["Thriller", "Drama", "Sci-Fi"]);
        assert_eq!(groups[0].1.len(), 2);
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let snapshot = CatalogSnapshot::new(vec![item(1, "Heat", &["Drama"]), item(2, "Alien", &[])]);
        let hits = snapshot.search("HEAT");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].message_id, 1);
        // Description matches too
        assert_eq!(snapshot.search("about alien").len(), 1);
    }

    #[test]
    fn test_snapshot_count_matches_items() {
        let snapshot = CatalogSnapshot::new(vec![item(1, "A", &["Drama"]), item(2, "B", &["Drama"])]);
        assert_eq!(snapshot.total_movies, 2);
        assert_eq!(snapshot.by_genre("Drama").len(), 2);
        assert!(snapshot.find(2).is_some());
        assert!(snapshot.find(3).is_none());
    }

    #[test]
    fn test_naive_timestamp_is_accepted() -> Result<(), serde_json::Error> {
        let raw = r#"{"last_updated":"2024-05-01T12:30:00.123456","total_movies":0,"movies":[]}"#;
        let snapshot: CatalogSnapshot = serde_json::from_str(raw)?;
        assert!(snapshot.is_empty());
        Ok(())
    }

    #[test]
    fn test_legacy_cache_file_is_accepted() -> Result<(), serde_json::Error> {
        let raw = r#"{
          "last_updated": "2024-05-02T08:00:00.654321",
          "total_movies": 2,
          "movies": [
            {
              "message_id": 12,
              "title": "Heat",
              "year": "1995",
              "genre": ["Crime", "Drama"],
              "rating": "8.3",
              "description": "A heist film.",
              "duration": 10200,
              "file_id": "BAACAgIAAxkBAAIB",
              "file_size": 734003200,
              "thumbnail": "AAMCAgADGQEAAgI",
              "added_date": "2024-05-01T12:30:00"
            },
            {
              "message_id": 13,
              "title": "clip.mp4",
              "year": "Unknown",
              "genre": ["Uncategorized"],
              "rating": "N/A",
              "description": "No description available",
              "duration": null,
              "file_id": "BAACAgIAAxkBAAIC",
              "file_size": null,
              "thumbnail": null,
              "added_date": null
            }
          ]
        }"#;

        let snapshot: CatalogSnapshot = serde_json::from_str(raw)?;
        assert_eq!(snapshot.len(), 2);
        let heat = &snapshot.movies[0];
        assert_eq!(heat.file_size, 734_003_200);
        assert_eq!(heat.duration, 10200);
        assert!(heat.added_date.is_some());
        let clip = &snapshot.movies[1];
        assert_eq!(clip.file_size, 0);
        assert_eq!(clip.duration, 0);
        assert_eq!(clip.added_date, None);
        Ok(())
    }

    #[test]
    fn test_missing_genre_defaults_to_sentinel() -> Result<(), serde_json::Error> {
        let raw = r#"{"message_id":7,"title":"T","year":"Unknown","rating":"N/A","file_id":"f"}"#;
        let item: CatalogItem = serde_json::from_str(raw)?;
        assert_eq!(item.genre, vec![UNCATEGORIZED.to_string()]);
        Ok(())
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "Unknown");
        assert_eq!(format_duration(900), "15m");
        assert_eq!(format_duration(8100), "2h 15m");
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "Unknown");
        assert_eq!(format_file_size(512), "512.0 B");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }
}
