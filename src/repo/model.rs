//! Stored records and query results
//!
//! Field names are the persisted JSON names and also the export format.
//! Every field has a default so records written by older or newer builds
//! still decode; list fields additionally accept `null`.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Timestamp of a book nobody has touched yet: `0001-01-01T00:00:00Z`
pub fn zero_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<u64>>::deserialize(deserializer)?.unwrap_or_default())
}

/// A translation project; `fragments_ids` defines fragment order and membership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Book {
    pub id: u64,
    pub title: String,
    pub created: DateTime<Utc>,
    pub fragments_total: u64,
    pub fragments_translated: u64,
    #[serde(deserialize_with = "null_as_empty")]
    pub fragments_ids: Vec<u64>,
    pub last_activity: DateTime<Utc>,
    pub last_visited_page: i64,
}

impl Default for Book {
    fn default() -> Self {
        Book {
            id: 0,
            title: String::new(),
            created: zero_time(),
            fragments_total: 0,
            fragments_translated: 0,
            fragments_ids: Vec::new(),
            last_activity: zero_time(),
            last_visited_page: 0,
        }
    }
}

/// One unit of source text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fragment {
    pub id: u64,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub text: String,
    pub comment: String,
    pub starred: bool,
    #[serde(deserialize_with = "null_as_empty")]
    pub versions_ids: Vec<u64>,
}

impl Default for Fragment {
    fn default() -> Self {
        Fragment {
            id: 0,
            created: zero_time(),
            updated: zero_time(),
            text: String::new(),
            comment: String::new(),
            starred: false,
            versions_ids: Vec::new(),
        }
    }
}

impl Fragment {
    pub fn is_translated(&self) -> bool {
        !self.versions_ids.is_empty()
    }
}

/// One candidate translation of a fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationVersion {
    pub id: u64,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub text: String,
}

impl Default for TranslationVersion {
    fn default() -> Self {
        TranslationVersion {
            id: 0,
            created: zero_time(),
            updated: zero_time(),
            text: String::new(),
        }
    }
}

/// Free-form notes attached to a book; `id` is the book id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scratchpad {
    pub id: u64,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub text: String,
}

impl Default for Scratchpad {
    fn default() -> Self {
        Scratchpad {
            id: 0,
            created: zero_time(),
            updated: zero_time(),
            text: String::new(),
        }
    }
}

/// A fragment loaded for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentView {
    pub fragment: Fragment,
    pub versions: Vec<TranslationVersion>,
    /// 1-based position in the book's unfiltered fragment list
    pub seq_num: usize,
}

/// Result of a filtered, windowed book query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookPage {
    /// The book record as stored
    pub book: Book,
    /// Fragment ids that passed the filter, in book order (the pagination base)
    pub matching_ids: Vec<u64>,
    /// Loaded fragments of the requested window
    pub fragments: Vec<FragmentView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_time_format() {
        let json = serde_json::to_string(&zero_time()).unwrap();
        assert_eq!(json, "\"0001-01-01T00:00:00Z\"");
    }

    #[test]
    fn test_null_lists_decode_empty() {
        let f: Fragment =
            serde_json::from_str(r#"{"id":4,"text":"hi","versions_ids":null}"#).unwrap();
        assert_eq!(f.id, 4);
        assert!(f.versions_ids.is_empty());
        assert!(!f.is_translated());
        assert_eq!(f.created, zero_time());
    }

    #[test]
    fn test_book_defaults_and_unknown_fields() {
        let b: Book = serde_json::from_str(
            r#"{"id":1,"title":"T","fragments_ids":[3,1],"future_field":{"x":1}}"#,
        )
        .unwrap();
        assert_eq!(b.fragments_ids, vec![3, 1]);
        assert_eq!(b.last_activity, zero_time());
        assert_eq!(b.last_visited_page, 0);
    }
}
