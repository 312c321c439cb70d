//! Core traits and types for the bucket store.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};

use crate::http::{Headers, Response, ResponseSource};

/// A full response snapshot captured at write time.
///
/// Entries are never updated in place; a refresh replaces the whole entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
  /// Canonical request identity ("GET https://...")
  pub key: String,
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
  pub stored_at: DateTime<Utc>,
}

impl StoredEntry {
  pub fn capture(key: impl Into<String>, response: &Response) -> Self {
    Self {
      key: key.into(),
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
      stored_at: Utc::now(),
    }
  }

  pub fn into_response(self) -> Response {
    Response {
      status: self.status,
      headers: self.headers,
      body: self.body,
      source: ResponseSource::Cache,
    }
  }
}

/// Named buckets of stored request/response pairs.
///
/// Implementations must tolerate concurrent use from many in-flight request tasks.
pub trait BucketStore: Send + Sync + 'static {
  /// Create the bucket if it does not exist.
  fn open_bucket(&self, bucket: &str) -> Result<()>;

  /// All bucket names, sorted.
  fn bucket_names(&self) -> Result<Vec<String>>;

  /// Delete a bucket and every entry in it. Returns false if it did not exist.
  fn delete_bucket(&self, bucket: &str) -> Result<bool>;

  /// Replace the entry for `entry.key`, opening the bucket if needed.
  fn put(&self, bucket: &str, entry: &StoredEntry) -> Result<()>;

  fn match_entry(&self, bucket: &str, key: &str) -> Result<Option<StoredEntry>>;

  /// Delete one entry. Returns false if it was not present.
  #[allow(dead_code)]
  fn delete(&self, bucket: &str, key: &str) -> Result<bool>;

  /// Keys stored in a bucket, sorted.
  fn keys(&self, bucket: &str) -> Result<Vec<String>>;

  fn get_meta(&self, key: &str) -> Result<Option<String>>;

  fn set_meta(&self, key: &str, value: &str) -> Result<()>;
}
