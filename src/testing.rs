//! Shared test doubles.

use color_eyre::{eyre::eyre, Result};

use crate::cache::{BucketStore, StoredEntry};

/// A store whose every operation fails, as a corrupt or unavailable database would.
pub struct FailingStore;

impl BucketStore for FailingStore {
  fn open_bucket(&self, bucket: &str) -> Result<()> {
    Err(eyre!("store unavailable: open {}", bucket))
  }

  fn bucket_names(&self) -> Result<Vec<String>> {
    Err(eyre!("store unavailable: list"))
  }

  fn delete_bucket(&self, bucket: &str) -> Result<bool> {
    Err(eyre!("store unavailable: delete {}", bucket))
  }

  fn put(&self, bucket: &str, _entry: &StoredEntry) -> Result<()> {
    Err(eyre!("store unavailable: put into {}", bucket))
  }

  fn match_entry(&self, bucket: &str, _key: &str) -> Result<Option<StoredEntry>> {
    Err(eyre!("store unavailable: match in {}", bucket))
  }

  fn delete(&self, bucket: &str, _key: &str) -> Result<bool> {
    Err(eyre!("store unavailable: delete from {}", bucket))
  }

  fn keys(&self, bucket: &str) -> Result<Vec<String>> {
    Err(eyre!("store unavailable: keys of {}", bucket))
  }

  fn get_meta(&self, key: &str) -> Result<Option<String>> {
    Err(eyre!("store unavailable: meta {}", key))
  }

  fn set_meta(&self, key: &str, _value: &str) -> Result<()> {
    Err(eyre!("store unavailable: meta {}", key))
  }
}
