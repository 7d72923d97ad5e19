//! Durable output: raw capture stream, cleaned collection, run summary and the
//! capture ledger, all under one output directory.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::{self, CaptureRow, LedgerStats};
use crate::pipeline::RunSummary;
use crate::record::{normalize_identifier, PatentRecord};
use crate::validate::Verdict;

pub const RAW_FILE: &str = "raw_captures.jsonl";
pub const CLEANED_FILE: &str = "cleaned_patents.json";
pub const SUMMARY_FILE: &str = "scrape_summary.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("ledger error: {0}")]
    Ledger(#[from] rusqlite::Error),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreResult {
    Inserted,
    Replaced {
        previous_length: usize,
        previous_bytes: usize,
        new_bytes: usize,
    },
    Quarantined,
}

/// One line of the raw capture stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCapture {
    pub verdict: Verdict,
    pub record: PatentRecord,
}

pub struct Store {
    dir: PathBuf,
    cleaned: BTreeMap<String, PatentRecord>,
    ledger: Connection,
}

impl Store {
    /// Open (or create) the output directory and load the cleaned collection.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).map_err(io_err(dir))?;
        let cleaned_path = dir.join(CLEANED_FILE);
        let cleaned = match fs::read_to_string(&cleaned_path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(io_err(&cleaned_path)(e)),
        };
        let ledger = db::connect(dir)?;
        debug!(dir = %dir.display(), records = cleaned.len(), "Store opened");
        Ok(Store {
            dir: dir.to_path_buf(),
            cleaned,
            ledger,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Dedup key: the normalized identifier, or the normalized title for
    /// listing rows that carry no number.
    pub fn key_for(rec: &PatentRecord) -> String {
        let id = normalize_identifier(&rec.identifier);
        if !id.is_empty() {
            return id;
        }
        format!("TITLE:{}", normalize_identifier(rec.title.as_deref().unwrap_or_default()))
    }

    /// Persist one attempt. Every attempt goes to the raw stream and the ledger;
    /// valid records also replace any earlier record with the same key.
    pub fn upsert(
        &mut self,
        rec: &PatentRecord,
        verdict: Verdict,
        run_id: &str,
    ) -> Result<StoreResult, StoreError> {
        self.append_raw(rec, verdict)?;

        if verdict == Verdict::Quarantined {
            self.record_capture(rec, verdict, run_id, false)?;
            return Ok(StoreResult::Quarantined);
        }

        let key = Self::key_for(rec);
        let previous = self.cleaned.insert(key.clone(), rec.clone());
        if let Err(e) = self.write_cleaned() {
            // keep memory in line with disk
            match previous {
                Some(old) => self.cleaned.insert(key, old),
                None => self.cleaned.remove(&key),
            };
            return Err(e);
        }

        let result = match previous {
            None => StoreResult::Inserted,
            Some(old) => {
                let previous_bytes = serde_json::to_vec(&old)?.len();
                let new_bytes = serde_json::to_vec(rec)?.len();
                info!(
                    key = %key,
                    previous_length = old.extraction_meta.content_length,
                    previous_bytes,
                    new_bytes,
                    "Replaced stored record"
                );
                StoreResult::Replaced {
                    previous_length: old.extraction_meta.content_length,
                    previous_bytes,
                    new_bytes,
                }
            }
        };
        let replaced = matches!(result, StoreResult::Replaced { .. });
        self.record_capture(rec, verdict, run_id, replaced)?;
        Ok(result)
    }

    pub fn get(&self, identifier: &str) -> Option<&PatentRecord> {
        self.cleaned.get(&normalize_identifier(identifier))
    }

    pub fn cleaned(&self) -> &BTreeMap<String, PatentRecord> {
        &self.cleaned
    }

    /// Every raw attempt in write order. A torn final line from an interrupted
    /// write is skipped.
    pub fn load_raw(&self) -> Result<Vec<RawCapture>, StoreError> {
        let path = self.dir.join(RAW_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&path)(e)),
        };
        let mut captures = Vec::new();
        for (n, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(c) => captures.push(c),
                Err(e) => warn!(line = n + 1, error = %e, "Skipping unreadable raw capture"),
            }
        }
        Ok(captures)
    }

    /// The raw stream folded by key, last attempt winning.
    pub fn raw_collection(&self) -> Result<BTreeMap<String, RawCapture>, StoreError> {
        Ok(self
            .load_raw()?
            .into_iter()
            .map(|c| (Self::key_for(&c.record), c))
            .collect())
    }

    pub fn write_summary(&self, summary: &RunSummary) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(summary)?;
        write_atomic(&self.dir, &self.dir.join(SUMMARY_FILE), json.as_bytes())?;
        db::record_run(
            &self.ledger,
            &summary.run_id,
            &summary.started_at.to_rfc3339(),
            &summary.finished_at.to_rfc3339(),
            &json,
        )?;
        Ok(())
    }

    pub fn quarantined_sources(&self) -> Result<Vec<String>, StoreError> {
        Ok(db::quarantined_sources(&self.ledger)?)
    }

    pub fn stats(&self) -> Result<LedgerStats, StoreError> {
        Ok(db::stats(&self.ledger)?)
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        Ok(db::recent_runs(&self.ledger, limit)?)
    }

    pub fn last_run_id(&self) -> Result<Option<String>, StoreError> {
        Ok(db::last_run_id(&self.ledger)?)
    }

    pub fn history(&self, identifier: &str) -> Result<Vec<CaptureRow>, StoreError> {
        Ok(db::capture_history(&self.ledger, &normalize_identifier(identifier))?)
    }

    fn append_raw(&self, rec: &PatentRecord, verdict: Verdict) -> Result<(), StoreError> {
        let path = self.dir.join(RAW_FILE);
        let mut line = serde_json::to_vec(&RawCapture {
            verdict,
            record: rec.clone(),
        })?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err(&path))?;
        // one write per line so a crash tears at most the last line
        file.write_all(&line).map_err(io_err(&path))?;
        Ok(())
    }

    fn write_cleaned(&self) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&self.cleaned)?;
        write_atomic(&self.dir, &self.dir.join(CLEANED_FILE), &json)
    }

    fn record_capture(
        &self,
        rec: &PatentRecord,
        verdict: Verdict,
        run_id: &str,
        replaced: bool,
    ) -> Result<(), StoreError> {
        let verdict = match verdict {
            Verdict::Valid => "valid",
            Verdict::Quarantined => "quarantined",
        };
        db::record_capture(
            &self.ledger,
            &CaptureRow {
                run_id: run_id.to_string(),
                identifier: normalize_identifier(&rec.identifier),
                source_url: rec.source_url.clone(),
                retrieved_at: rec.retrieved_at.to_rfc3339(),
                verdict: verdict.to_string(),
                content_length: rec.extraction_meta.content_length as i64,
                content_hash: rec.extraction_meta.content_hash.clone(),
                replaced,
            },
        )?;
        Ok(())
    }
}

/// Write through a temp file in the same directory, then rename over `path`.
fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err(dir))?;
    tmp.write_all(bytes).map_err(io_err(path))?;
    tmp.as_file().sync_all().map_err(io_err(path))?;
    tmp.persist(path).map_err(|e| io_err(path)(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ExtractionMeta;
    use chrono::Utc;

    fn record(id: &str, title: &str, body: &str) -> PatentRecord {
        let mut rec = PatentRecord::empty(
            &format!("https://patents.google.com/patent/{}/en", id),
            Utc::now(),
            ExtractionMeta::for_content(body),
        );
        rec.identifier = id.into();
        rec.title = Some(title.into());
        rec
    }

    #[test]
    fn same_identifier_keeps_one_entry_with_later_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();

        let first = store.upsert(&record("US1", "Old title", "<a>"), Verdict::Valid, "r").unwrap();
        assert_eq!(first, StoreResult::Inserted);
        let second = store
            .upsert(&record("us-1", "New title", "<a>longer</a>"), Verdict::Valid, "r")
            .unwrap();
        assert!(matches!(second, StoreResult::Replaced { previous_length: 3, .. }));

        assert_eq!(store.cleaned().len(), 1);
        assert_eq!(store.get("US1").unwrap().title.as_deref(), Some("New title"));

        // survives a reopen
        let reopened = Store::open(dir.path()).unwrap();
        assert_eq!(reopened.cleaned().len(), 1);
        assert_eq!(reopened.get("US1").unwrap().title.as_deref(), Some("New title"));
        assert_eq!(reopened.history("US1").unwrap().len(), 2);
    }

    #[test]
    fn quarantined_goes_to_raw_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        let mut rec = record("", "", "<p></p>");
        rec.title = None;
        assert_eq!(store.upsert(&rec, Verdict::Quarantined, "r").unwrap(), StoreResult::Quarantined);

        assert!(store.cleaned().is_empty());
        let raw = store.load_raw().unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].verdict, Verdict::Quarantined);
        assert_eq!(store.stats().unwrap().quarantined, 1);
    }

    #[test]
    fn raw_stream_folds_last_attempt_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        store.upsert(&record("US1", "A", "x"), Verdict::Valid, "r").unwrap();
        store.upsert(&record("US2", "B", "x"), Verdict::Valid, "r").unwrap();
        store.upsert(&record("US1", "C", "x"), Verdict::Valid, "r").unwrap();

        assert_eq!(store.load_raw().unwrap().len(), 3);
        let folded = store.raw_collection().unwrap();
        assert_eq!(folded.len(), 2);
        assert_eq!(folded["US1"].record.title.as_deref(), Some("C"));
    }

    #[test]
    fn torn_trailing_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        store.upsert(&record("US1", "A", "x"), Verdict::Valid, "r").unwrap();

        let mut f = OpenOptions::new().append(true).open(dir.path().join(RAW_FILE)).unwrap();
        f.write_all(b"{\"verdict\":\"valid\",\"rec").unwrap();

        assert_eq!(store.load_raw().unwrap().len(), 1);
    }

    #[test]
    fn identifierless_records_dedup_by_title() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        store.upsert(&record("", "Solar unit", "a"), Verdict::Valid, "r").unwrap();
        store.upsert(&record("", "Solar  Unit", "b"), Verdict::Valid, "r").unwrap();
        assert_eq!(store.cleaned().len(), 1);
        assert!(store.cleaned().contains_key("TITLE:SOLARUNIT"));
    }
}
