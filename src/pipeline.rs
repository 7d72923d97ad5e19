use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::fetcher::{Fetcher, RawDocument, Reference};
use crate::parser;
use crate::record::{ExtractionMeta, PatentRecord};
use crate::store::{Store, StoreError, StoreResult};
use crate::validate::{self, Verdict};

const STORE_IO: &str = "store_io";
const EMPTY_LISTING: &str = "listing page yielded no rows";

/// Per-reference lifecycle. The last three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    Pending,
    Fetching,
    Extracting,
    Validating,
    Stored,
    Quarantined,
    Failed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Pending => "PENDING",
            State::Fetching => "FETCHING",
            State::Extracting => "EXTRACTING",
            State::Validating => "VALIDATING",
            State::Stored => "STORED",
            State::Quarantined => "QUARANTINED",
            State::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceOutcome {
    pub reference: String,
    pub state: State,
    /// Keys of the records stored for this reference.
    pub identifiers: Vec<String>,
    pub failure: Option<String>,
}

impl ReferenceOutcome {
    fn failed(reference: &Reference, kind: &str) -> Self {
        ReferenceOutcome {
            reference: reference.to_string(),
            state: State::Failed,
            identifiers: Vec::new(),
            failure: Some(kind.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub references: usize,
    pub fetched: usize,
    pub valid: usize,
    pub quarantined: usize,
    pub failed_fetch: usize,
    pub failed_store: usize,
    pub skipped: usize,
    pub failures_by_kind: BTreeMap<String, usize>,
    pub halted: bool,
    pub cancelled: bool,
    pub outcomes: Vec<ReferenceOutcome>,
}

impl RunSummary {
    fn new(started_at: DateTime<Utc>, references: usize) -> Self {
        RunSummary {
            run_id: format!("run-{}", started_at.format("%Y%m%dT%H%M%S%.3fZ")),
            started_at,
            finished_at: started_at,
            references,
            fetched: 0,
            valid: 0,
            quarantined: 0,
            failed_fetch: 0,
            failed_store: 0,
            skipped: 0,
            failures_by_kind: BTreeMap::new(),
            halted: false,
            cancelled: false,
            outcomes: Vec::new(),
        }
    }

    fn count_failure(&mut self, kind: &str) {
        *self.failures_by_kind.entry(kind.to_string()).or_default() += 1;
    }
}

/// Drives references through fetch, extract, validate and store, one at a
/// time, and owns the run-level tally and halt decision.
pub struct Orchestrator {
    fetcher: Fetcher,
    store: Store,
    halt_after: usize,
    stop: Arc<AtomicBool>,
    progress: ProgressBar,
}

impl Orchestrator {
    /// `halt_after` consecutive fetch failures stop the run; 0 never halts.
    pub fn new(fetcher: Fetcher, store: Store, halt_after: usize) -> Self {
        Orchestrator {
            fetcher,
            store,
            halt_after,
            stop: Arc::new(AtomicBool::new(false)),
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Setting the flag stops the run before the next reference.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Process every reference and persist the run summary. Only a failure to
    /// write the summary itself is returned as an error.
    pub async fn run(&mut self, refs: &[Reference]) -> Result<RunSummary, StoreError> {
        let mut summary = RunSummary::new(Utc::now(), refs.len());
        let mut consecutive_failures = 0usize;
        info!(run_id = %summary.run_id, references = refs.len(), "Run started");
        self.progress.set_length(refs.len() as u64);

        for reference in refs {
            if !summary.halted && !summary.cancelled && self.stop.load(Ordering::SeqCst) {
                warn!(run_id = %summary.run_id, "Stop requested, skipping remaining references");
                summary.cancelled = true;
            }
            if summary.halted || summary.cancelled {
                let kind = if summary.halted { "skipped_after_halt" } else { "cancelled" };
                summary.skipped += 1;
                summary.outcomes.push(ReferenceOutcome::failed(reference, kind));
                self.progress.inc(1);
                continue;
            }

            self.progress.set_message(reference.to_string());
            let (outcome, fetch_failed) = self.process(reference, &mut summary).await;
            summary.outcomes.push(outcome);
            self.progress.inc(1);

            if fetch_failed {
                consecutive_failures += 1;
                if self.halt_after > 0 && consecutive_failures >= self.halt_after {
                    error!(
                        consecutive_failures,
                        "Too many consecutive fetch failures, halting run"
                    );
                    summary.halted = true;
                }
            } else {
                consecutive_failures = 0;
            }
        }

        self.progress.finish_and_clear();
        summary.finished_at = Utc::now();
        self.store.write_summary(&summary)?;
        info!(
            run_id = %summary.run_id,
            fetched = summary.fetched,
            valid = summary.valid,
            quarantined = summary.quarantined,
            failed_fetch = summary.failed_fetch,
            failed_store = summary.failed_store,
            skipped = summary.skipped,
            "Run finished"
        );
        Ok(summary)
    }

    /// One reference to its terminal state. The flag reports a fetch failure.
    async fn process(
        &mut self,
        reference: &Reference,
        summary: &mut RunSummary,
    ) -> (ReferenceOutcome, bool) {
        transition(reference, State::Pending);
        transition(reference, State::Fetching);
        let doc = match self.fetcher.fetch(reference).await {
            Ok(doc) => doc,
            Err(e) => {
                error!(reference = %reference, error = %e, "Fetch failed");
                summary.failed_fetch += 1;
                summary.count_failure(&e.label());
                transition(reference, State::Failed);
                return (ReferenceOutcome::failed(reference, &e.label()), true);
            }
        };
        summary.fetched += 1;

        transition(reference, State::Extracting);
        debug!(
            reference = %doc.reference,
            status = doc.status,
            bytes = doc.byte_len,
            "Extracting"
        );
        let records = if reference.is_listing() {
            let rows = parser::extract_listing(&doc);
            if rows.is_empty() {
                vec![empty_listing_capture(&doc)]
            } else {
                rows
            }
        } else {
            vec![parser::extract(&doc)]
        };

        transition(reference, State::Validating);
        let mut identifiers = Vec::new();
        let mut store_failures = 0usize;
        for rec in records {
            let (rec, verdict) = validate::normalize(rec);
            match self.upsert_with_retry(&rec, verdict, &summary.run_id) {
                Ok(StoreResult::Quarantined) => {
                    warn!(reference = %reference, url = %rec.source_url, "Record quarantined");
                    summary.quarantined += 1;
                }
                Ok(_) => {
                    summary.valid += 1;
                    identifiers.push(Store::key_for(&rec));
                }
                Err(e) => {
                    error!(reference = %reference, error = %e, "Store failed after retry");
                    summary.failed_store += 1;
                    summary.count_failure(STORE_IO);
                    store_failures += 1;
                }
            }
        }

        let (state, failure) = if !identifiers.is_empty() {
            (State::Stored, None)
        } else if store_failures > 0 {
            (State::Failed, Some(STORE_IO.to_string()))
        } else {
            (State::Quarantined, None)
        };
        transition(reference, state);
        let outcome = ReferenceOutcome {
            reference: reference.to_string(),
            state,
            identifiers,
            failure,
        };
        (outcome, false)
    }

    fn upsert_with_retry(
        &mut self,
        rec: &PatentRecord,
        verdict: Verdict,
        run_id: &str,
    ) -> Result<StoreResult, StoreError> {
        match self.store.upsert(rec, verdict, run_id) {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(error = %e, "Store write failed, retrying once");
                self.store.upsert(rec, verdict, run_id)
            }
        }
    }
}

/// Stands in for a listing page that yielded no rows, so the page is counted
/// as quarantined and `retry-quarantined` finds its URL.
fn empty_listing_capture(doc: &RawDocument) -> PatentRecord {
    let meta = ExtractionMeta::for_content(&doc.body);
    let mut rec = PatentRecord::empty(&doc.url, doc.retrieved_at, meta);
    rec.extraction_meta.warnings.push(EMPTY_LISTING.to_string());
    rec
}

fn transition(reference: &Reference, state: State) {
    info!(reference = %reference, state = %state, "Transition");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::FetchPolicy;
    use crate::rate_limit::RateLimiter;
    use chrono::NaiveDate;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap()
    }

    fn orchestrator(server: &MockServer, dir: &std::path::Path, halt_after: usize) -> Orchestrator {
        let policy = FetchPolicy {
            timeout: Duration::from_secs(2),
            max_retries: 0,
            backoff_base: Duration::from_millis(5),
            max_backoff: Duration::from_millis(10),
            max_total_wait: Duration::from_millis(50),
            user_agent: "patent_scraper-test".into(),
            patent_base_url: format!("{}/patent/", server.uri()),
        };
        let limiter = Arc::new(RateLimiter::new(Duration::ZERO));
        let fetcher = Fetcher::new(policy, limiter).unwrap();
        let store = Store::open(dir).unwrap();
        Orchestrator::new(fetcher, store, halt_after)
    }

    #[tokio::test]
    async fn scrapes_identifier_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/patent/US20210129107/en"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(fixture("US20210129107.html")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(&server, dir.path(), 5);
        let refs = vec![Reference::parse("US20210129107").unwrap()];
        let summary = orch.run(&refs).await.unwrap();

        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.valid, 1);
        assert_eq!(summary.outcomes[0].state, State::Stored);

        let rec = orch.store().get("US20210129107").unwrap();
        assert_eq!(
            rec.title.as_deref(),
            Some("Compositions and methods for the amplification of nucleic acids")
        );
        assert_eq!(rec.inventors, vec!["JianBing Fan"]);
        assert_eq!(rec.filing_date, NaiveDate::from_ymd_opt(2020, 11, 16));
        assert_eq!(rec.authority.as_deref(), Some("United States"));

        assert!(dir.path().join(crate::store::SUMMARY_FILE).exists());
        assert!(dir.path().join(crate::store::CLEANED_FILE).exists());
    }

    #[tokio::test]
    async fn not_found_counts_as_failed_fetch_and_writes_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(&server, dir.path(), 5);
        let summary = orch.run(&[Reference::Identifier("US0000000X".into())]).await.unwrap();

        assert_eq!(summary.failed_fetch, 1);
        assert_eq!(summary.failures_by_kind["http_error(404)"], 1);
        assert_eq!(summary.outcomes[0].state, State::Failed);
        assert_eq!(summary.outcomes[0].failure.as_deref(), Some("http_error(404)"));
        assert!(orch.store().cleaned().is_empty());
        assert!(orch.store().load_raw().unwrap().is_empty());
    }

    #[tokio::test]
    async fn consecutive_failures_halt_the_run() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(&server, dir.path(), 2);
        let refs: Vec<_> = ["US1111111", "US2222222", "US3333333", "US4444444"]
            .iter()
            .map(|id| Reference::Identifier(id.to_string()))
            .collect();
        let summary = orch.run(&refs).await.unwrap();

        assert!(summary.halted);
        assert_eq!(summary.failed_fetch, 2);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.outcomes.len(), 4);
        assert_eq!(summary.outcomes[3].failure.as_deref(), Some("skipped_after_halt"));
    }

    #[tokio::test]
    async fn a_success_resets_the_failure_streak() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/patent/US2222222/en"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<title>Good</title>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(&server, dir.path(), 2);
        let refs: Vec<_> = ["US1111111", "US2222222", "US3333333"]
            .iter()
            .map(|id| Reference::Identifier(id.to_string()))
            .collect();
        let summary = orch.run(&refs).await.unwrap();

        assert!(!summary.halted);
        assert_eq!(summary.failed_fetch, 2);
        assert_eq!(summary.valid, 1);
    }

    #[tokio::test]
    async fn listing_rows_are_stored_or_quarantined_individually() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ipm-mcpi/patents-brevets"))
            .respond_with(ResponseTemplate::new(200).set_body_string(fixture("listing.html")))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(&server, dir.path(), 5);
        let listing = Reference::listing_page(&format!("{}/ipm-mcpi/patents-brevets", server.uri()), 1);
        let summary = orch.run(&[listing]).await.unwrap();

        assert_eq!(summary.valid, 2);
        assert_eq!(summary.quarantined, 1);
        assert_eq!(summary.outcomes[0].state, State::Stored);
        assert_eq!(orch.store().cleaned().len(), 2);
        assert!(orch.store().get("CA2987654").is_some());
        assert_eq!(orch.store().load_raw().unwrap().len(), 3);
        assert_eq!(orch.store().quarantined_sources().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stop_flag_cancels_before_fetching() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(&server, dir.path(), 5);
        orch.stop_handle().store(true, Ordering::SeqCst);
        let summary = orch.run(&[Reference::Identifier("US1111111".into())]).await.unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.outcomes[0].failure.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn empty_listing_is_quarantined_and_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ipm-mcpi/patents-brevets"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body><p>Searching...</p></body></html>"),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(&server, dir.path(), 5);
        let listing = Reference::listing_page(&format!("{}/ipm-mcpi/patents-brevets", server.uri()), 2);
        let summary = orch.run(&[listing]).await.unwrap();

        assert_eq!(summary.outcomes[0].state, State::Quarantined);
        assert_eq!(summary.quarantined, 1);
        assert_eq!(summary.valid, 0);

        let raw = orch.store().load_raw().unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].record.extraction_meta.warnings, vec![EMPTY_LISTING]);

        let sources = orch.store().quarantined_sources().unwrap();
        assert_eq!(sources.len(), 1);
        assert!(Reference::parse(&sources[0]).unwrap().is_listing());
    }

    #[tokio::test]
    async fn store_failure_is_retried_once_then_fails_the_reference() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/patent/US20210129107/en"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(fixture("US20210129107.html")),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(&server, dir.path(), 5);
        // a directory in place of the cleaned file makes every rewrite fail
        std::fs::create_dir(dir.path().join(crate::store::CLEANED_FILE)).unwrap();

        let summary = orch.run(&[Reference::Identifier("US20210129107".into())]).await.unwrap();

        assert_eq!(summary.outcomes[0].state, State::Failed);
        assert_eq!(summary.outcomes[0].failure.as_deref(), Some("store_io"));
        assert_eq!(summary.failed_store, 1);
        assert_eq!(summary.failures_by_kind["store_io"], 1);
        assert_eq!(summary.valid, 0);
        assert!(orch.store().cleaned().is_empty());
        // both attempts reach the raw stream
        assert_eq!(orch.store().load_raw().unwrap().len(), 2);
    }
}
