use birthday_core::db::open_db_in_memory;
use birthday_core::model::birthday::BirthdayId;
use birthday_core::repo::birthday_repo::RepoResult;
use birthday_core::{
    BatchOp, BatchOutcome, BirthdayRecord, BirthdayStore, BulkLoader, LoadError, RawRow,
    RepoError, RetryPolicy, RowError, SqliteBirthdayStore, StoredBirthday, WeekWindow,
};
use birthday_core::model::birthday::natural_key;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Store fake that fails the first `failures` batch calls, then records ops.
struct FlakyStore {
    failures: usize,
    calls: AtomicUsize,
    written: Mutex<Vec<Vec<BatchOp>>>,
}

impl FlakyStore {
    fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
            written: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn written_chunks(&self) -> Vec<Vec<BatchOp>> {
        self.written.lock().unwrap().clone()
    }
}

impl BirthdayStore for FlakyStore {
    fn upsert(&self, _record: &BirthdayRecord) -> RepoResult<BirthdayId> {
        Ok(1)
    }

    fn apply_batch(&self, ops: &[BatchOp]) -> RepoResult<BatchOutcome> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(RepoError::unavailable("quota exceeded"));
        }
        self.written.lock().unwrap().push(ops.to_vec());
        let upserted = ops
            .iter()
            .filter(|op| matches!(op, BatchOp::Upsert(_)))
            .count();
        Ok(BatchOutcome {
            upserted,
            deleted: ops.len() - upserted,
            missing: 0,
        })
    }

    fn query_by_window(&self, _window: &WeekWindow) -> RepoResult<Vec<BirthdayRecord>> {
        Ok(Vec::new())
    }

    fn get_by_name(&self, _name: &str) -> RepoResult<Option<StoredBirthday>> {
        Ok(None)
    }

    fn delete(&self, _name: &str) -> RepoResult<bool> {
        Ok(false)
    }

    fn list_all(&self) -> RepoResult<Vec<StoredBirthday>> {
        Ok(Vec::new())
    }

    fn count(&self) -> RepoResult<u64> {
        Ok(0)
    }
}

/// Store fake that accepts the first `healthy_chunks` batches, then fails forever.
struct DegradingStore {
    inner: FlakyStore,
    healthy_chunks: usize,
}

impl BirthdayStore for DegradingStore {
    fn upsert(&self, record: &BirthdayRecord) -> RepoResult<BirthdayId> {
        self.inner.upsert(record)
    }

    fn apply_batch(&self, ops: &[BatchOp]) -> RepoResult<BatchOutcome> {
        if self.inner.written_chunks().len() >= self.healthy_chunks {
            self.inner.calls.fetch_add(1, Ordering::SeqCst);
            return Err(RepoError::unavailable("connection reset"));
        }
        self.inner.apply_batch(ops)
    }

    fn query_by_window(&self, window: &WeekWindow) -> RepoResult<Vec<BirthdayRecord>> {
        self.inner.query_by_window(window)
    }

    fn get_by_name(&self, name: &str) -> RepoResult<Option<StoredBirthday>> {
        self.inner.get_by_name(name)
    }

    fn delete(&self, name: &str) -> RepoResult<bool> {
        self.inner.delete(name)
    }

    fn list_all(&self) -> RepoResult<Vec<StoredBirthday>> {
        self.inner.list_all()
    }

    fn count(&self) -> RepoResult<u64> {
        self.inner.count()
    }
}

/// Store fake keeping records in a map; upsert chunks are slower than deletes.
#[derive(Default)]
struct MapStore {
    records: Mutex<BTreeMap<String, BirthdayRecord>>,
}

impl BirthdayStore for MapStore {
    fn upsert(&self, record: &BirthdayRecord) -> RepoResult<BirthdayId> {
        let mut records = self.records.lock().unwrap();
        records.insert(record.natural_key(), record.clone());
        Ok(records.len() as BirthdayId)
    }

    fn apply_batch(&self, ops: &[BatchOp]) -> RepoResult<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for op in ops {
            match op {
                BatchOp::Upsert(record) => {
                    std::thread::sleep(Duration::from_millis(2));
                    self.upsert(record)?;
                    outcome.upserted += 1;
                }
                BatchOp::Delete(name) => {
                    if self.delete(name)? {
                        outcome.deleted += 1;
                    } else {
                        outcome.missing += 1;
                    }
                }
            }
        }
        Ok(outcome)
    }

    fn query_by_window(&self, _window: &WeekWindow) -> RepoResult<Vec<BirthdayRecord>> {
        Ok(Vec::new())
    }

    fn get_by_name(&self, _name: &str) -> RepoResult<Option<StoredBirthday>> {
        Ok(None)
    }

    fn delete(&self, name: &str) -> RepoResult<bool> {
        Ok(self.records.lock().unwrap().remove(&natural_key(name)).is_some())
    }

    fn list_all(&self) -> RepoResult<Vec<StoredBirthday>> {
        Ok(Vec::new())
    }

    fn count(&self) -> RepoResult<u64> {
        Ok(self.records.lock().unwrap().len() as u64)
    }
}

fn valid_rows(count: usize) -> Vec<RawRow> {
    (0..count)
        .map(|index| {
            let month = (index % 12 + 1).to_string();
            let day = (index % 28 + 1).to_string();
            RawRow::new(index + 2, format!("person {index}"), month, day)
        })
        .collect()
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::ZERO)
}

#[test]
fn chunking_120_valid_and_3_malformed_rows_issues_3_batches() {
    let mut rows = valid_rows(120);
    rows.push(RawRow::new(200, "", "1", "1"));
    rows.push(RawRow::new(201, "Bad Month", "Smarch", "1"));
    rows.push(RawRow::new(202, "Bad Day", "2", "30"));

    let store = FlakyStore::new(0);
    let report = BulkLoader::new(&store)
        .with_policy(fast_retry(3))
        .load(&rows, 50)
        .unwrap();

    assert_eq!(store.calls(), 3);
    assert_eq!(report.total_rows, 123);
    assert_eq!(report.accepted, 120);
    assert_eq!(report.rejected_count(), 3);
    assert_eq!(report.batches_written, 3);
    assert_eq!(report.rows_written, 120);

    let sizes = store
        .written_chunks()
        .iter()
        .map(Vec::len)
        .collect::<Vec<_>>();
    assert_eq!(sizes, vec![50, 50, 20]);

    let rejected_rows = report.rejected.iter().map(|r| r.row).collect::<Vec<_>>();
    assert_eq!(rejected_rows, vec![200, 201, 202]);
    assert_eq!(report.rejected[0].reason, RowError::MissingName);
    assert!(matches!(report.rejected[1].reason, RowError::UnknownMonth(_)));
    assert!(matches!(report.rejected[2].reason, RowError::Invalid(_)));
}

#[test]
fn transient_failures_below_max_attempts_are_retried() {
    let store = FlakyStore::new(2);
    let report = BulkLoader::new(&store)
        .with_policy(fast_retry(3))
        .load(&valid_rows(10), 50)
        .unwrap();

    assert_eq!(report.batches_written, 1);
    assert_eq!(report.batch_attempts, 3);
    assert_eq!(report.rows_written, 10);
}

#[test]
fn exhausted_chunk_reports_row_range_and_keeps_earlier_chunks() {
    let store = DegradingStore {
        inner: FlakyStore::new(0),
        healthy_chunks: 1,
    };
    let rows = valid_rows(25);

    let err = BulkLoader::new(&store)
        .with_policy(fast_retry(2))
        .load(&rows, 10)
        .unwrap_err();

    match &err {
        LoadError::ChunkFailed {
            first_row,
            last_row,
            attempts,
            source,
            report,
        } => {
            assert_eq!((*first_row, *last_row), (12, 21));
            assert_eq!(*attempts, 2);
            assert!(source.is_unavailable());
            assert_eq!(report.batches_written, 1);
            assert_eq!(report.rows_written, 10);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.inner.written_chunks().len(), 1);
    assert_eq!(err.partial_report().unwrap().batch_attempts, 3);
}

#[test]
fn cancellation_before_first_chunk_writes_nothing() {
    let store = FlakyStore::new(0);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = BulkLoader::new(&store)
        .with_cancellation(cancel)
        .load(&valid_rows(30), 10)
        .unwrap_err();

    assert!(matches!(err, LoadError::Cancelled { .. }));
    assert_eq!(err.partial_report().unwrap().batches_written, 0);
    assert_eq!(store.calls(), 0);
}

#[test]
fn zero_chunk_size_is_rejected() {
    let store = FlakyStore::new(0);
    let err = BulkLoader::new(&store).load(&valid_rows(3), 0).unwrap_err();
    assert!(matches!(err, LoadError::InvalidChunkSize));
    assert_eq!(store.calls(), 0);
}

#[test]
fn delete_rows_flow_through_as_delete_ops() {
    let rows = vec![
        RawRow::new(2, "Alice", "6", "5"),
        RawRow::new(3, "Bob", "", "").with_action("delete"),
    ];
    let store = FlakyStore::new(0);
    let report = BulkLoader::new(&store).load(&rows, 50).unwrap();

    assert_eq!(report.upserted, 1);
    assert_eq!(report.deleted, 1);
    assert_eq!(
        store.written_chunks()[0][1],
        BatchOp::Delete("Bob".to_string())
    );
}

#[test]
fn concurrent_load_writes_every_chunk_once() {
    let store = FlakyStore::new(0);
    let report = BulkLoader::new(&store)
        .with_policy(fast_retry(1))
        .with_workers(4)
        .load_concurrent(&valid_rows(120), 25)
        .unwrap();

    assert_eq!(report.batches_written, 5);
    assert_eq!(report.rows_written, 120);
    assert_eq!(store.calls(), 5);
    let mut total = store
        .written_chunks()
        .iter()
        .map(Vec::len)
        .collect::<Vec<_>>();
    total.sort_unstable();
    assert_eq!(total, vec![20, 25, 25, 25, 25]);
}

#[test]
fn concurrent_load_surfaces_chunk_failure() {
    let store = FlakyStore::new(usize::MAX);
    let err = BulkLoader::new(&store)
        .with_policy(fast_retry(2))
        .with_workers(3)
        .load_concurrent(&valid_rows(40), 10)
        .unwrap_err();

    match err {
        LoadError::ChunkFailed { attempts, report, .. } => {
            assert_eq!(attempts, 2);
            assert_eq!(report.batches_written, 0);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn concurrent_load_keeps_add_then_delete_order_per_name() {
    let mut rows = Vec::new();
    for index in 0..20 {
        let name = format!("guest {index}");
        rows.push(RawRow::new(rows.len() + 2, name.clone(), "4", "12"));
        rows.push(RawRow::new(rows.len() + 2, name, "", "").with_action("delete"));
    }

    let sequential = MapStore::default();
    BulkLoader::new(&sequential).load(&rows, 1).unwrap();
    assert_eq!(sequential.count().unwrap(), 0);

    let concurrent = MapStore::default();
    let report = BulkLoader::new(&concurrent)
        .with_workers(4)
        .load_concurrent(&rows, 1)
        .unwrap();
    assert_eq!(report.batches_written, 40);
    assert_eq!(report.upserted, 20);
    assert_eq!(report.deleted, 20);
    assert_eq!(report.missing, 0);
    assert_eq!(concurrent.count().unwrap(), 0);
}

#[test]
fn concurrent_load_keeps_the_last_of_repeated_adds() {
    let rows = vec![
        RawRow::new(2, "Ada", "1", "1"),
        RawRow::new(3, "Grace", "2", "2"),
        RawRow::new(4, "ada", "12", "10"),
    ];
    let store = MapStore::default();
    BulkLoader::new(&store)
        .with_workers(3)
        .load_concurrent(&rows, 1)
        .unwrap();

    let records = store.records.lock().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!((records["ada"].month, records["ada"].day), (12, 10));
}

#[test]
fn reloading_the_same_rows_creates_no_duplicates() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteBirthdayStore::try_new(&conn).unwrap();
    let rows = valid_rows(60);

    let first = BulkLoader::new(&store).load(&rows, 50).unwrap();
    let second = BulkLoader::new(&store).load(&rows, 50).unwrap();

    assert_eq!(first.rows_written, 60);
    assert_eq!(second.rows_written, 60);
    assert_eq!(store.count().unwrap(), 60);
}

#[test]
fn batch_upsert_chunks_prebuilt_records() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteBirthdayStore::try_new(&conn).unwrap();
    let records = (0..7)
        .map(|index| BirthdayRecord::new(format!("friend {index}"), 3, index + 1, None).unwrap())
        .collect::<Vec<_>>();

    let report = store.batch_upsert(&records, 3).unwrap();
    assert_eq!(report.batches_written, 3);
    assert_eq!(store.count().unwrap(), 7);
}
