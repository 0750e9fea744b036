use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Saga {
    Up,
    Down,
}

impl std::fmt::Display for Saga {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Saga::Up => "up",
            Saga::Down => "down",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Step,
    Settle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Running,
    Succeeded,
    Failed,
    Interrupted,
    /// A settle delay that ran its full length.
    Elapsed,
    /// A settle delay cut short by the stop signal.
    Cut,
}

/// One step or settle delay as executed by a saga.
#[derive(Debug, Clone, Serialize)]
pub struct JournalRecord {
    pub saga: Saga,
    pub kind: RecordKind,
    pub name: String,
    pub status: RecordStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip)]
    pub started_at: Option<Instant>,
    #[serde(
        rename = "duration_ms",
        skip_serializing_if = "Option::is_none",
        serialize_with = "as_millis"
    )]
    pub duration: Option<Duration>,
}

#[allow(clippy::ref_option)]
fn as_millis<S: serde::Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        None => s.serialize_none(),
    }
}

/// In-process record of everything the sagas did, in execution order.
#[derive(Debug, Default)]
pub struct SagaJournal {
    records: Vec<JournalRecord>,
}

impl SagaJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a record in the `Running` state and return its index.
    pub fn start(&mut self, saga: Saga, kind: RecordKind, name: &str) -> usize {
        self.records.push(JournalRecord {
            saga,
            kind,
            name: name.to_owned(),
            status: RecordStatus::Running,
            detail: None,
            started_at: Some(Instant::now()),
            duration: None,
        });
        self.records.len() - 1
    }

    pub fn finish(&mut self, index: usize, status: RecordStatus, detail: Option<String>) {
        if let Some(record) = self.records.get_mut(index) {
            record.status = status;
            record.detail = detail;
            record.duration = record.started_at.map(|t| t.elapsed());
        }
    }

    pub fn records(&self) -> &[JournalRecord] {
        &self.records
    }

    /// `"<kind> <name>"` labels for one saga, e.g. `"step delete cluster"`.
    pub fn labels(&self, saga: Saga) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.saga == saga)
            .map(|r| match r.kind {
                RecordKind::Step => format!("step {}", r.name),
                RecordKind::Settle => format!("settle {}", r.name),
            })
            .collect()
    }

    pub fn failed(&self) -> Vec<&JournalRecord> {
        self.records
            .iter()
            .filter(|r| r.status == RecordStatus::Failed)
            .collect()
    }

    pub fn summary(&self) -> String {
        let count = |status| self.records.iter().filter(|r| r.status == status).count();
        format!(
            "{} records: {} succeeded, {} failed, {} interrupted, {} settles cut short",
            self.records.len(),
            count(RecordStatus::Succeeded),
            count(RecordStatus::Failed),
            count(RecordStatus::Interrupted),
            count(RecordStatus::Cut),
        )
    }
}
