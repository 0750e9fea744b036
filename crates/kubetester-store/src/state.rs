use crate::layout::StateLayout;
use crate::{fsync_dir, StoreError};
use kubetester_config::{AddOnKind, EnvironmentConfig, NodeGroupKind, ResourceKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::NamedTempFile;

/// Current state document format. Incremented on incompatible changes.
pub const STATE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceState {
    pub created: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Persisted view of one node group or add-on.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComponentState {
    pub enabled: bool,
    pub created: bool,
    #[serde(default)]
    pub fetch_logs_requested: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// References to the control plane returned when it was created.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterRefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority: Option<String>,
}

/// Runtime status of an environment, written after every saga phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateDocument {
    pub version: u32,
    pub name: String,
    pub up: bool,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down_at: Option<String>,
    #[serde(default)]
    pub cluster: ClusterRefs,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,
    #[serde(default)]
    pub node_groups: BTreeMap<String, ComponentState>,
    #[serde(default)]
    pub add_ons: BTreeMap<String, ComponentState>,
    /// blake3 checksum over the document with this field unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl StateDocument {
    pub fn new(name: &str) -> Self {
        let ts = now();
        Self {
            version: STATE_FORMAT_VERSION,
            name: name.to_owned(),
            up: false,
            created_at: ts.clone(),
            updated_at: ts,
            up_at: None,
            down_at: None,
            cluster: ClusterRefs::default(),
            resources: BTreeMap::new(),
            node_groups: BTreeMap::new(),
            add_ons: BTreeMap::new(),
            checksum: None,
        }
    }

    fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.checksum = None;
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }

    /// Refresh the intent fields (enabled, namespace, log requests) from config.
    ///
    /// `created` flags are never touched here. A component that was created
    /// but is no longer enabled keeps its entry so teardown still deletes it.
    pub fn sync_intent(&mut self, config: &EnvironmentConfig) {
        for kind in AddOnKind::ALL {
            let intent = config.add_on(*kind);
            let enabled = intent.is_some_and(|a| a.enable);
            if !enabled && !self.add_ons.contains_key(kind.as_str()) {
                continue;
            }
            let entry = self.add_ons.entry(kind.as_str().to_owned()).or_default();
            entry.enabled = enabled;
            entry.fetch_logs_requested = intent.is_some_and(|a| a.fetch_logs);
            entry.namespace = intent.and_then(|a| a.namespace.clone());
        }
        for kind in NodeGroupKind::CREATION_ORDER {
            let section = config.node_group(kind);
            if !section.enable && !self.node_groups.contains_key(kind.as_str()) {
                continue;
            }
            let entry = self.node_groups.entry(kind.as_str().to_owned()).or_default();
            entry.enabled = section.enable;
            entry.fetch_logs_requested = section.fetch_logs;
        }
    }

    pub fn resource_created(&self, kind: ResourceKind) -> bool {
        self.resources
            .get(kind.as_str())
            .is_some_and(|r| r.created)
    }

    pub fn set_resource_created(&mut self, kind: ResourceKind, created: bool) {
        let entry = self.resources.entry(kind.as_str().to_owned()).or_default();
        entry.created = created;
        entry.created_at = created.then(now);
        if kind == ResourceKind::Cluster && !created {
            self.cluster = ClusterRefs::default();
        }
    }

    pub fn node_group(&self, kind: NodeGroupKind) -> Option<&ComponentState> {
        self.node_groups.get(kind.as_str())
    }

    pub fn node_group_created(&self, kind: NodeGroupKind) -> bool {
        self.node_group(kind).is_some_and(|n| n.created)
    }

    pub fn set_node_group_created(&mut self, kind: NodeGroupKind, created: bool) {
        let entry = self.node_groups.entry(kind.as_str().to_owned()).or_default();
        entry.created = created;
        entry.created_at = created.then(now);
    }

    pub fn add_on(&self, kind: AddOnKind) -> Option<&ComponentState> {
        self.add_ons.get(kind.as_str())
    }

    pub fn add_on_created(&self, kind: AddOnKind) -> bool {
        self.add_on(kind).is_some_and(|a| a.created)
    }

    pub fn set_add_on_created(&mut self, kind: AddOnKind, created: bool) {
        let entry = self.add_ons.entry(kind.as_str().to_owned()).or_default();
        entry.created = created;
        entry.created_at = created.then(now);
    }

    /// Add-ons whose `created` flag is set, in creation order.
    pub fn created_add_ons(&self) -> Vec<AddOnKind> {
        AddOnKind::ALL
            .iter()
            .copied()
            .filter(|k| self.add_on_created(*k))
            .collect()
    }

    /// True if any resource, node group, or add-on is still recorded as created.
    pub fn anything_created(&self) -> bool {
        self.resources.values().any(|r| r.created)
            || self.node_groups.values().any(|n| n.created)
            || self.add_ons.values().any(|a| a.created)
    }

    pub fn touch(&mut self) {
        self.updated_at = now();
    }

    pub fn mark_up(&mut self) {
        self.up = true;
        self.up_at = Some(now());
    }

    pub fn mark_down(&mut self) {
        self.up = false;
        self.down_at = Some(now());
    }
}

/// Durable storage for the state document.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<Option<StateDocument>, StoreError>;

    fn save(&self, doc: &StateDocument) -> Result<(), StoreError>;
}

/// State document stored as checksummed JSON, replaced atomically on save.
pub struct FileStateStore {
    layout: StateLayout,
    name: String,
}

impl FileStateStore {
    pub fn new(layout: StateLayout, name: &str) -> Self {
        Self {
            layout,
            name: name.to_owned(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.layout.state_file(&self.name)
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Option<StateDocument>, StoreError> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let doc: StateDocument = serde_json::from_str(&content)?;

        if doc.version != STATE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STATE_FORMAT_VERSION,
                found: doc.version,
            });
        }
        let Some(expected) = doc.checksum.as_deref() else {
            return Err(StoreError::MissingChecksum(path.display().to_string()));
        };
        let actual = doc.compute_checksum()?;
        if actual != expected {
            return Err(StoreError::IntegrityFailure {
                path: path.display().to_string(),
                expected: expected.to_owned(),
                actual,
            });
        }
        Ok(Some(doc))
    }

    fn save(&self, doc: &StateDocument) -> Result<(), StoreError> {
        self.layout.initialize(&self.name)?;
        let dir = self.layout.env_dir(&self.name);

        let mut sealed = doc.clone();
        sealed.checksum = Some(sealed.compute_checksum()?);
        let content = serde_json::to_string_pretty(&sealed)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path()).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryInner {
    doc: Option<StateDocument>,
    saves: usize,
}

/// In-memory store. Clones share the same document.
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(doc: StateDocument) -> Self {
        let store = Self::default();
        store.lock().doc = Some(doc);
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn document(&self) -> Option<StateDocument> {
        self.lock().doc.clone()
    }

    /// Number of successful saves so far.
    pub fn saves(&self) -> usize {
        self.lock().saves
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<StateDocument>, StoreError> {
        Ok(self.document())
    }

    fn save(&self, doc: &StateDocument) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.doc = Some(doc.clone());
        inner.saves += 1;
        Ok(())
    }
}
