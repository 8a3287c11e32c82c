use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::{
    cascade::{CascadeStep, CascadeStore, CascadeTx, Selector},
    credentials,
    error::{AppError, AppResult},
    models::{
        AuditLogQuery, AuditRecord, Identity, IdentityChanges, NewAuditRecord, NewIdentity,
        PageWindow, Role, UserStatus,
    },
    repository::{AuditSink, IdentityRepository},
};

/// A content row reduced to its id-valued columns, which is all a cascade looks at.
pub type Row = BTreeMap<&'static str, Uuid>;

/// Every content table, by name.
pub type Tables = BTreeMap<&'static str, Vec<Row>>;

/// `(child table, column, parent table)` for every content foreign key. Deleting a parent
/// row that a child still references fails, as it does in Postgres.
const REFERENCES: &[(&str, &str, &str)] = &[
    ("post_likes", "post_id", "posts"),
    ("comments", "post_id", "posts"),
    ("post_collections", "post_id", "posts"),
    ("comment_likes", "comment_id", "comments"),
    ("practice_room_members", "room_id", "practice_rooms"),
];

/// Builds a row from `(column, value)` pairs.
pub fn row(pairs: &[(&'static str, Uuid)]) -> Row {
    pairs.iter().copied().collect()
}

#[derive(Default)]
struct Faults {
    fail_step: StdMutex<Option<&'static str>>,
    step_delay: StdMutex<Option<Duration>>,
    fail_audit: AtomicBool,
}

impl Faults {
    fn failing_step(&self) -> Option<&'static str> {
        *self.fail_step.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn delay(&self) -> Option<Duration> {
        *self.step_delay.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// MemoryStore
///
/// In-process implementation of the cascade, identity and audit seams. Transactions stage
/// a copy of the tables and hold the table lock until they finish, so concurrent batches
/// serialize. Faults can be injected per step for rollback tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    identities: Arc<Mutex<Vec<Identity>>>,
    audit: Arc<Mutex<Vec<AuditRecord>>>,
    faults: Arc<Faults>,
    transactions_begun: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, table: &'static str, row: Row) {
        self.tables.lock().await.entry(table).or_default().push(row);
    }

    pub async fn rows(&self, table: &'static str) -> Vec<Row> {
        self.tables
            .lock()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn count(&self, table: &'static str) -> usize {
        self.tables.lock().await.get(table).map_or(0, Vec::len)
    }

    pub async fn snapshot(&self) -> Tables {
        self.tables.lock().await.clone()
    }

    /// Makes the named cascade step fail inside its transaction.
    pub fn fail_on_step(&self, step: &'static str) {
        *self.faults.fail_step.lock().unwrap_or_else(|p| p.into_inner()) = Some(step);
    }

    /// Makes every cascade step sleep first, for deadline tests.
    pub fn delay_steps(&self, by: Duration) {
        *self.faults.step_delay.lock().unwrap_or_else(|p| p.into_inner()) = Some(by);
    }

    pub fn fail_audit_writes(&self, fail: bool) {
        self.faults.fail_audit.store(fail, Ordering::SeqCst);
    }

    pub fn clear_faults(&self) {
        *self.faults.fail_step.lock().unwrap_or_else(|p| p.into_inner()) = None;
        *self.faults.step_delay.lock().unwrap_or_else(|p| p.into_inner()) = None;
        self.faults.fail_audit.store(false, Ordering::SeqCst);
    }

    pub fn transactions_begun(&self) -> usize {
        self.transactions_begun.load(Ordering::SeqCst)
    }

    pub async fn audit_records(&self) -> Vec<AuditRecord> {
        self.audit.lock().await.clone()
    }

    /// Creates an enabled identity with an Argon2 hash of `password`.
    pub async fn add_identity(
        &self,
        username: &str,
        password: &str,
        role: Role,
    ) -> AppResult<Identity> {
        let password_hash = credentials::hash_password(password).await?;
        self.create_identity(NewIdentity {
            username: username.to_string(),
            email: None,
            phone: None,
            password_hash,
            role,
            status: UserStatus::Enabled,
        })
        .await
    }
}

/// Staged copy of the tables plus the guard that keeps other transactions out.
pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    staged: Tables,
    faults: Arc<Faults>,
}

#[async_trait]
impl CascadeTx for MemoryTx {
    async fn delete(&mut self, step: &CascadeStep, ids: &[Uuid]) -> AppResult<u64> {
        if let Some(delay) = self.faults.delay() {
            tokio::time::sleep(delay).await;
        }
        if self.faults.failing_step() == Some(step.name) {
            return Err(AppError::Internal(format!("injected fault at '{}'", step.name)));
        }

        let roots: HashSet<Uuid> = ids.iter().copied().collect();
        let (column, targets) = match step.selector {
            Selector::Column(column) => (column, roots),
            Selector::Via {
                column,
                parent_table,
                parent_column,
            } => {
                let parents = self
                    .staged
                    .get(parent_table)
                    .into_iter()
                    .flatten()
                    .filter(|r| r.get(parent_column).is_some_and(|v| roots.contains(v)))
                    .filter_map(|r| r.get("id").copied())
                    .collect();
                (column, parents)
            }
        };

        let table = self.staged.entry(step.table).or_default();
        let before = table.len();
        let mut removed: HashSet<Uuid> = HashSet::new();
        table.retain(|r| {
            let hit = r.get(column).is_some_and(|v| targets.contains(v));
            if hit {
                removed.extend(r.get("id").copied());
            }
            !hit
        });
        let deleted = (before - table.len()) as u64;

        for (child, fk, _) in REFERENCES.iter().filter(|(_, _, parent)| *parent == step.table) {
            let dangling = self
                .staged
                .get(child)
                .into_iter()
                .flatten()
                .any(|r| r.get(fk).is_some_and(|v| removed.contains(v)));
            if dangling {
                return Err(AppError::Conflict(format!(
                    "{child}.{fk} still references {}",
                    step.table
                )));
            }
        }

        Ok(deleted)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryTx {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        Ok(())
    }
}

#[async_trait]
impl CascadeStore for MemoryStore {
    async fn begin(&self) -> AppResult<Box<dyn CascadeTx>> {
        let guard = self.tables.clone().lock_owned().await;
        self.transactions_begun.fetch_add(1, Ordering::SeqCst);
        let staged = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            staged,
            faults: self.faults.clone(),
        }))
    }
}

fn matches_keyword(identity: &Identity, keyword: &str) -> bool {
    [
        Some(identity.username.as_str()),
        identity.email.as_deref(),
        identity.phone.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|field| field.to_lowercase().contains(&keyword.to_lowercase()))
}

fn page_of<T: Clone>(items: &[T], window: PageWindow) -> Vec<T> {
    items
        .iter()
        .skip(window.offset() as usize)
        .take(window.page_size as usize)
        .cloned()
        .collect()
}

#[async_trait]
impl IdentityRepository for MemoryStore {
    async fn find_by_username(&self, username: &str) -> AppResult<Option<Identity>> {
        let identities = self.identities.lock().await;
        Ok(identities.iter().find(|i| i.username == username).cloned())
    }

    async fn get_identity(&self, id: Uuid) -> AppResult<Option<Identity>> {
        let identities = self.identities.lock().await;
        Ok(identities.iter().find(|i| i.id == id).cloned())
    }

    async fn list_identities(
        &self,
        window: PageWindow,
        keyword: Option<&str>,
    ) -> AppResult<(Vec<Identity>, i64)> {
        let identities = self.identities.lock().await;
        let mut matched: Vec<Identity> = identities
            .iter()
            .filter(|i| keyword.is_none_or(|k| matches_keyword(i, k)))
            .cloned()
            .collect();
        matched.reverse();
        Ok((page_of(&matched, window), matched.len() as i64))
    }

    async fn create_identity(&self, new: NewIdentity) -> AppResult<Identity> {
        let mut identities = self.identities.lock().await;
        if identities.iter().any(|i| i.username == new.username) {
            return Err(AppError::Conflict(format!(
                "username '{}' already exists",
                new.username
            )));
        }
        let now = Utc::now();
        let identity = Identity {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            phone: new.phone,
            password_hash: new.password_hash,
            role: new.role,
            status: new.status,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        };
        identities.push(identity.clone());
        Ok(identity)
    }

    async fn update_identity(
        &self,
        id: Uuid,
        changes: IdentityChanges,
    ) -> AppResult<Option<Identity>> {
        let mut identities = self.identities.lock().await;
        let Some(identity) = identities.iter_mut().find(|i| i.id == id) else {
            return Ok(None);
        };
        if let Some(email) = changes.email {
            identity.email = Some(email);
        }
        if let Some(phone) = changes.phone {
            identity.phone = Some(phone);
        }
        if let Some(hash) = changes.password_hash {
            identity.password_hash = hash;
        }
        if let Some(role) = changes.role {
            identity.role = role;
        }
        if let Some(status) = changes.status {
            identity.status = status;
        }
        identity.updated_at = Utc::now();
        Ok(Some(identity.clone()))
    }

    async fn delete_identity(&self, id: Uuid) -> AppResult<bool> {
        let mut identities = self.identities.lock().await;
        let before = identities.len();
        identities.retain(|i| i.id != id);
        Ok(identities.len() < before)
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        let mut identities = self.identities.lock().await;
        if let Some(identity) = identities.iter_mut().find(|i| i.id == id) {
            identity.last_login_at = Some(at);
        }
        Ok(())
    }
}

fn field_matches(filter: Option<&str>, value: &str) -> bool {
    match filter.map(str::trim).filter(|f| !f.is_empty()) {
        Some(f) => f == value,
        None => true,
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn append(&self, record: NewAuditRecord) -> AppResult<AuditRecord> {
        if self.faults.fail_audit.load(Ordering::SeqCst) {
            return Err(AppError::Internal("audit sink unavailable".to_string()));
        }
        let stored = AuditRecord {
            id: Uuid::new_v4(),
            actor_id: record.actor_id,
            actor_username: record.actor_username,
            actor_role: record.actor_role,
            action: record.action,
            resource_type: record.resource_type,
            resource_id: record.resource_id,
            detail: record.detail,
            outcome: record.outcome,
            created_at: Utc::now(),
        };
        self.audit.lock().await.push(stored.clone());
        Ok(stored)
    }

    async fn list(&self, query: &AuditLogQuery) -> AppResult<(Vec<AuditRecord>, i64)> {
        let audit = self.audit.lock().await;
        let matched: Vec<AuditRecord> = audit
            .iter()
            .rev()
            .filter(|r| field_matches(query.action.as_deref(), &r.action))
            .filter(|r| field_matches(query.resource.as_deref(), &r.resource_type))
            .filter(|r| field_matches(query.status.as_deref(), r.outcome.as_str()))
            .filter(|r| field_matches(query.username.as_deref(), &r.actor_username))
            .cloned()
            .collect();
        Ok((page_of(&matched, query.window()), matched.len() as i64))
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<AuditRecord>> {
        let audit = self.audit.lock().await;
        Ok(audit.iter().find(|r| r.id == id).cloned())
    }
}
