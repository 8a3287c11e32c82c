use async_trait::async_trait;
use std::{collections::HashSet, fmt, sync::Arc, time::Duration};
use uuid::Uuid;

use crate::{
    audit,
    error::{AppError, AppResult},
    models::{BatchDeleteRequest, BatchDeleteResponse, StepCount},
};

// --- Dependency table ---

/// Selector
///
/// How a cascade step finds the rows it removes for a batch of root ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    /// `column = ANY(ids)` on the step's own table.
    Column(&'static str),
    /// Rows whose `column` points at a `parent_table` row selected by `parent_column = ANY(ids)`.
    Via {
        column: &'static str,
        parent_table: &'static str,
        parent_column: &'static str,
    },
}

/// One table touched by a cascade, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeStep {
    pub name: &'static str,
    pub table: &'static str,
    pub selector: Selector,
}

impl CascadeStep {
    const fn by_column(table: &'static str, column: &'static str) -> Self {
        Self {
            name: table,
            table,
            selector: Selector::Column(column),
        }
    }

    /// The parameterized statement for this step. `$1` is the `uuid[]` of root ids.
    /// Identifiers come from the static plans only, never from input.
    pub fn delete_sql(&self) -> String {
        match self.selector {
            Selector::Column(column) => {
                format!("DELETE FROM {} WHERE {} = ANY($1)", self.table, column)
            }
            Selector::Via {
                column,
                parent_table,
                parent_column,
            } => format!(
                "DELETE FROM {} WHERE {} IN (SELECT id FROM {} WHERE {} = ANY($1))",
                self.table, column, parent_table, parent_column
            ),
        }
    }
}

const POST_PLAN: &[CascadeStep] = &[
    CascadeStep {
        name: "comment_likes",
        table: "comment_likes",
        selector: Selector::Via {
            column: "comment_id",
            parent_table: "comments",
            parent_column: "post_id",
        },
    },
    CascadeStep::by_column("post_likes", "post_id"),
    CascadeStep::by_column("comments", "post_id"),
    CascadeStep::by_column("post_collections", "post_id"),
    CascadeStep::by_column("posts", "id"),
];

const ROOM_PLAN: &[CascadeStep] = &[
    CascadeStep::by_column("practice_room_members", "room_id"),
    CascadeStep::by_column("practice_rooms", "id"),
];

const COMMENT_PLAN: &[CascadeStep] = &[
    CascadeStep::by_column("comment_likes", "comment_id"),
    CascadeStep::by_column("comments", "id"),
];

const TRAINING_RECORD_PLAN: &[CascadeStep] = &[CascadeStep::by_column("training_records", "id")];
const POST_LIKE_PLAN: &[CascadeStep] = &[CascadeStep::by_column("post_likes", "id")];
const POST_COLLECTION_PLAN: &[CascadeStep] = &[CascadeStep::by_column("post_collections", "id")];
const FOLLOW_PLAN: &[CascadeStep] = &[CascadeStep::by_column("follows", "id")];

/// ResourceKind
///
/// Every resource type that can be batch-deleted. Each kind owns a static plan:
/// dependents first, the root table last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Post,
    Room,
    Comment,
    TrainingRecord,
    PostLike,
    PostCollection,
    Follow,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        Self::Post,
        Self::Room,
        Self::Comment,
        Self::TrainingRecord,
        Self::PostLike,
        Self::PostCollection,
        Self::Follow,
    ];

    pub fn plan(&self) -> &'static [CascadeStep] {
        match self {
            Self::Post => POST_PLAN,
            Self::Room => ROOM_PLAN,
            Self::Comment => COMMENT_PLAN,
            Self::TrainingRecord => TRAINING_RECORD_PLAN,
            Self::PostLike => POST_LIKE_PLAN,
            Self::PostCollection => POST_COLLECTION_PLAN,
            Self::Follow => FOLLOW_PLAN,
        }
    }

    /// URL segment and response label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "posts",
            Self::Room => "rooms",
            Self::Comment => "comments",
            Self::TrainingRecord => "training-records",
            Self::PostLike => "post-likes",
            Self::PostCollection => "post-collections",
            Self::Follow => "follows",
        }
    }

    /// `resource_type` written to the operation log.
    pub fn audit_name(&self) -> &'static str {
        match self {
            Self::Post => "Post",
            Self::Room => "PracticeRoom",
            Self::Comment => "Comment",
            Self::TrainingRecord => "TrainingRecord",
            Self::PostLike => "PostLike",
            Self::PostCollection => "PostCollection",
            Self::Follow => "Follow",
        }
    }

    /// `action` written to the operation log.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Post => "DeletePost",
            Self::Room => "DeleteRoom",
            Self::Comment => "DeleteComment",
            Self::TrainingRecord => "DeleteTrainingRecord",
            Self::PostLike => "DeletePostLike",
            Self::PostCollection => "DeletePostCollection",
            Self::Follow => "DeleteFollow",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Input ---

/// IdBatch
///
/// A validated, non-empty set of root ids. Duplicates are dropped, first occurrence wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdBatch(Vec<Uuid>);

impl IdBatch {
    pub fn new(ids: Vec<Uuid>) -> AppResult<Self> {
        let mut seen = HashSet::with_capacity(ids.len());
        let ids: Vec<Uuid> = ids.into_iter().filter(|id| seen.insert(*id)).collect();
        if ids.is_empty() {
            return Err(AppError::Validation("ids must not be empty".to_string()));
        }
        Ok(Self(ids))
    }

    pub fn from_request(req: BatchDeleteRequest) -> AppResult<Self> {
        match req.ids {
            Some(ids) => Self::new(ids),
            None => Err(AppError::Validation("ids is required".to_string())),
        }
    }

    pub fn as_slice(&self) -> &[Uuid] {
        &self.0
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    /// Comma-joined ids, the `resource_id` of the batch's audit line.
    pub fn joined(&self) -> String {
        audit::join_ids(&self.0)
    }
}

// --- Store seam ---

/// CascadeStore
///
/// Anything that can open a transaction a cascade runs in.
#[async_trait]
pub trait CascadeStore: Send + Sync {
    async fn begin(&self) -> AppResult<Box<dyn CascadeTx>>;
}

/// An open transaction. Dropping it without `commit` discards every staged delete.
#[async_trait]
pub trait CascadeTx: Send {
    /// Runs one step for `ids`, returning the rows removed.
    async fn delete(&mut self, step: &CascadeStep, ids: &[Uuid]) -> AppResult<u64>;
    async fn commit(self: Box<Self>) -> AppResult<()>;
    async fn rollback(self: Box<Self>) -> AppResult<()>;
}

pub type CascadeState = Arc<dyn CascadeStore>;

/// Lifecycle of one cascade request, as traced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadePhase {
    Received,
    InTransaction,
    Committed,
    RolledBack,
}

impl CascadePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::InTransaction => "in_transaction",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        }
    }
}

/// Result of a committed cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeReport {
    pub kind: ResourceKind,
    pub ids: Vec<Uuid>,
    pub steps: Vec<StepCount>,
}

impl CascadeReport {
    pub fn rows_for(&self, step: &str) -> u64 {
        self.steps
            .iter()
            .find(|s| s.step == step)
            .map_or(0, |s| s.rows)
    }
}

impl From<CascadeReport> for BatchDeleteResponse {
    fn from(report: CascadeReport) -> Self {
        Self {
            resource: report.kind.as_str().to_string(),
            ids: report.ids,
            steps: report.steps,
        }
    }
}

// --- Coordinator ---

/// Coordinator
///
/// The single routine that interprets every plan. One transaction per call, steps strictly
/// sequential in plan order, commit only when all succeed. Any failure or an exceeded deadline
/// rolls the whole batch back and surfaces `AppError::Transaction` naming the step.
#[derive(Clone)]
pub struct Coordinator {
    store: CascadeState,
    deadline: Option<Duration>,
}

impl Coordinator {
    pub fn new(store: CascadeState, deadline: Option<Duration>) -> Self {
        Self { store, deadline }
    }

    pub async fn delete_with_dependents(
        &self,
        kind: ResourceKind,
        ids: &IdBatch,
    ) -> AppResult<CascadeReport> {
        tracing::debug!(
            resource = kind.as_str(),
            count = ids.len(),
            phase = CascadePhase::Received.as_str(),
            "cascade requested"
        );

        let mut tx = self.store.begin().await.map_err(|e| AppError::Transaction {
            step: "begin",
            message: e.to_string(),
        })?;
        tracing::debug!(resource = kind.as_str(), phase = CascadePhase::InTransaction.as_str());

        let mut current = "begin";
        let outcome = match self.deadline {
            Some(limit) => {
                match tokio::time::timeout(limit, run_plan(tx.as_mut(), kind, ids, &mut current))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(AppError::Internal(format!("deadline of {limit:?} exceeded"))),
                }
            }
            None => run_plan(tx.as_mut(), kind, ids, &mut current).await,
        };

        match outcome {
            Ok(steps) => {
                tx.commit().await.map_err(|e| AppError::Transaction {
                    step: "commit",
                    message: e.to_string(),
                })?;
                tracing::info!(
                    resource = kind.as_str(),
                    ids = %ids.joined(),
                    phase = CascadePhase::Committed.as_str(),
                    "cascade committed"
                );
                Ok(CascadeReport {
                    kind,
                    ids: ids.as_slice().to_vec(),
                    steps,
                })
            }
            Err(cause) => {
                if let Err(e) = tx.rollback().await {
                    tracing::error!(resource = kind.as_str(), error = %e, "rollback failed");
                }
                tracing::warn!(
                    resource = kind.as_str(),
                    step = current,
                    error = %cause,
                    phase = CascadePhase::RolledBack.as_str(),
                    "cascade rolled back"
                );
                Err(AppError::Transaction {
                    step: current,
                    message: cause.to_string(),
                })
            }
        }
    }
}

async fn run_plan(
    tx: &mut dyn CascadeTx,
    kind: ResourceKind,
    ids: &IdBatch,
    current: &mut &'static str,
) -> AppResult<Vec<StepCount>> {
    let plan = kind.plan();
    let mut steps = Vec::with_capacity(plan.len());
    for step in plan {
        *current = step.name;
        let rows = tx.delete(step, ids.as_slice()).await?;
        tracing::debug!(resource = kind.as_str(), step = step.name, rows);
        steps.push(StepCount {
            step: step.name.to_string(),
            rows,
        });
    }
    Ok(steps)
}
