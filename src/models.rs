use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{cmp::Ordering, fmt, str::FromStr};
use thiserror::Error;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

/// Raised when a stored or presented enum value is outside its closed set.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {field} value '{value}'")]
pub struct UnknownVariant {
    pub field: &'static str,
    pub value: String,
}

// --- Roles ---

/// Role
///
/// The closed set of identity roles. The order is explicit (see `rank`) and total:
/// `user < admin < super_admin`. Unknown strings are rejected at deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum Role {
    User,
    Admin,
    SuperAdmin,
}

impl Role {
    /// Roles allowed through the admin login surface.
    pub const ADMINISTRATIVE: [Role; 2] = [Role::Admin, Role::SuperAdmin];

    /// The lowest role accepted on any admin endpoint.
    pub const LOWEST_ADMINISTRATIVE: Role = Role::Admin;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
            Self::SuperAdmin => "super_admin",
        }
    }

    /// Order table. Higher rank satisfies every requirement of a lower one.
    pub fn rank(&self) -> u8 {
        match self {
            Self::User => 0,
            Self::Admin => 1,
            Self::SuperAdmin => 2,
        }
    }

    pub fn is_administrative(&self) -> bool {
        Self::ADMINISTRATIVE.contains(self)
    }
}

impl Ord for Role {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for Role {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            "super_admin" => Ok(Self::SuperAdmin),
            other => Err(UnknownVariant {
                field: "role",
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// UserStatus
///
/// Stored as an integer column (`0` disabled, `1` enabled).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum UserStatus {
    Disabled,
    #[default]
    Enabled,
}

impl UserStatus {
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::Disabled => 0,
            Self::Enabled => 1,
        }
    }
}

impl TryFrom<i32> for UserStatus {
    type Error = UnknownVariant;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Disabled),
            1 => Ok(Self::Enabled),
            other => Err(UnknownVariant {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

// --- Identity ---

/// Identity
///
/// A row of the `users` table. `username` is unique. The password hash is loaded
/// for credential checks only and is never serialized.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(skip)]
    #[ts(skip)]
    pub password_hash: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    #[sqlx(try_from = "i32")]
    pub status: UserStatus,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
    #[ts(type = "string | null")]
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Insert payload used by the repository. The hash is computed before this is built.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub username: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password_hash: String,
    pub role: Role,
    pub status: UserStatus,
}

/// Partial update for an identity. `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct IdentityChanges {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
}

// --- Audit ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum AuditOutcome {
    Success,
    Failure,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl TryFrom<String> for AuditOutcome {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            _ => Err(UnknownVariant {
                field: "outcome",
                value,
            }),
        }
    }
}

/// AuditRecord
///
/// One append-only line of the `operation_logs` table.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct AuditRecord {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub actor_username: String,
    #[sqlx(try_from = "String")]
    pub actor_role: Role,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub detail: String,
    #[sqlx(try_from = "String")]
    pub outcome: AuditOutcome,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// Audit line before persistence; the sink assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditRecord {
    pub actor_id: Uuid,
    pub actor_username: String,
    pub actor_role: Role,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub detail: String,
    pub outcome: AuditOutcome,
}

// --- Moderated content ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct Post {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub tag: String,
    pub likes_count: i32,
    pub comments_count: i32,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// Room
///
/// A practice room. `type` is a reserved keyword in Rust, so the column is renamed.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct Room {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub theme: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub room_type: String,
    pub max_members: i32,
    pub current_members: i32,
    pub is_active: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub likes_count: i32,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

// --- Request Payloads ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
}

/// BatchDeleteRequest
///
/// Body of every `delete-batch` endpoint. A missing or empty `ids` list is a
/// validation error, checked before any transaction is opened.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct BatchDeleteRequest {
    #[serde(default)]
    pub ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct BatchDeleteResponse {
    pub resource: String,
    pub ids: Vec<Uuid>,
    /// Rows removed per cascade step, in execution order.
    pub steps: Vec<StepCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct StepCount {
    pub step: String,
    pub rows: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateUserRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<UserStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateCommentRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq, Eq)]
#[ts(export)]
pub struct CleanReport {
    pub deleted_blank_count: u64,
    pub deleted_duplicate_count: u64,
}

// --- Listing ---

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// ListQuery
///
/// Query parameters shared by the paginated listing endpoints.
#[derive(Debug, Clone, Deserialize, Default, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub keyword: Option<String>,
}

/// A normalized page request: 1-based page, bounded size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: i64,
    pub page_size: i64,
}

impl PageWindow {
    pub fn new(page: Option<i64>, page_size: Option<i64>) -> Self {
        let page = page.filter(|p| *p >= 1).unwrap_or(1);
        let page_size = page_size
            .filter(|s| *s >= 1)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE);
        Self { page, page_size }
    }

    /// Rows to skip. Saturates for absurd page numbers, which then just yield an empty page.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

impl ListQuery {
    pub fn window(&self) -> PageWindow {
        PageWindow::new(self.page, self.page_size)
    }

    /// The keyword with surrounding whitespace removed; blank means no filter.
    pub fn keyword(&self) -> Option<&str> {
        self.keyword.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}

/// Filters for the operation-log listing.
#[derive(Debug, Clone, Deserialize, Default, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditLogQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub action: Option<String>,
    pub resource: Option<String>,
    pub status: Option<String>,
    pub username: Option<String>,
}

impl AuditLogQuery {
    pub fn window(&self) -> PageWindow {
        PageWindow::new(self.page, self.page_size)
    }
}

/// One page of a listing plus the unpaged total.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, window: PageWindow) -> Self {
        Self {
            items,
            total,
            page: window.page,
            page_size: window.page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_order_is_total_and_monotonic() {
        let all = [Role::User, Role::Admin, Role::SuperAdmin];
        for (i, a) in all.iter().enumerate() {
            for (j, b) in all.iter().enumerate() {
                assert_eq!(a.cmp(b), i.cmp(&j));
            }
        }
        assert!(Role::SuperAdmin > Role::Admin);
        assert!(Role::Admin > Role::User);
    }

    #[test]
    fn unknown_role_is_rejected_at_deserialization() {
        let parsed: Result<Role, _> = serde_json::from_str("\"root\"");
        assert!(parsed.is_err());
        let ok: Role = serde_json::from_str("\"super_admin\"").unwrap();
        assert_eq!(ok, Role::SuperAdmin);
        assert!("superadmin".parse::<Role>().is_err());
    }

    #[test]
    fn only_admin_roles_are_administrative() {
        assert!(!Role::User.is_administrative());
        assert!(Role::Admin.is_administrative());
        assert!(Role::SuperAdmin.is_administrative());
    }

    #[test]
    fn page_window_defaults_and_caps() {
        let w = PageWindow::new(None, None);
        assert_eq!((w.page, w.page_size, w.offset()), (1, 20, 0));

        let w = PageWindow::new(Some(3), Some(500));
        assert_eq!((w.page, w.page_size, w.offset()), (3, 100, 200));

        let w = PageWindow::new(Some(0), Some(-5));
        assert_eq!((w.page, w.page_size), (1, 20));

        let w = PageWindow::new(Some(i64::MAX), Some(20));
        assert_eq!(w.offset(), i64::MAX);
    }

    #[test]
    fn identity_serialization_never_contains_hash() {
        let identity = Identity {
            id: Uuid::nil(),
            username: "admin".to_string(),
            email: None,
            phone: None,
            password_hash: "$argon2id$secret".to_string(),
            role: Role::SuperAdmin,
            status: UserStatus::Enabled,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_login_at: None,
        };
        let json = serde_json::to_string(&identity).unwrap();
        assert!(!json.contains("argon2"));
        assert!(!json.contains("password"));
    }
}
