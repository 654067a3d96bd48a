//! Quota ceilings, usage snapshots and the admission arithmetic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;
use crate::types::WorkspaceId;

/// Governed resource types subject to a per-workspace ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceType {
    Users,
    Segments,
    Journeys,
    Templates,
    StorageBytes,
    MessagesPerMonth,
}

impl ResourceType {
    pub const ALL: [ResourceType; 6] = [
        ResourceType::Users,
        ResourceType::Segments,
        ResourceType::Journeys,
        ResourceType::Templates,
        ResourceType::StorageBytes,
        ResourceType::MessagesPerMonth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Users => "users",
            ResourceType::Segments => "segments",
            ResourceType::Journeys => "journeys",
            ResourceType::Templates => "templates",
            ResourceType::StorageBytes => "storageBytes",
            ResourceType::MessagesPerMonth => "messagesPerMonth",
        }
    }

    /// Name of the ceiling field in quota payloads.
    pub fn limit_field(&self) -> &'static str {
        match self {
            ResourceType::Users => "maxUsers",
            ResourceType::Segments => "maxSegments",
            ResourceType::Journeys => "maxJourneys",
            ResourceType::Templates => "maxTemplates",
            ResourceType::StorageBytes => "maxStorageBytes",
            ResourceType::MessagesPerMonth => "maxMessagesPerMonth",
        }
    }

    /// Storage table holding the governed rows of this type.
    pub fn table(&self) -> &'static str {
        match self {
            ResourceType::Users => "workspace_members",
            ResourceType::Segments => "segments",
            ResourceType::Journeys => "journeys",
            ResourceType::Templates => "message_templates",
            ResourceType::StorageBytes => "stored_assets",
            ResourceType::MessagesPerMonth => "sent_messages",
        }
    }

    fn from_limit_field(field: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.limit_field() == field)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| AppError::Validation(vec![format!("resourceType: unknown `{s}`")]))
    }
}

/// Effective ceilings for one workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaLimits {
    pub max_users: i64,
    pub max_segments: i64,
    pub max_journeys: i64,
    pub max_templates: i64,
    pub max_storage_bytes: i64,
    pub max_messages_per_month: i64,
}

impl QuotaLimits {
    /// Ceilings applied to workspaces without an explicit quota row.
    pub const DEFAULT: QuotaLimits = QuotaLimits {
        max_users: 10,
        max_segments: 50,
        max_journeys: 20,
        max_templates: 100,
        max_storage_bytes: 10 * 1024 * 1024 * 1024,
        max_messages_per_month: 100_000,
    };

    pub fn limit_for(&self, resource: ResourceType) -> i64 {
        match resource {
            ResourceType::Users => self.max_users,
            ResourceType::Segments => self.max_segments,
            ResourceType::Journeys => self.max_journeys,
            ResourceType::Templates => self.max_templates,
            ResourceType::StorageBytes => self.max_storage_bytes,
            ResourceType::MessagesPerMonth => self.max_messages_per_month,
        }
    }

    fn slot_mut(&mut self, resource: ResourceType) -> &mut i64 {
        match resource {
            ResourceType::Users => &mut self.max_users,
            ResourceType::Segments => &mut self.max_segments,
            ResourceType::Journeys => &mut self.max_journeys,
            ResourceType::Templates => &mut self.max_templates,
            ResourceType::StorageBytes => &mut self.max_storage_bytes,
            ResourceType::MessagesPerMonth => &mut self.max_messages_per_month,
        }
    }
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Stored override row.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceQuota {
    pub workspace_id: WorkspaceId,
    pub max_users: i64,
    pub max_segments: i64,
    pub max_journeys: i64,
    pub max_templates: i64,
    pub max_storage_bytes: i64,
    pub max_messages_per_month: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkspaceQuota {
    pub fn limits(&self) -> QuotaLimits {
        QuotaLimits {
            max_users: self.max_users,
            max_segments: self.max_segments,
            max_journeys: self.max_journeys,
            max_templates: self.max_templates,
            max_storage_bytes: self.max_storage_bytes,
            max_messages_per_month: self.max_messages_per_month,
        }
    }
}

/// Partial ceiling update; unset fields keep their prior value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaOverrides {
    values: BTreeMap<ResourceType, i64>,
}

impl QuotaOverrides {
    pub fn set(mut self, resource: ResourceType, limit: i64) -> Self {
        self.values.insert(resource, limit);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parses `maxX` fields out of a JSON object. Keys listed in `passthrough`
    /// (for example `workspaceId`) are ignored; anything else is rejected.
    pub fn from_json(payload: &Value, passthrough: &[&str]) -> Result<Self, AppError> {
        let object = payload
            .as_object()
            .ok_or_else(|| AppError::Validation(vec!["body: expected an object".to_string()]))?;

        let mut overrides = QuotaOverrides::default();
        let mut errors = Vec::new();
        for (key, value) in object {
            if passthrough.contains(&key.as_str()) {
                continue;
            }
            let Some(resource) = ResourceType::from_limit_field(key) else {
                errors.push(format!("{key}: unknown quota field"));
                continue;
            };
            match value.as_i64() {
                Some(limit) => overrides.values.insert(resource, limit),
                None => {
                    errors.push(format!("{key}: must be an integer"));
                    continue;
                }
            };
        }

        if let Err(AppError::Validation(mut more)) = overrides.validate() {
            errors.append(&mut more);
        }
        if errors.is_empty() {
            Ok(overrides)
        } else {
            Err(AppError::Validation(errors))
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let errors: Vec<String> = self
            .values
            .iter()
            .filter(|(_, limit)| **limit < 0)
            .map(|(resource, _)| format!("{}: must not be negative", resource.limit_field()))
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(errors))
        }
    }

    pub fn apply_to(&self, base: QuotaLimits) -> QuotaLimits {
        let mut merged = base;
        for (resource, limit) in &self.values {
            *merged.slot_mut(*resource) = *limit;
        }
        merged
    }
}

/// Current count of every governed resource for one workspace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    pub users: i64,
    pub segments: i64,
    pub journeys: i64,
    pub templates: i64,
    pub storage_bytes: i64,
    pub messages_per_month: i64,
}

impl ResourceUsage {
    pub fn get(&self, resource: ResourceType) -> i64 {
        match resource {
            ResourceType::Users => self.users,
            ResourceType::Segments => self.segments,
            ResourceType::Journeys => self.journeys,
            ResourceType::Templates => self.templates,
            ResourceType::StorageBytes => self.storage_bytes,
            ResourceType::MessagesPerMonth => self.messages_per_month,
        }
    }

    pub fn set(&mut self, resource: ResourceType, value: i64) {
        let slot = match resource {
            ResourceType::Users => &mut self.users,
            ResourceType::Segments => &mut self.segments,
            ResourceType::Journeys => &mut self.journeys,
            ResourceType::Templates => &mut self.templates,
            ResourceType::StorageBytes => &mut self.storage_bytes,
            ResourceType::MessagesPerMonth => &mut self.messages_per_month,
        };
        *slot = value;
    }
}

/// Usage figures reported by a validation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaUsage {
    pub resource_type: ResourceType,
    pub current_usage: i64,
    pub limit: i64,
    pub remaining: i64,
    pub percent_used: i64,
}

/// Outcome of a quota validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed(QuotaUsage),
    Exceeded(QuotaUsage),
}

impl QuotaDecision {
    pub fn evaluate(resource: ResourceType, current: i64, limit: i64, increment: i64) -> Self {
        let projected = current.saturating_add(increment);
        let usage = QuotaUsage {
            resource_type: resource,
            current_usage: current,
            limit,
            remaining: limit.saturating_sub(projected).max(0),
            percent_used: percent_used(current, limit),
        };
        if projected <= limit {
            QuotaDecision::Allowed(usage)
        } else {
            QuotaDecision::Exceeded(usage)
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed(_))
    }

    pub fn usage(&self) -> &QuotaUsage {
        match self {
            QuotaDecision::Allowed(usage) | QuotaDecision::Exceeded(usage) => usage,
        }
    }

    /// Converts a rejection into the typed `QuotaExceeded` error.
    pub fn into_result(self) -> Result<QuotaUsage, AppError> {
        match self {
            QuotaDecision::Allowed(usage) => Ok(usage),
            QuotaDecision::Exceeded(usage) => Err(AppError::QuotaExceeded(usage)),
        }
    }
}

/// Integer percentage, floor-rounded. A zero ceiling reports 100.
pub fn percent_used(current: i64, limit: i64) -> i64 {
    if limit <= 0 {
        return 100;
    }
    current.max(0).saturating_mul(100) / limit
}

/// Quota, usage and per-resource percentages for one workspace.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaOverview {
    pub workspace_id: WorkspaceId,
    pub quota: QuotaLimits,
    pub usage: ResourceUsage,
    pub percentages: BTreeMap<String, i64>,
}

impl QuotaOverview {
    pub fn new(workspace_id: WorkspaceId, quota: QuotaLimits, usage: ResourceUsage) -> Self {
        let percentages = ResourceType::ALL
            .into_iter()
            .map(|r| {
                (
                    r.as_str().to_string(),
                    percent_used(usage.get(r), quota.limit_for(r)),
                )
            })
            .collect();
        Self {
            workspace_id,
            quota,
            usage,
            percentages,
        }
    }
}
