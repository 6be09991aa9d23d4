//! Announcement model
//!
//! This module provides:
//! - `Announcement` entity with priority, status and recipient audience
//! - `AnnouncementReceipt` holding a user's read/hidden state
//! - `FeedItem`, an announcement as seen by one user

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::UserRole;

/// Announcement entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Announcement {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub priority: AnnouncementPriority,
    pub status: AnnouncementStatus,
    pub recipients: Recipients,
    pub author_id: Option<i64>,
    /// Set when the announcement is first published
    pub published_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Announcement {
    pub fn from_input(author_id: i64, input: AnnouncementInput) -> Self {
        let now = Utc::now();
        let status = if input.publish {
            AnnouncementStatus::Published
        } else {
            AnnouncementStatus::Draft
        };
        Self {
            id: 0,
            title: input.title.trim().to_string(),
            body: input.body.trim().to_string(),
            priority: input.priority.unwrap_or_default(),
            status,
            recipients: input.recipients.unwrap_or_default(),
            author_id: Some(author_id),
            published_at: input.publish.then_some(now),
            expires_at: input.expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Whether a user with `role` should see this in their feed at `now`
    pub fn is_visible_to(&self, role: UserRole, now: DateTime<Utc>) -> bool {
        self.status == AnnouncementStatus::Published
            && !self.is_expired_at(now)
            && self.recipients.includes(role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnnouncementPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl AnnouncementPriority {
    /// Sort weight; higher sorts first in the feed
    pub fn rank(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Urgent => 3,
        }
    }
}

impl fmt::Display for AnnouncementPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

impl FromStr for AnnouncementPriority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(anyhow::anyhow!("Invalid announcement priority: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnnouncementStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl fmt::Display for AnnouncementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Published => write!(f, "published"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl FromStr for AnnouncementStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            "archived" => Ok(Self::Archived),
            _ => Err(anyhow::anyhow!("Invalid announcement status: {}", s)),
        }
    }
}

/// Audience of an announcement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Recipients {
    #[default]
    All,
    Guardians,
    Instructors,
}

impl Recipients {
    /// Admins see every audience
    pub fn includes(&self, role: UserRole) -> bool {
        match (self, role) {
            (_, UserRole::Admin) => true,
            (Self::All, _) => true,
            (Self::Guardians, UserRole::Guardian) => true,
            (Self::Instructors, UserRole::Instructor) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Recipients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Guardians => write!(f, "guardians"),
            Self::Instructors => write!(f, "instructors"),
        }
    }
}

impl FromStr for Recipients {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "guardians" => Ok(Self::Guardians),
            "instructors" => Ok(Self::Instructors),
            _ => Err(anyhow::anyhow!("Invalid recipients: {}", s)),
        }
    }
}

/// Per-user read/hidden marker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnouncementReceipt {
    pub announcement_id: i64,
    pub user_id: i64,
    pub read_at: Option<DateTime<Utc>>,
    pub hidden: bool,
}

/// Announcement plus the viewing user's receipt state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedItem {
    #[serde(flatten)]
    pub announcement: Announcement,
    pub is_read: bool,
    pub is_hidden: bool,
}

impl FeedItem {
    pub fn new(announcement: Announcement, receipt: Option<&AnnouncementReceipt>) -> Self {
        Self {
            announcement,
            is_read: receipt.is_some_and(|r| r.read_at.is_some()),
            is_hidden: receipt.is_some_and(|r| r.hidden),
        }
    }
}

/// Feed query options
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct FeedFilter {
    #[serde(default)]
    pub include_hidden: bool,
    #[serde(default)]
    pub unread_only: bool,
}

/// Fields for creating or updating an announcement
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnnouncementInput {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub priority: Option<AnnouncementPriority>,
    #[serde(default)]
    pub recipients: Option<Recipients>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Publish immediately instead of saving a draft
    #[serde(default)]
    pub publish: bool,
}
