//! Announcement service
//!
//! Builds each user's feed from published announcements and their own
//! read/hidden receipts, and handles admin authoring.

use crate::db::repositories::AnnouncementRepository;
use crate::models::{
    Announcement, AnnouncementInput, AnnouncementStatus, FeedFilter, FeedItem, UserRole,
};
use crate::services::error::{require, FieldErrors, ServiceError};
use anyhow::Context;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

fn validate_announcement(input: &AnnouncementInput) -> FieldErrors {
    let mut errors = FieldErrors::new();
    require(&mut errors, "title", &input.title, "Title is required");
    require(&mut errors, "body", &input.body, "Body is required");
    errors
}

/// Urgent first, then most recently published
fn feed_order(a: &FeedItem, b: &FeedItem) -> std::cmp::Ordering {
    b.announcement
        .priority
        .rank()
        .cmp(&a.announcement.priority.rank())
        .then_with(|| b.announcement.published_at.cmp(&a.announcement.published_at))
        .then_with(|| b.announcement.id.cmp(&a.announcement.id))
}

/// Announcement service
pub struct AnnouncementService {
    repo: Arc<dyn AnnouncementRepository>,
}

impl AnnouncementService {
    pub fn new(repo: Arc<dyn AnnouncementRepository>) -> Self {
        Self { repo }
    }

    /// The feed for `user_id` viewing as `role`.
    ///
    /// Hidden items are left out unless `filter.include_hidden` is set.
    pub async fn feed(
        &self,
        user_id: i64,
        role: UserRole,
        filter: FeedFilter,
    ) -> Result<Vec<FeedItem>, ServiceError> {
        let now = Utc::now();
        let published = self
            .repo
            .list_published()
            .await
            .context("Failed to list announcements")?;
        let receipts: HashMap<i64, _> = self
            .repo
            .receipts_for_user(user_id)
            .await
            .context("Failed to load receipts")?
            .into_iter()
            .map(|r| (r.announcement_id, r))
            .collect();

        let mut items: Vec<FeedItem> = published
            .into_iter()
            .filter(|a| a.is_visible_to(role, now))
            .map(|a| {
                let receipt = receipts.get(&a.id);
                FeedItem::new(a, receipt)
            })
            .filter(|item| filter.include_hidden || !item.is_hidden)
            .filter(|item| !filter.unread_only || !item.is_read)
            .collect();

        items.sort_by(feed_order);
        Ok(items)
    }

    /// Unread, unhidden items in the user's feed
    pub async fn unread_count(&self, user_id: i64, role: UserRole) -> Result<usize, ServiceError> {
        let filter = FeedFilter {
            include_hidden: false,
            unread_only: true,
        };
        Ok(self.feed(user_id, role, filter).await?.len())
    }

    pub async fn mark_read(&self, user_id: i64, role: UserRole, id: i64) -> Result<(), ServiceError> {
        self.visible(role, id).await?;
        self.repo
            .mark_read(id, user_id, Utc::now())
            .await
            .context("Failed to mark announcement read")?;
        Ok(())
    }

    pub async fn set_hidden(
        &self,
        user_id: i64,
        role: UserRole,
        id: i64,
        hidden: bool,
    ) -> Result<(), ServiceError> {
        self.visible(role, id).await?;
        self.repo
            .set_hidden(id, user_id, hidden)
            .await
            .context("Failed to update hidden state")?;
        Ok(())
    }

    // ========================================================================
    // Admin
    // ========================================================================

    /// Every announcement including drafts and archived ones
    pub async fn list_all(&self) -> Result<Vec<Announcement>, ServiceError> {
        Ok(self.repo.list_all().await.context("Failed to list announcements")?)
    }

    pub async fn get(&self, id: i64) -> Result<Announcement, ServiceError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get announcement")?
            .ok_or(ServiceError::NotFound("Announcement"))
    }

    pub async fn create(
        &self,
        author_id: i64,
        input: AnnouncementInput,
    ) -> Result<Announcement, ServiceError> {
        ServiceError::check(validate_announcement(&input))?;
        let created = self
            .repo
            .create(&Announcement::from_input(author_id, input))
            .await
            .context("Failed to create announcement")?;
        tracing::info!("Announcement {} created ({})", created.id, created.status);
        Ok(created)
    }

    /// Replace content fields. `publish` on a draft publishes it.
    pub async fn update(&self, id: i64, input: AnnouncementInput) -> Result<Announcement, ServiceError> {
        ServiceError::check(validate_announcement(&input))?;
        let mut announcement = self.get(id).await?;

        announcement.title = input.title.trim().to_string();
        announcement.body = input.body.trim().to_string();
        if let Some(priority) = input.priority {
            announcement.priority = priority;
        }
        if let Some(recipients) = input.recipients {
            announcement.recipients = recipients;
        }
        announcement.expires_at = input.expires_at;
        if input.publish {
            mark_published(&mut announcement);
        }

        Ok(self
            .repo
            .update(&announcement)
            .await
            .context("Failed to update announcement")?)
    }

    /// Publish; `published_at` keeps its first value on republish
    pub async fn publish(&self, id: i64) -> Result<Announcement, ServiceError> {
        let mut announcement = self.get(id).await?;
        mark_published(&mut announcement);
        Ok(self
            .repo
            .update(&announcement)
            .await
            .context("Failed to publish announcement")?)
    }

    pub async fn archive(&self, id: i64) -> Result<Announcement, ServiceError> {
        let mut announcement = self.get(id).await?;
        announcement.status = AnnouncementStatus::Archived;
        Ok(self
            .repo
            .update(&announcement)
            .await
            .context("Failed to archive announcement")?)
    }

    pub async fn delete(&self, id: i64) -> Result<(), ServiceError> {
        self.get(id).await?;
        self.repo
            .delete(id)
            .await
            .context("Failed to delete announcement")?;
        Ok(())
    }

    pub async fn count_published(&self) -> Result<i64, ServiceError> {
        Ok(self
            .repo
            .count_published()
            .await
            .context("Failed to count announcements")?)
    }

    /// Announcements a user cannot see read as not found
    async fn visible(&self, role: UserRole, id: i64) -> Result<Announcement, ServiceError> {
        let announcement = self.get(id).await?;
        if announcement.is_visible_to(role, Utc::now()) {
            Ok(announcement)
        } else {
            Err(ServiceError::NotFound("Announcement"))
        }
    }
}

fn mark_published(announcement: &mut Announcement) {
    announcement.status = AnnouncementStatus::Published;
    if announcement.published_at.is_none() {
        announcement.published_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{seed_user, setup_pool};
    use crate::db::repositories::SqlxAnnouncementRepository;
    use crate::models::{AnnouncementPriority, Recipients};
    use chrono::Duration;

    async fn setup() -> (AnnouncementService, i64, i64) {
        let pool = setup_pool().await;
        let admin = seed_user(&pool, "admin@example.com").await;
        let guardian = seed_user(&pool, "g@example.com").await;
        (
            AnnouncementService::new(SqlxAnnouncementRepository::boxed(pool)),
            admin,
            guardian,
        )
    }

    fn input(title: &str, priority: AnnouncementPriority, recipients: Recipients) -> AnnouncementInput {
        AnnouncementInput {
            title: title.to_string(),
            body: format!("{} details", title),
            priority: Some(priority),
            recipients: Some(recipients),
            expires_at: None,
            publish: true,
        }
    }

    fn titles(items: &[FeedItem]) -> Vec<&str> {
        items.iter().map(|i| i.announcement.title.as_str()).collect()
    }

    #[tokio::test]
    async fn test_feed_filters_by_audience_and_state() {
        let (service, admin, guardian) = setup().await;
        service
            .create(admin, input("Parents night", AnnouncementPriority::Normal, Recipients::Guardians))
            .await
            .unwrap();
        service
            .create(admin, input("Staff meeting", AnnouncementPriority::Normal, Recipients::Instructors))
            .await
            .unwrap();
        service
            .create(
                admin,
                AnnouncementInput {
                    publish: false,
                    ..input("Draft", AnnouncementPriority::Normal, Recipients::All)
                },
            )
            .await
            .unwrap();
        service
            .create(
                admin,
                AnnouncementInput {
                    expires_at: Some(Utc::now() - Duration::hours(1)),
                    ..input("Old news", AnnouncementPriority::Normal, Recipients::All)
                },
            )
            .await
            .unwrap();

        let guardian_feed = service
            .feed(guardian, UserRole::Guardian, FeedFilter::default())
            .await
            .unwrap();
        assert_eq!(titles(&guardian_feed), vec!["Parents night"]);

        let admin_feed = service
            .feed(admin, UserRole::Admin, FeedFilter::default())
            .await
            .unwrap();
        assert_eq!(admin_feed.len(), 2);
    }

    #[tokio::test]
    async fn test_feed_orders_urgent_first_then_newest() {
        let (service, admin, guardian) = setup().await;
        for (title, priority) in [
            ("first normal", AnnouncementPriority::Normal),
            ("urgent", AnnouncementPriority::Urgent),
            ("second normal", AnnouncementPriority::Normal),
            ("low", AnnouncementPriority::Low),
        ] {
            service
                .create(admin, input(title, priority, Recipients::All))
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let feed = service
            .feed(guardian, UserRole::Guardian, FeedFilter::default())
            .await
            .unwrap();
        assert_eq!(
            titles(&feed),
            vec!["urgent", "second normal", "first normal", "low"]
        );
    }

    #[tokio::test]
    async fn test_read_hide_unhide() {
        let (service, admin, guardian) = setup().await;
        let a = service
            .create(admin, input("Snow day", AnnouncementPriority::High, Recipients::All))
            .await
            .unwrap();
        service
            .create(admin, input("Picture day", AnnouncementPriority::Normal, Recipients::All))
            .await
            .unwrap();
        assert_eq!(service.unread_count(guardian, UserRole::Guardian).await.unwrap(), 2);

        service.mark_read(guardian, UserRole::Guardian, a.id).await.unwrap();
        service.mark_read(guardian, UserRole::Guardian, a.id).await.unwrap();
        assert_eq!(service.unread_count(guardian, UserRole::Guardian).await.unwrap(), 1);

        service
            .set_hidden(guardian, UserRole::Guardian, a.id, true)
            .await
            .unwrap();
        let feed = service
            .feed(guardian, UserRole::Guardian, FeedFilter::default())
            .await
            .unwrap();
        assert_eq!(titles(&feed), vec!["Picture day"]);

        let with_hidden = service
            .feed(
                guardian,
                UserRole::Guardian,
                FeedFilter {
                    include_hidden: true,
                    unread_only: false,
                },
            )
            .await
            .unwrap();
        let snow = with_hidden.iter().find(|i| i.announcement.id == a.id).unwrap();
        assert!(snow.is_hidden && snow.is_read);

        service
            .set_hidden(guardian, UserRole::Guardian, a.id, false)
            .await
            .unwrap();
        let feed = service
            .feed(guardian, UserRole::Guardian, FeedFilter::default())
            .await
            .unwrap();
        assert_eq!(feed.len(), 2);
    }

    #[tokio::test]
    async fn test_cannot_touch_invisible_announcement() {
        let (service, admin, guardian) = setup().await;
        let staff = service
            .create(admin, input("Staff only", AnnouncementPriority::Normal, Recipients::Instructors))
            .await
            .unwrap();

        assert!(matches!(
            service.mark_read(guardian, UserRole::Guardian, staff.id).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_admin_lifecycle() {
        let (service, admin, guardian) = setup().await;
        let draft = service
            .create(
                admin,
                AnnouncementInput {
                    publish: false,
                    ..input("Camp", AnnouncementPriority::Normal, Recipients::All)
                },
            )
            .await
            .unwrap();
        assert_eq!(draft.status, AnnouncementStatus::Draft);
        assert!(draft.published_at.is_none());

        let published = service.publish(draft.id).await.unwrap();
        assert_eq!(published.status, AnnouncementStatus::Published);
        assert!(published.published_at.is_some());
        assert_eq!(service.count_published().await.unwrap(), 1);

        let archived = service.archive(draft.id).await.unwrap();
        assert_eq!(archived.status, AnnouncementStatus::Archived);
        assert!(service
            .feed(guardian, UserRole::Guardian, FeedFilter::default())
            .await
            .unwrap()
            .is_empty());
        assert_eq!(service.list_all().await.unwrap().len(), 1);

        let blank = service
            .update(draft.id, input(" ", AnnouncementPriority::Normal, Recipients::All))
            .await;
        assert!(matches!(blank, Err(ServiceError::InvalidFields(_))));

        service.delete(draft.id).await.unwrap();
        assert!(matches!(service.get(draft.id).await, Err(ServiceError::NotFound(_))));
    }
}
