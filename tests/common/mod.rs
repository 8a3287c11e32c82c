#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use fluent_admin::{
    AppConfig, AppState, FixedClock, MemoryStore,
    auth::AuthUser,
    error::AppResult,
    memory::row,
    models::{CleanReport, Comment, PageWindow, Post, Role, Room},
    repository::ContentRepository,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "test-secret-value-1234567890";

// --- Mock content repository ---

/// Rooms and comments kept in memory for the single-row moderation handlers.
#[derive(Default)]
pub struct MockContentRepo {
    pub posts: Mutex<Vec<Post>>,
    pub rooms: Mutex<Vec<Room>>,
    pub comments: Mutex<Vec<Comment>>,
    pub clean_report: CleanReport,
}

fn page<T: Clone>(items: &[T], window: PageWindow) -> (Vec<T>, i64) {
    let slice = items
        .iter()
        .skip(window.offset() as usize)
        .take(window.page_size as usize)
        .cloned()
        .collect();
    (slice, items.len() as i64)
}

#[async_trait]
impl ContentRepository for MockContentRepo {
    async fn list_posts(&self, window: PageWindow, keyword: Option<&str>) -> AppResult<(Vec<Post>, i64)> {
        let posts = self.posts.lock().await;
        let matched: Vec<Post> = posts
            .iter()
            .filter(|p| keyword.is_none_or(|k| p.content.contains(k) || p.tag.contains(k)))
            .cloned()
            .collect();
        Ok(page(&matched, window))
    }
    async fn get_post(&self, id: Uuid) -> AppResult<Option<Post>> {
        Ok(self.posts.lock().await.iter().find(|p| p.id == id).cloned())
    }
    async fn list_rooms(&self, window: PageWindow, _keyword: Option<&str>) -> AppResult<(Vec<Room>, i64)> {
        Ok(page(&self.rooms.lock().await, window))
    }
    async fn get_room(&self, id: Uuid) -> AppResult<Option<Room>> {
        Ok(self.rooms.lock().await.iter().find(|r| r.id == id).cloned())
    }
    async fn toggle_room(&self, id: Uuid) -> AppResult<Option<Room>> {
        let mut rooms = self.rooms.lock().await;
        Ok(rooms.iter_mut().find(|r| r.id == id).map(|room| {
            room.is_active = !room.is_active;
            room.clone()
        }))
    }
    async fn list_comments(&self, window: PageWindow, _keyword: Option<&str>) -> AppResult<(Vec<Comment>, i64)> {
        Ok(page(&self.comments.lock().await, window))
    }
    async fn update_comment(&self, id: Uuid, content: &str) -> AppResult<Option<Comment>> {
        let mut comments = self.comments.lock().await;
        Ok(comments.iter_mut().find(|c| c.id == id).map(|comment| {
            comment.content = content.to_string();
            comment.clone()
        }))
    }
    async fn clean_tongue_twisters(&self) -> AppResult<CleanReport> {
        Ok(self.clean_report.clone())
    }
}

pub fn sample_post(id: Uuid, content: &str) -> Post {
    Post {
        id,
        user_id: Uuid::from_u128(900),
        content: content.to_string(),
        tag: "daily".to_string(),
        likes_count: 0,
        comments_count: 0,
        created_at: Utc::now(),
    }
}

pub fn sample_room(id: Uuid, is_active: bool) -> Room {
    Room {
        id,
        user_id: Uuid::from_u128(900),
        title: "Morning reading".to_string(),
        theme: "reading".to_string(),
        room_type: "voice".to_string(),
        max_members: 8,
        current_members: 2,
        is_active,
        created_at: Utc::now(),
    }
}

pub fn sample_comment(id: Uuid, post_id: Uuid, content: &str) -> Comment {
    Comment {
        id,
        post_id,
        user_id: Uuid::from_u128(900),
        content: content.to_string(),
        likes_count: 0,
        created_at: Utc::now(),
    }
}

// --- App state ---

pub struct TestApp {
    pub state: AppState,
    pub store: MemoryStore,
    pub content: Arc<MockContentRepo>,
    pub clock: FixedClock,
}

pub fn test_config() -> AppConfig {
    AppConfig {
        jwt_secret: TEST_JWT_SECRET.to_string(),
        ..AppConfig::default()
    }
}

pub fn test_app() -> TestApp {
    test_app_with(MockContentRepo::default())
}

pub fn test_app_with(content: MockContentRepo) -> TestApp {
    let store = MemoryStore::new();
    let content = Arc::new(content);
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap());
    let state = AppState::new(
        test_config(),
        Arc::new(store.clone()),
        content.clone(),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(clock.clone()),
    );
    TestApp {
        state,
        store,
        content,
        clock,
    }
}

pub fn actor(role: Role) -> AuthUser {
    AuthUser {
        id: Uuid::from_u128(42),
        username: format!("{role}-operator"),
        role,
    }
}

// --- Post aggregate fixture ---

/// Ids of one post with two comments, a like on each comment, a post like and a collection.
pub struct PostFixture {
    pub post: Uuid,
    pub comments: [Uuid; 2],
    pub comment_likes: [Uuid; 2],
    pub post_like: Uuid,
    pub collection: Uuid,
}

pub async fn seed_post(store: &MemoryStore, seed: u128) -> PostFixture {
    let id = |n: u128| Uuid::from_u128(seed * 100 + n);
    let fixture = PostFixture {
        post: id(1),
        comments: [id(2), id(3)],
        comment_likes: [id(4), id(5)],
        post_like: id(6),
        collection: id(7),
    };

    store.insert("posts", row(&[("id", fixture.post)])).await;
    for (comment, like) in fixture.comments.iter().zip(fixture.comment_likes) {
        store
            .insert("comments", row(&[("id", *comment), ("post_id", fixture.post)]))
            .await;
        store
            .insert("comment_likes", row(&[("id", like), ("comment_id", *comment)]))
            .await;
    }
    store
        .insert("post_likes", row(&[("id", fixture.post_like), ("post_id", fixture.post)]))
        .await;
    store
        .insert(
            "post_collections",
            row(&[("id", fixture.collection), ("post_id", fixture.post)]),
        )
        .await;
    fixture
}
