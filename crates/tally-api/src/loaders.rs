//! Request-scoped batch loading for feed rendering.
//!
//! Every `load_one` issued while a response is being built is queued for a
//! short window, then served by a single bulk query per loader. Results are
//! cached for the rest of the request only; a fresh [`RequestLoaders`] is
//! built for every request, so votes cast between requests are never stale.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_graphql::dataloader::{DataLoader, HashMapCache, Loader};
use futures_util::future::try_join_all;
use tracing::debug;
use uuid::Uuid;

use tally_types::TallyError;
use tally_types::api::{Author, PostView};
use tally_types::models::{Post, TextSnippet, VoteStatus};

use crate::state::{AppState, with_db};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VoteKey {
    pub voter_id: Uuid,
    pub post_id: i64,
}

/// Resolves (voter, post) pairs to up/down/none in one query per batch.
pub struct VoteStatusLoader {
    state: AppState,
    batches: AtomicUsize,
}

impl VoteStatusLoader {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            batches: AtomicUsize::new(0),
        }
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Loader<VoteKey> for VoteStatusLoader {
    type Value = VoteStatus;
    type Error = TallyError;

    async fn load(&self, keys: &[VoteKey]) -> Result<HashMap<VoteKey, Self::Value>, Self::Error> {
        self.batches.fetch_add(1, Ordering::Relaxed);

        let pairs: Vec<(String, i64)> = keys
            .iter()
            .map(|k| (k.voter_id.to_string(), k.post_id))
            .collect();
        let found = with_db(&self.state, move |db| db.vote_values_for(&pairs)).await?;
        debug!(keys = keys.len(), votes = found.len(), "vote status batch");

        // Every requested pair gets an answer; no row means no vote.
        Ok(keys
            .iter()
            .map(|k| {
                let value = found.get(&(k.voter_id.to_string(), k.post_id)).copied();
                (k.clone(), VoteStatus::from(value))
            })
            .collect())
    }
}

/// Resolves author ids to public user records in one query per batch.
/// Ids with no user row resolve to `None`, which is cached like any hit.
pub struct AuthorLoader {
    state: AppState,
    batches: AtomicUsize,
}

impl AuthorLoader {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            batches: AtomicUsize::new(0),
        }
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Loader<Uuid> for AuthorLoader {
    type Value = Option<Author>;
    type Error = TallyError;

    async fn load(&self, keys: &[Uuid]) -> Result<HashMap<Uuid, Self::Value>, Self::Error> {
        self.batches.fetch_add(1, Ordering::Relaxed);

        let ids: Vec<String> = keys.iter().map(Uuid::to_string).collect();
        let rows = with_db(&self.state, move |db| db.users_by_ids(&ids)).await?;
        debug!(keys = keys.len(), found = rows.len(), "author batch");

        let mut authors: HashMap<Uuid, Self::Value> = keys.iter().map(|id| (*id, None)).collect();
        for row in rows {
            let user = row.into_user();
            authors.insert(
                user.id,
                Some(Author {
                    id: user.id,
                    username: user.username,
                }),
            );
        }
        Ok(authors)
    }
}

/// The loaders for one inbound request, bound to the request's viewer.
pub struct RequestLoaders {
    viewer: Option<Uuid>,
    votes: DataLoader<VoteStatusLoader, HashMapCache>,
    authors: DataLoader<AuthorLoader, HashMapCache>,
}

impl RequestLoaders {
    pub fn new(state: &AppState, viewer: Option<Uuid>) -> Self {
        Self {
            viewer,
            votes: DataLoader::with_cache(
                VoteStatusLoader::new(state.clone()),
                tokio::task::spawn,
                HashMapCache::default(),
            ),
            authors: DataLoader::with_cache(
                AuthorLoader::new(state.clone()),
                tokio::task::spawn,
                HashMapCache::default(),
            ),
        }
    }

    /// Anonymous viewers have no votes; no lookup is issued for them.
    pub async fn vote_status(&self, post_id: i64) -> Result<VoteStatus, TallyError> {
        let Some(voter_id) = self.viewer else {
            return Ok(VoteStatus::None);
        };
        let status = self.votes.load_one(VoteKey { voter_id, post_id }).await?;
        Ok(status.unwrap_or_default())
    }

    pub async fn author(&self, author_id: Uuid) -> Result<Option<Author>, TallyError> {
        Ok(self.authors.load_one(author_id).await?.flatten())
    }

    pub async fn render(&self, post: Post) -> Result<PostView, TallyError> {
        let (vote_status, author) =
            futures_util::try_join!(self.vote_status(post.id), self.author(post.author_id))?;

        Ok(PostView {
            text_snippet: TextSnippet::of(&post.body),
            post,
            vote_status,
            author,
        })
    }

    /// Render posts concurrently so their lookups land in the same batch.
    /// Output order matches input order.
    pub async fn render_all(&self, posts: Vec<Post>) -> Result<Vec<PostView>, TallyError> {
        try_join_all(posts.into_iter().map(|post| self.render(post))).await
    }

    /// Bulk fetches issued so far as (vote status, author).
    pub fn batches_issued(&self) -> (usize, usize) {
        (self.votes.loader().batches(), self.authors.loader().batches())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_util::future::join_all;
    use tally_db::Database;
    use tempfile::TempDir;

    use super::*;
    use crate::state::AppStateInner;

    struct Fixture {
        state: AppState,
        author: Uuid,
        voter: Uuid,
        posts: Vec<i64>,
        _dir: TempDir,
    }

    fn user(db: &Database, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(&id.to_string(), name, "hash").unwrap();
        id
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("tally.db")).unwrap();
        let author = user(&db, "author");
        let voter = user(&db, "voter");

        let posts: Vec<i64> = (0..3)
            .map(|i| db.insert_post(&author.to_string(), &format!("p{}", i), "body").unwrap().id)
            .collect();
        db.apply_vote(&voter.to_string(), posts[0], 1).unwrap();
        db.apply_vote(&voter.to_string(), posts[1], -1).unwrap();

        let state = Arc::new(AppStateInner {
            db,
            jwt_secret: "test-secret".into(),
        });
        Fixture {
            state,
            author,
            voter,
            posts,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn duplicate_lookups_share_one_fetch() {
        let fx = fixture();
        let loaders = RequestLoaders::new(&fx.state, Some(fx.voter));

        // 30 lookups over 3 distinct posts, issued in one pass.
        let lookups = (0..30).map(|i| loaders.vote_status(fx.posts[i % 3]));
        let statuses: Vec<VoteStatus> = join_all(lookups)
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(loaders.batches_issued().0, 1);
        assert_eq!(statuses[0], VoteStatus::Up);
        assert_eq!(statuses[1], VoteStatus::Down);
        assert_eq!(statuses[2], VoteStatus::None);
        assert_eq!(statuses[3], VoteStatus::Up);

        // Later passes in the same request are served from the request cache.
        assert_eq!(loaders.vote_status(fx.posts[1]).await.unwrap(), VoteStatus::Down);
        assert_eq!(loaders.batches_issued().0, 1);
    }

    #[tokio::test]
    async fn missing_author_does_not_fail_siblings() {
        let fx = fixture();
        let loaders = RequestLoaders::new(&fx.state, None);
        let ghost = Uuid::new_v4();

        let (found, missing) = futures_util::join!(loaders.author(fx.author), loaders.author(ghost));

        assert_eq!(found.unwrap().unwrap().username, "author");
        assert_eq!(missing.unwrap(), None);
        assert_eq!(loaders.batches_issued().1, 1);

        // A second pass asking for the same missing id is served from cache.
        assert_eq!(loaders.author(ghost).await.unwrap(), None);
        assert_eq!(loaders.batches_issued().1, 1);
    }

    #[tokio::test]
    async fn anonymous_viewer_skips_vote_lookups() {
        let fx = fixture();
        let loaders = RequestLoaders::new(&fx.state, None);

        let status = loaders.vote_status(fx.posts[0]).await.unwrap();
        assert_eq!(status, VoteStatus::None);
        assert_eq!(loaders.batches_issued(), (0, 0));
    }

    #[tokio::test]
    async fn render_all_keeps_order_and_batches_once() {
        let fx = fixture();
        let loaders = RequestLoaders::new(&fx.state, Some(fx.voter));

        let posts: Vec<Post> = fx
            .posts
            .iter()
            .rev()
            .map(|id| fx.state.db.get_post(*id).unwrap().unwrap().into_post())
            .collect();
        let views = loaders.render_all(posts).await.unwrap();

        let ids: Vec<i64> = views.iter().map(|v| v.post.id).collect();
        assert_eq!(ids, vec![fx.posts[2], fx.posts[1], fx.posts[0]]);
        assert_eq!(views[0].vote_status, VoteStatus::None);
        assert_eq!(views[1].vote_status, VoteStatus::Down);
        assert_eq!(views[2].vote_status, VoteStatus::Up);
        assert!(views.iter().all(|v| v.author.as_ref().map(|a| a.id) == Some(fx.author)));
        assert_eq!(loaders.batches_issued(), (1, 1));
    }

    #[tokio::test]
    async fn fresh_loaders_see_new_votes() {
        let fx = fixture();
        let first = RequestLoaders::new(&fx.state, Some(fx.voter));
        assert_eq!(first.vote_status(fx.posts[2]).await.unwrap(), VoteStatus::None);

        fx.state
            .db
            .apply_vote(&fx.voter.to_string(), fx.posts[2], 1)
            .unwrap();

        let second = RequestLoaders::new(&fx.state, Some(fx.voter));
        assert_eq!(second.vote_status(fx.posts[2]).await.unwrap(), VoteStatus::Up);
    }
}
