//! Follower Directory: read-through view over the follower-graph provider.

pub mod credential;
pub mod ratelimit;

use std::{collections::HashSet, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
    domain::TwitchId,
    errors::Error,
    ports::{FollowEdge, FollowPage, FollowQuery, FollowerProvider},
    Result,
};

use credential::CredentialCell;

pub struct FollowerDirectory {
    provider: Arc<dyn FollowerProvider>,
    credential: CredentialCell,
    broadcaster: TwitchId,
}

impl FollowerDirectory {
    pub fn new(provider: Arc<dyn FollowerProvider>, broadcaster: TwitchId) -> Self {
        Self {
            provider,
            credential: CredentialCell::new(),
            broadcaster,
        }
    }

    /// Resolve the channel login to its broadcaster id and build the directory.
    pub async fn connect(provider: Arc<dyn FollowerProvider>, channel_login: &str) -> Result<Self> {
        let credential = CredentialCell::new();
        let token = credential.ensure_fresh(provider.as_ref()).await?;
        let channel = provider
            .lookup_login(&token, channel_login)
            .await?
            .ok_or_else(|| Error::Config(format!("twitch channel {channel_login} not found")))?;

        info!(
            channel = channel_login,
            broadcaster_id = channel.id.0,
            "resolved twitch channel"
        );

        Ok(Self {
            provider,
            credential,
            broadcaster: channel.id,
        })
    }

    pub fn broadcaster(&self) -> TwitchId {
        self.broadcaster
    }

    /// Complete follower snapshot of the channel.
    ///
    /// Any provider error mid-pagination fails the whole listing.
    pub async fn list_followers(&self) -> Result<HashSet<TwitchId>> {
        let mut out = HashSet::new();
        self.walk(FollowQuery::FollowersOf(self.broadcaster), |edge| {
            out.insert(edge.from);
            false
        })
        .await?;
        debug!(followers = out.len(), "follower snapshot fetched");
        Ok(out)
    }

    /// Whether `user` currently follows the channel.
    ///
    /// Answers the same question as membership in [`Self::list_followers`],
    /// but pages the user's own follow edges, which is far smaller than the
    /// channel's follower list.
    pub async fn is_follower(&self, user: TwitchId) -> Result<bool> {
        let broadcaster = self.broadcaster;
        let mut found = false;
        self.walk(FollowQuery::FollowedBy(user), |edge| {
            found = edge.to == broadcaster;
            found
        })
        .await?;
        Ok(found)
    }

    /// Page through a follow listing until exhausted or `visit` returns true.
    async fn walk(
        &self,
        query: FollowQuery,
        mut visit: impl FnMut(&FollowEdge) -> bool + Send,
    ) -> Result<()> {
        let mut cursor: Option<String> = None;
        loop {
            let page = self.fetch_page(query, cursor.as_deref()).await?;

            if page.edges.iter().any(&mut visit) {
                return Ok(());
            }

            match page.cursor {
                Some(next) if !next.is_empty() && !page.edges.is_empty() => cursor = Some(next),
                _ => return Ok(()),
            }
        }
    }

    /// One follow page. A rejected app credential is dropped and the page is
    /// requested once more with a renewed one.
    async fn fetch_page(&self, query: FollowQuery, cursor: Option<&str>) -> Result<FollowPage> {
        let token = self.credential.ensure_fresh(self.provider.as_ref()).await?;
        match self.provider.follows_page(&token, query, cursor).await {
            Err(Error::CredentialRejected(msg)) => {
                warn!(?query, error = %msg, "app credential rejected; renewing");
                self.credential.invalidate().await;
            }
            other => return other,
        }

        let token = self.credential.ensure_fresh(self.provider.as_ref()).await?;
        match self.provider.follows_page(&token, query, cursor).await {
            Err(Error::CredentialRejected(msg)) => {
                self.credential.invalidate().await;
                Err(Error::ProviderApi(format!("renewed app credential rejected: {msg}")))
            }
            other => other,
        }
    }
}
