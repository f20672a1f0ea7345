//! Hand-written port fakes shared by the unit tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, Rights, TelegramId, TwitchId, TwitchUser},
    errors::Error,
    followers::credential::AppCredential,
    ports::{ChatPort, FollowEdge, FollowPage, FollowQuery, FollowerProvider},
    Result,
};

pub struct FakeProvider {
    token_requests: AtomicUsize,
    page_requests: AtomicUsize,
    credential_rejections: AtomicUsize,
    token_latency: Mutex<Duration>,
    token_ttl: Mutex<Duration>,
    logins: Mutex<HashMap<String, TwitchId>>,
    follower_pages: Mutex<Vec<Vec<FollowEdge>>>,
    fail_page: Mutex<Option<usize>>,
    followed_by: Mutex<HashMap<TwitchId, Vec<TwitchId>>>,
    codes: Mutex<HashMap<String, TwitchUser>>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self {
            token_requests: AtomicUsize::new(0),
            page_requests: AtomicUsize::new(0),
            credential_rejections: AtomicUsize::new(0),
            token_latency: Mutex::new(Duration::ZERO),
            token_ttl: Mutex::new(Duration::from_secs(3600)),
            logins: Mutex::new(HashMap::new()),
            follower_pages: Mutex::new(Vec::new()),
            fail_page: Mutex::new(None),
            followed_by: Mutex::new(HashMap::new()),
            codes: Mutex::new(HashMap::new()),
        }
    }
}

impl FakeProvider {
    pub fn token_requests(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }

    pub fn page_requests(&self) -> usize {
        self.page_requests.load(Ordering::SeqCst)
    }

    pub fn set_token_latency(&self, d: Duration) {
        *self.token_latency.lock().unwrap() = d;
    }

    pub fn set_token_ttl(&self, d: Duration) {
        *self.token_ttl.lock().unwrap() = d;
    }

    /// Answer the next `times` follow-page calls with a credential rejection.
    pub fn reject_credential(&self, times: usize) {
        self.credential_rejections.store(times, Ordering::SeqCst);
    }

    pub fn add_login(&self, login: &str, id: TwitchId) {
        self.logins.lock().unwrap().insert(login.to_string(), id);
    }

    pub fn set_follower_pages(&self, pages: Vec<Vec<FollowEdge>>) {
        *self.follower_pages.lock().unwrap() = pages;
    }

    /// Channel followers as a single page.
    pub fn set_followers(&self, channel: TwitchId, followers: &[i64]) {
        let edges = followers
            .iter()
            .map(|f| FollowEdge {
                from: TwitchId(*f),
                to: channel,
            })
            .collect();
        self.set_follower_pages(vec![edges]);
    }

    pub fn fail_page_at(&self, index: usize) {
        *self.fail_page.lock().unwrap() = Some(index);
    }

    pub fn set_followed_by(&self, user: TwitchId, channels: &[i64]) {
        self.followed_by
            .lock()
            .unwrap()
            .insert(user, channels.iter().copied().map(TwitchId).collect());
    }

    /// Make `code` exchange into a user token that resolves to `user`.
    pub fn add_code(&self, code: &str, user: TwitchUser) {
        self.codes.lock().unwrap().insert(code.to_string(), user);
    }
}

pub fn twitch_user(id: i64, name: &str) -> TwitchUser {
    TwitchUser {
        id: TwitchId(id),
        login: name.to_lowercase(),
        display_name: name.to_string(),
    }
}

#[async_trait]
impl FollowerProvider for FakeProvider {
    fn authorization_url(&self, state: &str) -> Result<String> {
        Ok(format!("https://id.example/oauth2/authorize?state={state}"))
    }

    async fn exchange_code(&self, code: &str) -> Result<String> {
        if self.codes.lock().unwrap().contains_key(code) {
            Ok(format!("user-token:{code}"))
        } else {
            Err(Error::ProviderAuthFailed("invalid authorization code".to_string()))
        }
    }

    async fn current_user(&self, user_token: &str) -> Result<TwitchUser> {
        let code = user_token.trim_start_matches("user-token:");
        self.codes
            .lock()
            .unwrap()
            .get(code)
            .cloned()
            .ok_or_else(|| Error::ProviderAuthFailed("invalid user token".to_string()))
    }

    async fn request_app_token(&self) -> Result<AppCredential> {
        let n = self.token_requests.fetch_add(1, Ordering::SeqCst) + 1;
        let latency = *self.token_latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let ttl = *self.token_ttl.lock().unwrap();
        Ok(AppCredential::new(format!("app-{n}"), ttl))
    }

    async fn lookup_login(&self, _app_token: &str, login: &str) -> Result<Option<TwitchUser>> {
        Ok(self
            .logins
            .lock()
            .unwrap()
            .get(login)
            .map(|id| twitch_user(id.0, login)))
    }

    async fn follows_page(
        &self,
        _app_token: &str,
        query: FollowQuery,
        cursor: Option<&str>,
    ) -> Result<FollowPage> {
        if self
            .credential_rejections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::CredentialRejected("401 invalid token".to_string()));
        }

        match query {
            FollowQuery::FollowersOf(_) => {
                self.page_requests.fetch_add(1, Ordering::SeqCst);
                let idx = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
                if *self.fail_page.lock().unwrap() == Some(idx) {
                    return Err(Error::ProviderApi("503 service unavailable".to_string()));
                }
                let pages = self.follower_pages.lock().unwrap();
                let edges = pages.get(idx).cloned().unwrap_or_default();
                let cursor = (idx + 1 < pages.len()).then(|| (idx + 1).to_string());
                Ok(FollowPage { edges, cursor })
            }
            FollowQuery::FollowedBy(user) => {
                let edges = self
                    .followed_by
                    .lock()
                    .unwrap()
                    .get(&user)
                    .map(|channels| {
                        channels
                            .iter()
                            .map(|c| FollowEdge { from: user, to: *c })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(FollowPage {
                    edges,
                    cursor: None,
                })
            }
        }
    }
}

#[derive(Default)]
pub struct FakeChat {
    sent: Mutex<Vec<(ChatId, String)>>,
    rights: Mutex<Vec<(TelegramId, Rights)>>,
    non_members: Mutex<HashSet<TelegramId>>,
    fail_rights: AtomicBool,
}

impl FakeChat {
    pub fn sent(&self) -> Vec<(ChatId, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, chat: ChatId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(c, _)| *c == chat)
            .map(|(_, text)| text)
            .collect()
    }

    pub fn rights(&self) -> Vec<(TelegramId, Rights)> {
        self.rights.lock().unwrap().clone()
    }

    pub fn mark_non_member(&self, user: TelegramId) {
        self.non_members.lock().unwrap().insert(user);
    }

    pub fn fail_rights(&self, fail: bool) {
        self.fail_rights.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatPort for FakeChat {
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<()> {
        self.sent.lock().unwrap().push((chat_id, html.to_string()));
        Ok(())
    }

    async fn set_rights(&self, user: TelegramId, rights: Rights) -> Result<()> {
        if self.fail_rights.load(Ordering::SeqCst) {
            return Err(Error::External("telegram error: not enough rights".to_string()));
        }
        self.rights.lock().unwrap().push((user, rights));
        Ok(())
    }

    async fn is_group_member(&self, user: TelegramId) -> Result<bool> {
        Ok(!self.non_members.lock().unwrap().contains(&user))
    }
}
