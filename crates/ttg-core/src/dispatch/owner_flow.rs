//! Owner prompt state machine.
//!
//! `/add` and `/remove` put the owner into `AwaitingWhitelistTarget`; the next
//! plain message within the timeout is taken as the target id. State is keyed
//! by owner so several owners never share a prompt.

use std::{collections::HashMap, time::Duration};

use tokio::{sync::Mutex, time::Instant};

use crate::domain::TelegramId;

pub const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnerAction {
    Whitelist,
    Unwhitelist,
}

#[derive(Clone, Copy, Debug)]
enum PromptState {
    AwaitingWhitelistTarget {
        action: OwnerAction,
        deadline: Instant,
    },
}

/// Result of consuming a pending prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pending {
    Ready(OwnerAction),
    Expired(OwnerAction),
    Idle,
}

pub struct OwnerPrompts {
    timeout: Duration,
    states: Mutex<HashMap<TelegramId, PromptState>>,
}

impl OwnerPrompts {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Arm (or re-arm) the prompt for `owner`.
    pub async fn begin(&self, owner: TelegramId, action: OwnerAction) {
        let deadline = Instant::now() + self.timeout;
        self.states
            .lock()
            .await
            .insert(owner, PromptState::AwaitingWhitelistTarget { action, deadline });
    }

    /// Consume the prompt, returning to idle either way.
    pub async fn take(&self, owner: TelegramId) -> Pending {
        match self.states.lock().await.remove(&owner) {
            Some(PromptState::AwaitingWhitelistTarget { action, deadline }) => {
                if Instant::now() < deadline {
                    Pending::Ready(action)
                } else {
                    Pending::Expired(action)
                }
            }
            None => Pending::Idle,
        }
    }

    /// Returns whether a prompt was pending.
    pub async fn cancel(&self, owner: TelegramId) -> bool {
        self.states.lock().await.remove(&owner).is_some()
    }
}

impl Default for OwnerPrompts {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT_TIMEOUT)
    }
}
