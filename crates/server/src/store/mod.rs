// Per-identity chat documents: account record, pending request set and the
// ordered list of friend threads.
//
// Every mutation is a single atomic operation on one document (set
// add/remove, thread add-if-absent, message append, conditional status
// update). Nothing reads a whole document, edits it and writes it back.

mod memory;
mod postgres;

use std::{future::Future, sync::Arc, time::Duration};

use chitchat_common::types::{ChatSummary, FriendThread, Message, UserSummary};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

pub(crate) use memory::MemoryChatStore;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);
pub const SEARCH_RESULT_LIMIT: usize = 20;
pub const USER_LIST_LIMIT: usize = 200;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a user with that {0} already exists")]
    Conflict(&'static str),

    #[error("store call `{operation}` timed out after {timeout:?}")]
    Timeout { operation: &'static str, timeout: Duration },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub profile: String,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            username: self.username.clone(),
            email: self.email.clone(),
            profile: self.profile.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// A thread snapshot together with the read transition applied to it.
#[derive(Debug, Clone)]
pub struct ThreadRead {
    /// Messages as they were before being marked read.
    pub messages: Vec<Message>,
    /// How many of those messages flipped to read.
    pub marked: u64,
    /// Received+unread messages left in the thread afterwards.
    pub unseen: u64,
}

#[derive(Clone)]
pub struct ChatStore {
    backend: StoreBackend,
    call_timeout: Duration,
}

#[derive(Clone)]
enum StoreBackend {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryChatStore>>),
    /// Never completes; exercises the call timeout.
    #[cfg(test)]
    Stalled,
}

impl ChatStore {
    pub fn postgres(pool: PgPool, call_timeout: Duration) -> Self {
        Self { backend: StoreBackend::Postgres(pool), call_timeout }
    }

    pub fn memory(call_timeout: Duration) -> Self {
        Self { backend: StoreBackend::Memory(Arc::default()), call_timeout }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::memory(DEFAULT_STORE_TIMEOUT)
    }

    #[cfg(test)]
    pub(crate) fn stalled(call_timeout: Duration) -> Self {
        Self { backend: StoreBackend::Stalled, call_timeout }
    }

    /// Number of state-changing mutations applied to the in-memory backend.
    #[cfg(test)]
    pub(crate) async fn memory_write_count(&self) -> u64 {
        match &self.backend {
            StoreBackend::Memory(store) => store.read().await.write_count(),
            _ => 0,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.backend {
            StoreBackend::Postgres(_) => "postgres",
            StoreBackend::Memory(_) => "memory",
            #[cfg(test)]
            StoreBackend::Stalled => "stalled",
        }
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout_ms = self.call_timeout.as_millis() as u64, "store call timed out");
                Err(StoreError::Timeout { operation, timeout: self.call_timeout })
            }
        }
    }

    pub async fn create_user(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        self.bounded("create_user", async {
            match &self.backend {
                StoreBackend::Postgres(pool) => postgres::create_user(pool, &user).await,
                StoreBackend::Memory(store) => store.write().await.create_user(user),
                #[cfg(test)]
                StoreBackend::Stalled => std::future::pending().await,
            }
        })
        .await
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        self.bounded("user_by_email", async {
            match &self.backend {
                StoreBackend::Postgres(pool) => postgres::user_by_email(pool, email).await,
                StoreBackend::Memory(store) => Ok(store.read().await.user_by_email(email)),
                #[cfg(test)]
                StoreBackend::Stalled => std::future::pending().await,
            }
        })
        .await
    }

    pub async fn user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        self.bounded("user_by_username", async {
            match &self.backend {
                StoreBackend::Postgres(pool) => postgres::user_by_username(pool, username).await,
                StoreBackend::Memory(store) => Ok(store.read().await.user_by_username(username)),
                #[cfg(test)]
                StoreBackend::Stalled => std::future::pending().await,
            }
        })
        .await
    }

    pub async fn user_exists(&self, username: &str) -> Result<bool, StoreError> {
        Ok(self.user_by_username(username).await?.is_some())
    }

    /// Case-insensitive username substring search, excluding `exclude`.
    pub async fn search_users(
        &self,
        query: &str,
        exclude: &str,
    ) -> Result<Vec<UserSummary>, StoreError> {
        self.bounded("search_users", async {
            match &self.backend {
                StoreBackend::Postgres(pool) => {
                    postgres::search_users(pool, query, exclude, SEARCH_RESULT_LIMIT).await
                }
                StoreBackend::Memory(store) => {
                    Ok(store.read().await.search_users(query, exclude, SEARCH_RESULT_LIMIT))
                }
                #[cfg(test)]
                StoreBackend::Stalled => std::future::pending().await,
            }
        })
        .await
    }

    pub async fn list_users(&self) -> Result<Vec<UserSummary>, StoreError> {
        self.bounded("list_users", async {
            match &self.backend {
                StoreBackend::Postgres(pool) => postgres::list_users(pool, USER_LIST_LIMIT).await,
                StoreBackend::Memory(store) => Ok(store.read().await.list_users(USER_LIST_LIMIT)),
                #[cfg(test)]
                StoreBackend::Stalled => std::future::pending().await,
            }
        })
        .await
    }

    pub async fn set_profile(&self, username: &str, profile: &str) -> Result<bool, StoreError> {
        self.bounded("set_profile", async {
            match &self.backend {
                StoreBackend::Postgres(pool) => postgres::set_profile(pool, username, profile).await,
                StoreBackend::Memory(store) => {
                    Ok(store.write().await.set_profile(username, profile))
                }
                #[cfg(test)]
                StoreBackend::Stalled => std::future::pending().await,
            }
        })
        .await
    }

    /// Add `sender` to `recipient`'s request set. Returns false when the
    /// entry was already present.
    pub async fn add_request(&self, recipient: &str, sender: &str) -> Result<bool, StoreError> {
        self.bounded("add_request", async {
            match &self.backend {
                StoreBackend::Postgres(pool) => {
                    postgres::add_request(pool, recipient, sender).await
                }
                StoreBackend::Memory(store) => {
                    Ok(store.write().await.add_request(recipient, sender))
                }
                #[cfg(test)]
                StoreBackend::Stalled => std::future::pending().await,
            }
        })
        .await
    }

    /// Remove `sender` from `recipient`'s request set. Absent entries are
    /// not an error.
    pub async fn remove_request(&self, recipient: &str, sender: &str) -> Result<bool, StoreError> {
        self.bounded("remove_request", async {
            match &self.backend {
                StoreBackend::Postgres(pool) => {
                    postgres::remove_request(pool, recipient, sender).await
                }
                StoreBackend::Memory(store) => {
                    Ok(store.write().await.remove_request(recipient, sender))
                }
                #[cfg(test)]
                StoreBackend::Stalled => std::future::pending().await,
            }
        })
        .await
    }

    pub async fn pending_requests(&self, recipient: &str) -> Result<Vec<String>, StoreError> {
        self.bounded("pending_requests", async {
            match &self.backend {
                StoreBackend::Postgres(pool) => postgres::pending_requests(pool, recipient).await,
                StoreBackend::Memory(store) => Ok(store.read().await.pending_requests(recipient)),
                #[cfg(test)]
                StoreBackend::Stalled => std::future::pending().await,
            }
        })
        .await
    }

    pub async fn count_requests(&self, recipient: &str) -> Result<u64, StoreError> {
        self.bounded("count_requests", async {
            match &self.backend {
                StoreBackend::Postgres(pool) => postgres::count_requests(pool, recipient).await,
                StoreBackend::Memory(store) => Ok(store.read().await.count_requests(recipient)),
                #[cfg(test)]
                StoreBackend::Stalled => std::future::pending().await,
            }
        })
        .await
    }

    /// Create `owner`'s thread with `peer` unless it already exists.
    pub async fn add_friend_thread(&self, owner: &str, peer: &str) -> Result<bool, StoreError> {
        self.bounded("add_friend_thread", async {
            match &self.backend {
                StoreBackend::Postgres(pool) => postgres::add_friend_thread(pool, owner, peer).await,
                StoreBackend::Memory(store) => {
                    Ok(store.write().await.add_friend_thread(owner, peer))
                }
                #[cfg(test)]
                StoreBackend::Stalled => std::future::pending().await,
            }
        })
        .await
    }

    pub async fn friend_threads(&self, owner: &str) -> Result<Vec<FriendThread>, StoreError> {
        self.bounded("friend_threads", async {
            match &self.backend {
                StoreBackend::Postgres(pool) => postgres::friend_threads(pool, owner).await,
                StoreBackend::Memory(store) => Ok(store.read().await.friend_threads(owner)),
                #[cfg(test)]
                StoreBackend::Stalled => std::future::pending().await,
            }
        })
        .await
    }

    pub async fn has_thread(&self, owner: &str, peer: &str) -> Result<bool, StoreError> {
        self.bounded("has_thread", async {
            match &self.backend {
                StoreBackend::Postgres(pool) => postgres::has_thread(pool, owner, peer).await,
                StoreBackend::Memory(store) => Ok(store.read().await.has_thread(owner, peer)),
                #[cfg(test)]
                StoreBackend::Stalled => std::future::pending().await,
            }
        })
        .await
    }

    /// `None` when `owner` has no thread with `peer`.
    #[cfg(test)]
    pub async fn thread_messages(
        &self,
        owner: &str,
        peer: &str,
    ) -> Result<Option<Vec<Message>>, StoreError> {
        self.bounded("thread_messages", async {
            match &self.backend {
                StoreBackend::Postgres(pool) => postgres::thread_messages(pool, owner, peer).await,
                StoreBackend::Memory(store) => Ok(store.read().await.thread_messages(owner, peer)),
                #[cfg(test)]
                StoreBackend::Stalled => std::future::pending().await,
            }
        })
        .await
    }

    /// Fetch the thread and mark the fetched messages read in one step.
    /// Messages appended after the snapshot keep their status. `None` when
    /// `owner` has no thread with `peer`.
    pub async fn read_thread(&self, owner: &str, peer: &str) -> Result<Option<ThreadRead>, StoreError> {
        self.bounded("read_thread", async {
            match &self.backend {
                StoreBackend::Postgres(pool) => postgres::read_thread(pool, owner, peer).await,
                StoreBackend::Memory(store) => Ok(store.write().await.read_thread(owner, peer)),
                #[cfg(test)]
                StoreBackend::Stalled => std::future::pending().await,
            }
        })
        .await
    }

    /// Append to `owner`'s thread with `peer`. Returns false when there is
    /// no such thread.
    pub async fn append_message(
        &self,
        owner: &str,
        peer: &str,
        message: &Message,
    ) -> Result<bool, StoreError> {
        self.bounded("append_message", async {
            match &self.backend {
                StoreBackend::Postgres(pool) => {
                    postgres::append_message(pool, owner, peer, message).await
                }
                StoreBackend::Memory(store) => {
                    Ok(store.write().await.append_message(owner, peer, message.clone()))
                }
                #[cfg(test)]
                StoreBackend::Stalled => std::future::pending().await,
            }
        })
        .await
    }

    /// Flip every received+unread message in the thread to read, as one
    /// element-level update. Returns how many messages changed; zero means
    /// nothing was written.
    pub async fn mark_thread_read(&self, owner: &str, peer: &str) -> Result<u64, StoreError> {
        self.bounded("mark_thread_read", async {
            match &self.backend {
                StoreBackend::Postgres(pool) => postgres::mark_thread_read(pool, owner, peer).await,
                StoreBackend::Memory(store) => Ok(store.write().await.mark_thread_read(owner, peer)),
                #[cfg(test)]
                StoreBackend::Stalled => std::future::pending().await,
            }
        })
        .await
    }

    pub async fn unseen_count(&self, owner: &str, peer: &str) -> Result<u64, StoreError> {
        self.bounded("unseen_count", async {
            match &self.backend {
                StoreBackend::Postgres(pool) => postgres::unseen_count(pool, owner, peer).await,
                StoreBackend::Memory(store) => Ok(store.read().await.unseen_count(owner, peer)),
                #[cfg(test)]
                StoreBackend::Stalled => std::future::pending().await,
            }
        })
        .await
    }

    /// Chat list rows, most recently active first.
    pub async fn chat_summaries(&self, owner: &str) -> Result<Vec<ChatSummary>, StoreError> {
        self.bounded("chat_summaries", async {
            match &self.backend {
                StoreBackend::Postgres(pool) => postgres::chat_summaries(pool, owner).await,
                StoreBackend::Memory(store) => Ok(store.read().await.chat_summaries(owner)),
                #[cfg(test)]
                StoreBackend::Stalled => std::future::pending().await,
            }
        })
        .await
    }
}
