use std::collections::{BTreeMap, HashMap};

use chitchat_common::types::{
    sort_chats_by_recency, ChatSummary, FriendThread, Message, ReadStatus, UserSummary,
};
use chrono::Utc;

use super::{NewUser, StoreError, ThreadRead, UserRecord};

#[derive(Debug, Clone)]
struct UserDocument {
    record: UserRecord,
    // Insertion-ordered set of requester usernames.
    requests: Vec<String>,
    friends: Vec<FriendThread>,
}

impl UserDocument {
    fn thread(&self, peer: &str) -> Option<&FriendThread> {
        self.friends.iter().find(|thread| thread.peer == peer)
    }

    fn thread_mut(&mut self, peer: &str) -> Option<&mut FriendThread> {
        self.friends.iter_mut().find(|thread| thread.peer == peer)
    }
}

/// Process-local backend used when no database URL is configured and in
/// tests. Each method runs under the facade's lock, so every call is one
/// atomic step.
#[derive(Debug, Default)]
pub(crate) struct MemoryChatStore {
    documents: BTreeMap<String, UserDocument>,
    usernames_by_email: HashMap<String, String>,
    writes: u64,
}

impl MemoryChatStore {
    pub(crate) fn write_count(&self) -> u64 {
        self.writes
    }

    pub(crate) fn create_user(&mut self, user: NewUser) -> Result<UserRecord, StoreError> {
        if self.usernames_by_email.contains_key(&user.email) {
            return Err(StoreError::Conflict("email"));
        }
        if self.documents.contains_key(&user.username) {
            return Err(StoreError::Conflict("username"));
        }

        let record = UserRecord {
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            profile: String::new(),
            created_at: Utc::now(),
        };
        self.usernames_by_email.insert(record.email.clone(), record.username.clone());
        self.documents.insert(
            record.username.clone(),
            UserDocument { record: record.clone(), requests: Vec::new(), friends: Vec::new() },
        );
        self.writes += 1;
        Ok(record)
    }

    pub(crate) fn user_by_email(&self, email: &str) -> Option<UserRecord> {
        self.usernames_by_email.get(email).and_then(|username| self.user_by_username(username))
    }

    pub(crate) fn user_by_username(&self, username: &str) -> Option<UserRecord> {
        self.documents.get(username).map(|document| document.record.clone())
    }

    pub(crate) fn search_users(&self, query: &str, exclude: &str, limit: usize) -> Vec<UserSummary> {
        let needle = query.to_lowercase();
        self.documents
            .values()
            .filter(|document| document.record.username != exclude)
            .filter(|document| document.record.username.to_lowercase().contains(&needle))
            .take(limit)
            .map(|document| document.record.summary())
            .collect()
    }

    pub(crate) fn list_users(&self, limit: usize) -> Vec<UserSummary> {
        self.documents.values().take(limit).map(|document| document.record.summary()).collect()
    }

    pub(crate) fn set_profile(&mut self, username: &str, profile: &str) -> bool {
        let Some(document) = self.documents.get_mut(username) else {
            return false;
        };
        document.record.profile = profile.to_owned();
        self.writes += 1;
        true
    }

    pub(crate) fn add_request(&mut self, recipient: &str, sender: &str) -> bool {
        let Some(document) = self.documents.get_mut(recipient) else {
            return false;
        };
        if document.requests.iter().any(|existing| existing == sender) {
            return false;
        }
        document.requests.push(sender.to_owned());
        self.writes += 1;
        true
    }

    pub(crate) fn remove_request(&mut self, recipient: &str, sender: &str) -> bool {
        let Some(document) = self.documents.get_mut(recipient) else {
            return false;
        };
        let before = document.requests.len();
        document.requests.retain(|existing| existing != sender);
        let removed = document.requests.len() != before;
        if removed {
            self.writes += 1;
        }
        removed
    }

    pub(crate) fn count_requests(&self, recipient: &str) -> u64 {
        self.documents.get(recipient).map_or(0, |document| document.requests.len() as u64)
    }

    pub(crate) fn pending_requests(&self, recipient: &str) -> Vec<String> {
        self.documents.get(recipient).map(|document| document.requests.clone()).unwrap_or_default()
    }

    pub(crate) fn add_friend_thread(&mut self, owner: &str, peer: &str) -> bool {
        let Some(document) = self.documents.get_mut(owner) else {
            return false;
        };
        if document.thread(peer).is_some() {
            return false;
        }
        document.friends.push(FriendThread::new(peer));
        self.writes += 1;
        true
    }

    pub(crate) fn friend_threads(&self, owner: &str) -> Vec<FriendThread> {
        self.documents.get(owner).map(|document| document.friends.clone()).unwrap_or_default()
    }

    pub(crate) fn has_thread(&self, owner: &str, peer: &str) -> bool {
        self.documents.get(owner).is_some_and(|document| document.thread(peer).is_some())
    }

    pub(crate) fn thread_messages(&self, owner: &str, peer: &str) -> Option<Vec<Message>> {
        self.documents
            .get(owner)
            .and_then(|document| document.thread(peer))
            .map(|thread| thread.messages.clone())
    }

    pub(crate) fn append_message(&mut self, owner: &str, peer: &str, message: Message) -> bool {
        let Some(thread) = self.documents.get_mut(owner).and_then(|document| document.thread_mut(peer))
        else {
            return false;
        };
        thread.messages.push(message);
        self.writes += 1;
        true
    }

    pub(crate) fn mark_thread_read(&mut self, owner: &str, peer: &str) -> u64 {
        self.mark_read_through(owner, peer, usize::MAX)
    }

    /// Like `mark_thread_read`, limited to the first `through` messages.
    pub(crate) fn mark_read_through(&mut self, owner: &str, peer: &str, through: usize) -> u64 {
        let Some(thread) = self.documents.get_mut(owner).and_then(|document| document.thread_mut(peer))
        else {
            return 0;
        };

        let mut transitioned = 0;
        for message in
            thread.messages.iter_mut().take(through).filter(|message| message.is_unseen())
        {
            message.status = ReadStatus::Read;
            transitioned += 1;
        }
        if transitioned > 0 {
            self.writes += 1;
        }
        transitioned
    }

    /// Snapshot the thread and mark exactly that snapshot read.
    pub(crate) fn read_thread(&mut self, owner: &str, peer: &str) -> Option<ThreadRead> {
        let messages = self.thread_messages(owner, peer)?;
        let marked = self.mark_read_through(owner, peer, messages.len());
        let unseen = self.unseen_count(owner, peer);
        Some(ThreadRead { messages, marked, unseen })
    }

    pub(crate) fn unseen_count(&self, owner: &str, peer: &str) -> u64 {
        self.documents
            .get(owner)
            .and_then(|document| document.thread(peer))
            .map(FriendThread::unseen_count)
            .unwrap_or(0)
    }

    pub(crate) fn chat_summaries(&self, owner: &str) -> Vec<ChatSummary> {
        let mut chats: Vec<ChatSummary> = self
            .documents
            .get(owner)
            .map(|document| {
                document
                    .friends
                    .iter()
                    .map(|thread| ChatSummary {
                        friend_username: thread.peer.clone(),
                        unseen_count: thread.unseen_count(),
                        last_message_at: thread.last_message_at(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        sort_chats_by_recency(&mut chats);
        chats
    }
}
