// Counter derivation and the pushes that carry counters.
//
// Counts are always recomputed from the store after the mutation that
// affects them; nothing here caches a running total.

use chitchat_common::{protocol::ws::ServerEvent, types::Message};
use tracing::debug;

use crate::{
    dispatch::{Effects, Push},
    store::{ChatStore, StoreError},
};

#[derive(Clone)]
pub struct NotificationEngine {
    store: ChatStore,
}

impl NotificationEngine {
    pub fn new(store: ChatStore) -> Self {
        Self { store }
    }

    pub async fn pending_request_count(&self, username: &str) -> Result<u64, StoreError> {
        self.store.count_requests(username).await
    }

    pub async fn unseen_count(&self, owner: &str, peer: &str) -> Result<u64, StoreError> {
        self.store.unseen_count(owner, peer).await
    }

    /// `notifications:count` for `username`, computed from the current set.
    pub async fn request_count_push(&self, username: &str) -> Result<Push, StoreError> {
        let count = self.pending_request_count(username).await?;
        Ok(Push::to(username, ServerEvent::NotificationsCount { count }))
    }

    /// `chat:unseen_update` for `owner`'s thread with `peer`.
    pub async fn unseen_push(&self, owner: &str, peer: &str) -> Result<Push, StoreError> {
        let unseen_count = self.unseen_count(owner, peer).await?;
        Ok(unseen_update(owner, peer, unseen_count))
    }

    /// Flip every received+unread message in `owner`'s thread with `peer` to
    /// read and report a cleared badge. Reading always clears the whole
    /// backlog, so the pushed count is a fixed zero. With nothing unread the
    /// store performs no write and the call still succeeds.
    pub async fn mark_thread_read(&self, owner: &str, peer: &str) -> Result<Effects<u64>, StoreError> {
        let transitioned = self.store.mark_thread_read(owner, peer).await?;
        debug!(owner, peer, transitioned, "thread marked read");

        Ok(Effects::new(transitioned).with_push(unseen_update(owner, peer, 0)))
    }

    /// Snapshot `owner`'s thread with `peer` and mark that snapshot read.
    /// The badge push carries whatever is still unread afterwards, which is
    /// only non-zero when a message landed after the snapshot.
    pub async fn read_thread(
        &self,
        owner: &str,
        peer: &str,
    ) -> Result<Option<Effects<Vec<Message>>>, StoreError> {
        let Some(read) = self.store.read_thread(owner, peer).await? else {
            return Ok(None);
        };
        debug!(owner, peer, marked = read.marked, unseen = read.unseen, "thread read");

        Ok(Some(Effects::new(read.messages).with_push(unseen_update(owner, peer, read.unseen))))
    }
}

fn unseen_update(owner: &str, peer: &str, unseen_count: u64) -> Push {
    Push::to(
        owner,
        ServerEvent::ChatUnseenUpdate { friend_username: peer.to_owned(), unseen_count },
    )
}
