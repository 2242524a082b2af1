use chitchat_common::protocol::ws::ServerEvent;
use tracing::info;

use super::{ChatError, ChatService};
use crate::{
    auth::middleware::AuthenticatedUser,
    dispatch::{Effects, Push},
};

impl ChatService {
    /// `user` asks `to` for a friendship. Re-sending is absorbed by the
    /// request set.
    pub async fn send_request(
        &self,
        user: &AuthenticatedUser,
        to: &str,
    ) -> Result<Effects<()>, ChatError> {
        if to == user.username {
            return Err(ChatError::Validation {
                field: Some("toUsername"),
                message: "cannot send a friend request to yourself".to_owned(),
            });
        }
        self.require_user(to).await?;

        let inserted = self.store.add_request(to, &user.username).await?;
        info!(from = %user.username, to, inserted, "friend request recorded");

        let count = self.notifications.request_count_push(to).await?;
        let notice = Push::to(to, ServerEvent::RequestNew { from: user.username.clone() });
        Ok(Effects::new(()).with_pushes([count, notice]))
    }

    /// `user` accepts the pending request from `requester`.
    pub async fn accept_request(
        &self,
        user: &AuthenticatedUser,
        requester: &str,
    ) -> Result<Effects<()>, ChatError> {
        reject_self_requester(user, requester, "cannot accept a friend request from yourself")?;
        self.require_user(requester).await?;
        let me = user.username.as_str();

        // Either side may have sent; clear both directions.
        self.store.remove_request(me, requester).await?;
        self.store.remove_request(requester, me).await?;
        let created_mine = self.store.add_friend_thread(me, requester).await?;
        let created_theirs = self.store.add_friend_thread(requester, me).await?;
        info!(acceptor = me, requester, created_mine, created_theirs, "friend request accepted");

        let count = self.notifications.request_count_push(me).await?;
        Ok(Effects::new(()).with_pushes([
            count,
            Push::to(me, ServerEvent::FriendAdded { friend_username: requester.to_owned() }),
            Push::to(requester, ServerEvent::FriendAdded { friend_username: me.to_owned() }),
        ]))
    }

    /// Drop the request from `requester`. Only the acceptor's set changes.
    pub async fn reject_request(
        &self,
        user: &AuthenticatedUser,
        requester: &str,
    ) -> Result<Effects<()>, ChatError> {
        reject_self_requester(user, requester, "cannot reject a friend request from yourself")?;
        self.store.remove_request(&user.username, requester).await?;

        let count = self.notifications.request_count_push(&user.username).await?;
        Ok(Effects::new(()).with_push(count))
    }

    pub async fn pending_request_count(&self, user: &AuthenticatedUser) -> Result<u64, ChatError> {
        Ok(self.notifications.pending_request_count(&user.username).await?)
    }
}

fn reject_self_requester(
    user: &AuthenticatedUser,
    requester: &str,
    message: &str,
) -> Result<(), ChatError> {
    if requester == user.username {
        return Err(ChatError::Validation {
            field: Some("requesterUsername"),
            message: message.to_owned(),
        });
    }
    Ok(())
}
