use chitchat_common::{
    protocol::{
        rest::{SendMessageBody, ThreadResponse},
        ws::{MessagePreview, ServerEvent},
    },
    types::{ChatSummary, Message, MessageBody},
};
use chrono::Utc;
use tracing::warn;

use super::{ChatError, ChatService};
use crate::{
    auth::middleware::AuthenticatedUser,
    dispatch::{Effects, Push},
};

impl ChatService {
    /// Append one message to both sides of the conversation, then report the
    /// recipient's new unseen count and the message itself.
    pub async fn send_message(
        &self,
        user: &AuthenticatedUser,
        friend: &str,
        request: SendMessageBody,
    ) -> Result<Effects<Message>, ChatError> {
        let body = MessageBody::from_parts(&request.text, request.image.as_deref())
            .ok_or_else(|| ChatError::validation("message must carry text or an image"))?;
        let me = user.username.as_str();

        self.require_user(friend).await?;
        if !self.store.has_thread(me, friend).await? {
            return Err(ChatError::not_found(format!("no chat with `{friend}`")));
        }

        let time = Utc::now();
        let sent = Message::outgoing(&body, time);
        let received = Message::incoming(&body, time);

        // Two independent documents; neither append waits on the other.
        let (sender_copy, recipient_copy) = tokio::join!(
            self.store.append_message(me, friend, &sent),
            self.store.append_message(friend, me, &received),
        );
        let (sender_copy, recipient_copy) = (sender_copy?, recipient_copy?);
        if !sender_copy || !recipient_copy {
            warn!(from = me, to = friend, sender_copy, recipient_copy, "thread missing on one side");
            return Err(ChatError::not_found(format!("no chat with `{friend}`")));
        }

        let unseen = self.notifications.unseen_push(friend, me).await?;
        let preview = ServerEvent::MessageNew {
            from: me.to_owned(),
            to: friend.to_owned(),
            message: MessagePreview { text: received.text.clone(), image: received.has_image, time },
        };
        Ok(Effects::new(sent).with_pushes([unseen, Push::to(friend, preview)]))
    }

    /// The caller's copy of the thread with `friend`, as it was before this
    /// read cleared the unseen backlog.
    pub async fn fetch_thread(
        &self,
        user: &AuthenticatedUser,
        friend: &str,
    ) -> Result<Effects<ThreadResponse>, ChatError> {
        let Some(read) = self.notifications.read_thread(&user.username, friend).await? else {
            self.require_user(friend).await?;
            return Ok(Effects::new(ThreadResponse { messages: Vec::new() }));
        };

        Ok(Effects::new(ThreadResponse { messages: read.value }).with_pushes(read.pushes))
    }

    /// Explicit read receipt from REST or the socket.
    pub async fn mark_read(
        &self,
        user: &AuthenticatedUser,
        friend: &str,
    ) -> Result<Effects<u64>, ChatError> {
        Ok(self.notifications.mark_thread_read(&user.username, friend).await?)
    }

    /// `owner`'s chat list; callers may only read their own.
    pub async fn chat_list(
        &self,
        user: &AuthenticatedUser,
        owner: &str,
    ) -> Result<Vec<ChatSummary>, ChatError> {
        if owner != user.username {
            return Err(ChatError::Forbidden("cannot read another user's chat list"));
        }
        Ok(self.store.chat_summaries(owner).await?)
    }
}
