// chitchat-common: shared types for the chitchat server and its clients

pub mod identity;
pub mod protocol;
pub mod types;
