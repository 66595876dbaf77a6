pub mod event;
pub mod message;
pub mod talk;
pub mod user;

pub use event::{ImMessage, PresenceNotice};
pub use message::{
    ChatRecord, CodePayload, Conversation, FilePayload, ForwardPayload, InvitePayload, InviteType,
    MessageBody, MsgType, NewChatRecord, Page, PreviewItem, RecordView, Source,
};
pub use talk::TalkItem;
pub use user::{Emoticon, FriendEntry, GroupProfile, UserProfile};
