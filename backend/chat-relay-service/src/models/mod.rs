pub mod message;

pub use message::{Attachment, AttachmentKind, Message, MessageDraft, NewMessage};
