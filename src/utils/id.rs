//! Identifier generation.
//!
//! Ids only need to be unique as seen by callers; they are not secrets.

use uuid::Uuid;

/// What an identifier names. The kind becomes the id prefix, which keeps
/// logs readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Session,
    Subscription,
    Message,
    LocalSubscription,
}

impl IdKind {
    fn prefix(self) -> &'static str {
        match self {
            IdKind::Session => "session",
            IdKind::Subscription => "sub",
            IdKind::Message => "msg",
            IdKind::LocalSubscription => "local-sub",
        }
    }
}

pub fn new_id(kind: IdKind) -> String {
    format!("{}-{}", kind.prefix(), Uuid::new_v4())
}
