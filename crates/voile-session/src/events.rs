//! Transient user-facing notifications (the toast analog).
//!
//! The engine never blocks on the UI: notices go over an unbounded channel
//! and a missing listener is logged, not an error.

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Error,
}

/// A transient, user-displayable notification.
#[derive(Debug, Clone)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

pub type NoticeSender = mpsc::UnboundedSender<Notice>;
pub type NoticeReceiver = mpsc::UnboundedReceiver<Notice>;

/// Create the notice channel the UI layer subscribes to.
pub fn notice_channel() -> (NoticeSender, NoticeReceiver) {
    mpsc::unbounded_channel()
}

pub fn emit_notice(tx: &NoticeSender, kind: NoticeKind, text: impl Into<String>) {
    let notice = Notice {
        kind,
        text: text.into(),
    };
    if tx.send(notice).is_err() {
        tracing::debug!("no notice listener attached");
    }
}
