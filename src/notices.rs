use crate::models::{Notice, NoticeLevel};
use chrono::Utc;
use tracing::{info, warn};

/// Transient user-facing messages. Nothing here is persisted.
#[derive(Debug, Default)]
pub struct Notices {
    next_id: u64,
    items: Vec<Notice>,
}

impl Notices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, level: NoticeLevel, message: impl Into<String>) -> u64 {
        self.next_id += 1;
        let notice = Notice {
            id: self.next_id,
            level,
            message: message.into(),
            created_at: Utc::now(),
        };
        match level {
            NoticeLevel::Info => info!(id = notice.id, message = %notice.message, "notice"),
            NoticeLevel::Warning | NoticeLevel::Error => {
                warn!(id = notice.id, level = ?level, message = %notice.message, "notice")
            }
        }
        self.items.push(notice);
        self.next_id
    }

    /// Returns false when the notice was already gone.
    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.items.len();
        self.items.retain(|notice| notice.id != id);
        self.items.len() != before
    }

    pub fn list(&self) -> &[Notice] {
        &self.items
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::Notices;
    use crate::models::NoticeLevel;

    #[test]
    fn notices_can_be_pushed_and_dismissed() {
        let mut notices = Notices::new();
        let first = notices.push(NoticeLevel::Error, "Analysis failed");
        let second = notices.push(NoticeLevel::Info, "Export written");
        assert_ne!(first, second);
        assert_eq!(notices.list().len(), 2);

        assert!(notices.dismiss(first));
        assert!(!notices.dismiss(first));
        assert_eq!(notices.list()[0].message, "Export written");

        notices.clear();
        assert!(notices.list().is_empty());
    }
}
