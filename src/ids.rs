use chrono::{DateTime, Utc};

/// Issues `<prefix>-<millis>` ids that strictly increase, even when the clock
/// stalls or moves backwards. Every id seen through [`IdGenerator::observe`]
/// raises the floor, so ids are never handed out twice.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    prefix: &'static str,
    last: i64,
}

impl IdGenerator {
    pub fn new(prefix: &'static str) -> Self {
        Self { prefix, last: 0 }
    }

    pub fn prefix(&self) -> &'static str {
        self.prefix
    }

    pub fn observe(&mut self, id: &str) {
        if let Some(value) = parse_sequence(id) {
            self.last = self.last.max(value);
        }
    }

    pub fn next_id(&mut self) -> String {
        self.next_at(Utc::now())
    }

    pub(crate) fn next_at(&mut self, now: DateTime<Utc>) -> String {
        let candidate = now.timestamp_millis();
        let value = if candidate > self.last {
            candidate
        } else {
            self.last.saturating_add(1)
        };
        self.last = value;
        format!("{}-{}", self.prefix, value)
    }
}

fn parse_sequence(id: &str) -> Option<i64> {
    id.rsplit_once('-')
        .and_then(|(_, tail)| tail.parse::<i64>().ok())
}
