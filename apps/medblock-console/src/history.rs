use std::collections::VecDeque;

pub const HISTORY_LIMIT: usize = 10;

/// Statements that ran successfully in this session, newest first.
#[derive(Debug, Default)]
pub struct QueryHistory {
    entries: VecDeque<String>,
}

impl QueryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sql: &str) {
        self.entries.push_front(sql.to_string());
        self.entries.truncate(HISTORY_LIMIT);
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_newest_ten() {
        let mut history = QueryHistory::new();
        for i in 0..12 {
            history.push(&format!("SELECT {}", i));
        }

        let kept: Vec<&str> = history.iter().collect();
        assert_eq!(kept.len(), HISTORY_LIMIT);
        assert_eq!(kept[0], "SELECT 11");
        assert_eq!(kept[9], "SELECT 2");
    }
}
