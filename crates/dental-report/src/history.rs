//! 撤销/重做历史
//!
//! 线性快照历史：游标之后的快照在新的修改写入时被截断。

/// 快照历史
#[derive(Debug, Clone)]
pub struct History<T> {
    entries: Vec<T>,
    /// 当前快照位置，空历史时为 None
    cursor: Option<usize>,
    /// 最大快照数量，None 表示不限制
    limit: Option<usize>,
}

impl<T: Clone> History<T> {
    /// 创建空历史
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            entries: Vec::new(),
            cursor: None,
            limit: limit.map(|l| l.max(1)),
        }
    }

    /// 以单个快照重新开始
    pub fn reset_to(&mut self, snapshot: T) {
        self.entries.clear();
        self.entries.push(snapshot);
        self.cursor = Some(0);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }

    /// 记录新快照，丢弃可重做的分支
    pub fn record(&mut self, snapshot: T) {
        let keep = self.cursor.map_or(0, |i| i + 1);
        self.entries.truncate(keep);
        self.entries.push(snapshot);

        if let Some(limit) = self.limit {
            if self.entries.len() > limit {
                let overflow = self.entries.len() - limit;
                self.entries.drain(..overflow);
            }
        }

        self.cursor = Some(self.entries.len() - 1);
    }

    /// 后退一步，返回该位置快照的副本
    pub fn undo(&mut self) -> Option<T> {
        match self.cursor {
            Some(i) if i > 0 => {
                self.cursor = Some(i - 1);
                Some(self.entries[i - 1].clone())
            }
            _ => None,
        }
    }

    /// 前进一步，返回该位置快照的副本
    pub fn redo(&mut self) -> Option<T> {
        match self.cursor {
            Some(i) if i + 1 < self.entries.len() => {
                self.cursor = Some(i + 1);
                Some(self.entries[i + 1].clone())
            }
            _ => None,
        }
    }

    pub fn can_undo(&self) -> bool {
        matches!(self.cursor, Some(i) if i > 0)
    }

    pub fn can_redo(&self) -> bool {
        matches!(self.cursor, Some(i) if i + 1 < self.entries.len())
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[T] {
        &self.entries
    }
}

impl<T: Clone> Default for History<T> {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_history_cannot_move() {
        let mut history: History<u32> = History::default();
        assert_eq!(history.undo(), None);
        assert_eq!(history.redo(), None);
        assert_eq!(history.cursor(), None);
    }

    #[test]
    fn test_undo_redo_round_trip() {
        let mut history = History::new(None);
        history.reset_to(1);
        history.record(2);
        history.record(3);

        assert_eq!(history.undo(), Some(2));
        assert_eq!(history.undo(), Some(1));
        assert_eq!(history.undo(), None);
        assert_eq!(history.cursor(), Some(0));

        assert_eq!(history.redo(), Some(2));
        assert_eq!(history.redo(), Some(3));
        assert_eq!(history.redo(), None);
        assert_eq!(history.cursor(), Some(2));
    }

    #[test]
    fn test_record_after_undo_truncates_branch() {
        let mut history = History::new(None);
        history.reset_to("a");
        history.record("b");
        history.record("c");
        history.undo();
        history.undo();

        history.record("d");
        assert_eq!(history.entries(), &["a", "d"]);
        assert!(!history.can_redo());
        assert_eq!(history.redo(), None);
    }

    #[test]
    fn test_record_on_empty_history_starts_at_zero() {
        let mut history = History::new(None);
        history.record(7);
        assert_eq!(history.cursor(), Some(0));
        assert!(!history.can_undo());
    }

    #[test]
    fn test_limit_drops_oldest() {
        let mut history = History::new(Some(3));
        history.reset_to(0);
        for i in 1..=5 {
            history.record(i);
        }
        assert_eq!(history.entries(), &[3, 4, 5]);
        assert_eq!(history.cursor(), Some(2));
        assert_eq!(history.undo(), Some(4));
    }
}
