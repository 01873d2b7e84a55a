use crate::calendar::SemesterCode;
use dashmap::DashMap;
use std::sync::Arc;

/// Serializes rebuilds and manual edits per semester so they never interleave.
#[derive(Debug, Default)]
pub struct SemesterLocks {
    locks: DashMap<SemesterCode, Arc<tokio::sync::Mutex<()>>>,
}

impl SemesterLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets or creates the lock for the given semester.
    pub fn get_semester_lock(&self, semester: SemesterCode) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(semester)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_semester_shares_lock() {
        let locks = SemesterLocks::new();
        let autumn = SemesterCode::new(2024, 1).unwrap();
        let spring = SemesterCode::new(2025, 2).unwrap();

        let first = locks.get_semester_lock(autumn);
        let again = locks.get_semester_lock(autumn);
        assert!(Arc::ptr_eq(&first, &again));

        let _held = first.lock().await;
        assert!(again.try_lock().is_err());
        assert!(locks.get_semester_lock(spring).try_lock().is_ok());
        assert_eq!(locks.len(), 2);
    }
}
