// tsflow-core/src/domain/dataset/mask.rs

/// Per-element outcome of a QC test: `true` marks an element that failed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FailureMask(Vec<bool>);

impl FailureMask {
    pub fn new(failed: Vec<bool>) -> Self {
        Self(failed)
    }

    pub fn passing(len: usize) -> Self {
        Self(vec![false; len])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn failed_count(&self) -> usize {
        self.0.iter().filter(|&&f| f).count()
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.0.iter().copied()
    }
}

impl From<Vec<bool>> for FailureMask {
    fn from(failed: Vec<bool>) -> Self {
        Self(failed)
    }
}

impl FromIterator<bool> for FailureMask {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts() {
        let mask: FailureMask = [false, true, true].into_iter().collect();
        assert_eq!(mask.failed_count(), 2);
        assert_eq!(mask.len(), 3);
        assert_eq!(FailureMask::passing(4).failed_count(), 0);
    }
}
