//! Batch planner that partitions an ordered input into bounded batches

use std::fmt;

use featline_core::Record;

/// Ordered slice of the input, tagged with each member's original index.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T = Record> {
    pub index: usize,
    pub members: Vec<(usize, T)>,
}

impl<T> Batch<T> {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Original indices of the members, in order
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.members.iter().map(|(i, _)| *i)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    ZeroBatchSize,
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroBatchSize => write!(f, "batch size must be greater than zero"),
        }
    }
}

impl std::error::Error for PlanError {}

/// Split `items` into `ceil(N / batch_size)` batches without reordering.
pub fn plan<T>(items: Vec<T>, batch_size: usize) -> Result<Vec<Batch<T>>, PlanError> {
    if batch_size == 0 {
        return Err(PlanError::ZeroBatchSize);
    }
    let mut batches: Vec<Batch<T>> = Vec::with_capacity(items.len().div_ceil(batch_size));
    for (original, item) in items.into_iter().enumerate() {
        let full = batches.last().map_or(true, |b| b.members.len() >= batch_size);
        if full {
            batches.push(Batch {
                index: batches.len(),
                members: Vec::with_capacity(batch_size.min(1024)),
            });
        }
        if let Some(batch) = batches.last_mut() {
            batch.members.push((original, item));
        }
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_batch_size() {
        assert_eq!(plan(vec![1, 2], 0), Err(PlanError::ZeroBatchSize));
    }

    #[test]
    fn empty_input_no_batches() {
        assert!(plan(Vec::<u8>::new(), 10).unwrap().is_empty());
    }

    #[test]
    fn twenty_five_by_ten() {
        let batches = plan((0..25usize).collect::<Vec<_>>(), 10).unwrap();
        let sizes: Vec<_> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(batches[2].index, 2);
        assert_eq!(batches[2].indices().collect::<Vec<_>>(), (20..25).collect::<Vec<_>>());
    }

    #[test]
    fn partition_property() {
        for n in 0..40usize {
            for b in 1..12usize {
                let batches = plan((0..n).collect::<Vec<usize>>(), b).unwrap();
                assert_eq!(batches.len(), n.div_ceil(b), "n={n} b={b}");
                assert!(batches.iter().all(|x| x.len() <= b && !x.is_empty()));
                let flat: Vec<usize> = batches
                    .iter()
                    .flat_map(|x| x.members.iter().map(|(i, v)| {
                        assert_eq!(i, v);
                        *v
                    }))
                    .collect();
                assert_eq!(flat, (0..n).collect::<Vec<_>>());
                for (k, batch) in batches.iter().enumerate() {
                    assert_eq!(batch.index, k);
                }
            }
        }
    }
}
