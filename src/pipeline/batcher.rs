//! Order-preserving fixed-size batching of input skills

use super::models::{Batch, IndexedSkill, Skill};
use crate::error::{PipelineError, Result};

pub struct Batcher {
    batch_size: usize,
    budget_tokens: usize,
}

impl Batcher {
    pub fn new(batch_size: usize, budget_tokens: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(PipelineError::Configuration(
                "batch size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            batch_size,
            budget_tokens,
        })
    }

    /// Split skills into `ceil(N / batch_size)` batches, tagging each skill
    /// with its input position. The last batch may be smaller.
    pub fn batch(&self, skills: &[Skill]) -> Vec<Batch<IndexedSkill>> {
        let total = (skills.len() + self.batch_size - 1) / self.batch_size;

        skills
            .chunks(self.batch_size)
            .enumerate()
            .map(|(i, chunk)| {
                let offset = i * self.batch_size;
                Batch {
                    index: i + 1,
                    label: format!("Batch {}/{}", i + 1, total),
                    depth: 0,
                    budget_tokens: self.budget_tokens,
                    items: chunk
                        .iter()
                        .enumerate()
                        .map(|(j, skill)| IndexedSkill {
                            index: offset + j,
                            skill: skill.clone(),
                        })
                        .collect(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skills(n: usize) -> Vec<Skill> {
        (0..n).map(|i| format!("skill-{}", i)).collect()
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(Batcher::new(0, 1000).is_err());
    }

    #[test]
    fn test_batches_preserve_order() {
        let batcher = Batcher::new(3, 1000).unwrap();
        let batches = batcher.batch(&skills(9));

        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() == 3));
        let indices: Vec<usize> = batches
            .iter()
            .flat_map(|b| b.items.iter().map(|s| s.index))
            .collect();
        assert_eq!(indices, (0..9).collect::<Vec<_>>());
        assert_eq!(batches[1].label, "Batch 2/3");
        assert_eq!(batches[1].items[0].skill, "skill-3");
    }

    #[test]
    fn test_last_batch_may_be_smaller() {
        let batcher = Batcher::new(4, 1000).unwrap();
        let batches = batcher.batch(&skills(10));
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(batches[2].index, 3);
    }

    #[test]
    fn test_empty_input_yields_no_batches() {
        let batcher = Batcher::new(3, 1000).unwrap();
        assert!(batcher.batch(&[]).is_empty());
    }

    #[test]
    fn test_duplicates_stay_distinct() {
        let batcher = Batcher::new(2, 1000).unwrap();
        let input = vec!["Rust".to_string(), "Rust".to_string(), "Rust".to_string()];
        let batches = batcher.batch(&input);
        let indices: Vec<usize> = batches
            .iter()
            .flat_map(|b| b.items.iter().map(|s| s.index))
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
