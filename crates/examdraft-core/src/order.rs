//! Question display order.
//!
//! The order is planned once, when an attempt is first started, and persisted
//! in the draft. Every later read, including after a reload, uses the stored
//! order so the user never sees questions move.

use rand::seq::SliceRandom;
use rand::Rng;

/// Plans the per-attempt display order of questions.
pub struct QuestionOrderPlanner;

impl QuestionOrderPlanner {
    /// Plan a fresh order with the thread-local RNG.
    ///
    /// Returns `None` when shuffling was not requested: the display order is
    /// then the identity and nothing is stored.
    pub fn plan(question_count: usize, shuffle: bool) -> Option<Vec<usize>> {
        Self::plan_with(question_count, shuffle, &mut rand::thread_rng())
    }

    pub fn plan_with<R: Rng + ?Sized>(
        question_count: usize,
        shuffle: bool,
        rng: &mut R,
    ) -> Option<Vec<usize>> {
        if !shuffle {
            return None;
        }
        let mut order: Vec<usize> = (0..question_count).collect();
        order.shuffle(rng);
        Some(order)
    }

    /// The order questions are shown in, given the stored permutation.
    pub fn display_order(question_count: usize, shuffled: Option<&[usize]>) -> Vec<usize> {
        match shuffled {
            Some(order) => order.to_vec(),
            None => (0..question_count).collect(),
        }
    }

    /// Fit a stored order to a changed question count without reshuffling.
    ///
    /// Indices that no longer exist are dropped and new indices are appended
    /// in ascending order, so the relative order of surviving questions holds.
    pub fn reconcile(order: &[usize], question_count: usize) -> Vec<usize> {
        let mut seen = vec![false; question_count];
        let mut reconciled = Vec::with_capacity(question_count);
        for &index in order {
            if index < question_count && !seen[index] {
                seen[index] = true;
                reconciled.push(index);
            }
        }
        reconciled.extend((0..question_count).filter(|&i| !seen[i]));
        reconciled
    }
}

/// Whether `order` is a permutation of `[0, n)`.
pub fn is_permutation(order: &[usize], n: usize) -> bool {
    if order.len() != n {
        return false;
    }
    let mut seen = vec![false; n];
    for &index in order {
        if index >= n || seen[index] {
            return false;
        }
        seen[index] = true;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn no_shuffle_means_no_stored_order() {
        assert_eq!(QuestionOrderPlanner::plan(5, false), None);
        assert_eq!(
            QuestionOrderPlanner::display_order(3, None),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn shuffle_produces_permutation() {
        for n in 0..20 {
            let order = QuestionOrderPlanner::plan(n, true).unwrap();
            assert!(is_permutation(&order, n), "not a permutation: {order:?}");
        }
    }

    #[test]
    fn seeded_plans_are_reproducible() {
        let a = QuestionOrderPlanner::plan_with(10, true, &mut StdRng::seed_from_u64(7));
        let b = QuestionOrderPlanner::plan_with(10, true, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    #[test]
    fn reconcile_keeps_relative_order() {
        let order = vec![4, 1, 3, 0, 2];
        assert_eq!(QuestionOrderPlanner::reconcile(&order, 3), vec![1, 0, 2]);
        assert_eq!(
            QuestionOrderPlanner::reconcile(&[2, 0, 1], 5),
            vec![2, 0, 1, 3, 4]
        );
        assert_eq!(QuestionOrderPlanner::reconcile(&order, 5), order);
    }

    #[test]
    fn permutation_check() {
        assert!(is_permutation(&[2, 0, 1], 3));
        assert!(!is_permutation(&[0, 0, 1], 3));
        assert!(!is_permutation(&[0, 1], 3));
        assert!(!is_permutation(&[0, 1, 3], 3));
        assert!(is_permutation(&[], 0));
    }
}
