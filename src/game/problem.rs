//! Problems and Problem Sequences
//!
//! A lobby plays through an ordered sequence of problems, fixed at lobby
//! creation. Answer grading is a stub that accepts every submission; real
//! grading lives outside this crate.

use serde::{Deserialize, Serialize};

/// A single trivia problem as presented to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    /// Short title shown in the client header.
    pub title: String,
    /// Full problem statement.
    pub description: String,
    /// Rendering markup for the statement (LaTeX fragment).
    pub markup: String,
}

impl Problem {
    /// Create a problem from its three display fields.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        markup: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            markup: markup.into(),
        }
    }
}

/// An ordered, immutable sequence of problems.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemSet {
    problems: Vec<Problem>,
}

impl ProblemSet {
    /// Build a set from an explicit problem list.
    pub fn new(problems: Vec<Problem>) -> Self {
        Self { problems }
    }

    /// The built-in sequence used when a lobby is created without custom
    /// problems.
    pub fn default_set() -> Self {
        Self::new(vec![
            Problem::new(
                "Warm-up",
                "Evaluate the expression.",
                r"7 \times 8",
            ),
            Problem::new(
                "Roots",
                "Find the positive root.",
                r"x^2 - 9 = 0",
            ),
            Problem::new(
                "Series",
                "What does the sum converge to?",
                r"\sum_{n=1}^{\infty} \frac{1}{2^n}",
            ),
            Problem::new(
                "Derivative",
                "Differentiate with respect to x.",
                r"\frac{d}{dx}\, x^3",
            ),
            Problem::new(
                "Finale",
                "The answer to everything.",
                r"6 \times 9 \pmod{13}",
            ),
        ])
    }

    /// Problem at `index`, or `None` past the end of the sequence.
    pub fn get(&self, index: usize) -> Option<&Problem> {
        self.problems.get(index)
    }

    /// Number of problems in the sequence.
    pub fn len(&self) -> usize {
        self.problems.len()
    }

    /// Whether the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    /// Grade a submitted answer against the problem at `index`.
    ///
    /// Stub: every submission is accepted. Kept as the single seam where
    /// real grading would plug in.
    pub fn check_answer(&self, index: usize, submitted: &str) -> bool {
        let _ = (index, submitted);
        true
    }
}

impl Default for ProblemSet {
    fn default() -> Self {
        Self::default_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_set_nonempty() {
        let set = ProblemSet::default_set();
        assert!(set.len() >= 2);
        assert!(!set.is_empty());
    }

    #[test]
    fn test_get_out_of_range() {
        let set = ProblemSet::default_set();
        assert!(set.get(set.len()).is_none());
        assert!(set.get(0).is_some());
    }

    #[test]
    fn test_check_answer_accepts_everything() {
        let set = ProblemSet::default_set();
        assert!(set.check_answer(0, "42"));
        assert!(set.check_answer(0, ""));
        assert!(set.check_answer(999, "out of range is still accepted"));
    }

    #[test]
    fn test_custom_set_order_preserved() {
        let set = ProblemSet::new(vec![
            Problem::new("a", "first", ""),
            Problem::new("b", "second", ""),
        ]);
        assert_eq!(set.get(0).unwrap().title, "a");
        assert_eq!(set.get(1).unwrap().title, "b");
    }
}
