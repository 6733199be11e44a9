//! Leaderboard and scoring functionality
//!
//! This module turns the answers of a finished round into per-student score
//! deltas, merges them into the cumulative totals, and produces the sorted
//! leaderboard views. [`aggregate`] is a pure function with no transport or
//! timer involvement; [`Leaderboard`] keeps the running totals and the
//! per-round history on top of it.
//!
//! Equal scores are ordered by who reached that score first (earlier round,
//! then earlier answer), then by name, so every view is deterministic.

use std::collections::HashMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    TruncatedVec,
    constants::scoring::{BASE_SCORE, SPEED_BONUS_MAX, TOP_LIMIT},
    mcq::{Answer, Mcq},
};

/// One displayed leaderboard entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaderboardRow {
    /// Student nickname, unique within a session
    pub name: String,
    /// Cumulative score
    pub score: u64,
}

impl LeaderboardRow {
    /// Creates a row
    pub fn new(name: impl Into<String>, score: u64) -> Self {
        Self {
            name: name.into(),
            score,
        }
    }
}

/// Number of answers an option received in a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionCount {
    /// Identifier of the option
    pub option_id: String,
    /// Number of recorded answers for it
    pub count: usize,
}

/// Calculates the score a single answer earns
///
/// A correct answer earns [`BASE_SCORE`] plus a speed bonus proportional to
/// the time remaining before the deadline, up to [`SPEED_BONUS_MAX`]. The
/// remaining time is floored at zero (answers inside the grace window after
/// the deadline earn the base score only) and capped at the round duration.
/// Incorrect answers earn nothing.
///
/// # Examples
///
/// ```rust
/// use qwiz::leaderboard::score_delta;
///
/// assert_eq!(score_delta(true, 15_000, 7_500, 15_000), 800);
/// assert_eq!(score_delta(false, 15_000, 0, 15_000), 0);
/// ```
pub fn score_delta(correct: bool, deadline_ms: u64, responded_at_ms: u64, round_ms: u64) -> u64 {
    if !correct {
        return 0;
    }
    if round_ms == 0 {
        return BASE_SCORE;
    }

    let remaining = deadline_ms.saturating_sub(responded_at_ms).min(round_ms);
    let bonus = (remaining as f64 / round_ms as f64 * SPEED_BONUS_MAX as f64).round() as u64;

    BASE_SCORE + bonus
}

/// Counts the answers per declared option
///
/// Every declared option is present in declaration order, zero-filled when
/// nobody picked it. Answers naming an undeclared option are not counted.
pub fn tally(mcq: &Mcq, answers: &[Answer]) -> Vec<OptionCount> {
    let counts = answers.iter().map(|a| a.option_id.as_str()).counts();

    mcq.options
        .iter()
        .map(|option| OptionCount {
            option_id: option.id.clone(),
            count: counts.get(option.id.as_str()).copied().unwrap_or(0),
        })
        .collect_vec()
}

/// Cumulative score of one student plus the moment it was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Standing {
    score: u64,
    /// (round deadline, answer time) at which `score` was first reached
    reached: (u64, u64),
}

/// Cumulative scores keyed by nickname
///
/// This is the full state of the leaderboard; the top-10 view is derived
/// from it and never replaces it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Totals {
    standings: HashMap<String, Standing>,
}

impl Totals {
    /// Builds totals from plain `(name, score)` pairs
    ///
    /// Pairs are treated as reached in iteration order.
    pub fn from_scores<I, S>(scores: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        Self {
            standings: scores
                .into_iter()
                .enumerate()
                .map(|(i, (name, score))| {
                    (
                        name.into(),
                        Standing {
                            score,
                            reached: (0, i as u64),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Returns the total score of a student, if they have one
    pub fn get(&self, name: &str) -> Option<u64> {
        self.standings.get(name).map(|s| s.score)
    }

    /// Number of students with a recorded total
    pub fn len(&self) -> usize {
        self.standings.len()
    }

    /// Whether no student has a recorded total
    pub fn is_empty(&self) -> bool {
        self.standings.is_empty()
    }

    /// All totals, score descending with the deterministic tie-break
    pub fn sorted(&self) -> Vec<LeaderboardRow> {
        self.standings
            .iter()
            .sorted_by(|(name_a, a), (name_b, b)| {
                b.score
                    .cmp(&a.score)
                    .then(a.reached.cmp(&b.reached))
                    .then(name_a.cmp(name_b))
            })
            .map(|(name, standing)| LeaderboardRow::new(name.as_str(), standing.score))
            .collect_vec()
    }

    /// The top [`TOP_LIMIT`] rows together with the full student count
    pub fn top(&self) -> TruncatedVec<LeaderboardRow> {
        TruncatedVec::new(self.sorted().into_iter(), TOP_LIMIT, self.len())
    }

    fn add(&mut self, name: &str, delta: u64, reached: (u64, u64)) {
        let standing = self.standings.entry(name.to_owned()).or_insert(Standing {
            score: 0,
            reached,
        });
        if delta > 0 {
            standing.score += delta;
            standing.reached = reached;
        }
    }
}

/// Outcome of scoring one round
#[derive(Debug, Clone)]
pub struct Aggregate {
    /// Points earned this round per student, in first-answer order
    pub deltas: Vec<(String, u64)>,
    /// Previous totals plus this round's deltas
    pub totals: Totals,
    /// Top rows of the new totals
    pub top: TruncatedVec<LeaderboardRow>,
}

/// Scores a finished round against the previous totals
///
/// This function has no side effects: `previous` is left untouched and the
/// new totals are returned. Each answer is scored with [`score_delta`];
/// students that already had a total keep it when their delta is zero.
///
/// # Arguments
///
/// * `previous` - Totals before this round
/// * `answers` - The round's recorded answers (one per student)
/// * `mcq` - The question, used to judge correctness
/// * `deadline_ms` - Deadline of the round
/// * `round_ms` - Duration of the round
pub fn aggregate(
    previous: &Totals,
    answers: &[Answer],
    mcq: &Mcq,
    deadline_ms: u64,
    round_ms: u64,
) -> Aggregate {
    let mut deltas: Vec<(String, u64)> = Vec::with_capacity(answers.len());
    let mut totals = previous.clone();

    for answer in answers {
        let delta = score_delta(
            mcq.is_correct(&answer.option_id),
            deadline_ms,
            answer.responded_at_ms,
            round_ms,
        );

        match deltas.iter_mut().find(|(name, _)| *name == answer.student) {
            Some((_, existing)) => *existing += delta,
            None => deltas.push((answer.student.clone(), delta)),
        }

        totals.add(&answer.student, delta, (deadline_ms, answer.responded_at_ms));
    }

    let top = totals.top();

    Aggregate {
        deltas,
        totals,
        top,
    }
}

/// Score information for a single student
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct ScoreMessage {
    /// Total points earned by the student
    pub points: u64,
    /// Current position in the leaderboard (0-indexed)
    pub position: usize,
}

/// Summary of a whole session for the closing screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalSummary {
    /// For each round, (students who earned points, students who didn't)
    pub stats: Vec<(usize, usize)>,
    /// For each student, the points they earned in each round
    pub points: HashMap<String, Vec<u64>>,
}

/// Running leaderboard of a session
///
/// Only the round machine writes to it, once per finished round.
#[derive(Debug, Clone, Default)]
pub struct Leaderboard {
    /// Points earned by each student for each round
    points_earned: Vec<Vec<(String, u64)>>,
    /// Cumulative totals
    totals: Totals,
}

impl Leaderboard {
    /// Scores a finished round and folds it into the running totals
    ///
    /// # Returns
    ///
    /// The round's [`Aggregate`], whose `top` is the leaderboard to broadcast
    pub fn finish_round(
        &mut self,
        answers: &[Answer],
        mcq: &Mcq,
        deadline_ms: u64,
        round_ms: u64,
    ) -> Aggregate {
        let aggregate = aggregate(&self.totals, answers, mcq, deadline_ms, round_ms);

        self.points_earned.push(aggregate.deltas.clone());
        self.totals = aggregate.totals.clone();

        aggregate
    }

    /// The full totals
    pub fn totals(&self) -> &Totals {
        &self.totals
    }

    /// The top rows of the current totals
    pub fn top(&self) -> TruncatedVec<LeaderboardRow> {
        self.totals.top()
    }

    /// Number of rounds scored so far
    pub fn rounds(&self) -> usize {
        self.points_earned.len()
    }

    /// Gets the current score and position of a student
    ///
    /// # Returns
    ///
    /// `None` if the student never answered
    pub fn score(&self, name: &str) -> Option<ScoreMessage> {
        self.totals
            .sorted()
            .iter()
            .find_position(|row| row.name == name)
            .map(|(position, row)| ScoreMessage {
                points: row.score,
                position,
            })
    }

    /// Computes per-round participation and per-student point history
    ///
    /// Students missing from a round get zero for it.
    pub fn summary(&self) -> FinalSummary {
        let rounds = self.points_earned.len();

        let stats = self
            .points_earned
            .iter()
            .map(|earned| {
                let earned_count = earned.iter().filter(|(_, p)| *p > 0).count();
                (earned_count, earned.len() - earned_count)
            })
            .collect_vec();

        let mut points: HashMap<String, Vec<u64>> = HashMap::new();
        for (round, earned) in self.points_earned.iter().enumerate() {
            for (name, p) in earned {
                points.entry(name.clone()).or_insert_with(|| vec![0; rounds])[round] = *p;
            }
        }

        FinalSummary { stats, points }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcq::McqOption;

    const ROUND_MS: u64 = 15_000;
    const DEADLINE: u64 = 115_000;

    fn mcq() -> Mcq {
        Mcq {
            id: "m1".to_owned(),
            question: "Pick a".to_owned(),
            options: vec![
                McqOption::new("a", "A"),
                McqOption::new("b", "B"),
                McqOption::new("c", "C"),
                McqOption::new("d", "D"),
            ],
            correct_option_id: "a".to_owned(),
            explanation: None,
        }
    }

    fn answer(student: &str, option: &str, at: u64) -> Answer {
        Answer {
            student: student.to_owned(),
            option_id: option.to_owned(),
            responded_at_ms: at,
        }
    }

    #[test]
    fn test_score_half_round_remaining() {
        assert_eq!(score_delta(true, DEADLINE, DEADLINE - 7_500, ROUND_MS), 800);
    }

    #[test]
    fn test_score_incorrect_is_zero() {
        assert_eq!(score_delta(false, DEADLINE, DEADLINE - 7_500, ROUND_MS), 0);
        assert_eq!(score_delta(false, DEADLINE, DEADLINE - ROUND_MS, ROUND_MS), 0);
    }

    #[test]
    fn test_score_at_deadline_is_base() {
        assert_eq!(score_delta(true, DEADLINE, DEADLINE, ROUND_MS), 600);
    }

    #[test]
    fn test_score_inside_grace_is_not_negative() {
        assert_eq!(score_delta(true, DEADLINE, DEADLINE + 40, ROUND_MS), 600);
    }

    #[test]
    fn test_score_immediate_is_full() {
        assert_eq!(
            score_delta(true, DEADLINE, DEADLINE - ROUND_MS, ROUND_MS),
            1000
        );
    }

    #[test]
    fn test_score_bonus_is_capped() {
        assert_eq!(
            score_delta(true, DEADLINE, DEADLINE - 2 * ROUND_MS, ROUND_MS),
            1000
        );
    }

    #[test]
    fn test_tally_zero_fill() {
        let counts = tally(&mcq(), &[]);

        assert_eq!(
            counts,
            ["a", "b", "c", "d"]
                .iter()
                .map(|id| OptionCount {
                    option_id: (*id).to_owned(),
                    count: 0
                })
                .collect_vec()
        );
    }

    #[test]
    fn test_tally_counts_declared_options_only() {
        let answers = [
            answer("Ava", "a", 0),
            answer("Leo", "b", 0),
            answer("Mia", "a", 0),
            answer("Zed", "z", 0),
        ];
        let counts = tally(&mcq(), &answers);

        assert_eq!(counts[0].count, 2);
        assert_eq!(counts[1].count, 1);
        assert_eq!(counts[2].count, 0);
        assert_eq!(counts.len(), 4);
    }

    #[test]
    fn test_aggregate_adds_to_previous() {
        let previous = Totals::from_scores([("Ava", 500), ("Leo", 300)]);
        let answers = [answer("Ava", "a", DEADLINE), answer("Kai", "a", DEADLINE)];

        let result = aggregate(&previous, &answers, &mcq(), DEADLINE, ROUND_MS);

        assert_eq!(result.totals.get("Ava"), Some(1100));
        assert_eq!(result.totals.get("Leo"), Some(300));
        assert_eq!(result.totals.get("Kai"), Some(600));
        assert_eq!(previous.get("Ava"), Some(500));
        assert_eq!(
            result.deltas,
            vec![("Ava".to_owned(), 600), ("Kai".to_owned(), 600)]
        );
    }

    #[test]
    fn test_aggregate_records_zero_for_wrong_newcomer() {
        let result = aggregate(
            &Totals::default(),
            &[answer("Leo", "b", DEADLINE - 1_000)],
            &mcq(),
            DEADLINE,
            ROUND_MS,
        );

        assert_eq!(result.totals.get("Leo"), Some(0));
        assert_eq!(result.top.items(), &[LeaderboardRow::new("Leo", 0)]);
    }

    #[test]
    fn test_top_ten_truncation_keeps_all_totals() {
        let previous = Totals::from_scores((0..15).map(|i| (format!("s{i}"), i * 10)));
        let result = aggregate(&previous, &[], &mcq(), DEADLINE, ROUND_MS);

        assert_eq!(result.totals.len(), 15);
        assert_eq!(result.top.exact_count(), 15);
        assert_eq!(result.top.items().len(), 10);
        assert_eq!(result.top.items()[0], LeaderboardRow::new("s14", 140));
        assert_eq!(result.top.items()[9], LeaderboardRow::new("s5", 50));
        assert!(
            result
                .top
                .items()
                .windows(2)
                .all(|w| w[0].score > w[1].score)
        );
    }

    #[test]
    fn test_ties_go_to_first_to_reach_score() {
        let mut leaderboard = Leaderboard::default();

        // Round one: Zoe reaches 600 before Ada does in round two.
        leaderboard.finish_round(&[answer("Zoe", "a", 100_000)], &mcq(), 100_000, ROUND_MS);
        leaderboard.finish_round(&[answer("Ada", "a", 200_000)], &mcq(), 200_000, ROUND_MS);

        let top = leaderboard.top();
        assert_eq!(
            top.items(),
            &[LeaderboardRow::new("Zoe", 600), LeaderboardRow::new("Ada", 600)]
        );
    }

    #[test]
    fn test_ties_within_round_go_to_earlier_answer() {
        let answers = [
            answer("Zoe", "a", DEADLINE - 10),
            answer("Ada", "a", DEADLINE - 20),
        ];
        let mut leaderboard = Leaderboard::default();
        leaderboard.finish_round(&answers, &mcq(), DEADLINE, 1);

        assert_eq!(leaderboard.top().items()[0].name, "Ada");
    }

    #[test]
    fn test_scores_never_decrease() {
        let mut leaderboard = Leaderboard::default();
        let mut last = 0;

        for round in 0..5u64 {
            let deadline = DEADLINE + round * ROUND_MS;
            let option = if round % 2 == 0 { "a" } else { "b" };
            leaderboard.finish_round(
                &[answer("Ava", option, deadline - 1_000)],
                &mcq(),
                deadline,
                ROUND_MS,
            );
            let now = leaderboard.totals().get("Ava").unwrap();
            assert!(now >= last);
            last = now;
        }
        assert_eq!(leaderboard.rounds(), 5);
    }

    #[test]
    fn test_score_position() {
        let mut leaderboard = Leaderboard::default();
        leaderboard.finish_round(
            &[answer("Ava", "a", DEADLINE - ROUND_MS), answer("Leo", "b", DEADLINE)],
            &mcq(),
            DEADLINE,
            ROUND_MS,
        );

        assert_eq!(
            leaderboard.score("Ava"),
            Some(ScoreMessage {
                points: 1000,
                position: 0
            })
        );
        assert_eq!(leaderboard.score("Leo").map(|s| s.position), Some(1));
        assert!(leaderboard.score("Nobody").is_none());
    }

    #[test]
    fn test_summary_fills_missing_rounds() {
        let mut leaderboard = Leaderboard::default();
        leaderboard.finish_round(&[answer("Ava", "a", DEADLINE)], &mcq(), DEADLINE, ROUND_MS);
        leaderboard.finish_round(
            &[answer("Ava", "b", DEADLINE), answer("Leo", "a", DEADLINE)],
            &mcq(),
            DEADLINE,
            ROUND_MS,
        );

        let summary = leaderboard.summary();
        assert_eq!(summary.stats, vec![(1, 0), (1, 1)]);
        assert_eq!(summary.points["Ava"], vec![600, 0]);
        assert_eq!(summary.points["Leo"], vec![0, 600]);
    }
}
