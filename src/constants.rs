//! Configuration constants for the Qwiz client core
//!
//! This module contains the limits, scoring constants and fallback values
//! used throughout the crate so that the round machine, the aggregator and
//! the validation layer agree on the same boundaries.

/// Scoring constants applied at the end of every round
pub mod scoring {
    /// Points awarded for any correct answer
    pub const BASE_SCORE: u64 = 600;
    /// Maximum extra points for answering immediately after publication
    pub const SPEED_BONUS_MAX: u64 = 400;
    /// Number of leaderboard rows broadcast and displayed
    pub const TOP_LIMIT: usize = 10;
}

/// Round timing constants
pub mod round {
    /// Round duration of the primary lecturer flow in milliseconds
    pub const DEFAULT_ROUND_MS: u64 = 15_000;
    /// Grace added to the deadline alarm to absorb near-simultaneous final answers
    pub const DEADLINE_GRACE_MS: u64 = 50;
    /// Interval of the countdown re-render tick
    pub const TICK_MS: u64 = 1_000;
}

/// Multiple choice question limits
pub mod mcq {
    /// Minimum number of options in a question
    pub const MIN_OPTION_COUNT: usize = 2;
    /// Maximum number of options in a question
    pub const MAX_OPTION_COUNT: usize = 6;
    /// Maximum length of the question text
    pub const MAX_QUESTION_LENGTH: usize = 500;
    /// Maximum length of an option's text
    pub const MAX_OPTION_LENGTH: usize = 200;
    /// Maximum number of options kept when converting a generated question
    pub const MAX_GENERATED_OPTIONS: usize = 4;
}

/// Session configuration values
pub mod session {
    /// Answer time used when the session config cannot be fetched
    pub const FALLBACK_ANSWER_TIME_SECONDS: u64 = 30;
    /// Transcription interval used when the session config cannot be fetched
    pub const FALLBACK_TRANSCRIPTION_INTERVAL_SECONDS: u64 = 5 * 60;
    /// Shortest interval between transcript flushes
    pub const MIN_TRANSCRIPTION_INTERVAL_SECONDS: u64 = 1;
    /// Answer times the backend accepts when creating a session
    pub const ACCEPTED_ANSWER_TIMES: [u64; 5] = [20, 30, 45, 60, 90];
    /// Transcription intervals (in minutes) the backend accepts when creating a session
    pub const ACCEPTED_TRANSCRIPTION_MINUTES: [f64; 5] = [0.33, 5.0, 7.0, 9.0, 12.0];
    /// Longest lecturer or course name accepted when creating a session
    pub const MAX_NAME_LENGTH: usize = 100;
    /// Largest index accepted by the question selection endpoint
    pub const MAX_SELECTED_QUESTION_INDEX: usize = 2;
}

/// Session code constraints
pub mod session_code {
    /// Length of codes issued by the backend
    pub const ISSUED_LENGTH: usize = 6;
    /// Shortest code the join flow accepts
    pub const MIN_LENGTH: usize = 3;
    /// Longest code the join flow accepts
    pub const MAX_LENGTH: usize = 12;
}

/// Nickname constraints
pub mod nickname {
    /// Shortest accepted nickname after trimming
    pub const MIN_LENGTH: usize = 2;
    /// Longest accepted nickname after trimming
    pub const MAX_LENGTH: usize = 50;
}
