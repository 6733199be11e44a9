//! # Qwiz Client Library
//!
//! This library provides the client-side core of the Qwiz live classroom
//! quiz. It keeps lecturers and students in sync over one session: the
//! event vocabulary, the socket transport, a local event bus, the round
//! state machine, and the scoring that turns answers into a leaderboard.
//! Question generation, persistence and authoritative scoring live in the
//! backend, which is reached through [`api`] and [`transport`].

#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::ignored_unit_patterns)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]
use derive_where::derive_where;
use itertools::Itertools;
use serde::Serialize;

pub mod constants;

pub mod api;
pub mod bus;
pub mod config;
pub mod context;
pub mod driver;
pub mod event;
pub mod leaderboard;
pub mod mcq;
pub mod names;
pub mod roster;
pub mod round;
pub mod scheduler;
pub mod session;
pub mod session_code;
pub mod transcript;
pub mod transport;

/// The first few items of a ranking together with the size of the whole ranking
///
/// The leaderboard shows only its top rows but still reports how many
/// students are ranked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[derive_where(Default)]
pub struct TruncatedVec<T> {
    /// Size of the whole ranking
    exact_count: usize,
    /// Items kept for display
    items: Vec<T>,
}

impl<T: Clone> TruncatedVec<T> {
    /// Keeps the first `limit` items of `list`
    ///
    /// # Arguments
    ///
    /// * `list` - Ranked items, best first
    /// * `limit` - How many items to keep
    /// * `exact_count` - Size of the whole ranking, usually larger than `limit`
    pub fn new<I: Iterator<Item = T>>(list: I, limit: usize, exact_count: usize) -> Self {
        let items = list.take(limit).collect_vec();
        Self { exact_count, items }
    }

    /// Converts every kept item
    pub fn map<F, U>(self, f: F) -> TruncatedVec<U>
    where
        F: Fn(T) -> U,
    {
        TruncatedVec {
            exact_count: self.exact_count,
            items: self.items.into_iter().map(f).collect_vec(),
        }
    }

    /// Size of the whole ranking
    pub fn exact_count(&self) -> usize {
        self.exact_count
    }

    /// Items kept for display
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Consumes the vector, keeping only the items
    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_vec_new() {
        let truncated = TruncatedVec::new(["Ava", "Leo", "Mia", "Noa"].into_iter(), 3, 4);

        assert_eq!(truncated.exact_count(), 4);
        assert_eq!(truncated.items(), &["Ava", "Leo", "Mia"]);
    }

    #[test]
    fn test_truncated_vec_limit_larger_than_items() {
        let truncated = TruncatedVec::new([1, 2].into_iter(), 10, 2);

        assert_eq!(truncated.clone().into_items(), vec![1, 2]);
        assert_eq!(truncated.exact_count(), 2);
    }

    #[test]
    fn test_truncated_vec_default_is_empty() {
        let truncated = TruncatedVec::<String>::default();

        assert_eq!(truncated.exact_count(), 0);
        assert!(truncated.items().is_empty());
    }

    #[test]
    fn test_truncated_vec_map_keeps_count() {
        let truncated = TruncatedVec::new([800_u64, 600].into_iter(), 1, 2);
        let mapped = truncated.map(|score| format!("{score} pts"));

        assert_eq!(mapped.exact_count(), 2);
        assert_eq!(mapped.items(), &["800 pts".to_owned()]);
    }
}
