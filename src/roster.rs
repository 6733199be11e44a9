//! Connected student tracking
//!
//! The lecturer learns about students only through `student_joined` and
//! `student_left` frames. [`Roster`] folds those frames into the list of
//! currently connected students, in join order.

use itertools::Itertools;
use serde::Serialize;

use crate::{
    api::default_student_name,
    event::{Event, StudentJoined, StudentLeft},
};

/// A student currently connected to the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedStudent {
    /// Connection-scoped identifier assigned by the backend
    pub id: String,
    /// Display name
    pub name: String,
    /// When the join was observed
    pub joined_at_ms: u64,
}

/// Students connected to a session, in join order
#[derive(Debug, Clone, Default)]
pub struct Roster {
    students: Vec<ConnectedStudent>,
}

impl Roster {
    /// Creates an empty roster
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a join
    ///
    /// A repeated join for a known id only refreshes its name.
    ///
    /// # Returns
    ///
    /// Whether the student was not connected before
    pub fn join(&mut self, id: &str, name: Option<&str>, now_ms: u64) -> bool {
        let name = name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map_or_else(|| default_student_name(id), ToOwned::to_owned);

        if let Some(existing) = self.students.iter_mut().find(|s| s.id == id) {
            existing.name = name;
            return false;
        }

        self.students.push(ConnectedStudent {
            id: id.to_owned(),
            name,
            joined_at_ms: now_ms,
        });
        true
    }

    /// Records a departure
    ///
    /// # Returns
    ///
    /// The student that left, or `None` if it was not connected
    pub fn leave(&mut self, id: &str) -> Option<ConnectedStudent> {
        let (index, _) = self.students.iter().find_position(|s| s.id == id)?;
        Some(self.students.remove(index))
    }

    /// Folds a frame into the roster
    ///
    /// # Returns
    ///
    /// Whether the roster changed; other frames leave it untouched
    pub fn apply(&mut self, event: &Event, now_ms: u64) -> bool {
        let Event::Passthrough(raw) = event else {
            return false;
        };

        if let Some(joined) = raw.view::<StudentJoined>("student_joined") {
            let before = self.students.clone();
            self.join(
                &joined.student_id,
                joined.student_name.as_deref(),
                now_ms,
            );
            return before != self.students;
        }
        if let Some(left) = raw.view::<StudentLeft>("student_left") {
            return self.leave(&left.student_id).is_some();
        }
        false
    }

    /// Connected students in join order
    pub fn students(&self) -> &[ConnectedStudent] {
        &self.students
    }

    /// Number of connected students
    pub fn len(&self) -> usize {
        self.students.len()
    }

    /// Whether nobody is connected
    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    /// Forgets everyone
    pub fn clear(&mut self) {
        self.students.clear();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn joined(id: &str, name: Option<&str>) -> Event {
        Event::from_value(json!({
            "type": "student_joined",
            "student_id": id,
            "student_name": name,
        }))
        .unwrap()
    }

    fn left(id: &str) -> Event {
        Event::from_value(json!({"type": "student_left", "student_id": id})).unwrap()
    }

    #[test]
    fn test_join_and_leave_in_order() {
        let mut roster = Roster::new();

        assert!(roster.apply(&joined("s-1", Some("Ava")), 10));
        assert!(roster.apply(&joined("s-2", Some("Leo")), 20));
        assert_eq!(roster.len(), 2);
        assert_eq!(
            roster.students().iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            vec!["Ava", "Leo"]
        );

        assert!(roster.apply(&left("s-1"), 30));
        assert_eq!(roster.students()[0].id, "s-2");
        assert!(!roster.apply(&left("s-1"), 40));
    }

    #[test]
    fn test_nameless_join_gets_default_name() {
        let mut roster = Roster::new();
        roster.apply(&joined("stu_8c21f0a9", None), 0);

        assert_eq!(roster.students()[0].name, "Student f0a9");
    }

    #[test]
    fn test_rejoin_refreshes_name_only() {
        let mut roster = Roster::new();
        assert!(roster.join("s-1", None, 5));
        assert!(!roster.join("s-1", Some("Ava"), 50));

        assert_eq!(roster.len(), 1);
        assert_eq!(roster.students()[0].name, "Ava");
        assert_eq!(roster.students()[0].joined_at_ms, 5);

        assert!(!roster.apply(&joined("s-1", Some("Ava")), 60));
    }

    #[test]
    fn test_ignores_other_frames() {
        let mut roster = Roster::new();
        let other = Event::from_value(json!({"type": "transcript_chunk", "chunk": "x"})).unwrap();

        assert!(!roster.apply(&other, 0));
        assert!(roster.is_empty());
    }
}
