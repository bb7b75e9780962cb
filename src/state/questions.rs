//! Per-round question set folded from live change batches.
//!
//! The store cannot flip two `active` flags atomically for every backend, so a
//! reader may observe zero or two active questions in a round for a while. The
//! fold below never fails on that: the most recently delivered activation wins,
//! and deactivating the current question falls back to the latest activation
//! still standing.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::warn;

use crate::{
    dao::{
        doc_store::{Change, ChangeKind},
        models::QuestionEntity,
    },
    state::game::{Question, Round},
};

/// Questions of one round plus the derived current-question pointer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuestionSet {
    round: Option<Round>,
    questions: IndexMap<String, Question>,
    current: Option<String>,
    activations: HashMap<String, u64>,
    sequence: u64,
    loaded: bool,
}

impl QuestionSet {
    /// Empty set waiting for the first batch of `round`.
    pub fn for_round(round: Round) -> Self {
        Self {
            round: Some(round),
            ..Self::default()
        }
    }

    /// Round this set was built for, `None` before the game state is known.
    pub fn round(&self) -> Option<Round> {
        self.round
    }

    /// Whether the initial snapshot of the round has been folded.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Number of questions in the round.
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// Whether the round has no question.
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Highest question number of the round.
    pub fn max_number(&self) -> Option<u32> {
        self.questions.values().map(|q| q.number).max()
    }

    /// The current question and its document id.
    pub fn current(&self) -> Option<(&str, &Question)> {
        let id = self.current.as_deref()?;
        self.questions.get(id).map(|question| (id, question))
    }

    /// Document id of the current question.
    pub fn current_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Questions sorted by number.
    pub fn ordered(&self) -> Vec<(&str, &Question)> {
        let mut ordered: Vec<_> = self
            .questions
            .iter()
            .map(|(id, question)| (id.as_str(), question))
            .collect();
        ordered.sort_by_key(|(_, question)| question.number);
        ordered
    }

    /// More than one question of the round is flagged active right now.
    pub fn has_active_conflict(&self) -> bool {
        self.questions.values().filter(|q| q.active).count() > 1
    }

    /// Fold every delta of a batch, in delivery order.
    pub fn apply_batch(&mut self, batch: &[Change]) {
        for change in batch {
            self.apply(change);
        }
        self.loaded = true;

        if self.has_active_conflict() {
            warn!(
                round = ?self.round,
                current = ?self.current,
                "more than one active question observed; keeping the latest activation"
            );
        }
    }

    fn apply(&mut self, change: &Change) {
        let id = change.document.id.as_str();

        if change.kind == ChangeKind::Removed {
            self.remove(id);
            return;
        }

        let question = match change
            .document
            .decode::<QuestionEntity>()
            .map_err(|err| err.to_string())
            .and_then(|entity| Question::try_from(entity).map_err(|err| err.to_string()))
        {
            Ok(question) => question,
            Err(error) => {
                warn!(id, %error, "ignoring malformed question document");
                return;
            }
        };

        if self.round.is_some_and(|round| round != question.round) {
            // Stale delivery from another round, or a question that moved away.
            self.remove(id);
            return;
        }

        let active = question.active;
        self.questions.insert(id.to_owned(), question);

        if active {
            self.sequence += 1;
            self.activations.insert(id.to_owned(), self.sequence);
            self.current = Some(id.to_owned());
        } else {
            self.activations.remove(id);
            if self.current.as_deref() == Some(id) {
                self.current = self.latest_activation();
            }
        }
    }

    fn remove(&mut self, id: &str) {
        self.questions.shift_remove(id);
        self.activations.remove(id);
        if self.current.as_deref() == Some(id) {
            self.current = self.latest_activation();
        }
    }

    fn latest_activation(&self) -> Option<String> {
        self.activations
            .iter()
            .max_by_key(|(_, sequence)| **sequence)
            .map(|(id, _)| id.clone())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::dao::doc_store::{Document, to_fields};

    fn doc(id: &str, round: u8, number: u32, active: bool) -> Document {
        Document {
            id: id.into(),
            fields: to_fields(&json!({
                "number": number,
                "question": format!("question {number}"),
                "answers": [{"top": 1, "title": "yes", "score": 10, "revealed": false}],
                "active": active,
                "round": round,
            }))
            .unwrap(),
        }
    }

    fn added(id: &str, round: u8, number: u32, active: bool) -> Change {
        Change::new(ChangeKind::Added, doc(id, round, number, active))
    }

    fn modified(id: &str, round: u8, number: u32, active: bool) -> Change {
        Change::new(ChangeKind::Modified, doc(id, round, number, active))
    }

    fn round(value: u8) -> Round {
        Round::new(value).unwrap()
    }

    #[test]
    fn initial_snapshot_exposes_active_question() {
        let mut set = QuestionSet::for_round(round(1));
        assert!(!set.is_loaded());

        set.apply_batch(&[
            added("q2", 1, 2, false),
            added("q1", 1, 1, true),
            added("q3", 1, 3, false),
        ]);

        assert!(set.is_loaded());
        assert_eq!(set.len(), 3);
        assert_eq!(set.max_number(), Some(3));
        assert_eq!(set.current().map(|(id, q)| (id, q.number)), Some(("q1", 1)));
        let numbers: Vec<_> = set.ordered().into_iter().map(|(_, q)| q.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn navigation_batch_folds_every_delta() {
        let mut set = QuestionSet::for_round(round(1));
        set.apply_batch(&[added("q1", 1, 1, true), added("q2", 1, 2, false)]);

        set.apply_batch(&[modified("q1", 1, 1, false), modified("q2", 1, 2, true)]);
        assert_eq!(set.current_id(), Some("q2"));
        assert!(!set.has_active_conflict());
    }

    #[test]
    fn activation_before_deactivation_keeps_new_question() {
        let mut set = QuestionSet::for_round(round(1));
        set.apply_batch(&[added("q1", 1, 1, true), added("q2", 1, 2, false)]);

        set.apply_batch(&[modified("q2", 1, 2, true)]);
        assert!(set.has_active_conflict());
        assert_eq!(set.current_id(), Some("q2"));

        set.apply_batch(&[modified("q1", 1, 1, false)]);
        assert_eq!(set.current_id(), Some("q2"));
    }

    #[test]
    fn deactivation_in_a_separate_batch_leaves_no_current() {
        let mut set = QuestionSet::for_round(round(1));
        set.apply_batch(&[added("q1", 1, 1, true), added("q2", 1, 2, false)]);

        set.apply_batch(&[modified("q1", 1, 1, false)]);
        assert_eq!(set.current(), None);

        set.apply_batch(&[modified("q2", 1, 2, true)]);
        assert_eq!(set.current_id(), Some("q2"));
    }

    #[test]
    fn last_write_wins_and_falls_back_to_latest_standing_activation() {
        let mut set = QuestionSet::for_round(round(1));
        set.apply_batch(&[
            added("q1", 1, 1, true),
            added("q2", 1, 2, true),
            added("q3", 1, 3, true),
        ]);
        assert_eq!(set.current_id(), Some("q3"));

        set.apply_batch(&[modified("q3", 1, 3, false)]);
        assert_eq!(set.current_id(), Some("q2"));
    }

    #[test]
    fn other_round_documents_are_ignored() {
        let mut set = QuestionSet::for_round(round(2));
        set.apply_batch(&[added("q1", 1, 1, true), added("r2q1", 2, 1, true)]);

        assert_eq!(set.len(), 1);
        assert_eq!(set.current_id(), Some("r2q1"));
    }

    #[test]
    fn removing_current_question_clears_pointer() {
        let mut set = QuestionSet::for_round(round(1));
        set.apply_batch(&[added("q1", 1, 1, true)]);
        set.apply_batch(&[Change::new(ChangeKind::Removed, doc("q1", 1, 1, true))]);

        assert!(set.is_empty());
        assert_eq!(set.current(), None);
    }

    #[test]
    fn malformed_documents_are_skipped() {
        let mut set = QuestionSet::for_round(round(1));
        let broken = Change::new(
            ChangeKind::Added,
            Document {
                id: "bad".into(),
                fields: to_fields(&json!({"number": "one"})).unwrap(),
            },
        );
        set.apply_batch(&[broken, added("q1", 1, 1, true)]);

        assert_eq!(set.len(), 1);
        assert_eq!(set.current_id(), Some("q1"));
    }
}
