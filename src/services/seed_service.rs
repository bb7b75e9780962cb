//! First-run seeding of the singleton game state and the question catalogue.

use std::{collections::HashSet, io::ErrorKind, path::Path, sync::Arc};

use serde::Deserialize;
use tracing::{info, warn};
use validator::{Validate, ValidationError};

use crate::{
    dao::{
        doc_store::{DocumentStore, Filter, to_fields},
        models::{
            AnswerEntity, GameStateEntity, QUESTION_COLLECTION, QuestionEntity, game_state_key,
            question_key,
        },
    },
    error::ServiceError,
    state::game::GameState,
};

/// Question catalogue file.
#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "unique_positions"))]
pub struct SeedCatalogue {
    #[validate(nested)]
    pub questions: Vec<SeedQuestion>,
}

/// One question of the catalogue.
#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "unique_tops"))]
pub struct SeedQuestion {
    #[validate(range(min = 1, max = 3))]
    pub round: u8,
    #[validate(range(min = 1))]
    pub number: u32,
    #[validate(length(min = 1))]
    pub question: String,
    #[validate(nested)]
    pub answers: Vec<SeedAnswer>,
}

/// One ranked answer of the catalogue.
#[derive(Debug, Deserialize, Validate)]
pub struct SeedAnswer {
    #[validate(range(min = 1))]
    pub top: u32,
    pub title: String,
    pub score: i32,
}

/// What seeding created.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub game_state_created: bool,
    pub questions_created: usize,
}

fn unique_positions(catalogue: &SeedCatalogue) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for question in &catalogue.questions {
        if !seen.insert((question.round, question.number)) {
            let mut err = ValidationError::new("duplicate_question");
            err.message = Some(
                format!(
                    "question {} of round {} is defined twice",
                    question.number, question.round
                )
                .into(),
            );
            return Err(err);
        }
    }
    Ok(())
}

/// `top` identifies an answer within its question.
fn unique_tops(question: &SeedQuestion) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    match question.answers.iter().find(|answer| !seen.insert(answer.top)) {
        Some(duplicate) => {
            let mut err = ValidationError::new("duplicate_answer");
            err.message = Some(
                format!(
                    "answer {} of question {} in round {} is defined twice",
                    duplicate.top, question.number, question.round
                )
                .into(),
            );
            Err(err)
        }
        None => Ok(()),
    }
}

/// Document id of a seeded question.
pub fn seed_question_id(round: u8, number: u32) -> String {
    format!("r{round}-q{number}")
}

/// Create whatever is missing: the game state document, and the catalogue when the
/// question collection is empty.
pub async fn ensure_seeded(
    store: &Arc<dyn DocumentStore>,
    seed_path: Option<&Path>,
) -> Result<SeedReport, ServiceError> {
    let mut report = SeedReport::default();

    if store.get(game_state_key()).await?.is_none() {
        let fields = to_fields(&GameStateEntity::from(GameState::initial()))?;
        store.put(game_state_key(), fields).await?;
        report.game_state_created = true;
        info!("seeded initial game state");
    }

    let existing = store
        .query(QUESTION_COLLECTION.to_owned(), Filter::all())
        .await?;
    if !existing.is_empty() {
        return Ok(report);
    }

    let Some(path) = seed_path else {
        return Ok(report);
    };
    let Some(catalogue) = load_catalogue(path).await? else {
        return Ok(report);
    };
    report.questions_created = seed_catalogue(store, catalogue).await?;
    info!(
        path = %path.display(),
        questions = report.questions_created,
        "seeded question catalogue"
    );
    Ok(report)
}

/// Read and validate a catalogue; `None` when the file does not exist.
pub async fn load_catalogue(path: &Path) -> Result<Option<SeedCatalogue>, ServiceError> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "no seed catalogue found; skipping");
            return Ok(None);
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read seed catalogue");
            return Err(ServiceError::InvalidInput(format!(
                "cannot read {}: {err}",
                path.display()
            )));
        }
    };

    let catalogue: SeedCatalogue = serde_json::from_str(&contents)
        .map_err(|err| ServiceError::InvalidInput(format!("invalid seed catalogue: {err}")))?;
    catalogue.validate()?;
    Ok(Some(catalogue))
}

/// Write every catalogue question, question 1 of each round active.
pub async fn seed_catalogue(
    store: &Arc<dyn DocumentStore>,
    catalogue: SeedCatalogue,
) -> Result<usize, ServiceError> {
    let count = catalogue.questions.len();
    for question in catalogue.questions {
        let id = seed_question_id(question.round, question.number);
        let entity = QuestionEntity {
            number: question.number,
            question: question.question,
            answers: question
                .answers
                .into_iter()
                .map(|answer| AnswerEntity {
                    top: answer.top,
                    title: answer.title,
                    score: answer.score,
                    revealed: false,
                })
                .collect(),
            active: question.number == 1,
            round: question.round,
        };
        store.put(question_key(id), to_fields(&entity)?).await?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::dao::doc_store::memory::MemoryStore;

    fn catalogue(value: serde_json::Value) -> SeedCatalogue {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn duplicate_positions_are_rejected() {
        let catalogue = catalogue(json!({"questions": [
            {"round": 1, "number": 1, "question": "a", "answers": []},
            {"round": 1, "number": 1, "question": "b", "answers": []},
        ]}));
        assert!(catalogue.validate().is_err());
    }

    #[test]
    fn duplicate_answer_ranks_are_rejected() {
        let catalogue = catalogue(json!({"questions": [
            {"round": 2, "number": 1, "question": "a", "answers": [
                {"top": 1, "title": "x", "score": 5},
                {"top": 2, "title": "y", "score": 3},
                {"top": 1, "title": "z", "score": 1},
            ]},
        ]}));
        assert!(catalogue.validate().is_err());
    }

    #[test]
    fn the_bundled_catalogue_is_valid() {
        let raw = std::fs::read_to_string(
            Path::new(env!("CARGO_MANIFEST_DIR")).join("config/seed.json"),
        )
        .unwrap();
        let catalogue: SeedCatalogue = serde_json::from_str(&raw).unwrap();
        catalogue.validate().unwrap();
    }

    #[test]
    fn out_of_range_rounds_are_rejected() {
        let catalogue = catalogue(json!({"questions": [
            {"round": 4, "number": 1, "question": "a", "answers": []},
        ]}));
        assert!(catalogue.validate().is_err());
    }

    #[tokio::test]
    async fn seeds_game_state_and_catalogue_once() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let catalogue = catalogue(json!({"questions": [
            {"round": 1, "number": 1, "question": "a", "answers": [{"top": 1, "title": "x", "score": 3}]},
            {"round": 1, "number": 2, "question": "b", "answers": []},
        ]}));

        assert!(ensure_seeded(&store, None).await.unwrap().game_state_created);
        assert_eq!(seed_catalogue(&store, catalogue).await.unwrap(), 2);

        let first = store
            .get(question_key(seed_question_id(1, 1)))
            .await
            .unwrap()
            .unwrap()
            .decode::<QuestionEntity>()
            .unwrap();
        assert!(first.active);
        assert!(!first.answers[0].revealed);

        let report = ensure_seeded(&store, Some(Path::new("does/not/exist.json")))
            .await
            .unwrap();
        assert_eq!(report, SeedReport::default());
    }

    #[tokio::test]
    async fn missing_catalogue_file_is_skipped() {
        let loaded = load_catalogue(Path::new("does/not/exist.json")).await.unwrap();
        assert!(loaded.is_none());
    }
}
