mod common;

use std::sync::Arc;

use survey_board_back::{
    dao::{
        doc_store::{DocumentStore, to_fields},
        models::{GameStateEntity, game_state_key},
    },
    services::{lifecycle_service, navigation_service, reveal_service},
    state::{
        game::{GamePhase, Round},
        mirror::GameMirror,
    },
};

use common::{SYNC, catalogue, fixture};

fn current_of(mirror: &GameMirror) -> Option<(String, u32, Vec<bool>)> {
    mirror.current_question().map(|(id, question)| {
        let revealed = question.answers.iter().map(|answer| answer.revealed).collect();
        (id, question.number, revealed)
    })
}

async fn converged(left: &GameMirror, right: &GameMirror) -> bool {
    let target = current_of(left);
    let phase = left.phase();
    let round = left.round();
    right
        .settle_questions(SYNC, |set| {
            set.current().map(|(id, question)| {
                (
                    id.to_owned(),
                    question.number,
                    question.answers.iter().map(|answer| answer.revealed).collect(),
                )
            }) == target
        })
        .await
        && right
            .settle_game(SYNC, |p, r| p == phase && r == round)
            .await
}

#[tokio::test]
async fn independent_mirrors_agree_after_every_operation() {
    let fx = fixture(1, 1, catalogue()).await;
    let observer = GameMirror::new();
    observer
        .attach(Arc::new(fx.store.clone()) as Arc<dyn DocumentStore>)
        .await;
    assert!(converged(fx.state.mirror(), &observer).await);

    navigation_service::advance(&fx.state).await.unwrap();
    assert!(converged(fx.state.mirror(), &observer).await);
    assert_eq!(current_of(&observer).map(|(_, number, _)| number), Some(2));

    reveal_service::reveal(&fx.state, 3).await.unwrap();
    assert!(converged(fx.state.mirror(), &observer).await);
    assert_eq!(
        current_of(&observer).map(|(_, _, revealed)| revealed),
        Some(vec![false, false, true])
    );

    lifecycle_service::change_round(&fx.state, Round::new(2).unwrap())
        .await
        .unwrap();
    assert!(converged(fx.state.mirror(), &observer).await);
    assert_eq!(observer.phase(), Some(GamePhase::Lobby));
    assert_eq!(
        current_of(&observer).map(|(id, _, _)| id),
        Some("r2-q1".to_owned())
    );

    observer.detach().await;
}

#[tokio::test]
async fn external_writes_reach_every_mirror() {
    let fx = fixture(0, 1, catalogue()).await;
    let observer = GameMirror::new();
    observer
        .attach(Arc::new(fx.store.clone()) as Arc<dyn DocumentStore>)
        .await;

    // Another client switches the round behind our back.
    fx.store
        .update_fields(
            game_state_key(),
            to_fields(&GameStateEntity { state: 1, round: 3 }).unwrap(),
        )
        .await
        .unwrap();

    let round = Round::new(3).ok();
    for mirror in [fx.state.mirror(), &observer] {
        assert!(
            mirror
                .settle_game(SYNC, |phase, r| phase == Some(GamePhase::Active) && r == round)
                .await
        );
        assert!(
            mirror
                .settle_questions(SYNC, |set| set.round() == round
                    && set.current_id() == Some("r3-q1"))
                .await
        );
    }
    observer.detach().await;
}
