use std::sync::Arc;

use encore_collab::{
    Collab, EventVisibility, MemoryDatabase, NewEvent, PrimaryKey, Room, VoteKind,
};
use futures_util::StreamExt;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

const HOST: PrimaryKey = 1;
const GUEST: PrimaryKey = 2;

async fn collab_with_event(title: &str) -> (Collab, PrimaryKey) {
    let database = Arc::new(MemoryDatabase::new());
    let collab = Collab::new(database);

    let event = collab
        .create_event(NewEvent {
            title: title.to_string(),
            visibility: EventVisibility::Public,
            geofence: None,
            voting_starts_at: None,
            voting_ends_at: None,
            max_votes_per_user: None,
            created_by: HOST,
        })
        .await
        .expect("event is created");

    (collab, event.id)
}

#[tokio::test]
async fn test_vote_then_reorder_scenario() {
    let (collab, event_id) = collab_with_event("friday session").await;

    let mut tracks = Vec::new();

    for reference in ["track:1", "track:2", "track:3"] {
        let track = collab
            .playlists
            .add_track(HOST, event_id, reference.to_string(), None)
            .await
            .expect("track is added");

        tracks.push(track.id);
    }

    collab.join_event(GUEST, event_id).await.expect("guest joins");

    // A connected client watches the event's rooms
    let mut connection = collab.rooms().connect();
    connection.join(Room::Event(event_id));

    let third = tracks[2];

    collab
        .votes
        .cast_vote(HOST, third, VoteKind::Upvote, Some(1))
        .await
        .expect("host upvotes");

    collab
        .votes
        .cast_vote(GUEST, third, VoteKind::Downvote, Some(1))
        .await
        .expect("guest downvotes");

    let tally = collab
        .votes
        .tally_for(event_id, None)
        .await
        .expect("tally");

    let entry = tally
        .iter()
        .find(|e| e.track_id == third)
        .expect("third track is tallied");

    assert_eq!(entry.score, 0);
    assert_eq!(entry.upvotes, 1);
    assert_eq!(entry.downvotes, 1);

    collab
        .playlists
        .reorder(HOST, event_id, vec![tracks[2], tracks[0], tracks[1]])
        .await
        .expect("reorder");

    let tally = collab
        .votes
        .tally_for(event_id, None)
        .await
        .expect("tally after reorder");

    let entry = tally
        .iter()
        .find(|e| e.track_id == third)
        .expect("third track is tallied");

    assert_eq!(entry.position, 1);

    // The subscriber saw both votes and the reorder, in order
    let first = connection.next().await.expect("first message");
    assert_eq!(first.name, "vote-updated");
    assert_eq!(first.payload["score"], 1);

    let second = connection.next().await.expect("second message");
    assert_eq!(second.name, "vote-updated");
    assert_eq!(second.payload["score"], 0);

    let third_message = connection.next().await.expect("third message");
    assert_eq!(third_message.name, "tracks-reordered");
    assert_eq!(
        third_message.payload["orderedTrackIds"],
        serde_json::json!([tracks[2], tracks[0], tracks[1]])
    );
}

/// Positions must form exactly {1..=N} after any sequence of queue
/// mutations, no matter how the operations interleave
#[tokio::test]
async fn test_positions_stay_dense_under_random_mutations() {
    let (collab, event_id) = collab_with_event("density").await;

    let mut rng = StdRng::seed_from_u64(0xE5C0);
    let mut next_reference = 0;

    for _ in 0..200 {
        let current = collab
            .playlists
            .current_order(event_id)
            .await
            .expect("order");

        match rng.gen_range(0..3) {
            0 => {
                next_reference += 1;

                let position = if current.is_empty() || rng.gen_bool(0.5) {
                    None
                } else {
                    Some(rng.gen_range(1..=current.len() as i32 + 1))
                };

                collab
                    .playlists
                    .add_track(
                        HOST,
                        event_id,
                        format!("track:{}", next_reference),
                        position,
                    )
                    .await
                    .expect("add");
            }
            1 if !current.is_empty() => {
                let victim = current[rng.gen_range(0..current.len())];

                collab
                    .playlists
                    .remove_track(HOST, event_id, victim)
                    .await
                    .expect("remove");
            }
            2 if !current.is_empty() => {
                let mut shuffled = current.clone();
                shuffled.shuffle(&mut rng);

                collab
                    .playlists
                    .reorder(HOST, event_id, shuffled)
                    .await
                    .expect("reorder");
            }
            _ => {}
        }

        let tally = collab
            .votes
            .tally_for(event_id, None)
            .await
            .expect("tally");

        let mut positions: Vec<_> = tally.iter().map(|e| e.position).collect();
        positions.sort_unstable();

        let expected: Vec<_> = (1..=tally.len() as i32).collect();
        assert_eq!(positions, expected, "positions must stay dense");
    }
}

/// Concurrent mutations on the same event are serialized and never leave
/// gaps or duplicates
#[tokio::test]
async fn test_concurrent_adds_keep_positions_dense() {
    let (collab, event_id) = collab_with_event("contention").await;
    let collab = Arc::new(collab);

    let mut handles = Vec::new();

    for index in 0..16 {
        let collab = collab.clone();

        handles.push(tokio::spawn(async move {
            collab
                .playlists
                .add_track(HOST, event_id, format!("track:{}", index), Some(1))
                .await
                .expect("concurrent add");
        }));
    }

    for handle in handles {
        handle.await.expect("task finishes");
    }

    let tally = collab
        .votes
        .tally_for(event_id, None)
        .await
        .expect("tally");

    let mut positions: Vec<_> = tally.iter().map(|e| e.position).collect();
    positions.sort_unstable();

    assert_eq!(positions, (1..=16).collect::<Vec<_>>());
}
