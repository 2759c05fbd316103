use chrono::Utc;
use thiserror::Error;

use crate::{
    CollabContext, DatabaseError, EventData, EventStatus, NewVote, PlaylistTrackData, PrimaryKey,
    VoteData, VoteKind,
};

pub const MIN_VOTE_WEIGHT: i32 = 1;
pub const MAX_VOTE_WEIGHT: i32 = 5;

/// Single source of truth for vote state and per-track scores.
///
/// Casting is an upsert, so repeated identical casts are idempotent and a
/// second vote from the same user replaces the first. No locking is
/// needed beyond the atomicity of the upsert itself.
pub struct VoteLedger {
    context: CollabContext,
}

#[derive(Debug, Error)]
pub enum VoteError {
    #[error("Vote weight must be between {MIN_VOTE_WEIGHT} and {MAX_VOTE_WEIGHT}")]
    InvalidWeight(i32),
    #[error("Event is not accepting votes")]
    VotingClosed,
    #[error("Vote limit for this event was reached")]
    VoteLimitReached,
    #[error("User is not a participant of this event")]
    NotParticipant,
    #[error(transparent)]
    Db(#[from] DatabaseError),
}

/// The result of casting a vote
#[derive(Debug, Clone)]
pub struct CastResult {
    pub track_id: PrimaryKey,
    /// The track's score after the cast
    pub score: i32,
    /// The voter's effective vote after the cast
    pub vote: VoteData,
}

/// One row of an event's tally
#[derive(Debug, Clone)]
pub struct TallyEntry {
    pub track_id: PrimaryKey,
    pub position: i32,
    pub upvotes: i32,
    pub downvotes: i32,
    pub score: i32,
    /// The caller's own vote on this track, when a caller is known
    pub caller_vote: Option<VoteData>,
}

impl VoteLedger {
    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Casts or changes a vote, returning the new score and the voter's
    /// effective vote
    pub async fn cast_vote(
        &self,
        voter_id: PrimaryKey,
        track_id: PrimaryKey,
        kind: VoteKind,
        weight: Option<i32>,
    ) -> Result<CastResult, VoteError> {
        let weight = weight.unwrap_or(MIN_VOTE_WEIGHT);

        if !(MIN_VOTE_WEIGHT..=MAX_VOTE_WEIGHT).contains(&weight) {
            return Err(VoteError::InvalidWeight(weight));
        }

        let track = self.context.database.track_by_id(track_id).await?;
        let event = self.context.database.event_by_id(track.event_id).await?;

        self.ensure_can_vote(&event, voter_id).await?;
        self.ensure_vote_capacity(&event, voter_id, &track).await?;

        let vote = self
            .context
            .database
            .upsert_vote(NewVote {
                voter_id,
                playlist_track_id: track_id,
                kind,
                weight,
            })
            .await?;

        let score = self.score_for(track_id).await?;

        self.context.emit(crate::CollabEvent::VoteUpdated {
            event_id: track.event_id,
            track_id,
            score,
        });

        Ok(CastResult {
            track_id,
            score,
            vote,
        })
    }

    /// Deletes the voter's vote on the track if present. Retracting a
    /// vote that doesn't exist is a no-op, not an error.
    pub async fn retract_vote(
        &self,
        voter_id: PrimaryKey,
        track_id: PrimaryKey,
    ) -> Result<i32, VoteError> {
        let track = self.context.database.track_by_id(track_id).await?;

        let deleted = match self.context.database.delete_vote(voter_id, track_id).await {
            Ok(()) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e.into()),
        };

        let score = self.score_for(track_id).await?;

        if deleted {
            self.context.emit(crate::CollabEvent::VoteUpdated {
                event_id: track.event_id,
                track_id,
                score,
            });
        }

        Ok(score)
    }

    /// The track's score: upvote weights minus downvote weights
    pub async fn score_for(&self, track_id: PrimaryKey) -> Result<i32, VoteError> {
        let votes = self.context.database.votes_by_track(track_id).await?;

        Ok(votes.iter().map(|v| v.contribution()).sum())
    }

    /// Returns one entry per track in the event, ranked by score with
    /// ties broken by earliest position, then earliest insertion
    pub async fn tally_for(
        &self,
        event_id: PrimaryKey,
        caller_id: Option<PrimaryKey>,
    ) -> Result<Vec<TallyEntry>, VoteError> {
        // Ensure event exists
        let _ = self.context.database.event_by_id(event_id).await?;

        let tracks = self.context.database.tracks_by_event(event_id).await?;
        let votes = self.context.database.votes_by_event(event_id).await?;

        let mut entries: Vec<_> = tracks
            .into_iter()
            .map(|track| {
                let track_votes: Vec<_> = votes
                    .iter()
                    .filter(|v| v.playlist_track_id == track.id)
                    .collect();

                let upvotes = track_votes
                    .iter()
                    .filter(|v| v.kind == VoteKind::Upvote)
                    .map(|v| v.weight)
                    .sum();

                let downvotes = track_votes
                    .iter()
                    .filter(|v| v.kind == VoteKind::Downvote)
                    .map(|v| v.weight)
                    .sum::<i32>();

                let caller_vote = caller_id.and_then(|caller| {
                    track_votes
                        .iter()
                        .find(|v| v.voter_id == caller)
                        .map(|v| (*v).clone())
                });

                TallyEntry {
                    track_id: track.id,
                    position: track.position,
                    upvotes,
                    downvotes,
                    score: upvotes - downvotes,
                    caller_vote,
                }
            })
            .collect();

        entries.sort_by(|a, b| b.score.cmp(&a.score).then(a.position.cmp(&b.position)));

        Ok(entries)
    }

    async fn ensure_can_vote(
        &self,
        event: &EventData,
        voter_id: PrimaryKey,
    ) -> Result<(), VoteError> {
        self.context
            .database
            .participant(event.id, voter_id)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    VoteError::NotParticipant
                } else {
                    e.into()
                }
            })?;

        if event.status == EventStatus::Ended {
            return Err(VoteError::VotingClosed);
        }

        let now = Utc::now();

        if event.voting_starts_at.is_some_and(|at| now < at)
            || event.voting_ends_at.is_some_and(|at| now > at)
        {
            return Err(VoteError::VotingClosed);
        }

        Ok(())
    }

    /// Enforces the event's per-user vote cap. Changing an existing vote
    /// never counts against the cap.
    async fn ensure_vote_capacity(
        &self,
        event: &EventData,
        voter_id: PrimaryKey,
        track: &PlaylistTrackData,
    ) -> Result<(), VoteError> {
        let Some(max) = event.max_votes_per_user else {
            return Ok(());
        };

        let existing = self.context.database.vote_for(voter_id, track.id).await;

        match existing {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                let held = self
                    .context
                    .database
                    .count_voted_tracks(event.id, voter_id)
                    .await?;

                if held >= max as i64 {
                    Err(VoteError::VoteLimitReached)
                } else {
                    Ok(())
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}
