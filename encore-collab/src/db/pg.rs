use async_trait::async_trait;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    query, Error as SqlxError, PgPool, Row,
};

use super::{
    Database, DatabaseError, DatabaseResult, DelegationData, DeviceData, DeviceStatus, EventData,
    EventStatus, EventVisibility, Geofence, IntoDatabaseError, NewDelegation, NewDevice,
    NewEvent, NewParticipant, NewPlaylistTrack, NewVote, ParticipantData, ParticipantRole,
    Permissions, PlaylistTrackData, PrimaryKey, Result, VoteData, VoteKind,
};

/// A postgres database implementation for encore
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub async fn new(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| DatabaseError::Internal(Box::new(e)))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| DatabaseError::Internal(Box::new(e)))?;

        Ok(Self { pool })
    }

    async fn track_by_reference(
        &self,
        event_id: PrimaryKey,
        reference: &str,
    ) -> Result<PlaylistTrackData> {
        query("SELECT * FROM playlist_tracks WHERE event_id = $1 AND track_reference = $2")
            .bind(event_id)
            .bind(reference)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("track", "reference"))
            .and_then(|r| row_to_track(&r))
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn create_event(&self, new_event: NewEvent) -> Result<EventData> {
        query(
            "
            INSERT INTO events (
                title, status, visibility,
                geofence_lat, geofence_lng, geofence_radius_m,
                voting_starts_at, voting_ends_at,
                max_votes_per_user, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *",
        )
        .bind(&new_event.title)
        .bind(EventStatus::Draft.as_str())
        .bind(new_event.visibility.as_str())
        .bind(new_event.geofence.map(|g| g.latitude))
        .bind(new_event.geofence.map(|g| g.longitude))
        .bind(new_event.geofence.map(|g| g.radius_m))
        .bind(new_event.voting_starts_at)
        .bind(new_event.voting_ends_at)
        .bind(new_event.max_votes_per_user)
        .bind(new_event.created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())
        .and_then(|r| row_to_event(&r))
    }

    async fn event_by_id(&self, event_id: PrimaryKey) -> Result<EventData> {
        query("SELECT * FROM events WHERE id = $1")
            .bind(event_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("event", "id"))
            .and_then(|r| row_to_event(&r))
    }

    async fn update_event_status(
        &self,
        event_id: PrimaryKey,
        status: EventStatus,
    ) -> Result<EventData> {
        query("UPDATE events SET status = $1 WHERE id = $2 RETURNING *")
            .bind(status.as_str())
            .bind(event_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("event", "id"))
            .and_then(|r| row_to_event(&r))
    }

    async fn set_current_track(
        &self,
        event_id: PrimaryKey,
        track_id: Option<PrimaryKey>,
    ) -> Result<()> {
        let result = query("UPDATE events SET current_track_id = $1 WHERE id = $2")
            .bind(track_id)
            .bind(event_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "event",
                identifier: "id",
            });
        }

        Ok(())
    }

    async fn delete_event(&self, event_id: PrimaryKey) -> Result<()> {
        // Ensure event exists
        let _ = self.event_by_id(event_id).await?;

        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        query(
            "DELETE FROM votes WHERE playlist_track_id IN
                (SELECT id FROM playlist_tracks WHERE event_id = $1)",
        )
        .bind(event_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| e.any())?;

        query("DELETE FROM playlist_tracks WHERE event_id = $1")
            .bind(event_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        query("DELETE FROM participants WHERE event_id = $1")
            .bind(event_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        query("DELETE FROM events WHERE id = $1")
            .bind(event_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        tx.commit().await.map_err(|e| e.any())
    }

    async fn create_participant(
        &self,
        new_participant: NewParticipant,
    ) -> Result<ParticipantData> {
        self.participant(new_participant.event_id, new_participant.user_id)
            .await
            .conflict_or_ok(
                "participant",
                "event:user",
                format!(
                    "{}:{}",
                    new_participant.event_id, new_participant.user_id
                )
                .as_str(),
            )?;

        query(
            "INSERT INTO participants (event_id, user_id, role)
             VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(new_participant.event_id)
        .bind(new_participant.user_id)
        .bind(new_participant.role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(write_err)
        .and_then(|r| row_to_participant(&r))
    }

    async fn participant(
        &self,
        event_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> Result<ParticipantData> {
        query("SELECT * FROM participants WHERE event_id = $1 AND user_id = $2")
            .bind(event_id)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("participant", "event:user"))
            .and_then(|r| row_to_participant(&r))
    }

    async fn tracks_by_event(&self, event_id: PrimaryKey) -> Result<Vec<PlaylistTrackData>> {
        query("SELECT * FROM playlist_tracks WHERE event_id = $1 ORDER BY position ASC")
            .bind(event_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.any())?
            .iter()
            .map(row_to_track)
            .collect()
    }

    async fn track_by_id(&self, track_id: PrimaryKey) -> Result<PlaylistTrackData> {
        query("SELECT * FROM playlist_tracks WHERE id = $1")
            .bind(track_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("track", "id"))
            .and_then(|r| row_to_track(&r))
    }

    async fn create_track(&self, new_track: NewPlaylistTrack) -> Result<PlaylistTrackData> {
        self.track_by_reference(new_track.event_id, &new_track.track_reference)
            .await
            .conflict_or_ok("track", "reference", &new_track.track_reference)?;

        query(
            "INSERT INTO playlist_tracks (event_id, track_reference, position, added_by)
             VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(new_track.event_id)
        .bind(&new_track.track_reference)
        .bind(new_track.position)
        .bind(new_track.added_by)
        .fetch_one(&self.pool)
        .await
        .map_err(write_err)
        .and_then(|r| row_to_track(&r))
    }

    async fn delete_track(&self, track_id: PrimaryKey) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        query("DELETE FROM votes WHERE playlist_track_id = $1")
            .bind(track_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        let result = query("DELETE FROM playlist_tracks WHERE id = $1")
            .bind(track_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "track",
                identifier: "id",
            });
        }

        tx.commit().await.map_err(|e| e.any())
    }

    async fn assign_positions(
        &self,
        event_id: PrimaryKey,
        positions: &[(PrimaryKey, i32)],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        for (track_id, position) in positions {
            let result =
                query("UPDATE playlist_tracks SET position = $1 WHERE id = $2 AND event_id = $3")
                    .bind(position)
                    .bind(track_id)
                    .bind(event_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(write_err)?;

            if result.rows_affected() == 0 {
                return Err(DatabaseError::NotFound {
                    resource: "track",
                    identifier: "id",
                });
            }
        }

        // The unique (event_id, position) constraint is deferred, so it is
        // checked here rather than per statement
        tx.commit().await.map_err(write_err)
    }

    async fn upsert_vote(&self, new_vote: NewVote) -> Result<VoteData> {
        query(
            "
            INSERT INTO votes (voter_id, playlist_track_id, kind, weight)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (voter_id, playlist_track_id)
            DO UPDATE SET
                kind = EXCLUDED.kind,
                weight = EXCLUDED.weight,
                cast_at = timezone('UTC', now())
            RETURNING *",
        )
        .bind(new_vote.voter_id)
        .bind(new_vote.playlist_track_id)
        .bind(new_vote.kind.as_str())
        .bind(new_vote.weight)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())
        .and_then(|r| row_to_vote(&r))
    }

    async fn vote_for(&self, voter_id: PrimaryKey, track_id: PrimaryKey) -> Result<VoteData> {
        query("SELECT * FROM votes WHERE voter_id = $1 AND playlist_track_id = $2")
            .bind(voter_id)
            .bind(track_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("vote", "voter:track"))
            .and_then(|r| row_to_vote(&r))
    }

    async fn delete_vote(&self, voter_id: PrimaryKey, track_id: PrimaryKey) -> Result<()> {
        let result = query("DELETE FROM votes WHERE voter_id = $1 AND playlist_track_id = $2")
            .bind(voter_id)
            .bind(track_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "vote",
                identifier: "voter:track",
            });
        }

        Ok(())
    }

    async fn votes_by_track(&self, track_id: PrimaryKey) -> Result<Vec<VoteData>> {
        query("SELECT * FROM votes WHERE playlist_track_id = $1")
            .bind(track_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.any())?
            .iter()
            .map(row_to_vote)
            .collect()
    }

    async fn votes_by_event(&self, event_id: PrimaryKey) -> Result<Vec<VoteData>> {
        query(
            "SELECT votes.* FROM votes
                INNER JOIN playlist_tracks ON votes.playlist_track_id = playlist_tracks.id
             WHERE playlist_tracks.event_id = $1",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?
        .iter()
        .map(row_to_vote)
        .collect()
    }

    async fn count_voted_tracks(
        &self,
        event_id: PrimaryKey,
        voter_id: PrimaryKey,
    ) -> Result<i64> {
        let row = query(
            "SELECT COUNT(*) FROM votes
                INNER JOIN playlist_tracks ON votes.playlist_track_id = playlist_tracks.id
             WHERE playlist_tracks.event_id = $1 AND votes.voter_id = $2",
        )
        .bind(event_id)
        .bind(voter_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?;

        row.try_get(0).map_err(|e| e.any())
    }

    async fn create_device(&self, new_device: NewDevice) -> Result<DeviceData> {
        query(
            "INSERT INTO devices (owner_id, name, kind, status, controllable)
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(new_device.owner_id)
        .bind(&new_device.name)
        .bind(&new_device.kind)
        .bind(DeviceStatus::Online.as_str())
        .bind(new_device.controllable)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())
        .and_then(|r| row_to_device(&r))
    }

    async fn device_by_id(&self, device_id: PrimaryKey) -> Result<DeviceData> {
        query("SELECT * FROM devices WHERE id = $1")
            .bind(device_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("device", "id"))
            .and_then(|r| row_to_device(&r))
    }

    async fn replace_delegation(&self, new_delegation: NewDelegation) -> Result<DelegationData> {
        query(
            "
            INSERT INTO delegations (
                device_id, delegate_user_id,
                can_play, can_pause, can_skip, can_change_volume, can_change_playlist,
                expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (device_id)
            DO UPDATE SET
                delegate_user_id = EXCLUDED.delegate_user_id,
                can_play = EXCLUDED.can_play,
                can_pause = EXCLUDED.can_pause,
                can_skip = EXCLUDED.can_skip,
                can_change_volume = EXCLUDED.can_change_volume,
                can_change_playlist = EXCLUDED.can_change_playlist,
                granted_at = timezone('UTC', now()),
                expires_at = EXCLUDED.expires_at
            RETURNING *",
        )
        .bind(new_delegation.device_id)
        .bind(new_delegation.delegate_user_id)
        .bind(new_delegation.permissions.can_play)
        .bind(new_delegation.permissions.can_pause)
        .bind(new_delegation.permissions.can_skip)
        .bind(new_delegation.permissions.can_change_volume)
        .bind(new_delegation.permissions.can_change_playlist)
        .bind(new_delegation.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())
        .and_then(|r| row_to_delegation(&r))
    }

    async fn delegation_by_device(&self, device_id: PrimaryKey) -> Result<DelegationData> {
        query("SELECT * FROM delegations WHERE device_id = $1")
            .bind(device_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("delegation", "device_id"))
            .and_then(|r| row_to_delegation(&r))
    }

    async fn delete_delegation(&self, device_id: PrimaryKey) -> Result<()> {
        let result = query("DELETE FROM delegations WHERE device_id = $1")
            .bind(device_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "delegation",
                identifier: "device_id",
            });
        }

        Ok(())
    }

    async fn clear_expired_delegations(&self) -> Result<u64> {
        query(
            "DELETE FROM delegations
             WHERE expires_at IS NOT NULL AND expires_at < timezone('UTC', now())",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())
        .map(|r| r.rows_affected())
    }
}

fn row_to_event(row: &PgRow) -> Result<EventData> {
    let status: String = row.try_get("status").map_err(|e| e.any())?;
    let visibility: String = row.try_get("visibility").map_err(|e| e.any())?;

    let latitude: Option<f64> = row.try_get("geofence_lat").map_err(|e| e.any())?;
    let longitude: Option<f64> = row.try_get("geofence_lng").map_err(|e| e.any())?;
    let radius_m: Option<f64> = row.try_get("geofence_radius_m").map_err(|e| e.any())?;

    let geofence = match (latitude, longitude, radius_m) {
        (Some(latitude), Some(longitude), Some(radius_m)) => Some(Geofence {
            latitude,
            longitude,
            radius_m,
        }),
        _ => None,
    };

    Ok(EventData {
        id: row.try_get("id").map_err(|e| e.any())?,
        title: row.try_get("title").map_err(|e| e.any())?,
        status: parse_enum(&status, EventStatus::from_str, "event status")?,
        visibility: parse_enum(&visibility, EventVisibility::from_str, "event visibility")?,
        geofence,
        voting_starts_at: row.try_get("voting_starts_at").map_err(|e| e.any())?,
        voting_ends_at: row.try_get("voting_ends_at").map_err(|e| e.any())?,
        current_track_id: row.try_get("current_track_id").map_err(|e| e.any())?,
        max_votes_per_user: row.try_get("max_votes_per_user").map_err(|e| e.any())?,
        created_by: row.try_get("created_by").map_err(|e| e.any())?,
        created_at: row.try_get("created_at").map_err(|e| e.any())?,
    })
}

fn row_to_participant(row: &PgRow) -> Result<ParticipantData> {
    let role: String = row.try_get("role").map_err(|e| e.any())?;

    Ok(ParticipantData {
        id: row.try_get("id").map_err(|e| e.any())?,
        event_id: row.try_get("event_id").map_err(|e| e.any())?,
        user_id: row.try_get("user_id").map_err(|e| e.any())?,
        role: parse_enum(&role, ParticipantRole::from_str, "participant role")?,
    })
}

fn row_to_track(row: &PgRow) -> Result<PlaylistTrackData> {
    Ok(PlaylistTrackData {
        id: row.try_get("id").map_err(|e| e.any())?,
        event_id: row.try_get("event_id").map_err(|e| e.any())?,
        track_reference: row.try_get("track_reference").map_err(|e| e.any())?,
        position: row.try_get("position").map_err(|e| e.any())?,
        added_by: row.try_get("added_by").map_err(|e| e.any())?,
        added_at: row.try_get("added_at").map_err(|e| e.any())?,
    })
}

fn row_to_vote(row: &PgRow) -> Result<VoteData> {
    let kind: String = row.try_get("kind").map_err(|e| e.any())?;

    Ok(VoteData {
        id: row.try_get("id").map_err(|e| e.any())?,
        voter_id: row.try_get("voter_id").map_err(|e| e.any())?,
        playlist_track_id: row.try_get("playlist_track_id").map_err(|e| e.any())?,
        kind: parse_enum(&kind, VoteKind::from_str, "vote kind")?,
        weight: row.try_get("weight").map_err(|e| e.any())?,
        cast_at: row.try_get("cast_at").map_err(|e| e.any())?,
    })
}

fn row_to_device(row: &PgRow) -> Result<DeviceData> {
    let status: String = row.try_get("status").map_err(|e| e.any())?;

    Ok(DeviceData {
        id: row.try_get("id").map_err(|e| e.any())?,
        owner_id: row.try_get("owner_id").map_err(|e| e.any())?,
        name: row.try_get("name").map_err(|e| e.any())?,
        kind: row.try_get("kind").map_err(|e| e.any())?,
        status: parse_enum(&status, DeviceStatus::from_str, "device status")?,
        controllable: row.try_get("controllable").map_err(|e| e.any())?,
        last_seen_at: row.try_get("last_seen_at").map_err(|e| e.any())?,
    })
}

fn row_to_delegation(row: &PgRow) -> Result<DelegationData> {
    let permissions = Permissions {
        can_play: row.try_get("can_play").map_err(|e| e.any())?,
        can_pause: row.try_get("can_pause").map_err(|e| e.any())?,
        can_skip: row.try_get("can_skip").map_err(|e| e.any())?,
        can_change_volume: row.try_get("can_change_volume").map_err(|e| e.any())?,
        can_change_playlist: row.try_get("can_change_playlist").map_err(|e| e.any())?,
    };

    Ok(DelegationData {
        device_id: row.try_get("device_id").map_err(|e| e.any())?,
        delegate_user_id: row.try_get("delegate_user_id").map_err(|e| e.any())?,
        permissions,
        granted_at: row.try_get("granted_at").map_err(|e| e.any())?,
        expires_at: row.try_get("expires_at").map_err(|e| e.any())?,
    })
}

fn parse_enum<T>(
    value: &str,
    from_str: fn(&str) -> Option<T>,
    what: &'static str,
) -> Result<T> {
    from_str(value)
        .ok_or_else(|| DatabaseError::Internal(format!("unknown {what}: {value}").into()))
}

/// Maps constraint violations on serialized writes to [DatabaseError::Conflict]
fn write_err(error: SqlxError) -> DatabaseError {
    let code = error
        .as_database_error()
        .and_then(|e| e.code())
        .map(|c| c.to_string());

    match code.as_deref() {
        // unique_violation and serialization_failure
        Some("23505") | Some("40001") => DatabaseError::Conflict {
            resource: "write",
            field: "constraint",
            value: code.unwrap_or_default(),
        },
        _ => error.any(),
    }
}

impl IntoDatabaseError for SqlxError {
    fn any(self) -> DatabaseError {
        DatabaseError::Internal(Box::new(self))
    }

    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError {
        match self {
            SqlxError::RowNotFound => DatabaseError::NotFound {
                resource,
                identifier,
            },
            e => Self::any(e),
        }
    }
}
