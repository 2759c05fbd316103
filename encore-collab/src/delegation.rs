use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{info, warn};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::{
    CollabContext, CollabEvent, DatabaseError, DelegationData, DeviceAction, NewDelegation,
    Permissions, PrimaryKey,
};

/// Owns device-control grants, their permission sets, and expiry.
///
/// Per device there is at most one active grant, replaced atomically on a
/// new delegation. Expiry is evaluated lazily at every authorization
/// check, so correctness never depends on the sweep having run.
pub struct DelegationManager {
    context: CollabContext,
    locks: DashMap<PrimaryKey, Arc<Mutex<()>>>,
}

#[derive(Debug, Error)]
pub enum DelegationError {
    #[error("Only the device owner can manage delegation")]
    NotOwner,
    #[error("Device does not accept remote control")]
    NotControllable,
    #[error("Expiry timestamp is in the past")]
    ExpiryInPast,
    #[error(transparent)]
    Db(#[from] DatabaseError),
}

impl DelegationManager {
    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
            locks: DashMap::new(),
        }
    }

    /// Grants a user control of the device, replacing any existing grant.
    /// Absent `expires_at` means the grant lasts until revoked.
    pub async fn delegate(
        &self,
        owner_id: PrimaryKey,
        device_id: PrimaryKey,
        delegate_user_id: PrimaryKey,
        permissions: Permissions,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<DelegationData, DelegationError> {
        let device = self.context.database.device_by_id(device_id).await?;

        if device.owner_id != owner_id {
            return Err(DelegationError::NotOwner);
        }

        if !device.controllable {
            return Err(DelegationError::NotControllable);
        }

        if expires_at.is_some_and(|at| at <= Utc::now()) {
            return Err(DelegationError::ExpiryInPast);
        }

        let lock = self.lock_for(device_id);
        let _guard = lock.lock().await;

        let delegation = self
            .context
            .database
            .replace_delegation(NewDelegation {
                device_id,
                delegate_user_id,
                permissions,
                expires_at,
            })
            .await?;

        info!(
            "Device {} delegated to user {}",
            device_id, delegate_user_id
        );

        self.context.emit(CollabEvent::ControlDelegated {
            device_id,
            delegate_user_id,
            permissions,
        });

        Ok(delegation)
    }

    /// Removes the device's active grant. Revoking when no grant exists
    /// is a no-op, not an error.
    pub async fn revoke(
        &self,
        owner_id: PrimaryKey,
        device_id: PrimaryKey,
    ) -> Result<(), DelegationError> {
        let device = self.context.database.device_by_id(device_id).await?;

        if device.owner_id != owner_id {
            return Err(DelegationError::NotOwner);
        }

        let lock = self.lock_for(device_id);
        let _guard = lock.lock().await;

        let deleted = match self.context.database.delete_delegation(device_id).await {
            Ok(()) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e.into()),
        };

        if deleted {
            self.context
                .emit(CollabEvent::ControlRevoked { device_id });
        }

        Ok(())
    }

    /// Whether the caller may perform the action on the device. Owners
    /// always hold every permission. A grant past its expiry is treated
    /// as absent even while its row still exists.
    pub async fn authorize(
        &self,
        caller_id: PrimaryKey,
        device_id: PrimaryKey,
        action: DeviceAction,
    ) -> Result<bool, DelegationError> {
        let device = self.context.database.device_by_id(device_id).await?;

        if device.owner_id == caller_id {
            return Ok(true);
        }

        let delegation = match self.context.database.delegation_by_device(device_id).await {
            Ok(delegation) => delegation,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        if delegation.delegate_user_id != caller_id || delegation.is_expired(Utc::now()) {
            return Ok(false);
        }

        Ok(delegation.permissions.allows(action))
    }

    /// Physically deletes expired grants. Runs out-of-band, the interval
    /// is a deployment parameter and not a correctness requirement.
    pub async fn sweep(&self) {
        match self.context.database.clear_expired_delegations().await {
            Ok(0) => {}
            Ok(swept) => info!("Swept {} expired delegation(s)", swept),
            Err(e) => warn!("Delegation sweep failed: {}", e),
        }
    }

    /// Spawns the periodic expiry sweep. Must be called inside a tokio
    /// runtime.
    pub fn start_sweeper(&self, every: Duration) {
        let context = self.context.clone();

        tokio::spawn(async move {
            let manager = DelegationManager::new(&context);

            loop {
                tokio::time::sleep(every).await;
                manager.sweep().await;
            }
        });
    }

    fn lock_for(&self, device_id: PrimaryKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(device_id)
            .or_insert_with(Default::default)
            .clone()
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration;
    use futures_util::StreamExt;

    use crate::test_util::{fixture, TestWorld};
    use crate::Room;

    use super::*;

    fn play_only() -> Permissions {
        Permissions {
            can_play: true,
            ..Default::default()
        }
    }

    fn skip_only() -> Permissions {
        Permissions {
            can_skip: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_grant_is_exclusive_per_device() {
        let world = TestWorld::new().await;
        let device = world.add_device(fixture::USER, true).await;

        world
            .collab
            .delegations
            .delegate(fixture::USER, device.id, fixture::OTHER_USER, play_only(), None)
            .await
            .expect("first grant");

        world
            .collab
            .delegations
            .delegate(fixture::USER, device.id, fixture::THIRD_USER, skip_only(), None)
            .await
            .expect("second grant replaces first");

        let first_can_play = world
            .collab
            .delegations
            .authorize(fixture::OTHER_USER, device.id, DeviceAction::Play)
            .await
            .expect("authorize");

        let second_can_skip = world
            .collab
            .delegations
            .authorize(fixture::THIRD_USER, device.id, DeviceAction::Skip)
            .await
            .expect("authorize");

        assert!(!first_can_play);
        assert!(second_can_skip);
    }

    #[tokio::test]
    async fn test_grant_respects_permission_bits() {
        let world = TestWorld::new().await;
        let device = world.add_device(fixture::USER, true).await;

        world
            .collab
            .delegations
            .delegate(fixture::USER, device.id, fixture::OTHER_USER, play_only(), None)
            .await
            .expect("grant");

        let can_play = world
            .collab
            .delegations
            .authorize(fixture::OTHER_USER, device.id, DeviceAction::Play)
            .await
            .expect("authorize");

        let can_skip = world
            .collab
            .delegations
            .authorize(fixture::OTHER_USER, device.id, DeviceAction::Skip)
            .await
            .expect("authorize");

        assert!(can_play);
        assert!(!can_skip);
    }

    #[tokio::test]
    async fn test_owner_always_authorized() {
        let world = TestWorld::new().await;
        let device = world.add_device(fixture::USER, true).await;

        for action in [
            DeviceAction::Play,
            DeviceAction::Pause,
            DeviceAction::Skip,
            DeviceAction::ChangeVolume,
            DeviceAction::ChangePlaylist,
        ] {
            let allowed = world
                .collab
                .delegations
                .authorize(fixture::USER, device.id, action)
                .await
                .expect("authorize");

            assert!(allowed, "owner should be allowed to {:?}", action);
        }
    }

    #[tokio::test]
    async fn test_expired_grant_is_inert_before_sweep() {
        let world = TestWorld::new().await;
        let device = world.add_device(fixture::USER, true).await;

        // Write the expired row directly, bypassing delegate()'s
        // validation, to model a grant that aged out in place
        world
            .collab
            .context()
            .database
            .replace_delegation(NewDelegation {
                device_id: device.id,
                delegate_user_id: fixture::OTHER_USER,
                permissions: play_only(),
                expires_at: Some(Utc::now() - Duration::minutes(5)),
            })
            .await
            .expect("stale grant");

        let delegate_allowed = world
            .collab
            .delegations
            .authorize(fixture::OTHER_USER, device.id, DeviceAction::Play)
            .await
            .expect("authorize");

        let owner_allowed = world
            .collab
            .delegations
            .authorize(fixture::USER, device.id, DeviceAction::Play)
            .await
            .expect("authorize");

        assert!(!delegate_allowed);
        assert!(owner_allowed);
    }

    #[tokio::test]
    async fn test_sweep_deletes_expired_rows() {
        let world = TestWorld::new().await;
        let device = world.add_device(fixture::USER, true).await;

        world
            .collab
            .context()
            .database
            .replace_delegation(NewDelegation {
                device_id: device.id,
                delegate_user_id: fixture::OTHER_USER,
                permissions: play_only(),
                expires_at: Some(Utc::now() - Duration::minutes(5)),
            })
            .await
            .expect("stale grant");

        world.collab.delegations.sweep().await;

        let result = world
            .collab
            .context()
            .database
            .delegation_by_device(device.id)
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_only_owner_can_delegate() {
        let world = TestWorld::new().await;
        let device = world.add_device(fixture::USER, true).await;

        let result = world
            .collab
            .delegations
            .delegate(
                fixture::OTHER_USER,
                device.id,
                fixture::THIRD_USER,
                play_only(),
                None,
            )
            .await;

        assert!(matches!(result, Err(DelegationError::NotOwner)));
    }

    #[tokio::test]
    async fn test_past_expiry_is_rejected() {
        let world = TestWorld::new().await;
        let device = world.add_device(fixture::USER, true).await;

        let result = world
            .collab
            .delegations
            .delegate(
                fixture::USER,
                device.id,
                fixture::OTHER_USER,
                play_only(),
                Some(Utc::now() - Duration::seconds(1)),
            )
            .await;

        assert!(matches!(result, Err(DelegationError::ExpiryInPast)));
    }

    #[tokio::test]
    async fn test_uncontrollable_device_rejects_delegation() {
        let world = TestWorld::new().await;
        let device = world.add_device(fixture::USER, false).await;

        let result = world
            .collab
            .delegations
            .delegate(
                fixture::USER,
                device.id,
                fixture::OTHER_USER,
                play_only(),
                None,
            )
            .await;

        assert!(matches!(result, Err(DelegationError::NotControllable)));
    }

    #[tokio::test]
    async fn test_revoke_without_grant_is_noop() {
        let world = TestWorld::new().await;
        let device = world.add_device(fixture::USER, true).await;

        world
            .collab
            .delegations
            .revoke(fixture::USER, device.id)
            .await
            .expect("revoke with no grant");
    }

    #[tokio::test]
    async fn test_revoke_removes_grant() {
        let world = TestWorld::new().await;
        let device = world.add_device(fixture::USER, true).await;

        world
            .collab
            .delegations
            .delegate(fixture::USER, device.id, fixture::OTHER_USER, play_only(), None)
            .await
            .expect("grant");

        world
            .collab
            .delegations
            .revoke(fixture::USER, device.id)
            .await
            .expect("revoke");

        let allowed = world
            .collab
            .delegations
            .authorize(fixture::OTHER_USER, device.id, DeviceAction::Play)
            .await
            .expect("authorize");

        assert!(!allowed);
    }

    #[tokio::test]
    async fn test_grant_notifies_the_delegate_user_room() {
        let world = TestWorld::new().await;
        let device = world.add_device(fixture::USER, true).await;

        let mut connection = world.collab.rooms().connect();
        connection.join(Room::User(fixture::OTHER_USER));

        world
            .collab
            .delegations
            .delegate(fixture::USER, device.id, fixture::OTHER_USER, play_only(), None)
            .await
            .expect("grant");

        let message = connection.next().await.expect("notification");
        assert_eq!(message.room, Room::User(fixture::OTHER_USER));
        assert_eq!(message.name, "control-delegated");
    }

    #[tokio::test]
    async fn test_unknown_device_is_not_found() {
        let world = TestWorld::new().await;

        let result = world
            .collab
            .delegations
            .authorize(fixture::USER, 9999, DeviceAction::Play)
            .await;

        assert!(matches!(
            result,
            Err(DelegationError::Db(e)) if e.is_not_found()
        ));
    }
}
