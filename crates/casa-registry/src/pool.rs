use casa::device::{DeviceId, DeviceState};
use casa::properties::{PropertiesPatch, validate_update_time};
use casa::response::DeviceView;

use tokio::sync::OwnedMutexGuard;

use tracing::debug;

use crate::entity::{Entity, Payload, SharedEntity};
use crate::error::{Error, ErrorKind, Result};
use crate::registry::{ModifyRequest, Registry};

// A candidate member admitted to a pool: its lock is held from validation
// until the membership change has been applied, so an admission check can
// not be invalidated halfway through.
struct Admission {
    id: DeviceId,
    shared: SharedEntity,
    guard: OwnedMutexGuard<Entity>,
}

impl Registry {
    /// Applies a modify request to a pool: detach the `remove` ids, admit
    /// the `add` ids as a unit, and fan a cadence change out to every
    /// member.
    pub(crate) async fn modify_pool(
        &self,
        shared: &SharedEntity,
        request: ModifyRequest,
    ) -> Result<DeviceView> {
        // Bounds are checked before membership, so a rejected cadence
        // leaves the pool and its members untouched.
        if let Some(update_time) = request.update_time {
            let _ = validate_update_time(update_time)?;
        }

        let mut pool = shared.clone().lock_owned().await;
        let pool_id = pool.id.clone();
        let pool_kind = pool.kind;

        let (removals, candidates) = {
            let Payload::Pool(entry) = &pool.payload else {
                return Err(Error::new(
                    ErrorKind::TypeMismatch,
                    "membership arrays apply only to pools",
                ));
            };

            // Detaching an id that is not a member is a no-op.
            let removals: Vec<DeviceId> = request
                .remove
                .iter()
                .filter(|id| entry.members.contains(*id))
                .cloned()
                .collect();

            let mut candidates: Vec<DeviceId> = Vec::new();
            for id in &request.add {
                // Re-adding a current member is a no-op, unless the same
                // call detaches it first; then it goes through admission
                // again.
                let already_member = entry.members.contains(id) && !removals.contains(id);
                if already_member || candidates.contains(id) {
                    continue;
                }
                candidates.push(id.clone());
            }

            (removals, candidates)
        };

        // Admission is all-or-nothing: every candidate is checked, and its
        // lock acquired, before the first membership change applies.
        let mut admissions = Vec::with_capacity(candidates.len());
        for id in candidates {
            // Checked before taking the candidate's lock: the pool's own
            // lock is already held here.
            if id == pool_id {
                return Err(Error::new(
                    ErrorKind::TypeMismatch,
                    "pools cannot be nested",
                ));
            }

            let Ok(member_shared) = self.shared_entity(&id).await else {
                return Err(Error::new(
                    ErrorKind::TypeMismatch,
                    format!("device with id `{id}` does not exist"),
                ));
            };
            let guard = member_shared.clone().lock_owned().await;

            match &guard.payload {
                Payload::Pool(_) => {
                    return Err(Error::new(
                        ErrorKind::TypeMismatch,
                        "pools cannot be nested",
                    ));
                }
                Payload::Device(member) => {
                    if guard.kind != pool_kind {
                        return Err(Error::new(
                            ErrorKind::TypeMismatch,
                            format!(
                                "only devices with type `{pool_kind}` can be added to this pool"
                            ),
                        ));
                    }
                    if member
                        .member_of
                        .as_ref()
                        .is_some_and(|owner| *owner != pool_id)
                    {
                        return Err(Error::new(
                            ErrorKind::TypeMismatch,
                            format!("device with id `{id}` already belongs to a pool"),
                        ));
                    }
                }
            }

            admissions.push(Admission {
                id,
                shared: member_shared,
                guard,
            });
        }

        // From here on the call no longer fails: removals first, then
        // admissions.
        let mut detached: Vec<DeviceId> = Vec::new();
        if let Payload::Pool(entry) = &mut pool.payload {
            for id in &removals {
                entry.members.shift_remove(id);
                if !admissions.iter().any(|admission| admission.id == *id) {
                    detached.push(id.clone());
                }
            }
            for admission in &admissions {
                entry.members.insert(admission.id.clone());
            }
        }

        for id in &detached {
            self.release_member(id).await;
        }

        for admission in &mut admissions {
            let member = &mut *admission.guard;
            // Joining a pool implicitly (re)connects the member.
            member.status = DeviceState::Connected;
            if let Payload::Device(entry) = &mut member.payload {
                entry.member_of = Some(pool_id.clone());
            }
        }

        if !admissions.is_empty() || !removals.is_empty() {
            debug!(
                "pool `{pool_id}` admitted {} and detached {} members",
                admissions.len(),
                detached.len()
            );
        }

        // A cadence change fans out to every member; the pool itself holds
        // no properties.
        if let Some(update_time) = request.update_time {
            let mut held: Vec<DeviceId> = Vec::with_capacity(admissions.len());
            for admission in &mut admissions {
                let patch = PropertiesPatch::cadence(update_time);
                if admission.guard.apply_properties(patch).unwrap_or(false) {
                    admission.guard.rearm_sampler(&admission.shared);
                }
                held.push(admission.id.clone());
            }

            let members: Vec<DeviceId> = match &pool.payload {
                Payload::Pool(entry) => entry.members.iter().cloned().collect(),
                Payload::Device(_) => Vec::new(),
            };
            // Release the admission locks before re-locking members by id.
            drop(admissions);

            for id in members {
                if held.contains(&id) {
                    continue;
                }
                let Ok(member_shared) = self.shared_entity(&id).await else {
                    continue;
                };
                let mut member = member_shared.lock().await;
                let patch = PropertiesPatch::cadence(update_time);
                if member.apply_properties(patch).unwrap_or(false) {
                    member.rearm_sampler(&member_shared);
                }
            }
        }

        Ok(pool.view())
    }
}

#[cfg(test)]
mod tests {
    use casa::device::{DeviceId, DeviceKind, DeviceState};

    use crate::error::ErrorKind;
    use crate::registry::ModifyRequest;
    use crate::tests::{lamp, lamp_pool, properties, registry};

    #[tokio::test]
    async fn add_rejects_kind_mismatch_as_a_unit() {
        let registry = registry();

        let lamp_id = lamp(&registry).await;
        let window = registry
            .create_device(DeviceKind::Window, properties(0))
            .await
            .unwrap();
        let pool = registry.create_pool(DeviceKind::Lamp).await;

        let rejected = registry
            .modify(
                &pool,
                ModifyRequest::with_add([lamp_id.clone(), window.clone()]),
            )
            .await
            .unwrap_err();

        assert_eq!(rejected.kind(), ErrorKind::TypeMismatch);

        // Not even the compatible id was admitted.
        let view = registry.device(&pool).await.unwrap();
        assert!(view.devices.unwrap().is_empty());
        assert_eq!(registry.device(&lamp_id).await.unwrap().member_of, None);
    }

    #[tokio::test]
    async fn add_rejects_unknown_members() {
        let registry = registry();
        let pool = registry.create_pool(DeviceKind::Lamp).await;

        let rejected = registry
            .modify(&pool, ModifyRequest::with_add([DeviceId::from("device-9")]))
            .await
            .unwrap_err();

        assert_eq!(rejected.kind(), ErrorKind::TypeMismatch);
    }

    #[tokio::test]
    async fn add_reconnects_disconnected_members() {
        let registry = registry();

        let id = lamp(&registry).await;
        registry.disconnect(&id).await.unwrap();

        let pool = registry.create_pool(DeviceKind::Lamp).await;
        registry
            .modify(&pool, ModifyRequest::with_add([id.clone()]))
            .await
            .unwrap();

        let view = registry.device(&id).await.unwrap();
        assert_eq!(view.status.status, DeviceState::Connected);
        assert_eq!(view.member_of, Some(pool));
    }

    #[tokio::test]
    async fn add_is_idempotent_and_ordered() {
        let registry = registry();
        let (pool, first, second) = lamp_pool(&registry).await;

        let view = registry
            .modify(&pool, ModifyRequest::with_add([first.clone(), first.clone()]))
            .await
            .unwrap();

        assert_eq!(view.devices.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn pools_cannot_be_nested() {
        let registry = registry();

        let inner = registry.create_pool(DeviceKind::Lamp).await;
        let outer = registry.create_pool(DeviceKind::Lamp).await;

        let rejected = registry
            .modify(&outer, ModifyRequest::with_add([inner]))
            .await
            .unwrap_err();

        assert_eq!(rejected.kind(), ErrorKind::TypeMismatch);

        // A pool cannot claim itself either.
        let rejected = registry
            .modify(&outer, ModifyRequest::with_add([outer.clone()]))
            .await
            .unwrap_err();

        assert_eq!(rejected.kind(), ErrorKind::TypeMismatch);
    }

    #[tokio::test]
    async fn members_belong_to_one_pool_at_a_time() {
        let registry = registry();
        let (_, first, _) = lamp_pool(&registry).await;

        let other = registry.create_pool(DeviceKind::Lamp).await;
        let rejected = registry
            .modify(&other, ModifyRequest::with_add([first]))
            .await
            .unwrap_err();

        assert_eq!(rejected.kind(), ErrorKind::TypeMismatch);
        let view = registry.device(&other).await.unwrap();
        assert!(view.devices.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_detaches_listed_members_only() {
        let registry = registry();
        let (pool, first, second) = lamp_pool(&registry).await;

        let view = registry
            .modify(&pool, ModifyRequest::with_remove([first.clone()]))
            .await
            .unwrap();

        assert_eq!(view.devices.unwrap(), vec![second.clone()]);

        // The detached device still exists, unowned.
        let view = registry.device(&first).await.unwrap();
        assert_eq!(view.member_of, None);

        // Removing every member leaves an empty pool in place.
        let view = registry
            .modify(&pool, ModifyRequest::with_remove([second]))
            .await
            .unwrap();
        assert!(view.devices.unwrap().is_empty());
        assert!(registry.device(&pool).await.is_ok());
    }

    #[tokio::test]
    async fn removing_a_non_member_is_a_no_op() {
        let registry = registry();
        let (pool, first, second) = lamp_pool(&registry).await;

        let stranger = lamp(&registry).await;
        let view = registry
            .modify(&pool, ModifyRequest::with_remove([stranger]))
            .await
            .unwrap();

        assert_eq!(view.devices.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn deleting_a_member_detaches_it_from_the_pool() {
        let registry = registry();
        let (pool, first, second) = lamp_pool(&registry).await;

        registry.delete(&first).await.unwrap();

        let view = registry.device(&pool).await.unwrap();
        assert_eq!(view.devices.unwrap(), vec![second]);
    }

    #[tokio::test]
    async fn deleting_a_pool_releases_its_members() {
        let registry = registry();
        let (pool, first, second) = lamp_pool(&registry).await;

        registry.delete(&pool).await.unwrap();

        for id in [first, second] {
            let view = registry.device(&id).await.unwrap();
            assert_eq!(view.member_of, None);
        }
    }

    #[tokio::test]
    async fn cadence_patch_fans_out_to_members() {
        let registry = registry();
        let (pool, first, second) = lamp_pool(&registry).await;

        registry
            .modify(&pool, ModifyRequest::with_update_time(5))
            .await
            .unwrap();

        for id in [first, second] {
            let view = registry.device(&id).await.unwrap();
            assert_eq!(view.device_properties.unwrap().update_time, 5);
        }
    }

    #[tokio::test]
    async fn out_of_range_cadence_rejected_before_membership_changes() {
        let registry = registry();
        let (pool, first, second) = lamp_pool(&registry).await;

        let stranger = lamp(&registry).await;
        let rejected = registry
            .modify(
                &pool,
                ModifyRequest {
                    update_time: Some(-1),
                    add: vec![stranger],
                    remove: vec![first.clone()],
                    ..ModifyRequest::default()
                },
            )
            .await
            .unwrap_err();

        assert_eq!(rejected.kind(), ErrorKind::InvalidProperties);

        let view = registry.device(&pool).await.unwrap();
        assert_eq!(view.devices.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn detach_and_readmit_in_one_call() {
        let registry = registry();
        let (pool, first, second) = lamp_pool(&registry).await;

        let view = registry
            .modify(
                &pool,
                ModifyRequest {
                    add: vec![first.clone()],
                    remove: vec![first.clone()],
                    ..ModifyRequest::default()
                },
            )
            .await
            .unwrap();

        // The member moved to the back of the ordered set and kept its
        // owner.
        assert_eq!(view.devices.unwrap(), vec![second, first.clone()]);
        let view = registry.device(&first).await.unwrap();
        assert_eq!(view.member_of, Some(pool));
    }
}
