use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use casa::device::{DeviceId, DeviceKind};
use casa::properties::{DeviceProperties, PropertiesPatch};
use casa::response::DeviceView;

use indexmap::IndexMap;

use serde::Deserialize;

use tokio::sync::{Mutex, RwLock};

use tracing::debug;

use crate::entity::{Entity, Payload, SharedEntity};
use crate::error::{Error, Result};
use crate::sampler::{Metrics, PoolMetricsEntry};

/// The body of a modify operation.
///
/// Plain devices honor the configuration fields; pools honor the membership
/// arrays, plus `update_time`, which fans out to every member. Fields that
/// do not apply to the target are ignored, mirroring the permissive merge
/// of command execution.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModifyRequest {
    /// New host, if any.
    pub host: Option<String>,
    /// New port, if any.
    pub port: Option<u16>,
    /// New sampling cadence, if any.
    pub update_time: Option<i64>,
    /// Members to add, in order (pools only).
    #[serde(default)]
    pub add: Vec<DeviceId>,
    /// Members to detach (pools only).
    #[serde(default)]
    pub remove: Vec<DeviceId>,
}

impl ModifyRequest {
    /// A request that only changes the sampling cadence.
    #[must_use]
    pub fn with_update_time(update_time: i64) -> Self {
        Self {
            update_time: Some(update_time),
            ..Self::default()
        }
    }

    /// A request that only adds pool members.
    #[must_use]
    pub fn with_add<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = DeviceId>,
    {
        Self {
            add: ids.into_iter().collect(),
            ..Self::default()
        }
    }

    /// A request that only detaches pool members.
    #[must_use]
    pub fn with_remove<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = DeviceId>,
    {
        Self {
            remove: ids.into_iter().collect(),
            ..Self::default()
        }
    }

    pub(crate) fn into_properties_patch(self) -> PropertiesPatch {
        PropertiesPatch {
            host: self.host,
            port: self.port,
            update_time: self.update_time,
        }
    }
}

/// The single authoritative store of every registered device and pool.
///
/// Operations on different identifiers proceed independently, while
/// operations on the same identifier are serialized by a per-entity lock.
/// Every read returns a detached snapshot, never a live reference into the
/// store.
#[derive(Debug, Default)]
pub struct Registry {
    pub(crate) entities: RwLock<IndexMap<DeviceId, SharedEntity>>,
    next_id: AtomicU64,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device of `kind` and returns its identifier.
    ///
    /// The device starts `Connected` with its initial data payload; when
    /// `properties.update_time` is non-zero, its sampler task is armed
    /// immediately.
    ///
    /// # Errors
    ///
    /// Fails when the sampling cadence is out of range; nothing is
    /// registered in that case.
    pub async fn create_device(
        &self,
        kind: DeviceKind,
        properties: DeviceProperties,
    ) -> Result<DeviceId> {
        properties.validate()?;

        let id = self.allocate();
        let shared = Arc::new(Mutex::new(Entity::device(id.clone(), kind, properties)));
        shared.lock().await.rearm_sampler(&shared);

        self.entities
            .write()
            .await
            .insert(id.clone(), Arc::clone(&shared));
        debug!("registered {kind} `{id}`");

        Ok(id)
    }

    /// Registers an empty pool of `kind` and returns its identifier.
    ///
    /// Members join the pool through [`Registry::modify`].
    pub async fn create_pool(&self, kind: DeviceKind) -> DeviceId {
        let id = self.allocate();
        let shared = Arc::new(Mutex::new(Entity::pool(id.clone(), kind)));

        self.entities.write().await.insert(id.clone(), shared);
        debug!("registered {kind} pool `{id}`");

        id
    }

    /// Returns the views of every registered entity, in creation order.
    pub async fn devices(&self) -> Vec<DeviceView> {
        let entities: Vec<SharedEntity> = self.entities.read().await.values().cloned().collect();

        let mut views = Vec::with_capacity(entities.len());
        for shared in entities {
            views.push(shared.lock().await.view());
        }
        views
    }

    /// Returns the views of every registered entity of `kind`, in creation
    /// order.
    pub async fn devices_of_kind(&self, kind: DeviceKind) -> Vec<DeviceView> {
        let mut views = self.devices().await;
        views.retain(|view| view.device_type == kind);
        views
    }

    /// Returns the view of one entity.
    ///
    /// # Errors
    ///
    /// Fails when `id` is not registered.
    pub async fn device(&self, id: &DeviceId) -> Result<DeviceView> {
        let shared = self.shared_entity(id).await?;
        let entity = shared.lock().await;

        Ok(entity.view())
    }

    /// Modifies an entity and returns its updated view.
    ///
    /// Configuration patches are accepted regardless of connection state
    /// and only validate field bounds; a cadence change re-arms the sampler
    /// without clearing the recorded history. Pool patches validate their
    /// `add` array as a unit before any membership change applies.
    ///
    /// # Errors
    ///
    /// Fails when `id` is not registered, when a field is out of range, or
    /// when a pool addition violates a membership constraint; the entity is
    /// unchanged in every failure case.
    pub async fn modify(&self, id: &DeviceId, request: ModifyRequest) -> Result<DeviceView> {
        let shared = self.shared_entity(id).await?;

        let is_pool = matches!(shared.lock().await.payload, Payload::Pool(_));
        if is_pool {
            return self.modify_pool(&shared, request).await;
        }

        let mut entity = shared.lock().await;
        if entity.apply_properties(request.into_properties_patch())? {
            entity.rearm_sampler(&shared);
        }

        Ok(entity.view())
    }

    /// Deletes an entity, freeing its identifier for good.
    ///
    /// Deleting a device cancels its sampler, discards its history, and
    /// detaches it from its owning pool. Deleting a pool releases its
    /// members without deleting them.
    ///
    /// # Errors
    ///
    /// Fails when `id` is not registered; deleting the same identifier
    /// twice reports not-found the second time.
    pub async fn delete(&self, id: &DeviceId) -> Result<()> {
        let shared = {
            let mut entities = self.entities.write().await;
            entities.shift_remove(id).ok_or_else(|| Error::not_found(id))?
        };

        let mut entity = shared.lock().await;
        match &mut entity.payload {
            Payload::Device(entry) => {
                let sampler = entry.sampler.take();
                let owner = entry.member_of.take();
                drop(entity);

                if let Some(sampler) = sampler {
                    sampler.stop().await;
                }
                if let Some(owner) = owner {
                    self.detach_member(&owner, id).await;
                }
            }
            Payload::Pool(pool) => {
                let members: Vec<DeviceId> = pool.members.drain(..).collect();
                drop(entity);

                // Deleting the aggregate never deletes its members.
                for member in members {
                    self.release_member(&member).await;
                }
            }
        }
        debug!("deleted `{id}`");

        Ok(())
    }

    /// Returns the metrics snapshot of one entity.
    ///
    /// Device samples are reported oldest first, at most
    /// [`crate::sampler::MAX_SAMPLES`] of them; a pool reports one
    /// `{id, metrics}` entry per member, in member order.
    ///
    /// # Errors
    ///
    /// Fails when `id` is not registered.
    pub async fn metrics(&self, id: &DeviceId) -> Result<Metrics> {
        let shared = self.shared_entity(id).await?;

        let entity = shared.lock().await;
        match &entity.payload {
            Payload::Device(entry) => Ok(Metrics::Device(entry.history.snapshot())),
            Payload::Pool(pool) => {
                let members: Vec<DeviceId> = pool.members.iter().cloned().collect();
                drop(entity);

                let mut entries = Vec::with_capacity(members.len());
                for member in members {
                    let Ok(member_shared) = self.shared_entity(&member).await else {
                        continue;
                    };
                    let member_entity = member_shared.lock().await;
                    if let Payload::Device(entry) = &member_entity.payload {
                        entries.push(PoolMetricsEntry {
                            id: member.clone(),
                            metrics: entry.history.snapshot(),
                        });
                    }
                }

                Ok(Metrics::Pool(entries))
            }
        }
    }

    /// Stops every sampler task and awaits their termination.
    ///
    /// # Note
    ///
    /// For a graceful shutdown, this method should be called before
    /// dropping the [`Registry`]; samplers of a dropped registry still stop
    /// on their own, but only at their next tick.
    pub async fn shutdown(self) {
        for (_, shared) in self.entities.into_inner() {
            let sampler = {
                let mut entity = shared.lock().await;
                match &mut entity.payload {
                    Payload::Device(entry) => entry.sampler.take(),
                    Payload::Pool(_) => None,
                }
            };
            if let Some(sampler) = sampler {
                sampler.stop().await;
            }
        }
    }

    pub(crate) async fn shared_entity(&self, id: &DeviceId) -> Result<SharedEntity> {
        self.entities
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(id))
    }

    async fn detach_member(&self, pool_id: &DeviceId, member: &DeviceId) {
        let Ok(shared) = self.shared_entity(pool_id).await else {
            return;
        };
        let mut pool = shared.lock().await;
        if let Payload::Pool(entry) = &mut pool.payload {
            entry.members.shift_remove(member);
        }
    }

    pub(crate) async fn release_member(&self, member: &DeviceId) {
        let Ok(shared) = self.shared_entity(member).await else {
            return;
        };
        let mut entity = shared.lock().await;
        if let Payload::Device(entry) = &mut entity.payload {
            entry.member_of = None;
        }
    }

    fn allocate(&self) -> DeviceId {
        DeviceId::from_index(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}
