use casa::command::{AppliedFields, Command, CommandError};
use casa::device::DeviceId;
use casa::response::ActionResponse;

use futures_util::future::join_all;

use serde::Serialize;
use serde_json::Value;

use tracing::debug;

use crate::entity::{Action, Entity, Payload};
use crate::error::{Error, Result};
use crate::registry::Registry;

/// The outcome of an operation dispatched to a device or to a pool.
///
/// A pool target fans the operation out to every member and aggregates one
/// outcome per member; the serialized forms are the member payload itself
/// for a plain device and a `responses` array for a pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outcome<T> {
    /// The target was a plain device.
    Device(T),
    /// The target was a pool.
    Pool(PoolResponses),
}

impl<T> Outcome<T> {
    /// Returns the payload, if the target was a plain device.
    #[must_use]
    pub fn as_device(&self) -> Option<&T> {
        match self {
            Self::Device(payload) => Some(payload),
            Self::Pool(_) => None,
        }
    }

    /// Returns the per-member outcomes, if the target was a pool.
    #[must_use]
    pub fn as_pool(&self) -> Option<&PoolResponses> {
        match self {
            Self::Device(_) => None,
            Self::Pool(responses) => Some(responses),
        }
    }
}

/// The aggregate body of a pool fan-out.
///
/// A fan-out never fails fast: every member is attempted, and partial
/// success is reported per member rather than as one opaque error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolResponses {
    /// One outcome per member, in member order.
    pub responses: Vec<MemberOutcome>,
}

impl PoolResponses {
    /// Returns whether every member applied the operation.
    #[must_use]
    pub fn all_ok(&self) -> bool {
        self.responses.iter().all(|outcome| outcome.error.is_none())
    }
}

/// The outcome of one member of a pool fan-out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberOutcome {
    /// Member identifier.
    pub id: DeviceId,
    /// The member's response payload, when the operation applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    /// The failure that stopped this member, when it did not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
}

impl MemberOutcome {
    fn ok<T: Serialize>(id: DeviceId, payload: &T) -> Self {
        Self {
            id,
            response: Some(serde_json::to_value(payload).unwrap_or(Value::Null)),
            error: None,
        }
    }

    fn failed(id: DeviceId, error: Error) -> Self {
        Self {
            id,
            response: None,
            error: Some(error),
        }
    }
}

impl Registry {
    /// Connects the target, returning it to the `Connected` state.
    ///
    /// `connect` is the only lifecycle action valid from every state. A
    /// pool target fans the action out to all of its members.
    ///
    /// # Errors
    ///
    /// Fails when `id` is not registered.
    pub async fn connect(&self, id: &DeviceId) -> Result<Outcome<ActionResponse>> {
        self.lifecycle(id, Action::Connect).await
    }

    /// Disconnects the target.
    ///
    /// A pool target fans the action out to all of its members.
    ///
    /// # Errors
    ///
    /// Fails when `id` is not registered, or with a service-unavailable
    /// error when the device is not `Connected`; the state is unchanged in
    /// that case.
    pub async fn disconnect(&self, id: &DeviceId) -> Result<Outcome<ActionResponse>> {
        self.lifecycle(id, Action::Disconnect).await
    }

    /// Reboots the target: a disconnect followed by an immediate
    /// reconnection, reported as `connected`.
    ///
    /// A pool target fans the action out to all of its members.
    ///
    /// # Errors
    ///
    /// Fails when `id` is not registered, or with a service-unavailable
    /// error when the device is not `Connected`; the state is unchanged in
    /// that case.
    pub async fn reboot(&self, id: &DeviceId) -> Result<Outcome<ActionResponse>> {
        self.lifecycle(id, Action::Reboot).await
    }

    /// Powers the target off, moving it to the `PoweredOff` state.
    ///
    /// A pool target fans the action out to all of its members.
    ///
    /// # Errors
    ///
    /// Fails when `id` is not registered, or with a service-unavailable
    /// error when the device is not `Connected`; the state is unchanged in
    /// that case.
    pub async fn power_off(&self, id: &DeviceId) -> Result<Outcome<ActionResponse>> {
        self.lifecycle(id, Action::PowerOff).await
    }

    /// Executes a command on the target, merging the accepted fields into
    /// its data payload and echoing the fields actually applied.
    ///
    /// A pool target fans the unmodified command out to every member; a
    /// member that is not `Connected` fails for that member only.
    ///
    /// # Errors
    ///
    /// Fails when `id` is not registered, when the command is empty or
    /// ill-shaped, or with a service-unavailable error when a plain device
    /// target is not `Connected`.
    pub async fn execute(
        &self,
        id: &DeviceId,
        command: &Command,
    ) -> Result<Outcome<AppliedFields>> {
        if command.is_empty() {
            return Err(CommandError::Empty.into());
        }

        let shared = self.shared_entity(id).await?;
        let mut entity = shared.lock().await;

        let members = pool_members(&entity);
        match members {
            None => entity.apply_command(command).map(Outcome::Device),
            Some(members) => {
                drop(entity);
                debug!("fanning `execute` out to {} members of `{id}`", members.len());

                Ok(Outcome::Pool(
                    self.fan_out(members, |member| member.apply_command(command))
                        .await,
                ))
            }
        }
    }

    async fn lifecycle(&self, id: &DeviceId, action: Action) -> Result<Outcome<ActionResponse>> {
        let shared = self.shared_entity(id).await?;
        let mut entity = shared.lock().await;

        let members = pool_members(&entity);
        match members {
            None => entity.apply_action(action).map(Outcome::Device),
            Some(members) => {
                drop(entity);
                debug!(
                    "fanning `{}` out to {} members of `{id}`",
                    action.as_str(),
                    members.len()
                );

                Ok(Outcome::Pool(
                    self.fan_out(members, move |member| member.apply_action(action))
                        .await,
                ))
            }
        }
    }

    /// Applies `op` to every member concurrently and joins all outcomes;
    /// one member's failure never cancels the others.
    async fn fan_out<T, F>(&self, members: Vec<DeviceId>, op: F) -> PoolResponses
    where
        T: Serialize,
        F: Fn(&mut Entity) -> Result<T>,
    {
        let op = &op;
        let outcomes = members.into_iter().map(|id| async move {
            match self.shared_entity(&id).await {
                Ok(shared) => {
                    let mut member = shared.lock().await;
                    match op(&mut member) {
                        Ok(payload) => MemberOutcome::ok(id, &payload),
                        Err(error) => MemberOutcome::failed(id, error),
                    }
                }
                Err(error) => MemberOutcome::failed(id, error),
            }
        });

        PoolResponses {
            responses: join_all(outcomes).await,
        }
    }
}

fn pool_members(entity: &Entity) -> Option<Vec<DeviceId>> {
    match &entity.payload {
        Payload::Device(_) => None,
        Payload::Pool(pool) => Some(pool.members.iter().cloned().collect()),
    }
}

#[cfg(test)]
mod tests {
    use casa::command::Command;
    use casa::device::{DeviceId, DeviceState};
    use casa::response::ActionResponse;

    use serde_json::json;

    use crate::error::ErrorKind;
    use crate::registry::ModifyRequest;
    use crate::tests::{lamp, lamp_pool, registry};

    async fn state_of(registry: &crate::registry::Registry, id: &DeviceId) -> DeviceState {
        registry.device(id).await.unwrap().status.status
    }

    #[tokio::test]
    async fn disconnect_then_connect_round_trip() {
        let registry = registry();
        let id = lamp(&registry).await;

        let disconnected = registry.disconnect(&id).await.unwrap();
        assert_eq!(
            disconnected.as_device(),
            Some(&ActionResponse::disconnected())
        );
        assert_eq!(state_of(&registry, &id).await, DeviceState::Disconnected);

        let connected = registry.connect(&id).await.unwrap();
        assert_eq!(connected.as_device(), Some(&ActionResponse::connected()));
        assert_eq!(state_of(&registry, &id).await, DeviceState::Connected);
    }

    #[tokio::test]
    async fn reboot_reports_connected() {
        let registry = registry();
        let id = lamp(&registry).await;

        let rebooted = registry.reboot(&id).await.unwrap();

        assert_eq!(rebooted.as_device(), Some(&ActionResponse::connected()));
        assert_eq!(state_of(&registry, &id).await, DeviceState::Connected);
    }

    #[tokio::test]
    async fn reboot_and_power_off_require_connected() {
        let registry = registry();
        let id = lamp(&registry).await;

        registry.disconnect(&id).await.unwrap();

        let rejected = registry.reboot(&id).await.unwrap_err();
        assert_eq!(rejected.kind(), ErrorKind::Unavailable);

        let rejected = registry.power_off(&id).await.unwrap_err();
        assert_eq!(rejected.kind(), ErrorKind::Unavailable);

        // The failed actions left the state alone.
        assert_eq!(state_of(&registry, &id).await, DeviceState::Disconnected);
    }

    #[tokio::test]
    async fn power_off_transitions_to_powered_off() {
        let registry = registry();
        let id = lamp(&registry).await;

        let off = registry.power_off(&id).await.unwrap();

        assert_eq!(off.as_device(), Some(&ActionResponse::power_off()));
        assert_eq!(state_of(&registry, &id).await, DeviceState::PoweredOff);
    }

    #[tokio::test]
    async fn execute_merges_and_echoes_applied_fields() {
        let registry = registry();
        let id = lamp(&registry).await;

        let outcome = registry
            .execute(&id, &Command::new().field("state", "on"))
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_value(outcome.as_device().unwrap()).unwrap(),
            json!({ "state": "on" })
        );

        let data = registry.device(&id).await.unwrap().data.unwrap();
        assert_eq!(data.get("state").unwrap(), "on");
    }

    #[tokio::test]
    async fn execute_ignores_fields_outside_the_schema() {
        let registry = registry();
        let id = lamp(&registry).await;

        let outcome = registry
            .execute(
                &id,
                &Command::new().field("state", "on").field("color", "FF0000"),
            )
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_value(outcome.as_device().unwrap()).unwrap(),
            json!({ "state": "on" })
        );

        let data = registry.device(&id).await.unwrap().data.unwrap();
        assert_eq!(data.get("color"), None);
    }

    #[tokio::test]
    async fn execute_requires_connected() {
        let registry = registry();
        let id = lamp(&registry).await;

        registry.disconnect(&id).await.unwrap();

        let rejected = registry
            .execute(&id, &Command::new().field("state", "on"))
            .await
            .unwrap_err();

        assert_eq!(rejected.kind(), ErrorKind::Unavailable);

        let data = registry.device(&id).await.unwrap().data.unwrap();
        assert_eq!(data.get("state").unwrap(), "off");
    }

    #[tokio::test]
    async fn empty_and_ill_shaped_commands_are_rejected() {
        let registry = registry();
        let id = lamp(&registry).await;

        let rejected = registry.execute(&id, &Command::new()).await.unwrap_err();
        assert_eq!(rejected.kind(), ErrorKind::InvalidProperties);

        let rejected = registry
            .execute(&id, &Command::new().field("state", "half"))
            .await
            .unwrap_err();
        assert_eq!(rejected.kind(), ErrorKind::InvalidProperties);

        let data = registry.device(&id).await.unwrap().data.unwrap();
        assert_eq!(data.get("state").unwrap(), "off");
    }

    #[tokio::test]
    async fn pool_execute_updates_every_member() {
        let registry = registry();
        let (pool, first, second) = lamp_pool(&registry).await;

        let outcome = registry
            .execute(&pool, &Command::new().field("state", "on"))
            .await
            .unwrap();

        let responses = outcome.as_pool().unwrap();
        assert_eq!(responses.responses.len(), 2);
        assert!(responses.all_ok());

        for id in [&first, &second] {
            let data = registry.device(id).await.unwrap().data.unwrap();
            assert_eq!(data.get("state").unwrap(), "on");
        }
    }

    #[tokio::test]
    async fn pool_fan_out_reports_partial_failure_per_member() {
        let registry = registry();
        let (pool, first, second) = lamp_pool(&registry).await;

        registry.disconnect(&first).await.unwrap();

        let outcome = registry
            .execute(&pool, &Command::new().field("state", "on"))
            .await
            .unwrap();
        let responses = outcome.as_pool().unwrap();

        assert!(!responses.all_ok());
        assert_eq!(responses.responses.len(), 2);

        let failed = &responses.responses[0];
        assert_eq!(failed.id, first);
        assert_eq!(failed.error.as_ref().unwrap().kind(), ErrorKind::Unavailable);

        let applied = &responses.responses[1];
        assert_eq!(applied.id, second);
        assert_eq!(applied.response.as_ref().unwrap(), &json!({ "state": "on" }));

        // The reachable member was updated, the unreachable one was not.
        let data = registry.device(&second).await.unwrap().data.unwrap();
        assert_eq!(data.get("state").unwrap(), "on");
        let data = registry.device(&first).await.unwrap().data.unwrap();
        assert_eq!(data.get("state").unwrap(), "off");
    }

    #[tokio::test]
    async fn pool_lifecycle_actions_fan_out() {
        let registry = registry();
        let (pool, first, second) = lamp_pool(&registry).await;

        let outcome = registry.disconnect(&pool).await.unwrap();
        assert!(outcome.as_pool().unwrap().all_ok());

        assert_eq!(state_of(&registry, &first).await, DeviceState::Disconnected);
        assert_eq!(state_of(&registry, &second).await, DeviceState::Disconnected);

        let outcome = registry.connect(&pool).await.unwrap();
        assert!(outcome.as_pool().unwrap().all_ok());

        assert_eq!(state_of(&registry, &first).await, DeviceState::Connected);
        assert_eq!(state_of(&registry, &second).await, DeviceState::Connected);
    }

    #[tokio::test]
    async fn empty_pool_fan_out_succeeds_with_no_outcomes() {
        let registry = registry();
        let pool = registry.create_pool(casa::device::DeviceKind::Lamp).await;

        let outcome = registry
            .execute(&pool, &Command::new().field("state", "on"))
            .await
            .unwrap();

        assert!(outcome.as_pool().unwrap().responses.is_empty());
    }

    #[tokio::test]
    async fn lifecycle_on_unknown_id_reports_not_found() {
        let registry = registry();
        let unknown = DeviceId::from("device-42");

        assert_eq!(
            registry.connect(&unknown).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            registry
                .execute(&unknown, &Command::new().field("state", "on"))
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn member_outcome_serialized_shape() {
        let registry = registry();
        let (pool, first, _) = lamp_pool(&registry).await;

        registry
            .modify(&pool, ModifyRequest::with_remove([first.clone()]))
            .await
            .unwrap();
        registry.disconnect(&first).await.unwrap();
        registry
            .modify(&pool, ModifyRequest::with_add([first.clone()]))
            .await
            .unwrap();

        let outcome = registry.connect(&pool).await.unwrap();
        let serialized = serde_json::to_value(outcome.as_pool().unwrap()).unwrap();

        let responses = serialized["responses"].as_array().unwrap();
        assert_eq!(responses.len(), 2);
        for response in responses {
            assert_eq!(response["response"], json!({ "command_action": "connected" }));
        }
    }
}
