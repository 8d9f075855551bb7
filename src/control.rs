// src/control.rs
//
// Authorization gate in front of the privileged start/stop actions. The gate
// re-resolves the caller on every call, checks the per-action policy, and
// then fires the trigger without waiting on it. Whether the action itself
// succeeds is invisible from here: a 200 means "triggered", nothing more.
use log::{error, info, warn};
use std::path::PathBuf;
use tokio::process::Command;

use crate::config::ActionPolicy;
use crate::identity::IdentityProvider;
use crate::utils::RequestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Stop,
}

impl ControlAction {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

/// Fire-and-forget hook for the actual side effect. Implementations must not
/// block; the gate returns to the caller as soon as this has been called.
pub trait ActionTrigger {
    fn trigger(&self, action: ControlAction, server_id: u16);
}

/// Spawns the community's control script (`<script> start|stop <id>`) and
/// drops the child handle. The script keeps running after we return; its exit
/// status is nobody's business here.
pub struct ScriptTrigger {
    script: PathBuf,
}

impl ScriptTrigger {
    pub fn new(script: PathBuf) -> Self {
        Self { script }
    }
}

impl ActionTrigger for ScriptTrigger {
    fn trigger(&self, action: ControlAction, server_id: u16) {
        match Command::new(&self.script)
            .arg(action.verb())
            .arg(server_id.to_string())
            .spawn()
        {
            Ok(_child) => {
                info!(
                    "Spawned {} {} {}",
                    self.script.display(),
                    action.verb(),
                    server_id
                );
            }
            Err(e) => {
                // Still a success from the caller's point of view; the
                // trigger's outcome is not part of the contract.
                error!("Failed to spawn control script: {}", e);
            }
        }
    }
}

pub struct ActionGate<I, T> {
    identity: I,
    trigger: T,
    start_policy: ActionPolicy,
    stop_policy: ActionPolicy,
    server_count: u16,
}

impl<I: IdentityProvider, T: ActionTrigger> ActionGate<I, T> {
    pub fn new(
        identity: I,
        trigger: T,
        start_policy: ActionPolicy,
        stop_policy: ActionPolicy,
        server_count: u16,
    ) -> Self {
        Self {
            identity,
            trigger,
            start_policy,
            stop_policy,
            server_count,
        }
    }

    pub async fn start(&self, token: Option<&str>, server_id: u16) -> Result<(), RequestError> {
        self.authorize_and_trigger(ControlAction::Start, token, server_id)
            .await
    }

    pub async fn stop(&self, token: Option<&str>, server_id: u16) -> Result<(), RequestError> {
        self.authorize_and_trigger(ControlAction::Stop, token, server_id)
            .await
    }

    async fn authorize_and_trigger(
        &self,
        action: ControlAction,
        token: Option<&str>,
        server_id: u16,
    ) -> Result<(), RequestError> {
        let policy = match action {
            ControlAction::Start => &self.start_policy,
            ControlAction::Stop => &self.stop_policy,
        };

        let token = token.ok_or(RequestError::Unauthorized)?;

        let caller = self
            .identity
            .resolve(token)
            .await?
            .ok_or(RequestError::Unauthorized)?;

        if let Some(role) = &policy.required_role {
            if !caller.has_role(role) {
                warn!(
                    "User {} denied {} on server {}: missing role",
                    caller.user_id,
                    action.verb(),
                    server_id
                );
                return Err(RequestError::Unauthorized);
            }
        }

        if policy.check_bounds && !(1..=self.server_count).contains(&server_id) {
            return Err(RequestError::InvalidServerId(server_id));
        }

        self.trigger.trigger(action, server_id);
        info!(
            "User {} triggered {} on server {}",
            caller.user_id,
            action.verb(),
            server_id
        );
        Ok(())
    }
}
