// src/identity.rs
use log::{debug, error};

use crate::utils::RequestError;

/// A caller as the identity provider sees them at this instant. Role sets go
/// stale the moment they are fetched, so nothing here is cached.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub user_id: String,
    pub roles: Vec<String>,
}

impl CallerIdentity {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Resolves a bearer token to an identity and role set. `Ok(None)` means the
/// provider rejected the token; `Err` means the provider itself was
/// unreachable or returned garbage, which must never pass as authorized.
pub trait IdentityProvider {
    async fn resolve(&self, token: &str) -> Result<Option<CallerIdentity>, RequestError>;
}

/// Discord-backed provider: the user id comes from `/users/@me`, the role set
/// from the community guild's member record for that user.
pub struct DiscordIdentityProvider {
    client: reqwest::Client,
    api_base: String,
    guild_id: String,
}

impl DiscordIdentityProvider {
    pub fn new(api_base: String, guild_id: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base,
            guild_id,
        }
    }
}

impl IdentityProvider for DiscordIdentityProvider {
    async fn resolve(&self, token: &str) -> Result<Option<CallerIdentity>, RequestError> {
        let user_response = self
            .client
            .get(format!("{}/users/@me", self.api_base))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to reach identity provider: {}", e);
                RequestError::IdentityProviderUnavailable
            })?;

        if user_response.status() == reqwest::StatusCode::UNAUTHORIZED {
            debug!("Identity provider rejected token");
            return Ok(None);
        }
        if !user_response.status().is_success() {
            error!("Identity provider returned {}", user_response.status());
            return Err(RequestError::IdentityProviderUnavailable);
        }

        let user: serde_json::Value = user_response.json().await.map_err(|e| {
            error!("Failed to parse user info: {}", e);
            RequestError::IdentityProviderUnavailable
        })?;

        let user_id = match user.get("id").and_then(|v| v.as_str()) {
            Some(id) => id.to_string(),
            None => {
                debug!("User info response carried no id");
                return Ok(None);
            }
        };

        let member_response = self
            .client
            .get(format!(
                "{}/users/@me/guilds/{}/member",
                self.api_base, self.guild_id
            ))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to fetch guild member for {}: {}", user_id, e);
                RequestError::IdentityProviderUnavailable
            })?;

        // A caller who is not in the guild still has an identity, just no
        // roles in it.
        let roles = if member_response.status().is_success() {
            let member: serde_json::Value = member_response.json().await.map_err(|e| {
                error!("Failed to parse guild member response: {}", e);
                RequestError::IdentityProviderUnavailable
            })?;
            member
                .get("roles")
                .and_then(|v| v.as_array())
                .map(|list| {
                    list.iter()
                        .filter_map(|r| r.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default()
        } else {
            debug!(
                "No guild member record for {} ({})",
                user_id,
                member_response.status()
            );
            Vec::new()
        };

        Ok(Some(CallerIdentity { user_id, roles }))
    }
}
