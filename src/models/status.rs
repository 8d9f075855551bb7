// src/models/status.rs
use serde::{Deserialize, Serialize};

/// One configured game server: a stable id, a host, and the first of the
/// two UDP query ports we try (`base_port`, then `base_port + 1`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEndpoint {
    pub id: u16,
    pub host: String,
    pub base_port: u16,
}

/// Result of probing one endpoint. Built fresh on every probe cycle and
/// handed straight to the dashboard as JSON; never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub id: u16,
    pub host: String,
    pub port: Option<u16>,
    pub online: bool,
    pub players: u8,
    pub max_players: u8,
    pub player_list: Vec<String>,
}

impl ServerStatus {
    pub fn offline(endpoint: &ServerEndpoint) -> Self {
        Self {
            id: endpoint.id,
            host: endpoint.host.clone(),
            port: None,
            online: false,
            players: 0,
            max_players: 0,
            player_list: Vec::new(),
        }
    }

    pub fn online(endpoint: &ServerEndpoint, port: u16, players: u8, max_players: u8) -> Self {
        Self {
            id: endpoint.id,
            host: endpoint.host.clone(),
            port: Some(port),
            online: true,
            players,
            max_players,
            player_list: Vec::new(),
        }
    }
}
