use std::env;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;
use governor::Quota;

use crate::models::status::ServerEndpoint;

/// Each configured server after the first listens 100 ports up from the
/// previous one.
pub const PORT_STRIDE: u16 = 100;

/// Who may fire a control action, and whether the server id is range-checked
/// before the trigger. Both knobs are per-action because the deployed policy
/// is asymmetric (see `Config::log_policy_warnings`).
#[derive(Clone)]
pub struct ActionPolicy {
    pub required_role: Option<String>,
    pub check_bounds: bool,
}

#[derive(Clone)]
pub struct Config {
    // Probing
    pub endpoints: Vec<ServerEndpoint>,
    pub probe_timeout_ms: u64,

    // Control actions
    pub control_script: PathBuf,
    pub start_policy: ActionPolicy,
    pub stop_policy: ActionPolicy,

    // Identity provider
    pub identity_api_base: String,
    pub guild_id: String,

    // Rate limiting
    pub trusted_proxies: Vec<IpAddr>,
    pub status_period_secs: u64,
    pub status_burst_limit: u32,
    pub control_period_secs: u64,
    pub control_burst_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints("127.0.0.1", 27015, 6),
            probe_timeout_ms: 3000,
            control_script: PathBuf::from("/usr/local/bin/server-control.sh"),
            start_policy: ActionPolicy {
                required_role: Some("server-control".to_string()),
                check_bounds: false,
            },
            stop_policy: ActionPolicy {
                required_role: None,
                check_bounds: true,
            },
            identity_api_base: "https://discord.com/api".to_string(),
            guild_id: String::new(),
            trusted_proxies: Vec::new(),
            status_period_secs: 5,
            status_burst_limit: 10,
            control_period_secs: 5,
            control_burst_limit: 5,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let host = env::var("GAME_SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let base_port = env::var("GAME_BASE_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(27015);

        let server_count = env::var("GAME_SERVER_COUNT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(6);

        Self {
            endpoints: default_endpoints(&host, base_port, server_count),

            probe_timeout_ms: env::var("PROBE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),

            control_script: env::var("CONTROL_SCRIPT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/usr/local/bin/server-control.sh")),

            start_policy: ActionPolicy {
                required_role: Some(
                    env::var("START_REQUIRED_ROLE")
                        .unwrap_or_else(|_| "server-control".to_string()),
                ),
                check_bounds: false,
            },

            // Stopping only requires an authenticated caller unless a role is
            // configured. Matches the deployed behaviour; do not tighten
            // silently.
            stop_policy: ActionPolicy {
                required_role: env::var("STOP_REQUIRED_ROLE").ok(),
                check_bounds: true,
            },

            identity_api_base: env::var("IDENTITY_API_BASE")
                .unwrap_or_else(|_| "https://discord.com/api".to_string()),

            guild_id: env::var("DISCORD_GUILD_ID").unwrap_or_default(),

            // Forwarded headers are only believed when the connection comes
            // from one of these addresses.
            trusted_proxies: env::var("TRUSTED_PROXIES")
                .map(|v| {
                    v.split(',')
                        .filter_map(|ip| ip.trim().parse().ok())
                        .collect()
                })
                .unwrap_or_default(),

            status_period_secs: env::var("STATUS_PERIOD_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),

            status_burst_limit: env::var("STATUS_BURST_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),

            control_period_secs: env::var("CONTROL_PERIOD_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),

            control_burst_limit: env::var("CONTROL_BURST_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn status_quota(&self) -> Quota {
        Quota::with_period(Duration::from_secs(self.status_period_secs))
            .unwrap()
            .allow_burst(NonZeroU32::new(self.status_burst_limit).unwrap())
    }

    pub fn control_quota(&self) -> Quota {
        Quota::with_period(Duration::from_secs(self.control_period_secs))
            .unwrap()
            .allow_burst(NonZeroU32::new(self.control_burst_limit).unwrap())
    }

    /// The inherited policy is asymmetric: start demands a specific role but
    /// skips the bounds check, stop accepts any authenticated caller but
    /// range-checks the id. Pending confirmation from the community admins,
    /// so make the asymmetry loud at startup instead of hiding it.
    pub fn log_policy_warnings(&self) {
        if self.stop_policy.required_role.is_none() {
            log::warn!(
                "stop action accepts any authenticated caller (set STOP_REQUIRED_ROLE to restrict)"
            );
        }
        if !self.start_policy.check_bounds {
            log::warn!("start action does not range-check the server id");
        }
    }
}

fn default_endpoints(host: &str, base_port: u16, count: u16) -> Vec<ServerEndpoint> {
    // Ports grow monotonically, so stop at the first one past u16 range
    // instead of wrapping into ports we were never asked about.
    let endpoints: Vec<ServerEndpoint> = (0..count)
        .map_while(|i| {
            let port = i
                .checked_mul(PORT_STRIDE)
                .and_then(|offset| base_port.checked_add(offset))?;
            Some(ServerEndpoint {
                id: i + 1,
                host: host.to_string(),
                base_port: port,
            })
        })
        .collect();

    if endpoints.len() < count as usize {
        log::warn!(
            "Dropped {} configured endpoints whose ports would exceed {}",
            count as usize - endpoints.len(),
            u16::MAX
        );
    }
    endpoints
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_endpoint_list_strides_by_100() {
        let endpoints = default_endpoints("10.0.0.5", 27015, 6);
        assert_eq!(endpoints.len(), 6);
        assert_eq!(endpoints[0].id, 1);
        assert_eq!(endpoints[0].base_port, 27015);
        assert_eq!(endpoints[5].id, 6);
        assert_eq!(endpoints[5].base_port, 27515);
    }

    #[test]
    fn endpoint_list_drops_ports_past_u16_range() {
        // 27015 + 386 * 100 would wrap; the list ends at the last fitting
        // port instead of panicking.
        let endpoints = default_endpoints("10.0.0.5", 27015, 400);
        assert_eq!(endpoints.len(), 386);
        assert_eq!(endpoints.last().unwrap().base_port, 65515);

        let high = default_endpoints("10.0.0.5", 65000, 10);
        assert_eq!(high.len(), 6);
        assert_eq!(high.last().unwrap().base_port, 65500);
    }

    #[test]
    fn default_policies_match_deployed_asymmetry() {
        let config = Config::default();
        assert_eq!(
            config.start_policy.required_role.as_deref(),
            Some("server-control")
        );
        assert!(!config.start_policy.check_bounds);
        assert!(config.stop_policy.required_role.is_none());
        assert!(config.stop_policy.check_bounds);
    }
}
