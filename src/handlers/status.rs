// src/handlers/status.rs
use actix_web::{web, HttpRequest, HttpResponse};
use log::{debug, error};

use crate::config::Config;
use crate::probe::ServerStatusProber;
use crate::utils::{client_ip, RequestError, StatusLimiter};

/// The dashboard polls this on an interval; every hit re-probes all
/// configured servers and returns one status per server, in config order.
pub async fn get_status(
    req: HttpRequest,
    config: web::Data<Config>,
    prober: web::Data<ServerStatusProber>,
    rate_limiter: web::Data<StatusLimiter>,
) -> Result<HttpResponse, RequestError> {
    let peer_ip = client_ip(&req, &config.trusted_proxies)?;

    if rate_limiter.0.check_key(&peer_ip).is_err() {
        error!("Rate limit exceeded for server status for ip: {}", peer_ip);
        return Err(RequestError::RateLimitExceeded);
    }

    let statuses = prober.probe_all(&config.endpoints).await;
    debug!(
        "Probed {} endpoints, {} online",
        statuses.len(),
        statuses.iter().filter(|s| s.online).count()
    );

    Ok(HttpResponse::Ok().json(statuses))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::status::{ServerEndpoint, ServerStatus};
    use actix_web::{test, App};
    use governor::{Quota, RateLimiter};
    use std::num::NonZeroU32;
    use std::time::Duration;
    use tokio::net::UdpSocket;

    async fn spawn_fake_server(players: u8, max_players: u8) -> u16 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut reply: Vec<u8> = vec![0xFF, 0xFF, 0xFF, 0xFF, 0x49, 0x11];
            for s in ["srv", "map", "dir", "desc"] {
                reply.extend_from_slice(s.as_bytes());
                reply.push(0x00);
            }
            reply.extend_from_slice(&[0x34, 0x02, players, max_players]);
            let mut buffer = [0u8; 64];
            if let Ok((_, from)) = socket.recv_from(&mut buffer).await {
                let _ = socket.send_to(&reply, from).await;
            }
        });
        port
    }

    #[actix_web::test]
    async fn status_endpoint_returns_one_entry_per_endpoint() {
        let up = spawn_fake_server(5, 32).await;

        let mut config = Config::default();
        config.probe_timeout_ms = 200;
        config.endpoints = vec![
            ServerEndpoint {
                id: 1,
                host: "127.0.0.1".to_string(),
                base_port: up,
            },
            // Nothing listens here; shows up offline.
            ServerEndpoint {
                id: 2,
                host: "127.0.0.1".to_string(),
                base_port: 1,
            },
        ];

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(config.clone()))
                .app_data(web::Data::new(ServerStatusProber::new(
                    Duration::from_millis(config.probe_timeout_ms),
                )))
                .app_data(web::Data::new(StatusLimiter(RateLimiter::keyed(
                    Quota::per_second(NonZeroU32::new(100).unwrap()),
                ))))
                .route("/server/status", web::get().to(get_status)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/server/status")
            .peer_addr("203.0.113.5:52000".parse().unwrap())
            .to_request();
        let statuses: Vec<ServerStatus> = test::call_and_read_body_json(&app, req).await;

        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].id, 1);
        assert!(statuses[0].online);
        assert_eq!(statuses[0].port, Some(up));
        assert_eq!(statuses[0].players, 5);
        assert_eq!(statuses[0].max_players, 32);
        assert_eq!(statuses[1].id, 2);
        assert!(!statuses[1].online);
        assert_eq!(statuses[1].port, None);
    }
}
