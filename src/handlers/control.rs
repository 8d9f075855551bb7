// src/handlers/control.rs
use actix_web::{web, HttpRequest, HttpResponse};
use log::error;
use serde::Deserialize;

use crate::config::Config;
use crate::control::{ActionGate, ActionTrigger};
use crate::identity::IdentityProvider;
use crate::utils::{bearer_token, client_ip, ControlLimiter, RequestError};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest {
    pub server_id: u16,
}

pub async fn start_server<I, T>(
    req: HttpRequest,
    config: web::Data<Config>,
    gate: web::Data<ActionGate<I, T>>,
    body: web::Json<ControlRequest>,
    rate_limiter: web::Data<ControlLimiter>,
) -> Result<HttpResponse, RequestError>
where
    I: IdentityProvider + 'static,
    T: ActionTrigger + 'static,
{
    check_rate_limit(&req, &config, &rate_limiter, "start")?;
    gate.start(bearer_token(&req).as_deref(), body.server_id)
        .await?;
    Ok(HttpResponse::Ok().finish())
}

pub async fn stop_server<I, T>(
    req: HttpRequest,
    config: web::Data<Config>,
    gate: web::Data<ActionGate<I, T>>,
    body: web::Json<ControlRequest>,
    rate_limiter: web::Data<ControlLimiter>,
) -> Result<HttpResponse, RequestError>
where
    I: IdentityProvider + 'static,
    T: ActionTrigger + 'static,
{
    check_rate_limit(&req, &config, &rate_limiter, "stop")?;
    gate.stop(bearer_token(&req).as_deref(), body.server_id)
        .await?;
    Ok(HttpResponse::Ok().finish())
}

fn check_rate_limit(
    req: &HttpRequest,
    config: &Config,
    rate_limiter: &ControlLimiter,
    action: &str,
) -> Result<(), RequestError> {
    let peer_ip = client_ip(req, &config.trusted_proxies)?;
    if rate_limiter.0.check_key(&peer_ip).is_err() {
        error!("Rate limit exceeded for {} for ip: {}", action, peer_ip);
        return Err(RequestError::RateLimitExceeded);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActionPolicy;
    use crate::control::ControlAction;
    use crate::identity::CallerIdentity;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use governor::{Quota, RateLimiter};
    use std::num::NonZeroU32;
    use std::sync::{Arc, Mutex};

    struct StaticProvider {
        token: &'static str,
        roles: Vec<String>,
    }

    impl IdentityProvider for StaticProvider {
        async fn resolve(&self, token: &str) -> Result<Option<CallerIdentity>, RequestError> {
            if token == self.token {
                Ok(Some(CallerIdentity {
                    user_id: "1000".to_string(),
                    roles: self.roles.clone(),
                }))
            } else {
                Ok(None)
            }
        }
    }

    #[derive(Clone, Default)]
    struct RecordingTrigger {
        calls: Arc<Mutex<Vec<(ControlAction, u16)>>>,
    }

    impl ActionTrigger for RecordingTrigger {
        fn trigger(&self, action: ControlAction, server_id: u16) {
            self.calls.lock().unwrap().push((action, server_id));
        }
    }

    type TestGate = ActionGate<StaticProvider, RecordingTrigger>;

    fn test_gate(roles: &[&str], trigger: RecordingTrigger) -> web::Data<TestGate> {
        web::Data::new(ActionGate::new(
            StaticProvider {
                token: "good",
                roles: roles.iter().map(|r| r.to_string()).collect(),
            },
            trigger,
            ActionPolicy {
                required_role: Some("server-control".to_string()),
                check_bounds: false,
            },
            ActionPolicy {
                required_role: None,
                check_bounds: true,
            },
            6,
        ))
    }

    fn limiter() -> web::Data<ControlLimiter> {
        let quota = Quota::per_second(NonZeroU32::new(100).unwrap());
        web::Data::new(ControlLimiter(RateLimiter::keyed(quota)))
    }

    async fn post(
        gate: web::Data<TestGate>,
        path: &str,
        token: Option<&str>,
        server_id: u16,
    ) -> StatusCode {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(Config::default()))
                .app_data(gate)
                .app_data(limiter())
                .route(
                    "/server/start",
                    web::post().to(start_server::<StaticProvider, RecordingTrigger>),
                )
                .route(
                    "/server/stop",
                    web::post().to(stop_server::<StaticProvider, RecordingTrigger>),
                ),
        )
        .await;

        let mut req = test::TestRequest::post()
            .uri(path)
            .peer_addr("203.0.113.5:52000".parse().unwrap())
            .set_json(serde_json::json!({ "serverId": server_id }));
        if let Some(token) = token {
            req = req.insert_header(("Authorization", format!("Bearer {}", token)));
        }

        test::call_service(&app, req.to_request()).await.status()
    }

    #[actix_web::test]
    async fn start_succeeds_for_role_holder_and_fires_trigger() {
        let trigger = RecordingTrigger::default();
        let gate = test_gate(&["server-control"], trigger.clone());
        let status = post(gate, "/server/start", Some("good"), 2).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            *trigger.calls.lock().unwrap(),
            vec![(ControlAction::Start, 2)]
        );
    }

    #[actix_web::test]
    async fn start_is_403_without_the_control_role() {
        let trigger = RecordingTrigger::default();
        let gate = test_gate(&["member"], trigger.clone());
        let status = post(gate, "/server/start", Some("good"), 2).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(trigger.calls.lock().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn missing_token_is_403() {
        let gate = test_gate(&["server-control"], RecordingTrigger::default());
        let status = post(gate, "/server/stop", None, 2).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn stop_is_400_for_out_of_range_ids() {
        let trigger = RecordingTrigger::default();
        let gate = test_gate(&["member"], trigger.clone());
        assert_eq!(
            post(gate.clone(), "/server/stop", Some("good"), 0).await,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            post(gate, "/server/stop", Some("good"), 7).await,
            StatusCode::BAD_REQUEST
        );
        assert!(trigger.calls.lock().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn stop_succeeds_for_any_authenticated_caller() {
        let trigger = RecordingTrigger::default();
        let gate = test_gate(&["member"], trigger.clone());
        let status = post(gate, "/server/stop", Some("good"), 6).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            *trigger.calls.lock().unwrap(),
            vec![(ControlAction::Stop, 6)]
        );
    }
}
