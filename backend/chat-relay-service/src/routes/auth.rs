use actix_web::{post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::AppResult;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[post("/api/auth/login")]
pub async fn login(
    state: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> AppResult<HttpResponse> {
    let username = state.accounts.verify(&body.username, &body.password).map_err(|e| {
        tracing::info!(username = %body.username, "login rejected");
        e
    })?;

    tracing::info!(username, "login succeeded");
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Login successful",
        "username": username,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use actix_web::{http::StatusCode, test, App};

    #[actix_web::test]
    async fn login_status_codes() {
        let state = AppState::in_memory(Config::test_defaults());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .service(login),
        )
        .await;

        let ok = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({"username": "alice", "password": "alice-pass"}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, ok).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["username"], "alice");

        let wrong = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({"username": "alice", "password": "nope"}))
            .to_request();
        assert_eq!(test::call_service(&app, wrong).await.status(), StatusCode::UNAUTHORIZED);

        let blank = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({"username": "", "password": ""}))
            .to_request();
        assert_eq!(test::call_service(&app, blank).await.status(), StatusCode::BAD_REQUEST);
    }
}
