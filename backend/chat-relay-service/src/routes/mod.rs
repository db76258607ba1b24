use actix_web::web;

pub mod auth;
pub mod messages;
pub mod uploads;
pub mod wsroute;

async fn health() -> &'static str {
    "OK"
}

/// Register every HTTP and WebSocket route.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(messages::get_messages)
        .service(uploads::upload_file)
        .service(uploads::get_upload)
        .service(auth::login)
        .service(wsroute::ws_handler)
        .route("/health", web::get().to(health));
}
