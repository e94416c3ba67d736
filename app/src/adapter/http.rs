use actix_web::{
    HttpResponse, ResponseError,
    http::StatusCode,
    web::{self, Path},
};
use derive_more::derive::{Display, Error, From};
use serde_json::json;

use crate::router::{Command, CommandError, CommandRouter};

pub fn new_routes(router: CommandRouter) -> actix_web::Scope {
    web::scope("/api")
        .route("/relays", web::get().to(get_all_relays))
        .route("/relays/{id}", web::get().to(get_relay))
        .route("/relays/{id}/toggle", web::post().to(toggle_relay))
        .route("/relays/{id}/{state}", web::put().to(set_relay))
        .route("/playtime", web::post().to(run_playtime))
        .route("/sensor/temperature", web::get().to(get_temperature))
        .route("/sensor/humidity", web::get().to(get_humidity))
        .route("/settings", web::get().to(get_settings))
        .route("/settings/open_time", web::put().to(set_open_time))
        .route("/settings/close_time", web::put().to(set_close_time))
        .route("/settings/scheduled_channels", web::put().to(set_scheduled_channels))
        .route("/settings/subscribed_topics", web::put().to(set_subscribed_topics))
        .route("/settings/reload", web::post().to(reload_settings))
        .route("/jobs", web::get().to(list_jobs))
        .route("/commands/{name}", web::post().to(run_command))
        .app_data(web::Data::new(router))
}

type ApiResponse = Result<HttpResponse, HttpApiError>;

#[derive(Debug, Display, Error, From)]
#[display("{_0}")]
struct HttpApiError(CommandError);

impl ResponseError for HttpApiError {
    fn status_code(&self) -> StatusCode {
        match self.0.kind() {
            "invalid_payload" | "invalid_state" => StatusCode::BAD_REQUEST,
            "unknown_channel" | "unknown_command" => StatusCode::NOT_FOUND,
            "engine_busy" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("HTTP command failed: {:?}", self.0);
        } else {
            tracing::warn!("HTTP command rejected: {}", self.0);
        }

        HttpResponse::build(status).json(json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        }))
    }
}

async fn respond(router: &CommandRouter, command: Result<Command, CommandError>) -> ApiResponse {
    let response = router.execute(command?).await?;
    Ok(HttpResponse::Ok().json(response))
}

async fn get_all_relays(router: web::Data<CommandRouter>) -> ApiResponse {
    respond(&router, Ok(Command::GetAllRelayStates)).await
}

async fn get_relay(router: web::Data<CommandRouter>, id: Path<String>) -> ApiResponse {
    respond(&router, Command::decode("get_relay_state", &id)).await
}

async fn toggle_relay(router: web::Data<CommandRouter>, id: Path<String>) -> ApiResponse {
    respond(&router, Command::decode("toggle_relay", &id)).await
}

async fn set_relay(router: web::Data<CommandRouter>, path: Path<(String, String)>) -> ApiResponse {
    let (id, state) = path.into_inner();
    let payload = json!({ "channel_id": id, "state": state }).to_string();

    respond(&router, Command::decode("set_relay_state", &payload)).await
}

async fn run_playtime(router: web::Data<CommandRouter>) -> ApiResponse {
    respond(&router, Ok(Command::RunPlaytime)).await
}

async fn get_temperature(router: web::Data<CommandRouter>) -> ApiResponse {
    respond(&router, Ok(Command::GetTemperature)).await
}

async fn get_humidity(router: web::Data<CommandRouter>) -> ApiResponse {
    respond(&router, Ok(Command::GetHumidity)).await
}

async fn get_settings(router: web::Data<CommandRouter>) -> ApiResponse {
    respond(&router, Ok(Command::GetSettings)).await
}

async fn set_open_time(router: web::Data<CommandRouter>, body: String) -> ApiResponse {
    respond(&router, Command::decode("set_open_time", &body)).await
}

async fn set_close_time(router: web::Data<CommandRouter>, body: String) -> ApiResponse {
    respond(&router, Command::decode("set_close_time", &body)).await
}

async fn set_scheduled_channels(router: web::Data<CommandRouter>, body: String) -> ApiResponse {
    respond(&router, Command::decode("set_scheduled_channels", &body)).await
}

async fn set_subscribed_topics(router: web::Data<CommandRouter>, body: String) -> ApiResponse {
    respond(&router, Command::decode("set_subscribed_topics", &body)).await
}

async fn reload_settings(router: web::Data<CommandRouter>) -> ApiResponse {
    respond(&router, Ok(Command::ReloadSettings)).await
}

async fn list_jobs(router: web::Data<CommandRouter>) -> ApiResponse {
    respond(&router, Ok(Command::ListScheduledJobs)).await
}

async fn run_command(router: web::Data<CommandRouter>, name: Path<String>, body: String) -> ApiResponse {
    let response = router.handle(&name, &body).await?;
    Ok(HttpResponse::Ok().json(response))
}
