use crate::api::{PlatformsResponse, PushRequest, PushResponse};
use crate::state::AppState;
use actix_web::{App, HttpResponse, HttpServer, Responder, get, post, web};
use common::PlatformRegistry;
use dingtalk_group_bot::DingTalkPlatformFactory;
use log::*;

mod api;
mod state;

const DEFAULT_BIND: &str = "127.0.0.1:8888";

#[get("/hello")]
async fn hello() -> impl Responder {
    HttpResponse::Ok().body("Hello World!")
}

#[get("/platforms")]
async fn platforms(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(PlatformsResponse {
        platforms: state.list_platforms(),
    })
}

#[post("/push")]
async fn push(req: web::Json<PushRequest>, state: web::Data<AppState>) -> HttpResponse {
    info!(
        "Received {} push request for platform: {}",
        req.message.kind(),
        req.platform
    );

    let platform = match state.platform(&req.platform, &req.config) {
        Ok(p) => p,
        Err(reason) => return HttpResponse::BadRequest().json(PushResponse::failed(reason)),
    };

    let response = match platform.send(req.message.clone()).await {
        Ok(push_result) => PushResponse {
            result: push_result,
        },
        Err(push_error) => {
            warn!("Push to {} failed: {}", req.platform, push_error);
            PushResponse::failed(push_error.to_string())
        }
    };

    HttpResponse::Ok().json(response)
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(hello).service(platforms).service(push);
}

fn registry() -> PlatformRegistry {
    let mut registry = PlatformRegistry::new();
    registry.register(Box::new(DingTalkPlatformFactory));
    registry
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("debug"));

    let registry = registry();
    info!("Registered platforms: {:?}", registry.list_platforms());

    let state = web::Data::new(AppState::new(registry));
    let bind = std::env::var("MULTI_PUSH_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    info!("Listening on {bind}");

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(state.clone())
            .configure(routes)
    })
    .bind(bind)?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test};
    use serde_json::{Value, json};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn state() -> web::Data<AppState> {
        web::Data::new(AppState::new(registry()))
    }

    #[actix_web::test]
    async fn test_list_platforms() {
        let app = test::init_service(App::new().app_data(state()).configure(routes)).await;
        let req = test::TestRequest::get().uri("/platforms").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, json!({"platforms": ["dingtalk"]}));
    }

    #[actix_web::test]
    async fn test_push_unknown_platform() {
        let app = test::init_service(App::new().app_data(state()).configure(routes)).await;
        let req = test::TestRequest::post()
            .uri("/push")
            .set_json(json!({
                "platform": "slack",
                "config": {},
                "message": {"type": "Text", "payload": {"content": "hi"}}
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: PushResponse = test::read_body_json(resp).await;
        assert!(!body.result.success);
        assert_eq!(
            body.result.response.as_deref(),
            Some("Platform 'slack' not found")
        );
    }

    #[actix_web::test]
    async fn test_push_bad_config() {
        let app = test::init_service(App::new().app_data(state()).configure(routes)).await;
        let req = test::TestRequest::post()
            .uri("/push")
            .set_json(json!({
                "platform": "dingtalk",
                "config": {"secret": "SECabc"},
                "message": {"type": "Text", "payload": {"content": "hi"}}
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_push_relays_to_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"errcode": 0, "errmsg": "ok"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let app = test::init_service(App::new().app_data(state()).configure(routes)).await;
        let req = test::TestRequest::post()
            .uri("/push")
            .set_json(json!({
                "platform": "dingtalk",
                "config": {"webhook": format!("{}/robot/send?access_token=abc", server.uri())},
                "message": {
                    "type": "Markdown",
                    "payload": {"title": "发布", "text": "[详情](https://example.com)"}
                }
            }))
            .to_request();
        let body: PushResponse = test::call_and_read_body_json(&app, req).await;
        assert!(body.result.success);
        assert_eq!(body.result.error_code, Some(0));

        let requests = server.received_requests().await.unwrap();
        let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(sent["msgtype"], "markdown");
        assert!(
            sent["markdown"]["text"]
                .as_str()
                .unwrap()
                .starts_with("[详情](dingtalk://dingtalkclient/page/link?url=")
        );
    }

    #[actix_web::test]
    async fn test_push_validation_failure_reported() {
        let app = test::init_service(App::new().app_data(state()).configure(routes)).await;
        let req = test::TestRequest::post()
            .uri("/push")
            .set_json(json!({
                "platform": "dingtalk",
                "config": {"webhook": "http://127.0.0.1:9/robot/send"},
                "message": {"type": "Text", "payload": {"content": "  "}}
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: PushResponse = test::read_body_json(resp).await;
        assert!(!body.result.success);
        assert!(
            body.result
                .response
                .unwrap()
                .starts_with("Validation error")
        );
    }
}
