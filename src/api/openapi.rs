//! OpenAPI document and optional Swagger UI.

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// Path serving the generated OpenAPI JSON.
pub const OPENAPI_PATH: &str = "/api-docs/openapi.json";

/// Generated OpenAPI document for the gateway.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "judge-gateway", description = "Boot status, topic publishing and live record sessions"),
    paths(
        crate::api::handlers::system::health_handler,
        crate::api::handlers::system::boot_report,
        crate::api::handlers::topics::publish,
        crate::api::handlers::topics::list_topics,
        crate::ws::handler::record_conn,
        crate::ws::handler::record_detail_conn,
    ),
    components(schemas(
        crate::api::dto::HealthResponse,
        crate::api::dto::PublishRequest,
        crate::api::dto::PublishResponse,
        crate::api::dto::TopicListResponse,
        crate::app_state::BootSummary,
        crate::error::ErrorResponse,
    )),
    tags(
        (name = "System", description = "Health and boot status"),
        (name = "Topics", description = "Event bus access"),
        (name = "Sessions", description = "Live record connections"),
    )
)]
pub struct ApiDoc;

/// Adds the OpenAPI JSON route and, with the `swagger-ui` feature, the
/// Swagger UI at `/swagger-ui`.
#[cfg(feature = "swagger-ui")]
pub fn mount(router: Router<AppState>) -> Router<AppState> {
    router.merge(utoipa_swagger_ui::SwaggerUi::new("/swagger-ui").url(OPENAPI_PATH, ApiDoc::openapi()))
}

/// Adds the OpenAPI JSON route.
#[cfg(not(feature = "swagger-ui"))]
pub fn mount(router: Router<AppState>) -> Router<AppState> {
    router.route(
        OPENAPI_PATH,
        axum::routing::get(|| async { axum::Json(ApiDoc::openapi()) }),
    )
}
