use std::mem;

use axum::{
    handler::Handler,
    middleware,
    routing::{get, post, MethodRouter},
    Router,
};

use crate::app_state::AppState;
use crate::cors::{self, AllowMethods};
use crate::{api, responses};

pub(crate) mod paths {
    pub const STATUS: &str = "/api/status";
    pub const GENERATE_SECTION: &str = "/api/generate-section";
    pub const STORE_FEEDBACK: &str = "/api/store-feedback";
    pub const TRIGGER_FINETUNE: &str = "/api/trigger-finetune";
    pub const PROMOTE_MODEL: &str = "/api/promote-model";
    pub const SPEC_OPENAPI: &str = "/api/spec/openapi.json";
}

pub(crate) struct RouterBuilder {
    router: Router<AppState>,
    endpoints: Vec<String>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            endpoints: Vec::new(),
        }
    }

    fn add(&mut self, method: &str, path: &'static str, route: MethodRouter<AppState>, allow: AllowMethods) {
        self.endpoints.push(format!("{} {}", method, path));
        let route = route
            .fallback(responses::method_not_allowed)
            .layer(middleware::from_fn_with_state(allow, cors::cors_mw));
        let router = mem::take(&mut self.router);
        self.router = router.route(path, route);
    }

    pub fn route_get<H, T>(&mut self, path: &'static str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState> + Clone + 'static,
        T: Send + 'static,
    {
        self.add("GET", path, get(handler), cors::READ);
        self
    }

    pub fn route_post<H, T>(&mut self, path: &'static str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState> + Clone + 'static,
        T: Send + 'static,
    {
        self.add("POST", path, post(handler), cors::WRITE);
        self
    }

    pub fn build(self) -> (Router<AppState>, Vec<String>) {
        (self.router.fallback(responses::not_found), self.endpoints)
    }
}

/// Every public route, with its CORS policy and method fallback attached.
pub(crate) fn build_router() -> (Router<AppState>, Vec<String>) {
    let mut builder = RouterBuilder::new();
    builder
        .route_get(paths::STATUS, api::models::status)
        .route_post(paths::GENERATE_SECTION, api::generate::generate_section)
        .route_post(paths::STORE_FEEDBACK, api::feedback::store_feedback)
        .route_post(paths::TRIGGER_FINETUNE, api::finetune::trigger_finetune)
        .route_post(paths::PROMOTE_MODEL, api::models::promote_model)
        .route_get(paths::SPEC_OPENAPI, api::spec::openapi_json);
    builder.build()
}
