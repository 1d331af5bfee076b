use axum::Router;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::openapi::server::Server;
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::authz::{Permission, RoleEntry, RoleMember};
use crate::routes::{health, permissions};

#[derive(OpenApi)]
#[openapi(
	paths(
		health::health,
		permissions::my_permissions,
		permissions::list_roles,
		permissions::granting_roles,
		permissions::refresh_permissions,
		permissions::clear_permissions,
		permissions::my_scopes
	),
	components(
		schemas(
			health::HealthResponse,
			permissions::MyPermissionsResponse,
			permissions::RoleListResponse,
			permissions::GrantingRolesResponse,
			permissions::RefreshResponse,
			permissions::ScopesResponse,
			RoleEntry,
			RoleMember,
			Permission
		)
	),
	modifiers(&BearerAuth),
	tags(
		(name = "Health", description = "Service health"),
		(name = "Permissions", description = "Role-permission resolution and cache control")
	)
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
	fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
		if let Some(components) = openapi.components.as_mut() {
			components.add_security_scheme(
				"bearerAuth",
				SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).bearer_format("JWT").build()),
			);
		}
	}
}

pub fn build_openapi(port: u16) -> utoipa::openapi::OpenApi {
	let mut doc = ApiDoc::openapi();
	doc.servers = Some(vec![Server::new(format!("http://localhost:{port}"))]);
	doc
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> Router {
	Router::new().merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", doc))
}
