//! API documentation served under `/swagger`.

use axum::{
    extract::Path,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::responses::ROUTE_NOT_FOUND;

/// Path of the OpenAPI document, relative to the server root.
pub const OPENAPI_PATH: &str = "/swagger/doc.json";

const SWAGGER_UI_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <title>basekit API</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js" crossorigin></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: "/swagger/doc.json", dom_id: "#swagger-ui" });
    };
  </script>
</body>
</html>
"##;

/// OpenAPI 3 description of the HTTP surface.
pub fn openapi_document() -> Value {
    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "basekit API",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "paths": {
            "/ping": {
                "get": {
                    "summary": "Database healthcheck",
                    "operationId": "ping",
                    "responses": {
                        "200": {
                            "description": "Database reachable",
                            "content": {
                                "application/json": {
                                    "schema": { "$ref": "#/components/schemas/HealthStatus" }
                                }
                            }
                        },
                        "500": {
                            "description": "Database unreachable",
                            "content": {
                                "application/json": {
                                    "schema": { "$ref": "#/components/schemas/ErrorResponse" }
                                }
                            }
                        }
                    }
                }
            }
        },
        "components": {
            "schemas": {
                "HealthStatus": {
                    "type": "object",
                    "required": ["status"],
                    "properties": { "status": { "type": "string", "example": "ok" } }
                },
                "ErrorResponse": {
                    "type": "object",
                    "required": ["status", "error"],
                    "properties": {
                        "status": { "type": "string", "example": "error" },
                        "error": { "type": "string" }
                    }
                }
            }
        }
    })
}

pub(crate) async fn swagger_index() -> Html<&'static str> {
    Html(SWAGGER_UI_HTML)
}

pub(crate) async fn swagger_asset(Path(asset): Path<String>) -> Response {
    match asset.as_str() {
        "index.html" => Html(SWAGGER_UI_HTML).into_response(),
        "doc.json" => Json(openapi_document()).into_response(),
        _ => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            ROUTE_NOT_FOUND,
        )
            .into_response(),
    }
}
