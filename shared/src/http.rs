//! JSON response builders shared by the HTTP entry point.

use crate::error::{AppError, AppResult};
use lambda_http::{
    http::StatusCode,
    Body, Error, Response,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(serde_json::to_string(value)?.into())
        .map_err(Box::new)?)
}

pub fn ok<T: Serialize>(value: &T) -> Result<Response<Body>, Error> {
    json_response(StatusCode::OK, value)
}

pub fn created<T: Serialize>(value: &T) -> Result<Response<Body>, Error> {
    json_response(StatusCode::CREATED, value)
}

pub fn no_content() -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Origin", "*")
        .body(Body::Empty)
        .map_err(Box::new)?)
}

/// CSV download with an attachment filename.
pub fn csv_response(file_name: &str, text: String) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/csv; charset=utf-8")
        .header("Content-Disposition", format!("attachment; filename=\"{}\"", file_name))
        .header("Access-Control-Allow-Origin", "*")
        .body(text.into())
        .map_err(Box::new)?)
}

/// `{"error": <kind>, "message": <text>}` with the status for `err`.
/// Validation failures also carry the individual messages.
pub fn error_response(err: &AppError) -> Result<Response<Body>, Error> {
    let status = err.status();
    if status.is_server_error() {
        tracing::error!("Request failed: {}", err);
    } else {
        tracing::info!("Request rejected ({}): {}", status.as_u16(), err);
    }

    let mut body = serde_json::json!({
        "error": err.kind(),
        "message": err.to_string(),
    });
    if let AppError::Validation(errors) = err {
        body["errors"] = serde_json::json!(errors);
    }
    json_response(status, &body)
}

pub fn not_found() -> Result<Response<Body>, Error> {
    json_response(StatusCode::NOT_FOUND, &serde_json::json!({"error": "Not found"}))
}

pub fn method_not_allowed() -> Result<Response<Body>, Error> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &serde_json::json!({"error": "Method not allowed"}),
    )
}

pub fn cors_preflight() -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET,POST,PUT,PATCH,DELETE,OPTIONS")
        .header(
            "Access-Control-Allow-Headers",
            "Content-Type,Authorization,X-User-Id,X-User-Email,X-User-Groups",
        )
        .body(Body::Empty)
        .map_err(Box::new)?)
}

/// Deserialize a JSON request body; malformed input is a 400.
pub fn parse_body<T: DeserializeOwned>(body: &[u8]) -> AppResult<T> {
    if body.is_empty() {
        return Err(AppError::BadRequest("Request body is required".to_string()));
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_json(response: &Response<Body>) -> serde_json::Value {
        match response.body() {
            Body::Text(text) => serde_json::from_str(text).unwrap(),
            Body::Binary(bytes) => serde_json::from_slice(bytes).unwrap(),
            Body::Empty => serde_json::Value::Null,
        }
    }

    #[test]
    fn error_bodies_carry_kind_and_status() {
        let response = error_response(&AppError::Validation(vec!["a".into(), "b".into()])).unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = body_json(&response);
        assert_eq!(json["error"], "ValidationFailed");
        assert_eq!(json["errors"], serde_json::json!(["a", "b"]));

        let response = error_response(&AppError::Forbidden("Not authorized: requires one of Admin".into())).unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(&response)["message"], "Not authorized: requires one of Admin");
    }

    #[test]
    fn bodies_must_be_json() {
        #[derive(serde::Deserialize, Debug)]
        struct Ping {
            #[allow(dead_code)]
            n: u32,
        }
        assert!(matches!(parse_body::<Ping>(b""), Err(AppError::BadRequest(_))));
        assert!(matches!(parse_body::<Ping>(b"{\"n\":\"x\"}"), Err(AppError::BadRequest(_))));
        assert!(parse_body::<Ping>(b"{\"n\":1}").is_ok());
    }
}
