use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use zeta_common::{ZetaError, ZetaMetadata};
use zeta_engine::ContainerStatus;

use crate::state::AppState;

/// Renders a `ZetaError` as `{status, message}` with its canonical HTTP
/// status.
pub struct ApiError(pub ZetaError);

impl From<ZetaError> for ApiError {
    fn from(err: ZetaError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({
            "status": "error",
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn get_all_zeta_metadata(
    State(st): State<AppState>,
) -> Result<Json<Vec<ZetaMetadata>>, ApiError> {
    tracing::info!("retrieving all zeta function metadata");
    Ok(Json(st.service.list_metadata()?))
}

pub async fn get_zeta_metadata(
    State(st): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ZetaMetadata>, ApiError> {
    tracing::info!(zeta = %name, "retrieving zeta function metadata");
    st.service
        .get_metadata(&name)?
        .map(Json)
        .ok_or_else(|| ApiError(ZetaError::NotFound(format!(
            "Unable to find the zeta function {name}"
        ))))
}

pub async fn create_zeta(
    State(st): State<AppState>,
    Path(name): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    tracing::info!(zeta = %name, "creating the zeta function");
    let handler_source = read_handler_upload(&mut multipart).await?;
    let meta = st.service.create_zeta(&name, &handler_source).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "success",
            "message": format!("successfully created the zeta function '{name}'"),
            "zetaMetadata": meta,
        })),
    ))
}

/// The first file field of the upload is the handler source.
async fn read_handler_upload(multipart: &mut Multipart) -> Result<String, ZetaError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ZetaError::InvalidInput(format!("invalid multipart upload: {e}")))?
    {
        if field.file_name().is_none() && field.name() != Some("file") {
            continue;
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ZetaError::InvalidInput(format!("unable to read the handler file: {e}")))?;
        return String::from_utf8(bytes.to_vec())
            .map_err(|_| ZetaError::InvalidInput("handler file is not valid UTF-8".to_string()));
    }
    Err(ZetaError::InvalidInput(
        "missing handler file in upload".to_string(),
    ))
}

pub async fn run_zeta(
    State(st): State<AppState>,
    Path(name): Path<String>,
    params: Option<Json<Value>>,
) -> Result<Json<Value>, ApiError> {
    let Json(params) = params.unwrap_or_else(|| Json(json!({})));
    tracing::info!(zeta = %name, "running the zeta function");
    let response = st.service.invoke(&name, params).await?;
    Ok(Json(json!({
        "status": "Success",
        "response": response,
    })))
}

pub async fn delete_zeta(
    State(st): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    tracing::info!(zeta = %name, "deleting the zeta function");
    st.service.delete_zeta(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct LifecycleRequest {
    pub state: String,
}

fn container_data(status: &ContainerStatus) -> Value {
    json!({
        "name": status.name,
        "id": status.id,
        "shortId": status.short_id(),
        "image": status.image_id,
        "status": status.status,
        "running": status.running,
        "hostIp": status.endpoint.as_ref().map(|endpoint| endpoint.host_ip.clone()),
        "hostPort": status.endpoint.as_ref().map(|endpoint| endpoint.host_port),
    })
}

pub async fn get_container(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let status = st.engine.get_container(&id).await?;
    Ok(Json(json!({
        "status": "Success",
        "message": "Successfully retrieved the container",
        "containerData": container_data(&status),
    })))
}

pub async fn manage_container(
    State(st): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<LifecycleRequest>,
) -> Result<Json<Value>, ApiError> {
    let status = st.engine.get_container(&id).await?;
    let message = match request.state.as_str() {
        "STOP" => {
            st.engine.stop(&id).await?;
            "Successfully stopped the container"
        }
        "RESTART" => {
            st.engine.restart(&id).await?;
            "Successfully restarted the container"
        }
        "REMOVE" => {
            st.engine.remove(&id).await?;
            "Successfully removed the container"
        }
        other => {
            return Err(ApiError(ZetaError::InvalidInput(format!(
                "Unrecognized lifecycle command: {other}"
            ))))
        }
    };
    Ok(Json(json!({
        "status": "Success",
        "message": message,
        "containerData": container_data(&status),
    })))
}
