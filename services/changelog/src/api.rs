//! HTTP front end
//!
//! | Route | Operation |
//! |---|---|
//! | `GET /api/health` | liveness check |
//! | `GET /api/downloads` | registry document |
//! | `POST /upload` | add a changelog with its artifact (multipart) |
//! | `DELETE /api/downloads/{name}` | remove a project |
//! | `DELETE /api/downloads/{name}/builds/{build}` | remove a changelog |
//! | `PUT /api/downloads/{name}/maintained` | set the maintained flag |

use axum::Router;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{delete, get, post, put};
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::commit::CommitInput;
use crate::error::{RegistryError, RegistryResult};
use crate::model::{Changelog, Project, Registry};
use crate::service::{CleanupWarning, RegistryService};

/// Router for the registry API
pub fn router(service: RegistryService, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/downloads", get(list_downloads))
        .route("/api/downloads/{name}", delete(remove_version))
        .route(
            "/api/downloads/{name}/builds/{build}",
            delete(remove_changelog),
        )
        .route("/api/downloads/{name}/maintained", put(set_maintained))
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .with_state(service)
}

async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

async fn list_downloads(State(service): State<RegistryService>) -> RegistryResult<Json<Registry>> {
    Ok(Json(service.list_projects().await?))
}

/// Body of a successful upload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    message: &'static str,
    version_name: String,
    build_number: u64,
    filename: String,
    path: Utf8PathBuf,
}

/// The parts of an upload form.
#[derive(Debug, Default)]
struct UploadForm {
    version_name: Option<String>,
    filename: Option<String>,
    file: Option<axum::body::Bytes>,
    hashes: Vec<String>,
    messages: Vec<String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> RegistryResult<Self> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await.map_err(invalid_upload)? {
            let name = field.name().map(str::to_owned);
            match name.as_deref() {
                Some("file") => {
                    form.filename = field.file_name().map(str::to_owned);
                    form.file = Some(field.bytes().await.map_err(invalid_upload)?);
                }
                Some("versionName") => {
                    form.version_name = Some(field.text().await.map_err(invalid_upload)?);
                }
                Some("commitHash[]") => {
                    form.hashes.push(field.text().await.map_err(invalid_upload)?)
                }
                Some("commitMessage[]") => {
                    form.messages.push(field.text().await.map_err(invalid_upload)?)
                }
                other => tracing::debug!(field = ?other, "Ignoring upload field"),
            }
        }

        Ok(form)
    }

    /// Hashes and messages are paired by position. A message without a hash
    /// gets a generated one.
    fn commits(&self) -> Vec<CommitInput> {
        self.messages
            .iter()
            .enumerate()
            .map(|(index, message)| CommitInput {
                hash: self.hashes.get(index).cloned(),
                message: message.clone(),
            })
            .collect()
    }
}

fn invalid_upload(error: MultipartError) -> RegistryError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        RegistryError::UploadTooLarge(error.body_text())
    } else {
        RegistryError::InvalidUpload(error.body_text())
    }
}

async fn upload(
    State(service): State<RegistryService>,
    multipart: Multipart,
) -> RegistryResult<Json<UploadResponse>> {
    let form = UploadForm::read(multipart).await?;

    let (Some(file), Some(filename)) = (&form.file, form.filename.as_deref()) else {
        return Err(RegistryError::InvalidUpload("no file part".into()));
    };
    if filename.is_empty() {
        return Err(RegistryError::InvalidUpload("no selected file".into()));
    }
    let version_name = match form.version_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name,
        _ => return Err(RegistryError::InvalidUpload("version name is required".into())),
    };

    let mut contents: &[u8] = file;
    let changelog: Changelog = service
        .add_changelog(version_name, form.commits(), filename, &mut contents)
        .await?;

    let path = changelog.download_path.unwrap_or_default();
    Ok(Json(UploadResponse {
        message: "File uploaded and config updated successfully",
        version_name: version_name.to_owned(),
        build_number: changelog.build_number,
        filename: path.file_name().unwrap_or_default().to_owned(),
        path,
    }))
}

fn warnings(warning: Option<CleanupWarning>) -> Vec<String> {
    warning.iter().map(ToString::to_string).collect()
}

/// Body of a successful removal.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RemovedResponse<T> {
    #[serde(flatten)]
    removed: T,
    warnings: Vec<String>,
}

async fn remove_version(
    State(service): State<RegistryService>,
    Path(name): Path<String>,
) -> RegistryResult<Json<RemovedResponse<Project>>> {
    let removed = service.remove_version(&name).await?;
    Ok(Json(RemovedResponse {
        removed: removed.project,
        warnings: warnings(removed.warning),
    }))
}

async fn remove_changelog(
    State(service): State<RegistryService>,
    Path((name, build)): Path<(String, u64)>,
) -> RegistryResult<Json<RemovedResponse<Changelog>>> {
    let removed = service.remove_changelog(&name, build).await?;
    Ok(Json(RemovedResponse {
        removed: removed.changelog,
        warnings: warnings(removed.warning),
    }))
}

#[derive(Debug, Deserialize)]
struct MaintainedRequest {
    maintained: bool,
}

async fn set_maintained(
    State(service): State<RegistryService>,
    Path(name): Path<String>,
    Json(request): Json<MaintainedRequest>,
) -> RegistryResult<Json<Project>> {
    Ok(Json(service.set_maintained(&name, request.maintained).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commits_pair_by_position() {
        let form = UploadForm {
            hashes: vec!["abc123".into()],
            messages: vec!["first".into(), "second".into()],
            ..Default::default()
        };

        let commits = form.commits();
        assert_eq!(commits[0], CommitInput::new("abc123", "first"));
        assert_eq!(commits[1], CommitInput::message("second"));
    }

    #[test]
    fn build_router() {
        let dir = tempfile::tempdir().unwrap();
        let root = camino::Utf8Path::from_path(dir.path()).expect("utf-8 path");
        let _router = router(crate::RegistryBuilder::new(root).build(), 1024);
    }
}
