//! Replay file upload and download, one `{session_id}.cast` per session.

use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::header,
    response::{IntoResponse, Response},
};

use crate::{
    error::{ApiError, ApiFailure, HttpResponse},
    i18n::Lang,
    state::AppState,
};

const REPLAY_FIELD: &str = "replay.cast";

/// Session ids become file names; anything that could escape the replay
/// directory is rejected outright.
fn validate_session_id(session_id: &str) -> Result<(), ApiError> {
    let valid = !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ApiError::InvalidArgument(format!("invalid session id {session_id}")))
    }
}

/// POST `/session/replay/:session_id` — store the uploaded cast file.
pub async fn create_session_replay(
    State(state): State<AppState>,
    lang: Lang,
    Path(session_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<HttpResponse<()>>, ApiFailure> {
    validate_session_id(&session_id).map_err(|e| e.localized(&lang))?;

    let mut content = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidArgument(e.to_string()).localized(&lang))?
    {
        if field.name() == Some(REPLAY_FIELD) {
            content = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::InvalidArgument(e.to_string()).localized(&lang))?,
            );
            break;
        }
    }
    let Some(content) = content else {
        return Err(ApiError::InvalidArgument(format!("missing {REPLAY_FIELD} file")).localized(&lang));
    };

    let dir = &state.config.replay_dir;
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ApiError::internal(e).localized(&lang))?;
    tokio::fs::write(dir.join(format!("{session_id}.cast")), &content)
        .await
        .map_err(|e| ApiError::internal(e).localized(&lang))?;

    Ok(Json(HttpResponse::ok()))
}

/// GET `/session/replay/:session_id` — download the cast file as an
/// attachment.
pub async fn get_session_replay(
    State(state): State<AppState>,
    lang: Lang,
    Path(session_id): Path<String>,
) -> Result<Response, ApiFailure> {
    validate_session_id(&session_id).map_err(|e| e.localized(&lang))?;

    let filename = format!("{session_id}.cast");
    let path = state.config.replay_dir.join(&filename);
    let content = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::InvalidArgument(format!("no replay for session {session_id}")).localized(&lang))?;

    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ),
    ];
    Ok((headers, content).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_must_be_filename_safe() {
        assert!(validate_session_id("abc-123_DEF").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("../etc/passwd").is_err());
        assert!(validate_session_id("a/b").is_err());
    }
}
