use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};

use super::parse_id;
use crate::context::RequestContext;
use crate::error::{ApiResponse, Result};
use crate::models::{
    AssociateContentRequest, ContentAssociation, ContentPage, EntityContentQuery, NewAssociation,
};
use crate::AppState;

/// GET /api/v1/contents/:id/associations
pub async fn list_associations(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<ContentAssociation>>>> {
    let associations = state.service.list_associations(&ctx, parse_id(&id)?).await?;
    Ok(Json(ApiResponse::success(associations)))
}

/// Link content to a business entity
/// POST /api/v1/contents/:id/associations
pub async fn associate_content(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(req): Json<AssociateContentRequest>,
) -> Result<impl IntoResponse> {
    let input = NewAssociation {
        content_id: parse_id(&id)?,
        entity_type: req.entity_type,
        entity_id: req.entity_id,
        metadata: req.metadata,
        created_by: req.created_by,
    };

    let association = state.service.associate_content(&ctx, input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(association))))
}

/// GET /api/v1/contents/:id/associations/:entity_type/:entity_id
pub async fn get_association(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((id, entity_type, entity_id)): Path<(String, String, String)>,
) -> Result<Json<ApiResponse<ContentAssociation>>> {
    let association = state
        .service
        .get_association(&ctx, parse_id(&id)?, &entity_type, &entity_id)
        .await?;
    Ok(Json(ApiResponse::success(association)))
}

/// DELETE /api/v1/contents/:id/associations/:entity_type/:entity_id
pub async fn dissociate_content(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((id, entity_type, entity_id)): Path<(String, String, String)>,
) -> Result<StatusCode> {
    state
        .service
        .dissociate_content(&ctx, parse_id(&id)?, &entity_type, &entity_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Content linked to an entity, newest first
/// GET /api/v1/entities/:entity_type/:entity_id/contents
pub async fn content_for_entity(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((entity_type, entity_id)): Path<(String, String)>,
    Query(query): Query<EntityContentQuery>,
) -> Result<Json<ApiResponse<ContentPage>>> {
    let page = state
        .service
        .get_content_for_entity(
            &ctx,
            &entity_type,
            &entity_id,
            query.page.unwrap_or(0),
            query.page_size.unwrap_or(0),
        )
        .await?;
    Ok(Json(ApiResponse::success(page)))
}
