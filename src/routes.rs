use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::{Html, IntoResponse},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{de, Deserialize, Deserializer, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use utoipa::{OpenApi, ToSchema};
use validator::Validate;

use crate::aggregator::{Aggregator, Article};
use crate::auth::{self, Authenticated};
use crate::db::{is_unique_violation, Category, Database, Feed, FeedChanges, NewFeed};
use crate::error::{ApiError, ApiQuery, DetailBody, ErrorsBody, MessageBody, ValidatedJson};
use crate::resolver::{self, split_categories};

pub struct AppState {
    pub db: Arc<Database>,
    pub aggregator: Arc<Aggregator>,
    pub api_tokens: Vec<String>,
    pub default_article_count: i64,
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "RSS Reader",
        description = "API for RSS aggregation",
        version = "1.0.0"
    ),
    paths(
        list_feeds,
        create_feed,
        update_feed,
        delete_feed,
        list_categories,
        create_category,
        update_category,
        delete_category,
        list_articles,
        login,
        openapi,
        health
    ),
    components(schemas(
        Feed,
        Category,
        Article,
        CreateFeedRequest,
        UpdateFeedRequest,
        CreateCategoryRequest,
        UpdateCategoryRequest,
        LoginRequest,
        TokenResponse,
        MessageBody,
        ErrorsBody,
        DetailBody
    ))
)]
pub struct ApiDoc;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/feeds/",
            get(list_feeds).post(create_feed).put(update_feed),
        )
        .route("/feeds/:id/", delete(delete_feed))
        .route(
            "/categories/",
            get(list_categories)
                .post(create_category)
                .put(update_category),
        )
        .route("/categories/:id/", delete(delete_category))
        .route("/articles/", get(list_articles))
        .route("/login", post(login))
        .route("/openapi", get(openapi))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// Request bodies

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateFeedRequest {
    #[validate(length(min = 1, max = 128, message = "Ensure this field has 1 to 128 characters."))]
    pub name: String,
    #[validate(
        url(message = "Enter a valid URL."),
        length(max = 512, message = "Ensure this field has no more than 512 characters.")
    )]
    pub url: String,
    /// Defaults to true
    pub is_visible: Option<bool>,
    /// Comma-separated category names
    pub category: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateFeedRequest {
    pub id: Option<i64>,
    #[validate(length(min = 1, max = 128, message = "Ensure this field has 1 to 128 characters."))]
    pub name: Option<String>,
    #[validate(
        url(message = "Enter a valid URL."),
        length(max = 512, message = "Ensure this field has no more than 512 characters.")
    )]
    pub url: Option<String>,
    pub is_visible: Option<bool>,
    /// Replaces the feed's categories; an empty string clears them
    pub category: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateCategoryRequest {
    #[validate(length(min = 1, max = 128, message = "Ensure this field has 1 to 128 characters."))]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateCategoryRequest {
    pub id: Option<i64>,
    #[validate(length(min = 1, max = 128, message = "Ensure this field has 1 to 128 characters."))]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "This field may not be blank."))]
    pub username: String,
    #[validate(length(min = 1, message = "This field may not be blank."))]
    pub password: String,
}

// Query strings treat `feed=` the same as leaving `feed` out.

#[derive(Debug, Deserialize)]
pub struct FeedsQuery {
    #[serde(default, deserialize_with = "empty_as_none")]
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ArticlesQuery {
    #[serde(default, deserialize_with = "empty_as_none")]
    pub count: Option<i64>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub feed: Option<i64>,
}

fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|e| de::Error::custom(format!("invalid value {:?}: {}", value, e))),
    }
}

// Response bodies

#[derive(Debug, Serialize, ToSchema)]
pub struct TokenResponse {
    pub token: String,
}

/// An unknown id on update answers 200 with a message, not 404.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum UpdateFeedResponse {
    Updated(Feed),
    Missing(MessageBody),
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum UpdateCategoryResponse {
    Updated(Category),
    Missing(MessageBody),
}

/// Map comma-separated category names to ids, failing on the first unknown
/// name. An empty string means no categories.
async fn lookup_category_ids(db: &Database, raw: &str) -> Result<Vec<i64>, ApiError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let mut ids = Vec::new();
    for name in split_categories(raw) {
        match db.find_category_by_name(&name).await? {
            Some(category) => ids.push(category.id),
            None => {
                return Err(ApiError::field(
                    "category",
                    format!("Invalid category {}.", name),
                ))
            }
        }
    }
    Ok(ids)
}

fn required_id(id: Option<i64>) -> Result<i64, ApiError> {
    id.ok_or_else(|| ApiError::field("id", "This field is required."))
}

fn duplicate_category_name() -> ApiError {
    ApiError::field("name", "category with this name already exists.")
}

/// A write that lost a race with a concurrent one still reports the
/// duplicate name rather than a server error.
fn category_write_error(err: anyhow::Error) -> ApiError {
    if is_unique_violation(&err) {
        duplicate_category_name()
    } else {
        ApiError::Internal(err)
    }
}

// Feeds

#[utoipa::path(
    get,
    path = "/feeds/",
    tag = "feeds",
    params(
        ("category" = Option<String>, Query, description = "Comma-separated category names, any match")
    ),
    responses(
        (status = 200, description = "Subscribed feeds", body = Vec<Feed>)
    )
)]
pub async fn list_feeds(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<FeedsQuery>,
) -> Result<Json<Vec<Feed>>, ApiError> {
    let feeds = match query.category {
        Some(raw) => resolver::feeds_in_any_category(&state.db, &split_categories(&raw)).await?,
        None => state.db.list_feeds().await?,
    };
    Ok(Json(feeds))
}

#[utoipa::path(
    post,
    path = "/feeds/",
    tag = "feeds",
    request_body = CreateFeedRequest,
    responses(
        (status = 200, description = "Feed created", body = Feed),
        (status = 400, description = "Invalid payload or unknown category", body = ErrorsBody),
        (status = 401, description = "Missing or unknown token", body = DetailBody)
    )
)]
pub async fn create_feed(
    State(state): State<Arc<AppState>>,
    _auth: Authenticated,
    ValidatedJson(payload): ValidatedJson<CreateFeedRequest>,
) -> Result<Json<Feed>, ApiError> {
    let category_ids =
        lookup_category_ids(&state.db, payload.category.as_deref().unwrap_or("")).await?;

    let new_feed = NewFeed {
        name: payload.name,
        url: payload.url,
        is_visible: payload.is_visible.unwrap_or(true),
    };
    let feed = state.db.create_feed(&new_feed, &category_ids).await?;
    info!("Created feed {} '{}'", feed.id, feed.name);

    Ok(Json(feed))
}

#[utoipa::path(
    put,
    path = "/feeds/",
    tag = "feeds",
    request_body = UpdateFeedRequest,
    responses(
        (status = 200, description = "Updated feed, or a message when the id is unknown", body = Feed),
        (status = 400, description = "Invalid payload or unknown category", body = ErrorsBody),
        (status = 401, description = "Missing or unknown token", body = DetailBody)
    )
)]
pub async fn update_feed(
    State(state): State<Arc<AppState>>,
    _auth: Authenticated,
    ValidatedJson(payload): ValidatedJson<UpdateFeedRequest>,
) -> Result<Json<UpdateFeedResponse>, ApiError> {
    let feed_id = required_id(payload.id)?;

    let category_ids = match payload.category.as_deref() {
        Some(raw) => Some(lookup_category_ids(&state.db, raw).await?),
        None => None,
    };

    let changes = FeedChanges {
        name: payload.name,
        url: payload.url,
        is_visible: payload.is_visible,
    };

    match state
        .db
        .update_feed(feed_id, &changes, category_ids.as_deref())
        .await?
    {
        Some(feed) => Ok(Json(UpdateFeedResponse::Updated(feed))),
        None => Ok(Json(UpdateFeedResponse::Missing(MessageBody::new(format!(
            "RSS Feed with id {} does not exist",
            feed_id
        ))))),
    }
}

#[utoipa::path(
    delete,
    path = "/feeds/{id}/",
    tag = "feeds",
    params(("id" = i64, Path, description = "Feed id")),
    responses(
        (status = 200, description = "Feed deleted", body = MessageBody),
        (status = 404, description = "No feed with this id", body = MessageBody),
        (status = 401, description = "Missing or unknown token", body = DetailBody)
    )
)]
pub async fn delete_feed(
    State(state): State<Arc<AppState>>,
    _auth: Authenticated,
    Path(feed_id): Path<i64>,
) -> Result<Json<MessageBody>, ApiError> {
    if !state.db.delete_feed(feed_id).await? {
        return Err(ApiError::NotFound(format!(
            "RSS Feed with id {} does not exist",
            feed_id
        )));
    }
    Ok(Json(MessageBody::new("Feed was successfully deleted")))
}

// Categories

#[utoipa::path(
    get,
    path = "/categories/",
    tag = "categories",
    responses(
        (status = 200, description = "All categories", body = Vec<Category>)
    )
)]
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Category>>, ApiError> {
    Ok(Json(state.db.list_categories().await?))
}

#[utoipa::path(
    post,
    path = "/categories/",
    tag = "categories",
    request_body = CreateCategoryRequest,
    responses(
        (status = 200, description = "Category created", body = Category),
        (status = 400, description = "Invalid or duplicate name", body = ErrorsBody),
        (status = 401, description = "Missing or unknown token", body = DetailBody)
    )
)]
pub async fn create_category(
    State(state): State<Arc<AppState>>,
    _auth: Authenticated,
    ValidatedJson(payload): ValidatedJson<CreateCategoryRequest>,
) -> Result<Json<Category>, ApiError> {
    if state.db.find_category_by_name(&payload.name).await?.is_some() {
        return Err(duplicate_category_name());
    }

    let category = state
        .db
        .create_category(&payload.name)
        .await
        .map_err(category_write_error)?;
    Ok(Json(category))
}

#[utoipa::path(
    put,
    path = "/categories/",
    tag = "categories",
    request_body = UpdateCategoryRequest,
    responses(
        (status = 200, description = "Updated category, or a message when the id is unknown", body = Category),
        (status = 400, description = "Invalid or duplicate name", body = ErrorsBody),
        (status = 401, description = "Missing or unknown token", body = DetailBody)
    )
)]
pub async fn update_category(
    State(state): State<Arc<AppState>>,
    _auth: Authenticated,
    ValidatedJson(payload): ValidatedJson<UpdateCategoryRequest>,
) -> Result<Json<UpdateCategoryResponse>, ApiError> {
    let category_id = required_id(payload.id)?;

    let Some(current) = state.db.get_category(category_id).await? else {
        return Ok(Json(UpdateCategoryResponse::Missing(MessageBody::new(
            format!("Category with id {} does not exist", category_id),
        ))));
    };

    let Some(name) = payload.name else {
        return Ok(Json(UpdateCategoryResponse::Updated(current)));
    };

    if let Some(existing) = state.db.find_category_by_name(&name).await? {
        if existing.id != category_id {
            return Err(duplicate_category_name());
        }
    }

    match state
        .db
        .update_category(category_id, &name)
        .await
        .map_err(category_write_error)?
    {
        Some(category) => Ok(Json(UpdateCategoryResponse::Updated(category))),
        None => Ok(Json(UpdateCategoryResponse::Missing(MessageBody::new(
            format!("Category with id {} does not exist", category_id),
        )))),
    }
}

#[utoipa::path(
    delete,
    path = "/categories/{id}/",
    tag = "categories",
    params(("id" = i64, Path, description = "Category id")),
    responses(
        (status = 200, description = "Category deleted", body = MessageBody),
        (status = 404, description = "No category with this id", body = MessageBody),
        (status = 401, description = "Missing or unknown token", body = DetailBody)
    )
)]
pub async fn delete_category(
    State(state): State<Arc<AppState>>,
    _auth: Authenticated,
    Path(category_id): Path<i64>,
) -> Result<Json<MessageBody>, ApiError> {
    if !state.db.delete_category(category_id).await? {
        return Err(ApiError::NotFound(format!(
            "Category with id {} does not exist",
            category_id
        )));
    }
    Ok(Json(MessageBody::new("Category was successfully deleted")))
}

// Articles

#[utoipa::path(
    get,
    path = "/articles/",
    tag = "articles",
    params(
        ("count" = Option<i64>, Query, description = "Maximum number of articles, default 10"),
        ("category" = Option<String>, Query, description = "Comma-separated category names, any match"),
        ("feed" = Option<i64>, Query, description = "Single feed id; takes precedence over category")
    ),
    responses(
        (status = 200, description = "Newest articles first", body = Vec<Article>),
        (status = 400, description = "Non-numeric count or feed", body = ErrorsBody)
    )
)]
pub async fn list_articles(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<ArticlesQuery>,
) -> Result<Json<Vec<Article>>, ApiError> {
    let count = query.count.unwrap_or(state.default_article_count);
    let categories = query.category.as_deref().map(split_categories);

    let feeds = resolver::resolve(&state.db, categories.as_deref(), query.feed).await?;
    let articles = state.aggregator.aggregate(&feeds, count).await;

    Ok(Json(articles))
}

// Accounts

#[utoipa::path(
    post,
    path = "/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token for the write endpoints", body = TokenResponse),
        (status = 400, description = "Blank fields or wrong credentials", body = ErrorsBody)
    )
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    ValidatedJson(payload): ValidatedJson<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user = state
        .db
        .find_user_by_username(&payload.username)
        .await?
        .filter(|user| auth::verify_password(&payload.password, &user.password_hash));

    let Some(user) = user else {
        debug!("Failed login for '{}'", payload.username);
        return Err(ApiError::field(
            "non_field_errors",
            "Unable to log in with provided credentials.",
        ));
    };

    let token = state.db.issue_token(user.id, &auth::generate_token()).await?;
    info!("Issued token for '{}'", user.username);

    Ok(Json(TokenResponse { token }))
}

#[utoipa::path(
    get,
    path = "/openapi",
    tag = "meta",
    responses((status = 200, description = "OpenAPI document for this API"))
)]
pub async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "meta",
    responses((status = 200, description = "Service is up", body = String))
)]
pub async fn health() -> impl IntoResponse {
    Html("OK")
}
