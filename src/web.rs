use crate::{
    auth,
    chat::{ChatError, ChatPipeline, ChatTurnRequest, ConversationListItem, ConversationStore},
    config::Config,
    suggest::{SuggestError, SuggestionSessions},
};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::signal;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

#[derive(Clone)]
struct SharedState {
    pipeline: Arc<ChatPipeline>,
    suggestions: Arc<SuggestionSessions>,
    store: Arc<dyn ConversationStore>,
    api_token: String,
}

async fn start_app(
    config: Config,
    pipeline: Arc<ChatPipeline>,
    suggestions: Arc<SuggestionSessions>,
    store: Arc<dyn ConversationStore>,
    api_token: String,
) {
    async fn shutdown_signal() {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    let shared_state = Arc::new(SharedState {
        pipeline,
        suggestions,
        store,
        api_token,
    });

    let app = Router::new()
        .route("/api/chat/stream", post(chat_stream))
        .route("/api/chat/suggest", post(chat_suggest))
        .route("/api/conversations", get(conversations))
        .layer(DefaultBodyLimit::max(config.server.body_limit_bytes))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .unwrap();
    log::info!("listening on {}", config.server.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();
}

pub fn start_daemon(
    config: Config,
    pipeline: Arc<ChatPipeline>,
    suggestions: Arc<SuggestionSessions>,
    store: Arc<dyn ConversationStore>,
    api_token: String,
) {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async { start_app(config, pipeline, suggestions, store, api_token).await });
}

#[derive(Debug)]
enum HttpError {
    Unauthenticated,
    MissingQuery,
    Suggest(SuggestError),
    Chat(ChatError),
}

impl From<ChatError> for HttpError {
    fn from(err: ChatError) -> Self {
        HttpError::Chat(err)
    }
}

impl From<SuggestError> for HttpError {
    fn from(err: SuggestError) -> Self {
        HttpError::Suggest(err)
    }
}

// Tell axum how to convert errors into responses.
impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        match self {
            HttpError::Unauthenticated => (
                axum::http::StatusCode::UNAUTHORIZED,
                json!({"error": "unauthorized"}).to_string(),
            ),
            HttpError::MissingQuery => (
                axum::http::StatusCode::BAD_REQUEST,
                json!({"error": "Query required"}).to_string(),
            ),
            HttpError::Suggest(err) => {
                log::error!("suggestion lookup failed: {err}");
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": err.to_string()}).to_string(),
                )
            }
            HttpError::Chat(err) => {
                let status = match &err {
                    ChatError::InvalidPrompt => axum::http::StatusCode::BAD_REQUEST,
                    ChatError::SessionNotFound => axum::http::StatusCode::NOT_FOUND,
                    ChatError::ContextUnavailable(_)
                    | ChatError::Model(_)
                    | ChatError::Store(_) => {
                        log::error!("{err}");
                        axum::http::StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, json!({"error": err.to_string()}).to_string())
            }
        }
        .into_response()
    }
}

fn authorize(headers: &HeaderMap, expected: &str) -> Result<(), HttpError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(auth::extract_bearer_token)
        .ok_or(HttpError::Unauthenticated)?;

    if auth::validate_token(token, expected) {
        Ok(())
    } else {
        Err(HttpError::Unauthenticated)
    }
}

async fn chat_stream(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
    Json(payload): Json<ChatTurnRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, HttpError> {
    authorize(&headers, &state.api_token)?;

    let events = state.pipeline.run(payload).await?;
    let stream = ReceiverStream::new(events).map(|event| Event::default().json_data(&event));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SuggestRequest {
    query: Option<String>,
    /// Opaque key for one client input stream; debounce and dead-end
    /// state are scoped to it. Without one the lookup is stateless.
    session_id: Option<String>,
}

async fn chat_suggest(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SuggestRequest>,
) -> Result<axum::Json<serde_json::Value>, HttpError> {
    let query = payload.query.ok_or(HttpError::MissingQuery)?;

    let suggestions = match payload.session_id {
        Some(key) => match state.suggestions.session(&key).input(&query).await {
            // superseded by a newer keystroke during the quiet period
            None => Vec::new(),
            Some(result) => result?,
        },
        None => state.suggestions.engine().suggest(&query).await?,
    };

    Ok(Json(json!({ "suggestions": suggestions })))
}

async fn conversations(
    State(state): State<Arc<SharedState>>,
    headers: HeaderMap,
) -> Result<axum::Json<Vec<ConversationListItem>>, HttpError> {
    authorize(&headers, &state.api_token)?;

    let items = state
        .store
        .list()
        .await
        .map_err(|err| HttpError::Chat(ChatError::from(err)))?;
    Ok(Json(items))
}
