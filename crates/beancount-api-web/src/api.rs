use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use beancount_api::{
    Account, Directive, DirectiveType, FilterError, Ledger, LedgerError, Mutator, Position,
    filter, ledger::Options,
};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_stream::wrappers::BroadcastStream;

use crate::state::AppState;

/// An error body `{"error": ...}` sent with `status`.
#[derive(Debug)]
pub struct ErrorResponse {
    status: StatusCode,
    error: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        ErrorResponse {
            status,
            error: error.into(),
        }
    }

    fn not_found(error: impl Into<String>) -> Self {
        ErrorResponse::new(StatusCode::NOT_FOUND, error)
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: &self.error })).into_response()
    }
}

impl From<FilterError> for ErrorResponse {
    fn from(error: FilterError) -> Self {
        if error.is_client_error() {
            ErrorResponse::new(StatusCode::BAD_REQUEST, error.to_string())
        } else {
            tracing::error!("Failed to evaluate filter: {error:#}");
            ErrorResponse::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
    }
}

type ApiResult<T> = Result<Json<T>, ErrorResponse>;

fn find_account<'a>(ledger: &'a Ledger, name: &str) -> Result<&'a Account, ErrorResponse> {
    ledger
        .account(name)
        .ok_or_else(|| ErrorResponse::not_found(format!("Account '{name}' not found")))
}

pub async fn list_accounts(State(state): State<AppState>) -> Json<BTreeMap<String, Account>> {
    Json(state.ledger().accounts().clone())
}

pub async fn get_account(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Account> {
    let ledger = state.ledger();
    Ok(Json(find_account(&ledger, &name)?.clone()))
}

pub async fn account_balance(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<BTreeMap<String, Vec<Position>>> {
    let ledger = state.ledger();
    Ok(Json(find_account(&ledger, &name)?.balance.clone()))
}

pub async fn account_transactions(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(mutator): Query<Mutator>,
) -> ApiResult<Vec<Directive>> {
    let ledger = state.ledger();
    let transactions = find_account(&ledger, &name)?.transactions.clone();
    Ok(Json(mutator.mutate(transactions)?))
}

pub async fn list_directives(
    State(state): State<AppState>,
    Query(mutator): Query<Mutator>,
) -> ApiResult<Vec<Directive>> {
    let entries = state.ledger().entries().to_vec();
    Ok(Json(mutator.mutate(entries)?))
}

pub async fn directives_by_type(
    State(state): State<AppState>,
    Path(ty): Path<String>,
    Query(mutator): Query<Mutator>,
) -> ApiResult<Vec<Directive>> {
    let ty: DirectiveType = ty
        .parse()
        .map_err(|error: String| ErrorResponse::new(StatusCode::BAD_REQUEST, error))?;
    let entries = state.ledger().by_type(ty).cloned().collect();
    Ok(Json(mutator.mutate(entries)?))
}

pub async fn directive_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Directive> {
    state
        .ledger()
        .by_id(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ErrorResponse::not_found(format!("Directive '{id}' not found")))
}

/// Renders a client supplied directive as ledger text.
pub async fn directive_syntax(Json(directive): Json<Directive>) -> Json<String> {
    Json(directive.to_string())
}

pub async fn get_file(State(state): State<AppState>) -> Json<Ledger> {
    Json(Ledger::clone(&state.ledger()))
}

pub async fn file_errors(State(state): State<AppState>) -> Json<Vec<LedgerError>> {
    Json(state.ledger().errors().to_vec())
}

pub async fn file_options(State(state): State<AppState>) -> Json<Options> {
    Json(state.ledger().options().clone())
}

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    expr: String,
}

/// Evaluates a JMESPath expression against the whole snapshot.
pub async fn query(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> ApiResult<serde_json::Value> {
    let ledger = state.ledger();
    Ok(Json(filter::query(&params.expr, &*ledger)?))
}

pub async fn reload_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    tracing::info!(
        "New event stream subscriber. Total subscribers: {}",
        state.cache.subscriber_count() + 1
    );

    let stream = BroadcastStream::new(state.cache.subscribe())
        // lagging receivers just miss intermediate reloads
        .filter_map(|event| async move { event.ok() })
        .map(|event| Event::default().event("reload").json_data(event))
        .take_until(state.shutdown.clone().cancelled_owned());

    Sse::new(stream).keep_alive(KeepAlive::default())
}
