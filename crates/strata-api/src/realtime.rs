//! Server-sent change events.
//!
//! `GET /realtime/{table}` streams one `model.changed` event per write to the
//! table, each carrying `{"table", "action", "data", "timestamp"}`. A client
//! that falls behind the channel buffer silently misses the oldest events.

use axum::{
  extract::{Path, State},
  response::sse::{Event, KeepAlive, Sse},
};
use strata_core::{access::Ability, store::Backend};
use tokio_stream::{
  Stream,
  StreamExt,
  wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
};

use crate::{AppState, error::ApiError, gate::Authorized};

pub const EVENT_NAME: &str = "model.changed";

/// `GET /realtime/{table}`
pub async fn stream<S: Backend>(
  State(state): State<AppState<S>>,
  Authorized(caller): Authorized,
  Path(table): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
  let schema = state.gateway.table(&table).await?;
  caller.authorize(&schema.table, Ability::Read)?;

  let rx = state.notifier.subscribe(schema.name());
  tracing::debug!(table = schema.name(), caller = %caller.fingerprint(), "realtime subscriber");

  let events = BroadcastStream::new(rx).filter_map(|message| match message {
    Ok(event) => Some(Event::default().event(EVENT_NAME).json_data(&event)),
    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
      tracing::debug!(skipped, "realtime subscriber lagged");
      None
    }
  });
  Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
