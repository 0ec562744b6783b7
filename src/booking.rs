//! Booking platform client: pages through the GraphQL `bookings` query for a
//! date window and flattens the nested response into [`Booking`]s.

use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::config::BookingApi;
use crate::error::BookingError;
use crate::model::{Booking, Instant, Reservation, ReservedEvent, Resource, Window};

const GRAPHQL_PATH: &str = "/api/v3/graphql";

/// Built-in query document. Selects exactly what the matcher needs.
pub const DEFAULT_QUERY: &str = r#"query Bookings($startAtGteq: ISO8601DateTime, $endAtLteq: ISO8601DateTime, $cursor: String) {
  bookings(startAtGteq: $startAtGteq, endAtLteq: $endAtLteq, after: $cursor) {
    totalNodeCount
    pageInfo { hasNextPage endCursor }
    nodes {
      humanNumber
      id
      state
      reservations {
        nodes {
          reservationable {
            event {
              name
              startAt
              endAt
              eventAllocation {
                eventAllocationResources {
                  totalNodeCount
                  nodes { resource { name resourceType { name } } }
                }
              }
            }
          }
        }
      }
    }
  }
}
"#;

/// Anything that can produce the complete booking set for a window.
#[async_trait]
pub trait BookingSource: Send + Sync {
    async fn fetch(&self, window: &Window) -> Result<Vec<Booking>, BookingError>;
}

pub struct BookingClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    query: String,
}

impl BookingClient {
    pub fn new(api: &BookingApi, query: String, timeout: Duration) -> Result<Self, BookingError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}{GRAPHQL_PATH}", api.base_url),
            token: api.token.clone(),
            query,
        })
    }

    async fn fetch_page(
        &self,
        window: &Window,
        cursor: Option<&str>,
    ) -> Result<BookingsPage, BookingError> {
        let mut variables = Map::new();
        variables.insert(
            "startAtGteq".into(),
            Value::String(window.start.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        variables.insert(
            "endAtLteq".into(),
            Value::String(window.end.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        if let Some(cursor) = cursor {
            variables.insert("cursor".into(), Value::String(cursor.to_string()));
        }

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&json!({ "query": self.query, "variables": variables }))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(BookingError::Unauthorized(status.as_u16()));
        }
        let body = response.text().await?;
        if !status.is_success() {
            return Err(BookingError::Status {
                status: status.as_u16(),
                body: truncate(&body, 512),
            });
        }
        decode_page(&body)
    }
}

#[async_trait]
impl BookingSource for BookingClient {
    async fn fetch(&self, window: &Window) -> Result<Vec<Booking>, BookingError> {
        let mut bookings = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self.fetch_page(window, cursor.as_deref()).await?;
            let fetched = page.nodes.len();
            bookings.extend(page.nodes.into_iter().map(Booking::from));

            if !page.page_info.has_next_page {
                info!(
                    "fetched {fetched} bookings, {} of {} total",
                    bookings.len(),
                    page.total_node_count
                );
                break;
            }
            let next = page.page_info.end_cursor.ok_or_else(|| {
                BookingError::Query("page reports hasNextPage without an endCursor".into())
            })?;
            debug!(
                "fetched {fetched} bookings, total {}, next cursor {next}",
                page.total_node_count
            );
            cursor = Some(next);
        }

        Ok(bookings)
    }
}

fn decode_page(body: &str) -> Result<BookingsPage, BookingError> {
    let envelope: GraphQlResponse =
        serde_json::from_str(body).map_err(|e| BookingError::Query(format!("undecodable response: {e}")))?;
    if let Some(errors) = envelope.errors.filter(|errs| !errs.is_empty()) {
        let messages: Vec<String> = errors.into_iter().map(|e| e.message).collect();
        return Err(BookingError::Query(messages.join("; ")));
    }
    envelope
        .data
        .map(|data| data.bookings)
        .ok_or_else(|| BookingError::Query("response has no data".into()))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

// ── Wire format ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<BookingsData>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct BookingsData {
    bookings: BookingsPage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookingsPage {
    #[serde(default)]
    total_node_count: u64,
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<BookingNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookingNode {
    human_number: String,
    #[serde(deserialize_with = "numeric_id")]
    id: i64,
    state: String,
    #[serde(default)]
    reservations: Connection<ReservationNode>,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Connection<T> {
    #[serde(default)]
    nodes: Vec<T>,
}

impl<T> Default for Connection<T> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

#[derive(Debug, Deserialize)]
struct ReservationNode {
    reservationable: Option<Reservationable>,
}

#[derive(Debug, Deserialize)]
struct Reservationable {
    event: Option<EventNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventNode {
    name: String,
    start_at: Instant,
    end_at: Instant,
    #[serde(default)]
    event_allocation: Option<EventAllocation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventAllocation {
    #[serde(default)]
    event_allocation_resources: Connection<AllocationNode>,
}

#[derive(Debug, Deserialize)]
struct AllocationNode {
    resource: ResourceNode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceNode {
    name: String,
    #[serde(default)]
    resource_type: Option<Named>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

/// GraphQL ids arrive as numbers or numeric strings depending on the schema.
fn numeric_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Num(i64),
        Str(String),
    }
    match Id::deserialize(deserializer)? {
        Id::Num(n) => Ok(n),
        Id::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

impl From<BookingNode> for Booking {
    fn from(node: BookingNode) -> Self {
        let reservations = node
            .reservations
            .nodes
            .into_iter()
            .map(|r| Reservation {
                event: r.reservationable.and_then(|r| r.event).map(ReservedEvent::from),
            })
            .collect();
        Booking {
            human_number: node.human_number,
            id: node.id,
            state: node.state,
            reservations,
        }
    }
}

impl From<EventNode> for ReservedEvent {
    fn from(event: EventNode) -> Self {
        let resources = event
            .event_allocation
            .map(|a| a.event_allocation_resources.nodes)
            .unwrap_or_default()
            .into_iter()
            .map(|n| Resource {
                name: n.resource.name,
                kind: n.resource.resource_type.map(|t| t.name).unwrap_or_default(),
            })
            .collect();
        ReservedEvent {
            name: event.name,
            start_at: event.start_at,
            end_at: event.end_at,
            resources,
        }
    }
}
