//! Portal HTTP client with bearer-token authentication
//!
//! The real-time layer only maintains what REST has already established:
//! this client does the initial hydration (first page of a room's
//! messages, order/dispatch detail), the fallback-poll refreshes, and the
//! user mutations. All of its cache writes go through the shared store's
//! reconciliation rules, so poll results can never clobber fresher
//! event-driven data.

use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION},
    Client, Response,
};
use std::sync::Arc;
use tracing::{debug, error, instrument};

use pharmalink_core::{
    ChatMessage, DispatchId, DispatchRecord, Error, OrderId, OrderRecord, PharmacyId, Result,
    RoomId, RoomListResponse, RoomMessagesResponse, RoomSummary, SendMessageRequest,
    SendMessageResponse,
};
use pharmalink_store::SyncStore;

use crate::token::TokenSupplier;

const USER_AGENT_VALUE: &str = concat!("pharmalink/", env!("CARGO_PKG_VERSION"));

/// HTTP client for the pharmacy portal API
pub struct PortalClient {
    http: Client,
    base_url: String,
    token_supplier: Arc<dyn TokenSupplier>,
    /// Shared cache; responses are written through its reconciliation rules
    store: Option<Arc<SyncStore>>,
}

impl PortalClient {
    pub fn new(base_url: impl Into<String>, token_supplier: Arc<dyn TokenSupplier>) -> Self {
        let http = Client::builder()
            .user_agent(USER_AGENT_VALUE)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token_supplier,
            store: None,
        }
    }

    /// Attach the shared store so responses hydrate the cache
    pub fn with_store(mut self, store: Arc<SyncStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Headers for an authenticated request. The token is read fresh from
    /// the supplier on every call.
    fn auth_headers(&self) -> Result<HeaderMap> {
        let token = self
            .token_supplier
            .token()
            .filter(|t| !t.is_empty())
            .ok_or(Error::TokenExpired)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| Error::AuthenticationError("token contains invalid bytes".to_string()))?,
        );
        Ok(headers)
    }

    /// Check if a response indicates authentication failure
    fn check_auth_error(response: &Response) -> Option<Error> {
        match response.status().as_u16() {
            401 => Some(Error::TokenExpired),
            403 => Some(Error::AuthenticationError("Access forbidden".to_string())),
            _ => None,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .headers(self.auth_headers()?)
            .send()
            .await?;

        if let Some(err) = Self::check_auth_error(&response) {
            return Err(err);
        }

        let response = response.error_for_status().map_err(|e| {
            error!("Request failed: {}", e);
            Error::ApiError(e.to_string())
        })?;

        response.json().await.map_err(|e| {
            error!("Failed to parse response: {}", e);
            Error::InvalidData(e.to_string())
        })
    }

    /// Fetch the messages of a room (initial hydration or fallback poll)
    #[instrument(skip(self))]
    pub async fn get_room_messages(&self, room: &RoomId) -> Result<Vec<ChatMessage>> {
        let url = format!("{}/rooms/{}/messages", self.base_url, room);
        let data: RoomMessagesResponse = self.get_json(&url).await?;
        debug!("Fetched {} messages for room {}", data.messages.len(), room);

        if let Some(ref store) = self.store {
            store.hydrate_messages(data.messages.clone());
        }
        Ok(data.messages)
    }

    /// Fetch the room list for a pharmacy
    #[instrument(skip(self))]
    pub async fn get_room_list(&self, pharmacy: &PharmacyId) -> Result<Vec<RoomSummary>> {
        let url = format!("{}/pharmacies/{}/rooms", self.base_url, pharmacy);
        let data: RoomListResponse = self.get_json(&url).await?;
        debug!("Fetched {} rooms for pharmacy {}", data.rooms.len(), pharmacy);

        if let Some(ref store) = self.store {
            store.hydrate_rooms(data.rooms.clone());
        }
        Ok(data.rooms)
    }

    /// Fetch a single order detail
    #[instrument(skip(self))]
    pub async fn get_order(&self, order: &OrderId) -> Result<OrderRecord> {
        let url = format!("{}/orders/{}", self.base_url, order);
        let record: OrderRecord = self.get_json(&url).await?;

        if let Some(ref store) = self.store {
            store.hydrate_order(record.clone());
        }
        Ok(record)
    }

    /// Fetch a single dispatch detail
    #[instrument(skip(self))]
    pub async fn get_dispatch(&self, dispatch: &DispatchId) -> Result<DispatchRecord> {
        let url = format!("{}/dispatches/{}", self.base_url, dispatch);
        let record: DispatchRecord = self.get_json(&url).await?;

        if let Some(ref store) = self.store {
            store.hydrate_dispatch(record.clone());
        }
        Ok(record)
    }

    /// Send a chat message.
    ///
    /// The confirmed message is written optimistically into the store under
    /// its server-assigned id, so the push echo dedups to the same entry.
    #[instrument(skip(self, body))]
    pub async fn send_message(&self, room: &RoomId, body: impl Into<String>) -> Result<ChatMessage> {
        let url = format!("{}/rooms/{}/messages", self.base_url, room);
        let request = SendMessageRequest { body: body.into() };

        let response = self
            .http
            .post(&url)
            .headers(self.auth_headers()?)
            .json(&request)
            .send()
            .await?;

        if let Some(err) = Self::check_auth_error(&response) {
            return Err(err);
        }

        let response = response.error_for_status().map_err(|e| {
            error!("Send message failed: {}", e);
            Error::ApiError(e.to_string())
        })?;

        let data: SendMessageResponse = response.json().await.map_err(|e| {
            error!("Failed to parse send response: {}", e);
            Error::InvalidData(e.to_string())
        })?;

        debug!("Message {} sent to room {}", data.message.id, room);

        if let Some(ref store) = self.store {
            store.insert_local_message(data.message.clone());
        }
        Ok(data.message)
    }

    /// Mark an order ready for pickup/dispatch.
    ///
    /// Write-through: the returned record lands in the store under the same
    /// recency rules as a push event, so a racing `order.updated` resolves
    /// to whichever state is newest.
    #[instrument(skip(self))]
    pub async fn mark_order_ready(&self, order: &OrderId) -> Result<OrderRecord> {
        let url = format!("{}/orders/{}/ready", self.base_url, order);

        let response = self
            .http
            .post(&url)
            .headers(self.auth_headers()?)
            .send()
            .await?;

        if let Some(err) = Self::check_auth_error(&response) {
            return Err(err);
        }

        let response = response.error_for_status().map_err(|e| {
            error!("Mark ready failed: {}", e);
            Error::ApiError(e.to_string())
        })?;

        let record: OrderRecord = response.json().await.map_err(|e| {
            error!("Failed to parse order response: {}", e);
            Error::InvalidData(e.to_string())
        })?;

        if let Some(ref store) = self.store {
            store.apply_order_updated(record.clone());
        }
        Ok(record)
    }

    pub fn store(&self) -> Option<&Arc<SyncStore>> {
        self.store.as_ref()
    }
}
