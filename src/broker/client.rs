use std::sync::Arc;

use async_trait::async_trait;

use super::error::BrokerError;
use super::types::{
	ClientOptions, ConnAck, DisconnectEvent, InboundMessage, InboundSender,
	OutboundMessage, PublishAck, ReconnectDirective, SubscribeAck,
	TopicFilterQos,
};

/// Callbacks a broker client invokes on connection state changes.
///
/// Called from the client's driver task, so implementations must return
/// quickly and never block.
pub trait ConnectionListener: Send + Sync + 'static {
	/// A handshake completed, either the first one or an automatic reconnect.
	fn on_connected(&self, ack: &ConnAck);

	/// The connection was lost or could not be established.
	///
	/// The returned directive decides whether the library keeps retrying.
	fn on_disconnected(&self, event: &DisconnectEvent) -> ReconnectDirective;
}

/// One broker connection handle.
///
/// `subscribe` may be called before `connect`; the request is queued and
/// resolves once the broker answers after the handshake.
#[async_trait]
pub trait BrokerClient: Send + Sync + 'static {
	/// Client identifier this handle connects with
	fn client_id(&self) -> &str;

	/// Starts the handshake and resolves with the first CONNACK.
	async fn connect(&self) -> Result<ConnAck, BrokerError>;

	/// Subscribes to all filters in one request.
	///
	/// Matching inbound publishes are routed to `inbound` until the filter is
	/// rejected or the client stops.
	async fn subscribe(
		&self,
		filters: Vec<TopicFilterQos>,
		inbound: InboundSender,
	) -> Result<SubscribeAck, BrokerError>;

	/// Publishes one message and resolves on broker confirmation.
	async fn publish(
		&self,
		message: OutboundMessage,
	) -> Result<PublishAck, BrokerError>;

	/// Acknowledges an inbound QoS 1/2 message (manual ack mode).
	async fn acknowledge(&self, message: &InboundMessage) -> Result<(), BrokerError>;

	/// Sends DISCONNECT and stops the handle. Idempotent.
	async fn disconnect(&self) -> Result<(), BrokerError>;
}

/// Factory creating broker client handles
pub trait BrokerConnector: Send + Sync + 'static {
	/// Builds a new, not yet connected, client handle.
	fn create_client(
		&self,
		options: ClientOptions,
		listener: Arc<dyn ConnectionListener>,
	) -> Result<Arc<dyn BrokerClient>, BrokerError>;
}
