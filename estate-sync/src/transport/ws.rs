use super::{agency_header, build_auth_headers, ClientError};
use crate::config::{AuthConfig, WatchConfig};
use crate::error::RawError;
use crate::traits::{ChangeKind, PushChannel, PushEvent, PushSink, Subscription};
use estate_core::{AgencyId, EntityKind};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn, Instrument};

/// Frames pushed by the realtime endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
enum WsFrame {
    Connected,
    Change {
        agency_id: AgencyId,
        collection: String,
        kind: ChangeKind,
    },
    #[serde(other)]
    Other,
}

/// Change notifications for one collection over a WebSocket per agency.
#[derive(Clone)]
pub struct WsPushChannel {
    endpoint: String,
    auth: AuthConfig,
    collection: EntityKind,
}

impl WsPushChannel {
    pub fn new(endpoint: impl Into<String>, auth: AuthConfig, collection: EntityKind) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth,
            collection,
        }
    }

    pub fn from_config(config: &WatchConfig) -> Result<Self, ClientError> {
        let collection = config
            .entity_kind()
            .map_err(|e| ClientError::Config(e.to_string()))?;
        Ok(Self::new(config.ws_endpoint.clone(), config.auth.clone(), collection))
    }

    fn url(&self, agency_id: AgencyId) -> String {
        format!(
            "{}?agency_id={}&collection={}",
            self.endpoint.trim_end_matches('/'),
            agency_id,
            self.collection.collection()
        )
    }

    async fn connect(
        &self,
        agency_id: AgencyId,
    ) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, ClientError> {
        let mut request = self.url(agency_id).into_client_request()?;
        let headers = request.headers_mut();
        for (name, value) in build_auth_headers(&self.auth)?.iter() {
            headers.insert(name, value.clone());
        }
        let (name, value) = agency_header(agency_id);
        headers.insert(name, value);
        let (stream, _) = tokio_tungstenite::connect_async(request).await?;
        Ok(stream)
    }

    async fn stream(self, agency_id: AgencyId, sink: PushSink<AgencyId>) {
        let mut stream = match self.connect(agency_id).await {
            Ok(stream) => stream,
            Err(err) => {
                sink.closed(err.to_string());
                return;
            }
        };
        sink.connected();

        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => match serde_json::from_str::<WsFrame>(&text) {
                    Ok(frame) => {
                        if !self.deliver(frame, &sink) {
                            debug!("Binding detached, dropping WebSocket");
                            return;
                        }
                    }
                    Err(err) => warn!(error = %err, "WS decode error"),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    sink.closed(err.to_string());
                    return;
                }
            }
        }
        sink.closed("connection closed");
    }

    /// Forward one frame. Returns `false` once nobody is listening.
    fn deliver(&self, frame: WsFrame, sink: &PushSink<AgencyId>) -> bool {
        match frame {
            WsFrame::Change {
                agency_id,
                collection,
                kind,
            } => {
                if collection != self.collection.collection() {
                    return true;
                }
                sink.emit(PushEvent::new(agency_id, kind))
            }
            WsFrame::Connected | WsFrame::Other => !sink.is_detached(),
        }
    }
}

impl PushChannel<AgencyId> for WsPushChannel {
    fn open(
        &self,
        scope: &AgencyId,
        sink: PushSink<AgencyId>,
    ) -> Result<Box<dyn Subscription>, RawError> {
        let channel = self.clone();
        let agency_id = *scope;
        let span = tracing::debug_span!("ws_subscription", agency_id = %agency_id);
        let task = tokio::spawn(channel.stream(agency_id, sink).instrument(span));
        Ok(Box::new(WsSubscription { task }))
    }
}

/// Handle of a running WebSocket subscription.
pub struct WsSubscription {
    task: JoinHandle<()>,
}

impl Subscription for WsSubscription {
    fn close(self: Box<Self>) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use estate_core::EntityIdType;

    #[test]
    fn test_frames_decode() {
        let agency = AgencyId::nil();
        let text = format!(
            r#"{{"type":"Change","agency_id":"{}","collection":"properties","kind":"updated"}}"#,
            agency
        );
        assert_eq!(
            serde_json::from_str::<WsFrame>(&text).unwrap(),
            WsFrame::Change {
                agency_id: agency,
                collection: "properties".to_string(),
                kind: ChangeKind::Updated,
            }
        );
        assert_eq!(
            serde_json::from_str::<WsFrame>(r#"{"type":"Connected"}"#).unwrap(),
            WsFrame::Connected
        );
        assert_eq!(
            serde_json::from_str::<WsFrame>(r#"{"type":"Heartbeat"}"#).unwrap(),
            WsFrame::Other
        );
    }

    #[test]
    fn test_url_carries_agency_and_collection() {
        let channel =
            WsPushChannel::new("ws://localhost:3000/ws/", AuthConfig::default(), EntityKind::Owner);
        assert_eq!(
            channel.url(AgencyId::nil()),
            concat!(
                "ws://localhost:3000/ws",
                "?agency_id=00000000-0000-0000-0000-000000000000&collection=owners"
            )
        );
    }
}
