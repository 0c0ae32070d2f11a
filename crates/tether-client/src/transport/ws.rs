//! WebSocket transport over `tokio-tungstenite`.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::debug;
use url::Url;

use super::{Connector, Transport, TransportError, TransportFrame};

/// Opens WebSocket connections, attaching the token as a bearer header and a
/// `token` query parameter.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Create a connector.
    pub fn new() -> Self {
        Self
    }
}

/// Append `token` as a query parameter, keeping any existing query.
pub fn authenticated_url(url: &str, token: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme '{other}'"
            )));
        }
    }
    let _ = url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str, token: &str) -> Result<Transport, TransportError> {
        let url = authenticated_url(url, token)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| TransportError::Handshake(format!("token is not a valid header: {e}")))?;
        let _ = request.headers_mut().insert("Authorization", bearer);

        debug!(host = url.host_str().unwrap_or_default(), "opening websocket");
        let (ws, _response) = connect_async(request).await.map_err(handshake_error)?;
        let (sink, stream) = ws.split();

        let sink = sink
            .sink_map_err(TransportError::from)
            .with(|frame: TransportFrame| future::ready(Ok::<_, TransportError>(into_message(frame))));
        let stream = stream.filter_map(|item| {
            future::ready(match item {
                Ok(message) => from_message(message).map(Ok),
                Err(e) => Some(Err(TransportError::from(e))),
            })
        });

        Ok(Transport::new(Box::pin(sink), Box::pin(stream)))
    }
}

fn handshake_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            TransportError::Rejected {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_owned(),
            }
        }
        tungstenite::Error::Url(e) => TransportError::InvalidUrl(e.to_string()),
        tungstenite::Error::Io(e) => TransportError::Io(e.to_string()),
        other => TransportError::Handshake(other.to_string()),
    }
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::Closed
            }
            other => Self::Io(other.to_string()),
        }
    }
}

fn into_message(frame: TransportFrame) -> Message {
    match frame {
        TransportFrame::Text(text) => Message::Text(text.into()),
        TransportFrame::Binary(data) => Message::Binary(data.into()),
        TransportFrame::Ping(data) => Message::Ping(data.into()),
        TransportFrame::Pong(data) => Message::Pong(data.into()),
        TransportFrame::Close => Message::Close(None),
    }
}

fn from_message(message: Message) -> Option<TransportFrame> {
    match message {
        Message::Text(text) => Some(TransportFrame::Text(text.as_str().to_owned())),
        Message::Binary(data) => Some(TransportFrame::Binary(data.to_vec())),
        Message::Ping(data) => Some(TransportFrame::Ping(data.to_vec())),
        Message::Pong(data) => Some(TransportFrame::Pong(data.to_vec())),
        Message::Close(_) => Some(TransportFrame::Close),
        Message::Frame(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_appended_to_query() {
        let url = authenticated_url("ws://localhost:8000/ws", "abc").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8000/ws?token=abc");
    }

    #[test]
    fn existing_query_is_kept_and_token_encoded() {
        let url = authenticated_url("wss://console.example/ws?tenant=7", "a b&c").unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("tenant".to_owned(), "7".to_owned()),
                ("token".to_owned(), "a b&c".to_owned())
            ]
        );
    }

    #[test]
    fn non_websocket_scheme_is_rejected() {
        let err = authenticated_url("http://localhost/ws", "t").unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl(_)));
        let err = authenticated_url("not a url", "t").unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl(_)));
    }

    #[test]
    fn frames_map_to_messages() {
        let msg = into_message(TransportFrame::Text("hi".into()));
        assert_eq!(from_message(msg), Some(TransportFrame::Text("hi".into())));
        assert_eq!(
            from_message(into_message(TransportFrame::Close)),
            Some(TransportFrame::Close)
        );
    }

    #[tokio::test]
    async fn connection_refused_is_io_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = WsConnector::new()
            .connect(&format!("ws://{addr}/ws"), "t")
            .await;
        let err = result.err().unwrap();
        assert!(!err.is_auth_failure());
    }
}
