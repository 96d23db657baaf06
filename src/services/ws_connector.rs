//! WebSocket implementation of the push channel connection seam.

use futures::{SinkExt, StreamExt, future::BoxFuture};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use tracing::{debug, trace};

use super::transport::{Connection, Connector, Frame};
use crate::error::TransportError;

/// Opens push connections with `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: Url) -> BoxFuture<'static, Result<Box<dyn Connection>, TransportError>> {
        Box::pin(async move {
            // The query carries the token; keep it out of errors and logs.
            let mut shown = url.clone();
            shown.set_query(None);

            let (stream, response) =
                connect_async(url.as_str())
                    .await
                    .map_err(|err| TransportError::Connect {
                        url: shown.to_string(),
                        message: err.to_string(),
                    })?;
            debug!(url = %shown, status = %response.status(), "websocket handshake complete");
            Ok(Box::new(WsConnection { stream }) as Box<dyn Connection>)
        })
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Connection for WsConnection {
    fn send(&mut self, text: String) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.stream
                .send(Message::text(text))
                .await
                .map_err(|err| TransportError::Send(err.to_string()))
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, Option<Result<Frame, TransportError>>> {
        Box::pin(async move {
            loop {
                let message = match self.stream.next().await? {
                    Ok(message) => message,
                    Err(err) => return Some(Err(TransportError::Receive(err.to_string()))),
                };
                match message {
                    Message::Text(text) => return Some(Ok(Frame::Text(text.to_string()))),
                    Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => return Some(Ok(Frame::Text(text))),
                        Err(_) => trace!(len = bytes.len(), "ignoring non-UTF-8 binary frame"),
                    },
                    Message::Close(frame) => {
                        return Some(Ok(Frame::Closed {
                            code: frame.as_ref().map(|frame| u16::from(frame.code)),
                            reason: frame
                                .map(|frame| frame.reason.to_string())
                                .unwrap_or_default(),
                        }));
                    }
                    // Protocol-level pings are answered by tungstenite itself.
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                }
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.stream
                .close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client closed".into(),
                }))
                .await
                .map_err(|err| TransportError::Send(err.to_string()))
        })
    }
}
