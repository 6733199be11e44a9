//! WebSocket transport
//!
//! A [`Connection`] owns one socket to `/ws/{role}/{code}` on the backend.
//! The socket lives in a background task; the handle only holds the `ready`
//! flag and the sending half of a command channel, in the manner of a thin
//! client handle over a transport loop. Inbound text frames are decoded into
//! [`Event`]s and handed to a single callback. Frames that do not decode are
//! dropped. Nothing is retried and nothing is queued while the socket is not
//! open.
//!
//! A [`Link`] holds at most one connection and replaces it whenever the
//! identity (`code`, `role`) changes.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    event::Event,
    session::{Role, Tunnel},
};

/// Callback receiving every decoded inbound event
pub type OnMessage = Arc<dyn Fn(Event) + Send + Sync>;

/// Errors building a socket endpoint
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The base address cannot be parsed
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    /// The base address is not http(s) or ws(s)
    #[error("unsupported endpoint scheme {0:?}")]
    Scheme(String),
}

/// Builds `ws(s)://<base>/ws/{role}/{code}`
///
/// An `http` base becomes `ws` and an `https` base becomes `wss`. A path on
/// the base is kept as a prefix.
///
/// # Errors
///
/// `Error::Scheme` for any other scheme, or a base that cannot hold a path
pub fn endpoint(base: &Url, code: &str, role: Role) -> Result<Url, Error> {
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(Error::Scheme(other.to_owned())),
    };

    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|()| Error::Scheme(base.scheme().to_owned()))?;
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|()| Error::Scheme(base.scheme().to_owned()))?
        .pop_if_empty()
        .extend(["ws", role.as_str(), code]);

    Ok(url)
}

/// One live socket for one (code, role)
#[derive(Debug)]
pub struct Connection {
    ready: Arc<AtomicBool>,
    outbound: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl Connection {
    /// Opens a socket to `url` in a background task
    ///
    /// Must be called from within a tokio runtime. The connection starts not
    /// ready; it becomes ready once the handshake completes, right before
    /// `greeting` (if any) is sent.
    pub fn connect(url: Url, greeting: Option<Event>, on_message: OnMessage) -> Self {
        let ready = Arc::new(AtomicBool::new(false));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(connection_loop(
            url,
            greeting,
            ready.clone(),
            outbound_rx,
            on_message,
        ));

        Self {
            ready,
            outbound,
            task,
        }
    }
}

impl Tunnel for Connection {
    fn send(&self, event: &Event) -> bool {
        if !self.is_ready() {
            debug!(kind = event.kind(), "socket not open, event dropped");
            return false;
        }
        self.outbound.send(event.to_message()).is_ok()
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn close(self) {
        drop(self);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // An open socket is closed by the loop once the command channel is
        // gone; a pending handshake is abandoned.
        if !self.is_ready() {
            self.task.abort();
        }
    }
}

async fn connection_loop(
    url: Url,
    greeting: Option<Event>,
    ready: Arc<AtomicBool>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    on_message: OnMessage,
) {
    let socket = match connect_async(url.as_str()).await {
        Ok((socket, _)) => socket,
        Err(e) => {
            warn!(%url, "socket failed to open: {e}");
            return;
        }
    };
    info!(%url, "socket open");
    let (mut sink, mut stream) = socket.split();

    if let Some(greeting) = greeting {
        if let Err(e) = sink.send(Message::Text(greeting.to_message().into())).await {
            warn!(%url, "greeting failed: {e}");
            return;
        }
    }
    ready.store(true, Ordering::SeqCst);

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => match outgoing {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        warn!(%url, "socket send failed: {e}");
                        break;
                    }
                }
                None => {
                    debug!(%url, "connection handle dropped, closing socket");
                    let _ = sink.close().await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match Event::decode(&text) {
                    Ok(event) => on_message(event),
                    Err(e) => debug!(%url, "dropping frame: {e}"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!(%url, "socket closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(%url, "socket receive failed: {e}");
                    break;
                }
            },
        }
    }

    ready.store(false, Ordering::SeqCst);
}

#[derive(Debug)]
struct Current {
    code: String,
    role: Role,
    connection: Connection,
}

/// At most one connection, replaced when the identity changes
///
/// A link is itself a [`Tunnel`], sending through whichever connection is
/// current. Dropping the link closes the connection.
pub struct Link {
    base: Url,
    greeting: Mutex<Option<Event>>,
    on_message: OnMessage,
    current: Mutex<Option<Current>>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("base", &self.base.as_str())
            .field("target", &self.target())
            .finish_non_exhaustive()
    }
}

impl Link {
    /// Creates a link with no connection yet
    pub fn new(base: Url, on_message: OnMessage) -> Self {
        Self {
            base,
            greeting: Mutex::new(None),
            on_message,
            current: Mutex::new(None),
        }
    }

    /// Sets the event sent first on every new connection
    pub fn set_greeting(&self, greeting: Option<Event>) {
        *self.greeting.lock().unwrap_or_else(PoisonError::into_inner) = greeting;
    }

    fn current(&self) -> std::sync::MutexGuard<'_, Option<Current>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identity of the current connection
    pub fn target(&self) -> Option<(String, Role)> {
        self.current()
            .as_ref()
            .map(|c| (c.code.clone(), c.role))
    }

    /// Points the link at (`code`, `role`)
    ///
    /// The previous connection is closed and a new one opened only when the
    /// identity changed. An empty code closes the connection and opens none.
    ///
    /// # Returns
    ///
    /// Whether a new connection was opened
    ///
    /// # Errors
    ///
    /// See [`endpoint`]; the previous connection is kept in that case.
    pub fn retarget(&self, code: &str, role: Role) -> Result<bool, Error> {
        let code = code.trim();
        let mut current = self.current();

        if code.is_empty() {
            if let Some(previous) = current.take() {
                info!(code = %previous.code, "leaving session");
                previous.connection.close();
            }
            return Ok(false);
        }
        if current
            .as_ref()
            .is_some_and(|c| c.code == code && c.role == role)
        {
            return Ok(false);
        }

        let url = endpoint(&self.base, code, role)?;
        if let Some(previous) = current.take() {
            debug!(code = %previous.code, "identity changed, closing previous socket");
            previous.connection.close();
        }

        let greeting = self
            .greeting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        *current = Some(Current {
            code: code.to_owned(),
            role,
            connection: Connection::connect(url, greeting, self.on_message.clone()),
        });
        Ok(true)
    }

    /// Closes the current connection, if any
    pub fn disconnect(&self) {
        if let Some(previous) = self.current().take() {
            previous.connection.close();
        }
    }
}

impl Tunnel for Link {
    fn send(&self, event: &Event) -> bool {
        self.current()
            .as_ref()
            .is_some_and(|c| c.connection.send(event))
    }

    fn is_ready(&self) -> bool {
        self.current()
            .as_ref()
            .is_some_and(|c| c.connection.is_ready())
    }

    fn close(self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use super::*;
    use crate::event::RoundEvent;

    fn base(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_endpoint_rewrites_http() {
        let url = endpoint(&base("http://localhost:8080"), "ABC123", Role::Student).unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8080/ws/student/ABC123");
    }

    #[test]
    fn test_endpoint_rewrites_https_and_keeps_prefix() {
        let url = endpoint(
            &base("https://qwiz.example.com/api/?x=1"),
            "ABC123",
            Role::Lecturer,
        )
        .unwrap();
        assert_eq!(url.as_str(), "wss://qwiz.example.com/api/ws/lecturer/ABC123");
    }

    #[test]
    fn test_endpoint_keeps_ws() {
        let url = endpoint(&base("ws://127.0.0.1:9000/"), "X1Y2Z3", Role::Student).unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:9000/ws/student/X1Y2Z3");
    }

    #[test]
    fn test_endpoint_rejects_other_schemes() {
        assert_eq!(
            endpoint(&base("ftp://example.com"), "ABC123", Role::Student),
            Err(Error::Scheme("ftp".to_owned()))
        );
    }

    fn ignore() -> OnMessage {
        Arc::new(|_: Event| {})
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    /// Accepts one socket, pushes one frame to it and reports every text
    /// frame it receives
    async fn server(push: &'static str) -> (Url, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = base(&format!("http://{}", listener.local_addr().unwrap()));
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = accept_async(stream).await.unwrap();
            socket
                .send(Message::Text("not json".to_owned().into()))
                .await
                .unwrap();
            socket
                .send(Message::Text(push.to_owned().into()))
                .await
                .unwrap();
            while let Some(Ok(message)) = socket.next().await {
                if let Message::Text(text) = message {
                    let _ = tx.send(text.as_str().to_owned());
                }
            }
        });

        (url, rx)
    }

    #[tokio::test]
    async fn test_send_before_open_is_dropped() {
        let url = endpoint(&base("http://127.0.0.1:1"), "ABC123", Role::Student).unwrap();
        let connection = Connection::connect(url, None, ignore());

        let event = Event::student_name("Ava");
        assert!(!connection.send(&event));
        assert!(!connection.is_ready());
    }

    #[tokio::test]
    async fn test_connection_round_trip() {
        let (base_url, mut frames) = server(r#"{"type":"session_ended","code":"ABC123"}"#).await;
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let on_message: OnMessage = Arc::new(move |event: Event| {
            sink.lock().unwrap().push(event);
        });

        let url = endpoint(&base_url, "ABC123", Role::Student).unwrap();
        let connection = Connection::connect(url, Some(Event::student_name("Ava")), on_message);

        wait_until(|| connection.is_ready()).await;
        assert_eq!(
            frames.recv().await.unwrap(),
            r#"{"type":"student_name","name":"Ava"}"#
        );

        assert!(connection.send(&Event::transcript_chunk("hello", 7)));
        let frame = frames.recv().await.unwrap();
        assert_eq!(Event::decode(&frame).unwrap().kind(), "transcript_chunk");

        wait_until(|| !received.lock().unwrap().is_empty()).await;
        assert_eq!(
            received.lock().unwrap().as_slice(),
            &[Event::Round(RoundEvent::SessionEnded {
                code: "ABC123".to_owned()
            })]
        );
    }

    #[tokio::test]
    async fn test_server_close_clears_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = base(&format!("http://{}", listener.local_addr().unwrap()));
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = accept_async(stream).await.unwrap();
            // Close as soon as the client has proven the socket works.
            while let Some(Ok(message)) = socket.next().await {
                if message.is_text() {
                    socket.close(None).await.unwrap();
                    break;
                }
            }
            while socket.next().await.is_some() {}
        });

        let url = endpoint(&base_url, "ABC123", Role::Lecturer).unwrap();
        let connection = Connection::connect(url, None, ignore());
        wait_until(|| connection.is_ready()).await;

        assert!(connection.send(&Event::transcript_chunk("last words", 1)));
        wait_until(|| !connection.is_ready()).await;
        assert!(!connection.send(&Event::transcript_chunk("too late", 2)));
    }

    #[tokio::test]
    async fn test_link_retarget_policy() {
        let (base_url, _frames) = server(r#"{"type":"noop"}"#).await;
        let link = Link::new(base_url, ignore());

        assert!(!link.retarget("", Role::Student).unwrap());
        assert_eq!(link.target(), None);

        assert!(link.retarget("ABC123", Role::Student).unwrap());
        assert!(!link.retarget(" ABC123 ", Role::Student).unwrap());
        assert_eq!(link.target(), Some(("ABC123".to_owned(), Role::Student)));
        wait_until(|| link.is_ready()).await;

        assert!(!link.retarget("", Role::Student).unwrap());
        assert_eq!(link.target(), None);
        assert!(!link.is_ready());
        assert!(!link.send(&Event::student_name("Ava")));
    }

    #[tokio::test]
    async fn test_link_keeps_connection_on_bad_endpoint() {
        let link = Link::new(base("mailto:someone@example.com"), ignore());
        assert!(link.retarget("ABC123", Role::Student).is_err());
        assert_eq!(link.target(), None);
    }
}
