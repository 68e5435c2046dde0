//! Unix domain socket for connection status.
//!
//! Every peer that connects receives the current state immediately, then
//! one frame per reported change. Peers may also write frames to report a
//! change themselves; that is the only way to set the state from outside
//! the process. A frame is a 4-byte big-endian length (always 1) followed
//! by one payload byte: `0x00` disconnected, `0x01` connected. Peers that
//! disappear only end their own tasks; reporting never waits on them.
//!
//! The socket file is owner-only, so reporters are local processes running
//! as the server's user.

use super::{ConnectionStatusChannel, WalletConnectionState};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

/// Payload length carried in every frame header.
pub const FRAME_PAYLOAD_LEN: u32 = 1;

/// Total bytes per frame on the wire.
pub const FRAME_LEN: usize = 5;

/// Owner-only access to the socket file.
const SOCKET_MODE: u32 = 0o600;

#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("{0} exists and is not a socket")]
    NotASocket(PathBuf),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

pub fn encode_frame(connected: bool) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[..4].copy_from_slice(&FRAME_PAYLOAD_LEN.to_be_bytes());
    frame[4] = u8::from(connected);
    frame
}

/// Read one frame, returning the `connected` flag.
pub async fn read_frame<R>(reader: &mut R) -> Result<bool, SocketError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await?;
    if len != FRAME_PAYLOAD_LEN {
        return Err(SocketError::InvalidFrame(format!(
            "expected payload length {}, got {}",
            FRAME_PAYLOAD_LEN, len
        )));
    }

    match reader.read_u8().await? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(SocketError::InvalidFrame(format!(
            "unknown status byte {:#04x}",
            other
        ))),
    }
}

pub struct StatusSocket {
    listener: UnixListener,
    path: PathBuf,
    channel: ConnectionStatusChannel,
}

impl StatusSocket {
    /// Bind at `path`, replacing a stale socket left by a previous run.
    pub fn bind(
        path: impl AsRef<Path>,
        channel: ConnectionStatusChannel,
    ) -> Result<Self, SocketError> {
        let path = path.as_ref().to_path_buf();
        remove_stale_socket(&path)?;

        let listener = UnixListener::bind(&path)?;
        set_socket_permissions(&path)?;
        tracing::info!(path = %path.display(), "Status socket listening");

        Ok(Self {
            listener,
            path,
            channel,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept peers until the listener fails.
    pub async fn serve(self) -> Result<(), SocketError> {
        loop {
            let (stream, _) = self.listener.accept().await?;
            let channel = self.channel.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_peer(stream, channel).await {
                    tracing::debug!(error = %e, "Status peer disconnected");
                }
            });
        }
    }
}

impl Drop for StatusSocket {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Stream states to the peer while applying the frames it sends.
///
/// The connection lasts until the peer stops sending: a write failure alone
/// does not drop reports already in flight.
async fn serve_peer(
    stream: UnixStream,
    channel: ConnectionStatusChannel,
) -> Result<(), SocketError> {
    let (reader, writer) = stream.into_split();
    let writer = tokio::spawn(stream_states(writer, channel.subscribe()));

    let result = read_reports(reader, &channel).await;
    writer.abort();
    result
}

async fn read_reports<R>(
    mut reader: R,
    channel: &ConnectionStatusChannel,
) -> Result<(), SocketError>
where
    R: AsyncRead + Unpin,
{
    loop {
        match read_frame(&mut reader).await {
            Ok(connected) => channel.report(WalletConnectionState::observed_now(connected)),
            Err(SocketError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping status peer");
                return Err(e);
            }
        }
    }
}

async fn stream_states<W>(
    mut stream: W,
    mut rx: watch::Receiver<WalletConnectionState>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let initial = *rx.borrow_and_update();
    stream.write_all(&encode_frame(initial.connected)).await?;

    while rx.changed().await.is_ok() {
        let state = *rx.borrow_and_update();
        stream.write_all(&encode_frame(state.connected)).await?;
    }
    Ok(())
}

fn remove_stale_socket(path: &Path) -> Result<(), SocketError> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(metadata) => {
            if !metadata.file_type().is_socket() {
                return Err(SocketError::NotASocket(path.to_path_buf()));
            }
            std::fs::remove_file(path)?;
            tracing::debug!(path = %path.display(), "Removed stale status socket");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn set_socket_permissions(path: &Path) -> Result<(), SocketError> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn next_frame(stream: &mut UnixStream) -> bool {
        tokio::time::timeout(Duration::from_secs(2), read_frame(stream))
            .await
            .expect("timed out waiting for frame")
            .unwrap()
    }

    #[test]
    fn test_encode_frame() {
        assert_eq!(encode_frame(true), [0, 0, 0, 1, 1]);
        assert_eq!(encode_frame(false), [0, 0, 0, 1, 0]);
    }

    #[tokio::test]
    async fn test_read_frame() {
        let mut bytes: &[u8] = &[0, 0, 0, 1, 1, 0, 0, 0, 1, 0];
        assert!(read_frame(&mut bytes).await.unwrap());
        assert!(!read_frame(&mut bytes).await.unwrap());
    }

    #[tokio::test]
    async fn test_read_frame_rejects_bad_length() {
        let mut bytes: &[u8] = &[0, 0, 0, 2, 1, 1];
        assert!(matches!(
            read_frame(&mut bytes).await,
            Err(SocketError::InvalidFrame(_))
        ));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_unknown_byte() {
        let mut bytes: &[u8] = &[0, 0, 0, 1, 7];
        assert!(matches!(
            read_frame(&mut bytes).await,
            Err(SocketError::InvalidFrame(_))
        ));
    }

    #[tokio::test]
    async fn test_read_frame_truncated() {
        let mut bytes: &[u8] = &[0, 0, 0, 1];
        assert!(matches!(
            read_frame(&mut bytes).await,
            Err(SocketError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_watcher_receives_initial_and_updates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.sock");
        let channel = ConnectionStatusChannel::new();

        let socket = StatusSocket::bind(&path, channel.clone()).unwrap();
        let server = tokio::spawn(socket.serve());

        let mut watcher = UnixStream::connect(&path).await.unwrap();
        assert!(!next_frame(&mut watcher).await);

        channel.report(WalletConnectionState::observed_now(true));
        assert!(next_frame(&mut watcher).await);

        channel.report(WalletConnectionState::observed_now(false));
        assert!(!next_frame(&mut watcher).await);

        server.abort();
    }

    #[tokio::test]
    async fn test_late_watcher_gets_current_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.sock");
        let channel = ConnectionStatusChannel::new();
        channel.report(WalletConnectionState::observed_now(true));

        let socket = StatusSocket::bind(&path, channel.clone()).unwrap();
        let server = tokio::spawn(socket.serve());

        let mut watcher = UnixStream::connect(&path).await.unwrap();
        assert!(next_frame(&mut watcher).await);

        server.abort();
    }

    #[tokio::test]
    async fn test_peer_report_reaches_channel_and_watchers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.sock");
        let channel = ConnectionStatusChannel::new();

        let socket = StatusSocket::bind(&path, channel.clone()).unwrap();
        let server = tokio::spawn(socket.serve());

        let mut watcher = UnixStream::connect(&path).await.unwrap();
        assert!(!next_frame(&mut watcher).await);

        // Report and hang up without reading anything back
        let mut reporter = UnixStream::connect(&path).await.unwrap();
        reporter.write_all(&encode_frame(true)).await.unwrap();
        drop(reporter);

        assert!(next_frame(&mut watcher).await);
        assert!(channel.current().connected);
        assert!(channel.current().observed_at > 0);

        server.abort();
    }

    #[tokio::test]
    async fn test_peer_can_watch_and_report() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.sock");
        let channel = ConnectionStatusChannel::new();

        let socket = StatusSocket::bind(&path, channel.clone()).unwrap();
        let server = tokio::spawn(socket.serve());

        let mut peer = UnixStream::connect(&path).await.unwrap();
        assert!(!next_frame(&mut peer).await);

        peer.write_all(&encode_frame(true)).await.unwrap();
        assert!(next_frame(&mut peer).await);

        peer.write_all(&encode_frame(false)).await.unwrap();
        assert!(!next_frame(&mut peer).await);
        assert!(!channel.current().connected);

        server.abort();
    }

    #[tokio::test]
    async fn test_invalid_report_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.sock");
        let channel = ConnectionStatusChannel::new();

        let socket = StatusSocket::bind(&path, channel.clone()).unwrap();
        let server = tokio::spawn(socket.serve());

        let mut peer = UnixStream::connect(&path).await.unwrap();
        assert!(!next_frame(&mut peer).await);
        peer.write_all(&[0, 0, 0, 1, 9]).await.unwrap();

        // The server hangs up on the bad frame
        let closed = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut peer))
            .await
            .expect("timed out waiting for hang-up");
        assert!(closed.is_err());
        assert!(!channel.current().connected);

        server.abort();
    }

    #[tokio::test]
    async fn test_report_without_watchers_does_not_block() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.sock");
        let channel = ConnectionStatusChannel::new();
        let _socket = StatusSocket::bind(&path, channel.clone()).unwrap();

        for i in 0..100 {
            channel.report(WalletConnectionState::observed_now(i % 2 == 0));
        }
        assert!(!channel.current().connected);
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.sock");

        // Leave a socket file behind without cleanup
        let stale = std::os::unix::net::UnixListener::bind(&path).unwrap();
        drop(stale);
        assert!(path.exists());

        let socket = StatusSocket::bind(&path, ConnectionStatusChannel::new()).unwrap();
        assert_eq!(socket.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_bind_refuses_regular_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.sock");
        std::fs::write(&path, b"not a socket").unwrap();

        let result = StatusSocket::bind(&path, ConnectionStatusChannel::new());
        assert!(matches!(result, Err(SocketError::NotASocket(_))));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_socket_permissions_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.sock");
        let _socket = StatusSocket::bind(&path, ConnectionStatusChannel::new()).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_drop_removes_socket_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.sock");
        let socket = StatusSocket::bind(&path, ConnectionStatusChannel::new()).unwrap();
        drop(socket);
        assert!(!path.exists());
    }
}
