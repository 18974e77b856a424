//! Client-side connection owner.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::sink::PresentationSink;
use super::ClientConfig;
use crate::connection;
use crate::error::{Error, ErrorClass, Result};
use crate::model::{FileChunk, Identity, Message, MessageBody, TransferKey};
use crate::protocol::{
    encode_payload, write_frame, Frame, FrameReader, MAX_MESSAGE_SIZE, MAX_PAYLOAD_SIZE,
};
use crate::transfer::{download_path, ChunkSequencer, Reassembler};

/// Most messages written in one `message` frame.
pub const MAX_BATCH_MESSAGES: usize = 16;

/// Queue depth above which file senders wait before adding more chunks.
pub const OUTBOUND_HIGH_WATER: usize = 8;

/// Lifecycle of a [`Backend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    /// Created, not started
    Idle,
    /// Connecting and waiting for identity and roster
    Connecting,
    /// Relaying
    Online,
    /// Saying goodbye
    ShuttingDown,
    /// Done; the network task has ended
    Stopped,
}

/// Owns the connection to the relay.
///
/// Sending never blocks: messages go onto a queue that the network task
/// drains and writes as batches. Everything that arrives, and everything
/// that was sent, passes through the same receive path before reaching the
/// [`PresentationSink`].
pub struct Backend {
    config: ClientConfig,
    started: AtomicBool,
    sink: OnceLock<Arc<dyn PresentationSink>>,
    state: watch::Sender<BackendState>,
    outbound_tx: mpsc::UnboundedSender<Message>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    queued: AtomicUsize,
    drained: Notify,
    identity: Mutex<Option<Identity>>,
    pending_name: Mutex<Option<String>>,
    roster: Mutex<HashMap<String, Identity>>,
    shared: Mutex<HashMap<String, PathBuf>>,
    downloads: tokio::sync::Mutex<HashMap<TransferKey, Reassembler<tokio::fs::File>>>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("server", &self.config.server)
            .field("state", &self.state())
            .field("queued", &self.queued.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Backend {
    /// Create a backend. Nothing happens on the network until [`Backend::start`].
    #[must_use]
    pub fn new(config: ClientConfig) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(BackendState::Idle);
        let pending_name = config.display_name.clone();

        Arc::new(Self {
            config,
            started: AtomicBool::new(false),
            sink: OnceLock::new(),
            state,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            queued: AtomicUsize::new(0),
            drained: Notify::new(),
            identity: Mutex::new(None),
            pending_name: Mutex::new(pending_name),
            roster: Mutex::new(HashMap::new()),
            shared: Mutex::new(HashMap::new()),
            downloads: tokio::sync::Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    /// Attach the presentation layer. Only the first call has any effect.
    pub fn bind_sink(&self, sink: Arc<dyn PresentationSink>) -> bool {
        self.sink.set(sink).is_ok()
    }

    /// Spawn the network task. Returns `false` if it was already started.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.started.swap(true, Ordering::AcqRel) {
            return false;
        }
        let Some(outbound) = lock(&self.outbound_rx).take() else {
            return false;
        };

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run(outbound).await });
        *lock(&self.task) = Some(handle);
        true
    }

    /// Ask the network task to say goodbye and stop.
    pub fn stop(&self) {
        if !self.started.swap(true, Ordering::AcqRel) {
            self.state.send_replace(BackendState::Stopped);
        }
        self.shutdown.cancel();
    }

    /// Wait for the network task to end.
    pub async fn wait(&self) {
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("Backend task failed: {}", e);
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BackendState {
        *self.state.borrow()
    }

    /// Observe lifecycle changes.
    pub fn subscribe_state(&self) -> watch::Receiver<BackendState> {
        self.state.subscribe()
    }

    /// Wait until the backend reaches `target` or stops, and return the
    /// state it ended up in.
    pub async fn wait_for_state(&self, target: BackendState) -> BackendState {
        let mut rx = self.state.subscribe();
        let result = rx
            .wait_for(|s| *s == target || *s == BackendState::Stopped)
            .await
            .map(|s| *s);
        result.unwrap_or(BackendState::Stopped)
    }

    /// Our identity as assigned by the relay, once known.
    pub fn identity(&self) -> Option<Identity> {
        lock(&self.identity).clone()
    }

    /// Everyone known to be online, ourselves included.
    pub fn roster(&self) -> HashMap<String, Identity> {
        lock(&self.roster).clone()
    }

    /// Messages queued but not yet written.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    fn set_state(&self, state: BackendState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("Backend {:?} -> {:?}", previous, state);
        }
    }

    fn notify(&self, f: impl FnOnce(&dyn PresentationSink)) {
        if let Some(sink) = self.sink.get() {
            f(sink.as_ref());
        }
    }

    /// Sender used for locally built messages; replaced by the real
    /// identity when the message is written.
    fn sender(&self) -> Identity {
        self.identity().unwrap_or_else(|| Identity::new(""))
    }

    /// Queue a message.
    ///
    /// Returns `false` once the network task has ended, or when the encoded
    /// message is over [`MAX_MESSAGE_SIZE`] and could never be written.
    pub fn send(&self, message: Message) -> bool {
        match encoded_len(&message) {
            Ok(size) if size <= MAX_MESSAGE_SIZE => {}
            Ok(size) => {
                tracing::warn!("Not sending {} message of {} bytes: too large", message.kind(), size);
                return false;
            }
            Err(e) => {
                tracing::warn!("Not sending {} message: {}", message.kind(), e);
                return false;
            }
        }

        self.queued.fetch_add(1, Ordering::AcqRel);
        if self.outbound_tx.send(message).is_err() {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Broadcast a text message.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Message::text(self.sender(), text))
    }

    /// Send a text message to specific peers.
    pub fn send_text_to(&self, text: impl Into<String>, recipients: Vec<Identity>) -> bool {
        self.send(Message::text(self.sender(), text).with_recipients(recipients))
    }

    /// Send an image; an empty recipient list broadcasts it.
    pub fn send_image(
        &self,
        data: Vec<u8>,
        caption: Option<String>,
        recipients: Vec<Identity>,
    ) -> bool {
        self.send(Message::image(self.sender(), data, caption).with_recipients(recipients))
    }

    /// Broadcast an audio clip.
    pub fn send_audio(&self, data: Vec<u8>) -> bool {
        self.send(Message::audio(self.sender(), data))
    }

    /// Offer a file to peers; an empty recipient list offers it to everyone.
    ///
    /// Returns the announcement that was queued.
    ///
    /// # Errors
    ///
    /// Returns `Error::FileNotFound` if `path` is not a readable file.
    pub async fn share_file(
        &self,
        path: impl AsRef<Path>,
        recipients: Vec<Identity>,
    ) -> Result<Message> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|_| Error::FileNotFound(path.display().to_string()))?;
        if !metadata.is_file() {
            return Err(Error::FileNotFound(path.display().to_string()));
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidInput(format!("not a file: {}", path.display())))?;

        lock(&self.shared).insert(file_name.clone(), path.to_path_buf());
        tracing::info!("Sharing {} ({} bytes)", file_name, metadata.len());

        let announcement = Message::file_announcement(self.sender(), file_name, metadata.len())
            .with_recipients(recipients);
        self.send(announcement.clone());
        Ok(announcement)
    }

    /// Names of the files we currently share.
    pub fn shared_files(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.shared).keys().cloned().collect();
        names.sort();
        names
    }

    /// Download the file offered by `announcement`.
    ///
    /// The file is written to `destination`, or into the configured
    /// download directory. Returns `false` if that transfer is already in
    /// progress.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for anything but a file announcement,
    /// `Error::NotConnected` before the handshake, or the I/O error of
    /// creating the destination file.
    pub async fn request_file(
        &self,
        announcement: &Message,
        destination: Option<PathBuf>,
    ) -> Result<bool> {
        let MessageBody::FileAnnouncement { file_name, .. } = &announcement.body else {
            return Err(Error::InvalidInput(format!(
                "cannot download from a {} message",
                announcement.kind()
            )));
        };
        self.request_file_from(&announcement.sender, file_name, destination)
            .await
    }

    /// Download `file_name` from `owner` without holding its announcement.
    ///
    /// # Errors
    ///
    /// See [`Backend::request_file`].
    pub async fn request_file_from(
        &self,
        owner: &Identity,
        file_name: &str,
        destination: Option<PathBuf>,
    ) -> Result<bool> {
        self.request_file_range(owner, file_name, 0, 0, destination)
            .await
    }

    /// Download the bytes `start..end` of `file_name` from `owner`.
    ///
    /// `0, 0` asks for the whole file. The owner clamps the range to the file
    /// length, and the destination holds exactly the bytes sent.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if `start` is past `end`, otherwise the
    /// errors of [`Backend::request_file`].
    pub async fn request_file_range(
        &self,
        owner: &Identity,
        file_name: &str,
        start: u64,
        end: u64,
        destination: Option<PathBuf>,
    ) -> Result<bool> {
        if start > end {
            return Err(Error::InvalidInput(format!(
                "range start {start} is past its end {end}"
            )));
        }
        let me = self.identity().ok_or(Error::NotConnected)?;
        let key = TransferKey::new(owner.id(), file_name);

        let mut downloads = self.downloads.lock().await;
        if downloads.contains_key(&key) {
            return Ok(false);
        }

        let path = match destination {
            Some(path) => path,
            None => download_path(&self.config.download_dir, file_name).ok_or_else(|| {
                Error::InvalidInput(format!("unusable file name '{file_name}'"))
            })?,
        };
        let reassembler = Reassembler::create(&path, key.clone()).await?;
        downloads.insert(key, reassembler);
        drop(downloads);

        if start == 0 && end == 0 {
            tracing::info!("Requesting {} from {} into {}", file_name, owner, path.display());
        } else {
            tracing::info!(
                "Requesting bytes {}..{} of {} from {} into {}",
                start,
                end,
                file_name,
                owner,
                path.display()
            );
        }
        self.send(Message::file_range_request(
            me,
            owner.clone(),
            file_name,
            start,
            end,
        ));
        Ok(true)
    }

    /// Whether the given transfer is still being received.
    pub async fn is_downloading(&self, key: &TransferKey) -> bool {
        self.downloads.lock().await.contains_key(key)
    }

    /// Change our display name.
    ///
    /// Before the relay has told us who we are, the name is kept and applied
    /// right after the handshake. With `announce`, peers also get a chat
    /// line about the change.
    pub fn change_name(&self, name: impl Into<String>, announce: bool) {
        let name = name.into();

        let (me, old) = {
            let mut identity = lock(&self.identity);
            let Some(me) = identity.as_mut() else {
                *lock(&self.pending_name) = Some(name);
                return;
            };
            let old = me.label().to_string();
            if !me.set_name(name.as_str()) {
                return;
            }
            me.name_change_processed();
            (me.clone(), old)
        };

        lock(&self.roster).insert(me.id().to_string(), me.clone());
        self.notify(|sink| sink.on_peer_added(&me));

        if announce {
            let text = format!("{old} has changed their name to {}", me.name());
            self.send(Message::text(me, text));
        } else {
            self.send(Message::name_update(me));
        }
    }

    async fn run(self: Arc<Self>, mut outbound: mpsc::UnboundedReceiver<Message>) {
        self.set_state(BackendState::Connecting);

        match self.connect_and_serve(&mut outbound).await {
            Ok(()) => tracing::info!("Disconnected from relay"),
            Err(e) => tracing::warn!("Relay connection ended: {}", e),
        }

        outbound.close();
        self.shutdown.cancel();
        let abandoned = {
            let mut downloads = self.downloads.lock().await;
            let count = downloads.len();
            downloads.clear();
            count
        };
        if abandoned > 0 {
            tracing::warn!("{} download(s) left incomplete", abandoned);
        }

        self.set_state(BackendState::Stopped);
    }

    async fn connect_and_serve(
        self: &Arc<Self>,
        outbound: &mut mpsc::UnboundedReceiver<Message>,
    ) -> Result<()> {
        let stream = tokio::select! {
            () = self.shutdown.cancelled() => return Ok(()),
            stream = self.open_stream() => stream?,
        };
        let (read_half, mut writer) = stream.into_split();
        let mut reader = FrameReader::new(read_half);

        let handshake = tokio::select! {
            () = self.shutdown.cancelled() => Ok(()),
            result = self.handshake(&mut reader) => result.map(|()| {
                self.set_state(BackendState::Online);
            }),
        };

        let result = match handshake {
            Ok(()) if self.state() == BackendState::Online => {
                self.serve(&mut reader, &mut writer, outbound).await
            }
            other => other,
        };

        self.set_state(BackendState::ShuttingDown);
        if self.shutdown.is_cancelled() {
            if let Err(e) = write_frame(&mut writer, &Frame::Disconnect).await {
                tracing::debug!("Could not send disconnect: {}", e);
            }
        }
        if let Err(e) = writer.shutdown().await {
            tracing::debug!("Shutdown of closed socket: {}", e);
        }

        result
    }

    async fn open_stream(&self) -> Result<tokio::net::TcpStream> {
        let addr = connection::resolve_host(&self.config.server).await?;
        tracing::info!("Connecting to relay at {}", addr);
        connection::connect(addr, self.config.connect_timeout).await
    }

    async fn handshake(&self, reader: &mut FrameReader<OwnedReadHalf>) -> Result<()> {
        let limit = self.config.handshake_timeout;

        let me = match next_significant(reader, limit).await? {
            Frame::Identity(identity) => identity,
            other => {
                return Err(Error::UnexpectedFrame {
                    expected: "identity".to_string(),
                    actual: other.name().to_string(),
                })
            }
        };
        let roster = match next_significant(reader, limit).await? {
            Frame::Roster(roster) => roster,
            other => {
                return Err(Error::UnexpectedFrame {
                    expected: "roster".to_string(),
                    actual: other.name().to_string(),
                })
            }
        };

        let (me, renamed) = self.adopt_identity(me);
        tracing::info!("Joined relay as {} with {} peer(s) online", me, roster.len());

        let snapshot = {
            let mut current = lock(&self.roster);
            current.clear();
            current.extend(roster.into_iter().filter(|(id, _)| id != me.id()));
            let latest = self.identity().unwrap_or_else(|| me.clone());
            current.insert(latest.id().to_string(), latest);
            current.clone()
        };
        self.notify(|sink| sink.on_roster_changed(&snapshot));

        if renamed {
            self.send(Message::name_update(me));
        }
        Ok(())
    }

    /// Publish the identity the relay assigned, with any pending name applied.
    ///
    /// Both locks are held in the order `change_name` takes them, so a rename
    /// lands either in the pending slot before this runs or on the published
    /// identity after it. Returns the identity and whether a name was applied.
    fn adopt_identity(&self, mut me: Identity) -> (Identity, bool) {
        let mut identity = lock(&self.identity);
        let pending = lock(&self.pending_name).take();
        let renamed = pending.is_some();
        if let Some(name) = pending {
            me.set_name(name.as_str());
            me.name_change_processed();
        }
        *identity = Some(me.clone());
        (me, renamed)
    }

    async fn serve(
        self: &Arc<Self>,
        reader: &mut FrameReader<OwnedReadHalf>,
        writer: &mut OwnedWriteHalf,
        outbound: &mut mpsc::UnboundedReceiver<Message>,
    ) -> Result<()> {
        let poll = self.config.poll_interval;

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return Ok(()),

                result = reader.next_frame_with_timeout(poll) => match result {
                    Ok(Frame::Disconnect) => {
                        tracing::info!("Relay closed the session");
                        return Ok(());
                    }
                    Ok(frame) => self.handle_frame(frame).await,
                    Err(e) => match e.class() {
                        ErrorClass::Fatal => return Err(e),
                        ErrorClass::Transient => {}
                        _ => tracing::debug!("Ignoring bad frame: {}", e),
                    },
                },

                Some(first) = outbound.recv() => {
                    self.flush_outbound(first, outbound, writer).await?;
                }
            }
        }
    }

    /// Drain up to [`MAX_BATCH_MESSAGES`] queued messages and write them.
    ///
    /// A batch whose payload would pass [`MAX_PAYLOAD_SIZE`] is split over
    /// several frames. A message too large for any frame is dropped.
    async fn flush_outbound(
        self: &Arc<Self>,
        first: Message,
        outbound: &mut mpsc::UnboundedReceiver<Message>,
        writer: &mut OwnedWriteHalf,
    ) -> Result<()> {
        let mut pending = vec![first];
        while pending.len() < MAX_BATCH_MESSAGES {
            match outbound.try_recv() {
                Ok(message) => pending.push(message),
                Err(_) => break,
            }
        }
        self.queued.fetch_sub(pending.len(), Ordering::AcqRel);
        self.drained.notify_waiters();

        let me = self.identity().ok_or(Error::NotConnected)?;
        let mut batch = Vec::new();
        // "[" and "]"; every message adds its own length plus a comma.
        let mut batch_bytes = 2;

        for mut message in pending {
            message.sender = me.clone();
            let size = match encoded_len(&message) {
                Ok(size) if size + 2 <= MAX_PAYLOAD_SIZE => size,
                Ok(size) => {
                    tracing::warn!("Dropping {} message of {} bytes: too large", message.kind(), size);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Dropping {} message: {}", message.kind(), e);
                    continue;
                }
            };

            if !batch.is_empty() && batch_bytes + size + 1 > MAX_PAYLOAD_SIZE {
                self.write_batch(std::mem::take(&mut batch), writer).await?;
                batch_bytes = 2;
            }
            batch_bytes += size + 1;
            batch.push(message);
        }

        if !batch.is_empty() {
            self.write_batch(batch, writer).await?;
        }
        Ok(())
    }

    async fn write_batch(
        self: &Arc<Self>,
        batch: Vec<Message>,
        writer: &mut OwnedWriteHalf,
    ) -> Result<()> {
        write_frame(writer, &Frame::Messages(batch.clone())).await?;
        tracing::debug!("Sent batch of {} message(s)", batch.len());

        for message in batch {
            self.receive_message(message).await;
        }
        Ok(())
    }

    async fn handle_frame(self: &Arc<Self>, frame: Frame) {
        match frame {
            Frame::Messages(batch) => {
                for message in batch {
                    self.receive_message(message).await;
                }
            }
            Frame::ClientConnect(peer) => {
                if self.is_me(&peer) {
                    return;
                }
                lock(&self.roster).insert(peer.id().to_string(), peer.clone());
                tracing::debug!("Peer joined: {}", peer);
                self.notify(|sink| sink.on_peer_added(&peer));
            }
            Frame::ClientDisconnect(peer) => {
                let removed = lock(&self.roster).remove(peer.id());
                tracing::debug!("Peer left: {}", peer);
                let peer = removed.unwrap_or(peer);
                self.notify(|sink| sink.on_peer_removed(&peer));
            }
            Frame::Roster(roster) => {
                let snapshot = {
                    let mut current = lock(&self.roster);
                    current.extend(roster);
                    current.clone()
                };
                self.notify(|sink| sink.on_roster_changed(&snapshot));
            }
            Frame::None => {}
            other => {
                tracing::debug!("Ignoring {} frame from relay", other.name());
            }
        }
    }

    fn is_me(&self, identity: &Identity) -> bool {
        lock(&self.identity).as_ref() == Some(identity)
    }

    /// Apply one incoming or echoed message.
    async fn receive_message(self: &Arc<Self>, message: Message) {
        let from_self = self.is_me(&message.sender);
        if !from_self {
            self.note_sender(&message.sender);
        }

        match message.body {
            MessageBody::FileChunk(chunk) => {
                if !from_self {
                    self.accept_chunk(&message.sender, chunk).await;
                }
                return;
            }
            MessageBody::FileRequest {
                ref file_name,
                range_start,
                range_end,
            } if !from_self => {
                let requester = message.sender.clone();
                if let Err(e) = self.serve_request(requester, file_name, range_start, range_end) {
                    tracing::debug!("Ignoring request from {}: {}", message.sender, e);
                }
            }
            _ => {}
        }

        if message.should_display() {
            self.notify(|sink| sink.on_message_received(&message));
        }
    }

    /// Add unknown senders to the roster and pick up renames.
    fn note_sender(&self, sender: &Identity) {
        let changed = {
            let mut roster = lock(&self.roster);
            match roster.get_mut(sender.id()) {
                Some(known) if known.name() == sender.name() => false,
                Some(known) => {
                    known.set_name(sender.name());
                    known.name_change_processed();
                    true
                }
                None => {
                    roster.insert(sender.id().to_string(), sender.clone());
                    true
                }
            }
        };

        if changed {
            self.notify(|sink| sink.on_peer_added(sender));
        }
    }

    async fn accept_chunk(&self, sender: &Identity, chunk: FileChunk) {
        let key = TransferKey::new(sender.id(), &chunk.file_name);
        let mut downloads = self.downloads.lock().await;

        let Some(reassembler) = downloads.get_mut(&key) else {
            tracing::debug!("Chunk for unrequested transfer {}", key);
            return;
        };
        reassembler.accept_chunk(chunk).await;
        if !reassembler.is_closed() {
            return;
        }

        let bytes = reassembler.written_bytes();
        downloads.remove(&key);
        drop(downloads);

        tracing::info!("Received {} ({} bytes)", key.file_name, bytes);
        self.notify(|sink| sink.on_transfer_complete(&key, bytes));
    }

    /// Start streaming a shared file to `requester` on its own task.
    fn serve_request(
        self: &Arc<Self>,
        requester: Identity,
        file_name: &str,
        start: u64,
        end: u64,
    ) -> Result<()> {
        let path = lock(&self.shared)
            .get(file_name)
            .cloned()
            .ok_or_else(|| Error::NotShared(file_name.to_string()))?;

        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.send_file(&requester, &path, start, end).await {
                Ok(bytes) => {
                    tracing::info!("Sent {} bytes of {} to {}", bytes, path.display(), requester);
                }
                Err(e) => {
                    tracing::warn!("Sending {} to {} failed: {}", path.display(), requester, e);
                }
            }
        });
        Ok(())
    }

    async fn send_file(
        &self,
        requester: &Identity,
        path: &Path,
        start: u64,
        end: u64,
    ) -> Result<u64> {
        let mut sequencer = ChunkSequencer::open_range(
            path,
            start,
            end,
            self.config.chunk_size,
            self.config.min_chunk_size,
        )
        .await?;

        while let Some(chunk) = sequencer.next_chunk().await? {
            if !self.wait_for_room().await {
                return Err(Error::ConnectionClosed);
            }
            if !self.send(Message::file_chunk(self.sender(), requester.clone(), chunk)) {
                return Err(Error::ConnectionClosed);
            }
        }

        Ok(sequencer.bytes_sent())
    }

    /// Wait until the outbound queue is short enough. `false` on shutdown.
    async fn wait_for_room(&self) -> bool {
        while self.queued() > OUTBOUND_HIGH_WATER {
            tokio::select! {
                () = self.shutdown.cancelled() => return false,
                () = self.drained.notified() => {}
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        !self.shutdown.is_cancelled()
    }
}

fn encoded_len(message: &Message) -> Result<usize> {
    encode_payload(message).map(|bytes| bytes.len())
}

/// Next frame that is not a keep-alive.
async fn next_significant(
    reader: &mut FrameReader<OwnedReadHalf>,
    limit: std::time::Duration,
) -> Result<Frame> {
    loop {
        match reader.next_frame_with_timeout(limit).await? {
            Frame::None => {}
            frame => return Ok(frame),
        }
    }
}
