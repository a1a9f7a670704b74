use crate::channel::{Channel, ChannelEventSink, ChildEndpoint, Message};
use crate::process::ExitSignal;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

/// Longest line accepted from a child
pub const MAX_MESSAGE_LEN: usize = 1 << 20;

/// Newline-delimited UTF-8 framing for [`Message`]s
pub struct MessageCodec {
    lines: LinesCodec,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_MESSAGE_LEN),
        }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = LinesCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.lines.decode(src)?.map(Message::new))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.lines.decode_eof(src)?.map(Message::new))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = LinesCodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.body().contains('\n') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "message body contains a newline",
            )
            .into());
        }
        self.lines.encode(item.body(), dst)
    }
}

/// [`Channel`] over the child's stdin/stdout.
///
/// Messages sent before the child is attached are queued and flushed once the
/// pipes are available. End of stdout, a decode failure or a write failure
/// raises exactly one channel error. A child launched without a stdout pipe
/// raises it when it exits.
pub struct StdioChannel {
    sink: ChannelEventSink,
    outgoing: Option<mpsc::UnboundedSender<Message>>,
    pending: Option<mpsc::UnboundedReceiver<Message>>,
    errored: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl StdioChannel {
    pub fn new(sink: ChannelEventSink) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sink,
            outgoing: Some(tx),
            pending: Some(rx),
            errored: Arc::new(AtomicBool::new(false)),
            tasks: Vec::new(),
        }
    }

    /// Start pumping arbitrary streams; `attach` uses this with the child's pipes
    pub fn start<R, W>(&mut self, reader: Option<R>, writer: Option<W>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        if let Some(reader) = reader {
            self.tasks.push(tokio::spawn(read_messages(
                reader,
                self.sink.clone(),
                self.errored.clone(),
            )));
        } else {
            debug!(child = %self.sink.child(), "No stdout pipe, child messages will not be read");
        }

        match (writer, self.pending.take()) {
            (Some(writer), Some(pending)) => {
                self.tasks.push(tokio::spawn(write_messages(
                    writer,
                    pending,
                    self.sink.clone(),
                    self.errored.clone(),
                )));
            }
            (None, _) => {
                warn!(child = %self.sink.child(), "No stdin pipe, outgoing messages will be dropped");
                self.outgoing = None;
            }
            (Some(_), None) => {
                warn!(child = %self.sink.child(), "Stdio channel already started");
            }
        }
    }

    fn raise_on_exit(&mut self, exited: Option<ExitSignal>) {
        let Some(exited) = exited else {
            warn!(child = %self.sink.child(), "No stdout pipe and no exit signal, disconnect cannot be observed");
            return;
        };

        let sink = self.sink.clone();
        let errored = self.errored.clone();
        self.tasks.push(tokio::spawn(async move {
            exited.await;
            debug!(child = %sink.child(), "Child without stdout pipe exited");
            raise_error(&errored, &sink);
        }));
    }
}

impl Channel for StdioChannel {
    fn send(&mut self, message: Message) -> bool {
        if self.errored.load(Ordering::SeqCst) {
            return false;
        }
        match &self.outgoing {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    fn attach(&mut self, endpoint: ChildEndpoint) {
        // Connected must be queued before any message the reader posts.
        self.sink.connected(endpoint.pid);

        let stdio = endpoint.stdio.unwrap_or_default();
        if stdio.stdout.is_none() {
            self.raise_on_exit(endpoint.exited);
        }
        self.start(stdio.stdout, stdio.stdin);
    }

    fn force_shutdown(&mut self) {
        debug!(child = %self.sink.child(), "Force shutdown of stdio channel");
        self.outgoing = None;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        raise_error(&self.errored, &self.sink);
    }
}

impl Drop for StdioChannel {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

fn raise_error(errored: &AtomicBool, sink: &ChannelEventSink) {
    if !errored.swap(true, Ordering::SeqCst) {
        sink.channel_error();
    }
}

async fn read_messages<R: AsyncRead + Unpin>(
    reader: R,
    sink: ChannelEventSink,
    errored: Arc<AtomicBool>,
) {
    let mut frames = FramedRead::new(reader, MessageCodec::new());
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(message) => sink.message_received(message),
            Err(e) => {
                warn!(child = %sink.child(), error = %e, "Failed to decode message from child");
                break;
            }
        }
    }

    debug!(child = %sink.child(), "Child stdout closed");
    raise_error(&errored, &sink);
}

async fn write_messages<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut pending: mpsc::UnboundedReceiver<Message>,
    sink: ChannelEventSink,
    errored: Arc<AtomicBool>,
) {
    let mut codec = MessageCodec::new();
    let mut buf = BytesMut::new();

    while let Some(message) = pending.recv().await {
        buf.clear();
        if let Err(e) = codec.encode(message, &mut buf) {
            warn!(child = %sink.child(), error = %e, "Dropping message that cannot be framed");
            continue;
        }

        let written = async {
            writer.write_all(&buf).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            warn!(child = %sink.child(), error = %e, "Failed to write message to child");
            raise_error(&errored, &sink);
            return;
        }
    }
}
