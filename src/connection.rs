use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;
use uuid::Uuid;

use crate::codec::ReplyCodec;
use crate::config::ClientConfig;
use crate::pipeline::Pipeline;
use crate::reply::Reply;
use crate::Error;

const DEFAULT_READ_BUFFER_CAPACITY: usize = 4 * 1024;

/// One TCP connection to the server.
pub struct Connection {
    pub id: Uuid,
    // Replies are decoded as bytes arrive; a partial reply is kept by the codec between reads.
    replies: FramedRead<OwnedReadHalf, ReplyCodec>,
    writer: OwnedWriteHalf,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Connection {
        Connection::with_capacity(stream, DEFAULT_READ_BUFFER_CAPACITY)
    }

    pub fn with_capacity(stream: TcpStream, read_buffer_capacity: usize) -> Connection {
        let (reader, writer) = stream.into_split();

        Connection {
            id: Uuid::new_v4(),
            replies: FramedRead::with_capacity(reader, ReplyCodec::new(), read_buffer_capacity),
            writer,
        }
    }

    pub async fn connect(config: &ClientConfig) -> Result<Connection, Error> {
        let stream = TcpStream::connect(config.address()).await?;
        stream.set_nodelay(true)?;

        Ok(Connection::with_capacity(stream, config.read_buffer_capacity))
    }

    /// Reads the next complete reply. Returns `None` once the server closed the connection.
    pub async fn read_reply(&mut self) -> Result<Option<Reply>, Error> {
        self.replies.next().await.transpose()
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.writer.write_all(bytes).await?;
        Ok(())
    }

    /// Writes whatever the pipeline has produced.
    pub(crate) async fn flush(&mut self, pipeline: &mut Pipeline) -> Result<(), Error> {
        while let Some(bytes) = pipeline.take_output() {
            self.write_all(&bytes).await?;
        }
        Ok(())
    }
}
