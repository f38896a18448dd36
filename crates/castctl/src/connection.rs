use cast_proto::protocol::{payload_len, Command, Message, MAX_FRAME_LEN};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub struct DaemonConnection {
    stream: TcpStream,
    read_buffer: Vec<u8>,
}

impl DaemonConnection {
    pub async fn connect(address: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| anyhow::anyhow!("cannot reach cast-daemon at {}: {}", address, e))?;
        Ok(Self {
            stream,
            read_buffer: Vec::with_capacity(4096),
        })
    }

    pub async fn send_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        let encoded = Message::Command(cmd).encode()?;
        self.stream.write_all(&encoded).await?;
        Ok(())
    }

    /// Next complete frame.  `None` once the daemon closes the connection.
    pub async fn receive_message(&mut self) -> anyhow::Result<Option<Message>> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(msg) = self.take_frame()? {
                return Ok(Some(msg));
            }
            match self.stream.read(&mut buf).await {
                Ok(0) => return Ok(None),
                Ok(n) => self.read_buffer.extend_from_slice(&buf[..n]),
                Err(e) => return Err(anyhow::anyhow!("Read error: {}", e)),
            }
        }
    }

    fn take_frame(&mut self) -> anyhow::Result<Option<Message>> {
        let Some(len) = payload_len(&self.read_buffer) else {
            return Ok(None);
        };
        if len > MAX_FRAME_LEN {
            anyhow::bail!("daemon announced a {} byte frame", len);
        }
        if self.read_buffer.len() < 4 + len {
            return Ok(None);
        }
        let (msg, consumed) = Message::decode(&self.read_buffer)?;
        self.read_buffer.drain(..consumed);
        Ok(Some(msg))
    }
}
