//! Real serial port [`Transport`] impl, backed by `tokio-serial` the way the
//! teacher's `Printer` backs its socket.

use std::time::Duration;

use bytes::Bytes;
use printhost_rtcompat::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};

use crate::transport::{Line, Transport};

pub struct SerialTransport {
    reader: BufReader<SerialStream>,
    read_timeout: Duration,
}

impl SerialTransport {
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> std::io::Result<Self> {
        let port = tokio_serial::new(path, baud_rate).open_native_async()?;
        Ok(Self {
            reader: BufReader::new(port),
            read_timeout,
        })
    }
}

impl Transport for SerialTransport {
    async fn read_line(&mut self) -> std::io::Result<Line> {
        let mut buf = String::new();
        match tokio::time::timeout(self.read_timeout, self.reader.read_line(&mut buf)).await {
            Ok(Ok(0)) => Ok(Line::Closed),
            Ok(Ok(_)) => Ok(Line::Data(Bytes::from(
                buf.trim_end_matches(['\r', '\n']).to_string(),
            ))),
            Ok(Err(err)) => Err(err),
            Err(_) => Ok(Line::Timeout),
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.reader.get_mut().write_all(buf).await
    }

    fn set_baud_rate(&mut self, baud: u32) -> std::io::Result<()> {
        Ok(self.reader.get_mut().set_baud_rate(baud)?)
    }

    fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    fn close(&mut self) {}
}
