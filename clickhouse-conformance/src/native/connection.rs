//! A single native-protocol TCP connection.
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use super::block::{Block, write_block, write_empty_block};
use super::compression::{DecompressionReader, compress_frame};
use super::io::{ClickHouseBytesWrite, ClickHouseRead};
use super::protocol::{
    ClientHello, ProfileInfo, Query, ServerError, client, read_progress, read_server_hello, server,
};
use crate::config::{ClientConfig, CompressionMethod};
use crate::context::Progress;
use crate::contract::ServerVersion;
use crate::external::ExternalTable;
use crate::{Error, Result};

/// Packet traffic is logged at `debug` when the client runs in debug mode, `trace` otherwise.
macro_rules! packet_event {
    ($debug:expr, $($arg:tt)+) => {
        if $debug {
            tracing::debug!($($arg)+);
        } else {
            tracing::trace!($($arg)+);
        }
    };
}

/// A decoded server packet.
#[derive(Debug)]
pub(crate) enum Packet {
    Data(Block),
    Totals(Block),
    Extremes(Block),
    Log(Block),
    Exception(ServerError),
    Progress(Progress),
    Pong,
    EndOfStream,
    ProfileInfo(ProfileInfo),
    TableColumns,
}

impl Packet {
    fn name(&self) -> &'static str {
        match self {
            Packet::Data(_) => "Data",
            Packet::Totals(_) => "Totals",
            Packet::Extremes(_) => "Extremes",
            Packet::Log(_) => "Log",
            Packet::Exception(_) => "Exception",
            Packet::Progress(_) => "Progress",
            Packet::Pong => "Pong",
            Packet::EndOfStream => "EndOfStream",
            Packet::ProfileInfo(_) => "ProfileInfo",
            Packet::TableColumns => "TableColumns",
        }
    }
}

pub(crate) struct Connection {
    reader:      BufReader<OwnedReadHalf>,
    writer:      BufWriter<OwnedWriteHalf>,
    address:     String,
    server:      ServerVersion,
    compression: CompressionMethod,
    debug:       bool,
    /// Set while a request awaits its final packet. A connection dropped in this state has
    /// unread data on the wire and must not be reused.
    in_flight:   bool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("revision", &self.server.revision)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Dial `address` and complete the handshake, both bounded by the dial timeout.
    pub(crate) async fn connect(address: &str, config: &ClientConfig) -> Result<Self> {
        let stream = tokio::time::timeout(config.dial_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| Error::Connect(format!("dial {address}: timed out")))?
            .map_err(|e| Error::Connect(format!("dial {address}: {e}")))?;
        stream.set_nodelay(true)?;
        if let Some(keepalive) = config.tcp_keepalive {
            SockRef::from(&stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(keepalive))?;
        }

        let (read, write) = stream.into_split();
        let mut conn = Self {
            reader:      BufReader::new(read),
            writer:      BufWriter::new(write),
            address:     address.to_string(),
            server:      ServerVersion::default(),
            compression: config.compression_method(),
            debug:       config.debug,
            in_flight:   false,
        };
        tokio::time::timeout(config.dial_timeout, conn.handshake(config))
            .await
            .map_err(|_| Error::Connect(format!("handshake with {address}: timed out")))??;
        Ok(conn)
    }

    async fn handshake(&mut self, config: &ClientConfig) -> Result<()> {
        let mut buf = BytesMut::new();
        ClientHello {
            client_name: &config.client_name,
            database:    &config.auth.database,
            username:    &config.auth.username,
            password:    &config.auth.password,
        }
        .encode(&mut buf);
        self.send(buf).await?;

        match self.reader.read_var_uint().await? {
            server::HELLO => {
                self.server = read_server_hello(&mut self.reader).await?;
                packet_event!(
                    self.debug,
                    address = %self.address,
                    server = %self.server,
                    revision = self.server.revision,
                    "handshake complete"
                );
                Ok(())
            }
            server::EXCEPTION => Err(Error::Server(ServerError::read(&mut self.reader).await?)),
            id => Err(Error::Protocol(format!("unexpected packet {id} during handshake"))),
        }
    }

    pub(crate) fn server_version(&self) -> &ServerVersion { &self.server }

    pub(crate) fn address(&self) -> &str { &self.address }

    pub(crate) fn is_broken(&self) -> bool { self.in_flight }

    pub(crate) fn compression(&self) -> CompressionMethod { self.compression }

    pub(crate) async fn ping(&mut self) -> Result<()> {
        self.in_flight = true;
        let mut buf = BytesMut::with_capacity(1);
        buf.put_var_uint(client::PING);
        self.send(buf).await?;
        loop {
            match self.read_packet().await? {
                Packet::Pong => {
                    self.in_flight = false;
                    return Ok(());
                }
                Packet::Progress(_) => {}
                packet => {
                    return Err(Error::Protocol(format!(
                        "unexpected {} packet in reply to ping",
                        packet.name()
                    )));
                }
            }
        }
    }

    /// Send a query followed by its external tables and the terminating empty block.
    pub(crate) async fn send_query(
        &mut self,
        query: &Query<'_>,
        external_tables: &[Arc<ExternalTable>],
    ) -> Result<()> {
        self.in_flight = true;
        let mut buf = BytesMut::new();
        query.encode(&mut buf, self.server.revision);
        for table in external_tables {
            self.encode_data(&mut buf, table.name(), |out| {
                write_block(
                    out,
                    table.len(),
                    table.data().iter().map(|c| (c.name.as_str(), &c.ty, c.values.as_slice())),
                )
            })?;
        }
        self.encode_data(&mut buf, "", |out| {
            write_empty_block(out);
            Ok(())
        })?;
        packet_event!(
            self.debug,
            query_id = query.query_id,
            external_tables = external_tables.len(),
            bytes = buf.len(),
            "sending query"
        );
        self.send(buf).await
    }

    /// Send the empty data block that ends an INSERT's data stream.
    pub(crate) async fn send_end_of_data(&mut self) -> Result<()> {
        let mut buf = BytesMut::new();
        self.encode_data(&mut buf, "", |out| {
            write_empty_block(out);
            Ok(())
        })?;
        packet_event!(self.debug, "sending end of insert data");
        self.send(buf).await
    }

    pub(crate) async fn send_cancel(&mut self) -> Result<()> {
        let mut buf = BytesMut::with_capacity(1);
        buf.put_var_uint(client::CANCEL);
        packet_event!(self.debug, "sending cancel");
        self.send(buf).await
    }

    fn encode_data(
        &self,
        buf: &mut BytesMut,
        table: &str,
        encode: impl FnOnce(&mut Vec<u8>) -> Result<()>,
    ) -> Result<()> {
        buf.put_var_uint(client::DATA);
        buf.put_string(table);
        let mut raw = Vec::new();
        encode(&mut raw)?;
        if self.compression == CompressionMethod::None {
            buf.put_slice(&raw);
            Ok(())
        } else {
            compress_frame(buf, &raw, self.compression)
        }
    }

    async fn send(&mut self, buf: BytesMut) -> Result<()> {
        self.writer.write_all(&buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Read the next server packet. `EndOfStream` and `Exception` end the current request.
    pub(crate) async fn read_packet(&mut self) -> Result<Packet> {
        let id = self.reader.read_var_uint().await?;
        let packet = match id {
            server::DATA => Packet::Data(self.read_data_block().await?),
            server::TOTALS => Packet::Totals(self.read_data_block().await?),
            server::EXTREMES => Packet::Extremes(self.read_data_block().await?),
            server::LOG => {
                // Log blocks are never compressed.
                drop(self.reader.read_string().await?);
                Packet::Log(Block::read(&mut self.reader).await?)
            }
            server::EXCEPTION => Packet::Exception(ServerError::read(&mut self.reader).await?),
            server::PROGRESS => {
                Packet::Progress(read_progress(&mut self.reader, self.server.revision).await?)
            }
            server::PONG => Packet::Pong,
            server::END_OF_STREAM => Packet::EndOfStream,
            server::PROFILE_INFO => Packet::ProfileInfo(ProfileInfo::read(&mut self.reader).await?),
            server::TABLE_COLUMNS => {
                drop(self.reader.read_string().await?);
                drop(self.reader.read_string().await?);
                Packet::TableColumns
            }
            server::HELLO | server::TABLES_STATUS => {
                return Err(Error::Protocol(format!("unexpected server packet {id}")));
            }
            id => return Err(Error::Protocol(format!("unknown server packet {id}"))),
        };

        if matches!(packet, Packet::EndOfStream | Packet::Exception(_)) {
            self.in_flight = false;
        }
        match &packet {
            Packet::Data(block) | Packet::Totals(block) | Packet::Extremes(block) => {
                packet_event!(
                    self.debug,
                    packet = packet.name(),
                    columns = block.names.len(),
                    rows = block.rows,
                    "received packet"
                );
            }
            Packet::Log(block) => {
                for index in 0..block.rows {
                    packet_event!(self.debug, row = ?block.row(index), "server log");
                }
            }
            Packet::Exception(error) => {
                packet_event!(self.debug, %error, "received exception");
            }
            Packet::ProfileInfo(info) => {
                packet_event!(
                    self.debug,
                    rows = info.rows,
                    blocks = info.blocks,
                    bytes = info.bytes,
                    applied_limit = info.applied_limit,
                    rows_before_limit = info.rows_before_limit,
                    calculated_rows_before_limit = info.calculated_rows_before_limit,
                    "received profile info"
                );
            }
            packet => packet_event!(self.debug, packet = packet.name(), "received packet"),
        }
        Ok(packet)
    }

    async fn read_data_block(&mut self) -> Result<Block> {
        drop(self.reader.read_string().await?);
        if self.compression == CompressionMethod::None {
            Block::read(&mut self.reader).await
        } else {
            let mut reader = DecompressionReader::new(&mut self.reader).await?;
            Block::read(&mut reader).await
        }
    }
}
