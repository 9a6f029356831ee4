//! Packet identifiers, revisions and the fixed-layout packets of the native protocol.
use std::fmt;

use bytes::BufMut;
use tokio::io::AsyncReadExt;

use super::io::{ClickHouseBytesWrite, ClickHouseRead};
use crate::context::{Progress, Settings};
use crate::contract::ServerVersion;
use crate::{Error, Result};

pub(crate) const DBMS_TCP_PROTOCOL_VERSION: u64 = 54429;

pub(crate) const DBMS_MIN_REVISION_WITH_SERVER_TIMEZONE: u64 = 54058;
pub(crate) const DBMS_MIN_REVISION_WITH_QUOTA_KEY_IN_CLIENT_INFO: u64 = 54060;
pub(crate) const DBMS_MIN_REVISION_WITH_SERVER_DISPLAY_NAME: u64 = 54372;
pub(crate) const DBMS_MIN_REVISION_WITH_VERSION_PATCH: u64 = 54401;
pub(crate) const DBMS_MIN_REVISION_WITH_CLIENT_WRITE_INFO: u64 = 54420;
pub(crate) const DBMS_MIN_REVISION_WITH_SETTINGS_SERIALIZED_AS_STRINGS: u64 = 54429;

pub(crate) const CLIENT_VERSION_MAJOR: u64 = 0;
pub(crate) const CLIENT_VERSION_MINOR: u64 = 1;
pub(crate) const CLIENT_VERSION_PATCH: u64 = 0;

const SETTING_FLAG_IMPORTANT: u64 = 0x01;

/// Query processing stage requested from the server.
const STAGE_COMPLETE: u64 = 2;

/// Client packet identifiers.
pub(crate) mod client {
    pub(crate) const HELLO: u64 = 0;
    pub(crate) const QUERY: u64 = 1;
    pub(crate) const DATA: u64 = 2;
    pub(crate) const CANCEL: u64 = 3;
    pub(crate) const PING: u64 = 4;
}

/// Server packet identifiers.
pub(crate) mod server {
    pub(crate) const HELLO: u64 = 0;
    pub(crate) const DATA: u64 = 1;
    pub(crate) const EXCEPTION: u64 = 2;
    pub(crate) const PROGRESS: u64 = 3;
    pub(crate) const PONG: u64 = 4;
    pub(crate) const END_OF_STREAM: u64 = 5;
    pub(crate) const PROFILE_INFO: u64 = 6;
    pub(crate) const TOTALS: u64 = 7;
    pub(crate) const EXTREMES: u64 = 8;
    pub(crate) const TABLES_STATUS: u64 = 9;
    pub(crate) const LOG: u64 = 10;
    pub(crate) const TABLE_COLUMNS: u64 = 11;
}

/// An exception packet sent by the server, including its nested causes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code:        i32,
    pub name:        String,
    pub message:     String,
    pub stack_trace: String,
    pub nested:      Option<Box<ServerError>>,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code: {}, {}: {}", self.code, self.name, self.message)?;
        if let Some(nested) = &self.nested {
            write!(f, "; caused by {nested}")?;
        }
        Ok(())
    }
}

impl ServerError {
    pub(crate) async fn read<R: ClickHouseRead>(reader: &mut R) -> Result<Self> {
        let mut chain = Vec::new();
        loop {
            let code = reader.read_i32_le().await?;
            let name = reader.read_utf8_string().await?;
            let message = reader.read_utf8_string().await?;
            let stack_trace = reader.read_utf8_string().await?;
            let has_nested = reader.read_u8().await? != 0;
            chain.push(ServerError { code, name, message, stack_trace, nested: None });
            if !has_nested {
                break;
            }
        }
        // Fold the flat chain back into nested form, innermost last.
        let mut error = chain.pop().ok_or_else(|| Error::Protocol("empty exception".into()))?;
        while let Some(mut outer) = chain.pop() {
            outer.nested = Some(Box::new(error));
            error = outer;
        }
        Ok(error)
    }
}

/// Summary sent after a query's data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ProfileInfo {
    pub(crate) rows:                         u64,
    pub(crate) blocks:                       u64,
    pub(crate) bytes:                        u64,
    pub(crate) applied_limit:                bool,
    pub(crate) rows_before_limit:            u64,
    pub(crate) calculated_rows_before_limit: bool,
}

impl ProfileInfo {
    pub(crate) async fn read<R: ClickHouseRead>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            rows:                         reader.read_var_uint().await?,
            blocks:                       reader.read_var_uint().await?,
            bytes:                        reader.read_var_uint().await?,
            applied_limit:                reader.read_u8().await? != 0,
            rows_before_limit:            reader.read_var_uint().await?,
            calculated_rows_before_limit: reader.read_u8().await? != 0,
        })
    }
}

/// Read the increments carried by a progress packet.
pub(crate) async fn read_progress<R: ClickHouseRead>(
    reader: &mut R,
    revision: u64,
) -> Result<Progress> {
    let mut progress = Progress {
        rows: reader.read_var_uint().await?,
        bytes: reader.read_var_uint().await?,
        total_rows: reader.read_var_uint().await?,
        ..Progress::default()
    };
    if revision >= DBMS_MIN_REVISION_WITH_CLIENT_WRITE_INFO {
        progress.written_rows = reader.read_var_uint().await?;
        progress.written_bytes = reader.read_var_uint().await?;
    }
    Ok(progress)
}

/// Read the body of a server hello (the packet id has been consumed).
pub(crate) async fn read_server_hello<R: ClickHouseRead>(reader: &mut R) -> Result<ServerVersion> {
    let name = reader.read_utf8_string().await?;
    let major = reader.read_var_uint().await?;
    let minor = reader.read_var_uint().await?;
    let revision = reader.read_var_uint().await?;
    if revision < DBMS_MIN_REVISION_WITH_SETTINGS_SERIALIZED_AS_STRINGS {
        return Err(Error::Protocol(format!(
            "server revision {revision} is older than the minimum supported \
             {DBMS_MIN_REVISION_WITH_SETTINGS_SERIALIZED_AS_STRINGS}"
        )));
    }
    let revision = revision.min(DBMS_TCP_PROTOCOL_VERSION);

    let timezone = if revision >= DBMS_MIN_REVISION_WITH_SERVER_TIMEZONE {
        Some(reader.read_utf8_string().await?)
    } else {
        None
    };
    let display_name = if revision >= DBMS_MIN_REVISION_WITH_SERVER_DISPLAY_NAME {
        reader.read_utf8_string().await?
    } else {
        String::new()
    };
    let patch = if revision >= DBMS_MIN_REVISION_WITH_VERSION_PATCH {
        reader.read_var_uint().await?
    } else {
        revision
    };

    Ok(ServerVersion { name, display_name, timezone, major, minor, patch, revision })
}

/// Credentials and identity sent in the client hello.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ClientHello<'a> {
    pub(crate) client_name: &'a str,
    pub(crate) database:    &'a str,
    pub(crate) username:    &'a str,
    pub(crate) password:    &'a str,
}

impl ClientHello<'_> {
    pub(crate) fn encode(&self, buf: &mut impl BufMut) {
        buf.put_var_uint(client::HELLO);
        buf.put_string(self.client_name);
        buf.put_var_uint(CLIENT_VERSION_MAJOR);
        buf.put_var_uint(CLIENT_VERSION_MINOR);
        buf.put_var_uint(DBMS_TCP_PROTOCOL_VERSION);
        buf.put_string(self.database);
        buf.put_string(self.username);
        buf.put_string(self.password);
    }
}

/// A query packet. External table data and the terminating empty block follow separately.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Query<'a> {
    pub(crate) query_id:    &'a str,
    pub(crate) client_name: &'a str,
    pub(crate) username:    &'a str,
    pub(crate) settings:    &'a Settings,
    pub(crate) compression: bool,
    pub(crate) sql:         &'a str,
}

impl Query<'_> {
    pub(crate) fn encode(&self, buf: &mut impl BufMut, revision: u64) {
        buf.put_var_uint(client::QUERY);
        buf.put_string(self.query_id);

        // Client info
        buf.put_u8(1); // initial query
        buf.put_string(self.username);
        buf.put_string(self.query_id);
        buf.put_string("0.0.0.0:0");
        buf.put_u8(1); // TCP interface
        buf.put_string(""); // os user
        buf.put_string(""); // hostname
        buf.put_string(self.client_name);
        buf.put_var_uint(CLIENT_VERSION_MAJOR);
        buf.put_var_uint(CLIENT_VERSION_MINOR);
        buf.put_var_uint(DBMS_TCP_PROTOCOL_VERSION);
        if revision >= DBMS_MIN_REVISION_WITH_QUOTA_KEY_IN_CLIENT_INFO {
            buf.put_string(""); // quota key
        }
        if revision >= DBMS_MIN_REVISION_WITH_VERSION_PATCH {
            buf.put_var_uint(CLIENT_VERSION_PATCH);
        }

        for (name, value) in self.settings.iter() {
            buf.put_string(name);
            buf.put_var_uint(SETTING_FLAG_IMPORTANT);
            buf.put_string(value.to_string());
        }
        buf.put_string(""); // end of settings

        buf.put_var_uint(STAGE_COMPLETE);
        buf.put_var_uint(u64::from(self.compression));
        buf.put_string(self.sql);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn put_exception(buf: &mut Vec<u8>, code: i32, name: &str, nested: bool) {
        buf.put_i32_le(code);
        buf.put_string(name);
        buf.put_string(format!("{name} happened"));
        buf.put_string("");
        buf.put_u8(u8::from(nested));
    }

    #[tokio::test]
    async fn test_nested_exception() {
        let mut buf = Vec::new();
        put_exception(&mut buf, 60, "DB::Exception", true);
        put_exception(&mut buf, 1000, "Poco::Exception", false);
        let error = ServerError::read(&mut Cursor::new(buf)).await.unwrap();
        assert_eq!(error.code, 60);
        let nested = error.nested.as_deref().unwrap();
        assert_eq!((nested.code, nested.name.as_str()), (1000, "Poco::Exception"));
        assert!(error.to_string().contains("caused by code: 1000"));
    }

    #[tokio::test]
    async fn test_server_hello_rejects_old_revision() {
        let mut buf = Vec::new();
        buf.put_string("ClickHouse");
        buf.put_var_uint(19);
        buf.put_var_uint(1);
        buf.put_var_uint(54_213);
        let err = read_server_hello(&mut Cursor::new(buf)).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_server_hello() {
        let mut buf = Vec::new();
        buf.put_string("ClickHouse");
        buf.put_var_uint(23);
        buf.put_var_uint(8);
        buf.put_var_uint(54_465);
        buf.put_string("UTC");
        buf.put_string("ch-1");
        buf.put_var_uint(4);
        let version = read_server_hello(&mut Cursor::new(buf)).await.unwrap();
        assert_eq!(version.to_string(), "23.8.4");
        assert_eq!(version.revision, DBMS_TCP_PROTOCOL_VERSION);
        assert_eq!(version.timezone.as_deref(), Some("UTC"));
    }

    #[test]
    fn test_query_settings_serialized_as_strings() {
        let settings = Settings::new().with("max_block_size", 3);
        let query = Query {
            query_id:    "q",
            client_name: "c",
            username:    "default",
            settings:    &settings,
            compression: true,
            sql:         "SELECT 1",
        };
        let mut buf = Vec::new();
        query.encode(&mut buf, DBMS_TCP_PROTOCOL_VERSION);
        let needle = b"\x0emax_block_size\x01\x013\x00";
        assert!(buf.windows(needle.len()).any(|w| w == needle));
        assert!(buf.ends_with(b"\x02\x01\x08SELECT 1"));
    }
}
