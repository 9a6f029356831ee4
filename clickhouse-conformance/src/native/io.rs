//! Primitive encodings of the native protocol: LEB128 varints and length-prefixed strings.
use std::future::Future;

use bytes::BufMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Error, Result};

/// Upper bound for a single string on the wire.
const MAX_STRING_SIZE: u64 = 1 << 30;

pub(crate) trait ClickHouseRead: AsyncRead + Unpin + Send {
    fn read_var_uint(&mut self) -> impl Future<Output = Result<u64>> + Send;

    fn read_string(&mut self) -> impl Future<Output = Result<Vec<u8>>> + Send;

    fn read_utf8_string(&mut self) -> impl Future<Output = Result<String>> + Send;
}

impl<T: AsyncRead + Unpin + Send> ClickHouseRead for T {
    async fn read_var_uint(&mut self) -> Result<u64> {
        let mut out = 0u64;
        for i in 0..10 {
            let byte = self.read_u8().await?;
            out |= u64::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(out);
            }
        }
        Err(Error::Protocol("varint exceeds 10 bytes".into()))
    }

    async fn read_string(&mut self) -> Result<Vec<u8>> {
        let len = self.read_var_uint().await?;
        if len > MAX_STRING_SIZE {
            return Err(Error::Protocol(format!("string of {len} bytes exceeds limit")));
        }
        #[expect(clippy::cast_possible_truncation)]
        let mut buf = vec![0u8; len as usize];
        let _ = self.read_exact(&mut buf).await?;
        Ok(buf)
    }

    async fn read_utf8_string(&mut self) -> Result<String> {
        Ok(String::from_utf8(self.read_string().await?)?)
    }
}

pub(crate) trait ClickHouseBytesWrite: BufMut {
    fn put_var_uint(&mut self, mut value: u64) {
        while value >= 0x80 {
            #[expect(clippy::cast_possible_truncation)]
            self.put_u8((value as u8) | 0x80);
            value >>= 7;
        }
        #[expect(clippy::cast_possible_truncation)]
        self.put_u8(value as u8);
    }

    fn put_string(&mut self, value: impl AsRef<[u8]>) {
        let value = value.as_ref();
        self.put_var_uint(value.len() as u64);
        self.put_slice(value);
    }
}

impl<T: BufMut> ClickHouseBytesWrite for T {}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[tokio::test]
    async fn test_var_uint_encoding() {
        for value in [0, 1, 127, 128, 300, 54429, u64::from(u32::MAX), u64::MAX] {
            let mut buf = Vec::new();
            buf.put_var_uint(value);
            let mut reader = Cursor::new(buf);
            assert_eq!(reader.read_var_uint().await.unwrap(), value);
        }

        let mut buf = Vec::new();
        buf.put_var_uint(300);
        assert_eq!(buf, [0xAC, 0x02]);
    }

    #[tokio::test]
    async fn test_strings() {
        let mut buf = Vec::new();
        buf.put_string("default");
        buf.put_string([0xFF, 0xFE]);
        let mut reader = Cursor::new(buf);
        assert_eq!(reader.read_utf8_string().await.unwrap(), "default");
        assert!(reader.read_utf8_string().await.is_err());
    }

    #[tokio::test]
    async fn test_truncated_input() {
        let mut reader = Cursor::new(vec![0x05, b'a']);
        let err = reader.read_string().await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
