//! Decoding of compressed upstream response bodies.
//!
//! Upstream bodies are always stored and served decompressed, so the
//! `Content-Encoding` of the origin response is undone here.

use async_compression::tokio::bufread::{DeflateDecoder, GzipDecoder, ZlibDecoder};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Content encodings understood by [`decode_body`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Gzip,
    Deflate,
}

impl ContentEncoding {
    /// Parse a `Content-Encoding` header value.
    ///
    /// Returns `None` for encodings that cannot be decoded.
    pub fn parse(value: Option<&str>) -> Option<Self> {
        let value = value.map(str::trim).unwrap_or("");
        if value.is_empty() || value.eq_ignore_ascii_case("identity") {
            Some(Self::Identity)
        } else if value.eq_ignore_ascii_case("gzip") || value.eq_ignore_ascii_case("x-gzip") {
            Some(Self::Gzip)
        } else if value.eq_ignore_ascii_case("deflate") {
            Some(Self::Deflate)
        } else {
            None
        }
    }
}

/// Decompress `data` according to `encoding`.
///
/// `deflate` bodies are accepted both zlib-wrapped and raw since servers
/// disagree on which one the name means.
pub async fn decode_body(encoding: ContentEncoding, data: Bytes) -> std::io::Result<Bytes> {
    match encoding {
        ContentEncoding::Identity => Ok(data),
        ContentEncoding::Gzip => {
            let mut decoder = GzipDecoder::new(&data[..]);
            decoder.multiple_members(true);
            read_all(decoder).await
        }
        ContentEncoding::Deflate => match read_all(ZlibDecoder::new(&data[..])).await {
            Ok(decoded) => Ok(decoded),
            Err(_) => read_all(DeflateDecoder::new(&data[..])).await,
        },
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<Bytes> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await?;
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_compression::tokio::write::{DeflateEncoder, GzipEncoder, ZlibEncoder};
    use tokio::io::AsyncWriteExt;

    async fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzipEncoder::new(Vec::new());
        encoder.write_all(data).await.unwrap();
        encoder.shutdown().await.unwrap();
        encoder.into_inner()
    }

    #[test]
    fn test_parse_encoding() {
        assert_eq!(ContentEncoding::parse(None), Some(ContentEncoding::Identity));
        assert_eq!(ContentEncoding::parse(Some("GZIP")), Some(ContentEncoding::Gzip));
        assert_eq!(ContentEncoding::parse(Some("x-gzip")), Some(ContentEncoding::Gzip));
        assert_eq!(ContentEncoding::parse(Some("deflate")), Some(ContentEncoding::Deflate));
        assert_eq!(ContentEncoding::parse(Some("br")), None);
    }

    #[tokio::test]
    async fn test_decode_gzip() {
        let original = b"{\"name\":\"lodash\"}".repeat(100);
        let compressed = gzip(&original).await;
        let decoded = decode_body(ContentEncoding::Gzip, Bytes::from(compressed))
            .await
            .unwrap();
        assert_eq!(decoded, Bytes::from(original));
    }

    #[tokio::test]
    async fn test_decode_zlib_and_raw_deflate() {
        let original = b"tarball bytes".repeat(50);

        let mut zlib = ZlibEncoder::new(Vec::new());
        zlib.write_all(&original).await.unwrap();
        zlib.shutdown().await.unwrap();
        let decoded = decode_body(ContentEncoding::Deflate, Bytes::from(zlib.into_inner()))
            .await
            .unwrap();
        assert_eq!(decoded, Bytes::from(original.clone()));

        let mut raw = DeflateEncoder::new(Vec::new());
        raw.write_all(&original).await.unwrap();
        raw.shutdown().await.unwrap();
        let decoded = decode_body(ContentEncoding::Deflate, Bytes::from(raw.into_inner()))
            .await
            .unwrap();
        assert_eq!(decoded, Bytes::from(original));
    }

    #[tokio::test]
    async fn test_decode_garbage_fails() {
        let result = decode_body(ContentEncoding::Gzip, Bytes::from_static(b"not gzip")).await;
        assert!(result.is_err());
    }
}
