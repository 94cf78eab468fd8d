use std::io::Read;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use flate2::read::GzDecoder;
use tracing::{debug, info};

use crate::scanner::ScanError;

/// One file unpacked from a chart archive.
#[derive(Debug, Clone)]
pub struct ChartDocument {
    /// Path of the entry inside the archive
    pub name: String,
    pub content: Vec<u8>,
}

/// Where chart archives come from.
#[async_trait]
pub trait ChartSource: Send + Sync {
    /// Download the raw (still compressed) archive.
    async fn fetch(&self, url: &str) -> Result<Bytes, ScanError>;
}

/// Fetches chart archives over HTTP(S).
pub struct HttpChartSource {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpChartSource {
    pub fn new(timeout: Duration, max_bytes: u64) -> Result<Self, ScanError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ScanError::Fetch)?;

        Ok(Self { client, max_bytes })
    }
}

#[async_trait]
impl ChartSource for HttpChartSource {
    async fn fetch(&self, url: &str) -> Result<Bytes, ScanError> {
        info!("Downloading chart from {}", url);
        let mut response = self.client.get(url).send().await.map_err(ScanError::Fetch)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScanError::Status(status));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(ScanError::TooLarge(self.max_bytes));
            }
        }

        // Content-Length may be absent or wrong, so enforce the limit while reading
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(ScanError::Fetch)? {
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(ScanError::TooLarge(self.max_bytes));
            }
            body.extend_from_slice(&chunk);
        }

        debug!("Downloaded {} bytes from {}", body.len(), url);
        Ok(body.freeze())
    }
}

/// Decompress a gzip'd tarball and return the regular files whose names
/// `select` accepts. Other entries are skipped without being kept.
///
/// Every entry's declared size counts against `max_unpacked_bytes`, selected
/// or not, so a small archive cannot expand into an unbounded amount of work.
pub fn unpack_documents(
    archive: &[u8],
    select: impl Fn(&str) -> bool,
    max_unpacked_bytes: u64,
) -> Result<Vec<ChartDocument>, ScanError> {
    let mut tar = tar::Archive::new(GzDecoder::new(archive));
    let mut documents = Vec::new();
    let mut remaining = max_unpacked_bytes;

    for entry in tar.entries().map_err(ScanError::Unpack)? {
        let mut entry = entry.map_err(ScanError::Unpack)?;

        // The header size is chosen by the chart author
        let size = entry.size();
        if size > remaining {
            return Err(ScanError::TooLarge(max_unpacked_bytes));
        }
        remaining -= size;

        if !entry.header().entry_type().is_file() {
            continue;
        }

        let name = entry
            .path()
            .map_err(ScanError::Unpack)?
            .to_string_lossy()
            .into_owned();
        if !select(&name) {
            continue;
        }

        let mut content = Vec::new();
        (&mut entry)
            .take(size)
            .read_to_end(&mut content)
            .map_err(ScanError::Unpack)?;
        documents.push(ChartDocument { name, content });
    }

    Ok(documents)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    use super::*;

    const LIMIT: u64 = 1024 * 1024;

    fn build_archive(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        dir.set_cksum();
        builder.append_data(&mut dir, "mychart/", std::io::empty()).unwrap();

        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, content.as_bytes()).unwrap();
        }

        let mut encoder = builder.into_inner().unwrap();
        encoder.flush().unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_unpack_returns_selected_files() {
        let archive = build_archive(&[
            ("mychart/values.yaml", "image: redis:7\n"),
            ("mychart/templates/deploy.yml", "kind: Deployment\n"),
            ("mychart/README.md", "# readme\n"),
        ]);

        let documents = unpack_documents(&archive, |name| !name.ends_with(".md"), LIMIT).unwrap();
        let names: Vec<&str> = documents.iter().map(|d| d.name.as_str()).collect();

        assert_eq!(names, vec!["mychart/values.yaml", "mychart/templates/deploy.yml"]);
        assert_eq!(documents[0].content, b"image: redis:7\n");
    }

    #[test]
    fn test_unpack_rejects_non_gzip_input() {
        let result = unpack_documents(b"definitely not a tarball", |_| true, LIMIT);
        assert!(matches!(result, Err(ScanError::Unpack(_))));
    }

    #[test]
    fn test_unpack_empty_archive() {
        let archive = build_archive(&[]);
        assert!(unpack_documents(&archive, |_| true, LIMIT).unwrap().is_empty());
    }

    #[test]
    fn test_unpack_rejects_entry_claiming_huge_size() {
        // Header promises a terabyte; the body is a few bytes
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let mut header = tar::Header::new_gnu();
        header.set_size(1 << 40);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "app/values.yaml", &b"image: a:1\n"[..])
            .unwrap();
        let archive = builder.into_inner().unwrap().finish().unwrap();

        let result = unpack_documents(&archive, |_| true, LIMIT);
        assert!(matches!(result, Err(ScanError::TooLarge(LIMIT))));
    }

    #[test]
    fn test_unpack_enforces_total_budget() {
        let filler = "x".repeat(600);
        let archive = build_archive(&[
            ("mychart/values.yaml", filler.as_str()),
            ("mychart/files/blob.bin", filler.as_str()),
        ]);

        assert_eq!(unpack_documents(&archive, |_| true, 1200).unwrap().len(), 2);
        assert!(matches!(
            unpack_documents(&archive, |name| name.ends_with(".yaml"), 1000),
            Err(ScanError::TooLarge(1000))
        ));
    }
}
