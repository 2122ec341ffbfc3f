use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use tokio::fs;
use tracing::info;

use super::{CrlPublication, CrlPublisher, PublishError};

/// Writes each CRL twice: under its number and as the issuing point's latest.
///
/// `MasterCRL-12.crl` / `MasterCRL.crl` for full CRLs,
/// `MasterCRL-delta-3.crl` / `MasterCRL-delta.crl` for delta CRLs.
#[derive(Debug, Clone)]
pub struct FilePublisher {
    directory: PathBuf,
    pem: bool,
}

impl FilePublisher {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            pem: false,
        }
    }

    /// Also writes a `.pem` rendition next to every DER file.
    pub fn with_pem(mut self, pem: bool) -> Self {
        self.pem = pem;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn stem(publication: &CrlPublication) -> String {
        if publication.is_delta {
            format!("{}-delta", publication.issuing_point)
        } else {
            publication.issuing_point.clone()
        }
    }

    async fn write(&self, name: &str, contents: &[u8]) -> Result<(), PublishError> {
        let path = self.directory.join(name);
        let tmp = self.directory.join(format!(".{name}.tmp"));
        fs::write(&tmp, contents).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

pub(crate) fn to_pem(der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut pem = String::from("-----BEGIN X509 CRL-----\n");
    for line in encoded.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str("-----END X509 CRL-----\n");
    pem
}

#[async_trait]
impl CrlPublisher for FilePublisher {
    fn name(&self) -> &str {
        "file"
    }

    async fn publish(&self, publication: &CrlPublication) -> Result<(), PublishError> {
        fs::create_dir_all(&self.directory).await?;

        let stem = Self::stem(publication);
        let numbered = format!("{stem}-{}", publication.crl_number);
        for name in [&numbered, &stem] {
            self.write(&format!("{name}.crl"), &publication.der).await?;
            if self.pem {
                self.write(&format!("{name}.pem"), to_pem(&publication.der).as_bytes())
                    .await?;
            }
        }

        info!(
            issuing_point = %publication.issuing_point,
            crl_number = %publication.crl_number,
            delta = publication.is_delta,
            "Published CRL to {:?}",
            self.directory
        );
        Ok(())
    }
}
