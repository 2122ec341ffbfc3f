use std::path::Path;
use std::sync::Arc;

use color_eyre::eyre::{Context, eyre};
use x509_parser::pem::parse_x509_pem;

use crate::authority::CrlAuthority;
use crate::config::Config;
use crate::issuing_point::{Collaborators, IssuingPoint};
use crate::publisher::{CrlPublisher, FilePublisher, HttpPublisher};
use crate::repository::{CertificateRepository, MemoryRepository};
use crate::signing::{CaIdentity, CrlSigner, RingSigner, SigningAlgorithm};
use crate::store::{CrlStore, FileCrlStore, MemoryCrlStore};

/// Reads a PEM or DER file and returns the DER bytes.
async fn read_der(path: &Path) -> color_eyre::Result<Vec<u8>> {
    let bytes = tokio::fs::read(path)
        .await
        .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
    match parse_x509_pem(&bytes) {
        Ok((_, pem)) => Ok(pem.contents),
        Err(_) => Ok(bytes),
    }
}

async fn load_signer(config: &Config) -> color_eyre::Result<RingSigner> {
    if let Some(key_path) = &config.ca.key_path {
        let pkcs8 = read_der(key_path).await?;
        let signer = RingSigner::from_pkcs8(key_path.display().to_string(), &pkcs8)
            .wrap_err("Failed to load the CA signing key")?;
        return Ok(signer);
    }

    let algorithm = match config.ca.signing_algorithm.as_deref() {
        Some(name) => name
            .parse::<SigningAlgorithm>()
            .wrap_err("Invalid CA signing algorithm")?,
        None => SigningAlgorithm::Ed25519,
    };
    tracing::warn!(
        "No CA key configured, generating an ephemeral {} key. CRLs will not verify against a real CA.",
        algorithm
    );
    let (signer, _) = RingSigner::generate("ephemeral", algorithm)
        .wrap_err("Failed to generate an ephemeral signing key")?;
    Ok(signer)
}

async fn load_identity(config: &Config, signer: &RingSigner) -> color_eyre::Result<CaIdentity> {
    match &config.ca.certificate_path {
        Some(path) => {
            let bytes = tokio::fs::read(path)
                .await
                .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
            CaIdentity::from_certificate_bytes(&bytes).wrap_err("Failed to parse the CA certificate")
        }
        None => {
            tracing::info!(
                "No CA certificate configured, using issuer CN={}",
                config.ca.common_name
            );
            Ok(CaIdentity::from_common_name(
                &config.ca.common_name,
                signer.public_key().as_deref(),
            ))
        }
    }
}

async fn publishers(config: &Config) -> color_eyre::Result<Vec<Arc<dyn CrlPublisher>>> {
    let mut publishers: Vec<Arc<dyn CrlPublisher>> = Vec::new();

    if let Some(directory) = &config.publishing.directory {
        tokio::fs::create_dir_all(directory)
            .await
            .wrap_err_with(|| format!("Failed to create {}", directory.display()))?;
        tracing::info!("Publishing CRLs to {}", directory.display());
        publishers.push(Arc::new(
            FilePublisher::new(directory).with_pem(config.publishing.pem),
        ));
    }

    if let Some(url) = &config.publishing.http_url {
        tracing::info!("Publishing CRLs to {}", url);
        let publisher = HttpPublisher::new(url, config.publishing.http_timeout())
            .wrap_err("Invalid CRL publishing URL")?;
        publishers.push(Arc::new(publisher));
    }

    Ok(publishers)
}

/// Assembles the CRL authority and its issuing points from `config`.
///
/// The issuing points are not initialized yet.
pub async fn setup(config: &Config) -> color_eyre::Result<CrlAuthority> {
    config.validate().wrap_err("Invalid configuration")?;

    let store: Arc<dyn CrlStore> = match &config.store.path {
        Some(path) => {
            tracing::info!("Using issuing point store at {}", path.display());
            Arc::new(FileCrlStore::new(path))
        }
        None => {
            tracing::info!("No store path, issuing point state is kept in memory.");
            Arc::new(MemoryCrlStore::new())
        }
    };
    let repository: Arc<dyn CertificateRepository> = Arc::new(MemoryRepository::new());

    let signer = load_signer(config).await?;
    let identity = load_identity(config, &signer).await?;
    let signer: Arc<dyn CrlSigner> = Arc::new(signer);
    let publishers = publishers(config).await?;

    let collaborators = Collaborators {
        repository: repository.clone(),
        store,
        signer,
        identity,
    };

    let mut authority = CrlAuthority::new(repository);
    for (id, ip_config) in &config.issuing_points {
        let mut issuing_point = IssuingPoint::new(id.clone(), ip_config.clone(), collaborators.clone())
            .wrap_err_with(|| format!("Invalid configuration for issuing point {id}"))?;
        for publisher in &publishers {
            issuing_point = issuing_point.with_publisher(publisher.clone());
        }
        authority.add_issuing_point(issuing_point);
    }

    if authority.issuing_points().next().is_none() {
        return Err(eyre!("No CRL issuing point configured"));
    }
    Ok(authority)
}
