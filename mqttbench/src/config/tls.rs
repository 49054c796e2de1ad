use std::path::{Path, PathBuf};

use mqttbench_lib::broker::TlsMaterial;
use rama::error::{BoxError, ErrorContext as _, ErrorExt as _};

/// Client certificate and key paths, which are only valid as a pair.
pub fn client_auth_paths<'a>(
    cert: Option<&'a Path>,
    key: Option<&'a Path>,
) -> Result<Option<(&'a Path, &'a Path)>, BoxError> {
    match (cert, key) {
        (Some(cert), Some(key)) => Ok(Some((cert, key))),
        (None, None) => Ok(None),
        (Some(_), None) => Err(BoxError::from(
            "invalid arguments: private client key path missing",
        )),
        (None, Some(_)) => Err(BoxError::from(
            "invalid arguments: client certificate path missing",
        )),
    }
}

/// Read the PEM encoded TLS material used to connect to a broker.
pub async fn load_tls_material(
    ca: Option<&Path>,
    cert: Option<&Path>,
    key: Option<&Path>,
) -> Result<TlsMaterial, BoxError> {
    let client_auth = match client_auth_paths(cert, key)? {
        Some((cert, key)) => Some((
            read_pem(cert, "client certificate").await?,
            read_pem(key, "client private key").await?,
        )),
        None => None,
    };

    let ca = match ca {
        Some(ca) => Some(read_pem(ca, "CA certificate").await?),
        None => None,
    };

    Ok(TlsMaterial { ca, client_auth })
}

async fn read_pem(path: &Path, what: &'static str) -> Result<Vec<u8>, BoxError> {
    let content = tokio::fs::read(path)
        .await
        .context("read PEM file")
        .context_field("kind", what)
        .with_context_debug_field("path", || PathBuf::from(path))?;

    if !content.windows(11).any(|w| w == b"-----BEGIN ") {
        return Err(BoxError::from("file is not PEM encoded")
            .context_field("kind", what)
            .context_debug_field("path", PathBuf::from(path)));
    }
    Ok(content)
}
