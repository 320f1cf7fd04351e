//! Certificate loading for the QUIC listener.

use std::path::Path;

use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::config::TlsSource;
use crate::error::Error;

/// A certificate chain and the private key that goes with its leaf.
pub struct TlsMaterial {
    pub certs: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl TlsMaterial {
    pub fn load(source: &TlsSource) -> Result<Self, Error> {
        match source {
            TlsSource::PemFiles { cert, key } => Self::from_pem_files(cert, key),
            TlsSource::SelfSigned { subject_alt_names } => Self::self_signed(subject_alt_names),
        }
    }

    pub fn from_pem_files(cert: &Path, key: &Path) -> Result<Self, Error> {
        let certs = CertificateDer::pem_file_iter(cert)?.collect::<Result<Vec<_>, _>>()?;
        if certs.is_empty() {
            return Err(Error::NoCertificates(cert.to_path_buf()));
        }
        let key = PrivateKeyDer::from_pem_file(key)?;
        Ok(Self { certs, key })
    }

    /// Generate an ECDSA P-256 certificate valid for `names`.
    pub fn self_signed(names: &[String]) -> Result<Self, Error> {
        let generated = rcgen::generate_simple_self_signed(names.to_vec())?;
        let key = PrivatePkcs8KeyDer::from(generated.key_pair.serialize_der());
        tracing::warn!(?names, "using a self-signed certificate");
        Ok(Self {
            certs: vec![generated.cert.der().clone()],
            key: key.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_signed_has_one_cert() {
        let material = TlsMaterial::self_signed(&["localhost".to_string()]).unwrap();
        assert_eq!(material.certs.len(), 1);
        assert!(matches!(material.key, PrivateKeyDer::Pkcs8(_)));
    }

    #[test]
    fn pem_files_round_trip() {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
        let dir = std::env::temp_dir().join(format!("wtlink-tls-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");
        std::fs::write(&cert_path, generated.cert.pem()).unwrap();
        std::fs::write(&key_path, generated.key_pair.serialize_pem()).unwrap();

        let material = TlsMaterial::from_pem_files(&cert_path, &key_path).unwrap();
        assert_eq!(material.certs[0].as_ref(), generated.cert.der().as_ref());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn empty_cert_file_rejected() {
        let dir = std::env::temp_dir().join(format!("wtlink-tls-empty-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let cert_path = dir.join("cert.pem");
        std::fs::write(&cert_path, "").unwrap();

        let result = TlsMaterial::from_pem_files(&cert_path, &dir.join("missing.pem"));
        assert!(matches!(result, Err(Error::NoCertificates(_))));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
