//! Provider certificate and private key.
//!
//! Bootstrapping the PEM files on disk ([`CertificateFiles::materialize`]) is a
//! separate, explicit step from loading them for signing ([`CertificateStore`]).
use base64ct::{Base64, Encoding};
use chrono::{DateTime, TimeZone, Utc};
use pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{
    pkcs1::DecodeRsaPrivateKey,
    pkcs1v15::SigningKey,
    signature::{SignatureEncoding, Signer},
    RsaPrivateKey, RsaPublicKey,
};
use sha1::Sha1;
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{info, warn};
use x509_cert::{
    der::{Decode, DecodePem, Encode},
    Certificate,
};

pub const PRIVATE_KEY_FILE: &str = "privatekey.pem";
pub const CERTIFICATE_FILE: &str = "publickey.pem";
/// Certificate followed by the key, used as the TLS client identity.
pub const IDENTITY_FILE: &str = "key.pem";

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("certificate material is unreadable: {reason}")]
    Unreadable { reason: String },
    #[error("certificate expired at {valid_to}")]
    Expired { valid_to: DateTime<Utc> },
    #[error("failed to write certificate file '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn unreadable(reason: impl Into<String>) -> CertificateError {
    CertificateError::Unreadable {
        reason: reason.into(),
    }
}

/// Paths of the PEM files a certificate directory holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateFiles {
    pub private_key: PathBuf,
    pub certificate: PathBuf,
    pub identity: PathBuf,
}

impl CertificateFiles {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            private_key: dir.join(PRIVATE_KEY_FILE),
            certificate: dir.join(CERTIFICATE_FILE),
            identity: dir.join(IDENTITY_FILE),
        }
    }

    /// Writes the PEM files extracted from the provider's container into `dir`.
    ///
    /// Files that already exist are left untouched, so running this twice is a
    /// no-op the second time.
    pub fn materialize(
        dir: &Path,
        certificate_pem: &str,
        private_key_pem: &str,
    ) -> Result<Self, CertificateError> {
        fs::create_dir_all(dir).map_err(|source| CertificateError::Write {
            path: dir.to_path_buf(),
            source,
        })?;
        let files = Self::in_dir(dir);
        let identity = format!("{certificate_pem}{private_key_pem}");
        for (path, contents) in [
            (&files.private_key, private_key_pem),
            (&files.certificate, certificate_pem),
            (&files.identity, identity.as_str()),
        ] {
            if path.exists() {
                continue;
            }
            fs::write(path, contents).map_err(|source| CertificateError::Write {
                path: path.clone(),
                source,
            })?;
            info!(path = %path.display(), "certificate file written");
        }
        Ok(files)
    }
}

/// A validated certificate and the key it certifies.
///
/// The private key never leaves the store; callers get signatures, the public
/// key and the certificate bytes.
///
/// # Examples
/// ```rust,no_run
/// use nfse_core::certificate::CertificateStore;
///
/// let store = CertificateStore::load_from_dir("certificates".as_ref(), None)?;
/// let signature = store.sign(b"content")?;
/// # let _ = signature;
/// # Ok::<(), nfse_core::certificate::CertificateError>(())
/// ```
#[derive(Clone)]
pub struct CertificateStore {
    signer: SigningKey<Sha1>,
    public_key: RsaPublicKey,
    certificate_der: Vec<u8>,
    valid_to: DateTime<Utc>,
}

impl fmt::Debug for CertificateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateStore")
            .field("valid_to", &self.valid_to)
            .field("certificate_len", &self.certificate_der.len())
            .finish_non_exhaustive()
    }
}

impl CertificateStore {
    /// Reads `privatekey.pem` and `publickey.pem` from a materialized directory.
    pub fn load_from_dir(dir: &Path, passphrase: Option<&str>) -> Result<Self, CertificateError> {
        let files = CertificateFiles::in_dir(dir);
        let read = |path: &Path| {
            fs::read_to_string(path)
                .map_err(|e| unreadable(format!("cannot read '{}': {e}", path.display())))
        };
        let certificate_pem = read(&files.certificate)?;
        let private_key_pem = read(&files.private_key)?;
        Self::from_pem(&certificate_pem, &private_key_pem, passphrase)
    }

    pub fn from_pem(
        certificate_pem: &str,
        private_key_pem: &str,
        passphrase: Option<&str>,
    ) -> Result<Self, CertificateError> {
        let certificate = Certificate::from_pem(certificate_pem.trim())
            .map_err(|e| unreadable(format!("invalid certificate PEM: {e}")))?;
        Self::from_certificate(certificate, private_key_pem, passphrase, Utc::now())
    }

    pub fn from_der(
        certificate_der: &[u8],
        private_key_pem: &str,
        passphrase: Option<&str>,
    ) -> Result<Self, CertificateError> {
        let certificate = Certificate::from_der(certificate_der)
            .map_err(|e| unreadable(format!("invalid certificate DER: {e}")))?;
        Self::from_certificate(certificate, private_key_pem, passphrase, Utc::now())
    }

    fn from_certificate(
        certificate: Certificate,
        private_key_pem: &str,
        passphrase: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Self, CertificateError> {
        let not_after = certificate
            .tbs_certificate
            .validity
            .not_after
            .to_unix_duration();
        let valid_to = i64::try_from(not_after.as_secs())
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or_else(|| unreadable("certificate expiry is out of range"))?;

        let spki = certificate
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|e| unreadable(format!("invalid subject public key: {e}")))?;
        let public_key = RsaPublicKey::from_public_key_der(&spki)
            .map_err(|e| unreadable(format!("certificate key is not RSA: {e}")))?;
        let private_key = decode_private_key(private_key_pem, passphrase)?;
        if private_key.to_public_key() != public_key {
            return Err(unreadable("private key does not match the certificate"));
        }

        let certificate_der = certificate
            .to_der()
            .map_err(|e| unreadable(format!("cannot re-encode certificate: {e}")))?;
        let store = Self {
            signer: SigningKey::<Sha1>::new(private_key),
            public_key,
            certificate_der,
            valid_to,
        };
        store.check_validity_at(now)?;
        info!(valid_to = %store.valid_to, "certificate loaded");
        Ok(store)
    }

    /// Fails once `now` reaches the certificate's valid-to instant.
    pub fn check_validity_at(&self, now: DateTime<Utc>) -> Result<(), CertificateError> {
        if self.valid_to <= now {
            warn!(valid_to = %self.valid_to, "certificate expired");
            return Err(CertificateError::Expired {
                valid_to: self.valid_to,
            });
        }
        Ok(())
    }

    /// RSA PKCS#1 v1.5 signature with SHA-1 over `content`.
    pub fn sign(&self, content: &[u8]) -> Result<Vec<u8>, CertificateError> {
        self.check_validity_at(Utc::now())?;
        let signature = self
            .signer
            .try_sign(content)
            .map_err(|e| unreadable(format!("signing failed: {e}")))?;
        Ok(signature.to_vec())
    }

    pub fn valid_to(&self) -> DateTime<Utc> {
        self.valid_to
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    /// Certificate DER as base64 on one line (the PEM body without armor or breaks).
    pub fn certificate_base64(&self) -> String {
        Base64::encode_string(&self.certificate_der)
    }
}

fn decode_private_key(pem: &str, passphrase: Option<&str>) -> Result<RsaPrivateKey, CertificateError> {
    let pem = pem.trim();
    if pem.contains("BEGIN ENCRYPTED PRIVATE KEY") {
        let passphrase =
            passphrase.ok_or_else(|| unreadable("private key is encrypted but no passphrase given"))?;
        return RsaPrivateKey::from_pkcs8_encrypted_pem(pem, passphrase.as_bytes())
            .map_err(|e| unreadable(format!("cannot decrypt private key: {e}")));
    }
    if pem.contains("BEGIN RSA PRIVATE KEY") {
        return RsaPrivateKey::from_pkcs1_pem(pem)
            .map_err(|e| unreadable(format!("invalid PKCS#1 private key: {e}")));
    }
    RsaPrivateKey::from_pkcs8_pem(pem)
        .map_err(|e| unreadable(format!("invalid PKCS#8 private key: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const CERT_PEM: &str = include_str!("../tests/fixtures/certs/provider-cert.pem");
    const KEY_PEM: &str = include_str!("../tests/fixtures/certs/provider-key.pem");

    #[test]
    fn valid_to_equal_to_now_is_expired() {
        let store = CertificateStore::from_pem(CERT_PEM, KEY_PEM, None).unwrap();
        let valid_to = store.valid_to();
        assert!(store
            .check_validity_at(valid_to - Duration::seconds(1))
            .is_ok());
        assert!(matches!(
            store.check_validity_at(valid_to),
            Err(CertificateError::Expired { .. })
        ));
    }

    #[test]
    fn certificate_base64_is_pem_body_without_breaks() {
        let store = CertificateStore::from_pem(CERT_PEM, KEY_PEM, None).unwrap();
        let body: String = CERT_PEM
            .lines()
            .filter(|line| !line.starts_with("-----"))
            .collect();
        assert_eq!(store.certificate_base64(), body);
    }

    #[test]
    fn debug_output_hides_key_material() {
        let store = CertificateStore::from_pem(CERT_PEM, KEY_PEM, None).unwrap();
        let debug = format!("{store:?}");
        assert!(debug.contains("valid_to"));
        assert!(!debug.contains("signer"));
    }
}
