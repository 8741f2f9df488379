//! Certificate pinning for self-signed management API endpoints
//!
//! Remote servers present self-signed certificates, so chain validation is
//! replaced by comparing the SHA-256 of the leaf certificate with the
//! fingerprint stored on the server row. Handshake signatures are still
//! verified with the crypto provider.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, SignatureScheme};
use sha2::{Digest, Sha256};

use super::remote_server::RemoteError;

/// Hex SHA-256 of a DER certificate (lowercase, no separators)
pub fn certificate_fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// Decode a fingerprint written as hex, optionally with `:` separators
pub fn parse_fingerprint(raw: &str) -> Result<Vec<u8>, RemoteError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    let bytes = hex::decode(cleaned.to_ascii_lowercase()).map_err(|e| {
        RemoteError::InvalidConfiguration(format!("Invalid certificate fingerprint: {}", e))
    })?;
    if bytes.len() != 32 {
        return Err(RemoteError::InvalidConfiguration(format!(
            "Certificate fingerprint must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

#[derive(Debug)]
pub struct PinnedCertVerifier {
    fingerprint: Vec<u8>,
    provider: Arc<CryptoProvider>,
}

impl PinnedCertVerifier {
    pub fn new(fingerprint: &str, provider: Arc<CryptoProvider>) -> Result<Self, RemoteError> {
        Ok(Self {
            fingerprint: parse_fingerprint(fingerprint)?,
            provider,
        })
    }
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let digest = Sha256::digest(end_entity.as_ref());
        if digest.as_slice() == self.fingerprint.as_slice() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// rustls client configuration that trusts only the pinned certificate
pub fn pinned_client_config(fingerprint: &str) -> Result<ClientConfig, RemoteError> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let verifier = PinnedCertVerifier::new(fingerprint, provider.clone())?;

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| RemoteError::InvalidConfiguration(format!("TLS setup failed: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    Ok(config)
}
