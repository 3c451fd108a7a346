//! The certificate authority seam.
//!
//! The container only needs two calls: issue a key-and-certificate bundle for
//! a role, or fetch an issuer (trust anchor) certificate. A concrete
//! implementation maps these onto the server's PKI endpoints; tests use an
//! in-process authority.

use std::time::{Duration, SystemTime};

use typed_builder::TypedBuilder;

use crate::certs::x509;
use crate::error::Result;

/// Parameters of a certificate issuance.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct CertificateRequest {
    #[builder(setter(into))]
    pub common_name: String,
    #[builder(default)]
    pub alt_names: Vec<String>,
    #[builder(default)]
    pub ip_sans: Vec<String>,
    /// Requested validity. The authority may cap it.
    #[builder(default, setter(strip_option))]
    pub ttl: Option<Duration>,
}

/// A certificate returned by the authority: the PEM-encoded leaf, optionally
/// the private key (bundles) and chain, and the serial as the server renders
/// it.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct IssuedCertificate {
    #[builder(setter(into))]
    certificate_pem: String,
    #[builder(default, setter(strip_option, into))]
    private_key_pem: Option<String>,
    #[builder(default)]
    ca_chain: Vec<String>,
    /// Serial as reported by the server; when absent or empty it is derived
    /// from the X.509 serial bytes.
    #[builder(default, setter(strip_option, into))]
    serial_number: Option<String>,
}

impl IssuedCertificate {
    #[must_use]
    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }

    #[must_use]
    pub fn private_key_pem(&self) -> Option<&str> {
        self.private_key_pem.as_deref()
    }

    #[must_use]
    pub fn ca_chain(&self) -> &[String] {
        &self.ca_chain
    }

    /// The certificate's `notAfter` instant.
    ///
    /// # Errors
    /// Fails with [`crate::Error::Certificate`] if the PEM does not parse.
    pub fn not_after(&self) -> Result<SystemTime> {
        Ok(x509::expiration(&self.certificate_pem)?.not_after)
    }

    /// The serial number: the server-provided string verbatim when present,
    /// otherwise derived from the X.509 serial bytes
    /// (see [`x509::format_serial`]).
    ///
    /// # Errors
    /// Fails with [`crate::Error::Certificate`] if derivation requires
    /// parsing and the PEM does not parse.
    pub fn serial(&self) -> Result<String> {
        match self.serial_number.as_deref() {
            Some(serial) if !serial.is_empty() => Ok(serial.to_string()),
            _ => x509::serial_number(&self.certificate_pem),
        }
    }
}

/// Issues and fetches certificates on behalf of the container.
#[async_trait::async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Issue a certificate bundle for `role`.
    ///
    /// # Errors
    /// Implementation-defined; surfaced as certificate error events.
    async fn issue_certificate(
        &self,
        name: &str,
        role: &str,
        request: &CertificateRequest,
    ) -> Result<IssuedCertificate>;

    /// Fetch an issuer (trust anchor) certificate.
    ///
    /// # Errors
    /// Implementation-defined; surfaced as certificate error events.
    async fn get_issuer_certificate(&self, name: &str, issuer: &str)
        -> Result<IssuedCertificate>;
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn cert_pem(serial: Vec<u8>) -> String {
        let mut params = rcgen::CertificateParams::new(vec!["svc.example.com".into()]).unwrap();
        params.serial_number = Some(serial.into());
        let key = rcgen::KeyPair::generate().unwrap();
        params.self_signed(&key).unwrap().pem()
    }

    #[test]
    fn test_server_provided_serial_is_used_verbatim() {
        let cert = IssuedCertificate::builder()
            .certificate_pem(cert_pem(vec![0x12, 0x34]))
            .serial_number("6f:00:aa")
            .build();
        assert_eq!(cert.serial().unwrap(), "6f:00:aa");
    }

    #[test]
    fn test_empty_server_serial_falls_back_to_derivation() {
        let cert = IssuedCertificate::builder()
            .certificate_pem(cert_pem(vec![0x00, 0x12, 0x34]))
            .serial_number("")
            .build();
        assert_eq!(cert.serial().unwrap(), "12:34");
    }

    #[test]
    fn test_absent_server_serial_is_derived() {
        let cert = IssuedCertificate::builder()
            .certificate_pem(cert_pem(vec![0x7f]))
            .build();
        assert_eq!(cert.serial().unwrap(), "7f");
    }
}
