//! X.509 inspection: expiry extraction and serial-number formatting.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use x509_parser::certificate::X509Certificate;
use x509_parser::pem::parse_x509_pem;

use crate::error::{Error, Result};

/// Validity bounds of a parsed certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiration {
    pub not_before: SystemTime,
    pub not_after: SystemTime,
}

fn to_system_time(timestamp: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(u64::try_from(timestamp).unwrap_or_default())
}

/// Parse the first PEM-encoded certificate in `pem` and return its validity.
///
/// # Errors
/// Fails with [`Error::Certificate`] on malformed input.
pub fn expiration(pem: &str) -> Result<Expiration> {
    with_certificate(pem, |cert| {
        Ok(Expiration {
            not_before: to_system_time(cert.validity.not_before.timestamp()),
            not_after: to_system_time(cert.validity.not_after.timestamp()),
        })
    })
}

/// Parse the first PEM-encoded certificate in `pem` and format its serial
/// number per [`format_serial`].
///
/// # Errors
/// Fails with [`Error::Certificate`] on malformed input.
pub fn serial_number(pem: &str) -> Result<String> {
    with_certificate(pem, |cert| Ok(format_serial(cert.raw_serial())))
}

fn with_certificate<T>(
    pem: &str,
    f: impl FnOnce(&X509Certificate<'_>) -> Result<T>,
) -> Result<T> {
    let (_rem, parsed) = parse_x509_pem(pem.as_bytes())
        .map_err(|e| Error::Certificate(format!("Invalid PEM: {e}")))?;
    let cert = parsed
        .parse_x509()
        .map_err(|e| Error::Certificate(format!("Invalid certificate: {e}")))?;
    f(&cert)
}

/// Format serial bytes the way the server renders serials: big-endian bytes,
/// leading zero bytes stripped, each byte as two lowercase hex digits joined
/// by `:`. All-zero input renders as `"00"`.
#[must_use]
pub fn format_serial(bytes: &[u8]) -> String {
    let significant: Vec<u8> = bytes
        .iter()
        .copied()
        .skip_while(|byte| *byte == 0)
        .collect();
    if significant.is_empty() {
        return "00".to_string();
    }
    significant
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
