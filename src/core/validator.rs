//! Semantic validation of parsed profiles.
//!
//! Checks run in order: remote endpoints, port ranges, host resolvability,
//! PEM material (certificate validity windows and private key formats),
//! then device type. DNS failures are validation failures; a profile with
//! an unreachable host is refused for connect. Validation is
//! non-destructive: it only sets the verdict fields on the profile.

use chrono::Utc;
use rustls_pemfile::Item;

use crate::constants;
use crate::logger::{self, LogLevel};
use crate::state::profile::VpnProfile;
use crate::utils;

/// Run all checks and record the verdict on the profile.
pub fn validate(profile: &mut VpnProfile) {
    match check(profile) {
        Ok(()) => {
            profile.validated = true;
            profile.validation_error = None;
        }
        Err(reason) => {
            logger::log(
                LogLevel::Warning,
                "VALIDATE",
                format!("profile '{}' rejected: {reason}", profile.name),
            );
            profile.validated = false;
            profile.validation_error = Some(reason);
        }
    }
    profile.last_modified = Utc::now();
}

/// The validation checks, first failure wins.
///
/// # Errors
///
/// Returns a human-readable rejection reason; the stable prefixes
/// ("CA certificate validation failed", "client certificate validation
/// failed", "private key validation failed") identify the failing material.
pub fn check(profile: &VpnProfile) -> Result<(), String> {
    if profile.remotes.is_empty() {
        return Err("no remote servers configured".to_string());
    }

    for (i, remote) in profile.remotes.iter().enumerate() {
        let n = i + 1;
        if remote.host.is_empty() {
            return Err(format!("remote server {n}: empty host"));
        }
        if remote.port == 0 {
            return Err(format!("remote server {n}: invalid port 0"));
        }
        if let Err(e) = utils::resolve_host(&remote.host, constants::RESOLVE_TIMEOUT) {
            return Err(format!(
                "remote server {n}: failed to resolve host {}: {e}",
                remote.host
            ));
        }
    }

    if let Some(ca) = &profile.ca {
        validate_certificate(ca).map_err(|e| format!("CA certificate validation failed: {e}"))?;
    }
    if let Some(cert) = &profile.cert {
        validate_certificate(cert)
            .map_err(|e| format!("client certificate validation failed: {e}"))?;
    }
    if let Some(key) = &profile.key {
        validate_private_key(key).map_err(|e| format!("private key validation failed: {e}"))?;
    }

    // Transport is constrained by its type at parse time; only the device
    // string needs a membership check here.
    if profile.device != "tun" && profile.device != "tap" {
        return Err(format!("invalid device type: {}", profile.device));
    }

    Ok(())
}

/// Decode one PEM certificate and check its validity window.
fn validate_certificate(pem: &str) -> Result<(), String> {
    let items = rustls_pemfile::read_all(&mut pem.as_bytes())
        .map_err(|e| format!("failed to decode PEM: {e}"))?;

    let der = items
        .into_iter()
        .find_map(|item| match item {
            Item::X509Certificate(der) => Some(der),
            _ => None,
        })
        .ok_or_else(|| "no certificate found in PEM block".to_string())?;

    let (_, cert) = x509_parser::parse_x509_certificate(&der)
        .map_err(|e| format!("failed to parse certificate: {e}"))?;

    let now = Utc::now().timestamp();
    let validity = cert.validity();
    if now < validity.not_before.timestamp() {
        return Err(format!(
            "certificate not yet valid (valid from {})",
            validity.not_before
        ));
    }
    if now > validity.not_after.timestamp() {
        return Err(format!("certificate expired on {}", validity.not_after));
    }

    Ok(())
}

/// Accept PKCS#1 (RSA), PKCS#8, or SEC1 (EC) private keys.
fn validate_private_key(pem: &str) -> Result<(), String> {
    let items = rustls_pemfile::read_all(&mut pem.as_bytes())
        .map_err(|e| format!("failed to decode PEM: {e}"))?;

    for item in items {
        match item {
            Item::RSAKey(_) | Item::PKCS8Key(_) | Item::ECKey(_) => return Ok(()),
            _ => {}
        }
    }

    Err("unsupported private key format".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_profile;
    use crate::state::profile::Remote;

    const CA_VALID: &str = include_str!("../../tests/fixtures/ca_valid.pem");
    const CA_EXPIRED: &str = include_str!("../../tests/fixtures/ca_expired.pem");
    const CLIENT_CERT: &str = include_str!("../../tests/fixtures/client_cert.pem");
    const KEY_PKCS1: &str = include_str!("../../tests/fixtures/key_rsa_pkcs1.pem");
    const KEY_PKCS8: &str = include_str!("../../tests/fixtures/key_pkcs8.pem");
    const KEY_EC: &str = include_str!("../../tests/fixtures/key_ec_sec1.pem");

    fn base_profile() -> VpnProfile {
        // IP-literal remote keeps these tests off the network.
        let mut p = VpnProfile::new("t_1".into(), "t".into(), "t.ovpn".into());
        p.remotes.push(Remote {
            host: "203.0.113.10".into(),
            port: 1194,
        });
        p
    }

    #[test]
    fn test_valid_profile_passes() {
        let mut p = base_profile();
        p.ca = Some(CA_VALID.to_string());
        p.cert = Some(CLIENT_CERT.to_string());
        p.key = Some(KEY_PKCS1.to_string());
        validate(&mut p);
        assert!(p.validated, "unexpected error: {:?}", p.validation_error);
        assert!(p.validation_error.is_none());
    }

    #[test]
    fn test_no_remotes_rejected() {
        let mut p = VpnProfile::new("t_2".into(), "t".into(), "t.ovpn".into());
        validate(&mut p);
        assert!(!p.validated);
        assert_eq!(
            p.validation_error.as_deref(),
            Some("no remote servers configured")
        );
    }

    #[test]
    fn test_port_zero_rejected() {
        let mut p = base_profile();
        p.remotes[0].port = 0;
        validate(&mut p);
        assert!(!p.validated);
        assert!(p.validation_error.unwrap().contains("invalid port 0"));
    }

    #[test]
    fn test_unresolvable_host_rejected() {
        let mut p = base_profile();
        p.remotes[0].host = "definitely-not-a-real-host.invalid".into();
        validate(&mut p);
        assert!(!p.validated);
        assert!(p
            .validation_error
            .unwrap()
            .contains("failed to resolve host"));
    }

    #[test]
    fn test_expired_ca_rejected_with_stable_prefix() {
        let mut p = base_profile();
        p.ca = Some(CA_EXPIRED.to_string());
        validate(&mut p);
        assert!(!p.validated);
        let err = p.validation_error.unwrap();
        assert!(
            err.starts_with("CA certificate validation failed"),
            "got: {err}"
        );
        assert!(err.contains("expired"));
    }

    #[test]
    fn test_garbage_ca_rejected() {
        let mut p = base_profile();
        p.ca = Some("not pem at all".to_string());
        validate(&mut p);
        assert!(!p.validated);
        assert!(p
            .validation_error
            .unwrap()
            .starts_with("CA certificate validation failed"));
    }

    #[test]
    fn test_all_key_formats_accepted() {
        for key in [KEY_PKCS1, KEY_PKCS8, KEY_EC] {
            let mut p = base_profile();
            p.key = Some(key.to_string());
            validate(&mut p);
            assert!(p.validated, "rejected: {:?}", p.validation_error);
        }
    }

    #[test]
    fn test_certificate_as_key_rejected() {
        let mut p = base_profile();
        p.key = Some(CA_VALID.to_string());
        validate(&mut p);
        assert!(!p.validated);
        assert!(p
            .validation_error
            .unwrap()
            .starts_with("private key validation failed"));
    }

    #[test]
    fn test_bad_device_rejected() {
        let mut p = base_profile();
        p.device = "eth0".into();
        validate(&mut p);
        assert!(!p.validated);
        assert!(p.validation_error.unwrap().contains("invalid device type"));
    }

    #[test]
    fn test_parsed_config_with_inline_pems_validates() {
        let config = format!(
            "client\ndev tun\nproto udp\nremote 203.0.113.10 1194\n\
             <ca>\n{CA_VALID}</ca>\n<cert>\n{CLIENT_CERT}</cert>\n<key>\n{KEY_PKCS8}</key>\n"
        );
        let mut profile = parse_profile(&config, "e1_1", "e1", "e1.ovpn").unwrap();
        validate(&mut profile);
        assert!(
            profile.validated,
            "unexpected error: {:?}",
            profile.validation_error
        );
    }
}
