//! OpenVPN configuration parsing and rendering.
//!
//! Consumes `.ovpn` text line by line: blank lines and `#`/`;` comments are
//! skipped, `<ca>`/`<cert>`/`<key>` blocks capture inline PEM bodies, and
//! everything else is a whitespace-separated directive. Directives outside
//! the recognized set are retained verbatim and re-emitted on export, in
//! order of first appearance.

use std::fmt::Write as _;

use crate::constants;
use crate::error::ParseError;
use crate::state::profile::{AuthUserPass, Remote, Transport, VpnProfile};

/// Inline sections that may carry PEM bodies.
const INLINE_SECTIONS: [&str; 3] = ["ca", "cert", "key"];

/// Parse `.ovpn` text into a profile.
///
/// The returned profile has not been validated; the caller runs the
/// validator and stores the verdict.
///
/// # Errors
///
/// Returns a [`ParseError`] for unbalanced or unknown inline blocks, remotes
/// without a host, non-numeric numeric arguments, and unsupported `proto`
/// values.
pub fn parse_profile(
    content: &str,
    id: &str,
    name: &str,
    source_file: &str,
) -> Result<VpnProfile, ParseError> {
    let mut profile = VpnProfile::new(id.to_string(), name.to_string(), source_file.to_string());

    let mut section: Option<String> = None;
    let mut section_body = String::new();

    for raw_line in content.lines() {
        let line = raw_line.trim();

        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        // Inline block boundaries.
        if line.starts_with('<') && line.ends_with('>') {
            let tag = line.trim_matches(|c| c == '<' || c == '>');
            if let Some(closing) = tag.strip_prefix('/') {
                match section.take() {
                    Some(open) if open == closing => {
                        apply_section(&mut profile, &open, std::mem::take(&mut section_body));
                    }
                    Some(open) => {
                        return Err(ParseError::MalformedBlock(format!(
                            "</{closing}> closes <{open}>"
                        )));
                    }
                    None => {
                        return Err(ParseError::MalformedBlock(format!(
                            "</{closing}> without opening tag"
                        )));
                    }
                }
            } else {
                if section.is_some() {
                    return Err(ParseError::MalformedBlock(format!(
                        "<{tag}> opened inside another section"
                    )));
                }
                if !INLINE_SECTIONS.contains(&tag) {
                    return Err(ParseError::MalformedBlock(format!(
                        "unknown inline section <{tag}>"
                    )));
                }
                section = Some(tag.to_string());
            }
            continue;
        }

        if section.is_some() {
            section_body.push_str(line);
            section_body.push('\n');
            continue;
        }

        let mut parts = line.split_whitespace();
        let Some(directive) = parts.next() else {
            continue;
        };
        let args: Vec<&str> = parts.collect();
        apply_directive(&mut profile, directive, &args)?;
    }

    if let Some(open) = section {
        return Err(ParseError::MalformedBlock(format!("<{open}> never closed")));
    }

    Ok(profile)
}

fn apply_section(profile: &mut VpnProfile, section: &str, body: String) {
    match section {
        "ca" => profile.ca = Some(body),
        "cert" => profile.cert = Some(body),
        "key" => profile.key = Some(body),
        _ => unreachable!("section names are checked at the opening tag"),
    }
}

fn apply_directive(
    profile: &mut VpnProfile,
    directive: &str,
    args: &[&str],
) -> Result<(), ParseError> {
    match directive.to_ascii_lowercase().as_str() {
        "remote" => {
            let Some(host) = args.first() else {
                return Err(ParseError::BadEndpoint);
            };
            let port = match args.get(1) {
                Some(value) => parse_port("remote", value)?,
                None => profile.default_port,
            };
            profile.remotes.push(Remote {
                host: (*host).to_string(),
                port,
            });
        }
        "port" => {
            let value = args.first().copied().unwrap_or("");
            profile.default_port = parse_port("port", value)?;
        }
        "proto" => {
            let value = args.first().copied().unwrap_or("");
            profile.transport = Transport::parse(value)?;
        }
        "dev" => {
            if let Some(dev) = args.first() {
                profile.device = (*dev).to_string();
            }
        }
        "cipher" => profile.cipher = args.first().map(|s| (*s).to_string()),
        "auth" => profile.auth_digest = args.first().map(|s| (*s).to_string()),
        "tls-version-min" => profile.tls_version_min = args.first().map(|s| (*s).to_string()),
        "remote-cert-eku" => {
            let joined = args.join(" ");
            profile.remote_cert_eku = Some(joined.trim_matches('"').to_string());
        }
        "auth-user-pass" => {
            profile.auth_user_pass = match args.first() {
                Some(path) => AuthUserPass::File((*path).to_string()),
                None => AuthUserPass::Prompt,
            };
        }
        "keepalive" => {
            if args.len() >= 2 {
                let interval = parse_number("keepalive", args[0])?;
                let timeout = parse_number("keepalive", args[1])?;
                profile.keepalive = Some((interval, timeout));
            }
        }
        "verb" => {
            if let Some(value) = args.first() {
                profile.verb = parse_number("verb", value)?;
            }
        }
        "mute" => {
            if let Some(value) = args.first() {
                profile.mute = Some(parse_number("mute", value)?);
            }
        }
        "reneg-sec" => {
            if let Some(value) = args.first() {
                profile.reneg_sec = Some(parse_number("reneg-sec", value)?);
            }
        }
        "comp-lzo" => {
            profile.comp_lzo = Some(args.first().map_or("adaptive", |s| *s).to_string());
        }
        "float" => profile.float = true,
        "nobind" => profile.nobind = true,
        "persist-key" => profile.persist_key = true,
        "persist-tun" => profile.persist_tun = true,
        "mute-replay-warnings" => profile.mute_replay_warnings = true,
        // Expected in every client configuration; implied on export.
        "client" => {}
        other => {
            let value = args.join(" ");
            match profile.extras.iter_mut().find(|(k, _)| k == other) {
                Some((_, existing)) => *existing = value,
                None => profile.extras.push((other.to_string(), value)),
            }
        }
    }

    Ok(())
}

fn parse_number(directive: &str, value: &str) -> Result<u32, ParseError> {
    value.parse::<u32>().map_err(|_| ParseError::BadNumber {
        directive: directive.to_string(),
        value: value.to_string(),
    })
}

fn parse_port(directive: &str, value: &str) -> Result<u16, ParseError> {
    value.parse::<u16>().map_err(|_| ParseError::BadNumber {
        directive: directive.to_string(),
        value: value.to_string(),
    })
}

/// Render a profile back to `.ovpn` text.
///
/// A parse→render cycle preserves the recognized-directive set and the
/// ordered remote endpoint list.
#[must_use]
pub fn render_profile(profile: &VpnProfile) -> String {
    let mut out = String::with_capacity(1024);

    let _ = writeln!(out, "# Generated by {} v{}", constants::APP_NAME, constants::APP_VERSION);
    let _ = writeln!(out, "# Profile: {}", profile.name);
    let _ = writeln!(
        out,
        "# Created: {}\n",
        profile.created_at.format("%Y-%m-%d %H:%M:%S")
    );

    out.push_str("client\n");
    let _ = writeln!(out, "dev {}", profile.device);
    let _ = writeln!(out, "proto {}", profile.transport);
    if profile.default_port != 1194 {
        let _ = writeln!(out, "port {}", profile.default_port);
    }

    for remote in &profile.remotes {
        let _ = writeln!(out, "remote {} {}", remote.host, remote.port);
    }

    if let Some(cipher) = &profile.cipher {
        let _ = writeln!(out, "cipher {cipher}");
    }
    if let Some(auth) = &profile.auth_digest {
        let _ = writeln!(out, "auth {auth}");
    }
    if let Some(tls) = &profile.tls_version_min {
        let _ = writeln!(out, "tls-version-min {tls}");
    }
    if let Some(eku) = &profile.remote_cert_eku {
        let _ = writeln!(out, "remote-cert-eku \"{eku}\"");
    }
    if let Some((interval, timeout)) = profile.keepalive {
        let _ = writeln!(out, "keepalive {interval} {timeout}");
    }
    if profile.verb != 3 {
        let _ = writeln!(out, "verb {}", profile.verb);
    }
    if let Some(mute) = profile.mute {
        let _ = writeln!(out, "mute {mute}");
    }
    if let Some(reneg) = profile.reneg_sec {
        let _ = writeln!(out, "reneg-sec {reneg}");
    }

    if profile.float {
        out.push_str("float\n");
    }
    if profile.nobind {
        out.push_str("nobind\n");
    }
    if profile.persist_key {
        out.push_str("persist-key\n");
    }
    if profile.persist_tun {
        out.push_str("persist-tun\n");
    }
    if profile.mute_replay_warnings {
        out.push_str("mute-replay-warnings\n");
    }

    match &profile.auth_user_pass {
        AuthUserPass::None => {}
        AuthUserPass::Prompt => out.push_str("auth-user-pass\n"),
        AuthUserPass::File(path) => {
            let _ = writeln!(out, "auth-user-pass {path}");
        }
    }

    if let Some(comp) = &profile.comp_lzo {
        if comp == "adaptive" {
            out.push_str("comp-lzo\n");
        } else {
            let _ = writeln!(out, "comp-lzo {comp}");
        }
    }

    for (directive, value) in &profile.extras {
        if value.is_empty() {
            let _ = writeln!(out, "{directive}");
        } else {
            let _ = writeln!(out, "{directive} {value}");
        }
    }

    for (tag, body) in [("ca", &profile.ca), ("cert", &profile.cert), ("key", &profile.key)] {
        if let Some(body) = body {
            let _ = writeln!(out, "<{tag}>\n{}\n</{tag}>", body.trim_end());
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAKE_PEM: &str = "-----BEGIN CERTIFICATE-----\nMIIDqzCCApOgAwIB\n-----END CERTIFICATE-----";

    fn parse(content: &str) -> VpnProfile {
        parse_profile(content, "test_1", "test", "test.ovpn").unwrap()
    }

    #[test]
    fn test_parse_minimal_client_config() {
        let profile = parse(
            "client\ndev tun\nproto udp\nremote vpn.example.com 1194\n",
        );
        assert_eq!(profile.transport, Transport::Udp);
        assert_eq!(profile.device, "tun");
        assert_eq!(
            profile.remotes,
            vec![Remote {
                host: "vpn.example.com".into(),
                port: 1194
            }]
        );
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let profile = parse(
            "# leading comment\n; alt comment\n\nclient\nremote 10.0.0.1 443\n",
        );
        assert_eq!(profile.remotes.len(), 1);
        assert!(profile.extras.is_empty());
    }

    #[test]
    fn test_remote_inherits_current_default_port() {
        let profile = parse("port 443\nremote a.example.com\nremote b.example.com 1194\n");
        assert_eq!(profile.remotes[0].port, 443);
        assert_eq!(profile.remotes[1].port, 1194);
    }

    #[test]
    fn test_remote_before_port_directive_uses_initial_default() {
        let profile = parse("remote a.example.com\nport 443\nremote b.example.com\n");
        assert_eq!(profile.remotes[0].port, 1194);
        assert_eq!(profile.remotes[1].port, 443);
    }

    #[test]
    fn test_inline_sections_captured() {
        let config = format!("client\nremote x 1194\n<ca>\n{FAKE_PEM}\n</ca>\n");
        let profile = parse(&config);
        let ca = profile.ca.unwrap();
        assert!(ca.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(ca.contains("MIIDqzCCApOgAwIB"));
    }

    #[test]
    fn test_unbalanced_section_is_malformed() {
        let err = parse_profile("<ca>\nAAAA\n", "i", "n", "f").unwrap_err();
        assert!(matches!(err, ParseError::MalformedBlock(_)));
    }

    #[test]
    fn test_mismatched_closing_tag_is_malformed() {
        let err = parse_profile("<ca>\nAAAA\n</cert>\n", "i", "n", "f").unwrap_err();
        assert!(matches!(err, ParseError::MalformedBlock(_)));
    }

    #[test]
    fn test_unknown_section_is_malformed() {
        let err = parse_profile("<tls-auth>\nAAAA\n</tls-auth>\n", "i", "n", "f").unwrap_err();
        assert!(matches!(err, ParseError::MalformedBlock(_)));
    }

    #[test]
    fn test_remote_without_host_is_bad_endpoint() {
        let err = parse_profile("remote\n", "i", "n", "f").unwrap_err();
        assert_eq!(err, ParseError::BadEndpoint);
    }

    #[test]
    fn test_bad_port_number() {
        let err = parse_profile("port eleven\n", "i", "n", "f").unwrap_err();
        assert!(matches!(err, ParseError::BadNumber { .. }));
        let err = parse_profile("port 70000\n", "i", "n", "f").unwrap_err();
        assert!(matches!(err, ParseError::BadNumber { .. }));
        let err = parse_profile("remote host 70000\n", "i", "n", "f").unwrap_err();
        assert!(matches!(err, ParseError::BadNumber { .. }));
    }

    #[test]
    fn test_unsupported_protocol() {
        let err = parse_profile("proto sctp\n", "i", "n", "f").unwrap_err();
        assert_eq!(err, ParseError::UnsupportedProtocol("sctp".into()));
    }

    #[test]
    fn test_auth_user_pass_modes() {
        assert_eq!(parse("auth-user-pass\n").auth_user_pass, AuthUserPass::Prompt);
        assert_eq!(
            parse("auth-user-pass /etc/vpn/creds\n").auth_user_pass,
            AuthUserPass::File("/etc/vpn/creds".into())
        );
        assert_eq!(parse("client\n").auth_user_pass, AuthUserPass::None);
    }

    #[test]
    fn test_bare_comp_lzo_defaults_to_adaptive() {
        assert_eq!(parse("comp-lzo\n").comp_lzo.as_deref(), Some("adaptive"));
        assert_eq!(parse("comp-lzo no\n").comp_lzo.as_deref(), Some("no"));
    }

    #[test]
    fn test_flags_and_numerics() {
        let profile = parse(
            "float\nnobind\npersist-key\npersist-tun\nmute-replay-warnings\n\
             keepalive 10 60\nverb 4\nmute 20\nreneg-sec 3600\n",
        );
        assert!(profile.float && profile.nobind);
        assert!(profile.persist_key && profile.persist_tun && profile.mute_replay_warnings);
        assert_eq!(profile.keepalive, Some((10, 60)));
        assert_eq!(profile.verb, 4);
        assert_eq!(profile.mute, Some(20));
        assert_eq!(profile.reneg_sec, Some(3600));
    }

    #[test]
    fn test_unknown_directives_retained_in_order() {
        let profile = parse(
            "resolv-retry infinite\nremote-cert-tls server\npull\nresolv-retry 5\n",
        );
        assert_eq!(
            profile.extras,
            vec![
                ("resolv-retry".to_string(), "5".to_string()),
                ("remote-cert-tls".to_string(), "server".to_string()),
                ("pull".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_remote_cert_eku_quotes_stripped() {
        let profile = parse("remote-cert-eku \"TLS Web Server Authentication\"\n");
        assert_eq!(
            profile.remote_cert_eku.as_deref(),
            Some("TLS Web Server Authentication")
        );
    }

    #[test]
    fn test_render_parse_round_trip() {
        let config = format!(
            "client\ndev tun\nproto tcp-client\nport 443\n\
             remote a.example.com\nremote b.example.com 1194\n\
             cipher AES-256-GCM\nauth SHA256\ntls-version-min 1.2\n\
             remote-cert-eku \"TLS Web Server Authentication\"\n\
             keepalive 10 60\nverb 4\nmute 20\nreneg-sec 3600\n\
             float\nnobind\npersist-key\npersist-tun\nmute-replay-warnings\n\
             auth-user-pass /etc/vpn/creds\ncomp-lzo\n\
             resolv-retry infinite\nremote-cert-tls server\n\
             <ca>\n{FAKE_PEM}\n</ca>\n<cert>\n{FAKE_PEM}\n</cert>\n"
        );

        let first = parse(&config);
        let rendered = render_profile(&first);
        let second = parse_profile(&rendered, &first.id, &first.name, &first.source_file).unwrap();

        assert_eq!(second.remotes, first.remotes);
        assert_eq!(second.transport, first.transport);
        assert_eq!(second.device, first.device);
        assert_eq!(second.default_port, first.default_port);
        assert_eq!(second.cipher, first.cipher);
        assert_eq!(second.auth_digest, first.auth_digest);
        assert_eq!(second.tls_version_min, first.tls_version_min);
        assert_eq!(second.remote_cert_eku, first.remote_cert_eku);
        assert_eq!(second.keepalive, first.keepalive);
        assert_eq!(second.verb, first.verb);
        assert_eq!(second.mute, first.mute);
        assert_eq!(second.reneg_sec, first.reneg_sec);
        assert_eq!(second.float, first.float);
        assert_eq!(second.nobind, first.nobind);
        assert_eq!(second.persist_key, first.persist_key);
        assert_eq!(second.persist_tun, first.persist_tun);
        assert_eq!(second.mute_replay_warnings, first.mute_replay_warnings);
        assert_eq!(second.auth_user_pass, first.auth_user_pass);
        assert_eq!(second.comp_lzo, first.comp_lzo);
        assert_eq!(second.extras, first.extras);
        assert_eq!(second.ca.as_deref().map(str::trim), first.ca.as_deref().map(str::trim));
        assert_eq!(
            second.cert.as_deref().map(str::trim),
            first.cert.as_deref().map(str::trim)
        );
    }

    #[test]
    fn test_render_emits_sections_in_ca_cert_key_order() {
        let config = format!(
            "client\nremote x 1194\n<key>\n{FAKE_PEM}\n</key>\n<ca>\n{FAKE_PEM}\n</ca>\n"
        );
        let rendered = render_profile(&parse(&config));
        let ca_pos = rendered.find("<ca>").unwrap();
        let key_pos = rendered.find("<key>").unwrap();
        assert!(ca_pos < key_pos);
    }
}
