use tracing::warn;

use taut_core::SessionSettings;

/// RPC credentials assembled from the environment. Never persisted; handed
/// to the RPC transport collaborator at startup.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct RpcAuth {
    /// HTTP Basic credentials.
    pub(crate) basic: Option<(String, String)>,
    /// Bearer token.
    pub(crate) token: Option<String>,
}

/// Apply the `TT_*` startup overrides to the recovered settings.
///
/// An explicit full override (`TT_PEER_INTERFACE`, `TT_RPC_BIND`) beats the
/// matching port-only one; absent variables preserve persisted values. The
/// lookup is injected so tests can run without touching the process
/// environment.
pub(crate) fn apply_env_overrides(
    settings: &mut SessionSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> RpcAuth {
    if let Some(interface) = lookup("TT_PEER_INTERFACE") {
        settings.listen_interface = interface;
    } else if let Some(port) = lookup("TT_PEER_PORT") {
        match port.parse::<u16>() {
            Ok(port) => {
                let host = settings
                    .listen_interface
                    .rsplit_once(':')
                    .map_or(settings.listen_interface.as_str(), |(host, _)| host);
                settings.listen_interface = format!("{host}:{port}");
            }
            Err(_) => warn!(port = %port, "ignoring unparseable TT_PEER_PORT"),
        }
    }

    if let Some(bind) = lookup("TT_RPC_BIND") {
        settings.rpc_bind = bind;
    } else if let Some(port) = lookup("TT_RPC_PORT") {
        match port.parse::<u16>() {
            Ok(port) => match replace_url_port(&settings.rpc_bind, port) {
                Some(bind) => settings.rpc_bind = bind,
                None => warn!(
                    bind = %settings.rpc_bind,
                    "cannot apply TT_RPC_PORT to persisted rpc bind"
                ),
            },
            Err(_) => warn!(port = %port, "ignoring unparseable TT_RPC_PORT"),
        }
    }

    let basic = match (
        lookup("TT_RPC_BASIC_USERNAME"),
        lookup("TT_RPC_BASIC_PASSWORD"),
    ) {
        (Some(username), Some(password)) => Some((username, password)),
        (Some(_), None) | (None, Some(_)) => {
            warn!("TT_RPC_BASIC_USERNAME and TT_RPC_BASIC_PASSWORD must both be set; ignoring");
            None
        }
        (None, None) => None,
    };

    RpcAuth {
        basic,
        token: lookup("TT_RPC_TOKEN"),
    }
}

/// Swap the port in a `scheme://host[:port][/path]` URL.
fn replace_url_port(url: &str, port: u16) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    let (authority, path) = match rest.split_once('/') {
        Some((authority, path)) => (authority, format!("/{path}")),
        None => (rest, String::new()),
    };
    let host = match authority.rsplit_once(':') {
        Some((host, old_port)) if old_port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => authority,
    };
    if host.is_empty() {
        return None;
    }
    Some(format!("{scheme}://{host}:{port}{path}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_in<'a>(vars: &'a HashMap<&'a str, &'a str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| vars.get(name).map(ToString::to_string)
    }

    #[test]
    fn absent_variables_preserve_persisted_values() {
        let mut settings = SessionSettings::default();
        let auth = apply_env_overrides(&mut settings, |_| None);
        assert_eq!(settings, SessionSettings::default());
        assert_eq!(auth, RpcAuth::default());
    }

    #[test]
    fn full_interface_override_beats_port_only() {
        let mut settings = SessionSettings::default();
        let vars = HashMap::from([
            ("TT_PEER_INTERFACE", "10.0.0.5:7000"),
            ("TT_PEER_PORT", "9999"),
        ]);
        apply_env_overrides(&mut settings, lookup_in(&vars));
        assert_eq!(settings.listen_interface, "10.0.0.5:7000");
    }

    #[test]
    fn peer_port_override_keeps_the_host() {
        let mut settings = SessionSettings::default();
        let vars = HashMap::from([("TT_PEER_PORT", "51413")]);
        apply_env_overrides(&mut settings, lookup_in(&vars));
        assert_eq!(settings.listen_interface, "0.0.0.0:51413");
    }

    #[test]
    fn rpc_port_override_rewrites_the_url() {
        let mut settings = SessionSettings::default();
        let vars = HashMap::from([("TT_RPC_PORT", "8080")]);
        apply_env_overrides(&mut settings, lookup_in(&vars));
        assert_eq!(settings.rpc_bind, "http://127.0.0.1:8080");

        settings.rpc_bind = "http://0.0.0.0:9091/transmission/rpc".into();
        apply_env_overrides(&mut settings, lookup_in(&vars));
        assert_eq!(settings.rpc_bind, "http://0.0.0.0:8080/transmission/rpc");
    }

    #[test]
    fn bad_port_values_are_ignored() {
        let mut settings = SessionSettings::default();
        let vars = HashMap::from([("TT_PEER_PORT", "not-a-port"), ("TT_RPC_PORT", "70000")]);
        apply_env_overrides(&mut settings, lookup_in(&vars));
        assert_eq!(settings, SessionSettings::default());
    }

    #[test]
    fn auth_requires_both_basic_halves() {
        let mut settings = SessionSettings::default();
        let vars = HashMap::from([("TT_RPC_BASIC_USERNAME", "admin")]);
        let auth = apply_env_overrides(&mut settings, lookup_in(&vars));
        assert_eq!(auth.basic, None);

        let vars = HashMap::from([
            ("TT_RPC_BASIC_USERNAME", "admin"),
            ("TT_RPC_BASIC_PASSWORD", "hunter2"),
            ("TT_RPC_TOKEN", "sekrit"),
        ]);
        let auth = apply_env_overrides(&mut settings, lookup_in(&vars));
        assert_eq!(auth.basic, Some(("admin".into(), "hunter2".into())));
        assert_eq!(auth.token.as_deref(), Some("sekrit"));
    }

    #[test]
    fn url_port_replacement_handles_paths_and_bare_hosts() {
        assert_eq!(
            replace_url_port("http://localhost", 81).as_deref(),
            Some("http://localhost:81")
        );
        assert_eq!(
            replace_url_port("https://host:443/a/b", 8443).as_deref(),
            Some("https://host:8443/a/b")
        );
        assert_eq!(replace_url_port("no-scheme", 80), None);
    }
}
