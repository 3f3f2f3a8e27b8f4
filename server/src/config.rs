//! Server-Konfiguration
//!
//! Wird vollstaendig aus Umgebungsvariablen gelesen; alle Felder haben
//! Standardwerte, sodass der Server ohne Umgebung lauffaehig ist.
//!
//! | Variable | Standard |
//! |---|---|
//! | `LINKDAVE_WS_PORT` | `:8080` |
//! | `LINKDAVE_HTTP_PORT` | `:8081` |
//! | `LINKDAVE_SOURCE_HTTP_ENABLED` | `false` |
//! | `LINKDAVE_SOURCE_HTTPS_ENABLED` | `true` |
//! | `LINKDAVE_SOURCE_IP_ADDRESS_PUBLIC_ENABLED` | `false` |
//! | `LINKDAVE_SOURCE_IP_ADDRESS_PRIVATE_ENABLED` | `false` |
//! | `LINKDAVE_LOG_LEVEL` | `info` |
//! | `LINKDAVE_LOG_FORMAT` | `text` |

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone)]
pub struct ServerKonfig {
    /// WS-Port im `:8080`-Format oder als volle Adresse
    pub ws_port: String,
    /// HTTP-Port fuer /health und /stats
    pub http_port: String,
    /// `http://`-Quellen erlauben
    pub quelle_http: bool,
    /// `https://`-Quellen erlauben
    pub quelle_https: bool,
    /// Quellen mit oeffentlicher Zieladresse erlauben
    pub quelle_ip_public: bool,
    /// Quellen mit privater Zieladresse erlauben
    pub quelle_ip_private: bool,
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub log_level: String,
    /// Log-Format: "json" oder "text"
    pub log_format: String,
}

impl Default for ServerKonfig {
    fn default() -> Self {
        Self {
            ws_port: ":8080".into(),
            http_port: ":8081".into(),
            quelle_http: false,
            quelle_https: true,
            quelle_ip_public: false,
            quelle_ip_private: false,
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl ServerKonfig {
    /// Liest die Konfiguration aus der Umgebung, fehlende Werte bleiben Standard
    pub fn aus_umgebung() -> Self {
        let standard = Self::default();
        Self {
            ws_port: env_oder("LINKDAVE_WS_PORT", &standard.ws_port),
            http_port: env_oder("LINKDAVE_HTTP_PORT", &standard.http_port),
            quelle_http: env_bool("LINKDAVE_SOURCE_HTTP_ENABLED", standard.quelle_http),
            quelle_https: env_bool("LINKDAVE_SOURCE_HTTPS_ENABLED", standard.quelle_https),
            quelle_ip_public: env_bool(
                "LINKDAVE_SOURCE_IP_ADDRESS_PUBLIC_ENABLED",
                standard.quelle_ip_public,
            ),
            quelle_ip_private: env_bool(
                "LINKDAVE_SOURCE_IP_ADDRESS_PRIVATE_ENABLED",
                standard.quelle_ip_private,
            ),
            log_level: env_oder("LINKDAVE_LOG_LEVEL", &standard.log_level),
            log_format: env_oder("LINKDAVE_LOG_FORMAT", &standard.log_format),
        }
    }

    /// Vollstaendige Bind-Adresse des WS-Listeners
    pub fn ws_bind_adresse(&self) -> String {
        bind_adresse(&self.ws_port)
    }

    /// Vollstaendige Bind-Adresse des HTTP-Listeners
    pub fn http_bind_adresse(&self) -> String {
        bind_adresse(&self.http_port)
    }
}

/// `:8080` wird zu `0.0.0.0:8080`; volle Adressen bleiben unveraendert
fn bind_adresse(port: &str) -> String {
    if let Some(rest) = port.strip_prefix(':') {
        return format!("0.0.0.0:{rest}");
    }
    if port.contains(':') {
        return port.to_string();
    }
    format!("0.0.0.0:{port}")
}

fn env_oder(name: &str, standard: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| standard.to_string())
}

fn env_bool(name: &str, standard: bool) -> bool {
    match std::env::var(name) {
        Ok(wert) => matches!(wert.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => standard,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_konfig() {
        let konfig = ServerKonfig::default();
        assert_eq!(konfig.ws_port, ":8080");
        assert_eq!(konfig.http_port, ":8081");
        assert!(!konfig.quelle_http);
        assert!(konfig.quelle_https);
        assert_eq!(konfig.log_level, "info");
    }

    #[test]
    fn bind_adressen_formate() {
        assert_eq!(bind_adresse(":8080"), "0.0.0.0:8080");
        assert_eq!(bind_adresse("9000"), "0.0.0.0:9000");
        assert_eq!(bind_adresse("127.0.0.1:7000"), "127.0.0.1:7000");
    }

    #[test]
    fn env_bool_wertetabelle() {
        let name = "LINKDAVE_TEST_BOOL_WERT";
        for (wert, erwartet) in [
            ("1", true),
            ("true", true),
            ("YES", true),
            ("on", true),
            ("0", false),
            ("false", false),
            ("quatsch", false),
        ] {
            std::env::set_var(name, wert);
            assert_eq!(env_bool(name, !erwartet), erwartet, "Wert {wert}");
        }
        std::env::remove_var(name);
        assert!(env_bool(name, true), "Ohne Variable gilt der Standard");
        assert!(!env_bool(name, false));
    }
}
