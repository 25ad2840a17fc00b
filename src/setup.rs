//! Writes the msmtp account file used by the default submission transport.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use secrecy::ExposeSecret;
use tracing::info;

use crate::config::{BridgeConfig, SMTPS_PORT};
use crate::error::ConfigError;

/// msmtp account text for `config`. Contains the password in clear.
///
/// TLS mode follows the port the same way the SMTP transport does:
/// implicit TLS on 465, STARTTLS anywhere else.
pub fn msmtp_config(config: &BridgeConfig) -> String {
    let starttls = if config.smtp_port == SMTPS_PORT { "off" } else { "on" };
    format!(
        "account default\n\
         host {host}\n\
         port {port}\n\
         auth on\n\
         tls on\n\
         tls_starttls {starttls}\n\
         user {user}\n\
         password {password}\n\
         from {user}\n\
         logfile {logfile}\n",
        host = config.smtp_host,
        port = config.smtp_port,
        user = config.email_user,
        password = config.email_password.expose_secret(),
        logfile = config.home_dir.join(".msmtp.log").display(),
    )
}

/// Write the msmtp account file to `path`, readable by the owner only.
///
/// The file is never readable by others while it holds the password: a new
/// file is created 0600, an existing one is narrowed before it is rewritten.
pub fn write_msmtp_config(config: &BridgeConfig, path: &Path) -> Result<(), ConfigError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

        options.mode(0o600);
        if path.exists() {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
    }

    let mut file = options.open(path)?;
    file.write_all(msmtp_config(config).as_bytes())?;
    file.flush()?;

    info!(path = %path.display(), "Wrote msmtp config");
    Ok(())
}
