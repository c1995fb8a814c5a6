use rt_infra::shell;

use crate::config_files::conf_value;
use crate::settings::{Bootstrap, Settings};
use crate::{Error, Result};

const DEFAULT_AUTH_PORT: u16 = 1812;
const DEFAULT_ACCT_PORT: u16 = 1813;

/// Parameters of the FreeRADIUS install script.
///
/// The rendered script binds every parameter to a shell variable through
/// [`shell::quote`] and only ever expands those variables, so no value is
/// spliced into the script text. It is fed to `bash -s` on stdin and can be
/// re-run on a host that is already installed.
#[derive(Clone)]
pub struct InstallScript {
    shared_secret: String,
    auth_port: u16,
    acct_port: u16,
    nas_block: String,
    clients_conf: String,
    bootstrap: Option<Bootstrap>,
}

impl std::fmt::Debug for InstallScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallScript")
            .field("auth_port", &self.auth_port)
            .field("acct_port", &self.acct_port)
            .field("nas_block", &self.nas_block)
            .finish_non_exhaustive()
    }
}

impl InstallScript {
    pub fn new(shared_secret: &str, auth_port: i32, acct_port: i32, settings: &Settings) -> Result<Self> {
        if shared_secret.is_empty() {
            return Err(Error::configuration("shared secret is empty"));
        }
        if shell::has_control_chars(shared_secret) {
            return Err(Error::configuration("shared secret contains control characters"));
        }
        let auth_port = port(auth_port, "auth")?;
        let acct_port = port(acct_port, "accounting")?;
        if auth_port == acct_port {
            return Err(Error::configuration(format!(
                "auth and accounting ports must differ (both {auth_port})"
            )));
        }

        Ok(Self {
            shared_secret: shared_secret.to_string(),
            auth_port,
            acct_port,
            nas_block: settings.layout.nas_block.clone(),
            clients_conf: settings.layout.active_clients.clone(),
            bootstrap: settings.bootstrap.clone(),
        })
    }

    pub fn shared_secret(&self) -> &str {
        &self.shared_secret
    }

    pub fn render(&self) -> String {
        let mut script = String::from("#!/bin/bash\nset -euo pipefail\n\n");

        let mut vars = vec![
            ("RADIUS_SECRET", conf_value(&self.shared_secret)),
            ("AUTH_PORT", self.auth_port.to_string()),
            ("ACCT_PORT", self.acct_port.to_string()),
            ("NAS_BLOCK", self.nas_block.clone()),
            ("CLIENTS_CONF", self.clients_conf.clone()),
        ];
        if let Some(bootstrap) = &self.bootstrap {
            let repo = bootstrap.repo_url.trim_end_matches('/');
            vars.push(("BOOTSTRAP_REPO", repo.to_string()));
            vars.push(("BOOTSTRAP_BRANCH", bootstrap.branch.clone()));
            vars.push((
                "BOOTSTRAP_URL",
                format!(
                    "{}/raw/{}/radtik-radius/bootstrap-install.sh",
                    repo.trim_end_matches(".git"),
                    bootstrap.branch
                ),
            ));
        }
        for (name, value) in &vars {
            script.push_str(&format!("{name}={}\n", shell::quote(value)));
        }

        // Parsed as one function before anything runs, with stdin detached,
        // so nothing the script starts can read the rest of it.
        script.push_str(BODY_START);
        script.push_str(&format!(
            "    if [ \"$AUTH_PORT\" != \"{DEFAULT_AUTH_PORT}\" ] || [ \"$ACCT_PORT\" != \"{DEFAULT_ACCT_PORT}\" ]; then\n\
             \x20       sed -i \"s/port = {DEFAULT_AUTH_PORT}/port = $AUTH_PORT/\" /etc/freeradius/3.0/sites-enabled/default\n\
             \x20       sed -i \"s/port = {DEFAULT_ACCT_PORT}/port = $ACCT_PORT/\" /etc/freeradius/3.0/sites-enabled/default\n\
             \x20   fi\n\n"
        ));
        script.push_str(SERVICES_AND_FIREWALL);
        if self.bootstrap.is_some() {
            script.push_str(BOOTSTRAP);
        }
        script.push_str(BODY_END);
        script
    }
}

fn port(value: i32, which: &str) -> Result<u16> {
    u16::try_from(value)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| Error::configuration(format!("invalid {which} port {value}")))
}

const BODY_START: &str = r#"
install_radius() {
    export DEBIAN_FRONTEND=noninteractive

    echo "==> Updating system packages"
    apt-get update
    apt-get upgrade -y

    echo "==> Installing FreeRADIUS"
    apt-get install -y freeradius freeradius-utils
    systemctl stop freeradius || true

    echo "==> Writing $CLIENTS_CONF"
    cat > "$CLIENTS_CONF" <<EOF
client localhost {
    ipaddr = 127.0.0.1
    secret = ${RADIUS_SECRET}
}

client ${NAS_BLOCK} {
    ipaddr = 0.0.0.0/0
    secret = ${RADIUS_SECRET}
    shortname = ${NAS_BLOCK}
    nastype = other
}
EOF
    chown root:freerad "$CLIENTS_CONF"
    chmod 640 "$CLIENTS_CONF"

"#;

const SERVICES_AND_FIREWALL: &str = r#"    echo "==> Enabling FreeRADIUS"
    systemctl enable freeradius
    systemctl restart freeradius

    echo "==> Opening firewall ports"
    ufw allow "$AUTH_PORT/udp"
    ufw allow "$ACCT_PORT/udp"
    ufw allow 22/tcp
    ufw --force enable

"#;

const BOOTSTRAP: &str = r#"    echo "==> Installing RADIUS API from $BOOTSTRAP_REPO ($BOOTSTRAP_BRANCH)"
    curl -fsSL "$BOOTSTRAP_URL" | RADTIK_REPO_URL="$BOOTSTRAP_REPO" RADTIK_BRANCH="$BOOTSTRAP_BRANCH" bash

"#;

const BODY_END: &str = r#"    echo "==> Validating configuration"
    freeradius -XC

    echo "FreeRADIUS installation completed successfully!"
}

install_radius < /dev/null
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn script(secret: &str, auth: i32, acct: i32) -> Result<InstallScript> {
        InstallScript::new(secret, auth, acct, &Settings::default())
    }

    #[test]
    fn values_are_bound_through_quoting() {
        let rendered = script("it's $(reboot)", 1812, 1813).unwrap().render();
        assert!(rendered.contains(r#"RADIUS_SECRET='"it'\''s $(reboot)"'"#), "{rendered}");
        assert!(rendered.contains("AUTH_PORT='1812'\n"));
        assert!(rendered.contains("CLIENTS_CONF='/etc/freeradius/3.0/clients.conf'\n"));
        // The secret never appears outside its assignment.
        assert_eq!(rendered.matches("reboot").count(), 1);
    }

    #[test]
    fn script_covers_every_install_phase() {
        let rendered = script("s3cr3t", 1812, 1813).unwrap().render();
        for step in [
            "apt-get update",
            "apt-get install -y freeradius freeradius-utils",
            "client ${NAS_BLOCK} {",
            "systemctl enable freeradius",
            "ufw --force enable",
            "freeradius -XC",
            "install_radius < /dev/null",
        ] {
            assert!(rendered.contains(step), "missing `{step}`");
        }
        assert!(rendered.contains(
            "BOOTSTRAP_URL='https://github.com/ahmadfoysal/radtik-radius/raw/main/radtik-radius/bootstrap-install.sh'"
        ));
    }

    #[test]
    fn bootstrap_can_be_disabled() {
        let settings = Settings {
            bootstrap: None,
            ..Settings::default()
        };
        let rendered = InstallScript::new("s3cr3t", 1812, 1813, &settings).unwrap().render();
        assert!(!rendered.contains("BOOTSTRAP"));
        assert!(!rendered.contains("curl"));
    }

    #[test]
    fn custom_ports_are_applied() {
        let rendered = script("s3cr3t", 11812, 11813).unwrap().render();
        assert!(rendered.contains("AUTH_PORT='11812'"));
        assert!(rendered.contains(r#"sed -i "s/port = 1812/port = $AUTH_PORT/""#));
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        for (secret, auth, acct) in [
            ("line\nbreak", 1812, 1813),
            ("", 1812, 1813),
            ("ok", 0, 1813),
            ("ok", 1812, 70000),
            ("ok", 1812, 1812),
        ] {
            let err = script(secret, auth, acct).unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::Configuration, "{secret:?} {auth} {acct}");
        }
    }

    #[test]
    fn debug_output_hides_the_secret() {
        assert!(!format!("{:?}", script("s3cr3t", 1812, 1813).unwrap()).contains("s3cr3t"));
    }
}
