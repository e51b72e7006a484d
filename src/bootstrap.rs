//! Payloads that turn a fresh cloud machine into a container host.
//!
//! Scaleway consumes a `#cloud-config` document on first boot, while
//! DigitalOcean droplets are bootstrapped over SSH with a shell script. Both
//! install the same systemd drop-in so the daemon listens on the runtime port
//! alongside its local socket.

use shell_escape::unix::escape;

/// Location of the systemd drop-in that rewrites the daemon command line.
pub const DAEMON_OVERRIDE_PATH: &str = "/etc/systemd/system/docker.service.d/skiff.conf";

/// Install script fetched when the image does not ship the daemon.
const INSTALL_SCRIPT_URL: &str = "https://get.docker.com";

/// Returns the systemd drop-in that exposes the daemon on `port`.
#[must_use]
pub fn daemon_override(port: u16) -> String {
    format!(
        "[Service]\nExecStart=\nExecStart=/usr/bin/dockerd -H fd:// -H tcp://0.0.0.0:{port}\n"
    )
}

/// Returns cloud-init user-data that installs the daemon and exposes it on
/// `port`.
#[must_use]
pub fn cloud_config(port: u16) -> String {
    let mut document = String::from(
        "#cloud-config\npackage_update: true\npackages:\n  - docker.io\n",
    );
    document.push_str("write_files:\n");
    document.push_str(&format!("  - path: {DAEMON_OVERRIDE_PATH}\n"));
    document.push_str("    permissions: '0644'\n");
    document.push_str("    content: |\n");
    for line in daemon_override(port).lines() {
        document.push_str("      ");
        document.push_str(line);
        document.push('\n');
    }
    document.push_str("runcmd:\n");
    document.push_str("  - systemctl daemon-reload\n");
    document.push_str("  - systemctl enable docker\n");
    document.push_str("  - systemctl restart docker\n");
    document
}

/// Returns a shell script that prepares a droplet as a container host.
///
/// When `install` is set the daemon is installed first; snapshot-based
/// droplets already carry it and only need the override refreshed.
#[must_use]
pub fn shell_script(port: u16, install: bool) -> String {
    let mut steps = vec![String::from("set -eu")];
    if install {
        steps.push(String::from("export DEBIAN_FRONTEND=noninteractive"));
        steps.push(String::from("apt-get update -q"));
        steps.push(String::from("apt-get install -y -q curl ca-certificates"));
        steps.push(format!("curl -fsSL {INSTALL_SCRIPT_URL} | sh"));
    }
    let override_dir = DAEMON_OVERRIDE_PATH
        .rsplit_once('/')
        .map_or(DAEMON_OVERRIDE_PATH, |(dir, _)| dir);
    steps.push(format!("mkdir -p {override_dir}"));
    steps.push(format!(
        "printf '%s' {} > {DAEMON_OVERRIDE_PATH}",
        escape(daemon_override(port).into())
    ));
    steps.push(String::from("systemctl daemon-reload"));
    steps.push(String::from("systemctl enable docker"));
    steps.push(String::from("systemctl restart docker"));
    steps.join(" && ")
}
