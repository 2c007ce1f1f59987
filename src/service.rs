use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

pub const LAUNCHD_LABEL: &str = "com.ccjournal.daemon";
pub const SYSTEMD_UNIT: &str = "ccjournal.service";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceManager {
    Launchd,
    Systemd,
}

impl ServiceManager {
    pub fn detect() -> Option<Self> {
        if cfg!(target_os = "macos") {
            Some(Self::Launchd)
        } else if cfg!(target_os = "linux") {
            Some(Self::Systemd)
        } else {
            None
        }
    }

    pub fn unit_path(self, user: bool) -> PathBuf {
        match (self, user) {
            (Self::Launchd, true) => home_dir()
                .join("Library")
                .join("LaunchAgents")
                .join(format!("{LAUNCHD_LABEL}.plist")),
            (Self::Launchd, false) => {
                PathBuf::from("/Library/LaunchDaemons").join(format!("{LAUNCHD_LABEL}.plist"))
            }
            (Self::Systemd, true) => home_dir()
                .join(".config")
                .join("systemd")
                .join("user")
                .join(SYSTEMD_UNIT),
            (Self::Systemd, false) => PathBuf::from("/etc/systemd/system").join(SYSTEMD_UNIT),
        }
    }

    pub fn render(self, exe: &Path, log_path: &Path) -> String {
        match self {
            Self::Launchd => launchd_plist(exe, log_path),
            Self::Systemd => systemd_unit(exe, log_path),
        }
    }

    pub fn activation_hint(self, unit_path: &Path, user: bool) -> Vec<String> {
        match self {
            Self::Launchd => vec![format!("launchctl load {}", unit_path.display())],
            Self::Systemd => {
                let systemctl = if user { "systemctl --user" } else { "sudo systemctl" };
                vec![
                    format!("{systemctl} daemon-reload"),
                    format!("{systemctl} enable ccjournal"),
                    format!("{systemctl} start ccjournal"),
                ]
            }
        }
    }
}

pub fn launchd_plist(exe: &Path, log_path: &Path) -> String {
    let exe = xml_escape(&exe.display().to_string());
    let log = xml_escape(&log_path.display().to_string());
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{LAUNCHD_LABEL}</string>
    <key>ProgramArguments</key>
    <array>
        <string>{exe}</string>
        <string>daemon</string>
        <string>start</string>
        <string>--foreground</string>
    </array>
    <key>RunAtLoad</key>
    <true/>
    <key>KeepAlive</key>
    <true/>
    <key>StandardOutPath</key>
    <string>{log}</string>
    <key>StandardErrorPath</key>
    <string>{log}</string>
</dict>
</plist>
"#
    )
}

pub fn systemd_unit(exe: &Path, log_path: &Path) -> String {
    let exe = exe.display();
    let log = log_path.display();
    format!(
        "[Unit]
Description=ccjournal - sync conversation logs to a Git repository
After=network.target

[Service]
Type=simple
ExecStart={exe} daemon start --foreground
Restart=on-failure
RestartSec=10
StandardOutput=append:{log}
StandardError=append:{log}

[Install]
WantedBy=default.target
"
    )
}

pub fn install(
    manager: ServiceManager,
    unit_path: &Path,
    exe: &Path,
    log_path: &Path,
    force: bool,
) -> Result<()> {
    if unit_path.exists() && !force {
        bail!(
            "service file already exists at {}; pass --force to overwrite",
            unit_path.display()
        );
    }
    for dir in [unit_path.parent(), log_path.parent()].into_iter().flatten() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }
    fs::write(unit_path, manager.render(exe, log_path))
        .with_context(|| format!("failed to write {}", unit_path.display()))
}

pub fn uninstall(unit_path: &Path) -> Result<bool> {
    if !unit_path.exists() {
        return Ok(false);
    }
    fs::remove_file(unit_path)
        .with_context(|| format!("failed to remove {}", unit_path.display()))?;
    Ok(true)
}

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}
