//! Launch-on-login management for `--autostart enable|disable`.
//!
//! Linux follows the XDG autostart spec with a desktop entry; Windows uses
//! the per-user Run registry key. Other platforms are not supported.

use anyhow::Result;

#[cfg(target_os = "linux")]
pub use linux::set_autostart;
#[cfg(windows)]
pub use windows::set_autostart;

#[cfg(not(any(target_os = "linux", windows)))]
pub fn set_autostart(_enable: bool) -> Result<()> {
    anyhow::bail!("autostart is not supported on this platform, use a service manager instead")
}

#[cfg(target_os = "linux")]
mod linux {
    use std::path::PathBuf;

    use anyhow::{Context, Result};

    use crate::paths::executable_path;

    const ENTRY_FILE_NAME: &str = "localsend-switch.desktop";

    fn desktop_entry(exec: &str) -> String {
        format!(
            "[Desktop Entry]\n\
             Type=Application\n\
             Name=LocalSend Switch\n\
             Exec={exec}\n\
             X-GNOME-Autostart-enabled=true\n\
             NoDisplay=true\n\
             Comment=Auto start LocalSend Switch on login\n\
             Terminal=false\n"
        )
    }

    fn autostart_dir() -> Result<PathBuf> {
        let config_dir = std::env::var_os("XDG_CONFIG_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
            .context("neither XDG_CONFIG_HOME nor HOME is set")?;
        Ok(config_dir.join("autostart"))
    }

    pub fn set_autostart(enable: bool) -> Result<()> {
        let dir = autostart_dir()?;
        let entry_path = dir.join(ENTRY_FILE_NAME);
        if enable {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            let exe = executable_path().context("failed to resolve executable path")?;
            std::fs::write(&entry_path, desktop_entry(&exe.display().to_string()))
                .with_context(|| format!("failed to write {}", entry_path.display()))?;
        } else if entry_path.exists() {
            std::fs::remove_file(&entry_path)
                .with_context(|| format!("failed to remove {}", entry_path.display()))?;
        }
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn desktop_entry_embeds_the_executable() {
            let entry = desktop_entry("/usr/local/bin/lsswitchd");
            assert!(entry.starts_with("[Desktop Entry]\n"));
            assert!(entry.contains("Exec=/usr/local/bin/lsswitchd\n"));
            assert!(entry.contains("X-GNOME-Autostart-enabled=true\n"));
        }
    }
}

#[cfg(windows)]
mod windows {
    use anyhow::{Context, Result};
    use winreg::enums::HKEY_CURRENT_USER;
    use winreg::RegKey;

    use crate::paths::executable_path;

    const RUN_KEY_PATH: &str = r"Software\Microsoft\Windows\CurrentVersion\Run";
    const VALUE_NAME: &str = "LocalSendSwitchboard";

    pub fn set_autostart(enable: bool) -> Result<()> {
        let hkcu = RegKey::predef(HKEY_CURRENT_USER);
        let (key, _) = hkcu
            .create_subkey(RUN_KEY_PATH)
            .context("failed to open autostart registry key")?;
        if enable {
            let exe = executable_path().context("failed to resolve executable path")?;
            key.set_value(VALUE_NAME, &exe.display().to_string())
                .context("failed to set autostart registry value")?;
        } else {
            match key.delete_value(VALUE_NAME) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(
                        anyhow::Error::new(err).context("failed to delete autostart registry value")
                    )
                }
            }
        }
        Ok(())
    }
}
