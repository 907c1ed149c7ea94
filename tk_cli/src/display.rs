//! Terminal rendering: install progress bars, add-on and software listings.

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tk_core::{AddonType, InstalledSoftware, Package};
use tk_io::{InstallProgress, ProgressCallback};

/// Progress styles used while software is downloaded and unpacked.
pub struct ProgressStyles {
    pub download: ProgressStyle,
    pub spinner: ProgressStyle,
    pub done: ProgressStyle,
}

impl Default for ProgressStyles {
    fn default() -> Self {
        Self {
            download: ProgressStyle::default_bar()
                .template(
                    "  {prefix:<20} {bar:30.green/dim} {bytes:>10}/{total_bytes:<10} {eta:>5}",
                )
                .unwrap()
                .progress_chars("=> "),
            spinner: ProgressStyle::default_spinner()
                .template("  {prefix:<20} {spinner:.green} {msg}")
                .unwrap()
                .tick_chars("|/-\\ "),
            done: ProgressStyle::default_spinner()
                .template("  {prefix:<20} {msg}")
                .unwrap(),
        }
    }
}

type Bars = Arc<Mutex<HashMap<String, ProgressBar>>>;

fn spinner(multi: &MultiProgress, style: &ProgressStyle, name: &str, message: &str) -> ProgressBar {
    let pb = multi.add(ProgressBar::new_spinner());
    pb.set_style(style.clone());
    pb.set_prefix(name.to_string());
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

/// Create a progress callback rendering software install events.
///
/// Downloads without a known length still get a bar, sized by the assumed
/// download size, since the events always carry a total.
pub fn create_progress_callback(
    multi: MultiProgress,
    styles: ProgressStyles,
    completion_message: &'static str,
) -> (Arc<ProgressCallback>, Bars) {
    let bars: Bars = Arc::new(Mutex::new(HashMap::new()));

    let bars_clone = bars.clone();
    let download_style = styles.download;
    let spinner_style = styles.spinner;
    let done_style = styles.done;

    let callback: Arc<ProgressCallback> = Arc::new(Box::new(move |event| {
        let mut bars = bars_clone.lock().unwrap();
        match event {
            InstallProgress::DownloadStarted {
                name, total_bytes, ..
            } => {
                let pb = multi.add(ProgressBar::new(total_bytes));
                pb.set_style(download_style.clone());
                pb.set_prefix(name.clone());
                bars.insert(name, pb);
            }
            InstallProgress::DownloadProgress {
                name,
                downloaded,
                total_bytes,
            } => {
                if let Some(pb) = bars.get(&name) {
                    pb.set_length(total_bytes);
                    pb.set_position(downloaded);
                }
            }
            InstallProgress::DownloadCompleted { name, total_bytes } => {
                if let Some(pb) = bars.get(&name) {
                    pb.set_length(total_bytes);
                    pb.set_position(total_bytes);
                    pb.set_style(spinner_style.clone());
                    pb.set_message("downloaded");
                    pb.enable_steady_tick(std::time::Duration::from_millis(80));
                }
            }
            InstallProgress::ExtractStarted { name } => {
                if let Some(pb) = bars.get(&name) {
                    pb.set_message("extracting...");
                } else {
                    let pb = spinner(&multi, &spinner_style, &name, "extracting...");
                    bars.insert(name, pb);
                }
            }
            InstallProgress::ExtractCompleted { name } => {
                if let Some(pb) = bars.get(&name) {
                    pb.set_message("extracted");
                }
            }
            InstallProgress::CopyStarted { name, total_files } => {
                let message = format!("copying 0/{total_files} files...");
                if let Some(pb) = bars.get(&name) {
                    pb.set_style(spinner_style.clone());
                    pb.set_message(message);
                } else {
                    let pb = spinner(&multi, &spinner_style, &name, &message);
                    bars.insert(name, pb);
                }
            }
            InstallProgress::CopyProgress {
                name,
                copied,
                total_files,
            } => {
                if let Some(pb) = bars.get(&name) {
                    pb.set_message(format!("copying {copied}/{total_files} files..."));
                }
            }
            InstallProgress::CopyCompleted { name } => {
                if let Some(pb) = bars.get(&name) {
                    pb.set_style(done_style.clone());
                    pb.set_message(format!("{} moved", style("✓").green()));
                    pb.finish();
                }
            }
            InstallProgress::InstallCompleted { name } => {
                if let Some(pb) = bars.get(&name) {
                    pb.set_style(done_style.clone());
                    pb.set_message(format!("{} {}", style("✓").green(), completion_message));
                    pb.finish();
                }
            }
        }
    }));

    (callback, bars)
}

/// Stop bars left running by an install that failed midway.
pub fn finish_progress_bars(bars: &Bars) {
    bars.lock()
        .unwrap()
        .values()
        .filter(|pb| !pb.is_finished())
        .for_each(ProgressBar::finish);
}

/// Add-on sizes in the manifest are bytes; show them in binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["KB", "MB", "GB"];

    if bytes < 1024 {
        return format!("{bytes} bytes");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

pub fn installed_marker(installed: bool) -> String {
    let marker = if installed {
        style("●").green()
    } else {
        style("○").yellow()
    };
    marker.to_string()
}

pub fn format_types(types: &[AddonType]) -> String {
    types
        .iter()
        .map(AddonType::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// One line of `tk list` output, without styling.
pub fn package_line(package: &Package) -> String {
    let title = package
        .info
        .display_name
        .as_deref()
        .filter(|d| *d != package.name)
        .map(|d| format!(" ({d})"))
        .unwrap_or_default();
    format!(
        "{} {}{} [{}]",
        package.name,
        package.info.version,
        title,
        format_types(&package.types)
    )
}

/// Print one software record with its executables.
pub fn print_software(software: &InstalledSoftware) {
    println!(
        "{} {}/{} {}",
        installed_marker(software.installed),
        style(&software.owner_name).dim(),
        style(&software.name).bold(),
        style(format!("({})", software.download_type)).dim()
    );
    if software.no_auto_install {
        println!("    {}", style("noAutoInstall").yellow());
    }
    for executable in &software.executables {
        println!(
            "    {:<16} {} {}",
            executable.name,
            executable.path,
            style(format!("[{} {}]", executable.os, executable.arch)).dim()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tk_core::PackageInfo;

    #[test]
    fn format_bytes_picks_unit() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(6_403_580), "6.1 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn package_line_shows_display_name_and_types() {
        let package = Package {
            id: None,
            name: "detector-desktop".to_string(),
            types: vec![AddonType::Detector, AddonType::Executor],
            info: PackageInfo {
                version: "1.2.0".to_string(),
                description: "Desktop detector".to_string(),
                size: None,
                icon_url: None,
                display_name: Some("Desktop".to_string()),
            },
            entry: BTreeMap::new(),
        };
        assert_eq!(
            package_line(&package),
            "detector-desktop 1.2.0 (Desktop) [detector, executor]"
        );
    }

    #[test]
    fn progress_callback_tracks_bars_by_name() {
        let multi = MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden());
        let (callback, bars) = create_progress_callback(multi, ProgressStyles::default(), "installed");

        callback(InstallProgress::DownloadStarted {
            name: "ahk".to_string(),
            total_bytes: 10,
            estimated: false,
        });
        callback(InstallProgress::DownloadProgress {
            name: "ahk".to_string(),
            downloaded: 4,
            total_bytes: 10,
        });
        assert_eq!(bars.lock().unwrap()["ahk"].position(), 4);

        callback(InstallProgress::InstallCompleted {
            name: "ahk".to_string(),
        });
        assert!(bars.lock().unwrap()["ahk"].is_finished());
    }
}
