//! Environment introspection text given to the generator as context.

use std::collections::BTreeSet;
use std::env;
use std::ffi::OsStr;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::debug;

/// Uncategorized tools listed at most.
const OTHER_TOOLS_LIMIT: usize = 15;

const CATEGORIES: &[(&str, &[&str])] = &[
    (
        "Development Tools",
        &[
            "python", "python3", "node", "java", "javac", "gcc", "g++", "clang", "make", "cmake",
            "dotnet", "go", "rustc", "cargo", "ruby", "php", "perl", "scala", "kotlin",
        ],
    ),
    ("Version Control", &["git", "svn", "hg", "bzr", "cvs"]),
    (
        "Package Managers",
        &[
            "pip", "pip3", "conda", "npm", "yarn", "pnpm", "brew", "choco", "apt", "apt-get",
            "yum", "dnf", "pacman", "gem", "composer", "uv",
        ],
    ),
    (
        "Network Tools",
        &[
            "curl", "wget", "ssh", "scp", "rsync", "ping", "traceroute", "nslookup", "dig",
            "netstat", "ss", "telnet", "ftp", "sftp",
        ],
    ),
    (
        "System Tools",
        &[
            "ps", "top", "htop", "kill", "killall", "df", "du", "mount", "umount", "lsof",
            "systemctl", "service", "journalctl",
        ],
    ),
    (
        "Text/File Tools",
        &[
            "grep", "rg", "sed", "awk", "sort", "uniq", "head", "tail", "cat", "less", "more",
            "find", "vim", "nano", "emacs", "code", "jq",
        ],
    ),
    (
        "Databases",
        &["mysql", "psql", "sqlite3", "mongo", "mongosh", "redis-cli", "influx"],
    ),
    (
        "Cloud/DevOps",
        &[
            "docker", "podman", "kubectl", "helm", "terraform", "ansible", "vagrant", "aws",
            "gcloud", "az", "heroku",
        ],
    ),
    ("Multimedia", &["ffmpeg", "ffprobe", "convert", "magick", "gimp", "inkscape", "vlc"]),
];

/// Point-in-time description of the host.
#[derive(Debug, Clone)]
pub struct SystemSnapshot {
    pub local_time: String,
    pub os: String,
    pub arch: String,
    pub paths: Vec<(&'static str, String)>,
    /// Category name to the tools found for it, in `CATEGORIES` order, then "Other Tools".
    pub tools: Vec<(&'static str, Vec<String>)>,
}

/// Collect and render host information for the generation prompt.
pub fn describe(interpreter: &Path) -> String {
    render(&collect(interpreter))
}

pub fn collect(interpreter: &Path) -> SystemSnapshot {
    let found = env::var_os("PATH")
        .map(|path| scan_path(&path))
        .unwrap_or_default();
    debug!(executables = found.len(), "scanned PATH");
    SystemSnapshot {
        local_time: Local::now().format("%Y-%m-%d %H:%M:%S %:z").to_string(),
        os: env::consts::OS.to_string(),
        arch: env::consts::ARCH.to_string(),
        paths: key_paths(interpreter),
        tools: categorize(&found),
    }
}

pub fn render(snapshot: &SystemSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Current time: {}", snapshot.local_time);
    let _ = writeln!(out, "Operating system: {} ({})", snapshot.os, snapshot.arch);
    out.push_str("\nKey paths:\n");
    for (name, path) in &snapshot.paths {
        let _ = writeln!(out, "  {name:<20}: {path}");
    }
    out.push_str("\nTools on PATH:\n");
    if snapshot.tools.is_empty() {
        out.push_str("  (none detected)\n");
    }
    for (category, tools) in &snapshot.tools {
        let _ = writeln!(out, "  {category}: {}", tools.join(", "));
    }
    out
}

fn key_paths(interpreter: &Path) -> Vec<(&'static str, String)> {
    let show = |p: Option<PathBuf>| {
        p.map(|p| p.display().to_string())
            .unwrap_or_else(|| "(unknown)".to_string())
    };
    let mut paths = vec![
        ("Current directory", show(env::current_dir().ok())),
        (
            "Home directory",
            show(
                env::var_os("HOME")
                    .or_else(|| env::var_os("USERPROFILE"))
                    .map(PathBuf::from),
            ),
        ),
        ("Temp directory", show(Some(env::temp_dir()))),
        ("Sandbox python", interpreter.display().to_string()),
    ];
    if cfg!(windows) {
        for (label, var) in [
            ("Program Files", "PROGRAMFILES"),
            ("AppData Roaming", "APPDATA"),
        ] {
            paths.push((label, show(env::var_os(var).map(PathBuf::from))));
        }
    } else {
        paths.push(("Usr bin", "/usr/bin".to_string()));
        paths.push(("Usr local bin", "/usr/local/bin".to_string()));
    }
    paths
}

/// Lowercased stems of every executable file in the `PATH`-style list.
fn scan_path(path_var: &OsStr) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    for dir in env::split_paths(path_var) {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !is_executable(&path) {
                continue;
            }
            if let Some(stem) = path.file_stem() {
                found.insert(stem.to_string_lossy().to_lowercase());
            }
        }
    }
    found
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn categorize(found: &BTreeSet<String>) -> Vec<(&'static str, Vec<String>)> {
    let mut known = BTreeSet::new();
    let mut out = Vec::new();
    for (category, names) in CATEGORIES {
        known.extend(names.iter().copied());
        let hits: Vec<String> = names
            .iter()
            .filter(|name| found.contains(**name))
            .map(|name| (*name).to_string())
            .collect();
        if !hits.is_empty() {
            out.push((*category, hits));
        }
    }
    let other: Vec<String> = found
        .iter()
        .filter(|name| !known.contains(name.as_str()))
        .take(OTHER_TOOLS_LIMIT)
        .cloned()
        .collect();
    if !other.is_empty() {
        out.push(("Other Tools", other));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn categorize_groups_known_tools_and_caps_others() {
        let mut found = names(&["git", "curl", "python3", "docker"]);
        for i in 0..20 {
            found.insert(format!("zz-tool-{i:02}"));
        }
        let groups = categorize(&found);
        let lookup = |cat: &str| {
            groups
                .iter()
                .find(|(c, _)| *c == cat)
                .map(|(_, tools)| tools.clone())
        };
        assert_eq!(lookup("Version Control"), Some(vec!["git".to_string()]));
        assert_eq!(lookup("Network Tools"), Some(vec!["curl".to_string()]));
        assert_eq!(lookup("Cloud/DevOps"), Some(vec!["docker".to_string()]));
        assert_eq!(lookup("Databases"), None);
        assert_eq!(lookup("Other Tools").map(|t| t.len()), Some(OTHER_TOOLS_LIMIT));
        assert_eq!(groups.last().map(|(c, _)| *c), Some("Other Tools"));
    }

    #[cfg(unix)]
    #[test]
    fn scan_path_finds_only_executables() {
        use std::os::unix::fs::PermissionsExt;
        let temp = tempfile::tempdir().expect("tempdir");
        let exe = temp.path().join("MyTool.sh");
        fs::write(&exe, "#!/bin/sh\n").expect("write");
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).expect("chmod");
        fs::write(temp.path().join("notes.txt"), "x").expect("write");

        let path_var = env::join_paths([temp.path(), Path::new("/definitely/missing")])
            .expect("join paths");
        let found = scan_path(&path_var);
        assert_eq!(found, names(&["mytool"]));
    }

    #[test]
    fn render_lists_paths_and_tools() {
        let snapshot = SystemSnapshot {
            local_time: "2026-01-02 03:04:05 +00:00".to_string(),
            os: "linux".to_string(),
            arch: "x86_64".to_string(),
            paths: vec![("Sandbox python", "/s/venv/bin/python".to_string())],
            tools: vec![("Version Control", vec!["git".to_string(), "hg".to_string()])],
        };
        let text = render(&snapshot);
        assert!(text.starts_with("Current time: 2026-01-02 03:04:05"));
        assert!(text.contains("Operating system: linux (x86_64)"));
        assert!(text.contains("Sandbox python      : /s/venv/bin/python"));
        assert!(text.contains("Version Control: git, hg"));
    }
}
